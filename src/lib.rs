//! # vlm-pdf2md
//!
//! Convert PDF documents to Markdown with a vision-language model (VLM),
//! keeping the document's real images and hyperlinks.
//!
//! ## Why this crate?
//!
//! Text extractors lose layout; a VLM reading the rendered page gets the
//! structure right but only sees pixels. It cannot hand back the embedded
//! image files, and it has no idea where a link points. This crate lets the
//! model write the Markdown and then reconciles it with what pdfium extracts
//! from the same page:
//!
//! * every image the model marked with `![...](image_placeholder)` is
//!   replaced with the real image, stored as `0001.png`, `0002.png`, …
//!   in a per-document images directory;
//! * images the model missed are appended to their page, never dropped;
//! * link annotations are re-attached to the matching text, with internal
//!   targets turned into `#page-N` anchors and URLs percent-encoded for
//!   GitHub.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. Extract    embedded images + link annotations (pdfium, spawn_blocking)
//!  ├─ 3. Render     rasterise the page (pdfium, spawn_blocking)
//!  ├─ 4. Synthesize VLM reads the page, marks figures with placeholders
//!  ├─ 5. Clean      deterministic cleanup of model quirks
//!  ├─ 6. Reconcile  pair placeholders with images, apply links   (page order)
//!  └─ 7. Assemble   one Markdown file + images directory, atomically
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vlm_pdf2md::{convert, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Ollama with `llava` unless configured otherwise.
//!     let config = ConversionConfig::default();
//!     let output = convert("document.pdf", &config).await?;
//!     println!("wrote {}", output.markdown_path.display());
//!     eprintln!(
//!         "{} images, {} links ({} dropped)",
//!         output.stats.images_saved, output.stats.links_applied, output.stats.links_dropped
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Custom collaborators
//!
//! [`convert_document`] takes any [`PageSource`] and [`Synthesizer`], so a
//! different renderer or model client can be plugged in without touching the
//! reconciliation core.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2md` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! vlm-pdf2md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod assemble;
pub mod cancel;
pub mod config;
pub mod convert;
pub mod error;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod reconcile;
pub mod resolve;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use assemble::{Assembler, AssemblerOptions, ImageNameAllocator, ImageSink, StoredImage};
pub use cancel::CancelToken;
pub use config::{
    AnchorStyle, ConversionConfig, ConversionConfigBuilder, PageSelection, PageSeparator,
    DEFAULT_MODEL,
};
pub use convert::{convert, convert_document, convert_sync, OutputPaths};
pub use error::{LinkDropReason, LinkWarning, Pdf2MdError, Stage};
pub use model::{EmbeddedImage, ImageFormat, LinkAnnotation, LinkTarget, MarkdownFragment, Rect};
pub use output::{ConversionOutput, ConversionStats, PageReport};
pub use pipeline::{
    AssetExtractor, PageSource, PdfiumSource, Rasterizer, SynthesisError, Synthesizer,
    VlmSynthesizer,
};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use reconcile::Reconciler;
pub use resolve::{LinkResolver, ResolvedLink};
