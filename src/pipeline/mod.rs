//! Stages that sit around the reconciliation core.
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ llm ──▶ postprocess ──▶ reconcile ──▶ assemble
//! (URL/path) (pdfium)  (base64)   (VLM)   (cleanup)
//! ```
//!
//! 1. [`input`]: canonicalise the user-supplied path or URL to a local file
//! 2. [`render`]: the [`Rasterizer`]/[`AssetExtractor`] seams and their
//!    pdfium implementation; blocking, so callers use `spawn_blocking`
//! 3. [`encode`]: base64 PNG for the model, white-flattened PNG for disk
//! 4. [`llm`]: the [`Synthesizer`] seam and the `edgequake-llm` client;
//!    the only stage with network I/O besides URL download
//! 5. [`postprocess`]: deterministic cleanup of model quirks

pub mod encode;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod render;

pub use llm::{SynthesisError, Synthesizer, VlmSynthesizer};
pub use render::{AssetExtractor, PageSource, PdfiumSource, Rasterizer};
