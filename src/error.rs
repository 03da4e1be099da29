//! Error types for the vlm-pdf2md library.
//!
//! Two severities exist:
//!
//! * [`Pdf2MdError`]: **Fatal**: the run stops, the Markdown file is not
//!   written and any images stored during the run are removed again.
//!   Returned as `Err(Pdf2MdError)` from the `convert*` entry points.
//!
//! * [`LinkWarning`]: **Non-fatal**: a link annotation could not be placed
//!   in the synthesized text or its target could not be resolved. The link
//!   is dropped, the warning is counted in
//!   [`crate::output::ConversionStats::links_dropped`] and the run continues.
//!
//! There is deliberately no "partial document" severity: skipping a page that
//! failed to render or synthesize would yield a complete-looking but
//! incomplete Markdown file.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the vlm-pdf2md library.
#[derive(Debug, Error)]
pub enum Pdf2MdError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The document has no pages at all.
    #[error("PDF '{path}' has no pages")]
    EmptyDocument { path: PathBuf },

    /// The requested page range is inverted or outside the document.
    #[error("Invalid page range {start}-{end} (document has {total} pages)")]
    InvalidPageRange {
        start: usize,
        end: usize,
        total: usize,
    },

    // ── Render errors ─────────────────────────────────────────────────────
    /// pdfium failed to rasterise a page.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// pdfium failed to enumerate a page's images or link annotations.
    #[error("Page {page}: asset extraction failed: {detail}")]
    ExtractionFailed { page: usize, detail: String },

    // ── Model errors ──────────────────────────────────────────────────────
    /// The configured provider could not be constructed.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The model host was unreachable or rejected the request.
    #[error("Page {page}: model '{model}' unavailable: {detail}\nRe-run once the model host is reachable.")]
    ModelUnavailable {
        page: usize,
        model: String,
        detail: String,
    },

    /// The model did not answer within the configured timeout.
    #[error("Page {page}: model '{model}' timed out after {secs}s\nIncrease --api-timeout or use a smaller model.")]
    ModelTimeout {
        page: usize,
        model: String,
        secs: u64,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create the images directory or write an image into it.
    #[error("Page {page}: failed to write image asset '{path}': {source}")]
    AssetWriteFailed {
        page: usize,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The run was cancelled before every page was processed.
    #[error("Conversion cancelled before page {page} was processed")]
    Cancelled { page: usize },

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Download a build for your platform from\n\
  https://github.com/bblanchon/pdfium-binaries/releases\n\
and either place it next to the binary or set PDFIUM_LIB_PATH=/path/to/libpdfium.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The pipeline stage a fatal error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Input,
    Render,
    Synthesis,
    AssetWrite,
    Output,
    Config,
    Internal,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Input => "input",
            Stage::Render => "render",
            Stage::Synthesis => "synthesis",
            Stage::AssetWrite => "asset write",
            Stage::Output => "output",
            Stage::Config => "config",
            Stage::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl Pdf2MdError {
    /// The stage that failed, for "page N, stage X" style reporting.
    pub fn stage(&self) -> Stage {
        use Pdf2MdError::*;
        match self {
            FileNotFound { .. }
            | PermissionDenied { .. }
            | InvalidInput { .. }
            | DownloadFailed { .. }
            | DownloadTimeout { .. }
            | NotAPdf { .. }
            | CorruptPdf { .. }
            | PasswordRequired { .. }
            | WrongPassword { .. }
            | EmptyDocument { .. }
            | InvalidPageRange { .. } => Stage::Input,
            RenderFailed { .. } | ExtractionFailed { .. } | PdfiumBindingFailed(_) => {
                Stage::Render
            }
            ProviderNotConfigured { .. } | ModelUnavailable { .. } | ModelTimeout { .. } => {
                Stage::Synthesis
            }
            AssetWriteFailed { .. } => Stage::AssetWrite,
            OutputWriteFailed { .. } => Stage::Output,
            InvalidConfig(_) | Cancelled { .. } => Stage::Config,
            Internal(_) => Stage::Internal,
        }
    }

    /// The 1-based page the error occurred on, when it is page-specific.
    pub fn page(&self) -> Option<usize> {
        use Pdf2MdError::*;
        match self {
            RenderFailed { page, .. }
            | ExtractionFailed { page, .. }
            | ModelUnavailable { page, .. }
            | ModelTimeout { page, .. }
            | AssetWriteFailed { page, .. }
            | Cancelled { page } => Some(*page),
            _ => None,
        }
    }

    /// Whether re-running the whole invocation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Pdf2MdError::ModelUnavailable { .. }
                | Pdf2MdError::ModelTimeout { .. }
                | Pdf2MdError::DownloadFailed { .. }
                | Pdf2MdError::DownloadTimeout { .. }
        )
    }
}

/// Why a link annotation was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkDropReason {
    /// The annotation covers no (or too little) visible text to match.
    NoAnchorText,
    /// The visible text does not occur anywhere linkable in the page Markdown.
    TextNotFound,
    /// The internal target page does not exist in the document.
    PageOutOfRange { total: usize },
    /// The target is empty or cannot be expressed as a Markdown destination.
    UnresolvableTarget,
}

/// A non-fatal link reconciliation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Page {page}: dropped link to '{target}' ({})", describe_reason(.reason))]
pub struct LinkWarning {
    pub page: usize,
    pub target: String,
    pub text: String,
    pub reason: LinkDropReason,
}

fn describe_reason(reason: &LinkDropReason) -> String {
    match reason {
        LinkDropReason::NoAnchorText => "no matchable anchor text".to_string(),
        LinkDropReason::TextNotFound => "anchor text not found in page text".to_string(),
        LinkDropReason::PageOutOfRange { total } => {
            format!("target page outside document of {total} pages")
        }
        LinkDropReason::UnresolvableTarget => "unresolvable target".to_string(),
    }
}
