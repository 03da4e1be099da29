//! Configuration types for PDF-to-Markdown conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. The CLI maps its flags onto the
//! builder; library callers set only what they care about and rely on the
//! defaults for the rest.

use crate::cancel::CancelToken;
use crate::error::Pdf2MdError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Model used when neither the config nor the environment names one.
pub const DEFAULT_MODEL: &str = "llava";

/// Configuration for a PDF-to-Markdown conversion.
///
/// # Example
/// ```rust
/// use vlm_pdf2md::{ConversionConfig, PageSelection};
///
/// let config = ConversionConfig::builder()
///     .model("qwen2.5vl")
///     .pages(PageSelection::Range(1, 3))
///     .images_dir("docs/manual_images")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Vision model identifier passed to the provider. Default: `llava`.
    pub model: String,

    /// LLM provider name (e.g. "ollama", "openai", "anthropic").
    /// If None, `EDGEQUAKE_LLM_PROVIDER` is consulted, then "ollama".
    pub provider_name: Option<String>,

    /// Page selection. Default: all pages. Validated against the page count;
    /// an inverted or out-of-bounds range is an input error, not clipped.
    pub pages: PageSelection,

    /// Markdown output path. Default: `<input-stem>.md` next to the input.
    pub output_path: Option<PathBuf>,

    /// Images directory. Default: `<output-dir>/<input-stem>_images/`.
    pub images_dir: Option<PathBuf>,

    /// Rendering DPI used when rasterising each page. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    ///
    /// Caps either dimension regardless of DPI so that a poster-sized page
    /// cannot exhaust memory or exceed the provider's upload limit.
    pub max_rendered_pixels: u32,

    /// Pages rendered and synthesized at the same time. Default: 1.
    ///
    /// Only rasterisation, extraction and the VLM call overlap; results are
    /// always reconciled and assembled in ascending page order.
    pub concurrency: usize,

    /// Sampling temperature for the VLM completion. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the VLM may generate per page. Default: 4096.
    pub max_tokens: usize,

    /// Per-VLM-call timeout in seconds. Default: 300.
    ///
    /// Local vision models on CPU routinely take minutes per page, so the
    /// default is generous. Expiry is reported as `ModelTimeout`.
    pub api_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom system prompt. If None, uses built-in default.
    pub system_prompt: Option<String>,

    /// Ask the VLM for an alt-text description of every extracted image.
    /// Default: false.
    pub describe_images: bool,

    /// Prefix for stored image names (`<prefix>_0001.png`). Default: none.
    ///
    /// Useful when several documents share one images directory.
    pub image_prefix: Option<String>,

    /// How internal page links are written. Default: `#page-N`.
    pub anchor_style: AnchorStyle,

    /// Separator between page fragments. Default: one blank line.
    pub page_separator: PageSeparator,

    /// Emit `<a id="page-N"></a>` at the start of every page so that
    /// internal links have something to land on. Default: false.
    pub page_anchors: bool,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Receives per-page progress events.
    pub progress_callback: Option<ProgressCallback>,

    /// Stops scheduling new pages once cancelled.
    pub cancel: Option<CancelToken>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            provider_name: None,
            pages: PageSelection::default(),
            output_path: None,
            images_dir: None,
            dpi: 150,
            max_rendered_pixels: 2000,
            concurrency: 1,
            temperature: 0.1,
            max_tokens: 4096,
            api_timeout_secs: 300,
            password: None,
            system_prompt: None,
            describe_images: false,
            image_prefix: None,
            anchor_style: AnchorStyle::default(),
            page_separator: PageSeparator::default(),
            page_anchors: false,
            download_timeout_secs: 120,
            progress_callback: None,
            cancel: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("pages", &self.pages)
            .field("output_path", &self.output_path)
            .field("images_dir", &self.images_dir)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("describe_images", &self.describe_images)
            .field("image_prefix", &self.image_prefix)
            .field("anchor_style", &self.anchor_style)
            .field("page_separator", &self.page_separator)
            .field("page_anchors", &self.page_anchors)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output_path = Some(path.into());
        self
    }

    pub fn images_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.images_dir = Some(path.into());
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn describe_images(mut self, v: bool) -> Self {
        self.config.describe_images = v;
        self
    }

    pub fn image_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.image_prefix = Some(prefix.into());
        self
    }

    pub fn anchor_style(mut self, style: AnchorStyle) -> Self {
        self.config.anchor_style = style;
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn page_anchors(mut self, v: bool) -> Self {
        self.config.page_anchors = v;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.config.cancel = Some(token);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Pdf2MdError> {
        let c = &self.config;
        if c.model.trim().is_empty() {
            return Err(Pdf2MdError::InvalidConfig("Model name must not be empty".into()));
        }
        if c.concurrency == 0 {
            return Err(Pdf2MdError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(Pdf2MdError::InvalidConfig("API timeout must be ≥ 1s".into()));
        }
        if let PageSelection::Range(start, end) = c.pages {
            if start == 0 || start > end {
                return Err(Pdf2MdError::InvalidConfig(format!(
                    "Page range {start}-{end} is invalid: pages are 1-indexed and start must be <= end"
                )));
            }
        }
        if let Some(ref prefix) = c.image_prefix {
            if prefix.contains(['/', '\\']) {
                return Err(Pdf2MdError::InvalidConfig(format!(
                    "Image prefix '{prefix}' must not contain path separators"
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Specifies which pages of the PDF to convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageSelection {
    /// Convert all pages (default).
    #[default]
    All,
    /// Convert a single page (1-indexed).
    Single(usize),
    /// Convert a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
}

impl PageSelection {
    /// Resolve the selection to 1-based page numbers, in ascending order.
    ///
    /// Unlike a best-effort clip, an inverted range or any page beyond the
    /// document is rejected so that the caller never receives a silently
    /// shortened document.
    pub fn resolve(&self, total_pages: usize) -> Result<Vec<usize>, Pdf2MdError> {
        let (start, end) = match *self {
            PageSelection::All => (1, total_pages),
            PageSelection::Single(p) => (p, p),
            PageSelection::Range(s, e) => (s, e),
        };
        if total_pages == 0 || start == 0 || start > end || end > total_pages {
            return Err(Pdf2MdError::InvalidPageRange {
                start,
                end,
                total: total_pages,
            });
        }
        Ok((start..=end).collect())
    }
}

/// How to separate pages in the assembled Markdown output.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageSeparator {
    /// One blank line between pages. (default)
    #[default]
    BlankLine,
    /// Horizontal rule: "\n\n---\n\n"
    HorizontalRule,
    /// HTML comment with page number: "<!-- page N -->"
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator placed before the page `page_num` (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::BlankLine => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}

/// How internal (page-to-page) links are rendered.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AnchorStyle {
    /// In-document fragment: `#page-N`. (default)
    #[default]
    Fragment,
    /// Another file plus fragment: `<file>#page-N`, for documents that are
    /// split across several Markdown files.
    File(String),
}
