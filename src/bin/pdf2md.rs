//! CLI binary for vlm-pdf2md.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use vlm_pdf2md::{
    convert, CancelToken, ConversionConfig, ConversionProgressCallback, LinkWarning, PageSelection,
    PageSeparator, Pdf2MdError, ProgressCallback, DEFAULT_MODEL,
};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live progress bar plus one log line per
/// reconciled page and per dropped link.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-page wall-clock start times. Pages may start concurrently.
    start_times: Mutex<HashMap<usize, Instant>>,
    dropped_links: AtomicUsize,
}

impl CliProgressCallback {
    /// The bar length is set by `on_conversion_start`, once the page range
    /// has been validated against the document.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            dropped_links: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Converting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut times| times.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Clear the bar without a summary, e.g. on Ctrl-C.
    fn abandon(&self) {
        self.bar.finish_and_clear();
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Starting conversion of {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, markdown_len: usize, images: usize) {
        let elapsed = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {:<10}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{markdown_len:>5} chars")),
            dim(&format!("{images} images")),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let elapsed = self.elapsed_secs(page_num);
        // Keep the log line on one terminal row.
        let msg = match error.char_indices().nth(79) {
            Some((cut, _)) => format!("{}\u{2026}", &error[..cut]),
            None => error.to_string(),
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{elapsed:.1}s")),
        ));
    }

    fn on_link_dropped(&self, warning: &LinkWarning) {
        self.dropped_links.fetch_add(1, Ordering::SeqCst);
        self.bar
            .println(format!("    {} {}", yellow("⚠"), dim(&warning.to_string())));
    }

    fn on_conversion_complete(&self, total_pages: usize, images_saved: usize) {
        self.bar.finish_and_clear();
        let dropped = self.dropped_links.load(Ordering::SeqCst);
        eprintln!(
            "{} {} pages converted, {} images saved{}",
            green("✔"),
            bold(&total_pages.to_string()),
            bold(&images_saved.to_string()),
            if dropped > 0 {
                format!(", {} links dropped", yellow(&dropped.to_string()))
            } else {
                String::new()
            }
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Basic conversion: writes report.md and report_images/ next to the PDF
  pdf2md report.pdf

  # Choose the Markdown file (images go to book_images/ beside it)
  pdf2md manual.pdf -o book.md

  # Pages 3 to 7, horizontal rules between pages, #page-N anchors
  pdf2md --pages 3-7 --separator hr --page-anchors paper.pdf

  # A different local vision model
  pdf2md --model llama3.2-vision paper.pdf

  # A hosted provider
  pdf2md --provider openai --model gpt-4.1-mini paper.pdf

  # Convert from URL (outputs land in the working directory)
  pdf2md https://arxiv.org/pdf/1706.03762 -o attention.md

  # Let the model write alt text for every extracted image
  pdf2md --describe-images slides.pdf

  # JSON report (paths, per-page counts, dropped links) on stdout
  pdf2md --json report.pdf > report.json

OUTPUT:
  The Markdown file and its images directory are written only when every
  selected page converted. A failure, or Ctrl-C, leaves no partial output.
  Images are named 0001.png, 0002.png, … in document order.

ENVIRONMENT VARIABLES:
  EDGEQUAKE_LLM_PROVIDER  Provider when --provider is not set (default: ollama)
  OLLAMA_HOST             Ollama endpoint (default: http://localhost:11434)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  RUST_LOG                Log filter, overrides -v / -q

SETUP:
  1. Install Ollama and pull a vision model:  ollama pull llava
  2. Make libpdfium available (working directory, system path or PDFIUM_LIB_PATH)
  3. Convert:                                 pdf2md document.pdf
"#;

/// Convert PDF files and URLs to Markdown using a vision-language model.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2md",
    version,
    about = "Convert PDF files and URLs to Markdown using a vision-language model",
    long_about = "Convert PDF documents (local files or URLs) to Markdown using a \
vision-language model. The document's embedded images are saved next to the Markdown \
file and referenced where the model placed them; its hyperlinks are re-attached to the \
matching text. Runs against a local Ollama model by default.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Markdown file to write. Default: <input stem>.md next to the input.
    #[arg(short, long, env = "PDF2MD_OUTPUT")]
    output: Option<PathBuf>,

    /// Images directory. Default: <stem>_images next to the Markdown file.
    #[arg(long, env = "PDF2MD_IMAGES_DIR")]
    images_dir: Option<PathBuf>,

    /// Vision model ID.
    #[arg(long, env = "PDF2MD_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// LLM provider: ollama, openai, anthropic, gemini, ...
    #[arg(long, env = "PDF2MD_PROVIDER")]
    provider: Option<String>,

    /// Page selection: all, 5, or 3-15.
    #[arg(long, env = "PDF2MD_PAGES", default_value = "all")]
    pages: String,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDF2MD_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Pages prepared concurrently. Output order is unaffected.
    #[arg(short, long, env = "PDF2MD_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Page separator: blank, hr, comment, or a custom string.
    #[arg(long, env = "PDF2MD_SEPARATOR", default_value = "blank")]
    separator: String,

    /// Emit an `<a id="page-N">` anchor before every page.
    #[arg(long, env = "PDF2MD_PAGE_ANCHORS")]
    page_anchors: bool,

    /// Ask the model for alt text for each extracted image.
    #[arg(long, env = "PDF2MD_DESCRIBE_IMAGES")]
    describe_images: bool,

    /// Prefix for image file names (`<prefix>_0001.png`).
    #[arg(long, env = "PDF2MD_IMAGE_PREFIX")]
    image_prefix: Option<String>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2MD_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDF2MD_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max model output tokens per page.
    #[arg(long, env = "PDF2MD_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Model temperature (0.0–2.0).
    #[arg(long, env = "PDF2MD_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Per-call model timeout in seconds.
    #[arg(long, env = "PDF2MD_API_TIMEOUT", default_value_t = 300)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2MD_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print the conversion report as JSON on stdout.
    #[arg(long, env = "PDF2MD_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2MD_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; link warnings still reach the
    // terminal through the callback.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb = show_progress.then(CliProgressCallback::new_dynamic);
    let cancel = CancelToken::new();
    let config = build_config(
        &cli,
        progress_cb
            .clone()
            .map(|cb| cb as Arc<dyn ConversionProgressCallback>),
        cancel.clone(),
    )
    .await?;

    // ── Run conversion ───────────────────────────────────────────────────
    // Ctrl-C drops the conversion future, which removes anything it wrote.
    let output = tokio::select! {
        result = convert(&cli.input, &config) => result.map_err(describe_failure)?,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            if let Some(cb) = progress_cb {
                cb.abandon();
            }
            anyhow::bail!("Interrupted; no output was written");
        }
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if !cli.quiet {
        if !show_progress {
            eprintln!(
                "Converted {}/{} pages in {}ms: {} images, {} links ({} dropped)",
                output.stats.converted_pages,
                output.stats.total_pages,
                output.stats.total_duration_ms,
                output.stats.images_saved,
                output.stats.links_applied,
                output.stats.links_dropped,
            );
        }
        eprintln!(
            "   {}  →  {}",
            bold(&output.markdown_path.display().to_string()),
            if output.stats.images_saved > 0 {
                output.images_dir.display().to_string()
            } else {
                dim("no images")
            }
        );
    }

    Ok(())
}

/// Name the failing stage (and page, when known) in the top-level error.
fn describe_failure(err: Pdf2MdError) -> anyhow::Error {
    let context = match err.page() {
        Some(page) => format!("Conversion failed at {} stage on page {}", err.stage(), page),
        None => format!("Conversion failed at {} stage", err.stage()),
    };
    anyhow::Error::new(err).context(context)
}

/// Map CLI args to `ConversionConfig`.
async fn build_config(
    cli: &Cli,
    progress: Option<ProgressCallback>,
    cancel: CancelToken,
) -> Result<ConversionConfig> {
    let pages = parse_pages(&cli.pages)?;
    let separator = parse_separator(&cli.separator);

    let mut builder = ConversionConfig::builder()
        .model(cli.model.clone())
        .pages(pages)
        .dpi(cli.dpi)
        .concurrency(cli.concurrency)
        .page_separator(separator)
        .page_anchors(cli.page_anchors)
        .describe_images(cli.describe_images)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .cancel_token(cancel);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref output) = cli.output {
        builder = builder.output_path(output.clone());
    }
    if let Some(ref dir) = cli.images_dir {
        builder = builder.images_dir(dir.clone());
    }
    if let Some(ref prefix) = cli.image_prefix {
        builder = builder.image_prefix(prefix.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!(
                "Invalid page range '{}-{}': start must be <= end",
                start,
                end
            );
        }

        return Ok(PageSelection::Range(start, end));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }

    Ok(PageSelection::Single(page))
}

/// Parse `--separator` string into `PageSeparator`.
fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "blank" | "none" => PageSeparator::BlankLine,
        "hr" | "---" => PageSeparator::HorizontalRule,
        "comment" => PageSeparator::Comment,
        _ => PageSeparator::Custom(s.to_string()),
    }
}
