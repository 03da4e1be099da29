//! Conversion entry points and the page-ordered driver.
//!
//! ```text
//!  pages ─▶ [prepare × concurrency] ─▶ buffered (page order) ─▶ reconcile ─▶ Assembler
//!           extract · render · VLM · clean
//! ```
//!
//! Preparation of several pages may overlap, but results are drained strictly
//! in ascending page order, so image numbering and fragment order do not
//! depend on which model call returns first. The first failure ends the run;
//! dropping the [`Assembler`] then removes every image already stored.

use crate::assemble::{Assembler, AssemblerOptions};
use crate::config::ConversionConfig;
use crate::error::Pdf2MdError;
use crate::model::{EmbeddedImage, LinkAnnotation};
use crate::output::{ConversionOutput, ConversionStats, PageReport};
use crate::pipeline::input::{self, ResolvedInput};
use crate::pipeline::{
    postprocess, PageSource, PdfiumSource, Rasterizer, Synthesizer, VlmSynthesizer,
};
use crate::progress::ConversionProgressCallback;
use crate::reconcile::Reconciler;
use crate::resolve::LinkResolver;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Where a run writes its Markdown file and images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub markdown: PathBuf,
    pub images_dir: PathBuf,
}

impl OutputPaths {
    /// Apply the configured paths, defaulting to `<stem>.md` in `default_dir`
    /// and `<markdown dir>/<stem>_images`.
    pub fn derive(stem: &str, default_dir: &Path, config: &ConversionConfig) -> Self {
        let markdown = config
            .output_path
            .clone()
            .unwrap_or_else(|| default_dir.join(format!("{stem}.md")));
        let images_dir = config.images_dir.clone().unwrap_or_else(|| {
            markdown
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default()
                .join(format!("{stem}_images"))
        });
        Self {
            markdown,
            images_dir,
        }
    }

    /// Defaults for a resolved input: next to a local file, or in the working
    /// directory for a download.
    pub fn for_input(input: &ResolvedInput, config: &ConversionConfig) -> Self {
        let default_dir = if input.is_local() {
            input
                .path()
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default()
        } else {
            PathBuf::new()
        };
        Self::derive(&input.stem(), &default_dir, config)
    }
}

/// Convert a PDF file or URL to Markdown on disk.
///
/// Builds a [`PdfiumSource`] for the document and a [`VlmSynthesizer`] for
/// the configured provider, then runs [`convert_document`].
///
/// # Errors
/// Every error is fatal: input problems are reported before any page is
/// processed, and a failure on any page leaves neither a Markdown file nor
/// images from this run behind.
pub async fn convert(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2MdError> {
    let input_str = input_str.as_ref();
    info!("Starting conversion: {}", input_str);

    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let source =
        PdfiumSource::open_async(resolved.path(), config.password.as_deref(), config.max_rendered_pixels)
            .await?;
    // Reject a bad range before a provider is built.
    config.pages.resolve(source.page_count())?;

    let synthesizer = VlmSynthesizer::from_config(config)?;
    let paths = OutputPaths::for_input(&resolved, config);

    convert_document(Arc::new(source), Arc::new(synthesizer), &paths, config).await
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2MdError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Pdf2MdError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input_str, config))
}

/// Run the pipeline over an already-opened document.
///
/// This is the core entry point: `source` supplies bitmaps and assets,
/// `synthesizer` turns bitmaps into Markdown, and the result is written to
/// `paths`. Substituting either collaborator is how the pipeline is tested.
pub async fn convert_document(
    source: Arc<dyn PageSource>,
    synthesizer: Arc<dyn Synthesizer>,
    paths: &OutputPaths,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2MdError> {
    let start = Instant::now();
    let total_pages = source.page_count();
    let pages = config.pages.resolve(total_pages)?;
    let selected = pages.len();
    info!(
        "Converting {} of {} pages with model '{}' (concurrency {})",
        selected, total_pages, config.model, config.concurrency
    );
    notify(config, |cb| cb.on_conversion_start(selected));

    let reconciler = Reconciler::new(LinkResolver::new(total_pages, config.anchor_style.clone()));
    let mut assembler = Assembler::new(
        &paths.markdown,
        &paths.images_dir,
        AssemblerOptions::from_config(config),
    );
    let mut reports: Vec<PageReport> = Vec::with_capacity(selected);
    let mut stats = ConversionStats {
        total_pages,
        ..Default::default()
    };

    let mut prepared = stream::iter(pages.into_iter().map(|page_number| {
        prepare_page(
            Arc::clone(&source),
            Arc::clone(&synthesizer),
            page_number,
            selected,
            config,
        )
    }))
    .buffered(config.concurrency.max(1));

    while let Some(result) = prepared.next().await {
        let page = result.inspect_err(|e| report_failure(config, e, selected))?;

        let fragment = reconciler
            .reconcile(
                &page.markdown,
                &page.images,
                &page.links,
                page.page_number,
                &mut assembler,
            )
            .inspect_err(|e| report_failure(config, e, selected))?;

        for warning in &fragment.links_dropped {
            notify(config, |cb| cb.on_link_dropped(warning));
        }
        let report = PageReport::from_fragment(&fragment, page.duration_ms);
        notify(config, |cb| {
            cb.on_page_complete(page.page_number, selected, report.markdown_len, report.images.len())
        });
        stats.record(&report);
        reports.push(report);
        assembler.push(fragment)?;
    }
    drop(prepared);

    let markdown_path = assembler.markdown_path().to_path_buf();
    let images_dir = assembler.images_dir().to_path_buf();
    let markdown = assembler.finish()?;
    stats.total_duration_ms = start.elapsed().as_millis() as u64;

    info!(
        "Conversion complete: {} pages, {} images, {} links ({} dropped), {}ms",
        stats.converted_pages,
        stats.images_saved,
        stats.links_applied,
        stats.links_dropped,
        stats.total_duration_ms
    );
    notify(config, |cb| cb.on_conversion_complete(selected, stats.images_saved));

    Ok(ConversionOutput {
        markdown_path,
        images_dir,
        markdown,
        pages: reports,
        stats,
    })
}

/// A page ready for reconciliation. The bitmap is already gone.
struct PreparedPage {
    page_number: usize,
    markdown: String,
    images: Vec<EmbeddedImage>,
    links: Vec<LinkAnnotation>,
    duration_ms: u64,
}

/// Extract assets, render, synthesize and clean one page.
async fn prepare_page(
    source: Arc<dyn PageSource>,
    synthesizer: Arc<dyn Synthesizer>,
    page_number: usize,
    selected: usize,
    config: &ConversionConfig,
) -> Result<PreparedPage, Pdf2MdError> {
    if config.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
        return Err(Pdf2MdError::Cancelled { page: page_number });
    }
    notify(config, |cb| cb.on_page_start(page_number, selected));
    let start = Instant::now();

    let (mut images, links) = blocking(Arc::clone(&source), move |s| {
        Ok((s.extract_images(page_number)?, s.extract_links(page_number)?))
    })
    .await?;

    let dpi = config.dpi;
    let bitmap = blocking(source, move |s| s.render(page_number, dpi)).await?;
    let raw = synthesizer
        .synthesize(&bitmap, &config.model)
        .await
        .map_err(|e| e.into_page_error(page_number, &config.model))?;
    drop(bitmap);

    if config.describe_images {
        for image in &mut images {
            match synthesizer.describe_image(image, &config.model).await {
                Ok(description) => image.description = Some(description),
                Err(e) => warn!(
                    "Page {}: no description for image {} ({}); using default alt text",
                    page_number, image.index_in_page, e
                ),
            }
        }
    }

    let markdown = postprocess::clean_markdown(&raw);
    debug!(
        "Page {}: {} bytes of Markdown, {} images, {} links",
        page_number,
        markdown.len(),
        images.len(),
        links.len()
    );

    Ok(PreparedPage {
        page_number,
        markdown,
        images,
        links,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Run a pdfium-bound call on the blocking pool.
async fn blocking<T, F>(source: Arc<dyn PageSource>, f: F) -> Result<T, Pdf2MdError>
where
    T: Send + 'static,
    F: FnOnce(&dyn PageSource) -> Result<T, Pdf2MdError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(source.as_ref()))
        .await
        .map_err(|e| Pdf2MdError::Internal(format!("pdfium task panicked: {e}")))?
}

fn notify(config: &ConversionConfig, f: impl FnOnce(&dyn ConversionProgressCallback)) {
    if let Some(ref cb) = config.progress_callback {
        f(cb.as_ref());
    }
}

fn report_failure(config: &ConversionConfig, error: &Pdf2MdError, selected: usize) {
    if let Some(page) = error.page() {
        warn!("Page {} failed at stage {}: {}", page, error.stage(), error);
        notify(config, |cb| cb.on_page_error(page, selected, &error.to_string()));
    }
}
