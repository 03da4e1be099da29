//! Pipeline integration tests with an in-memory document and a scripted model.
//!
//! No pdfium and no model host are needed: [`ScriptedDocument`] stands in for
//! the rasteriser and asset extractor, [`ScriptedModel`] for the VLM. The
//! bitmap handed to the model is `page_number` pixels wide, which is how the
//! model knows which page it is looking at.

use async_trait::async_trait;
use image::DynamicImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use vlm_pdf2md::{
    convert_document, AssetExtractor, CancelToken, ConversionConfig, ConversionOutput,
    ConversionProgressCallback, EmbeddedImage, ImageFormat, LinkAnnotation, LinkDropReason,
    LinkTarget, LinkWarning, OutputPaths, PageSelection, PageSeparator, Pdf2MdError, Rasterizer,
    Stage, SynthesisError, Synthesizer,
};

// ── Test doubles ─────────────────────────────────────────────────────────────

#[derive(Default, Clone)]
struct ScriptedPage {
    images: Vec<EmbeddedImage>,
    links: Vec<LinkAnnotation>,
}

struct ScriptedDocument {
    pages: Vec<ScriptedPage>,
}

impl ScriptedDocument {
    fn blank(count: usize) -> Self {
        Self {
            pages: vec![ScriptedPage::default(); count],
        }
    }

    fn with_images(mut self, page: usize, count: usize) -> Self {
        self.pages[page - 1].images = (0..count)
            .map(|i| png(page, i))
            .collect();
        self
    }

    fn with_link(mut self, page: usize, text: &str, target: LinkTarget) -> Self {
        self.pages[page - 1]
            .links
            .push(LinkAnnotation::new(page, text, target));
        self
    }

    fn page(&self, page_number: usize) -> &ScriptedPage {
        &self.pages[page_number - 1]
    }
}

impl Rasterizer for ScriptedDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn render(&self, page_number: usize, _dpi: u32) -> Result<DynamicImage, Pdf2MdError> {
        Ok(DynamicImage::new_rgb8(page_number as u32, 1))
    }
}

impl AssetExtractor for ScriptedDocument {
    fn extract_images(&self, page_number: usize) -> Result<Vec<EmbeddedImage>, Pdf2MdError> {
        Ok(self.page(page_number).images.clone())
    }

    fn extract_links(&self, page_number: usize) -> Result<Vec<LinkAnnotation>, Pdf2MdError> {
        Ok(self.page(page_number).links.clone())
    }
}

/// Distinct bytes per image so files can be traced back to their page.
fn png(page: usize, index: usize) -> EmbeddedImage {
    EmbeddedImage::new(
        page,
        index,
        ImageFormat::Png,
        format!("page{page}-image{index}").into_bytes(),
    )
}

#[derive(Default)]
struct ScriptedModel {
    replies: HashMap<usize, String>,
    delays_ms: HashMap<usize, u64>,
    unreachable_on: Option<usize>,
    /// Cancel this token once the given page has been synthesized.
    cancel_after: Option<(usize, CancelToken)>,
}

impl ScriptedModel {
    fn new(replies: &[(usize, &str)]) -> Self {
        Self {
            replies: replies
                .iter()
                .map(|(page, md)| (*page, md.to_string()))
                .collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Synthesizer for ScriptedModel {
    async fn synthesize(&self, bitmap: &DynamicImage, _model: &str) -> Result<String, SynthesisError> {
        let page = bitmap.width() as usize;
        if let Some(ms) = self.delays_ms.get(&page) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        if self.unreachable_on == Some(page) {
            return Err(SynthesisError::Unavailable("connection refused".into()));
        }
        if let Some((after, ref token)) = self.cancel_after {
            if after == page {
                token.cancel();
            }
        }
        Ok(self
            .replies
            .get(&page)
            .cloned()
            .unwrap_or_else(|| format!("Page {page} text.")))
    }
}

#[derive(Default)]
struct RecordingCallback {
    events: Mutex<Vec<String>>,
}

impl RecordingCallback {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ConversionProgressCallback for RecordingCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        self.events.lock().unwrap().push(format!("start {total_pages}"));
    }

    fn on_page_complete(&self, page_num: usize, _total: usize, _len: usize, images: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("page {page_num} images {images}"));
    }

    fn on_page_error(&self, page_num: usize, _total: usize, _error: &str) {
        self.events.lock().unwrap().push(format!("error {page_num}"));
    }

    fn on_link_dropped(&self, warning: &LinkWarning) {
        self.events
            .lock()
            .unwrap()
            .push(format!("dropped {}", warning.text));
    }

    fn on_conversion_complete(&self, _total: usize, images_saved: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("done {images_saved}"));
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn paths_in(dir: &Path) -> OutputPaths {
    OutputPaths {
        markdown: dir.join("doc.md"),
        images_dir: dir.join("images"),
    }
}

/// Route library logs to the test harness; `RUST_LOG=debug` to see them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn run(
    doc: ScriptedDocument,
    model: ScriptedModel,
    dir: &Path,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2MdError> {
    init_tracing();
    convert_document(Arc::new(doc), Arc::new(model), &paths_in(dir), config).await
}

fn image_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

fn three_page_report() -> (ScriptedDocument, ScriptedModel) {
    let doc = ScriptedDocument::blank(3)
        .with_images(2, 1)
        .with_link(2, "the appendix", LinkTarget::Page(3));
    let model = ScriptedModel::new(&[
        (1, "# Intro\n\nSome text."),
        (
            2,
            "## Results\n\n![Throughput chart](image_placeholder)\n\nSee [the appendix] for details.",
        ),
        (3, "## Appendix\n\nRaw data."),
    ]);
    (doc, model)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn three_page_document_gets_image_and_internal_link() {
    let dir = TempDir::new().unwrap();
    let (doc, model) = three_page_report();

    let output = run(doc, model, dir.path(), &ConversionConfig::default())
        .await
        .unwrap();

    let expected = "# Intro\n\nSome text.\n\n\
                    ## Results\n\n![Throughput chart](images/0001.png)\n\n\
                    See [the appendix](#page-3) for details.\n\n\
                    ## Appendix\n\nRaw data.\n";
    assert_eq!(output.markdown, expected);
    assert_eq!(std::fs::read_to_string(dir.path().join("doc.md")).unwrap(), expected);
    assert_eq!(image_files(&dir.path().join("images")), vec!["0001.png"]);
    assert_eq!(
        std::fs::read(dir.path().join("images/0001.png")).unwrap(),
        b"page2-image0"
    );

    let page2 = &output.pages[1];
    assert_eq!(page2.page_num, 2);
    assert_eq!(page2.images, vec!["0001.png"]);
    assert_eq!(page2.links_applied, 1);
    assert!(page2.links_dropped.is_empty());

    assert_eq!(output.stats.total_pages, 3);
    assert_eq!(output.stats.converted_pages, 3);
    assert_eq!(output.stats.images_saved, 1);
    assert_eq!(output.stats.links_applied, 1);
    assert_eq!(output.stats.links_dropped, 0);
}

#[tokio::test]
async fn repeated_runs_produce_identical_output() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();

    let (doc, model) = three_page_report();
    let a = run(doc, model, first.path(), &ConversionConfig::default())
        .await
        .unwrap();
    let (doc, model) = three_page_report();
    let b = run(doc, model, second.path(), &ConversionConfig::default())
        .await
        .unwrap();

    assert_eq!(a.markdown, b.markdown);
    assert_eq!(
        image_files(&first.path().join("images")),
        image_files(&second.path().join("images"))
    );
}

#[tokio::test]
async fn images_without_placeholders_are_appended() {
    let dir = TempDir::new().unwrap();
    let doc = ScriptedDocument::blank(1).with_images(1, 2);
    let model = ScriptedModel::new(&[(1, "Text only.")]);

    let output = run(doc, model, dir.path(), &ConversionConfig::default())
        .await
        .unwrap();

    assert_eq!(
        output.markdown,
        "Text only.\n\n\
         ![Image from page 1](images/0001.png)\n\n\
         ![Image from page 1](images/0002.png)\n"
    );
    assert_eq!(output.pages[0].images_appended, 2);
    assert_eq!(output.stats.images_appended, 2);
}

#[tokio::test]
async fn surplus_placeholders_are_removed() {
    let dir = TempDir::new().unwrap();
    let doc = ScriptedDocument::blank(1).with_images(1, 1);
    let model = ScriptedModel::new(&[(
        1,
        "![A](image_placeholder)\n\n![B](image_placeholder)\n\n![C](image_placeholder)\n\nEnd.",
    )]);

    let output = run(doc, model, dir.path(), &ConversionConfig::default())
        .await
        .unwrap();

    assert_eq!(output.markdown, "![A](images/0001.png)\n\nEnd.\n");
    assert!(!output.markdown.contains("placeholder"));
    assert_eq!(output.pages[0].placeholders_removed, 2);
    assert_eq!(image_files(&dir.path().join("images")), vec!["0001.png"]);
}

#[tokio::test]
async fn numbering_follows_page_order_under_concurrency() {
    let dir = TempDir::new().unwrap();
    let doc = ScriptedDocument::blank(3)
        .with_images(1, 1)
        .with_images(2, 2)
        .with_images(3, 1);
    let mut model = ScriptedModel::new(&[
        (1, "One ![x](image_placeholder)"),
        (2, "Two ![x](image_placeholder) ![y](image_placeholder)"),
        (3, "Three ![x](image_placeholder)"),
    ]);
    // Page 1 answers last, page 2 first.
    model.delays_ms = HashMap::from([(1, 150), (2, 0), (3, 60)]);

    let config = ConversionConfig::builder().concurrency(3).build().unwrap();
    let output = run(doc, model, dir.path(), &config).await.unwrap();

    let images = dir.path().join("images");
    assert_eq!(
        image_files(&images),
        vec!["0001.png", "0002.png", "0003.png", "0004.png"]
    );
    assert_eq!(std::fs::read(images.join("0001.png")).unwrap(), b"page1-image0");
    assert_eq!(std::fs::read(images.join("0002.png")).unwrap(), b"page2-image0");
    assert_eq!(std::fs::read(images.join("0003.png")).unwrap(), b"page2-image1");
    assert_eq!(std::fs::read(images.join("0004.png")).unwrap(), b"page3-image0");

    let one = output.markdown.find("One").unwrap();
    let two = output.markdown.find("Two").unwrap();
    let three = output.markdown.find("Three").unwrap();
    assert!(one < two && two < three);
    assert_eq!(
        output.pages.iter().map(|p| p.page_num).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
}

#[tokio::test]
async fn failure_mid_document_leaves_no_output() {
    let dir = TempDir::new().unwrap();
    let doc = ScriptedDocument::blank(3).with_images(1, 1).with_images(3, 1);
    let mut model = ScriptedModel::new(&[(1, "![Logo](image_placeholder)")]);
    model.unreachable_on = Some(2);
    let callback = Arc::new(RecordingCallback::default());
    let config = ConversionConfig::builder()
        .progress_callback(callback.clone())
        .build()
        .unwrap();

    let err = run(doc, model, dir.path(), &config).await.unwrap_err();

    match &err {
        Pdf2MdError::ModelUnavailable { page, model, .. } => {
            assert_eq!(*page, 2);
            assert_eq!(model, "llava");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.page(), Some(2));
    assert!(!dir.path().join("doc.md").exists());
    assert!(!dir.path().join("images").exists());
    assert_eq!(
        callback.events(),
        vec!["start 3", "page 1 images 1", "error 2"]
    );
}

#[tokio::test]
async fn existing_images_dir_is_kept_on_failure() {
    let dir = TempDir::new().unwrap();
    let images = dir.path().join("images");
    std::fs::create_dir(&images).unwrap();
    std::fs::write(images.join("cover.jpg"), b"keep me").unwrap();

    let doc = ScriptedDocument::blank(2).with_images(1, 1);
    let mut model = ScriptedModel::new(&[]);
    model.unreachable_on = Some(2);

    run(doc, model, dir.path(), &ConversionConfig::default())
        .await
        .unwrap_err();

    assert_eq!(image_files(&images), vec!["cover.jpg"]);
}

#[tokio::test]
async fn failed_rerun_restores_images_from_previous_run() {
    let dir = TempDir::new().unwrap();
    let images = dir.path().join("images");
    std::fs::create_dir(&images).unwrap();
    std::fs::write(images.join("0001.png"), b"previous run").unwrap();
    std::fs::write(dir.path().join("doc.md"), "![old](images/0001.png)\n").unwrap();

    // Page 1 stores 0001.png over the old file, then page 2 fails.
    let doc = ScriptedDocument::blank(2).with_images(1, 1);
    let mut model = ScriptedModel::new(&[(1, "![Figure](image_placeholder)")]);
    model.unreachable_on = Some(2);

    let err = run(doc, model, dir.path(), &ConversionConfig::default())
        .await
        .unwrap_err();
    assert_eq!(err.page(), Some(2));

    assert_eq!(image_files(&images), vec!["0001.png"]);
    assert_eq!(std::fs::read(images.join("0001.png")).unwrap(), b"previous run");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("doc.md")).unwrap(),
        "![old](images/0001.png)\n"
    );
}

#[tokio::test]
async fn unwritable_images_dir_names_page_and_stage() {
    let dir = TempDir::new().unwrap();
    // A regular file occupies the images directory's path.
    std::fs::write(dir.path().join("images"), b"").unwrap();

    let doc = ScriptedDocument::blank(3).with_images(2, 1);
    let err = run(doc, ScriptedModel::default(), dir.path(), &ConversionConfig::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Pdf2MdError::AssetWriteFailed { .. }), "got: {err:?}");
    assert_eq!(err.page(), Some(2));
    assert_eq!(err.stage(), Stage::AssetWrite);
    assert!(!dir.path().join("doc.md").exists());
}

#[tokio::test]
async fn out_of_range_pages_are_rejected_before_any_work() {
    let dir = TempDir::new().unwrap();
    let config = ConversionConfig::builder()
        .pages(PageSelection::Range(2, 5))
        .build()
        .unwrap();

    let err = run(ScriptedDocument::blank(3), ScriptedModel::default(), dir.path(), &config)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Pdf2MdError::InvalidPageRange {
            start: 2,
            end: 5,
            total: 3
        }
    ));
    assert!(!dir.path().join("doc.md").exists());
}

#[tokio::test]
async fn page_range_keeps_internal_links_to_unselected_pages() {
    let dir = TempDir::new().unwrap();
    let doc = ScriptedDocument::blank(4).with_link(2, "Chapter 4", LinkTarget::Page(4));
    let model = ScriptedModel::new(&[(2, "Continued in Chapter 4.")]);
    let config = ConversionConfig::builder()
        .pages(PageSelection::Range(2, 3))
        .build()
        .unwrap();

    let output = run(doc, model, dir.path(), &config).await.unwrap();

    assert_eq!(
        output.markdown,
        "Continued in [Chapter 4](#page-4).\n\nPage 3 text.\n"
    );
    assert_eq!(output.stats.converted_pages, 2);
    assert_eq!(output.stats.total_pages, 4);
}

#[tokio::test]
async fn unmatched_links_are_reported_not_fatal() {
    let dir = TempDir::new().unwrap();
    let doc = ScriptedDocument::blank(2)
        .with_link(1, "nowhere to be found", LinkTarget::Uri("https://example.com".into()))
        .with_link(1, "Section 9", LinkTarget::Page(9));
    let model = ScriptedModel::new(&[(1, "See Section 9 for more.")]);
    let callback = Arc::new(RecordingCallback::default());
    let config = ConversionConfig::builder()
        .progress_callback(callback.clone())
        .build()
        .unwrap();

    let output = run(doc, model, dir.path(), &config).await.unwrap();

    assert_eq!(output.markdown, "See Section 9 for more.\n\nPage 2 text.\n");
    let reasons: Vec<_> = output.link_warnings().map(|w| w.reason.clone()).collect();
    assert_eq!(
        reasons,
        vec![
            LinkDropReason::TextNotFound,
            LinkDropReason::PageOutOfRange { total: 2 }
        ]
    );
    assert_eq!(output.stats.links_dropped, 2);
    assert!(callback
        .events()
        .contains(&"dropped nowhere to be found".to_string()));
}

#[tokio::test]
async fn external_links_are_percent_encoded() {
    let dir = TempDir::new().unwrap();
    let doc = ScriptedDocument::blank(1).with_link(
        1,
        "project site",
        LinkTarget::Uri("https://example.com/docs/getting started.html".into()),
    );
    let model = ScriptedModel::new(&[(1, "Visit the project site today.")]);

    let output = run(doc, model, dir.path(), &ConversionConfig::default())
        .await
        .unwrap();

    assert_eq!(
        output.markdown,
        "Visit the [project site](https://example.com/docs/getting%20started.html) today.\n"
    );
}

#[tokio::test]
async fn url_fragments_are_percent_encoded() {
    let dir = TempDir::new().unwrap();
    let doc = ScriptedDocument::blank(1).with_link(
        1,
        "the guide",
        LinkTarget::Uri("https://example.com/guide#Getting Started".into()),
    );
    let model = ScriptedModel::new(&[(1, "Read the guide first.")]);

    let output = run(doc, model, dir.path(), &ConversionConfig::default())
        .await
        .unwrap();

    assert_eq!(
        output.markdown,
        "Read [the guide](https://example.com/guide#Getting%20Started) first.\n"
    );
}

#[tokio::test]
async fn anchors_and_separators_frame_each_page() {
    let dir = TempDir::new().unwrap();
    let model = ScriptedModel::new(&[(1, "First."), (2, "Second.")]);
    let config = ConversionConfig::builder()
        .page_anchors(true)
        .page_separator(PageSeparator::HorizontalRule)
        .build()
        .unwrap();

    let output = run(ScriptedDocument::blank(2), model, dir.path(), &config)
        .await
        .unwrap();

    assert_eq!(
        output.markdown,
        "<a id=\"page-1\"></a>\n\nFirst.\n\n---\n\n<a id=\"page-2\"></a>\n\nSecond.\n"
    );
    // No images: the directory is never created.
    assert!(!dir.path().join("images").exists());
}

#[tokio::test]
async fn prefixed_image_names() {
    let dir = TempDir::new().unwrap();
    let doc = ScriptedDocument::blank(1).with_images(1, 1);
    let model = ScriptedModel::new(&[(1, "![Map](image_placeholder)")]);
    let config = ConversionConfig::builder()
        .image_prefix("report")
        .build()
        .unwrap();

    let output = run(doc, model, dir.path(), &config).await.unwrap();

    assert_eq!(output.markdown, "![Map](images/report_0001.png)\n");
}

#[tokio::test]
async fn cancelled_before_start_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let token = CancelToken::new();
    token.cancel();
    let config = ConversionConfig::builder()
        .cancel_token(token)
        .build()
        .unwrap();

    let err = run(
        ScriptedDocument::blank(2).with_images(1, 1),
        ScriptedModel::default(),
        dir.path(),
        &config,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Pdf2MdError::Cancelled { page: 1 }));
    assert!(!dir.path().join("doc.md").exists());
}

#[tokio::test]
async fn cancellation_mid_run_rolls_back_stored_images() {
    let dir = TempDir::new().unwrap();
    let token = CancelToken::new();
    let mut model = ScriptedModel::new(&[(1, "![Cover](image_placeholder)")]);
    model.cancel_after = Some((1, token.clone()));
    let config = ConversionConfig::builder()
        .cancel_token(token)
        .build()
        .unwrap();

    let err = run(
        ScriptedDocument::blank(3).with_images(1, 1),
        model,
        dir.path(),
        &config,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Pdf2MdError::Cancelled { page: 2 }));
    assert!(!dir.path().join("doc.md").exists());
    assert!(!dir.path().join("images").exists());
}

#[tokio::test]
async fn model_noise_is_cleaned_before_reconciliation() {
    let dir = TempDir::new().unwrap();
    let doc = ScriptedDocument::blank(1).with_images(1, 1);
    let model = ScriptedModel::new(&[(
        1,
        "```markdown\nIntro\u{200B} line\n# Title\n\n![Figure 1](image_placeholder)\n```",
    )]);

    let output = run(doc, model, dir.path(), &ConversionConfig::default())
        .await
        .unwrap();

    assert_eq!(
        output.markdown,
        "Intro line\n\n# Title\n\n![Figure 1](images/0001.png)\n"
    );
}

#[tokio::test]
async fn markdown_next_to_images_uses_relative_links() {
    let dir = TempDir::new().unwrap();
    let paths = OutputPaths {
        markdown: dir.path().join("out/notes.md"),
        images_dir: dir.path().join("assets/notes images"),
    };
    std::fs::create_dir(dir.path().join("out")).unwrap();
    let doc = ScriptedDocument::blank(1).with_images(1, 1);
    let model = ScriptedModel::new(&[(1, "![Plot](image_placeholder)")]);

    let output = convert_document(
        Arc::new(doc),
        Arc::new(model),
        &paths,
        &ConversionConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(
        output.markdown,
        "![Plot](../assets/notes%20images/0001.png)\n"
    );
    assert_eq!(output.markdown_path, PathBuf::from(&paths.markdown));
    assert!(paths.images_dir.join("0001.png").is_file());
}
