//! Page access through pdfium: rasterisation and asset extraction.
//!
//! The pipeline talks to pages through the [`Rasterizer`] and
//! [`AssetExtractor`] traits; [`PdfiumSource`] implements both over
//! `pdfium-render`. All methods block. Callers run them under
//! `tokio::task::spawn_blocking` because pdfium keeps global state and must
//! never stall a Tokio worker.
//!
//! Each call binds pdfium and reopens the document. Loading is cheap next to
//! a VLM round-trip, and it keeps `PdfiumSource` a plain `Send + Sync` value
//! that concurrent page tasks can share behind an `Arc`.

use crate::error::Pdf2MdError;
use crate::model::{EmbeddedImage, ImageFormat, LinkAnnotation, LinkTarget, Rect};
use crate::pipeline::encode;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Renders single pages to bitmaps.
pub trait Rasterizer: Send + Sync {
    /// Number of pages in the whole document.
    fn page_count(&self) -> usize;

    /// Render 1-based `page_number` at `dpi`.
    fn render(&self, page_number: usize, dpi: u32) -> Result<DynamicImage, Pdf2MdError>;
}

/// Pulls embedded images and link annotations out of a page.
pub trait AssetExtractor: Send + Sync {
    /// Raster images in extraction order.
    fn extract_images(&self, page_number: usize) -> Result<Vec<EmbeddedImage>, Pdf2MdError>;

    fn extract_links(&self, page_number: usize) -> Result<Vec<LinkAnnotation>, Pdf2MdError>;
}

/// Everything the pipeline needs from a document.
pub trait PageSource: Rasterizer + AssetExtractor {}

impl<T: Rasterizer + AssetExtractor> PageSource for T {}

/// Bind to a pdfium shared library.
///
/// `PDFIUM_LIB_PATH` (a file or a directory) wins; otherwise the working
/// directory is tried, then the system library search path.
pub fn bind_pdfium() -> Result<Pdfium, Pdf2MdError> {
    let bindings = match std::env::var_os("PDFIUM_LIB_PATH") {
        Some(custom) => {
            let custom = PathBuf::from(custom);
            let lib = if custom.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&custom)
            } else {
                custom
            };
            Pdfium::bind_to_library(&lib).map_err(|e| {
                Pdf2MdError::PdfiumBindingFailed(format!("{}: {e:?}", lib.display()))
            })?
        }
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| Pdf2MdError::PdfiumBindingFailed(format!("{e:?}")))?,
    };
    Ok(Pdfium::new(bindings))
}

/// A PDF on disk, opened on demand through pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumSource {
    path: PathBuf,
    password: Option<String>,
    page_count: usize,
    max_pixels: u32,
}

impl PdfiumSource {
    /// Open `path`, validating that it loads and has at least one page.
    ///
    /// `max_pixels` caps the longest rendered edge whatever the DPI, so a
    /// poster-sized page cannot produce a gigapixel bitmap.
    pub fn open(path: &Path, password: Option<&str>, max_pixels: u32) -> Result<Self, Pdf2MdError> {
        let pdfium = bind_pdfium()?;
        let document = load_document(&pdfium, path, password)?;
        let page_count = document.pages().len() as usize;
        if page_count == 0 {
            return Err(Pdf2MdError::EmptyDocument {
                path: path.to_path_buf(),
            });
        }
        info!("PDF loaded: {} ({} pages)", path.display(), page_count);

        Ok(Self {
            path: path.to_path_buf(),
            password: password.map(str::to_string),
            page_count,
            max_pixels,
        })
    }

    /// [`PdfiumSource::open`] on the blocking pool.
    pub async fn open_async(
        path: &Path,
        password: Option<&str>,
        max_pixels: u32,
    ) -> Result<Self, Pdf2MdError> {
        let path = path.to_path_buf();
        let password = password.map(str::to_string);
        tokio::task::spawn_blocking(move || Self::open(&path, password.as_deref(), max_pixels))
            .await
            .map_err(|e| Pdf2MdError::Internal(format!("PDF open task panicked: {e}")))?
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document and run `f` against one of its pages.
    fn with_page<T>(
        &self,
        page_number: usize,
        on_error: impl Fn(String) -> Pdf2MdError,
        f: impl FnOnce(&PdfDocument<'_>, &PdfPage<'_>) -> Result<T, Pdf2MdError>,
    ) -> Result<T, Pdf2MdError> {
        if page_number == 0 || page_number > self.page_count {
            return Err(on_error(format!(
                "page {page_number} is outside the document (1-{})",
                self.page_count
            )));
        }
        let index = u16::try_from(page_number - 1)
            .map_err(|_| on_error(format!("page {page_number} exceeds pdfium's page index range")))?;

        let pdfium = bind_pdfium()?;
        let document = load_document(&pdfium, &self.path, self.password.as_deref())?;
        let page = document
            .pages()
            .get(index)
            .map_err(|e| on_error(format!("{e:?}")))?;
        f(&document, &page)
    }
}

impl Rasterizer for PdfiumSource {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn render(&self, page_number: usize, dpi: u32) -> Result<DynamicImage, Pdf2MdError> {
        let render_err = |detail| Pdf2MdError::RenderFailed {
            page: page_number,
            detail,
        };
        let max = self.max_pixels as i32;
        let config = PdfRenderConfig::new()
            .scale_page_by_factor(dpi as f32 / 72.0)
            .set_maximum_width(max)
            .set_maximum_height(max);

        self.with_page(page_number, render_err, |_, page| {
            let bitmap = page
                .render_with_config(&config)
                .map_err(|e| render_err(format!("{e:?}")))?;
            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                page_number,
                image.width(),
                image.height()
            );
            Ok(image)
        })
    }
}

impl AssetExtractor for PdfiumSource {
    fn extract_images(&self, page_number: usize) -> Result<Vec<EmbeddedImage>, Pdf2MdError> {
        let extract_err = |detail| Pdf2MdError::ExtractionFailed {
            page: page_number,
            detail,
        };

        self.with_page(page_number, extract_err, |document, page| {
            let mut images = Vec::new();
            collect_images(page.objects().iter(), document, page_number, 0, &mut images)
                .map_err(|e| extract_err(format!("PNG encoding failed: {e}")))?;
            debug!("Page {}: {} embedded images", page_number, images.len());
            Ok(images)
        })
    }

    fn extract_links(&self, page_number: usize) -> Result<Vec<LinkAnnotation>, Pdf2MdError> {
        let extract_err = |detail| Pdf2MdError::ExtractionFailed {
            page: page_number,
            detail,
        };

        self.with_page(page_number, extract_err, |_, page| {
            let text = page.text().map_err(|e| extract_err(format!("{e:?}")))?;
            let mut links = Vec::new();

            for link in page.links().iter() {
                let Some(target) = link_target(&link) else {
                    debug!("Page {}: skipping link without a usable target", page_number);
                    continue;
                };
                let Ok(rect) = link.rect() else {
                    continue;
                };
                links.push(LinkAnnotation {
                    page_number,
                    rect: Rect {
                        left: rect.left().value,
                        bottom: rect.bottom().value,
                        right: rect.right().value,
                        top: rect.top().value,
                    },
                    text: text.inside_rect(rect).trim().to_string(),
                    target,
                });
            }
            debug!("Page {}: {} link annotations", page_number, links.len());
            Ok(links)
        })
    }
}

/// Form XObjects nest; deeper chains than this are not walked.
const MAX_FORM_DEPTH: usize = 8;

/// Append every raster image under `objects` to `images`, descending into
/// form XObjects in content order.
fn collect_images(
    objects: PdfPageObjectsIterator<'_>,
    document: &PdfDocument<'_>,
    page_number: usize,
    depth: usize,
    images: &mut Vec<EmbeddedImage>,
) -> Result<(), image::ImageError> {
    for object in objects {
        if let Some(form) = object.as_x_object_form_object() {
            if depth < MAX_FORM_DEPTH {
                collect_images(form.iter(), document, page_number, depth + 1, images)?;
            } else {
                warn!("Page {}: form XObjects nested too deeply, skipping", page_number);
            }
            continue;
        }
        let Some(image_object) = object.as_image_object() else {
            continue;
        };
        // The processed image carries the soft mask as alpha; the raw stream
        // is the fallback when pdfium cannot apply it.
        let decoded = match image_object.get_processed_image(document) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!("Page {}: no processed image ({:?}), using raw stream", page_number, e);
                // Some encodings (JBIG2, exotic colour spaces) do not decode;
                // the rest of the page is still worth keeping.
                match image_object.get_raw_image() {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!("Page {}: skipping undecodable image: {:?}", page_number, e);
                        continue;
                    }
                }
            }
        };
        let flattened = encode::flatten_onto_white(&decoded);
        let data = encode::encode_png(&flattened)?;
        images.push(EmbeddedImage::new(page_number, images.len(), ImageFormat::Png, data));
    }
    Ok(())
}

fn link_target(link: &PdfLink<'_>) -> Option<LinkTarget> {
    match link.action() {
        Some(PdfAction::Uri(action)) => action.uri().ok().map(LinkTarget::Uri),
        Some(PdfAction::LocalDestination(action)) => {
            action.destination().ok().and_then(destination_page)
        }
        Some(_) => None,
        None => link.destination().and_then(destination_page),
    }
}

fn destination_page(dest: PdfDestination<'_>) -> Option<LinkTarget> {
    dest.page_index()
        .ok()
        .map(|index| LinkTarget::Page(index as usize + 1))
}

fn load_document<'a>(
    pdfium: &'a Pdfium,
    path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, Pdf2MdError> {
    pdfium.load_pdf_from_file(path, password).map_err(|e| {
        let detail = format!("{e:?}");
        if detail.to_lowercase().contains("password") {
            if password.is_some() {
                Pdf2MdError::WrongPassword {
                    path: path.to_path_buf(),
                }
            } else {
                Pdf2MdError::PasswordRequired {
                    path: path.to_path_buf(),
                }
            }
        } else {
            Pdf2MdError::CorruptPdf {
                path: path.to_path_buf(),
                detail,
            }
        }
    })
}
