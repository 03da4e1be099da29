//! Page reconciliation: merge the model's Markdown with the page's real assets.
//!
//! ```text
//! synthesized markdown ─┐
//! embedded images ──────┼─▶ placeholder pairing ─▶ link application ─▶ MarkdownFragment
//! link annotations ─────┘        (ImageSink)          (LinkResolver)
//! ```
//!
//! Images are placed first so that link matching never lands inside an image
//! reference it just produced.

pub mod links;
pub mod placeholder;

use crate::assemble::ImageSink;
use crate::error::Pdf2MdError;
use crate::model::{EmbeddedImage, LinkAnnotation, MarkdownFragment};
use crate::resolve::LinkResolver;
use tracing::debug;

pub use links::{apply_links, LinkOutcome};
pub use placeholder::{alt_text, find_placeholders, place_images, ImagePlacement, Placeholder};

/// Stateless per-page reconciler; cross-page state lives behind the sink.
#[derive(Debug, Clone)]
pub struct Reconciler {
    resolver: LinkResolver,
}

impl Reconciler {
    pub fn new(resolver: LinkResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &LinkResolver {
        &self.resolver
    }

    /// Reconcile one page.
    ///
    /// Every image is stored through `sink`, whether or not the model left a
    /// placeholder for it. Only a failed image write is an error; links that
    /// cannot be placed end up in `links_dropped`.
    pub fn reconcile(
        &self,
        page_markdown: &str,
        images: &[EmbeddedImage],
        links: &[LinkAnnotation],
        page_number: usize,
        sink: &mut dyn ImageSink,
    ) -> Result<MarkdownFragment, Pdf2MdError> {
        let placed = place_images(page_markdown, images, page_number, sink)?;
        let linked = apply_links(&placed.markdown, links, page_number, &self.resolver);

        debug!(
            "Page {}: {} images ({} appended, {} placeholders removed), {} links applied, {} dropped",
            page_number,
            placed.images.len(),
            placed.images_appended,
            placed.placeholders_removed,
            linked.applied,
            linked.dropped.len()
        );

        Ok(MarkdownFragment {
            page_number,
            markdown: linked.markdown,
            images: placed.images,
            placeholders_removed: placed.placeholders_removed,
            images_appended: placed.images_appended,
            links_applied: linked.applied,
            links_dropped: linked.dropped,
        })
    }
}
