//! Progress-callback trait for per-page conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the pipeline reconciles each page.
//!
//! # Example
//!
//! ```rust
//! use vlm_pdf2md::{ConversionProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     images: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, markdown_len: usize, images: usize) {
//!         self.images.fetch_add(images, Ordering::SeqCst);
//!         eprintln!("Page {}/{} done ({} bytes)", page_num, total_pages, markdown_len);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { images: AtomicUsize::new(0) });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::LinkWarning;
use std::sync::Arc;

/// Called by the conversion pipeline as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// `on_page_start` fires from the worker preparing a page, so with
/// `concurrency > 1` it may be called from several tasks at once. Completion,
/// error and link events are emitted by the single in-order drain loop.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once the page range is validated, before any page work.
    fn on_conversion_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before a page is rasterised and sent to the VLM.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page fragment has been reconciled and queued for output.
    ///
    /// # Arguments
    /// * `markdown_len`: byte length of the page fragment
    /// * `images`      : images stored for the page
    fn on_page_complete(&self, page_num: usize, total_pages: usize, markdown_len: usize, images: usize) {
        let _ = (page_num, total_pages, markdown_len, images);
    }

    /// Called when a page fails; the run aborts right after.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called for every link annotation that could not be applied.
    fn on_link_dropped(&self, warning: &LinkWarning) {
        let _ = warning;
    }

    /// Called once after the Markdown file has been written.
    fn on_conversion_complete(&self, total_pages: usize, images_saved: usize) {
        let _ = (total_pages, images_saved);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
