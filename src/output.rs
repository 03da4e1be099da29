//! Result types returned by a conversion.

use crate::error::LinkWarning;
use crate::model::MarkdownFragment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Everything a successful run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Path of the written Markdown file.
    pub markdown_path: PathBuf,
    /// Directory the images were stored in. It only exists on disk when
    /// `stats.images_saved > 0`.
    pub images_dir: PathBuf,
    /// The Markdown exactly as written to `markdown_path`.
    pub markdown: String,
    /// One report per converted page, in page order.
    pub pages: Vec<PageReport>,
    pub stats: ConversionStats,
}

impl ConversionOutput {
    /// Every dropped link of the run, in page order.
    pub fn link_warnings(&self) -> impl Iterator<Item = &LinkWarning> {
        self.pages.iter().flat_map(|p| p.links_dropped.iter())
    }
}

/// Per-page outcome of reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageReport {
    /// 1-indexed page number.
    pub page_num: usize,
    /// Stored image file names, in the order they appear on the page.
    pub images: Vec<String>,
    pub placeholders_removed: usize,
    pub images_appended: usize,
    pub links_applied: usize,
    pub links_dropped: Vec<LinkWarning>,
    /// Byte length of the reconciled page Markdown.
    pub markdown_len: usize,
    /// Wall-clock time spent rasterising, extracting and synthesizing.
    pub duration_ms: u64,
}

impl PageReport {
    pub(crate) fn from_fragment(fragment: &MarkdownFragment, duration_ms: u64) -> Self {
        Self {
            page_num: fragment.page_number,
            images: fragment.images.clone(),
            placeholders_removed: fragment.placeholders_removed,
            images_appended: fragment.images_appended,
            links_applied: fragment.links_applied,
            links_dropped: fragment.links_dropped.clone(),
            markdown_len: fragment.markdown.len(),
            duration_ms,
        }
    }
}

/// Aggregate statistics for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionStats {
    /// Page count of the whole source document.
    pub total_pages: usize,
    /// Pages converted in this run (the selected range).
    pub converted_pages: usize,
    pub images_saved: usize,
    pub placeholders_removed: usize,
    pub images_appended: usize,
    pub links_applied: usize,
    pub links_dropped: usize,
    /// Total wall-clock time for the entire conversion.
    pub total_duration_ms: u64,
}

impl ConversionStats {
    pub(crate) fn record(&mut self, report: &PageReport) {
        self.converted_pages += 1;
        self.images_saved += report.images.len();
        self.placeholders_removed += report.placeholders_removed;
        self.images_appended += report.images_appended;
        self.links_applied += report.links_applied;
        self.links_dropped += report.links_dropped.len();
    }
}
