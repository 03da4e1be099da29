//! Data handed between pipeline stages.
//!
//! These types sit at the boundary between the pdfium collaborators (which
//! produce [`EmbeddedImage`]s and [`LinkAnnotation`]s) and the reconciliation
//! core (which consumes them and produces [`MarkdownFragment`]s). They carry
//! no behaviour beyond small conveniences so that test doubles can build them
//! directly.

use crate::error::LinkWarning;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Encoded format of a stored image asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    /// File extension used for stored assets (no leading dot).
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }

    /// MIME type sent to the VLM when the image itself is described.
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }
}

/// A raster image embedded on a PDF page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedImage {
    /// 1-based page the image was extracted from.
    pub page_number: usize,
    /// 0-based position in the page's extraction order.
    pub index_in_page: usize,
    pub format: ImageFormat,
    /// Encoded bytes, written to disk verbatim.
    pub data: Vec<u8>,
    /// Alt text produced by the VLM, when image descriptions are enabled.
    pub description: Option<String>,
}

impl EmbeddedImage {
    pub fn new(page_number: usize, index_in_page: usize, format: ImageFormat, data: Vec<u8>) -> Self {
        Self {
            page_number,
            index_in_page,
            format,
            data,
            description: None,
        }
    }
}

/// Rectangle in PDF user space (points, origin bottom-left).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f32,
    pub bottom: f32,
    pub right: f32,
    pub top: f32,
}

/// Where a link annotation points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkTarget {
    /// Another page of the same document, 1-based.
    Page(usize),
    /// An external URI, as stored in the PDF.
    Uri(String),
    /// A named destination inside the document.
    Named(String),
}

impl fmt::Display for LinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkTarget::Page(n) => write!(f, "page {n}"),
            LinkTarget::Uri(uri) => f.write_str(uri),
            LinkTarget::Named(name) => write!(f, "#{name}"),
        }
    }
}

/// A hyperlink annotation on a PDF page.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkAnnotation {
    pub page_number: usize,
    pub rect: Rect,
    /// Text the PDF renders inside `rect`; empty when the link covers an image
    /// or whitespace.
    pub text: String,
    pub target: LinkTarget,
}

impl LinkAnnotation {
    pub fn new(page_number: usize, text: impl Into<String>, target: LinkTarget) -> Self {
        Self {
            page_number,
            rect: Rect::default(),
            text: text.into(),
            target,
        }
    }
}

/// Reconciled Markdown for one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkdownFragment {
    pub page_number: usize,
    pub markdown: String,
    /// File names of the images stored for this page, in reference order.
    pub images: Vec<String>,
    /// Placeholders that had no image to pair with and were removed.
    pub placeholders_removed: usize,
    /// Images that had no placeholder and were appended at the end.
    pub images_appended: usize,
    pub links_applied: usize,
    pub links_dropped: Vec<LinkWarning>,
}
