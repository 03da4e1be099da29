//! Image placeholders: scan the synthesized page and pair them with images.
//!
//! The model marks every figure it sees with an image reference whose
//! destination contains `placeholder`, for example
//! `![Block diagram](image_placeholder)`. Pairing is positional: the k-th
//! placeholder in text order receives the k-th extracted image.

use crate::assemble::ImageSink;
use crate::error::Pdf2MdError;
use crate::model::EmbeddedImage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

static RE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)!\[([^\]]*)\]\(([^)]*placeholder[^)]*)\)").unwrap());

static RE_EXTRA_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Longest alt text written into the document, in characters.
pub const MAX_ALT_LEN: usize = 100;

/// One placeholder occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// Byte range of the whole `![..](..)` token.
    pub range: Range<usize>,
    /// Alt text the model wrote, as-is.
    pub alt: String,
}

/// Find placeholders in order of first occurrence.
pub fn find_placeholders(markdown: &str) -> Vec<Placeholder> {
    RE_PLACEHOLDER
        .captures_iter(markdown)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(Placeholder {
                range: whole.range(),
                alt: caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default(),
            })
        })
        .collect()
}

/// Pick and sanitise alt text: description, then placeholder alt, then a
/// generic `Image from page N`.
pub fn alt_text(description: Option<&str>, placeholder_alt: Option<&str>, page_number: usize) -> String {
    [description, placeholder_alt]
        .into_iter()
        .flatten()
        .map(sanitize_alt)
        .find(|alt| !alt.is_empty())
        .unwrap_or_else(|| format!("Image from page {page_number}"))
}

fn sanitize_alt(raw: &str) -> String {
    let cleaned: String = raw.chars().filter(|c| !matches!(c, '[' | ']')).collect();
    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_ALT_LEN)
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Result of pairing placeholders with a page's images.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImagePlacement {
    pub markdown: String,
    /// Stored file names in document order.
    pub images: Vec<String>,
    pub placeholders_removed: usize,
    pub images_appended: usize,
}

/// Store every image through `sink` and substitute placeholders.
///
/// Excess placeholders are removed. Excess images are appended after the
/// page text, one paragraph each, so no extracted asset is lost.
pub fn place_images(
    markdown: &str,
    images: &[EmbeddedImage],
    page_number: usize,
    sink: &mut dyn ImageSink,
) -> Result<ImagePlacement, Pdf2MdError> {
    let placeholders = find_placeholders(markdown);
    let mut out = String::with_capacity(markdown.len() + images.len() * 48);
    let mut stored_names = Vec::with_capacity(images.len());
    let mut cursor = 0;
    let mut removed = 0;

    for (k, placeholder) in placeholders.iter().enumerate() {
        out.push_str(&markdown[cursor..placeholder.range.start]);
        cursor = placeholder.range.end;

        match images.get(k) {
            Some(image) => {
                let stored = sink.store(image)?;
                let alt = alt_text(image.description.as_deref(), Some(placeholder.alt.as_str()), page_number);
                out.push_str(&format!("![{alt}]({})", stored.markdown_path));
                stored_names.push(stored.file_name);
            }
            None => removed += 1,
        }
    }
    out.push_str(&markdown[cursor..]);

    if removed > 0 {
        out = RE_EXTRA_BLANK_LINES.replace_all(&out, "\n\n").into_owned();
    }

    let extra = images.get(placeholders.len()..).unwrap_or_default();
    if !extra.is_empty() {
        let body = out.trim_end();
        let mut appended = String::with_capacity(body.len() + extra.len() * 48);
        appended.push_str(body);
        for image in extra {
            let stored = sink.store(image)?;
            let alt = alt_text(image.description.as_deref(), None, page_number);
            if !appended.is_empty() {
                appended.push_str("\n\n");
            }
            appended.push_str(&format!("![{alt}]({})", stored.markdown_path));
            stored_names.push(stored.file_name);
        }
        appended.push('\n');
        out = appended;
    }

    Ok(ImagePlacement {
        markdown: out,
        images: stored_names,
        placeholders_removed: removed,
        images_appended: extra.len(),
    })
}
