//! Link application: re-attach PDF link annotations to the synthesized text.
//!
//! The model only sees pixels, so it cannot know where a page's hyperlinks
//! point. Each annotation carries the text rendered under its rectangle; we
//! look for that text in the Markdown and wrap it. Matching is best effort:
//!
//! 1. an unresolved bracketed reference `[text]` (or `[text]()`) the model
//!    left for the link, compared case-insensitively;
//! 2. otherwise the first whole-word occurrence of the text outside code,
//!    existing links, images and URLs;
//! 3. otherwise the link is dropped with a [`LinkWarning`].

use crate::error::{LinkDropReason, LinkWarning};
use crate::model::LinkAnnotation;
use crate::resolve::LinkResolver;
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;
use tracing::{debug, warn};

/// Shortest anchor text (in characters) we attempt to match.
pub const MIN_ANCHOR_CHARS: usize = 3;

static RE_BRACKET_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\[\]\n]+)\](\(\s*\))?").unwrap());

static RE_INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`[^`\n]+`").unwrap());

static RE_LINK_OR_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!?\[[^\]]*\]\([^)]*\)").unwrap());

static RE_AUTOLINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[A-Za-z][A-Za-z0-9+.\-]*:[^>\s]*>").unwrap());

static RE_BARE_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s)>\]]+").unwrap());

/// Outcome of applying a page's link annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkOutcome {
    pub markdown: String,
    pub applied: usize,
    pub dropped: Vec<LinkWarning>,
}

/// Apply `links` to `markdown`, in annotation order.
pub fn apply_links(
    markdown: &str,
    links: &[LinkAnnotation],
    page_number: usize,
    resolver: &LinkResolver,
) -> LinkOutcome {
    let mut outcome = LinkOutcome {
        markdown: markdown.to_string(),
        ..Default::default()
    };

    for link in links {
        let text = normalize_whitespace(&link.text);
        let dropped = |reason| LinkWarning {
            page: page_number,
            target: link.target.to_string(),
            text: text.clone(),
            reason,
        };

        if text.chars().count() < MIN_ANCHOR_CHARS {
            outcome.dropped.push(dropped(LinkDropReason::NoAnchorText));
            continue;
        }

        let resolved = match resolver.resolve(&link.target, page_number, &text) {
            Ok(resolved) => resolved,
            Err(warning) => {
                outcome.dropped.push(warning);
                continue;
            }
        };

        let replaced = link_bracket_reference(&outcome.markdown, &text, &resolved.href)
            .or_else(|| link_plain_text(&outcome.markdown, &text, &resolved.href));

        match replaced {
            Some(markdown) => {
                debug!("Page {}: linked '{}' → {}", page_number, text, resolved.href);
                outcome.markdown = markdown;
                outcome.applied += 1;
            }
            None => outcome.dropped.push(dropped(LinkDropReason::TextNotFound)),
        }
    }

    for warning in &outcome.dropped {
        warn!("{}", warning);
    }
    outcome
}

/// Turn the first `[text]` / `[text]()` whose label matches into a link.
fn link_bracket_reference(markdown: &str, text: &str, href: &str) -> Option<String> {
    let wanted = text.to_lowercase();
    // Citation anchors like "[12]" show up as a bracket labelled "12".
    let wanted_inner = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .map(|t| normalize_whitespace(t).to_lowercase());
    let code = code_ranges(markdown);
    let bytes = markdown.as_bytes();

    for caps in RE_BRACKET_REF.captures_iter(markdown) {
        let whole = caps.get(0)?;
        let label = caps.get(1)?;
        let start = whole.start();

        if start > 0 && matches!(bytes[start - 1], b'!' | b']') {
            continue;
        }
        let next = bytes.get(whole.end()).copied();
        if caps.get(2).is_none() && matches!(next, Some(b'(' | b'[' | b':')) {
            continue;
        }
        if overlaps(&whole.range(), &code) {
            continue;
        }

        let label_key = normalize_whitespace(label.as_str()).to_lowercase();
        if label_key == wanted || wanted_inner.as_deref() == Some(label_key.as_str()) {
            return Some(format!(
                "{}[{}]({}){}",
                &markdown[..start],
                label.as_str(),
                href,
                &markdown[whole.end()..]
            ));
        }
    }
    None
}

/// Wrap the first free whole-word occurrence of `text`.
fn link_plain_text(markdown: &str, text: &str, href: &str) -> Option<String> {
    let pattern = text
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+");
    let re = Regex::new(&format!("(?i){pattern}")).ok()?;

    let protected = protected_ranges(markdown);
    let needs_start_boundary = text.chars().next().is_some_and(is_word_char);
    let needs_end_boundary = text.chars().last().is_some_and(is_word_char);

    let mut search_from = 0;
    while let Some(m) = re.find_at(markdown, search_from) {
        let before = markdown[..m.start()].chars().next_back();
        let after = markdown[m.end()..].chars().next();
        let bounded = !(needs_start_boundary && before.is_some_and(is_word_char))
            && !(needs_end_boundary && after.is_some_and(is_word_char));

        if bounded && !overlaps(&m.range(), &protected) {
            let label = m.as_str().replace('[', "\\[").replace(']', "\\]");
            return Some(format!(
                "{}[{}]({}){}",
                &markdown[..m.start()],
                label,
                href,
                &markdown[m.end()..]
            ));
        }

        // Retry one character further so overlapping candidates are seen.
        search_from = m.start() + markdown[m.start()..].chars().next().map_or(1, char::len_utf8);
        if search_from > markdown.len() {
            break;
        }
    }
    None
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn overlaps(range: &Range<usize>, protected: &[Range<usize>]) -> bool {
    protected
        .iter()
        .any(|p| range.start < p.end && p.start < range.end)
}

/// Byte ranges of fenced code blocks and inline code spans.
fn code_ranges(markdown: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut fence: Option<(usize, &str)> = None;
    let mut offset = 0;

    for line in markdown.split_inclusive('\n') {
        let trimmed = line.trim_start();
        let marker = if trimmed.starts_with("```") {
            Some("```")
        } else if trimmed.starts_with("~~~") {
            Some("~~~")
        } else {
            None
        };

        match (fence, marker) {
            (None, Some(m)) => fence = Some((offset, m)),
            (Some((start, open)), Some(m)) if m == open => {
                ranges.push(start..offset + line.len());
                fence = None;
            }
            _ => {}
        }
        offset += line.len();
    }
    if let Some((start, _)) = fence {
        ranges.push(start..markdown.len());
    }

    let inline: Vec<Range<usize>> = RE_INLINE_CODE
        .find_iter(markdown)
        .map(|m| m.range())
        .filter(|r| !overlaps(r, &ranges))
        .collect();
    ranges.extend(inline);
    ranges
}

/// Ranges a new link must not overlap.
fn protected_ranges(markdown: &str) -> Vec<Range<usize>> {
    let mut ranges = code_ranges(markdown);
    for re in [&RE_LINK_OR_IMAGE, &RE_AUTOLINK, &RE_BARE_URL] {
        ranges.extend(re.find_iter(markdown).map(|m| m.range()));
    }
    ranges
}
