//! Link resolution: turn a [`LinkTarget`] into a Markdown link destination.
//!
//! Internal targets become page anchors (`#page-N`), named destinations
//! become GitHub-style slugs, and external URLs are percent-encoded so that
//! strict renderers (GitHub in particular) do not cut the destination at a
//! space or a stray `<`.
//!
//! URL encoding only touches the path, query and fragment. Scheme, userinfo,
//! host and port are copied through, and escapes that are already present
//! are kept, which makes [`encode_url`] idempotent.

use crate::config::AnchorStyle;
use crate::error::{LinkDropReason, LinkWarning};
use crate::model::LinkTarget;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

/// Characters that are never valid raw in a URL path, query or fragment.
const URL_UNSAFE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}')
    .add(b'%');

/// Everything except unreserved characters and `/` is escaped in asset paths.
const ASSET_PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b'/');

/// Kind of a resolved link destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkKind {
    Internal,
    External,
}

/// A Markdown-ready link destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLink {
    pub href: String,
    pub kind: LinkKind,
}

/// Resolves link targets against the whole source document.
#[derive(Debug, Clone)]
pub struct LinkResolver {
    total_pages: usize,
    anchor_style: AnchorStyle,
}

impl LinkResolver {
    /// `total_pages` is the page count of the source PDF, not of the
    /// converted range: a link to a page that is not rendered in this run
    /// still resolves.
    pub fn new(total_pages: usize, anchor_style: AnchorStyle) -> Self {
        Self {
            total_pages,
            anchor_style,
        }
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// Resolve a target, or explain why it cannot be linked.
    ///
    /// `page` and `text` only feed the warning.
    pub fn resolve(
        &self,
        target: &LinkTarget,
        page: usize,
        text: &str,
    ) -> Result<ResolvedLink, LinkWarning> {
        let warn = |reason| LinkWarning {
            page,
            target: target.to_string(),
            text: text.to_string(),
            reason,
        };

        match target {
            LinkTarget::Page(n) => {
                if *n == 0 || *n > self.total_pages {
                    return Err(warn(LinkDropReason::PageOutOfRange {
                        total: self.total_pages,
                    }));
                }
                Ok(ResolvedLink {
                    href: self.anchor(&page_anchor_id(*n)),
                    kind: LinkKind::Internal,
                })
            }
            LinkTarget::Named(name) => {
                let slug = slugify(name);
                if slug.is_empty() {
                    return Err(warn(LinkDropReason::UnresolvableTarget));
                }
                Ok(ResolvedLink {
                    href: self.anchor(&slug),
                    kind: LinkKind::Internal,
                })
            }
            LinkTarget::Uri(uri) => {
                let uri = uri.trim();
                if uri.is_empty() {
                    return Err(warn(LinkDropReason::UnresolvableTarget));
                }
                Ok(ResolvedLink {
                    href: encode_url(uri),
                    kind: LinkKind::External,
                })
            }
        }
    }

    fn anchor(&self, id: &str) -> String {
        match &self.anchor_style {
            AnchorStyle::Fragment => format!("#{id}"),
            AnchorStyle::File(file) => format!("{}#{id}", encode_asset_path(file)),
        }
    }
}

/// Anchor id used for page `n` (1-based).
pub fn page_anchor_id(n: usize) -> String {
    format!("page-{n}")
}

/// Percent-encode the path, query and fragment of `url`, leaving everything else.
///
/// ```
/// use vlm_pdf2md::resolve::encode_url;
///
/// let once = encode_url("https://user@host:8080/my docs/a b.html?q=x y#Sec 2");
/// assert_eq!(once, "https://user@host:8080/my%20docs/a%20b.html?q=x%20y#Sec%202");
/// assert_eq!(encode_url(&once), once);
/// ```
pub fn encode_url(url: &str) -> String {
    let (prefix, rest) = split_scheme_authority(url);
    let (before_fragment, fragment) = match rest.find('#') {
        Some(i) => rest.split_at(i),
        None => (rest, ""),
    };
    let (path, query) = match before_fragment.find('?') {
        Some(i) => before_fragment.split_at(i),
        None => (before_fragment, ""),
    };

    let mut out = String::with_capacity(url.len() + 16);
    out.push_str(prefix);
    out.push_str(&encode_preserving_escapes(path));
    out.push_str(&encode_preserving_escapes(query));
    out.push_str(&encode_preserving_escapes(fragment));
    out
}

/// Split off `scheme:` and, when present, `//authority`.
fn split_scheme_authority(url: &str) -> (&str, &str) {
    let scheme_end = match url.find(':') {
        Some(i)
            if i > 0
                && url[..i].starts_with(|c: char| c.is_ascii_alphabetic())
                && url[..i]
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) =>
        {
            i + 1
        }
        _ => return ("", url),
    };

    let after_scheme = &url[scheme_end..];
    if let Some(authority_and_rest) = after_scheme.strip_prefix("//") {
        let authority_len = authority_and_rest
            .find(['/', '?', '#'])
            .unwrap_or(authority_and_rest.len());
        let split = scheme_end + 2 + authority_len;
        (&url[..split], &url[split..])
    } else {
        (&url[..scheme_end], after_scheme)
    }
}

/// Encode unsafe characters while keeping existing `%XX` escapes intact.
fn encode_preserving_escapes(component: &str) -> String {
    let bytes = component.as_bytes();
    let mut out = String::with_capacity(component.len());
    let mut plain_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            out.extend(utf8_percent_encode(&component[plain_start..i], URL_UNSAFE));
            out.push_str(&component[i..i + 3]);
            i += 3;
            plain_start = i;
        } else {
            i += 1;
        }
    }
    out.extend(utf8_percent_encode(&component[plain_start..], URL_UNSAFE));
    out
}

/// Percent-encode a relative asset path for use as a Markdown destination.
///
/// Mirrors a `quote(path, safe='/')`: separators survive, everything outside
/// the unreserved set is escaped.
pub fn encode_asset_path(path: &str) -> String {
    utf8_percent_encode(path, ASSET_PATH).to_string()
}

/// Generate a GitHub-style slug for a named destination.
pub fn slugify(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else if c.is_whitespace() || c == '-' || c == '_' || c == '.' {
                '-'
            } else {
                '\0'
            }
        })
        .filter(|&c| c != '\0')
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
