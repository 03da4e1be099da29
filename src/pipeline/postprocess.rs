//! Post-processing: deterministic cleanup of raw model output.
//!
//! Vision models disobey formatting instructions in predictable ways: they
//! wrap the answer in a ```` ```markdown ```` fence, think out loud ("Wait,
//! no…", "Let me check…"), invent image URLs, or drop the separator row of a
//! table. Each quirk gets one small rule here so the prompt can stay about
//! content.
//!
//! Image placeholders are left alone: the reconciler needs every one of them
//! to pair the page's real images.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every cleanup rule to one page of model output.
///
/// Order matters: line endings are normalised before fence detection, and
/// the blank-line collapse runs last because earlier rules delete lines.
pub fn clean_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = strip_outer_fence(&s);
    let s = strip_thinking_noise(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = space_headings(&s);
    let s = insert_missing_table_separators(&s);
    let s = drop_body_table_separators(&s);
    let s = caption_invented_images(&s);
    let s = collapse_blank_lines(&s);
    ensure_final_newline(&s)
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\n(.*?)\n?```$").unwrap());

fn strip_outer_fence(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCE.captures(trimmed) {
        // A fence that closes before the end is a real code block, not a wrapper.
        Some(caps) if !caps[1].contains("\n```\n") => caps[1].to_string(),
        _ => input.to_string(),
    }
}

/// Openers of reasoning lines some models leak into the answer.
const THINKING_OPENERS: &[&str] = &[
    "wait, no",
    "wait no",
    "let me ",
    "so final markdown:",
    "actually,",
    "i notice",
    "looking at",
];

fn strip_thinking_noise(input: &str) -> String {
    let mut in_code = false;
    input
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            if is_fence(trimmed) {
                in_code = !in_code;
                return true;
            }
            if in_code {
                return true;
            }
            let lower = trimmed.to_lowercase();
            !THINKING_OPENERS.iter().any(|o| lower.starts_with(o))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}'],
        "",
    )
}

fn trim_trailing_whitespace(input: &str) -> String {
    input.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s").unwrap());

/// Put a blank line before every ATX heading outside code blocks.
fn space_headings(input: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut in_code = false;

    for line in input.lines() {
        if is_fence(line.trim_start()) {
            in_code = !in_code;
        }
        if !in_code && RE_HEADING.is_match(line) {
            if let Some(prev) = out.last() {
                if !prev.trim().is_empty() {
                    out.push("");
                }
            }
        }
        out.push(line);
    }
    out.join("\n")
}

fn is_fence(trimmed_line: &str) -> bool {
    trimmed_line.starts_with("```") || trimmed_line.starts_with("~~~")
}

fn is_table_row(line: &str) -> bool {
    let t = line.trim();
    t.len() > 2 && t.starts_with('|') && t.ends_with('|')
}

fn is_separator_row(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|')
        && t.contains('-')
        && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

/// A table whose header is directly followed by a body row gets a `---` row.
fn insert_missing_table_separators(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 4);
    let mut prev_is_row = false;

    for (i, line) in lines.iter().enumerate() {
        out.push(line.to_string());
        let row = is_table_row(line);
        let starts_table = row && !prev_is_row && !is_separator_row(line);
        if starts_table {
            let next = lines.get(i + 1).copied().unwrap_or("");
            if is_table_row(next) && !is_separator_row(next) {
                let columns = line.trim().matches('|').count().saturating_sub(1).max(1);
                out.push(format!("|{}", " --- |".repeat(columns)));
            }
        }
        prev_is_row = row;
    }
    out.join("\n")
}

/// GFM allows a separator only as the second row of a table.
fn drop_body_table_separators(input: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut row_in_table = 0usize;

    for line in input.lines() {
        if is_table_row(line) {
            row_in_table += 1;
            if is_separator_row(line) && row_in_table != 2 {
                continue;
            }
        } else {
            row_in_table = 0;
        }
        out.push(line);
    }
    out.join("\n")
}

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

/// Hosts that only ever appear in made-up image URLs.
const FAKE_IMAGE_HOSTS: &[&str] = &[
    "example.com",
    "example.org",
    "via.placeholder.com",
    "placehold.it",
    "dummyimage.com",
    "lorempixel.com",
    "picsum.photos",
];

fn is_placeholder(url: &str) -> bool {
    url.to_lowercase().contains("placeholder")
}

fn is_invented_url(url: &str) -> bool {
    let u = url.trim();
    if u.is_empty() || !(u.starts_with("http://") || u.starts_with("https://")) {
        return true;
    }
    FAKE_IMAGE_HOSTS.iter().any(|host| u.contains(host))
}

/// Image references that are neither placeholders nor real remote images
/// become an italic caption, so the description text survives.
fn caption_invented_images(input: &str) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let url = &caps[2];
            if is_placeholder(url) || !is_invented_url(url) {
                return caps[0].to_string();
            }
            let alt = caps[1].trim();
            if alt.is_empty() {
                String::new()
            } else {
                format!("*{alt}*")
            }
        })
        .into_owned()
}

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_RUN.replace_all(input, "\n\n").into_owned()
}

fn ensure_final_newline(input: &str) -> String {
    let body = input.trim_matches('\n').trim_end();
    if body.is_empty() {
        String::new()
    } else {
        format!("{body}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_wrapper_fence() {
        assert_eq!(strip_outer_fence("```markdown\n# Hello\nWorld\n```"), "# Hello\nWorld");
        assert_eq!(strip_outer_fence("```\n# Hello\n```"), "# Hello");
    }

    #[test]
    fn keeps_page_that_is_two_code_blocks() {
        let input = "```\na\n```\n\ntext\n\n```\nb\n```";
        assert_eq!(strip_outer_fence(input), input);
    }

    #[test]
    fn removes_thinking_lines_outside_code() {
        let input = "# Intro\nWait, no, that's a table.\nReal text.\nLet me check the footer.\n```\nlet me = 1;\n```\nSo final Markdown:";
        assert_eq!(
            strip_thinking_noise(input),
            "# Intro\nReal text.\n```\nlet me = 1;\n```"
        );
    }

    #[test]
    fn headings_get_a_blank_line_but_code_comments_do_not() {
        let input = "text\n## Section\n```bash\n# comment\n```";
        assert_eq!(space_headings(input), "text\n\n## Section\n```bash\n# comment\n```");
    }

    #[test]
    fn inserts_missing_separator_once() {
        let input = "| A | B |\n| 1 | 2 |\n| 3 | 4 |";
        assert_eq!(
            insert_missing_table_separators(input),
            "| A | B |\n| --- | --- |\n| 1 | 2 |\n| 3 | 4 |"
        );
        let ok = "| A | B |\n| --- | --- |\n| 1 | 2 |";
        assert_eq!(insert_missing_table_separators(ok), ok);
    }

    #[test]
    fn drops_separators_in_table_body() {
        let input = "| A | B |\n| --- | --- |\n| 1 | 2 |\n| --- | --- |\n| 3 | 4 |";
        assert_eq!(
            drop_body_table_separators(input),
            "| A | B |\n| --- | --- |\n| 1 | 2 |\n| 3 | 4 |"
        );
    }

    #[test]
    fn placeholders_survive_invented_images_do_not() {
        let input = "![Chart](image_placeholder)\n![Logo](logo.png)\n![Fig](https://arxiv.org/f.png)\n![](x.png)";
        assert_eq!(
            caption_invented_images(input),
            "![Chart](image_placeholder)\n*Logo*\n![Fig](https://arxiv.org/f.png)\n"
        );
    }

    #[test]
    fn invisible_chars_removed() {
        assert_eq!(remove_invisible_chars("a\u{200B}b\u{FEFF}c\u{00AD}d"), "abcd");
    }

    #[test]
    fn full_clean() {
        let input = "```markdown\r\n# Title   \r\nLooking at the image, this is a form.\r\n\r\n\r\n\r\nBody\r\n![Figure 1](image_placeholder)\r\n```";
        assert_eq!(
            clean_markdown(input),
            "# Title\n\nBody\n![Figure 1](image_placeholder)\n"
        );
    }

    #[test]
    fn blank_page_cleans_to_empty() {
        assert_eq!(clean_markdown("\n\n  \n"), "");
    }
}
