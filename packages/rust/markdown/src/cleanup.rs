//! Cleanup pipeline for generated chapter bodies.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

/// Normalize a generated chapter body.
///
/// The result starts with `# Chapter {order}: {title}`, has no outer
/// ```` ```markdown ```` wrapper, no runs of blank lines and ends with
/// exactly one newline.
pub fn clean_chapter(body: &str, order: usize, title: &str) -> String {
    let mut result = body.replace("\r\n", "\n");

    result = strip_outer_fence(&result);
    result = ensure_chapter_heading(&result, order, title);
    result = demote_extra_h1(&result);
    result = normalize_whitespace(&result);
    result = clean_blank_lines(&result);
    result = ensure_trailing_newline(&result);

    result
}

// ---------------------------------------------------------------------------
// Pass 1: Strip an outer ```markdown wrapper
// ---------------------------------------------------------------------------

/// Remove a fence wrapping the entire answer.
fn strip_outer_fence(md: &str) -> String {
    static WRAPPER_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)\A\s*```(?:markdown|md)?[ \t]*\n(.*)\n```\s*\z").expect("valid regex")
    });

    match WRAPPER_RE.captures(md) {
        // A bare ``` wrapper could be a leading code sample; only unwrap when
        // the inside reads like a chapter.
        Some(caps) if caps[1].trim_start().starts_with('#') || md.trim_start().starts_with("```m") => {
            debug!("stripping outer markdown fence");
            caps[1].to_string()
        }
        _ => md.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Pass 2: Chapter heading
// ---------------------------------------------------------------------------

/// Replace a leading H1 with the canonical chapter heading, or prepend one.
fn ensure_chapter_heading(md: &str, order: usize, title: &str) -> String {
    let heading = format!("# Chapter {order}: {title}");
    let body = md.trim_start_matches(['\n', ' ', '\t']);

    let rest = match body.split_once('\n') {
        Some((first, rest)) if is_h1(first) => rest,
        None if is_h1(body) => "",
        _ => body,
    };

    if rest.is_empty() {
        heading
    } else {
        format!("{heading}\n\n{}", rest.trim_start_matches('\n'))
    }
}

fn is_h1(line: &str) -> bool {
    line.starts_with("# ") || line.trim_end() == "#"
}

// ---------------------------------------------------------------------------
// Pass 3: Demote extra H1 headings
// ---------------------------------------------------------------------------

/// Keep the chapter heading as the only H1; later ones become H2.
fn demote_extra_h1(md: &str) -> String {
    static H_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("valid regex"));

    let mut h1_count = 0;
    let mut in_code_block = false;
    let mut lines: Vec<String> = Vec::new();

    for line in md.lines() {
        if line.trim_start().starts_with("```") {
            in_code_block = !in_code_block;
        }
        if !in_code_block {
            if let Some(caps) = H_RE.captures(line) {
                if &caps[1] == "#" {
                    h1_count += 1;
                    if h1_count > 1 {
                        lines.push(format!("## {}", &caps[2]));
                        continue;
                    }
                }
            }
        }
        lines.push(line.to_string());
    }

    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Pass 4: Normalize whitespace
// ---------------------------------------------------------------------------

/// Strip trailing whitespace on every line.
fn normalize_whitespace(md: &str) -> String {
    md.lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 5: Collapse blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of 2+ blank lines into one.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n").to_string()
}

// ---------------------------------------------------------------------------
// Pass 6: Ensure trailing newline
// ---------------------------------------------------------------------------

/// Ensure the text ends with exactly one newline.
fn ensure_trailing_newline(md: &str) -> String {
    let trimmed = md.trim_end_matches('\n');
    format!("{trimmed}\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_outer_fence_unwraps_markdown_block() {
        let input = "```markdown\n# Chapter 1: X\n\nBody\n```\n";
        assert_eq!(strip_outer_fence(input), "# Chapter 1: X\n\nBody");
    }

    #[test]
    fn strip_outer_fence_keeps_inner_code() {
        let input = "```markdown\n# Title\n\n```rust\nfn main() {}\n```\n\nEnd\n```";
        let out = strip_outer_fence(input);
        assert!(out.starts_with("# Title"));
        assert!(out.contains("```rust\nfn main() {}\n```"));
        assert!(out.ends_with("End"));
    }

    #[test]
    fn strip_outer_fence_leaves_plain_chapters() {
        let input = "# Title\n\n```python\nprint(1)\n```\n";
        assert_eq!(strip_outer_fence(input), input);
    }

    #[test]
    fn chapter_heading_replaces_existing_h1() {
        let out = ensure_chapter_heading("# Cache Layer\n\nText", 2, "Response Cache");
        assert_eq!(out, "# Chapter 2: Response Cache\n\nText");
    }

    #[test]
    fn chapter_heading_prepended_when_missing() {
        let out = ensure_chapter_heading("Intro text\n\n## Part", 1, "Crawler");
        assert_eq!(out, "# Chapter 1: Crawler\n\nIntro text\n\n## Part");
    }

    #[test]
    fn chapter_heading_keeps_h2_start() {
        let out = ensure_chapter_heading("## Overview\nText", 4, "Gateway");
        assert_eq!(out, "# Chapter 4: Gateway\n\n## Overview\nText");
    }

    #[test]
    fn demote_extra_h1_skips_code_blocks() {
        let input = "# One\n\n```bash\n# a shell comment\n```\n\n# Two";
        let out = demote_extra_h1(input);
        assert!(out.contains("# a shell comment"));
        assert!(out.ends_with("## Two"));
    }

    #[test]
    fn clean_blank_lines_collapses_runs() {
        assert_eq!(clean_blank_lines("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(clean_blank_lines("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn full_pipeline_normalizes_chapter() {
        let input = "```markdown\n# Chapter Three\r\n\r\n\r\n\r\nSome text   \n\n```mermaid\ngraph TD\n```\n\n\n\nEnd\n```\n\n";
        let out = clean_chapter(input, 3, "Pipeline");
        assert!(out.starts_with("# Chapter 3: Pipeline\n\nSome text\n\n```mermaid"));
        assert!(!out.contains("\n\n\n"));
        assert!(out.ends_with("End\n"));
        assert!(!out.contains("```markdown"));
    }
}
