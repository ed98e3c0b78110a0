//! Markdown helpers for generated chapters.
//!
//! Locates fenced Mermaid diagrams so they can be rendered and swapped for
//! image references, derives chapter filenames, and runs the cleanup passes
//! applied to every generated chapter body.

mod cleanup;

pub use cleanup::clean_chapter;

// ---------------------------------------------------------------------------
// Diagram fences
// ---------------------------------------------------------------------------

/// A closed ```` ```mermaid ```` block inside a Markdown document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramFence {
    /// Byte offset of the opening fence line.
    pub start: usize,
    /// Byte offset just past the closing fence (its newline excluded).
    pub end: usize,
    /// Diagram source between the fences, without a trailing newline.
    pub source: String,
}

/// Find every closed Mermaid fence in `body`, in document order.
///
/// Fences nested in other code blocks are ignored, and an unterminated
/// Mermaid fence is not a block.
pub fn find_diagram_blocks(body: &str) -> Vec<DiagramFence> {
    enum State {
        Text,
        Mermaid { start: usize, source_start: usize },
        OtherCode { ticks: usize },
    }

    let mut blocks = Vec::new();
    let mut state = State::Text;
    let mut offset = 0;

    for line in body.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let content = line.trim_end_matches(['\n', '\r']);
        let trimmed = content.trim_start();

        state = match state {
            State::Text => match fence_ticks(trimmed) {
                Some(ticks) => {
                    let info = trimmed[ticks..].trim();
                    if ticks == 3 && info.eq_ignore_ascii_case("mermaid") {
                        State::Mermaid {
                            start: line_start,
                            source_start: offset,
                        }
                    } else {
                        State::OtherCode { ticks }
                    }
                }
                None => State::Text,
            },
            State::Mermaid {
                start,
                source_start,
            } => {
                if trimmed.trim_end() == "```" {
                    let source = body[source_start..line_start].trim_end_matches(['\n', '\r']);
                    blocks.push(DiagramFence {
                        start,
                        end: line_start + content.len(),
                        source: source.to_string(),
                    });
                    State::Text
                } else {
                    State::Mermaid {
                        start,
                        source_start,
                    }
                }
            }
            State::OtherCode { ticks } => {
                let closes = fence_ticks(trimmed)
                    .is_some_and(|n| n >= ticks && trimmed[n..].trim().is_empty());
                if closes {
                    State::Text
                } else {
                    State::OtherCode { ticks }
                }
            }
        };
    }

    blocks
}

/// Rewrite the Mermaid fences of `body`.
///
/// `replace` receives the 1-based block number and the fence; returning
/// `None` keeps the block verbatim.
pub fn rewrite_diagram_blocks<F>(body: &str, mut replace: F) -> String
where
    F: FnMut(usize, &DiagramFence) -> Option<String>,
{
    let mut out = String::with_capacity(body.len());
    let mut cursor = 0;

    for (i, fence) in find_diagram_blocks(body).iter().enumerate() {
        if let Some(replacement) = replace(i + 1, fence) {
            out.push_str(&body[cursor..fence.start]);
            out.push_str(&replacement);
            cursor = fence.end;
        }
    }
    out.push_str(&body[cursor..]);
    out
}

/// Number of leading backticks when `line` opens or closes a fence.
fn fence_ticks(line: &str) -> Option<usize> {
    let ticks = line.bytes().take_while(|b| *b == b'`').count();
    (ticks >= 3).then_some(ticks)
}

// ---------------------------------------------------------------------------
// Names
// ---------------------------------------------------------------------------

/// Lowercase `name`, turning every run of non-alphanumeric characters into `_`.
///
/// Returns `"untitled"` when nothing usable is left.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_end_matches('_');
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug.to_string()
    }
}

/// Chapter file name: `{nn}_{slug}.md`, with `order` 1-based.
pub fn chapter_filename(order: usize, title: &str) -> String {
    format!("{order:02}_{}.md", slugify(title))
}

/// Escape `text` for use inside `[...]` link text.
///
/// Brackets and backslashes are escaped; line breaks collapse to spaces.
pub fn link_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '[' | ']' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\r' | '\n' => out.push(' '),
            _ => out.push(c),
        }
    }
    out
}

/// Markdown image reference for a rendered diagram.
pub fn image_reference(number: usize, relative_path: &str) -> String {
    format!("![Diagram {number}]({relative_path})")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
