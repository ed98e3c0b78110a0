//! Prompt context helpers shared by the generation stages.

use repotutor_shared::FileEntry;

/// Cut `content` to at most `max_chars` characters, marking the cut.
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        None => content.to_string(),
        Some((cut, _)) => {
            format!("{}\n\n[... content truncated ...]", &content[..cut])
        }
    }
}

/// A file rendered for a prompt: `--- File {index} # {path} ---` then its (truncated) content.
pub fn file_block(index: usize, file: &FileEntry, max_chars: usize) -> String {
    format!(
        "--- File {index} # {} ---\n{}\n",
        file.path,
        truncate_content(&file.content, max_chars)
    )
}

/// Instruction fragment asking for output in `language`, empty for English.
pub fn language_note(language: &str, what: &str) -> String {
    if language.trim().eq_ignore_ascii_case("english") || language.trim().is_empty() {
        String::new()
    } else {
        let language = capitalize(language.trim());
        format!(
            "IMPORTANT: Write {what} in **{language}**. Keep code identifiers and file paths unchanged.\n\n"
        )
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
