//! Display normalization for generated and scraped text.
//!
//! Story titles and summaries come back from text generators with Markdown
//! links and bold markers. Digests show plain text: `[text](url)` becomes
//! `text` and `**` disappears.

use regex::Regex;
use std::sync::LazyLock;

static MARKDOWN_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").expect("Invalid markdown link regex"));

/// Strip Markdown links and bold markers, then trim.
///
/// Idempotent: nested constructs are peeled until nothing changes.
pub fn strip_markdown(text: &str) -> String {
    let mut current = text.trim().to_string();
    loop {
        let next = MARKDOWN_LINK
            .replace_all(&current, "$1")
            .replace("**", "")
            .trim()
            .to_string();
        if next == current {
            return current;
        }
        current = next;
    }
}

/// First `max_words` words of `text`, with `...` appended when cut.
pub fn brief_title(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() > max_words {
        format!("{}...", words[..max_words].join(" "))
    } else {
        words.join(" ")
    }
}
