//! Best effort markdown handling for chat replies. Replies that look
//! like markdown are rendered to HTML, anything else is shown as
//! plain text.
use std::sync::LazyLock;

use pulldown_cmark::{Event, Options, Parser, html};
use regex::Regex;

use crate::session::Rendered;

static MARKDOWN_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Headings
        r"(?m)^#{1,6}\s+\S",
        // Bold and strong emphasis
        r"\*\*[^*\n]+\*\*",
        r"__[^_\n]+__",
        // Single star emphasis, not a list bullet or multiplication
        r"\*[^*\s]([^*\n]*[^*\s])?\*",
        // Fenced and inline code
        r"```",
        r"`[^`\n]+`",
        // Bullet and numbered lists
        r"(?m)^\s*([-*+]|\d+\.)\s+\S",
        // Links
        r"\[[^\]\n]+\]\([^)\n]+\)",
        // Blockquotes
        r"(?m)^\s*>\s?\S",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

pub fn looks_like_markdown(text: &str) -> bool {
    MARKDOWN_PATTERNS.iter().any(|re| re.is_match(text))
}

/// Render markdown to HTML. Raw HTML in the source is escaped rather
/// than passed through since replies come from an LLM.
pub fn to_html(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);

    let parser = Parser::new_ext(text, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });

    let mut output = String::new();
    html::push_html(&mut output, parser);
    output
}

pub fn render(text: &str) -> Rendered {
    if looks_like_markdown(text) {
        Rendered::Html(to_html(text))
    } else {
        Rendered::Text(text.to_string())
    }
}
