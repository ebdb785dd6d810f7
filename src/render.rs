//! Presentation of transcript content. Link lists are rendered with
//! Handlebars which HTML-escapes every value by default, link data
//! comes from web search results and should be considered untrusted.
//! The terminal projection turns HTML entries back into markdown.

use std::fmt;
use std::sync::LazyLock;

use anyhow::{Error, Result};
use handlebars::{Handlebars, handlebars_helper};
use htmd::HtmlToMarkdown;
use regex::Regex;
use serde::Serialize;
use serde_json::json;

use crate::backend::{LinkRecord, Role};
use crate::session::{Rendered, TranscriptEntry};

handlebars_helper!(inc: |v: i64| format!("{}", v + 1));

pub const NO_TITLE: &str = "No title available";
pub const NO_URL: &str = "No URL available";
pub const NO_SNIPPET: &str = "No description available";

#[derive(Debug)]
pub enum Template {
    LinkList,
    LinkListText,
    ChatLinks,
    ChatLinksText,
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

const LINK_LIST_HTML: &str = r#"<div class="links-list">
{{#each links}}
<div class="link-item">
<div class="link-title">{{inc @index}}. {{#if linkable}}<a href="{{url}}" target="_blank" rel="noopener noreferrer">{{title}}</a>{{else}}{{title}}{{/if}}</div>
{{#unless linkable}}<div class="link-url">{{url}}</div>
{{/unless}}<p class="link-snippet">{{snippet}}</p>
<span class="link-relevance">Relevance: {{relevance}}%</span>
</div>
{{/each}}
</div>"#;

const CHAT_LINKS_HTML: &str = r#"<div class="links-list">
{{#each links}}
<div class="link-item"><a href="{{url}}" target="_blank" rel="noopener noreferrer">{{title}}</a></div>
{{/each}}
</div>"#;

// Triple-stash, text listings are never shown in a browser
const CHAT_LINKS_TEXT: &str = r"{{#each links}}
{{inc @index}}. {{{title}}}
   {{{url}}}
{{/each}}";

const LINK_LIST_TEXT: &str = r"{{#each links}}
{{inc @index}}. {{{title}}}
{{#if linkable}}   {{{url}}}
{{/if}}   {{{snippet}}}
   Relevance: {{relevance}}%
{{/each}}";

pub fn templates<'a>() -> Handlebars<'a> {
    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);
    registry.register_helper("inc", Box::new(inc));
    registry
        .register_template_string(&Template::LinkList.to_string(), LINK_LIST_HTML)
        .expect("Failed to register template");
    registry
        .register_template_string(&Template::LinkListText.to_string(), LINK_LIST_TEXT)
        .expect("Failed to register template");
    registry
        .register_template_string(&Template::ChatLinks.to_string(), CHAT_LINKS_HTML)
        .expect("Failed to register template");
    registry
        .register_template_string(&Template::ChatLinksText.to_string(), CHAT_LINKS_TEXT)
        .expect("Failed to register template");
    registry
}

/// A link record with every field defaulted for display.
#[derive(Debug, Serialize, PartialEq)]
pub struct LinkView {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub relevance: i64,
    pub linkable: bool,
}

fn or_default(value: &Option<String>, default: &str) -> String {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
        .to_string()
}

impl From<&LinkRecord> for LinkView {
    fn from(link: &LinkRecord) -> Self {
        let url = or_default(&link.url, NO_URL);
        let linkable = url.starts_with("http://") || url.starts_with("https://");
        let score = link.relevance_score.filter(|s| s.is_finite()).unwrap_or(0.0);
        Self {
            title: or_default(&link.title, NO_TITLE),
            url,
            snippet: or_default(&link.snippet, NO_SNIPPET),
            relevance: (score * 100.0).round() as i64,
            linkable,
        }
    }
}

pub fn links_summary(count: usize) -> String {
    format!("I found {} helpful resources for you:", count)
}

/// Renders the rich link list entry as (raw text, html).
pub fn link_list(links: &[LinkRecord]) -> Result<(String, String), Error> {
    let views: Vec<LinkView> = links.iter().map(LinkView::from).collect();
    let data = json!({ "links": views });

    let templates = templates();
    let html = templates.render(&Template::LinkList.to_string(), &data)?;
    let text = templates.render(&Template::LinkListText.to_string(), &data)?;

    Ok((text.trim().to_string(), html))
}

static ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#).unwrap()
});

#[derive(Debug, Serialize, PartialEq)]
pub struct ChatLink {
    pub title: String,
    pub url: String,
}

/// Pull the http(s) anchors out of the `html_links` markup of a chat
/// reply. Everything else in the markup is dropped.
pub fn extract_links(html: &str) -> Vec<ChatLink> {
    ANCHOR
        .captures_iter(html)
        .filter_map(|caps| {
            let url = caps[1].trim().replace("&amp;", "&");
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return None;
            }
            let title = htmd::convert(&caps[2])
                .map(|t| t.trim().to_string())
                .unwrap_or_default();
            let title = if title.is_empty() { url.clone() } else { title };
            Some(ChatLink { title, url })
        })
        .collect()
}

/// Re-renders the `html_links` of a chat reply as (raw text, html)
/// from the extracted links only. None when there are no usable links.
pub fn chat_links(html: &str) -> Result<Option<(String, String)>, Error> {
    let links = extract_links(html);
    if links.is_empty() {
        return Ok(None);
    }
    let data = json!({ "links": links });

    let templates = templates();
    let html = templates.render(&Template::ChatLinks.to_string(), &data)?;
    let text = templates.render(&Template::ChatLinksText.to_string(), &data)?;

    Ok(Some((text.trim().to_string(), html)))
}

/// Project a transcript entry to terminal text.
pub fn to_terminal(entry: &TranscriptEntry) -> String {
    let speaker = match entry.role {
        Role::User => "you",
        Role::Assistant => "tutor",
    };
    let body = match &entry.rendered {
        Rendered::Text(text) => text.clone(),
        Rendered::Html(html) => {
            let converter = HtmlToMarkdown::builder()
                .skip_tags(vec!["script", "style"])
                .build();
            converter
                .convert(html)
                .unwrap_or_else(|_| entry.raw.clone())
        }
    };
    format!("{}> {}", speaker, body.trim())
}
