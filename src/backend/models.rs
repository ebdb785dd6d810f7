//! Wire types for the math help backend. Every field the backend
//! returns is treated as optional since responses are produced by an
//! LLM pipeline and fields go missing.
use serde::{Deserialize, Serialize};

/// Sentinel the backend's agent runner leaves at the end of a chat
/// response.
pub const RESPONSE_END_SENTINEL: &str = "##ADK_RESPONSE_END##";

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
}

#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct LinkRecord {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub relevance_score: Option<f64>,
}

// {"links": [{"title": ..., "url": ..., "snippet": ..., "relevance_score": 0.9}], "status": "success"}
#[derive(Clone, Serialize, Deserialize, Debug, Default)]
pub struct LinksResponse {
    #[serde(default)]
    pub links: Vec<LinkRecord>,
    #[serde(default)]
    pub status: Option<String>,
}

// {"video_data": "<base64 mp4>", "status": "success"}
#[derive(Clone, Serialize, Deserialize, Debug, Default)]
pub struct VideoResponse {
    #[serde(default)]
    pub video_data: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl VideoResponse {
    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
}

impl HistoryMessage {
    pub fn new(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ChatRequest<'a> {
    pub chat_history: &'a [HistoryMessage],
}

#[derive(Clone, Serialize, Deserialize, Debug, Default)]
pub struct ChatResponse {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub html_links: Option<String>,
}

impl ChatResponse {
    /// The reply text with the end sentinel removed. Older backend
    /// revisions answer with `text`, newer ones with `response`.
    pub fn message(&self) -> Option<String> {
        [&self.response, &self.text]
            .into_iter()
            .filter_map(|field| field.as_deref())
            .map(|s| s.replace(RESPONSE_END_SENTINEL, "").trim().to_string())
            .find(|s| !s.is_empty())
    }

    pub fn html_links(&self) -> Option<&str> {
        self.html_links
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), r#""user""#);
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            r#""assistant""#
        );
    }

    #[test]
    fn test_chat_request_serialization() {
        let history = vec![
            HistoryMessage::new(Role::User, "What is a derivative?"),
            HistoryMessage::new(Role::Assistant, "A rate of change."),
        ];
        let req = ChatRequest {
            chat_history: &history,
        };
        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            r#"{"chat_history":[{"role":"user","content":"What is a derivative?"},{"role":"assistant","content":"A rate of change."}]}"#
        );
    }

    #[test]
    fn test_links_response_with_missing_fields() {
        let json = r#"{"links": [{"title": "Khan Academy"}, {}]}"#;
        let resp: LinksResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.links.len(), 2);
        assert_eq!(resp.links[0].title.as_deref(), Some("Khan Academy"));
        assert_eq!(resp.links[1], LinkRecord::default());
        assert!(resp.status.is_none());
    }

    #[test]
    fn test_links_response_without_links() {
        let resp: LinksResponse = serde_json::from_str(r#"{"status": "error"}"#).unwrap();
        assert!(resp.links.is_empty());
    }

    #[test]
    fn test_video_response_success() {
        let resp: VideoResponse =
            serde_json::from_str(r#"{"video_data": "AAAA", "status": "success"}"#).unwrap();
        assert!(resp.is_success());

        let resp: VideoResponse = serde_json::from_str(r#"{"status": "failed"}"#).unwrap();
        assert!(!resp.is_success());
    }

    #[test]
    fn test_chat_response_strips_sentinel() {
        let resp: ChatResponse =
            serde_json::from_str(r#"{"response": "Sure thing! ##ADK_RESPONSE_END##"}"#).unwrap();
        assert_eq!(resp.message().as_deref(), Some("Sure thing!"));
    }

    #[test]
    fn test_chat_response_falls_back_to_text() {
        let resp: ChatResponse =
            serde_json::from_str(r#"{"text": "Hi", "html_links": "  "}"#).unwrap();
        assert_eq!(resp.message().as_deref(), Some("Hi"));
        assert!(resp.html_links().is_none());
    }

    #[test]
    fn test_chat_response_skips_empty_response() {
        let resp: ChatResponse =
            serde_json::from_str(r#"{"response": "  ", "text": "Hi"}"#).unwrap();
        assert_eq!(resp.message().as_deref(), Some("Hi"));

        let resp: ChatResponse = serde_json::from_str(
            r###"{"response": "##ADK_RESPONSE_END##", "text": "From text"}"###,
        )
        .unwrap();
        assert_eq!(resp.message().as_deref(), Some("From text"));
    }

    #[test]
    fn test_chat_response_empty_after_sentinel() {
        let resp: ChatResponse =
            serde_json::from_str(r###"{"response": "##ADK_RESPONSE_END##"}"###).unwrap();
        assert!(resp.message().is_none());
    }
}
