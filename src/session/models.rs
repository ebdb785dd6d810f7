//! The core models for a question session and its chat transcript.
use std::fmt;
use std::sync::Arc;

use anyhow::Error;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::{HistoryMessage, Role};
use crate::upload::ImageAttachment;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    Idle,
    AwaitingResults,
    Complete,
    Reset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Links,
    Video,
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResultKind::Links => write!(f, "links"),
            ResultKind::Video => write!(f, "video"),
        }
    }
}

/// Why a backend call failed. Only ever logged, the transcript gets a
/// friendly message instead.
#[derive(Clone, Debug, PartialEq)]
pub enum Failure {
    /// Network unreachable, timeout, connection reset
    Transport(String),
    /// Non-2xx HTTP status
    Status(u16),
    /// Unexpected or missing fields in the response
    Format(String),
    /// The backend answered but reported it couldn't do the work
    Rejected(String),
    /// The video couldn't be prepared for playback
    Media(String),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Failure::Transport(msg) => write!(f, "transport error: {}", msg),
            Failure::Status(code) => write!(f, "backend responded with HTTP {}", code),
            Failure::Format(msg) => write!(f, "unexpected response: {}", msg),
            Failure::Rejected(status) => write!(f, "backend reported status {}", status),
            Failure::Media(msg) => write!(f, "media error: {}", msg),
        }
    }
}

impl From<&Error> for Failure {
    fn from(err: &Error) -> Self {
        if let Some(e) = err.downcast_ref::<reqwest::Error>() {
            if let Some(status) = e.status() {
                return Failure::Status(status.as_u16());
            }
            if e.is_decode() {
                return Failure::Format(e.to_string());
            }
            return Failure::Transport(e.to_string());
        }
        if err.downcast_ref::<serde_json::Error>().is_some()
            || err.downcast_ref::<base64::DecodeError>().is_some()
        {
            return Failure::Format(err.to_string());
        }
        Failure::Transport(format!("{:#}", err))
    }
}

impl From<Error> for Failure {
    fn from(err: Error) -> Self {
        Failure::from(&err)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome<T> {
    Pending,
    Succeeded(T),
    Failed(Failure),
}

impl<T> Outcome<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending)
    }

    /// Drops the payload, keeping only the state.
    pub fn state(&self) -> Outcome<()> {
        match self {
            Outcome::Pending => Outcome::Pending,
            Outcome::Succeeded(_) => Outcome::Succeeded(()),
            Outcome::Failed(f) => Outcome::Failed(f.clone()),
        }
    }
}

impl<T> From<Result<T, Error>> for Outcome<T> {
    fn from(result: Result<T, Error>) -> Self {
        match result {
            Ok(v) => Outcome::Succeeded(v),
            Err(e) => Outcome::Failed(Failure::from(&e)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PendingResult {
    pub kind: ResultKind,
    pub outcome: Outcome<()>,
}

impl PendingResult {
    pub fn new(kind: ResultKind) -> Self {
        Self {
            kind,
            outcome: Outcome::Pending,
        }
    }
}

/// One question-submission cycle.
#[derive(Clone, Debug)]
pub struct Session {
    pub id: SessionId,
    pub status: SessionStatus,
    pub context: String,
    pub image: Option<Arc<ImageAttachment>>,
    pub links: PendingResult,
    pub video: PendingResult,
    // Raw bytes of the generated video kept for download
    pub video_data: Option<Arc<Vec<u8>>>,
}

impl Session {
    pub fn new(id: SessionId, context: &str, image: Option<ImageAttachment>) -> Self {
        Self {
            id,
            status: SessionStatus::Idle,
            context: context.to_string(),
            image: image.map(Arc::new),
            links: PendingResult::new(ResultKind::Links),
            video: PendingResult::new(ResultKind::Video),
            video_data: None,
        }
    }

    /// Results are only accepted for the session that is still waiting
    /// on them and only once per kind.
    pub fn accepts(&self, id: SessionId, kind: ResultKind) -> bool {
        self.id == id
            && self.status == SessionStatus::AwaitingResults
            && self.pending(kind).outcome.is_pending()
    }

    pub fn pending(&self, kind: ResultKind) -> &PendingResult {
        match kind {
            ResultKind::Links => &self.links,
            ResultKind::Video => &self.video,
        }
    }

    /// Records the outcome for `kind` and completes the session once
    /// both results are in. Returns true when this resolved the session.
    pub fn resolve(&mut self, kind: ResultKind, outcome: Outcome<()>) -> bool {
        match kind {
            ResultKind::Links => self.links.outcome = outcome,
            ResultKind::Video => self.video.outcome = outcome,
        }
        if !self.links.outcome.is_pending() && !self.video.outcome.is_pending() {
            self.status = SessionStatus::Complete;
            return true;
        }
        false
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum Rendered {
    Text(String),
    Html(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Message,
    // Pre-rendered markup such as link lists, never sent back as history
    Rich,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub kind: EntryKind,
    pub rendered: Rendered,
    pub raw: String,
    pub created_at: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn text(role: Role, content: &str) -> Self {
        Self {
            role,
            kind: EntryKind::Message,
            rendered: Rendered::Text(content.to_string()),
            raw: content.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn message(role: Role, raw: &str, rendered: Rendered) -> Self {
        Self {
            role,
            kind: EntryKind::Message,
            rendered,
            raw: raw.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn rich(role: Role, raw: &str, html: &str) -> Self {
        Self {
            role,
            kind: EntryKind::Rich,
            rendered: Rendered::Html(html.to_string()),
            raw: raw.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn is_rich(&self) -> bool {
        self.kind == EntryKind::Rich
    }
}

/// Append-only list of chat entries in display order.
#[derive(Clone, Debug, Default)]
pub struct Transcript(Vec<TranscriptEntry>);

impl Transcript {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.0.clone()
    }

    pub fn push(&mut self, entry: TranscriptEntry) {
        self.0.push(entry)
    }

    pub fn clear(&mut self) {
        self.0.clear()
    }

    /// Conversation history for the chat endpoint. Rich entries are
    /// display only.
    pub fn history(&self) -> Vec<HistoryMessage> {
        self.0
            .iter()
            .filter(|e| !e.is_rich())
            .map(|e| HistoryMessage::new(e.role, &e.raw))
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    Placeholder,
    Loading,
    Chat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Controls {
    pub submit_enabled: bool,
    pub send_enabled: bool,
    pub download_enabled: bool,
}
