//! Coordinates the links and video results of a question session and
//! conversational chat into one transcript and video surface.
//!
//! Results are tagged with the `SessionId` they were requested for.
//! Starting a new session or resetting doesn't abort requests in
//! flight, their results are discarded on arrival instead.
//!
//! Use `ChatTranscriptController::builder()` to construct one.
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Context, Error, Result, bail};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::models::{
    Controls, Failure, Outcome, ResultKind, Session, SessionId, SessionStatus, Transcript,
    TranscriptEntry, ViewMode,
};
use crate::backend::{HttpBackend, LinkRecord, Role, SharedBackend, VideoResponse};
use crate::core::AppConfig;
use crate::markdown;
use crate::media::{self, FileMediaStore, MediaObject, MediaStore, VideoSurface, decode_video};
use crate::render;
use crate::upload::{ExtensionMessage, ImageAttachment, MessageReply};

pub const SUBMIT_STATUS_MESSAGE: &str =
    "Looking for helpful resources and generating an explanation video...";
pub const LINKS_FALLBACK_MESSAGE: &str =
    "I couldn't find any relevant resources. Try rephrasing your question, or ask me directly below!";
pub const VIDEO_READY_MESSAGE: &str = "Your explanation video is ready!";
pub const VIDEO_FALLBACK_MESSAGE: &str =
    "I couldn't generate a video for this question, so here's a sample explanation instead.";
pub const CHAT_ERROR_MESSAGE: &str = "Sorry, I encountered an error. Please try again.";

pub type SharedMediaStore = Arc<dyn MediaStore + Send + Sync + 'static>;

/// A video decoded and materialized, waiting to be shown.
#[derive(Clone, Debug)]
pub struct GeneratedVideo {
    pub media: MediaObject,
    pub data: Arc<Vec<u8>>,
}

/// Handles to the two requests issued for a session.
pub struct Submission {
    pub session_id: SessionId,
    pub links: JoinHandle<()>,
    pub video: JoinHandle<()>,
}

impl Submission {
    /// Wait for both results to be delivered.
    pub async fn wait(self) -> Result<(), Error> {
        let (links, video) = tokio::join!(self.links, self.video);
        links?;
        video?;
        Ok(())
    }
}

fn materialize(store: &dyn MediaStore, resp: &VideoResponse) -> Outcome<GeneratedVideo> {
    let data = match decode_video(resp) {
        Ok(data) => data,
        Err(failure) => return Outcome::Failed(failure),
    };
    match store.create(&data) {
        Ok(media) => Outcome::Succeeded(GeneratedVideo {
            media,
            data: Arc::new(data),
        }),
        Err(e) => Outcome::Failed(Failure::Media(format!("{:#}", e))),
    }
}

/// The request context sent to the backend for a question.
pub fn compose_context(question: &str, context: Option<&str>) -> String {
    let question = question.trim();
    match context.map(str::trim).filter(|c| !c.is_empty()) {
        Some(context) => format!("Question: {}. Additional Context: {}", question, context),
        None => question.to_string(),
    }
}

struct ControllerState {
    next_session_id: u64,
    session: Option<Session>,
    transcript: Transcript,
    video: VideoSurface,
    view: ViewMode,
    // Image received from the upload page, used by the next session
    pending_image: Option<ImageAttachment>,
    sends_in_flight: usize,
    // Bumped on reset so chat replies for a cleared transcript are dropped
    epoch: u64,
    tx: Option<mpsc::UnboundedSender<TranscriptEntry>>,
}

impl ControllerState {
    fn accepts(&self, id: SessionId, kind: ResultKind) -> bool {
        let accepted = self.session.as_ref().is_some_and(|s| s.accepts(id, kind));
        if !accepted {
            tracing::debug!("Discarding stale {} result for {}", kind, id);
        }
        accepted
    }

    fn append(&mut self, entry: TranscriptEntry) {
        if let Some(tx) = &self.tx {
            // The receiver going away only means nobody is watching
            let _ = tx.send(entry.clone());
        }
        self.transcript.push(entry);
    }

    /// Swap what the video surface shows. Returns the media that was
    /// displayed, which must be released once the lock is dropped.
    fn show(&mut self, surface: VideoSurface) -> Option<MediaObject> {
        match mem::replace(&mut self.video, surface) {
            VideoSurface::Playing(media) => Some(media),
            _ => None,
        }
    }

    fn start_session(
        &mut self,
        question: &str,
        image: Option<ImageAttachment>,
    ) -> Result<(SessionId, Option<MediaObject>), Error> {
        if question.trim().is_empty() && image.is_none() && self.pending_image.is_none() {
            bail!("A question or an image is required");
        }
        let image = image.or_else(|| self.pending_image.take());

        if let Some(previous) = &self.session {
            if previous.status == SessionStatus::AwaitingResults {
                tracing::debug!("{} superseded before its results arrived", previous.id);
            }
        }

        self.next_session_id += 1;
        let id = SessionId(self.next_session_id);
        let mut session = Session::new(id, question.trim(), image);
        session.status = SessionStatus::AwaitingResults;
        self.session = Some(session);
        let previous = self.show(VideoSurface::Loading);
        self.view = ViewMode::Loading;

        tracing::info!("Started {}", id);
        Ok((id, previous))
    }

    fn resolve(&mut self, kind: ResultKind, outcome: Outcome<()>) {
        if let Some(session) = self.session.as_mut() {
            if session.resolve(kind, outcome) {
                tracing::info!("{} complete", session.id);
            }
        }
    }
}

/// Re-enables the send control when a chat send finishes, whichever
/// way it exits.
struct SendGuard(Arc<RwLock<ControllerState>>);

impl Drop for SendGuard {
    fn drop(&mut self) {
        let mut state = self.0.write().unwrap_or_else(PoisonError::into_inner);
        state.sends_in_flight = state.sends_in_flight.saturating_sub(1);
    }
}

#[derive(Clone)]
pub struct ChatTranscriptController {
    state: Arc<RwLock<ControllerState>>,
    backend: SharedBackend,
    media: SharedMediaStore,
}

impl ChatTranscriptController {
    pub fn builder(backend: SharedBackend, media: SharedMediaStore) -> ControllerBuilder {
        ControllerBuilder::new(backend, media)
    }

    /// An HTTP backed controller writing videos under the configured
    /// media path.
    pub fn from_config(config: &AppConfig) -> ControllerBuilder {
        ControllerBuilder::new(
            Arc::new(HttpBackend::from_config(config)),
            Arc::new(FileMediaStore::from_config(config)),
        )
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ControllerState> {
        self.state.read().expect("Unable to read controller state")
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ControllerState> {
        self.state.write().expect("Unable to write controller state")
    }

    /// Begin a new question session. Any session still waiting on
    /// results is superseded and its results will be discarded.
    pub fn start_session(
        &self,
        question: &str,
        image: Option<ImageAttachment>,
    ) -> Result<SessionId, Error> {
        let (id, previous) = self.write_state().start_session(question, image)?;
        self.release(previous);
        Ok(id)
    }

    fn release(&self, media: Option<MediaObject>) {
        if let Some(media) = media {
            self.media.release(&media);
        }
    }

    /// Start a session for the question and issue the links and video
    /// requests together.
    pub fn submit(
        &self,
        question: &str,
        context: Option<&str>,
        image: Option<ImageAttachment>,
    ) -> Result<Submission, Error> {
        let request = compose_context(question, context);

        // Starting the session and appending its entries happen under
        // one lock so a concurrent submit can't interleave
        let (session_id, image, previous) = {
            let mut state = self.write_state();
            let (session_id, previous) = state.start_session(&request, image)?;
            let image = state.session.as_ref().and_then(|s| s.image.clone());
            if !request.is_empty() {
                state.append(TranscriptEntry::text(Role::User, &request));
            }
            state.append(TranscriptEntry::text(Role::Assistant, SUBMIT_STATUS_MESSAGE));
            (session_id, image, previous)
        };
        self.release(previous);

        let links = self.submit_links_request(session_id, &request, image.clone());
        let video = self.submit_video_request(session_id, &request, image);

        Ok(Submission {
            session_id,
            links,
            video,
        })
    }

    /// Request links in the background. The result is delivered to
    /// `on_links_result`.
    pub fn submit_links_request(
        &self,
        session_id: SessionId,
        question: &str,
        image: Option<Arc<ImageAttachment>>,
    ) -> JoinHandle<()> {
        let controller = self.clone();
        let question = question.to_string();
        tokio::spawn(async move {
            let result = controller
                .backend
                .links(&question, image.as_deref())
                .await
                .map(|resp| resp.links);
            controller.on_links_result(session_id, Outcome::from(result));
        })
    }

    /// Request a generated video in the background. The payload is
    /// decoded into a media object before it is delivered to
    /// `on_video_result`.
    pub fn submit_video_request(
        &self,
        session_id: SessionId,
        question: &str,
        image: Option<Arc<ImageAttachment>>,
    ) -> JoinHandle<()> {
        let controller = self.clone();
        let question = question.to_string();
        tokio::spawn(async move {
            let outcome = match controller.backend.manim(&question, image.as_deref()).await {
                Ok(resp) => {
                    // Decoding and writing a full video blocks
                    let store = Arc::clone(&controller.media);
                    tokio::task::spawn_blocking(move || materialize(store.as_ref(), &resp))
                        .await
                        .unwrap_or_else(|e| Outcome::Failed(Failure::Media(e.to_string())))
                }
                Err(e) => Outcome::Failed(Failure::from(&e)),
            };
            controller.on_video_result(session_id, outcome);
        })
    }

    pub fn on_links_result(&self, session_id: SessionId, outcome: Outcome<Vec<LinkRecord>>) {
        if outcome.is_pending() {
            return;
        }

        let mut state = self.write_state();
        if !state.accepts(session_id, ResultKind::Links) {
            return;
        }

        let fallback = || TranscriptEntry::text(Role::Assistant, LINKS_FALLBACK_MESSAGE);
        let entries = match &outcome {
            Outcome::Succeeded(links) if !links.is_empty() => match render::link_list(links) {
                Ok((text, html)) => vec![
                    TranscriptEntry::text(Role::Assistant, &render::links_summary(links.len())),
                    TranscriptEntry::rich(Role::Assistant, &text, &html),
                ],
                Err(e) => {
                    tracing::error!("Failed to render links for {}: {}", session_id, e);
                    vec![fallback()]
                }
            },
            Outcome::Succeeded(_) => {
                tracing::info!("No links found for {}", session_id);
                vec![fallback()]
            }
            Outcome::Failed(failure) => {
                tracing::warn!("Links request failed for {}: {}", session_id, failure);
                vec![fallback()]
            }
            Outcome::Pending => return,
        };

        for entry in entries {
            state.append(entry);
        }
        state.view = ViewMode::Chat;
        state.resolve(ResultKind::Links, outcome.state());
    }

    pub fn on_video_result(&self, session_id: SessionId, outcome: Outcome<GeneratedVideo>) {
        if outcome.is_pending() {
            return;
        }

        let mut state = self.write_state();
        if !state.accepts(session_id, ResultKind::Video) {
            drop(state);
            if let Outcome::Succeeded(video) = outcome {
                self.release(Some(video.media));
            }
            return;
        }

        let resolved = outcome.state();
        let previous = match outcome {
            Outcome::Succeeded(video) => {
                let previous = state.show(VideoSurface::Playing(video.media));
                if let Some(session) = state.session.as_mut() {
                    session.video_data = Some(video.data);
                }
                state.append(TranscriptEntry::text(Role::Assistant, VIDEO_READY_MESSAGE));
                previous
            }
            Outcome::Failed(failure) => {
                tracing::warn!("Video request failed for {}: {}", session_id, failure);
                let previous = state.show(VideoSurface::Playing(self.media.fallback()));
                state.append(TranscriptEntry::text(
                    Role::Assistant,
                    VIDEO_FALLBACK_MESSAGE,
                ));
                previous
            }
            Outcome::Pending => return,
        };
        state.view = ViewMode::Chat;
        state.resolve(ResultKind::Video, resolved);
        drop(state);
        self.release(previous);
    }

    /// Send a chat message with the transcript as history. The user
    /// entry is appended immediately, the reply when it arrives.
    /// Overlapping sends are independent and their replies land in
    /// completion order. Returns the entries appended for the reply.
    pub async fn send_chat_message(&self, text: &str) -> Vec<TranscriptEntry> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let (history, epoch, _guard) = {
            let mut state = self.write_state();
            state.append(TranscriptEntry::text(Role::User, text));
            state.sends_in_flight += 1;
            (
                state.transcript.history(),
                state.epoch,
                SendGuard(Arc::clone(&self.state)),
            )
        };

        let apology = || vec![TranscriptEntry::text(Role::Assistant, CHAT_ERROR_MESSAGE)];
        let entries = match self.backend.chat(&history).await {
            Ok(resp) => match resp.message() {
                Some(msg) => {
                    let mut entries = vec![TranscriptEntry::message(
                        Role::Assistant,
                        &msg,
                        markdown::render(&msg),
                    )];
                    match resp.html_links().map(render::chat_links).transpose() {
                        Ok(Some(Some((text, html)))) => {
                            entries.push(TranscriptEntry::rich(Role::Assistant, &text, &html))
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!("Failed to render chat links: {}", e),
                    }
                    entries
                }
                None => {
                    tracing::warn!("Chat response had no message: {:?}", resp);
                    apology()
                }
            },
            Err(e) => {
                tracing::warn!("Chat request failed: {}", Failure::from(&e));
                apology()
            }
        };

        let mut state = self.write_state();
        if state.epoch != epoch {
            tracing::debug!("Discarding chat reply for a transcript that was reset");
            return Vec::new();
        }
        for entry in entries.iter().cloned() {
            state.append(entry);
        }
        entries
    }

    /// Invalidate the current session, clear the transcript and go
    /// back to the placeholder.
    pub fn reset_session(&self) {
        let mut state = self.write_state();
        if let Some(session) = state.session.as_mut() {
            session.status = SessionStatus::Reset;
            session.video_data = None;
        }
        state.transcript.clear();
        let previous = state.show(VideoSurface::Hidden);
        state.view = ViewMode::Placeholder;
        state.pending_image = None;
        state.epoch += 1;
        drop(state);

        self.release(previous);
        tracing::info!("Reset to placeholder");
    }

    /// Accept an image from the upload page for the next session.
    pub fn handle_extension_message(
        &self,
        message: ExtensionMessage,
    ) -> Result<MessageReply, Error> {
        let image = message.into_attachment()?;
        tracing::info!(
            "Received image {} ({} bytes) from upload page",
            image.file_name,
            image.size()
        );
        self.write_state().pending_image = Some(image);
        Ok(MessageReply::success())
    }

    /// Write the video currently shown to `target`, a file or a
    /// directory. Returns the path written.
    pub async fn export_video(&self, target: &Path) -> Result<PathBuf, Error> {
        let (surface, generated) = {
            let state = self.read_state();
            let generated = state.session.as_ref().and_then(|s| s.video_data.clone());
            (state.video.clone(), generated)
        };
        let bytes = media::export_bytes(
            self.media.as_ref(),
            &surface,
            generated.as_deref().map(Vec::as_slice),
        )?;

        let path = media::download_path(target);
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("Failed to write video to {}", path.display()))?;
        tracing::info!("Saved {} bytes of video to {}", bytes.len(), path.display());
        Ok(path)
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.read_state().transcript.entries()
    }

    pub fn video_surface(&self) -> VideoSurface {
        self.read_state().video.clone()
    }

    pub fn view_mode(&self) -> ViewMode {
        self.read_state().view
    }

    pub fn current_session(&self) -> Option<Session> {
        self.read_state().session.clone()
    }

    pub fn session_status(&self) -> SessionStatus {
        self.read_state()
            .session
            .as_ref()
            .map_or(SessionStatus::Idle, |s| s.status)
    }

    pub fn pending_image(&self) -> Option<String> {
        self.read_state()
            .pending_image
            .as_ref()
            .map(|i| i.file_name.clone())
    }

    pub fn controls(&self) -> Controls {
        let state = self.read_state();
        let awaiting = state
            .session
            .as_ref()
            .is_some_and(|s| s.status == SessionStatus::AwaitingResults);
        Controls {
            submit_enabled: !awaiting,
            send_enabled: state.sends_in_flight == 0,
            download_enabled: state.video.media().is_some(),
        }
    }
}

pub struct ControllerBuilder {
    backend: SharedBackend,
    media: SharedMediaStore,
    tx: Option<mpsc::UnboundedSender<TranscriptEntry>>,
}

impl ControllerBuilder {
    pub fn new(backend: SharedBackend, media: SharedMediaStore) -> Self {
        Self {
            backend,
            media,
            tx: None,
        }
    }

    /// Also send every appended transcript entry to `transmitter`.
    pub fn streaming(mut self, transmitter: mpsc::UnboundedSender<TranscriptEntry>) -> Self {
        self.tx = Some(transmitter);
        self
    }

    pub fn build(self) -> ChatTranscriptController {
        let state = ControllerState {
            next_session_id: 0,
            session: None,
            transcript: Transcript::new(),
            video: VideoSurface::Hidden,
            view: ViewMode::Placeholder,
            pending_image: None,
            sends_in_flight: 0,
            epoch: 0,
            tx: self.tx,
        };
        ChatTranscriptController {
            state: Arc::new(RwLock::new(state)),
            backend: self.backend,
            media: self.media,
        }
    }
}
