use std::sync::Arc;
use std::time::Duration;

use anyhow::{Error, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};

use super::models::{ChatRequest, ChatResponse, HistoryMessage, LinksResponse, VideoResponse};
use crate::core::AppConfig;
use crate::upload::ImageAttachment;

/// The three endpoints of the math help backend. Implemented over
/// HTTP by `HttpBackend`; tests swap in doubles that control when
/// each call resolves.
#[async_trait]
pub trait Backend {
    /// `POST /links` with the question context and optional image.
    async fn links(
        &self,
        context: &str,
        image: Option<&ImageAttachment>,
    ) -> Result<LinksResponse, Error>;

    /// `POST /manim` with the same form as `links`.
    async fn manim(
        &self,
        context: &str,
        image: Option<&ImageAttachment>,
    ) -> Result<VideoResponse, Error>;

    /// `POST /chat` with the full conversation history.
    async fn chat(&self, history: &[HistoryMessage]) -> Result<ChatResponse, Error>;
}

pub type SharedBackend = Arc<dyn Backend + Send + Sync + 'static>;

pub struct HttpBackend {
    api_url: String,
    client: reqwest::Client,
    request_timeout: Duration,
    video_timeout: Duration,
}

impl HttpBackend {
    pub fn new(api_url: &str) -> Self {
        Self {
            api_url: api_url.trim_end_matches("/").to_string(),
            client: reqwest::Client::new(),
            request_timeout: Duration::from_secs(60),
            video_timeout: Duration::from_secs(60 * 10),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            request_timeout: config.request_timeout,
            video_timeout: config.video_timeout,
            ..Self::new(&config.api_url)
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path)
    }
}

fn question_form(context: &str, image: Option<&ImageAttachment>) -> Result<Form, Error> {
    let mut form = Form::new().text("context", context.to_string());
    if let Some(image) = image {
        let part = Part::bytes(image.data.clone())
            .file_name(image.file_name.clone())
            .mime_str(&image.file_type)?;
        form = form.part("image", part);
    }
    Ok(form)
}

#[async_trait]
impl Backend for HttpBackend {
    async fn links(
        &self,
        context: &str,
        image: Option<&ImageAttachment>,
    ) -> Result<LinksResponse, Error> {
        tracing::debug!("Requesting links for context: {}", context);
        let resp = self
            .client
            .post(self.url("links"))
            .timeout(self.request_timeout)
            .multipart(question_form(context, image)?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp)
    }

    async fn manim(
        &self,
        context: &str,
        image: Option<&ImageAttachment>,
    ) -> Result<VideoResponse, Error> {
        tracing::debug!("Requesting video for context: {}", context);
        let resp = self
            .client
            .post(self.url("manim"))
            .timeout(self.video_timeout)
            .multipart(question_form(context, image)?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp)
    }

    async fn chat(&self, history: &[HistoryMessage]) -> Result<ChatResponse, Error> {
        tracing::debug!("Sending chat with {} messages of history", history.len());
        let resp = self
            .client
            .post(self.url("chat"))
            .header("Content-Type", "application/json")
            .timeout(self.request_timeout)
            .json(&ChatRequest {
                chat_history: history,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp)
    }
}
