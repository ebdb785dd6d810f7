//! The video surface and the displayable media objects behind it.
//!
//! A generated video arrives as base64 and is materialized through a
//! `MediaStore` into something a player can open. Every object the
//! store creates must be handed back to `release` once it is no
//! longer displayed, otherwise repeated sessions accumulate files.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Error, Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Serialize;
use uuid::Uuid;

use crate::backend::VideoResponse;
use crate::core::AppConfig;
use crate::session::Failure;

pub const DEFAULT_DOWNLOAD_NAME: &str = "math-solution.mp4";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaSource {
    Generated,
    Fallback,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MediaObject {
    pub id: String,
    pub location: String,
    pub source: MediaSource,
}

impl MediaObject {
    pub fn is_fallback(&self) -> bool {
        self.source == MediaSource::Fallback
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "media", rename_all = "lowercase")]
pub enum VideoSurface {
    #[default]
    Hidden,
    Loading,
    Playing(MediaObject),
}

impl VideoSurface {
    pub fn is_loading(&self) -> bool {
        matches!(self, VideoSurface::Loading)
    }

    pub fn media(&self) -> Option<&MediaObject> {
        match self {
            VideoSurface::Playing(media) => Some(media),
            _ => None,
        }
    }
}

pub trait MediaStore {
    /// Materialize decoded video bytes into a playable object.
    fn create(&self, data: &[u8]) -> Result<MediaObject, Error>;

    /// The bundled demo video shown when generation fails.
    fn fallback(&self) -> MediaObject;

    /// Free whatever backs `media`. Releasing the fallback is a no-op.
    fn release(&self, media: &MediaObject);

    fn read(&self, media: &MediaObject) -> Result<Vec<u8>, Error>;
}

/// Writes each generated video to its own file under `dir`.
pub struct FileMediaStore {
    dir: PathBuf,
    fallback_path: PathBuf,
}

impl FileMediaStore {
    pub fn new(dir: &Path, fallback_path: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            fallback_path: fallback_path.to_path_buf(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            Path::new(&config.media_path),
            Path::new(&config.demo_video_path),
        )
    }
}

impl MediaStore for FileMediaStore {
    fn create(&self, data: &[u8]) -> Result<MediaObject, Error> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create media dir {}", self.dir.display()))?;
        let id = Uuid::new_v4().to_string();
        let path = self.dir.join(format!("{}.mp4", id));
        fs::write(&path, data)?;
        tracing::debug!("Wrote {} bytes of video to {}", data.len(), path.display());

        Ok(MediaObject {
            id,
            location: path.display().to_string(),
            source: MediaSource::Generated,
        })
    }

    fn fallback(&self) -> MediaObject {
        MediaObject {
            id: String::from("fallback"),
            location: self.fallback_path.display().to_string(),
            source: MediaSource::Fallback,
        }
    }

    fn release(&self, media: &MediaObject) {
        if media.is_fallback() {
            return;
        }
        if let Err(e) = fs::remove_file(&media.location) {
            tracing::warn!("Failed to release media {}: {}", media.location, e);
        }
    }

    fn read(&self, media: &MediaObject) -> Result<Vec<u8>, Error> {
        fs::read(&media.location)
            .with_context(|| format!("Failed to read video {}", media.location))
    }
}

/// Turn a `/manim` response into video bytes.
pub fn decode_video(resp: &VideoResponse) -> Result<Vec<u8>, Failure> {
    if !resp.is_success() {
        let status = resp.status.clone().unwrap_or(String::from("missing"));
        return Err(Failure::Rejected(status));
    }
    let encoded = resp
        .video_data
        .as_deref()
        .ok_or(Failure::Format(String::from("Response missing video_data")))?;
    let data = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Failure::Format(e.to_string()))?;
    if data.is_empty() {
        return Err(Failure::Format(String::from("Empty video_data")));
    }
    Ok(data)
}

/// Where to write a download. Directories get the default file name.
pub fn download_path(target: &Path) -> PathBuf {
    if target.is_dir() {
        target.join(DEFAULT_DOWNLOAD_NAME)
    } else {
        target.to_path_buf()
    }
}

/// Resolve the bytes to export for the media currently on the surface.
pub fn export_bytes(
    store: &dyn MediaStore,
    surface: &VideoSurface,
    generated: Option<&[u8]>,
) -> Result<Vec<u8>, Error> {
    if let Some(data) = generated {
        return Ok(data.to_vec());
    }
    let media = surface
        .media()
        .ok_or(anyhow!("No video available to download"))?;
    store.read(media)
}
