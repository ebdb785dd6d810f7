//! Image attachments and the `imageSelected` message the upload page
//! sends when the user picks, drops or pastes an image.
use std::fs;
use std::path::Path;

use anyhow::{Context, Error, Result, anyhow, bail};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

/// Images larger than this are rejected before they reach the backend.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq)]
pub struct ImageAttachment {
    pub file_name: String,
    pub file_type: String,
    pub data: Vec<u8>,
}

impl ImageAttachment {
    pub fn new(file_name: &str, file_type: &str, data: Vec<u8>) -> Result<Self, Error> {
        if !file_type.starts_with("image/") {
            bail!("{} is not an image ({})", file_name, file_type);
        }
        if data.len() > MAX_IMAGE_BYTES {
            bail!(
                "{} is {} bytes, images must be under {} bytes",
                file_name,
                data.len(),
                MAX_IMAGE_BYTES
            );
        }
        Ok(Self {
            file_name: file_name.to_string(),
            file_type: file_type.to_string(),
            data,
        })
    }

    /// Accepts bare base64 or a full `data:` URL as produced by a
    /// browser `FileReader`.
    pub fn from_base64(file_name: &str, file_type: &str, encoded: &str) -> Result<Self, Error> {
        let encoded = match encoded.strip_prefix("data:") {
            Some(rest) => rest
                .split_once(',')
                .map(|(_, data)| data)
                .ok_or(anyhow!("Malformed data URL for {}", file_name))?,
            None => encoded,
        };
        let data = STANDARD
            .decode(encoded.trim())
            .with_context(|| format!("Attempted to decode base64 image {}", file_name))?;
        Self::new(file_name, file_type, data)
    }

    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or(anyhow!("Invalid image path: {}", path.display()))?;
        let file_type = guess_image_type(path)
            .ok_or(anyhow!("Please select an image file only: {}", path.display()))?;
        let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        Self::new(file_name, file_type, data)
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }
}

fn guess_image_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        _ => return None,
    };
    Some(mime)
}

/// Messages received across the extension boundary.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action")]
pub enum ExtensionMessage {
    #[serde(rename = "imageSelected", rename_all = "camelCase")]
    ImageSelected {
        file_name: String,
        file_size: u64,
        file_type: String,
        base64_data: String,
    },
}

impl ExtensionMessage {
    pub fn image_selected(image: &ImageAttachment) -> Self {
        ExtensionMessage::ImageSelected {
            file_name: image.file_name.clone(),
            file_size: image.size() as u64,
            file_type: image.file_type.clone(),
            base64_data: image.to_base64(),
        }
    }

    pub fn into_attachment(self) -> Result<ImageAttachment, Error> {
        match self {
            ExtensionMessage::ImageSelected {
                file_name,
                file_size,
                file_type,
                base64_data,
            } => {
                let image = ImageAttachment::from_base64(&file_name, &file_type, &base64_data)?;
                if image.size() as u64 != file_size {
                    tracing::warn!(
                        "Image {} declared {} bytes but decoded to {}",
                        file_name,
                        file_size,
                        image.size()
                    );
                }
                Ok(image)
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MessageReply {
    pub status: String,
}

impl MessageReply {
    pub fn success() -> Self {
        Self {
            status: String::from("success"),
        }
    }
}
