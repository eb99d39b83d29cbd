//! Photo attachments
//!
//! Photos travel as raw bytes when a report is delivered directly, and as
//! `data:<mime>;base64,<payload>` URLs while a report sits in the offline queue.

use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const FALLBACK_IMAGE_MIME: &str = "image/jpeg";
const OCTET_STREAM_MIME: &str = "application/octet-stream";

/// Errors decoding a stored photo payload
#[derive(Error, Debug)]
pub enum AttachmentError {
    #[error("Data URL has no ',' separator")]
    MissingSeparator,

    #[error("Data URL is not base64 encoded")]
    NotBase64,

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// A photo attached to a report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImageAttachment {
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Read a photo from disk, guessing its MIME type from the extension.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read photo: {}", path.display()))?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("photo.jpg")
            .to_string();
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(Self {
            filename,
            mime_type,
            bytes,
        })
    }
}

/// Text-only form of a photo, as stored in the offline queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortableImage {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub mime_type: String,
    #[serde(rename = "dataUrl")]
    pub data_url: String,
}

impl PortableImage {
    /// An empty MIME type is stored as `application/octet-stream`, in both `type`
    /// and the data URL header.
    pub fn encode(image: &ImageAttachment) -> Self {
        let mime_type = normalize_mime(&image.mime_type);
        Self {
            name: image.filename.clone(),
            mime_type: mime_type.to_string(),
            data_url: encode_data_url(mime_type, &image.bytes),
        }
    }

    /// Rebuild the upload part. `index` names photos that were stored without a filename.
    pub fn decode(&self, index: usize) -> Result<ImageAttachment, AttachmentError> {
        let (header_mime, bytes) = decode_data_url(&self.data_url)?;

        let mime_type = Some(self.mime_type.trim())
            .filter(|mime| !mime.is_empty())
            .map(str::to_string)
            .or(header_mime)
            .unwrap_or_else(|| FALLBACK_IMAGE_MIME.to_string());
        let filename = Some(self.name.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("image_{index}.jpg"));

        Ok(ImageAttachment {
            filename,
            mime_type,
            bytes,
        })
    }
}

fn normalize_mime(mime_type: &str) -> &str {
    match mime_type.trim() {
        "" => OCTET_STREAM_MIME,
        mime => mime,
    }
}

pub fn encode_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        normalize_mime(mime_type),
        STANDARD.encode(bytes)
    )
}

/// Split a data URL into its media type (if present) and decoded bytes.
pub fn decode_data_url(data_url: &str) -> Result<(Option<String>, Vec<u8>), AttachmentError> {
    let (header, payload) = data_url
        .split_once(',')
        .ok_or(AttachmentError::MissingSeparator)?;

    let header = header.strip_prefix("data:").unwrap_or(header);
    let mut params = header.split(';');
    let mime = params
        .next()
        .map(str::trim)
        .filter(|mime| !mime.is_empty())
        .map(str::to_string);
    if !params.any(|param| param.trim().eq_ignore_ascii_case("base64")) {
        return Err(AttachmentError::NotBase64);
    }

    let bytes = STANDARD.decode(payload.trim())?;
    Ok((mime, bytes))
}

/// Encode all photos concurrently, keeping attachment order.
///
/// A photo whose encoding task fails is dropped from the result.
pub async fn encode_all(images: &[ImageAttachment]) -> Vec<PortableImage> {
    let handles: Vec<_> = images
        .iter()
        .cloned()
        .map(|image| tokio::task::spawn_blocking(move || PortableImage::encode(&image)))
        .collect();

    let mut encoded = Vec::with_capacity(handles.len());
    for (index, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(image) => encoded.push(image),
            Err(err) => {
                tracing::warn!(index, error = %err, "Failed to encode photo for offline storage");
            }
        }
    }
    encoded
}

/// Decode stored photos, skipping any that are malformed.
pub fn decode_all(images: &[PortableImage]) -> Vec<ImageAttachment> {
    images
        .iter()
        .enumerate()
        .filter_map(|(index, image)| match image.decode(index) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                tracing::warn!(index, name = %image.name, error = %err, "Dropping unreadable stored photo");
                None
            }
        })
        .collect()
}
