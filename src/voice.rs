//! Voice descriptions
//!
//! A recorded clip is uploaded to the backend for transcription and the
//! transcript becomes the report description.

use std::path::Path;

use anyhow::{Context, Result};

use crate::api::{ApiClient, ApiError};

/// Recording formats in order of preference. Opus in WebM is best for speech.
pub const PREFERRED_CODECS: [&str; 4] = [
    "audio/webm;codecs=opus",
    "audio/mp4",
    "audio/ogg;codecs=opus",
    "audio/webm",
];

const FALLBACK_CODEC: &str = "audio/webm";

/// The backend rejects clips smaller than this.
pub const MIN_CLIP_BYTES: usize = 1_000;

/// A recorded audio clip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl AudioClip {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub async fn from_path(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read audio clip: {}", path.display()))?;
        let mime_type = mime_guess::from_path(path)
            .first()
            .map(|mime| mime.essence_str().to_string())
            .unwrap_or_else(|| FALLBACK_CODEC.to_string());
        Ok(Self { mime_type, bytes })
    }

    /// Upload filename, e.g. `audio.webm`
    pub fn upload_name(&self) -> String {
        format!("audio.{}", file_extension(&self.mime_type))
    }
}

/// Pick the first preferred codec the recorder supports.
pub fn choose_codec(is_supported: impl Fn(&str) -> bool) -> &'static str {
    PREFERRED_CODECS
        .iter()
        .copied()
        .find(|codec| is_supported(codec))
        .unwrap_or(FALLBACK_CODEC)
}

pub fn file_extension(mime_type: &str) -> &'static str {
    if mime_type.contains("webm") {
        "webm"
    } else if mime_type.contains("mp4") {
        "mp4"
    } else if mime_type.contains("wav") {
        "wav"
    } else {
        "webm"
    }
}

/// Transcribe a clip through the backend.
pub async fn transcribe(api: &ApiClient, clip: &AudioClip) -> Result<String, ApiError> {
    if clip.bytes.is_empty() {
        return Err(ApiError::Validation("Empty audio clip".to_string()));
    }
    if clip.bytes.len() < MIN_CLIP_BYTES {
        return Err(ApiError::Validation(format!(
            "Audio clip too short ({} bytes, need at least {MIN_CLIP_BYTES})",
            clip.bytes.len()
        )));
    }

    let filename = clip.upload_name();
    tracing::debug!(size = clip.bytes.len(), mime = %clip.mime_type, %filename, "Sending audio for transcription");

    let response = api
        .upload_transcription(&filename, &clip.mime_type, clip.bytes.clone())
        .await?;

    match response.transcript.as_deref().map(str::trim) {
        Some(transcript) if response.success && !transcript.is_empty() => {
            Ok(transcript.to_string())
        }
        _ => Err(ApiError::TranscriptionFailed(response.error.unwrap_or_else(
            || "No text could be transcribed from the audio.".to_string(),
        ))),
    }
}
