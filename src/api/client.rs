//! API client for the GramaFix backend
//!
//! Handles all HTTP communication with the backend API.

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::attachment::ImageAttachment;
use crate::config::{ApiConfig, Config};
use crate::queue::ReportDelivery;
use crate::report::{IssueResponse, ReportDraft};

/// API base URL (can be overridden via environment variable)
const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// API errors
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("Server unreachable")]
    Unreachable,
}

/// Whether a failed submission should fall back to the offline queue.
///
/// Any transport failure counts, including non-success responses; only
/// problems with the report itself are surfaced to the caller.
pub fn should_queue_offline(err: &ApiError) -> bool {
    match err {
        ApiError::Network(_) | ApiError::Api { .. } | ApiError::Unreachable => true,
        ApiError::Validation(_) | ApiError::TranscriptionFailed(_) => false,
    }
}

/// Issue category offered by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct CategoriesResponse {
    #[serde(default)]
    categories: Vec<Category>,
}

/// Body returned by the transcription endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptionResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// API client for GramaFix
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client from the config file and environment
    pub fn new() -> Self {
        let config = Config::load().unwrap_or_default();
        Self::from_config(&config.api)
    }

    /// Create from an API config section, applying environment overrides
    pub fn from_config(config: &ApiConfig) -> Self {
        let base_url = std::env::var("GRAMAFIX_API_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| config.base_url.clone());

        let timeout_seconds = std::env::var("GRAMAFIX_API_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or_else(|| config.timeout_seconds.max(1));

        let verify_ssl = parse_bool_env("GRAMAFIX_API_VERIFY_SSL").unwrap_or(config.verify_ssl);

        Self::with_settings(base_url, timeout_seconds, verify_ssl)
    }

    /// Create with custom base URL
    pub fn with_url(base_url: String) -> Self {
        Self::with_settings(base_url, DEFAULT_TIMEOUT_SECONDS, true)
    }

    fn with_settings(base_url: String, timeout_seconds: u64, verify_ssl: bool) -> Self {
        let timeout = Duration::from_secs(timeout_seconds.max(1));
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_ssl)
            .build()
            .unwrap_or_else(|_| Client::new());

        ApiClient {
            client,
            base_url: normalize_base_url(&base_url),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if API is reachable
    pub async fn health_check(&self) -> Result<bool, ApiError> {
        let url = format!("{}/api/health", self.base_url);
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }

    /// Fetch the issue categories offered by the backend
    pub async fn fetch_categories(&self) -> Result<Vec<Category>, ApiError> {
        let url = format!("{}/api/categories", self.base_url);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Api {
                status: status.as_u16(),
                message: "Failed to fetch categories".to_string(),
            });
        }

        let body: CategoriesResponse = response.json().await?;
        Ok(body.categories)
    }

    /// Submit an issue report as a multipart form
    pub async fn submit_issue(&self, report: &ReportDraft) -> Result<IssueResponse, ApiError> {
        let form = issue_form(report)?;
        let url = format!("{}/api/issues", self.base_url);

        let response = self.client.post(&url).multipart(form).send().await?;
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        if !status.is_success() {
            return Err(ApiError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        // A success status means the issue is stored; don't fail on an odd body.
        Ok(serde_json::from_str(&body).unwrap_or_else(|_| IssueResponse {
            message: body,
            ..IssueResponse::default()
        }))
    }

    /// Upload an audio clip for transcription
    pub async fn upload_transcription(
        &self,
        filename: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<TranscriptionResponse, ApiError> {
        let url = format!("{}/api/transcribe", self.base_url);
        let form = Form::new().part("file", file_part(filename, mime_type, bytes));

        let response = self.client.post(&url).multipart(form).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        // Failures come back as JSON with a 500 status, so parse regardless.
        match serde_json::from_str::<TranscriptionResponse>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(_) if status.is_success() => Err(ApiError::TranscriptionFailed(
                "Unexpected transcription response".to_string(),
            )),
            Err(_) => Err(ApiError::Api {
                status: status.as_u16(),
                message: body,
            }),
        }
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportDelivery for ApiClient {
    async fn deliver(&self, report: &ReportDraft) -> Result<IssueResponse, ApiError> {
        self.submit_issue(report).await
    }
}

fn issue_form(report: &ReportDraft) -> Result<Form, ApiError> {
    let location = report
        .location
        .ok_or_else(|| ApiError::Validation("Location is required".to_string()))?;
    let form_fields = &report.form;

    let mut form = Form::new()
        .text("category", form_fields.category.clone())
        .text("description", form_fields.description.clone())
        .text("reporter_name", form_fields.reporter_name.clone())
        .text("reporter_phone", form_fields.reporter_phone.clone())
        .text("gram_panchayat", form_fields.gram_panchayat.clone())
        .text("latitude", location.latitude.to_string())
        .text("longitude", location.longitude.to_string())
        .text("address", form_fields.address.clone().unwrap_or_default());

    if let Some(voice) = report.voice_description() {
        form = form.text("voice_description", voice.to_string());
    }

    for image in &report.images {
        form = form.part("images", image_part(image));
    }

    Ok(form)
}

fn image_part(image: &ImageAttachment) -> Part {
    file_part(&image.filename, &image.mime_type, image.bytes.clone())
}

fn file_part(filename: &str, mime_type: &str, bytes: Vec<u8>) -> Part {
    let filename = filename.to_string();
    Part::bytes(bytes.clone())
        .file_name(filename.clone())
        .mime_str(mime_type)
        .unwrap_or_else(|_| Part::bytes(bytes).file_name(filename))
}

fn normalize_base_url(base_url: &str) -> String {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return DEFAULT_API_URL.to_string();
    }
    trimmed.trim_end_matches('/').to_string()
}

fn parse_bool_env(key: &str) -> Option<bool> {
    let value = std::env::var(key).ok()?;
    parse_bool_value(&value)
}

fn parse_bool_value(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
