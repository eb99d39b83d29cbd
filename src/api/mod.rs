//! API module
//!
//! HTTP client for communicating with the GramaFix backend.

mod client;

pub use client::{should_queue_offline, ApiClient, ApiError, Category, TranscriptionResponse};
