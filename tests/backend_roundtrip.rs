//! Runs the HTTP client and offline queue against an in-process fake backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tempfile::TempDir;

use gramafix::api::ApiClient;
use gramafix::voice::{self, AudioClip};
use gramafix::{
    Connectivity, FileQueueStore, ImageAttachment, Location, OfflineQueue, QueueStore,
    ReportDraft, ReportForm, SubmitOutcome,
};

#[derive(Debug, Default, Clone)]
struct ReceivedIssue {
    fields: HashMap<String, String>,
    images: Vec<(String, String, Vec<u8>)>,
}

#[derive(Default)]
struct Backend {
    issues: Mutex<Vec<ReceivedIssue>>,
    audio_names: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl Backend {
    fn issues(&self) -> Vec<ReceivedIssue> {
        self.issues.lock().unwrap().clone()
    }
}

async fn read_issue(mut multipart: Multipart) -> ReceivedIssue {
    let mut issue = ReceivedIssue::default();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        if name == "images" {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let content_type = field.content_type().unwrap_or_default().to_string();
            let bytes = field.bytes().await.unwrap().to_vec();
            issue.images.push((file_name, content_type, bytes));
        } else {
            let value = field.text().await.unwrap();
            issue.fields.insert(name, value);
        }
    }
    issue
}

async fn create_issue(State(backend): State<Arc<Backend>>, multipart: Multipart) -> Response {
    let issue = read_issue(multipart).await;
    if backend.failing.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, "maintenance").into_response();
    }

    let mut issues = backend.issues.lock().unwrap();
    issues.push(issue);
    Json(json!({
        "message": "Issue reported successfully",
        "issue_id": format!("issue-{}", issues.len()),
        "status": "Received"
    }))
    .into_response()
}

async fn transcribe(State(backend): State<Arc<Backend>>, mut multipart: Multipart) -> Response {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let _ = field.bytes().await;
            backend.audio_names.lock().unwrap().push(file_name);
        }
    }
    Json(json!({"success": true, "transcript": " Water tank overflowing "})).into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "version": "1.0.0"}))
}

async fn categories() -> Json<serde_json::Value> {
    Json(json!({"categories": [
        {"name": "Roads", "icon": "R", "description": "Damaged roads, potholes"},
        {"name": "Water", "icon": "W", "description": "Water supply issues"}
    ]}))
}

async fn spawn_backend() -> (Arc<Backend>, String) {
    let backend = Arc::new(Backend::default());
    let app = Router::new()
        .route("/api/health", get(health))
        .route("/api/categories", get(categories))
        .route("/api/issues", post(create_issue))
        .route("/api/transcribe", post(transcribe))
        .with_state(backend.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (backend, format!("http://{addr}"))
}

async fn unused_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

fn draft() -> ReportDraft {
    ReportDraft::new(
        ReportForm {
            category: "Roads".to_string(),
            description: "Bridge railing broken".to_string(),
            reporter_name: "Suma".to_string(),
            reporter_phone: "9845012345".to_string(),
            gram_panchayat: "Sakleshpur".to_string(),
            address: Some("Old bridge, NH75".to_string()),
        },
        Some(Location::new(12.943, 75.785)),
    )
    .with_image(ImageAttachment::new(
        "railing.jpg",
        "image/jpeg",
        vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46],
    ))
}

#[tokio::test]
async fn online_submit_sends_all_fields_and_photos() {
    let (backend, url) = spawn_backend().await;
    let temp_dir = TempDir::new().unwrap();
    let queue = OfflineQueue::new(
        FileQueueStore::new(Some(temp_dir.path().to_path_buf())).unwrap(),
        ApiClient::with_url(url),
        Connectivity::new(true),
    );

    let mut report = draft();
    report.apply_transcript("Bridge railing broken near the school");
    let outcome = queue.submit(&mut report).await.unwrap();

    match outcome {
        SubmitOutcome::Delivered(response) => assert_eq!(response.effective_id(), Some("issue-1")),
        other => panic!("expected delivery, got {other:?}"),
    }
    assert!(queue.store().load().unwrap().is_empty());
    assert_eq!(report.form, ReportForm::default());

    let issues = backend.issues();
    assert_eq!(issues.len(), 1);
    let fields = &issues[0].fields;
    assert_eq!(fields["category"], "Roads");
    assert_eq!(fields["gram_panchayat"], "Sakleshpur");
    assert_eq!(fields["address"], "Old bridge, NH75");
    assert_eq!(
        fields["voice_description"],
        "Bridge railing broken near the school"
    );
    assert_eq!(fields["latitude"].parse::<f64>().unwrap(), 12.943);
    assert_eq!(fields["longitude"].parse::<f64>().unwrap(), 75.785);

    let (name, content_type, bytes) = &issues[0].images[0];
    assert_eq!(name, "railing.jpg");
    assert_eq!(content_type, "image/jpeg");
    assert_eq!(bytes, &vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46]);
}

#[tokio::test]
async fn failed_submit_is_queued_and_replayed_with_identical_photos() {
    let (backend, url) = spawn_backend().await;
    backend.failing.store(true, Ordering::SeqCst);

    let temp_dir = TempDir::new().unwrap();
    let queue = OfflineQueue::new(
        FileQueueStore::new(Some(temp_dir.path().to_path_buf())).unwrap(),
        ApiClient::with_url(url),
        Connectivity::new(true),
    );

    let mut report = draft();
    let outcome = queue.submit(&mut report).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
    assert_eq!(report.form.category, "Roads");

    let stored = queue.store().load().unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].images[0]
        .data_url
        .starts_with("data:image/jpeg;base64,"));

    // Still failing: the entry stays.
    let report_while_down = queue.sync().await.unwrap();
    assert_eq!(report_while_down.delivered, 0);
    assert_eq!(report_while_down.remaining, 1);

    backend.failing.store(false, Ordering::SeqCst);
    let sync_report = queue.sync().await.unwrap();
    assert_eq!(sync_report.delivered, 1);
    assert_eq!(sync_report.remaining, 0);

    let raw = std::fs::read_to_string(temp_dir.path().join("offlineReports.json")).unwrap();
    assert_eq!(serde_json::from_str::<serde_json::Value>(&raw).unwrap(), json!([]));

    let issues = backend.issues();
    assert_eq!(issues.len(), 1);
    assert!(!issues[0].fields.contains_key("voice_description"));
    let (name, content_type, bytes) = &issues[0].images[0];
    assert_eq!(name, "railing.jpg");
    assert_eq!(content_type, "image/jpeg");
    assert_eq!(bytes, &draft().images[0].bytes);
}

#[tokio::test]
async fn unreachable_backend_falls_back_to_queue() {
    let url = unused_url().await;
    let api = ApiClient::with_url(url);
    assert!(api.health_check().await.is_err());

    let temp_dir = TempDir::new().unwrap();
    let queue = OfflineQueue::new(
        FileQueueStore::new(Some(temp_dir.path().to_path_buf())).unwrap(),
        api,
        Connectivity::new(true),
    );

    let mut report = draft();
    let outcome = queue.submit(&mut report).await.unwrap();

    assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
    assert_eq!(queue.store().load().unwrap().len(), 1);
}

#[tokio::test]
async fn health_and_categories() {
    let (_backend, url) = spawn_backend().await;
    let api = ApiClient::with_url(format!("{url}/"));

    assert!(api.health_check().await.unwrap());

    let categories = api.fetch_categories().await.unwrap();
    let names: Vec<_> = categories.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Roads", "Water"]);
}

#[tokio::test]
async fn transcription_uploads_named_clip() {
    let (backend, url) = spawn_backend().await;
    let api = ApiClient::with_url(url);

    let clip = AudioClip::new("audio/webm;codecs=opus", vec![0x1A; 4_096]);
    let transcript = voice::transcribe(&api, &clip).await.unwrap();

    assert_eq!(transcript, "Water tank overflowing");
    assert_eq!(
        backend.audio_names.lock().unwrap().clone(),
        vec!["audio.webm".to_string()]
    );

    let mut report = draft();
    report.apply_transcript(&transcript);
    assert_eq!(report.form.description, "Water tank overflowing");
}
