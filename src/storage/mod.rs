//! Local storage for reports waiting to be delivered
//!
//! The queue is a single JSON array kept under the `offlineReports` key. The
//! file-backed store writes it to:
//! - Linux: ~/.local/share/gramafix/offlineReports.json
//! - macOS: ~/Library/Application Support/org.gramafix.gramafix/offlineReports.json
//! - Windows: %APPDATA%/gramafix/gramafix/data/offlineReports.json

mod lock;

use anyhow::{Context, Result};
use chrono::Utc;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::attachment::{self, PortableImage};
use crate::report::{Location, ReportDraft, ReportForm};

pub use lock::SyncLock;

/// Storage key of the offline queue
pub const QUEUE_KEY: &str = "offlineReports";

/// Persistence for the offline queue. The whole queue is read and written at once.
pub trait QueueStore {
    fn load(&self) -> Result<Vec<QueuedReport>>;
    fn save(&self, reports: &[QueuedReport]) -> Result<()>;
}

/// A report that has not been delivered yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedReport {
    /// Unique queue identifier. Empty for records written before IDs existed.
    #[serde(default)]
    pub id: String,
    pub form: ReportForm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_text: Option<String>,
    pub location: Location,
    #[serde(default, alias = "imagesBase64")]
    pub images: Vec<PortableImage>,
    /// Milliseconds since epoch
    pub created_at: i64,
}

impl QueuedReport {
    pub fn new(draft: &ReportDraft, location: Location, images: Vec<PortableImage>) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            form: draft.form.clone(),
            voice_text: draft.voice_description().map(str::to_string),
            location,
            images,
            created_at: Utc::now().timestamp_millis(),
        }
    }

    /// Rebuild a deliverable draft. Photos that can't be decoded are dropped.
    pub fn to_draft(&self) -> ReportDraft {
        ReportDraft {
            form: self.form.clone(),
            voice_text: self
                .voice_text
                .as_deref()
                .filter(|text| !text.trim().is_empty())
                .map(str::to_string),
            location: Some(self.location),
            images: attachment::decode_all(&self.images),
        }
    }

    /// Give a record stored before IDs existed its own ID. Returns `true` if one was assigned.
    fn assign_missing_id(&mut self) -> bool {
        if !self.id.trim().is_empty() {
            return false;
        }
        self.id = Uuid::new_v4().simple().to_string();
        true
    }
}

/// File-backed queue store
pub struct FileQueueStore {
    data_dir: PathBuf,
}

impl FileQueueStore {
    /// Initialize the store, creating the data directory if needed
    pub fn new(data_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match data_dir {
            Some(dir) => dir,
            None => ProjectDirs::from("org", "gramafix", "gramafix")
                .context("Could not determine project directories")?
                .data_dir()
                .to_path_buf(),
        };
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        Ok(Self { data_dir })
    }

    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join(format!("{QUEUE_KEY}.json"))
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Take the cross-process sync lock. `None` if another process holds it.
    pub fn try_acquire_sync_lock(&self) -> Result<Option<SyncLock>> {
        lock::try_acquire(&self.data_dir.join(format!("{QUEUE_KEY}.sync.lock")))
    }
}

impl QueueStore for FileQueueStore {
    fn load(&self) -> Result<Vec<QueuedReport>> {
        let path = self.queue_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read offline queue: {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut reports: Vec<QueuedReport> = match serde_json::from_str(&content) {
            Ok(reports) => reports,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Offline queue is unreadable; quarantining it");
                let _ = quarantine_corrupt_queue(&path);
                return Ok(Vec::new());
            }
        };

        // IDs must survive reloads, so persist any that were just assigned.
        let mut assigned = 0;
        for report in &mut reports {
            if report.assign_missing_id() {
                assigned += 1;
            }
        }
        if assigned > 0 {
            tracing::info!(count = assigned, "Assigned IDs to queued reports stored without one");
            self.save(&reports)?;
        }
        Ok(reports)
    }

    fn save(&self, reports: &[QueuedReport]) -> Result<()> {
        let path = self.queue_path();
        let json = serde_json::to_string_pretty(reports)
            .context("Failed to serialize offline queue")?;

        // Write beside the queue and rename so readers never see a partial array.
        let tmp_path = path.with_extension("json.tmp");
        {
            let mut file = open_private_file_overwrite(&tmp_path).with_context(|| {
                format!("Failed to create queue file at {}", tmp_path.display())
            })?;
            file.write_all(json.as_bytes())
                .with_context(|| format!("Failed to write queue to {}", tmp_path.display()))?;
            file.sync_all().ok();
        }
        fs::rename(&tmp_path, &path).with_context(|| {
            format!(
                "Failed to replace offline queue: {} -> {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

/// In-memory queue store
#[derive(Default)]
pub struct MemoryQueueStore {
    reports: Mutex<Vec<QueuedReport>>,
    saves: AtomicUsize,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reports(reports: Vec<QueuedReport>) -> Self {
        Self {
            reports: Mutex::new(reports),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of `save` calls so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Vec<QueuedReport> {
        self.reports
            .lock()
            .map(|reports| reports.clone())
            .unwrap_or_default()
    }
}

impl QueueStore for MemoryQueueStore {
    fn load(&self) -> Result<Vec<QueuedReport>> {
        self.reports
            .lock()
            .map(|reports| reports.clone())
            .map_err(|_| anyhow::anyhow!("In-memory queue lock poisoned"))
    }

    fn save(&self, reports: &[QueuedReport]) -> Result<()> {
        let mut guard = self
            .reports
            .lock()
            .map_err(|_| anyhow::anyhow!("In-memory queue lock poisoned"))?;
        *guard = reports.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn quarantine_corrupt_queue(path: &Path) -> std::io::Result<()> {
    let invalid_path = path.with_extension("invalid");

    // Keep the file for troubleshooting. If we can't rename, remove it so one
    // bad write doesn't block all future reports.
    fs::rename(path, &invalid_path).or_else(|_| fs::remove_file(path))
}

pub(crate) fn open_private_file_new(path: &Path) -> std::io::Result<std::fs::File> {
    open_private_file(path, true, false)
}

fn open_private_file_overwrite(path: &Path) -> std::io::Result<std::fs::File> {
    open_private_file(path, false, true)
}

fn open_private_file(path: &Path, create_new: bool, truncate: bool) -> std::io::Result<std::fs::File> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true);
    if create_new {
        options.create_new(true);
    } else {
        options.create(true);
    }
    if truncate {
        options.truncate(true);
    }

    // Reports carry names and phone numbers; keep them private on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    options.open(path)
}
