//! GramaFix reporting client
//!
//! Citizens report local infrastructure problems (roads, water, electricity...)
//! with photos, GPS coordinates and an optional voice-transcribed description.
//! Reports that can't reach the backend are kept in a local queue and replayed
//! once connectivity returns.

pub mod api;
pub mod attachment;
pub mod config;
pub mod connectivity;
pub mod queue;
pub mod report;
pub mod storage;
pub mod voice;

pub use attachment::{ImageAttachment, PortableImage};
pub use connectivity::Connectivity;
pub use queue::{OfflineQueue, ReportDelivery, SubmitOutcome, SyncPolicy, SyncReport};
pub use report::{IssueResponse, Location, ReportDraft, ReportForm};
pub use storage::{FileQueueStore, MemoryQueueStore, QueueStore, QueuedReport};
