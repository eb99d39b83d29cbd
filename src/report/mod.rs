//! Issue reports
//!
//! Typed report schema sent to the GramaFix backend.

mod draft;

pub use draft::{IssueResponse, Location, ReportDraft, ReportForm};
