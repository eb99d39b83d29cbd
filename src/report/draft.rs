//! Report draft
//!
//! Form state for one issue report, as filled in by the reporter.

use serde::{Deserialize, Serialize};

use crate::attachment::ImageAttachment;

const MAX_DESCRIPTION_LEN: usize = 2_000;
const MAX_FIELD_LEN: usize = 120;

/// Text fields of an issue report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportForm {
    /// Issue category (e.g., "Roads", "Water", "Electricity")
    pub category: String,
    /// What is wrong
    pub description: String,
    pub reporter_name: String,
    pub reporter_phone: String,
    /// Village-level local government unit the issue belongs to
    pub gram_panchayat: String,
    /// Free-form address (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// GPS position of the reported issue
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    fn validate(&self, errors: &mut Vec<String>) {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            errors.push(format!(
                "Latitude {} is out of range (-90 to 90)",
                self.latitude
            ));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            errors.push(format!(
                "Longitude {} is out of range (-180 to 180)",
                self.longitude
            ));
        }
    }
}

/// A report being composed: form fields, transcript, position and photos.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportDraft {
    pub form: ReportForm,
    /// Transcribed voice description, sent alongside `form.description`
    pub voice_text: Option<String>,
    pub location: Option<Location>,
    pub images: Vec<ImageAttachment>,
}

impl ReportDraft {
    pub fn new(form: ReportForm, location: Option<Location>) -> Self {
        Self {
            form,
            voice_text: None,
            location,
            images: Vec::new(),
        }
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.images.push(image);
        self
    }

    /// Use a voice transcript as the report description.
    pub fn apply_transcript(&mut self, transcript: &str) {
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return;
        }
        self.voice_text = Some(transcript.to_string());
        self.form.description = transcript.to_string();
    }

    /// Voice description to send, if any.
    pub fn voice_description(&self) -> Option<&str> {
        self.voice_text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }

    /// Reset the form after a successful submission. The location is kept.
    pub fn clear(&mut self) {
        self.form = ReportForm::default();
        self.voice_text = None;
        self.images.clear();
    }

    /// Display report details
    pub fn display(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!("  Category: {}\n", self.form.category));
        output.push_str(&format!("  Description: {}\n", self.form.description));
        output.push_str(&format!("  Gram Panchayat: {}\n", self.form.gram_panchayat));
        output.push_str(&format!(
            "  Reporter: {} ({})\n",
            self.form.reporter_name, self.form.reporter_phone
        ));

        if let Some(ref address) = self.form.address {
            output.push_str(&format!("  Address: {}\n", address));
        }

        if let Some(location) = self.location {
            output.push_str(&format!(
                "  Location: {:.5}, {:.5}\n",
                location.latitude, location.longitude
            ));
        }

        if !self.images.is_empty() {
            output.push_str(&format!("  Photos: {}\n", self.images.len()));
        }

        output
    }

    /// Validate the report before it is submitted or queued
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let required = [
            ("Category", &self.form.category),
            ("Description", &self.form.description),
            ("Reporter name", &self.form.reporter_name),
            ("Reporter phone", &self.form.reporter_phone),
            ("Gram panchayat", &self.form.gram_panchayat),
        ];
        for (label, value) in required {
            if value.trim().is_empty() {
                errors.push(format!("{label} cannot be empty"));
            }
        }

        if self.form.description.trim().len() > MAX_DESCRIPTION_LEN {
            errors.push(format!(
                "Description is too long (max {MAX_DESCRIPTION_LEN} characters)"
            ));
        }
        if self.form.category.trim().len() > MAX_FIELD_LEN {
            errors.push(format!(
                "Category is too long (max {MAX_FIELD_LEN} characters)"
            ));
        }

        let phone = self.form.reporter_phone.trim();
        if !phone.is_empty()
            && !phone
                .chars()
                .all(|ch| ch.is_ascii_digit() || matches!(ch, '+' | '-' | ' '))
        {
            errors.push("Reporter phone may only contain digits, spaces, '+' or '-'".to_string());
        }

        match self.location {
            Some(location) => location.validate(&mut errors),
            None => errors.push("Location is required. Please enable location services".to_string()),
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Response from the API after a report is stored
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueResponse {
    /// Server message
    #[serde(default)]
    pub message: String,
    /// Assigned issue ID
    #[serde(default)]
    pub issue_id: String,
    /// Initial workflow status (usually "Received")
    #[serde(default)]
    pub status: Option<String>,
}

impl IssueResponse {
    pub fn effective_id(&self) -> Option<&str> {
        let id = self.issue_id.trim();
        if id.is_empty() {
            None
        } else {
            Some(id)
        }
    }
}
