//! File record model
//!
//! Supporting types for the three review queues and the records they hold.
//! Field names on the wire follow the upload backend (`object_name`,
//! `proj_id`, `updated`), with aliases for the descriptive spellings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{Error, Result};

/// One of the three review queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    /// Uploaded, awaiting review
    Pending,
    /// Accepted by a reviewer
    Approved,
    /// Sent back with feedback
    Rejected,
}

impl QueueName {
    /// All queues in display order
    pub const ALL: [QueueName; 3] = [QueueName::Pending, QueueName::Approved, QueueName::Rejected];

    /// Wire name used as the `status_folder` query value
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Pending => "pending",
            QueueName::Approved => "approved",
            QueueName::Rejected => "rejected",
        }
    }

    /// Stable slot index (0..3) for per-queue arrays
    pub fn index(self) -> usize {
        match self {
            QueueName::Pending => 0,
            QueueName::Approved => 1,
            QueueName::Rejected => 2,
        }
    }

    /// Review status carried by records that live in this queue
    pub fn status(self) -> ReviewStatus {
        match self {
            QueueName::Pending => ReviewStatus::Pending,
            QueueName::Approved => ReviewStatus::Approved,
            QueueName::Rejected => ReviewStatus::Rejected,
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(QueueName::Pending),
            "approved" => Ok(QueueName::Approved),
            "rejected" => Ok(QueueName::Rejected),
            other => Err(Error::InvalidInput(format!("unknown queue: {}", other))),
        }
    }
}

/// Review status attribute of a record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewStatus::Pending => write!(f, "pending"),
            ReviewStatus::Approved => write!(f, "approved"),
            ReviewStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// An uploaded file as listed by the remote authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Storage object identifier, unique across all queues
    #[serde(rename = "object_name", alias = "object_id", alias = "id")]
    pub object_id: String,
    /// Display name (falls back to the object id when empty)
    #[serde(default)]
    pub name: String,
    /// Size in bytes
    #[serde(default)]
    pub size: u64,
    /// Last-modified time reported by object storage
    #[serde(rename = "updated", alias = "last_modified", default)]
    pub last_modified: Option<DateTime<Utc>>,
    /// Project the upload belongs to
    #[serde(rename = "proj_id", alias = "project_id", default)]
    pub project_id: String,
    /// Identity of the uploader
    #[serde(default)]
    pub uploader: String,
    #[serde(default)]
    pub status: ReviewStatus,
    /// Reviewer feedback, present only on rejected records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl FileRecord {
    /// Minimal pending record; remaining attributes via the `with_*` builders
    pub fn new(object_id: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            name: String::new(),
            size: 0,
            last_modified: None,
            project_id: String::new(),
            uploader: String::new(),
            status: ReviewStatus::Pending,
            feedback: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_last_modified(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = Some(at);
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = project_id.into();
        self
    }

    pub fn with_uploader(mut self, uploader: impl Into<String>) -> Self {
        self.uploader = uploader.into();
        self
    }

    pub fn with_status(mut self, status: ReviewStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }

    /// Name to show in listings
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.object_id
        } else {
            &self.name
        }
    }
}

/// Attribute change merged into a record when it moves between queues
///
/// Status and feedback are the only attributes a review touches, so a patch
/// built with [`RecordPatch::restore`] undoes any earlier patch exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPatch {
    pub status: ReviewStatus,
    pub feedback: Option<String>,
}

impl RecordPatch {
    pub fn approved() -> Self {
        Self {
            status: ReviewStatus::Approved,
            feedback: None,
        }
    }

    pub fn rejected(feedback: impl Into<String>) -> Self {
        Self {
            status: ReviewStatus::Rejected,
            feedback: Some(feedback.into()),
        }
    }

    /// Patch that puts a record's review attributes back to `original`
    pub fn restore(original: &FileRecord) -> Self {
        Self {
            status: original.status,
            feedback: original.feedback.clone(),
        }
    }

    pub fn apply(&self, record: &mut FileRecord) {
        record.status = self.status;
        record.feedback = self.feedback.clone();
    }
}
