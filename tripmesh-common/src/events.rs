//! Job status and progress event types
//!
//! Shared between the ingestion pipeline (publisher) and the HTTP/SSE layer
//! (subscriber). Serialized field names are snake_case.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Ingestion job lifecycle state
///
/// `Pending → Running → {Completed, Failed}`. Terminal states accept no
/// further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job record created, worker not started yet
    Pending,
    /// Worker is streaming and persisting batches
    Running,
    /// All rows persisted
    Completed,
    /// Aborted on the first fatal error
    Failed,
}

impl JobStatus {
    /// Textual form stored in the database and used as SSE event name
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Check if status is terminal (finished)
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Re-asserting the current non-terminal state is allowed so counter-only
    /// updates can carry the status along.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Pending) => true,
            (JobStatus::Pending, JobStatus::Running) => true,
            // A job may fail before it ever started running (e.g. unreadable file)
            (JobStatus::Pending, JobStatus::Failed) => true,
            (JobStatus::Running, JobStatus::Running) => true,
            (JobStatus::Running, JobStatus::Completed) => true,
            (JobStatus::Running, JobStatus::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::InvalidInput(format!("Unknown job status: {}", other))),
        }
    }
}

/// Progress notification payload delivered to job subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub status: JobStatus,
    pub processed_rows: u64,
    /// None while the row count is unknown
    pub total_rows: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressMessage {
    pub fn new(status: JobStatus, processed_rows: u64, total_rows: Option<u64>) -> Self {
        Self {
            status,
            processed_rows,
            total_rows,
            message: None,
        }
    }

    /// Terminal failure notification carrying the error text
    pub fn failed(processed_rows: u64, total_rows: Option<u64>, message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            processed_rows,
            total_rows,
            message: Some(message.into()),
        }
    }

    /// SSE event name for this message
    pub fn event_type(&self) -> &'static str {
        self.status.as_str()
    }
}
