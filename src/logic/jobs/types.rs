//! Job records
//!
//! A job record is replaced wholesale on every stage transition; fields a
//! transition does not set are absent until a later transition sets them.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an analysis job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Capturing,
    Extracting,
    Scoring,
    Mapping,
    Done,
    Error,
}

/// One tracked analysis request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub status: JobStatus,

    /// 0-100, monotonically non-decreasing over the job's lifetime
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Path of the final result document, set on completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<PathBuf>,
}

impl Job {
    /// Fresh record at submission time
    pub fn queued() -> Self {
        Self {
            status: JobStatus::Queued,
            progress: Some(0),
            error: None,
            result: None,
        }
    }

    /// Record for an in-flight stage
    pub fn running(status: JobStatus, progress: u8) -> Self {
        Self {
            status,
            progress: Some(progress),
            error: None,
            result: None,
        }
    }

    /// Terminal failure record
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Error,
            progress: None,
            error: Some(message.into()),
            result: None,
        }
    }

    /// Terminal success record, pointing at the result document
    pub fn done(result: PathBuf) -> Self {
        Self {
            status: JobStatus::Done,
            progress: Some(100),
            error: None,
            result: Some(result),
        }
    }
}
