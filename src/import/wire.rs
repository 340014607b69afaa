//! Wire shapes returned by the import endpoints and their normalization.
//!
//! The backend is loose about field names: success counts may arrive as
//! `success_count`, `created_count` or `linked_count`, row errors as plain
//! strings or objects under `errors` or `detailed_errors`, and ids as
//! numbers or strings.

use serde::Deserialize;
use serde_json::Value;

use super::types::{
    JobState, JobStatus, Progress, RowError, SyncResult, UploadOutcome, GENERIC_FAILURE_MESSAGE,
};
use crate::error::ImportError;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRowError {
    Text(String),
    Detail {
        #[serde(default)]
        row: Option<Value>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        field: Option<String>,
    },
}

impl RawRowError {
    fn normalize(self) -> RowError {
        match self {
            RawRowError::Text(message) => RowError {
                row: None,
                message,
                field: None,
            },
            RawRowError::Detail {
                row,
                message,
                error,
                field,
            } => RowError {
                row: row.as_ref().and_then(value_as_u64),
                message: message
                    .or(error)
                    .unwrap_or_else(|| "Unknown error".to_string()),
                field,
            },
        }
    }
}

/// Job status body: `GET <status endpoint>/<job_id>`
#[derive(Debug, Deserialize)]
pub struct RawJobStatus {
    #[serde(default)]
    job_id: Option<Value>,
    status: String,
    #[serde(default)]
    total_rows: Option<u64>,
    #[serde(default)]
    processed_rows: Option<u64>,
    #[serde(default)]
    progress_percentage: Option<f64>,
    #[serde(default)]
    success_count: Option<u64>,
    #[serde(default)]
    created_count: Option<u64>,
    #[serde(default)]
    linked_count: Option<u64>,
    #[serde(default)]
    error_count: Option<u64>,
    #[serde(default)]
    errors: Option<Vec<RawRowError>>,
    #[serde(default)]
    detailed_errors: Option<Vec<RawRowError>>,
    #[serde(default)]
    has_more_errors: Option<bool>,
    #[serde(default)]
    error_message: Option<String>,
}

impl RawJobStatus {
    /// Normalize into a snapshot; `requested_job_id` fills in a missing id
    pub fn normalize(self, requested_job_id: &str) -> Result<JobStatus, ImportError> {
        let state = JobState::parse(&self.status).ok_or_else(|| {
            ImportError::Decode(format!("Unknown job status '{}'", self.status))
        })?;

        let job_id = self
            .job_id
            .as_ref()
            .and_then(value_as_id)
            .unwrap_or_else(|| requested_job_id.to_string());

        let total_rows = self.total_rows.unwrap_or(0);
        let processed_rows = match self.processed_rows.unwrap_or(0) {
            p if total_rows > 0 => p.min(total_rows),
            p => p,
        };

        let errors = pick_errors(self.detailed_errors, self.errors);
        let error_count = self.error_count.unwrap_or(errors.len() as u64);

        let success_count = self.success_count.unwrap_or_else(|| {
            self.created_count
                .unwrap_or(0)
                .saturating_add(self.linked_count.unwrap_or(0))
        });

        let error_message = if state == JobState::Failed {
            self.error_message
                .filter(|m| !m.trim().is_empty())
                .or_else(|| errors.is_empty().then(|| GENERIC_FAILURE_MESSAGE.to_string()))
        } else {
            None
        };

        Ok(JobStatus {
            job_id,
            state,
            total_rows,
            processed_rows,
            progress: Progress::derive(self.progress_percentage, processed_rows, total_rows),
            success_count,
            error_count,
            errors,
            has_more_errors: self.has_more_errors.unwrap_or(false),
            error_message,
        })
    }
}

/// Upload body: either a final result or a job reference
#[derive(Debug, Deserialize)]
pub struct RawUploadResponse {
    #[serde(default)]
    job_id: Option<Value>,
    #[serde(default)]
    total_rows: Option<u64>,
    #[serde(default)]
    estimated_rows: Option<u64>,
    #[serde(default, alias = "created_count")]
    created: Option<u64>,
    #[serde(default, alias = "linked_count")]
    linked: Option<u64>,
    #[serde(default, alias = "skipped_count")]
    skipped: Option<u64>,
    #[serde(default)]
    error_count: Option<u64>,
    #[serde(default)]
    errors: Option<Vec<RawRowError>>,
    #[serde(default)]
    detailed_errors: Option<Vec<RawRowError>>,
}

impl RawUploadResponse {
    pub fn into_outcome(self) -> UploadOutcome {
        if let Some(job_id) = self.job_id.as_ref().and_then(value_as_id) {
            return UploadOutcome::Async {
                job_id,
                estimated_row_count: self.total_rows.or(self.estimated_rows),
            };
        }

        let errors = pick_errors(self.detailed_errors, self.errors);
        UploadOutcome::Sync(SyncResult {
            created: self.created.unwrap_or(0),
            linked: self.linked.unwrap_or(0),
            skipped: self.skipped.unwrap_or(0),
            error_count: self.error_count.unwrap_or(errors.len() as u64),
            errors,
        })
    }
}

fn pick_errors(
    detailed: Option<Vec<RawRowError>>,
    plain: Option<Vec<RawRowError>>,
) -> Vec<RowError> {
    let chosen = match detailed {
        Some(d) if !d.is_empty() => d,
        _ => plain.unwrap_or_default(),
    };
    chosen.into_iter().map(RawRowError::normalize).collect()
}

fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
