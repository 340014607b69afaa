//! Type definitions for bulk imports.
//!
//! Defines the import kinds, the upload outcome, the normalized job status
//! snapshot and the per-row error detail.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which bulk import endpoint a file is sent to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImportKind {
    Sites,
    Inventory,
    ProjectSites { project_id: String },
}

impl ImportKind {
    /// Path of the initiating upload endpoint
    pub fn upload_path(&self) -> String {
        match self {
            ImportKind::Sites => "/api/sites/import/".to_string(),
            ImportKind::Inventory => "/api/inventory/import/".to_string(),
            ImportKind::ProjectSites { project_id } => format!(
                "/api/projects/{}/sites/import/",
                urlencoding::encode(project_id)
            ),
        }
    }

    /// Path of the job status endpoint for `job_id`
    pub fn status_path(&self, job_id: &str) -> String {
        format!(
            "{}status/{}/",
            self.upload_path(),
            urlencoding::encode(job_id)
        )
    }

    /// Short label used in logs and the import history
    pub fn label(&self) -> &'static str {
        match self {
            ImportKind::Sites => "sites",
            ImportKind::Inventory => "inventory",
            ImportKind::ProjectSites { .. } => "project-sites",
        }
    }
}

impl fmt::Display for ImportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportKind::ProjectSites { project_id } => {
                write!(f, "{} ({})", self.label(), project_id)
            }
            _ => f.write_str(self.label()),
        }
    }
}

/// Server-tracked job state. Only moves forward: Processing -> Completed | Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Map a server status string, case-insensitively
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" | "processing" | "running" | "in_progress" => {
                Some(JobState::Processing)
            }
            "completed" | "complete" | "success" | "done" => Some(JobState::Completed),
            "failed" | "failure" | "error" => Some(JobState::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        })
    }
}

/// Progress of a job, in whole percent when it can be known
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Progress {
    Percent(u8),
    Indeterminate,
}

impl Progress {
    /// Server value when supplied, else processed/total, else indeterminate
    pub fn derive(server_percent: Option<f64>, processed_rows: u64, total_rows: u64) -> Self {
        if let Some(p) = server_percent.filter(|p| p.is_finite()) {
            return Progress::Percent(p.round().clamp(0.0, 100.0) as u8);
        }

        if total_rows == 0 {
            return Progress::Indeterminate;
        }

        let ratio = processed_rows.min(total_rows) as f64 / total_rows as f64;
        Progress::Percent((ratio * 100.0).round() as u8)
    }

    pub fn percent(self) -> Option<u8> {
        match self {
            Progress::Percent(p) => Some(p),
            Progress::Indeterminate => None,
        }
    }
}

/// One row-level problem reported by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub row: Option<u64>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.row, &self.field) {
            (Some(row), Some(field)) => write!(f, "Row {} ({}): {}", row, field, self.message),
            (Some(row), None) => write!(f, "Row {}: {}", row, self.message),
            (None, Some(field)) => write!(f, "{}: {}", field, self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

/// Final counts of an import the server handled inline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub created: u64,
    pub linked: u64,
    pub skipped: u64,
    pub error_count: u64,
    pub errors: Vec<RowError>,
}

/// Result of the initiating upload call, immutable once created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum UploadOutcome {
    Sync(SyncResult),
    Async {
        job_id: String,
        estimated_row_count: Option<u64>,
    },
}

/// Latest snapshot of a server-side import job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub state: JobState,
    pub total_rows: u64,
    pub processed_rows: u64,
    pub progress: Progress,
    pub success_count: u64,
    pub error_count: u64,
    pub errors: Vec<RowError>,
    pub has_more_errors: bool,
    pub error_message: Option<String>,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Something to show the user when a failed job carries no row detail
    pub fn failure_message(&self) -> Option<String> {
        if self.state != JobState::Failed {
            return None;
        }

        if let Some(msg) = &self.error_message {
            return Some(msg.clone());
        }

        match self.errors.first() {
            Some(first) if self.errors.len() == 1 => Some(first.to_string()),
            Some(first) => Some(format!(
                "{} (and {} more)",
                first,
                self.errors.len() - 1
            )),
            None => Some(GENERIC_FAILURE_MESSAGE.to_string()),
        }
    }
}

pub const GENERIC_FAILURE_MESSAGE: &str =
    "The import failed on the server without further detail. Check the file format and try again.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_prefers_server_value() {
        assert_eq!(Progress::derive(Some(42.4), 10, 100), Progress::Percent(42));
        assert_eq!(Progress::derive(Some(10.0), 10, 100), Progress::Percent(10));
    }

    #[test]
    fn test_progress_computed_when_server_omits_it() {
        assert_eq!(Progress::derive(None, 10, 100), Progress::Percent(10));
        assert_eq!(Progress::derive(None, 1, 3), Progress::Percent(33));
        assert_eq!(Progress::derive(None, 2, 3), Progress::Percent(67));
    }

    #[test]
    fn test_progress_indeterminate_without_total() {
        assert_eq!(Progress::derive(None, 10, 0), Progress::Indeterminate);
        assert_eq!(Progress::derive(Some(f64::NAN), 0, 0), Progress::Indeterminate);
    }

    #[test]
    fn test_progress_clamped() {
        assert_eq!(Progress::derive(Some(140.0), 0, 0), Progress::Percent(100));
        assert_eq!(Progress::derive(Some(-3.0), 0, 0), Progress::Percent(0));
        assert_eq!(Progress::derive(None, 150, 100), Progress::Percent(100));
    }

    #[test]
    fn test_job_state_parse() {
        assert_eq!(JobState::parse("Processing"), Some(JobState::Processing));
        assert_eq!(JobState::parse("queued"), Some(JobState::Processing));
        assert_eq!(JobState::parse("COMPLETED"), Some(JobState::Completed));
        assert_eq!(JobState::parse("error"), Some(JobState::Failed));
        assert_eq!(JobState::parse("paused"), None);
        assert!(!JobState::Processing.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }

    #[test]
    fn test_endpoint_paths() {
        assert_eq!(ImportKind::Sites.upload_path(), "/api/sites/import/");
        assert_eq!(
            ImportKind::Inventory.status_path("abc-1"),
            "/api/inventory/import/status/abc-1/"
        );
        let kind = ImportKind::ProjectSites {
            project_id: "p 7".to_string(),
        };
        assert_eq!(
            kind.status_path("9"),
            "/api/projects/p%207/sites/import/status/9/"
        );
    }

    #[test]
    fn test_failure_message() {
        let mut status = JobStatus {
            job_id: "1".to_string(),
            state: JobState::Failed,
            total_rows: 0,
            processed_rows: 0,
            progress: Progress::Indeterminate,
            success_count: 0,
            error_count: 0,
            errors: Vec::new(),
            has_more_errors: false,
            error_message: None,
        };
        assert_eq!(
            status.failure_message().as_deref(),
            Some(GENERIC_FAILURE_MESSAGE)
        );

        status.errors = vec![
            RowError {
                row: Some(3),
                message: "missing site id".to_string(),
                field: None,
            },
            RowError {
                row: Some(8),
                message: "bad latitude".to_string(),
                field: Some("lat".to_string()),
            },
        ];
        assert_eq!(
            status.failure_message().as_deref(),
            Some("Row 3: missing site id (and 1 more)")
        );

        status.state = JobState::Completed;
        assert!(status.failure_message().is_none());
    }
}
