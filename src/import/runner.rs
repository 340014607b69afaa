//! Drives one user-initiated import from upload to final summary.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::classify::describe_submission_error;
use super::client::ImportClient;
use super::poller::{JobPoller, PollSettings};
use super::types::{ImportKind, JobState, JobStatus, RowError, SyncResult, UploadOutcome};
use crate::error::ImportError;
use crate::events::{ImportEventBus, ImportEventPayload};
use crate::logging::{append_history_entry, ImportRecord, ImportResultKind};
use crate::validation::file_extension;

/// Rough bytes-per-row figures for the pre-poll row estimate
const CSV_BYTES_PER_ROW: u64 = 120;
const XLSX_BYTES_PER_ROW: u64 = 40;
const XLS_BYTES_PER_ROW: u64 = 200;

/// Display-only guess of the row count, from file size and type
pub fn estimate_rows(path: &Path, file_size: u64) -> Option<u64> {
    let bytes_per_row = match file_extension(path).as_deref() {
        Some("csv") => CSV_BYTES_PER_ROW,
        Some("xlsx") => XLSX_BYTES_PER_ROW,
        Some("xls") => XLS_BYTES_PER_ROW,
        _ => return None,
    };
    (file_size > 0).then(|| (file_size / bytes_per_row).max(1))
}

/// Final result of one import, sync or async
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub kind: ImportKind,
    pub file_name: String,
    pub job_id: Option<String>,
    pub state: JobState,
    pub success_count: u64,
    pub skipped: u64,
    pub error_count: u64,
    pub errors: Vec<RowError>,
    pub has_more_errors: bool,
    pub message: Option<String>,
}

impl ImportSummary {
    fn from_sync(kind: ImportKind, file_name: String, result: SyncResult) -> Self {
        Self {
            kind,
            file_name,
            job_id: None,
            state: JobState::Completed,
            success_count: result.created.saturating_add(result.linked),
            skipped: result.skipped,
            error_count: result.error_count,
            errors: result.errors,
            has_more_errors: false,
            message: None,
        }
    }

    fn from_job(kind: ImportKind, file_name: String, status: JobStatus) -> Self {
        let message = status.failure_message();
        Self {
            kind,
            file_name,
            job_id: Some(status.job_id),
            state: status.state,
            success_count: status.success_count,
            skipped: 0,
            error_count: status.error_count,
            errors: status.errors,
            has_more_errors: status.has_more_errors,
            message,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == JobState::Completed
    }

    /// Turn a failed job into [`ImportError::JobFailed`]
    pub fn into_result(self) -> Result<Self, ImportError> {
        if self.succeeded() {
            return Ok(self);
        }
        Err(ImportError::JobFailed {
            job_id: self.job_id.clone().unwrap_or_default(),
            message: self
                .message
                .clone()
                .unwrap_or_else(|| super::types::GENERIC_FAILURE_MESSAGE.to_string()),
        })
    }
}

pub struct ImportRunner {
    client: ImportClient,
    settings: PollSettings,
    bus: ImportEventBus,
    history_path: Option<PathBuf>,
}

impl ImportRunner {
    pub fn new(client: ImportClient, settings: PollSettings, bus: ImportEventBus) -> Self {
        Self {
            client,
            settings,
            bus,
            history_path: None,
        }
    }

    /// Append every finished import to the JSONL log at `path`
    pub fn with_history(mut self, path: PathBuf) -> Self {
        self.history_path = Some(path);
        self
    }

    pub async fn run(&self, kind: ImportKind, path: &Path) -> Result<ImportSummary, ImportError> {
        self.run_until(kind, path, CancellationToken::new()).await
    }

    /// Like [`run`](Self::run), but stops tracking when `cancel` fires
    pub async fn run_until(
        &self,
        kind: ImportKind,
        path: &Path,
        cancel: CancellationToken,
    ) -> Result<ImportSummary, ImportError> {
        let kind_label = kind.label();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let local_estimate = tokio::fs::metadata(path)
            .await
            .ok()
            .and_then(|m| estimate_rows(path, m.len()));

        let outcome = match self.client.submit_upload(&kind, path).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(kind = kind.label(), file = %file_name, "{}", describe_submission_error(&e));
                return Err(e);
            }
        };

        let result = match outcome {
            UploadOutcome::Sync(result) => {
                self.bus.publish(
                    &kind,
                    ImportEventPayload::CompletedInline {
                        result: result.clone(),
                    },
                );
                Ok(ImportSummary::from_sync(kind, file_name.clone(), result))
            }
            UploadOutcome::Async {
                job_id,
                estimated_row_count,
            } => {
                self.bus.publish(
                    &kind,
                    ImportEventPayload::Accepted {
                        job_id: job_id.clone(),
                        estimated_rows: estimated_row_count.or(local_estimate),
                    },
                );
                self.track(kind, file_name.clone(), job_id, cancel).await
            }
        };

        self.record(kind_label, &file_name, &result);
        result
    }

    /// Poll `job_id` until it finishes or the poller gives up
    async fn track(
        &self,
        kind: ImportKind,
        file_name: String,
        job_id: String,
        cancel: CancellationToken,
    ) -> Result<ImportSummary, ImportError> {
        // Subscribe before starting so the first snapshot cannot be missed
        let mut rx = self.bus.subscribe();
        let endpoint = self.client.status_endpoint(kind.clone());
        let poller = JobPoller::new(
            Arc::new(endpoint),
            Arc::new(self.bus.observer(kind.clone())),
            self.settings,
        );
        poller.start(job_id.clone());

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    poller.stop();
                    info!(job_id = %job_id, "Import tracking cancelled");
                    return Err(ImportError::Aborted {
                        job_id,
                        reason: "cancelled".to_string(),
                    });
                }
                event = rx.recv() => event,
            };

            let event = match event {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Import event receiver lagged");
                    continue;
                }
                Err(RecvError::Closed) => {
                    return Err(ImportError::Other("Import event bus closed".to_string()));
                }
            };

            if event.kind != kind || event.job_id() != Some(job_id.as_str()) {
                continue;
            }

            match event.payload {
                ImportEventPayload::Progress { status } if status.is_terminal() => {
                    return Ok(ImportSummary::from_job(kind, file_name, status));
                }
                ImportEventPayload::Aborted { reason, .. } => {
                    return Err(ImportError::Aborted { job_id, reason });
                }
                _ => {}
            }
        }
    }

    fn record(
        &self,
        kind_label: &str,
        file_name: &str,
        result: &Result<ImportSummary, ImportError>,
    ) {
        let Some(history_path) = &self.history_path else {
            return;
        };

        let record = match result {
            Ok(summary) => ImportRecord {
                id: Uuid::new_v4(),
                timestamp: chrono::Utc::now(),
                kind: kind_label.to_string(),
                file_name: file_name.to_string(),
                job_id: summary.job_id.clone(),
                result: if summary.succeeded() {
                    ImportResultKind::Completed
                } else {
                    ImportResultKind::Failed
                },
                success_count: summary.success_count,
                error_count: summary.error_count,
                message: summary.message.clone(),
            },
            Err(ImportError::Aborted { job_id, reason }) => ImportRecord {
                id: Uuid::new_v4(),
                timestamp: chrono::Utc::now(),
                kind: kind_label.to_string(),
                file_name: file_name.to_string(),
                job_id: Some(job_id.clone()),
                result: ImportResultKind::Aborted,
                success_count: 0,
                error_count: 0,
                message: Some(reason.clone()),
            },
            Err(_) => return,
        };

        if let Err(e) = append_history_entry(history_path, &record) {
            warn!(error = %e, "Failed to write import history");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_estimate_rows() {
        assert_eq!(estimate_rows(&PathBuf::from("a.csv"), 12_000), Some(100));
        assert_eq!(estimate_rows(&PathBuf::from("a.XLSX"), 4_000), Some(100));
        assert_eq!(estimate_rows(&PathBuf::from("a.xls"), 10), Some(1));
        assert_eq!(estimate_rows(&PathBuf::from("a.csv"), 0), None);
        assert_eq!(estimate_rows(&PathBuf::from("a.txt"), 5_000), None);
    }

    #[test]
    fn test_summary_from_sync() {
        let summary = ImportSummary::from_sync(
            ImportKind::Sites,
            "s.csv".to_string(),
            SyncResult {
                created: 10,
                linked: 4,
                skipped: 2,
                error_count: 1,
                errors: vec![RowError {
                    row: Some(3),
                    message: "duplicate".to_string(),
                    field: None,
                }],
            },
        );
        assert!(summary.succeeded());
        assert_eq!(summary.success_count, 14);
        assert_eq!(summary.skipped, 2);
        assert!(summary.job_id.is_none());
    }

    #[test]
    fn test_summary_from_sync_saturates() {
        let summary = ImportSummary::from_sync(
            ImportKind::Sites,
            "s.csv".to_string(),
            SyncResult {
                created: u64::MAX,
                linked: 3,
                ..SyncResult::default()
            },
        );
        assert_eq!(summary.success_count, u64::MAX);
    }

    #[test]
    fn test_failed_summary_into_result() {
        let summary = ImportSummary {
            kind: ImportKind::Inventory,
            file_name: "inv.xlsx".to_string(),
            job_id: Some("77".to_string()),
            state: JobState::Failed,
            success_count: 0,
            skipped: 0,
            error_count: 0,
            errors: Vec::new(),
            has_more_errors: false,
            message: Some("Sheet missing".to_string()),
        };

        match summary.into_result() {
            Err(ImportError::JobFailed { job_id, message }) => {
                assert_eq!(job_id, "77");
                assert_eq!(message, "Sheet missing");
            }
            other => panic!("expected job failure, got {:?}", other),
        }
    }
}
