use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::import::{ImportKind, JobStatus, SyncResult};

/// Sequence number for ordering events
pub type EventSequence = u64;

/// One step of an import, in the order it happened
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportEvent {
    pub sequence: EventSequence,
    pub timestamp: DateTime<Utc>,
    pub kind: ImportKind,
    pub payload: ImportEventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImportEventPayload {
    /// The server took the upload as a background job
    Accepted {
        job_id: String,
        estimated_rows: Option<u64>,
    },

    /// The server processed the upload inline
    CompletedInline { result: SyncResult },

    /// Latest snapshot of a background job (intermediate or terminal)
    Progress { status: JobStatus },

    /// The client stopped tracking before the job finished
    Aborted { job_id: String, reason: String },
}

impl ImportEvent {
    pub fn job_id(&self) -> Option<&str> {
        match &self.payload {
            ImportEventPayload::Accepted { job_id, .. } => Some(job_id),
            ImportEventPayload::Progress { status } => Some(&status.job_id),
            ImportEventPayload::Aborted { job_id, .. } => Some(job_id),
            ImportEventPayload::CompletedInline { .. } => None,
        }
    }

    pub fn payload_type(&self) -> &str {
        match &self.payload {
            ImportEventPayload::Accepted { .. } => "accepted",
            ImportEventPayload::CompletedInline { .. } => "completed_inline",
            ImportEventPayload::Progress { .. } => "progress",
            ImportEventPayload::Aborted { .. } => "aborted",
        }
    }

    /// True when nothing further will be published for this import
    pub fn is_final(&self) -> bool {
        match &self.payload {
            ImportEventPayload::Accepted { .. } => false,
            ImportEventPayload::CompletedInline { .. } => true,
            ImportEventPayload::Progress { status } => status.is_terminal(),
            ImportEventPayload::Aborted { .. } => true,
        }
    }
}
