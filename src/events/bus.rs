use super::types::{EventSequence, ImportEvent, ImportEventPayload};
use crate::import::{ImportKind, JobStatus, PollError, PollObserver};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

pub type EventReceiver = broadcast::Receiver<ImportEvent>;
pub type EventSender = broadcast::Sender<ImportEvent>;

/// Event bus for distributing import progress
#[derive(Clone, Debug)]
pub struct ImportEventBus {
    sender: EventSender,
    sequence: Arc<AtomicU64>,
}

impl ImportEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Publish an event (returns sequence number)
    ///
    /// Publishing with no subscribers is not an error; the event is dropped.
    pub fn publish(&self, kind: &ImportKind, payload: ImportEventPayload) -> EventSequence {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        let event = ImportEvent {
            sequence,
            timestamp: Utc::now(),
            kind: kind.clone(),
            payload,
        };

        if self.sender.send(event).is_err() {
            debug!(sequence, "No subscribers for import event");
        }
        sequence
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Get current sequence number
    pub fn current_sequence(&self) -> EventSequence {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Get number of active receivers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Poll observer that republishes callbacks for `kind` on this bus
    pub fn observer(&self, kind: ImportKind) -> BusObserver {
        BusObserver {
            bus: self.clone(),
            kind,
        }
    }
}

/// Bridges poller callbacks onto an [`ImportEventBus`]
pub struct BusObserver {
    bus: ImportEventBus,
    kind: ImportKind,
}

impl PollObserver for BusObserver {
    fn on_update(&self, snapshot: &JobStatus) {
        self.bus.publish(
            &self.kind,
            ImportEventPayload::Progress {
                status: snapshot.clone(),
            },
        );
    }

    fn on_error(&self, job_id: &str, error: &PollError) {
        self.bus.publish(
            &self.kind,
            ImportEventPayload::Aborted {
                job_id: job_id.to_string(),
                reason: error.to_string(),
            },
        );
    }
}
