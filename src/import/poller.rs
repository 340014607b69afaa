//! Job poller for asynchronous bulk imports.
//!
//! One poller tracks at most one job. `start` supersedes whatever was being
//! tracked; `stop` (or dropping the poller) cancels the interval and deadline
//! timers together. Observer callbacks are delivered while holding the
//! poller's state lock and only if the delivering task still owns the active
//! generation, so once `stop`/`start` returns no callback from the previous
//! job can fire. Observers must not call back into the same poller.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::JobStatusSource;
use super::types::JobStatus;
use crate::config::{
    DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_MAX_POLL_DURATION_SECS, DEFAULT_POLL_INTERVAL_SECS,
};

/// Cadence and safety limits for one tracked job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Fixed delay between a completed fetch and the next one
    pub interval: Duration,
    /// Poll ceiling
    pub max_attempts: u32,
    /// Wall-clock deadline measured from `start`
    pub max_duration: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            max_duration: Duration::from_secs(DEFAULT_MAX_POLL_DURATION_SECS),
        }
    }
}

/// Fatal reasons the poller gave up on a job that had not finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    PollLimitExceeded { attempts: u32 },
    Timeout { elapsed: Duration },
}

impl fmt::Display for PollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollError::PollLimitExceeded { attempts } => {
                write!(f, "poll limit exceeded after {} attempts", attempts)
            }
            PollError::Timeout { elapsed } => {
                write!(f, "timed out after {}s", elapsed.as_secs())
            }
        }
    }
}

impl std::error::Error for PollError {}

/// Receives snapshots and fatal errors for the active job
pub trait PollObserver: Send + Sync {
    /// Every successful poll, including the final terminal snapshot
    fn on_update(&self, snapshot: &JobStatus);

    /// Poll ceiling or deadline reached; polling has stopped
    fn on_error(&self, job_id: &str, error: &PollError);
}

/// Observer built from two closures
pub struct FnObserver<U, E> {
    on_update: U,
    on_error: E,
}

impl<U, E> FnObserver<U, E>
where
    U: Fn(&JobStatus) + Send + Sync,
    E: Fn(&str, &PollError) + Send + Sync,
{
    pub fn new(on_update: U, on_error: E) -> Self {
        Self {
            on_update,
            on_error,
        }
    }
}

impl<U, E> PollObserver for FnObserver<U, E>
where
    U: Fn(&JobStatus) + Send + Sync,
    E: Fn(&str, &PollError) + Send + Sync,
{
    fn on_update(&self, snapshot: &JobStatus) {
        (self.on_update)(snapshot)
    }

    fn on_error(&self, job_id: &str, error: &PollError) {
        (self.on_error)(job_id, error)
    }
}

struct ActiveJob {
    job_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct PollerState {
    generation: u64,
    active: Option<ActiveJob>,
}

impl PollerState {
    /// Release the active job; no-op when idle
    fn release(&mut self) -> Option<String> {
        let active = self.active.take()?;
        self.generation += 1;
        active.cancel.cancel();
        active.handle.abort();
        Some(active.job_id)
    }
}

fn lock(state: &Mutex<PollerState>) -> MutexGuard<'_, PollerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct JobPoller {
    source: Arc<dyn JobStatusSource>,
    observer: Arc<dyn PollObserver>,
    settings: PollSettings,
    state: Arc<Mutex<PollerState>>,
}

impl fmt::Debug for JobPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobPoller")
            .field("source", &"<job status source>")
            .field("observer", &"<observer>")
            .field("settings", &self.settings)
            .field("active_job", &self.active_job())
            .finish()
    }
}

impl JobPoller {
    pub fn new(
        source: Arc<dyn JobStatusSource>,
        observer: Arc<dyn PollObserver>,
        settings: PollSettings,
    ) -> Self {
        Self {
            source,
            observer,
            settings,
            state: Arc::new(Mutex::new(PollerState::default())),
        }
    }

    /// Begin tracking `job_id`, superseding any active job
    ///
    /// The first fetch is issued immediately. Must be called from within a
    /// Tokio runtime.
    pub fn start(&self, job_id: impl Into<String>) {
        let job_id = job_id.into();
        let mut state = lock(&self.state);

        if let Some(previous) = state.release() {
            info!(job_id = %previous, next = %job_id, "Superseding active import job");
        }

        state.generation += 1;
        let cancel = CancellationToken::new();
        let task = PollTask {
            job_id: job_id.clone(),
            generation: state.generation,
            source: Arc::clone(&self.source),
            observer: Arc::clone(&self.observer),
            settings: self.settings,
            cancel: cancel.clone(),
            state: Arc::clone(&self.state),
        };

        info!(job_id = %job_id, interval_secs = self.settings.interval.as_secs(), "Polling import job");
        let handle = tokio::spawn(task.run());

        state.active = Some(ActiveJob {
            job_id,
            cancel,
            handle,
        });
    }

    /// Cancel any pending fetch and both timers. Idempotent.
    pub fn stop(&self) {
        if let Some(job_id) = lock(&self.state).release() {
            info!(job_id = %job_id, "Stopped polling import job");
        }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.state).active.is_some()
    }

    pub fn active_job(&self) -> Option<String> {
        lock(&self.state)
            .active
            .as_ref()
            .map(|active| active.job_id.clone())
    }
}

impl Drop for JobPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PollTask {
    job_id: String,
    generation: u64,
    source: Arc<dyn JobStatusSource>,
    observer: Arc<dyn PollObserver>,
    settings: PollSettings,
    cancel: CancellationToken,
    state: Arc<Mutex<PollerState>>,
}

impl PollTask {
    async fn run(self) {
        let _release = ReleaseOnExit { task: &self };
        let started = Instant::now();
        // Unarmed when the configured duration runs past what Instant can hold
        let deadline = started.checked_add(self.settings.max_duration);
        let mut attempts: u32 = 0;

        loop {
            attempts = attempts.saturating_add(1);

            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = deadline_reached(deadline) => {
                    self.fail(PollError::Timeout { elapsed: started.elapsed() });
                    return;
                }
                result = self.source.fetch_status(&self.job_id) => result,
            };

            match fetched {
                Ok(snapshot) if snapshot.job_id != self.job_id => {
                    warn!(
                        job_id = %self.job_id,
                        reported = %snapshot.job_id,
                        "Discarding status reported for a different job"
                    );
                }
                Ok(snapshot) => {
                    if !self.deliver(&snapshot) || snapshot.is_terminal() {
                        return;
                    }
                }
                Err(e) => {
                    // Transient: skip this tick and try again on the next one
                    warn!(
                        job_id = %self.job_id,
                        attempt = attempts,
                        error = %e,
                        "Job status check failed, retrying on next tick"
                    );
                }
            }

            if attempts >= self.settings.max_attempts {
                self.fail(PollError::PollLimitExceeded { attempts });
                return;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = deadline_reached(deadline) => {
                    self.fail(PollError::Timeout { elapsed: started.elapsed() });
                    return;
                }
                _ = sleep(self.settings.interval) => {}
            }
        }
    }

    /// Hand a snapshot to the observer; false when this task was superseded
    fn deliver(&self, snapshot: &JobStatus) -> bool {
        let mut state = lock(&self.state);
        if state.generation != self.generation {
            debug!(job_id = %self.job_id, "Discarding stale job status");
            return false;
        }

        debug!(
            job_id = %self.job_id,
            state = %snapshot.state,
            processed = snapshot.processed_rows,
            total = snapshot.total_rows,
            "Job status"
        );
        self.observer.on_update(snapshot);

        if snapshot.is_terminal() {
            info!(job_id = %self.job_id, state = %snapshot.state, "Import job finished");
            self.finish(&mut state);
        }
        true
    }

    fn fail(&self, error: PollError) {
        let mut state = lock(&self.state);
        if state.generation != self.generation {
            return;
        }

        warn!(job_id = %self.job_id, error = %error, "Gave up polling import job");
        self.observer.on_error(&self.job_id, &error);
        self.finish(&mut state);
    }

    /// Mark the poller idle from inside the task; the handle is just detached
    fn finish(&self, state: &mut PollerState) {
        state.generation += 1;
        if let Some(active) = state.active.take() {
            active.cancel.cancel();
        }
    }
}

/// Releases the active job if the task ends while still owning it (a panic
/// in the source or observer), so the poller never reports a dead job as active
struct ReleaseOnExit<'a> {
    task: &'a PollTask,
}

impl Drop for ReleaseOnExit<'_> {
    fn drop(&mut self) {
        let mut state = lock(&self.task.state);
        if state.generation == self.task.generation {
            warn!(job_id = %self.task.job_id, "Poll task ended unexpectedly");
            self.task.finish(&mut state);
        }
    }
}

async fn deadline_reached(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
