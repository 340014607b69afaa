//! Bulk import: upload submission, job status polling and the runner that
//! ties them together.

mod classify;
mod client;
mod poller;
mod runner;
mod types;
mod wire;

pub use classify::{classify_error, describe_import_error, describe_submission_error, ErrorType};
pub use client::{ImportClient, JobStatusSource, StatusEndpoint, TENANT_HEADER};
pub use poller::{FnObserver, JobPoller, PollError, PollObserver, PollSettings};
pub use runner::{estimate_rows, ImportRunner, ImportSummary};
pub use types::*;
