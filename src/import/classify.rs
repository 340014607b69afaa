//! Error classification for upload and status requests.
//!
//! Client errors (4xx) mean the request itself is wrong and repeating it
//! will not help; server and network errors are transient.

use crate::error::ImportError;

/// Error classification for wording and logging request failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// Client errors (400-499) - invalid input or auth, not transient
    Client,
    /// Server errors (500-599) - temporary issues
    Server,
    /// Network errors - connection issues, timeouts
    Network,
}

/// Classify an error by HTTP status when there is one, by message otherwise
pub fn classify_error(err: &ImportError) -> ErrorType {
    match err.status_code() {
        Some(code) if (400..500).contains(&code) => ErrorType::Client,
        Some(code) if code >= 500 => ErrorType::Server,
        _ => match err {
            ImportError::Validation(_) | ImportError::Config(_) | ImportError::Decode(_) => {
                ErrorType::Client
            }
            _ => ErrorType::Network,
        },
    }
}

/// User-facing wording for a failed upload submission
pub fn describe_submission_error(err: &ImportError) -> String {
    match (classify_error(err), err.status_code()) {
        (_, Some(401)) | (_, Some(403)) => {
            "Upload rejected: you are not authorized for this tenant. Sign in again and retry."
                .to_string()
        }
        (_, Some(413)) => "Upload rejected: the file is too large for the server.".to_string(),
        (ErrorType::Client, _) => format!("Upload rejected: {}", err),
        (ErrorType::Server, _) => {
            format!("The server could not accept the upload right now: {}", err)
        }
        (ErrorType::Network, _) => format!("Could not reach the server: {}", err),
    }
}

/// User-facing wording for any error that ended an import run
///
/// Job failures and client-side aborts already read well; everything else
/// happened while submitting the upload.
pub fn describe_import_error(err: &ImportError) -> String {
    match err {
        ImportError::JobFailed { .. } | ImportError::Aborted { .. } => err.to_string(),
        _ => describe_submission_error(err),
    }
}
