use thiserror::Error;

/// Bulk import client errors
#[derive(Debug, Error)]
pub enum ImportError {
    /// Configuration file errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors (file type, size, etc.)
    #[error("Validation error: {0}")]
    Validation(String),

    /// The server answered with a non-success status
    #[error("Request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    /// The server answered with a body we could not understand
    #[error("Unexpected response: {0}")]
    Decode(String),

    /// The server-side job reached the failed state
    #[error("Import job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    /// Client-side safety abort; the job may still be running on the server
    #[error("Stopped tracking import job {job_id}: {reason}. Please refresh to check status.")]
    Aborted { job_id: String, reason: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl ImportError {
    /// HTTP status code carried by the error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ImportError::Status { status, .. } => Some(*status),
            ImportError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl From<ImportError> for String {
    fn from(err: ImportError) -> String {
        err.to_string()
    }
}

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn context(self, msg: &str) -> Result<T, ImportError>;
}

impl<T, E: Into<ImportError>> ErrorContext<T> for Result<T, E> {
    fn context(self, msg: &str) -> Result<T, ImportError> {
        self.map_err(|e| match e.into() {
            ImportError::Other(s) => ImportError::Other(format!("{}: {}", msg, s)),
            ImportError::Config(s) => ImportError::Config(format!("{}: {}", msg, s)),
            ImportError::Validation(s) => ImportError::Validation(format!("{}: {}", msg, s)),
            ImportError::Decode(s) => ImportError::Decode(format!("{}: {}", msg, s)),
            other => other,
        })
    }
}
