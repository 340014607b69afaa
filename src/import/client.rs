//! HTTP client for the import endpoints.
//!
//! Submits upload files as multipart and fetches job status snapshots.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::types::{ImportKind, JobStatus, UploadOutcome};
use super::wire::{RawJobStatus, RawUploadResponse};
use crate::config::ImportConfig;
use crate::error::{ErrorContext, ImportError};
use crate::validation::{file_extension, validate_import_file};

pub const TENANT_HEADER: &str = "X-Tenant-ID";

/// Where the poller gets job snapshots from
#[async_trait]
pub trait JobStatusSource: Send + Sync {
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatus, ImportError>;
}

#[derive(Debug, Clone)]
pub struct ImportClient {
    http: reqwest::Client,
    server_url: String,
    api_key: Option<String>,
    tenant_id: Option<String>,
    max_upload_bytes: u64,
}

impl ImportClient {
    pub fn from_config(config: &ImportConfig) -> Result<Self, ImportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            http,
            server_url: config.require_server_url()?,
            api_key: config.api_key.clone(),
            tenant_id: config.tenant_id.clone(),
            max_upload_bytes: config.max_upload_bytes,
        })
    }

    /// Upload `path` to the endpoint for `kind`
    ///
    /// The server answers inline for small files and with a job reference
    /// for large ones; both come back as an [`UploadOutcome`].
    pub async fn submit_upload(
        &self,
        kind: &ImportKind,
        path: &Path,
    ) -> Result<UploadOutcome, ImportError> {
        let (path, size) = validate_import_file(path, self.max_upload_bytes)?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("import.csv")
            .to_string();
        let bytes = tokio::fs::read(&path).await?;

        let part = Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str(mime_for(&path))?;
        let form = Form::new().part("file", part);

        let url = format!("{}{}", self.server_url, kind.upload_path());
        info!(kind = kind.label(), file = %file_name, size, "Submitting import upload");

        let response = self
            .authorize(self.http.post(&url))
            .multipart(form)
            .send()
            .await?;
        let response = check_status(response).await?;

        let raw: RawUploadResponse = response.json().await.map_err(|e| {
            ImportError::Decode(format!("Failed to parse upload response: {}", e))
        })?;
        let outcome = raw.into_outcome();

        match &outcome {
            UploadOutcome::Async { job_id, .. } => {
                info!(kind = kind.label(), job_id = %job_id, "Upload accepted as background job")
            }
            UploadOutcome::Sync(result) => info!(
                kind = kind.label(),
                created = result.created,
                errors = result.error_count,
                "Upload processed inline"
            ),
        }

        Ok(outcome)
    }

    /// Fetch one job status snapshot
    pub async fn fetch_job_status(
        &self,
        kind: &ImportKind,
        job_id: &str,
    ) -> Result<JobStatus, ImportError> {
        let url = format!("{}{}", self.server_url, kind.status_path(job_id));
        debug!(kind = kind.label(), job_id, "GET job status");

        let response = self.authorize(self.http.get(&url)).send().await?;
        let response = check_status(response).await?;

        let raw: RawJobStatus = response.json().await.map_err(|e| {
            ImportError::Decode(format!("Failed to parse job status response: {}", e))
        })?;
        raw.normalize(job_id)
            .context(&format!("Job {} status", job_id))
    }

    /// Bind this client to one import kind so it can feed a poller
    pub fn status_endpoint(&self, kind: ImportKind) -> StatusEndpoint {
        StatusEndpoint {
            client: self.clone(),
            kind,
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };
        match &self.tenant_id {
            Some(tenant) => request.header(TENANT_HEADER, tenant),
            None => request,
        }
    }
}

/// Job status endpoint of a single import kind
#[derive(Debug, Clone)]
pub struct StatusEndpoint {
    client: ImportClient,
    kind: ImportKind,
}

#[async_trait]
impl JobStatusSource for StatusEndpoint {
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatus, ImportError> {
        self.client.fetch_job_status(&self.kind, job_id).await
    }
}

async fn check_status(response: Response) -> Result<Response, ImportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(ImportError::Status {
        status: status.as_u16(),
        body,
    })
}

fn mime_for(path: &Path) -> &'static str {
    match file_extension(path).as_deref() {
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("xls") => "application/vnd.ms-excel",
        _ => "text/csv",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::types::JobState;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_client(server_url: &str) -> ImportClient {
        let config = ImportConfig {
            server_url: Some(server_url.to_string()),
            api_key: Some("test_token".to_string()),
            tenant_id: Some("tenant-1".to_string()),
            ..ImportConfig::default()
        };
        ImportClient::from_config(&config).unwrap()
    }

    fn write_csv(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("sites.csv");
        fs::write(&path, "site_id,name\nS1,Tower A\nS2,Tower B\n").unwrap();
        path
    }

    #[tokio::test]
    async fn test_submit_upload_async() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());
        let dir = TempDir::new().unwrap();

        Mock::given(method("POST"))
            .and(path("/api/sites/import/"))
            .and(header("Authorization", "Bearer test_token"))
            .and(header(TENANT_HEADER, "tenant-1"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "job_id": 42,
                "status": "processing",
                "total_rows": 5000
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let outcome = client
            .submit_upload(&ImportKind::Sites, &write_csv(&dir))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            UploadOutcome::Async {
                job_id: "42".to_string(),
                estimated_row_count: Some(5000)
            }
        );
    }

    #[tokio::test]
    async fn test_submit_upload_sync() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());
        let dir = TempDir::new().unwrap();

        Mock::given(method("POST"))
            .and(path("/api/inventory/import/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "created": 2,
                "skipped": 0,
                "error_count": 0,
                "errors": []
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let outcome = client
            .submit_upload(&ImportKind::Inventory, &write_csv(&dir))
            .await
            .unwrap();

        match outcome {
            UploadOutcome::Sync(result) => assert_eq!(result.created, 2),
            other => panic!("expected sync outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_submit_upload_server_error() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());
        let dir = TempDir::new().unwrap();

        Mock::given(method("POST"))
            .and(path("/api/sites/import/"))
            .respond_with(ResponseTemplate::new(400).set_body_string("missing column site_id"))
            .mount(&mock_server)
            .await;

        let err = client
            .submit_upload(&ImportKind::Sites, &write_csv(&dir))
            .await
            .unwrap_err();

        match err {
            ImportError::Status { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("site_id"));
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_submit_upload_validates_before_sending() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());
        let dir = TempDir::new().unwrap();
        let bad = dir.path().join("notes.txt");
        fs::write(&bad, "hello").unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let err = client
            .submit_upload(&ImportKind::Sites, &bad)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Validation(_)));
    }

    #[tokio::test]
    async fn test_fetch_job_status() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("GET"))
            .and(path("/api/projects/p-9/sites/import/status/42/"))
            .and(header("Authorization", "Bearer test_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "job_id": "42",
                "status": "processing",
                "processed_rows": 10,
                "total_rows": 100
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let endpoint = client.status_endpoint(ImportKind::ProjectSites {
            project_id: "p-9".to_string(),
        });
        let status = endpoint.fetch_status("42").await.unwrap();

        assert_eq!(status.state, JobState::Processing);
        assert_eq!(status.progress.percent(), Some(10));
    }

    #[tokio::test]
    async fn test_fetch_job_status_not_found() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("GET"))
            .and(path("/api/sites/import/status/missing/"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Job not found"))
            .mount(&mock_server)
            .await;

        let err = client
            .fetch_job_status(&ImportKind::Sites, "missing")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(404));
    }

    #[test]
    fn test_from_config_requires_server_url() {
        let err = ImportClient::from_config(&ImportConfig::default()).unwrap_err();
        assert!(matches!(err, ImportError::Config(_)));
    }
}
