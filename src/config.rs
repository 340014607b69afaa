use crate::error::ImportError;
use crate::import::PollSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 3;
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 100;
pub const DEFAULT_MAX_POLL_DURATION_SECS: u64 = 30 * 60;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

const ENV_SERVER_URL: &str = "BULK_IMPORT_SERVER_URL";
const ENV_API_KEY: &str = "BULK_IMPORT_API_KEY";
const ENV_TENANT_ID: &str = "BULK_IMPORT_TENANT_ID";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(rename = "serverUrl")]
    pub server_url: Option<String>,
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
    #[serde(rename = "tenantId")]
    pub tenant_id: Option<String>,
    #[serde(rename = "pollIntervalSecs", default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(rename = "maxPollAttempts", default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    #[serde(rename = "maxPollDurationSecs", default = "default_max_poll_duration_secs")]
    pub max_poll_duration_secs: u64,
    #[serde(rename = "requestTimeoutSecs", default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(rename = "maxUploadBytes", default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_max_poll_attempts() -> u32 {
    DEFAULT_MAX_POLL_ATTEMPTS
}

fn default_max_poll_duration_secs() -> u64 {
    DEFAULT_MAX_POLL_DURATION_SECS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_max_upload_bytes() -> u64 {
    DEFAULT_MAX_UPLOAD_BYTES
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            api_key: None,
            tenant_id: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            max_poll_duration_secs: DEFAULT_MAX_POLL_DURATION_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl ImportConfig {
    /// Poller cadence and safety limits derived from this config
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            max_attempts: self.max_poll_attempts.max(1),
            max_duration: Duration::from_secs(self.max_poll_duration_secs.max(1)),
        }
    }

    /// Server URL with any trailing slash removed
    pub fn require_server_url(&self) -> Result<String, ImportError> {
        let raw = self
            .server_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ImportError::Config("No server URL configured".to_string()))?;

        url::Url::parse(raw)
            .map_err(|e| ImportError::Config(format!("Invalid server URL '{}': {}", raw, e)))?;

        Ok(raw.trim_end_matches('/').to_string())
    }

    /// Apply BULK_IMPORT_* environment overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty(ENV_SERVER_URL) {
            self.server_url = Some(v);
        }
        if let Some(v) = non_empty(ENV_API_KEY) {
            self.api_key = Some(v);
        }
        if let Some(v) = non_empty(ENV_TENANT_ID) {
            self.tenant_id = Some(v);
        }
    }
}

pub fn get_config_dir() -> Result<PathBuf, ImportError> {
    dirs::home_dir()
        .map(|home_dir| home_dir.join(".bulkimport"))
        .ok_or_else(|| ImportError::Config("Could not find home directory".to_string()))
}

pub fn get_config_file_path() -> Result<PathBuf, ImportError> {
    Ok(get_config_dir()?.join("config.json"))
}

pub fn get_logs_dir() -> Result<PathBuf, ImportError> {
    Ok(get_config_dir()?.join("logs"))
}

/// Create a directory readable only by the owner
fn ensure_private_dir(dir: &Path) -> Result<(), ImportError> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;

        // Set permissions to 700 (read/write/execute for owner only) on Unix systems
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut permissions = fs::metadata(dir)?.permissions();
            permissions.set_mode(0o700);
            fs::set_permissions(dir, permissions)?;
        }
    }
    Ok(())
}

pub fn ensure_config_dir() -> Result<(), ImportError> {
    ensure_private_dir(&get_config_dir()?)
}

pub fn ensure_logs_dir() -> Result<(), ImportError> {
    ensure_private_dir(&get_logs_dir()?)
}

/// Load the config from the default location, with environment overrides applied
pub fn load_config() -> Result<ImportConfig, ImportError> {
    ensure_config_dir()?;
    let mut config = load_config_from(&get_config_file_path()?)?;
    config.apply_env_overrides();
    Ok(config)
}

pub fn load_config_from(config_file: &Path) -> Result<ImportConfig, ImportError> {
    if config_file.exists() {
        let content = fs::read_to_string(config_file)?;
        let config: ImportConfig = serde_json::from_str(&content)?;
        Ok(config)
    } else {
        Ok(ImportConfig::default())
    }
}

pub fn save_config(config: &ImportConfig) -> Result<(), ImportError> {
    ensure_config_dir()?;
    save_config_to(config, &get_config_file_path()?)
}

pub fn save_config_to(config: &ImportConfig, config_file: &Path) -> Result<(), ImportError> {
    if let Some(parent) = config_file.parent() {
        ensure_private_dir(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    fs::write(config_file, content)?;

    // Set permissions to 600 (read/write for owner only) on Unix systems
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = fs::metadata(config_file)?.permissions();
        permissions.set_mode(0o600);
        fs::set_permissions(config_file, permissions)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config_from(&dir.path().join("config.json")).unwrap();

        assert!(config.server_url.is_none());
        assert_eq!(config.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert_eq!(config.max_poll_attempts, 100);
        assert_eq!(config.max_poll_duration_secs, 1800);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"serverUrl":"https://ops.example.com","tenantId":"t-1","pollIntervalSecs":5}"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.server_url.as_deref(), Some("https://ops.example.com"));
        assert_eq!(config.tenant_id.as_deref(), Some("t-1"));
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.max_poll_attempts, DEFAULT_MAX_POLL_ATTEMPTS);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = ImportConfig {
            server_url: Some("https://ops.example.com".to_string()),
            api_key: Some("secret".to_string()),
            ..ImportConfig::default()
        };
        save_config_to(&config, &path).unwrap();

        let reloaded = load_config_from(&path).unwrap();
        assert_eq!(reloaded.api_key.as_deref(), Some("secret"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ImportConfig {
            server_url: Some("https://old.example.com".to_string()),
            ..ImportConfig::default()
        };

        config.apply_overrides(|key| match key {
            ENV_SERVER_URL => Some("https://new.example.com".to_string()),
            ENV_API_KEY => Some("   ".to_string()),
            ENV_TENANT_ID => Some("tenant-9".to_string()),
            _ => None,
        });

        assert_eq!(config.server_url.as_deref(), Some("https://new.example.com"));
        assert!(config.api_key.is_none());
        assert_eq!(config.tenant_id.as_deref(), Some("tenant-9"));
    }

    #[test]
    fn test_require_server_url() {
        let mut config = ImportConfig::default();
        assert!(matches!(
            config.require_server_url(),
            Err(ImportError::Config(_))
        ));

        config.server_url = Some("not a url".to_string());
        assert!(config.require_server_url().is_err());

        config.server_url = Some("https://ops.example.com/".to_string());
        assert_eq!(config.require_server_url().unwrap(), "https://ops.example.com");
    }

    #[test]
    fn test_poll_settings_never_zero() {
        let config = ImportConfig {
            poll_interval_secs: 0,
            max_poll_attempts: 0,
            max_poll_duration_secs: 0,
            ..ImportConfig::default()
        };
        let settings = config.poll_settings();
        assert_eq!(settings.interval, Duration::from_secs(1));
        assert_eq!(settings.max_attempts, 1);
        assert_eq!(settings.max_duration, Duration::from_secs(1));
    }
}
