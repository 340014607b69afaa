use crate::config::{ensure_logs_dir, get_logs_dir};
use crate::error::ImportError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};
use tracing::warn;
use tracing_subscriber::{
    fmt::{self},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};
use uuid::Uuid;

const HISTORY_FILE_NAME: &str = "imports.log";
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024; // 10MB
const MAX_BACKUPS: u32 = 5;

/// How an import ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportResultKind {
    Completed,
    Failed,
    Aborted,
}

/// One finished import, as written to the history log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub file_name: String,
    pub job_id: Option<String>,
    pub result: ImportResultKind,
    pub success_count: u64,
    pub error_count: u64,
    pub message: Option<String>,
}

static LOGGER_INITIALIZED: std::sync::Once = std::sync::Once::new();

// Keep the guard alive for the lifetime of the program
static FILE_APPENDER_GUARD: LazyLock<Mutex<Option<tracing_appender::non_blocking::WorkerGuard>>> =
    LazyLock::new(|| Mutex::new(None));

pub fn init_logging() -> Result<(), ImportError> {
    ensure_logs_dir()?;
    let logs_dir = get_logs_dir()?;

    LOGGER_INITIALIZED.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // Console output goes to stderr so progress lines on stdout stay clean
        let console_layer = fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_filter(env_filter.clone());

        let file_appender = tracing_appender::rolling::never(&logs_dir, "app.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if let Ok(mut guard_mutex) = FILE_APPENDER_GUARD.lock() {
            *guard_mutex = Some(guard);
        }

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_filter(env_filter);

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .init();
    });

    Ok(())
}

pub fn get_history_path() -> Result<PathBuf, ImportError> {
    Ok(get_logs_dir()?.join(HISTORY_FILE_NAME))
}

/// Read the default history log, newest first
pub fn read_import_history(max_entries: Option<usize>) -> Result<Vec<ImportRecord>, ImportError> {
    read_history_from(&get_history_path()?, max_entries)
}

pub fn append_history_entry(log_file_path: &Path, record: &ImportRecord) -> Result<(), ImportError> {
    if should_rotate_log(log_file_path)? {
        rotate_log_file(log_file_path)?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)?;

    let json_line = serde_json::to_string(record)?;
    writeln!(file, "{}", json_line)?;
    file.flush()?;

    Ok(())
}

pub fn read_history_from(
    log_file_path: &Path,
    max_entries: Option<usize>,
) -> Result<Vec<ImportRecord>, ImportError> {
    if !log_file_path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(log_file_path)?);
    let mut entries = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ImportRecord>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(line = index + 1, error = %e, "Skipping unreadable history entry"),
        }
    }

    // Newest first
    entries.reverse();

    if let Some(max) = max_entries {
        entries.truncate(max);
    }

    Ok(entries)
}

fn should_rotate_log(log_file_path: &Path) -> Result<bool, ImportError> {
    if !log_file_path.exists() {
        return Ok(false);
    }

    Ok(std::fs::metadata(log_file_path)?.len() > MAX_LOG_SIZE)
}

fn rotate_log_file(log_file_path: &Path) -> Result<(), ImportError> {
    // Shift existing backups up by one (4 -> 5, 3 -> 4, ...); the oldest falls off
    for i in (1..MAX_BACKUPS).rev() {
        let current_backup = log_file_path.with_extension(format!("log.{}", i));
        let next_backup = log_file_path.with_extension(format!("log.{}", i + 1));

        if current_backup.exists() {
            std::fs::rename(&current_backup, &next_backup)?;
        }
    }

    if log_file_path.exists() {
        std::fs::rename(log_file_path, log_file_path.with_extension("log.1"))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(file_name: &str, result: ImportResultKind) -> ImportRecord {
        ImportRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind: "sites".to_string(),
            file_name: file_name.to_string(),
            job_id: Some("42".to_string()),
            result,
            success_count: 95,
            error_count: 5,
            message: None,
        }
    }

    #[test]
    fn test_log_rotation() {
        let temp_dir = tempdir().unwrap();
        let log_file = temp_dir.path().join("imports.log");

        {
            let mut file = File::create(&log_file).unwrap();
            let large_content = "x".repeat(11 * 1024 * 1024); // 11MB
            file.write_all(large_content.as_bytes()).unwrap();
        }

        assert!(should_rotate_log(&log_file).unwrap());

        rotate_log_file(&log_file).unwrap();

        assert!(log_file.with_extension("log.1").exists());
        assert!(!log_file.exists());
    }

    #[test]
    fn test_append_rotates_oversized_log() {
        let temp_dir = tempdir().unwrap();
        let log_file = temp_dir.path().join("imports.log");
        std::fs::write(&log_file, "x".repeat(11 * 1024 * 1024)).unwrap();

        append_history_entry(&log_file, &record("a.csv", ImportResultKind::Completed)).unwrap();

        assert!(log_file.with_extension("log.1").exists());
        let entries = read_history_from(&log_file, None).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_history_newest_first_and_limited() {
        let temp_dir = tempdir().unwrap();
        let log_file = temp_dir.path().join("imports.log");

        let first = record("first.csv", ImportResultKind::Completed);
        let second = record("second.xlsx", ImportResultKind::Failed);
        let third = record("third.csv", ImportResultKind::Aborted);
        for r in [&first, &second, &third] {
            append_history_entry(&log_file, r).unwrap();
        }

        let entries = read_history_from(&log_file, None).unwrap();
        assert_eq!(entries, vec![third.clone(), second, first]);

        let limited = read_history_from(&log_file, Some(1)).unwrap();
        assert_eq!(limited, vec![third]);
    }

    #[test]
    fn test_history_skips_garbage_lines() {
        let temp_dir = tempdir().unwrap();
        let log_file = temp_dir.path().join("imports.log");
        std::fs::write(&log_file, "not json\n\n").unwrap();
        append_history_entry(&log_file, &record("ok.csv", ImportResultKind::Completed)).unwrap();

        let entries = read_history_from(&log_file, None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file_name, "ok.csv");
    }

    #[test]
    fn test_missing_history_is_empty() {
        let temp_dir = tempdir().unwrap();
        let entries = read_history_from(&temp_dir.path().join("none.log"), Some(10)).unwrap();
        assert!(entries.is_empty());
    }
}
