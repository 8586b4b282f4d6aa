//! Append-only CSV persistence for `HttpResult` / `ScanResult` rows (§3, §6).
//! The history file is the sole source of truth across process restarts; a
//! per-file mutex serializes writers, and a header is written only when the
//! file starts out empty (§3 invariant 6).

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

use super::types::{HttpResult, ScanResult};
use crate::config::HistoryConfig;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("background task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub struct HistoryStore {
    http_path: PathBuf,
    scan_path: PathBuf,
    http_lock: Mutex<()>,
    scan_lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(config: &HistoryConfig, working_dir: &Path) -> Self {
        Self {
            http_path: working_dir.join(&config.http_history_path),
            scan_path: working_dir.join(&config.scan_history_path),
            http_lock: Mutex::new(()),
            scan_lock: Mutex::new(()),
        }
    }

    pub async fn append_http_results(&self, rows: &[HttpResult]) -> Result<(), HistoryError> {
        let _guard = self.http_lock.lock().await;
        append_csv(self.http_path.clone(), rows.to_vec()).await
    }

    pub async fn load_http_results(&self) -> Result<Vec<HttpResult>, HistoryError> {
        let _guard = self.http_lock.lock().await;
        read_csv(self.http_path.clone()).await
    }

    pub async fn clear_http_history(&self) -> Result<(), HistoryError> {
        let _guard = self.http_lock.lock().await;
        clear_file(self.http_path.clone()).await
    }

    pub async fn append_scan_results(&self, rows: &[ScanResult]) -> Result<(), HistoryError> {
        let _guard = self.scan_lock.lock().await;
        append_csv(self.scan_path.clone(), rows.to_vec()).await
    }

    pub async fn load_scan_results(&self) -> Result<Vec<ScanResult>, HistoryError> {
        let _guard = self.scan_lock.lock().await;
        read_csv(self.scan_path.clone()).await
    }

    pub async fn clear_scan_history(&self) -> Result<(), HistoryError> {
        let _guard = self.scan_lock.lock().await;
        clear_file(self.scan_path.clone()).await
    }
}

async fn append_csv<T>(path: PathBuf, rows: Vec<T>) -> Result<(), HistoryError>
where
    T: Serialize + Send + 'static,
{
    tokio::task::spawn_blocking(move || -> Result<(), HistoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let write_header = !path.exists() || std::fs::metadata(&path)?.len() == 0;

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(write_header)
            .from_writer(file);

        for row in &rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    })
    .await?
}

async fn read_csv<T>(path: PathBuf) -> Result<Vec<T>, HistoryError>
where
    T: DeserializeOwned + Send + 'static,
{
    tokio::task::spawn_blocking(move || -> Result<Vec<T>, HistoryError> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(&path)?;
        let mut rows = Vec::new();
        for record in reader.deserialize() {
            rows.push(record?);
        }
        Ok(rows)
    })
    .await?
}

async fn clear_file(path: PathBuf) -> Result<(), HistoryError> {
    tokio::task::spawn_blocking(move || -> Result<(), HistoryError> {
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    })
    .await?
}
