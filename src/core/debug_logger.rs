//! Rolling JSON-lines debug log: a verbose diagnostics lane that mirrors
//! everything the Event Bus publishes (§4.1), independent of the WebSocket
//! `log` channel a client may or may not be connected to.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Local;
use flate2::{write::GzEncoder, Compression};
use fs2::FileExt;
use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

use crate::config::LogConfig;

const ROTATION_CHECK_INTERVAL: u32 = 200;

struct RotatingLogger {
    log_path: PathBuf,
    rotation_size_bytes: u64,
    max_archives: u32,
    write_count: AtomicU32,
}

impl RotatingLogger {
    fn new(log_path: PathBuf, rotation_size_mb: u64, max_archives: u32) -> Self {
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        Self {
            log_path,
            rotation_size_bytes: rotation_size_mb * 1024 * 1024,
            max_archives,
            write_count: AtomicU32::new(0),
        }
    }

    fn write_with_rotation(&self, json_line: &str) -> Result<(), std::io::Error> {
        if self.write_count.fetch_add(1, Ordering::Relaxed) % ROTATION_CHECK_INTERVAL == 0 {
            let _ = self.rotate_if_needed();
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        writeln!(file, "{}", json_line)?;
        Ok(())
    }

    fn rotate_if_needed(&self) -> Result<(), std::io::Error> {
        if !self.needs_rotation()? {
            return Ok(());
        }

        let lock_path = self.log_path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => {
                if self.needs_rotation()? {
                    self.perform_rotation()?;
                }
                let _ = std::fs::remove_file(&lock_path);
                Ok(())
            }
            Err(_) => Ok(()), // another process is rotating
        }
    }

    fn needs_rotation(&self) -> Result<bool, std::io::Error> {
        if !self.log_path.exists() {
            return Ok(false);
        }
        let metadata = std::fs::metadata(&self.log_path)?;
        Ok(metadata.len() >= self.rotation_size_bytes)
    }

    fn perform_rotation(&self) -> Result<(), std::io::Error> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let filename = self.log_path.file_name().unwrap().to_str().unwrap();
        let archive_name = format!("{}.{}.gz", filename, timestamp);
        let archive_path = self.log_path.parent().unwrap().join(archive_name);

        let temp_path = self.log_path.with_extension("rotating");
        std::fs::rename(&self.log_path, &temp_path)?;

        let source_file = File::open(&temp_path)?;
        let target_file = File::create(&archive_path)?;
        let mut encoder = GzEncoder::new(target_file, Compression::default());
        std::io::copy(&mut BufReader::new(source_file), &mut encoder)?;
        encoder.finish()?;

        std::fs::remove_file(&temp_path)?;
        let _ = self.cleanup_old_archives();
        Ok(())
    }

    fn cleanup_old_archives(&self) -> Result<(), std::io::Error> {
        let log_dir = self.log_path.parent().unwrap();
        let filename = self.log_path.file_name().unwrap().to_str().unwrap();

        let mut archives = Vec::new();
        for entry in std::fs::read_dir(log_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();

            if name.starts_with(&format!("{}.", filename)) && name.ends_with(".gz") {
                archives.push((entry.path(), entry.metadata()?.modified()?));
            }
        }

        archives.sort_by_key(|(_, modified)| *modified);
        if archives.len() > self.max_archives as usize {
            let to_remove = archives.len() - self.max_archives as usize;
            for (path, _) in archives.iter().take(to_remove) {
                let _ = std::fs::remove_file(path);
            }
        }

        Ok(())
    }
}

#[derive(Serialize, Debug, Clone)]
struct LogLine {
    timestamp: String,
    component: String,
    event: String,
    message: String,
    correlation_id: String,
    fields: HashMap<String, serde_json::Value>,
}

/// Shared debug log used by the Event Bus, Service Manager, and jobs.
///
/// One instance per daemon process; always-on (unlike a client's optional
/// WebSocket subscription), rotated at `rotation_size_mb` with `max_archives`
/// gzip backups kept, and redacted before anything hits disk.
pub struct DebugLogger {
    logger: Arc<Mutex<RotatingLogger>>,
    session_id: String,
    redaction_patterns: Vec<Regex>,
}

impl DebugLogger {
    pub fn from_config(config: &LogConfig, working_dir: &std::path::Path) -> Self {
        let session_id = Uuid::new_v4().to_string()[..8].to_string();
        let logger = Arc::new(Mutex::new(RotatingLogger::new(
            working_dir.join(&config.debug_log_path),
            config.rotation_size_mb,
            config.max_archives,
        )));

        Self {
            logger,
            session_id,
            redaction_patterns: Self::compile_redaction_patterns(),
        }
    }

    fn compile_redaction_patterns() -> Vec<Regex> {
        let patterns = [
            r"(?i)authorization[:\s]+[^\s\n]+",
            r"(?i)bearer[:\s]+[^\s\n]+",
            r"(?i)token[:\s]+[^\s\n]+",
            r"(?i)password[:\s]+[^\s\n]+",
            r"(?i)api[_-]?key[:\s]+[^\s\n]+",
            r"(?i)secret[:\s]+[^\s\n]+",
        ];

        patterns
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect()
    }

    fn redact(&self, text: &str) -> String {
        let mut redacted = text.to_string();

        for regex in &self.redaction_patterns {
            redacted = regex.replace_all(&redacted, "[REDACTED]").to_string();
        }

        if redacted.len() > 100
            && !redacted.contains(' ')
            && redacted
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "-_".contains(c))
        {
            redacted = format!("[REDACTED_LONG_STRING_{}chars]", redacted.len());
        }

        redacted
    }

    /// Mirror a published event (or any ambient diagnostic) into the rolling
    /// log. `fields` carries the event's structured payload; errors writing
    /// to disk are swallowed, matching the policy that logging must never
    /// take down a job.
    pub fn log_event(
        &self,
        component: &str,
        event: &str,
        message: &str,
        fields: HashMap<String, serde_json::Value>,
    ) {
        let line = LogLine {
            timestamp: Local::now().to_rfc3339(),
            component: component.to_string(),
            event: event.to_string(),
            message: self.redact(message),
            correlation_id: self.session_id.clone(),
            fields,
        };

        if let Ok(logger) = self.logger.lock() {
            if let Ok(json_line) = serde_json::to_string(&line) {
                let _ = logger.write_with_rotation(&json_line);
            }
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}
