// Structured event logging
// Append-only JSON-lines stream shared by every decoy handler in a worker

pub mod record;
pub mod rotation;

pub use record::{Fields, Level, LogEvent};

use chrono::{DateTime, Local, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::warn;

use crate::config::LogSettings;
use rotation::RotatingFile;

/// Event sink for one module (protocol)
///
/// Safe to share across tasks; each record is written whole under a lock, so
/// concurrent callers never interleave. Write failures are reported on the
/// diagnostic channel and never reach the caller.
pub struct EventLogger {
    module: String,
    file: Mutex<RotatingFile>,
}

impl EventLogger {
    /// Create a logger writing `<prefix>_<module>.json` under the log directory
    pub fn new(module: &str, settings: &LogSettings) -> Self {
        let base_name = format!("{}_{}.json", settings.log_file_prefix, module);
        Self {
            module: module.to_string(),
            file: Mutex::new(RotatingFile::new(
                &settings.log_directory,
                &base_name,
                settings.log_retention,
            )),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Path of the segment currently written to
    pub fn active_path(&self) -> PathBuf {
        self.lock_file().active_path()
    }

    /// Append one record stamped with the current instant
    ///
    /// The instant is read under the file lock, so records reach the file in
    /// timestamp order and never land in a segment newer than their day.
    pub fn emit(&self, level: Level, message: impl Into<String>, fields: Fields) {
        let mut file = self.lock_file();
        self.write_event(&mut file, Utc::now(), level, message.into(), fields);
    }

    /// Append one record stamped with an explicit instant
    pub fn emit_at(
        &self,
        timestamp: DateTime<Utc>,
        level: Level,
        message: impl Into<String>,
        fields: Fields,
    ) {
        let mut file = self.lock_file();
        self.write_event(&mut file, timestamp, level, message.into(), fields);
    }

    fn write_event(
        &self,
        file: &mut RotatingFile,
        timestamp: DateTime<Utc>,
        level: Level,
        message: String,
        fields: Fields,
    ) {
        let event = LogEvent::new(timestamp, level, &self.module, message, fields);
        let line = match event.to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(module = %self.module, error = %e, "Failed to serialize event");
                return;
            }
        };

        let day = timestamp.with_timezone(&Local).date_naive();
        if let Err(e) = file.write_line(day, line.as_bytes()) {
            warn!(
                module = %self.module,
                level = level.as_str(),
                error = %e,
                event = %line.trim_end(),
                "Failed to write event"
            );
        }
    }

    pub fn info(&self, message: impl Into<String>, fields: Fields) {
        self.emit(Level::Info, message, fields);
    }

    pub fn warning(&self, message: impl Into<String>, fields: Fields) {
        self.emit(Level::Warning, message, fields);
    }

    pub fn error(&self, message: impl Into<String>, fields: Fields) {
        self.emit(Level::Error, message, fields);
    }

    pub fn critical(&self, message: impl Into<String>, fields: Fields) {
        self.emit(Level::Critical, message, fields);
    }

    fn lock_file(&self) -> std::sync::MutexGuard<'_, RotatingFile> {
        // A panic mid-write leaves the file usable; keep logging
        self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn registry() -> &'static Mutex<HashMap<String, Arc<EventLogger>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<EventLogger>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Process-wide logger for a module, created on first use
///
/// Later calls with the same name return the existing instance, whatever
/// settings they pass.
pub fn get_logger(module: &str, settings: &LogSettings) -> Arc<EventLogger> {
    let mut loggers = registry().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    loggers
        .entry(module.to_string())
        .or_insert_with(|| Arc::new(EventLogger::new(module, settings)))
        .clone()
}

/// Parse every record of a segment file
#[cfg(test)]
pub(crate) fn read_events(path: &std::path::Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).expect("valid json line"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn settings(dir: &std::path::Path, retention: usize) -> LogSettings {
        LogSettings {
            log_directory: dir.to_path_buf(),
            log_file_prefix: "lab".to_string(),
            log_retention: retention,
        }
    }

    #[test]
    fn emits_one_record_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let logger = EventLogger::new("ssh", &settings(dir.path(), 30));

        logger.info("SSH connection", Fields::new().with("ip", "192.0.2.7"));
        logger.warning("odd", Fields::new());

        let events = read_events(&dir.path().join("lab_ssh.json"));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["module"], "ssh");
        assert_eq!(events[0]["level"], "INFO");
        assert_eq!(events[0]["ip"], "192.0.2.7");
        assert!(events[0]["timestamp"].as_str().unwrap().ends_with('Z'));
        assert_eq!(events[1]["level"], "WARNING");
    }

    #[test]
    fn midnight_boundary_splits_segments() {
        let dir = tempfile::tempdir().unwrap();
        let logger = EventLogger::new("ftp", &settings(dir.path(), 30));

        let before = Utc::now() - Duration::days(2);
        let after = Utc::now();
        logger.emit_at(before, Level::Info, "before", Fields::new());
        logger.emit_at(after, Level::Info, "after", Fields::new());

        let earlier = before.with_timezone(&Local).date_naive();
        let rotated = dir
            .path()
            .join(format!("lab_ftp.json.{}", earlier.format("%Y-%m-%d")));

        let old = read_events(&rotated);
        let current = read_events(&logger.active_path());
        assert_eq!(old.len(), 1);
        assert_eq!(old[0]["message"], "before");
        assert_eq!(current.len(), 1);
        assert_eq!(current[0]["message"], "after");
    }

    #[test]
    fn retention_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let logger = EventLogger::new("http", &settings(dir.path(), 2));

        let start = Utc::now() - Duration::days(10);
        for d in 0..=10 {
            logger.emit_at(start + Duration::days(d), Level::Info, "tick", Fields::new());
        }

        let rotated = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("lab_http.json."))
            .count();
        assert_eq!(rotated, 2);
    }

    #[test]
    fn concurrent_emitters_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Arc::new(EventLogger::new("http", &settings(dir.path(), 30)));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let logger = Arc::clone(&logger);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let payload = "x".repeat(512);
                        logger.info(
                            "request",
                            Fields::new().with("thread", t).with("seq", i).with("data", payload),
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let events = read_events(&logger.active_path());
        assert_eq!(events.len(), 400);
    }

    #[test]
    fn concurrent_records_are_written_in_timestamp_order() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Arc::new(EventLogger::new("http", &settings(dir.path(), 30)));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let logger = Arc::clone(&logger);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        logger.info("tick", Fields::new().with("thread", t).with("seq", i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stamps: Vec<String> = read_events(&logger.active_path())
            .iter()
            .map(|e| e["timestamp"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(stamps.len(), 800);
        // Fixed-width ISO-8601, so lexical order is chronological
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn unwritable_directory_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let logger = EventLogger::new("ssh", &settings(&blocker, 30));
        logger.critical("still fine", Fields::new());
    }

    #[test]
    fn registry_is_idempotent_per_module() {
        let dir = tempfile::tempdir().unwrap();
        let first = get_logger("registry-test", &settings(dir.path(), 30));
        let other_dir = tempfile::tempdir().unwrap();
        let second = get_logger("registry-test", &settings(other_dir.path(), 5));

        assert!(Arc::ptr_eq(&first, &second));
        second.info("once", Fields::new());
        assert_eq!(read_events(&first.active_path()).len(), 1);
        assert!(!other_dir.path().join("lab_registry-test.json").exists());
    }
}
