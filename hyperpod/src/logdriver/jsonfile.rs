//! JSON-lines file log driver, the daemon default.
//!
//! Writes one JSON object per captured line:
//! `{"log":"...","stream":"stdout","time":"..."}`.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use hyperpod_shared::errors::{HyperpodError, HyperpodResult};
use parking_lot::Mutex;
use serde::Serialize;

use super::{LogContext, LogDriver, LogDriverFactory, LogMessage};

pub const DRIVER_NAME: &str = "json-file";

/// Options accepted by the driver. Anything else fails validation.
const ACCEPTED_OPTIONS: &[&str] = &["max-size", "max-file"];

#[derive(Serialize)]
struct JsonLine<'a> {
    log: &'a str,
    stream: &'a str,
    time: String,
}

struct JsonFileLogger {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl LogDriver for JsonFileLogger {
    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn log(&self, msg: LogMessage) -> HyperpodResult<()> {
        let mut guard = self.writer.lock();
        let writer = guard
            .as_mut()
            .ok_or_else(|| HyperpodError::Internal("log driver already closed".into()))?;

        let record = JsonLine {
            log: &msg.line,
            stream: msg.source,
            time: msg.timestamp.to_rfc3339(),
        };
        serde_json::to_writer(&mut *writer, &record)?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn log_path(&self) -> Option<PathBuf> {
        Some(self.path.clone())
    }

    fn close(&self) {
        if let Some(mut writer) = self.writer.lock().take()
            && let Err(e) = writer.flush()
        {
            tracing::warn!(path = %self.path.display(), "failed to flush log file: {}", e);
        }
    }
}

/// Factory for [`DRIVER_NAME`] drivers.
#[derive(Debug)]
pub struct JsonFileFactory;

impl LogDriverFactory for JsonFileFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_NAME
    }

    fn validate_options(&self, options: &HashMap<String, String>) -> HyperpodResult<()> {
        for key in options.keys() {
            if !ACCEPTED_OPTIONS.contains(&key.as_str()) {
                return Err(HyperpodError::LogConfig(format!(
                    "unknown option {} for log driver {}",
                    key, DRIVER_NAME
                )));
            }
        }
        Ok(())
    }

    fn create(&self, ctx: LogContext) -> HyperpodResult<Arc<dyn LogDriver>> {
        let path = ctx.log_path.ok_or_else(|| {
            HyperpodError::LogConfig(format!(
                "log driver {} requires a log path for container {}",
                DRIVER_NAME, ctx.container_id
            ))
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Arc::new(JsonFileLogger {
            path,
            writer: Mutex::new(Some(BufWriter::new(file))),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(path: PathBuf) -> LogContext {
        LogContext {
            container_id: "c1".into(),
            container_name: "web".into(),
            log_path: Some(path),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_rejects_unknown_option() {
        let mut options = HashMap::new();
        options.insert("max-size".to_string(), "10m".to_string());
        assert!(JsonFileFactory.validate_options(&options).is_ok());

        options.insert("color".to_string(), "blue".to_string());
        let err = JsonFileFactory.validate_options(&options).unwrap_err();
        assert!(matches!(err, HyperpodError::LogConfig(_)));
    }

    #[test]
    fn test_create_requires_log_path() {
        let ctx = LogContext {
            container_id: "c1".into(),
            ..Default::default()
        };
        assert!(JsonFileFactory.create(ctx).is_err());
    }

    #[test]
    fn test_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c1-json.log");
        let driver = JsonFileFactory.create(context(path.clone())).unwrap();

        driver.log(LogMessage::new("hello".into(), "stdout")).unwrap();
        driver.close();

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(parsed["log"], "hello");
        assert_eq!(parsed["stream"], "stdout");
        assert!(parsed["time"].is_string());
    }

    #[test]
    fn test_log_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let driver = JsonFileFactory
            .create(context(dir.path().join("c1-json.log")))
            .unwrap();
        driver.close();
        assert!(driver.log(LogMessage::new("late".into(), "stdout")).is_err());
    }
}
