use crate::config::LogLevel;
use crate::error::{Result, SimError};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Level-filtered log file written by the simulated node.
///
/// Lines look like `2026-01-02 15:04:05.000 [INF] CHAN: message`.
#[derive(Debug)]
pub struct NodeLog {
    path: PathBuf,
    level: LogLevel,
    file: Option<File>,
}

impl NodeLog {
    /// Open (creating parent directories) the log at `path`.
    ///
    /// With `LogLevel::Off` no file is created.
    pub fn open(path: impl AsRef<Path>, level: LogLevel) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = if level == LogLevel::Off {
            None
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| SimError::io_with_path(e, parent))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| SimError::io_with_path(e, &path))?;
            Some(file)
        };

        Ok(Self { path, level, file })
    }

    /// A log that discards everything.
    pub fn disabled() -> Self {
        Self {
            path: PathBuf::new(),
            level: LogLevel::Off,
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `message` under `subsystem` if `level` passes the threshold.
    pub fn write(&mut self, level: LogLevel, subsystem: &str, message: &str) {
        if !self.level.enables(level) {
            return;
        }
        let Some(file) = self.file.as_mut() else {
            return;
        };

        let line = format!(
            "{} [{}] {}: {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            level.tag(),
            subsystem,
            message
        );

        if let Err(e) = file.write_all(line.as_bytes()) {
            warn!("Failed to write node log {}: {}", self.path.display(), e);
        }
    }
}
