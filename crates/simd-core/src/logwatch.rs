//! Tails the backing node's log file.
//!
//! The watcher polls the file size and copies each newly appended byte range
//! to an output stream (stdout by default). A missing file is normal while
//! the node starts up; any other IO failure ends the watcher.

use crate::config::ControlConfig;
use crate::error::{Result, SimError};
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt, Stdout};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Copies new bytes from a growing log file to a sink.
pub struct LogWatcher<W = Stdout> {
    path: PathBuf,
    sink: W,
    interval: Duration,
    /// Size of the file at the last observation.
    offset: u64,
}

impl LogWatcher<Stdout> {
    /// Watch `path`, forwarding to the process's standard output.
    pub fn stdout(path: impl AsRef<Path>) -> Self {
        Self::new(path, tokio::io::stdout())
    }
}

impl<W> LogWatcher<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Watch `path`, forwarding to `sink`.
    pub fn new(path: impl AsRef<Path>, sink: W) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            sink,
            interval: ControlConfig::LOG_POLL_INTERVAL,
            offset: 0,
        }
    }

    /// Set the poll interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the watcher on a background task.
    ///
    /// The task only ends on a fatal error; abort the handle to stop it.
    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            let path = self.path.clone();
            let result = self.run().await;
            if let Err(e) = &result {
                error!("Log watcher for {} stopped: {}", path.display(), e);
            }
            result
        })
    }

    /// Poll forever, returning only on a fatal error.
    pub async fn run(mut self) -> Result<()> {
        debug!("Watching log file {}", self.path.display());

        loop {
            self.poll_once().await?;
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Forward whatever was appended since the last poll.
    ///
    /// Returns the number of bytes forwarded.
    async fn poll_once(&mut self) -> Result<u64> {
        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(SimError::io_with_path(e, &self.path)),
        };

        let size = file
            .metadata()
            .await
            .map_err(|e| SimError::io_with_path(e, &self.path))?
            .len();

        // Truncated or replaced; start over from the beginning.
        if size < self.offset {
            self.offset = 0;
        }

        if size == self.offset {
            return Ok(0);
        }

        let len = size - self.offset;
        let mut buf = vec![0u8; len as usize];

        file.seek(SeekFrom::Start(self.offset))
            .await
            .map_err(|e| SimError::io_with_path(e, &self.path))?;
        file.read_exact(&mut buf)
            .await
            .map_err(|e| SimError::io_with_path(e, &self.path))?;

        self.sink.write_all(&buf).await?;
        self.sink.flush().await?;

        self.offset = size;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn append(path: &Path, data: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(data.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn test_poll_missing_file_is_not_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut watcher = LogWatcher::new(temp_dir.path().join("absent.log"), Vec::new());

        assert_eq!(watcher.poll_once().await.unwrap(), 0);
        assert!(watcher.sink.is_empty());
    }

    #[tokio::test]
    async fn test_poll_forwards_only_new_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("node.log");
        let mut watcher = LogWatcher::new(&path, Vec::new());

        append(&path, "first line\n");
        assert_eq!(watcher.poll_once().await.unwrap(), 11);

        // Nothing new
        assert_eq!(watcher.poll_once().await.unwrap(), 0);

        append(&path, "second\n");
        assert_eq!(watcher.poll_once().await.unwrap(), 7);

        assert_eq!(watcher.sink, b"first line\nsecond\n".to_vec());
    }

    #[tokio::test]
    async fn test_poll_restarts_after_truncation() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("node.log");
        let mut watcher = LogWatcher::new(&path, Vec::new());

        append(&path, "a long first line\n");
        watcher.poll_once().await.unwrap();

        std::fs::write(&path, "new\n").unwrap();
        watcher.poll_once().await.unwrap();

        assert_eq!(watcher.sink, b"a long first line\nnew\n".to_vec());
    }

    #[tokio::test]
    async fn test_spawned_watcher_tails_file_created_later() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("late.log");
        let (sink, mut output) = tokio::io::duplex(1024);

        let handle = LogWatcher::new(&path, sink)
            .with_interval(Duration::from_millis(10))
            .spawn();

        tokio::time::sleep(Duration::from_millis(30)).await;
        append(&path, "hello\n");

        let mut buf = [0u8; 6];
        tokio::time::timeout(Duration::from_secs(2), output.read_exact(&mut buf))
            .await
            .expect("watcher should forward the line")
            .unwrap();
        assert_eq!(&buf, b"hello\n");

        handle.abort();
    }

    #[tokio::test]
    async fn test_spawned_watcher_fails_when_sink_closes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("node.log");
        append(&path, "doomed\n");

        let (sink, output) = tokio::io::duplex(64);
        drop(output);

        let handle = LogWatcher::new(&path, sink)
            .with_interval(Duration::from_millis(10))
            .spawn();

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("watcher should stop")
            .unwrap();
        assert!(result.is_err());
    }
}
