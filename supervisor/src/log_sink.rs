//! Per-script append-only output log

use std::fs::{self, File, OpenOptions};
use std::io::{self, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Append-only file that receives a script's combined stdout and stderr.
///
/// The file is never truncated or rotated here; readers only ever look at a
/// bounded tail.
#[derive(Debug, Clone)]
pub struct LogSink {
    path: PathBuf,
}

impl LogSink {
    pub fn new(logs_dir: &Path, name: &str) -> Self {
        Self {
            path: logs_dir.join(format!("{name}.log")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> io::Result<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&self.path)
    }

    /// Two handles onto the same file, for a child's stdout and stderr.
    pub fn stdio_pair(&self) -> io::Result<(Stdio, Stdio)> {
        let out = self.open()?;
        let err = out.try_clone()?;
        Ok((Stdio::from(out), Stdio::from(err)))
    }

    /// Record a supervisor-side failure inline with the script's own output.
    pub fn append_error(&self, message: &str) -> io::Result<()> {
        let mut file = self.open()?;
        let stamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(file, "\n[ERROR] {stamp} {message}")
    }

    /// Last `max_bytes` of the log, lossily decoded. Empty if there is no log.
    pub async fn tail(&self, max_bytes: u64) -> io::Result<String> {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(String::new()),
            Err(e) => return Err(e),
        };

        let len = file.metadata().await?.len();
        let start = len.saturating_sub(max_bytes);
        file.seek(SeekFrom::Start(start)).await?;

        let mut buf = Vec::with_capacity((len - start) as usize);
        file.take(max_bytes).read_to_end(&mut buf).await?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tail_missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::new(dir.path(), "ghost.py");
        assert_eq!(sink.tail(6000).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_tail_returns_last_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::new(dir.path(), "bot.py");
        fs::write(sink.path(), "0123456789").unwrap();
        assert_eq!(sink.tail(4).await.unwrap(), "6789");
        assert_eq!(sink.tail(100).await.unwrap(), "0123456789");
    }

    #[tokio::test]
    async fn test_tail_cut_inside_codepoint() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::new(dir.path(), "utf.py");
        // "é" is two bytes; keep only the trailing one plus "ok"
        fs::write(sink.path(), "é".as_bytes().iter().chain(b"ok").copied().collect::<Vec<_>>())
            .unwrap();
        let tail = sink.tail(3).await.unwrap();
        assert!(tail.ends_with("ok"));
    }

    #[tokio::test]
    async fn test_append_error_creates_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::new(&dir.path().join("nested/logs"), "bot.py");
        sink.append_error("spawn failed").unwrap();
        sink.append_error("spawn failed again").unwrap();
        let text = sink.tail(6000).await.unwrap();
        assert_eq!(text.matches("[ERROR]").count(), 2);
        assert!(text.contains("spawn failed again"));
    }

    #[test]
    fn test_log_path_uses_script_name() {
        let sink = LogSink::new(Path::new("/var/log/panel"), "bot.py");
        assert_eq!(sink.path(), Path::new("/var/log/panel/bot.py.log"));
    }
}
