//! Append-only output files on the collector.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Map a `(hostname, remote path)` pair to the local sink path.
///
/// The remote path is flattened into a single file name: `/` becomes `_`,
/// then leading and trailing `_` and `/` are trimmed. The result lives under
/// `<base>/<hostname>/<flattened>.out.log`.
#[must_use]
pub fn sink_path(base: &Path, hostname: &str, remote_path: &str) -> PathBuf {
    let flattened = remote_path.replace('/', "_");
    let flattened = flattened.trim_matches(|c| c == '_' || c == '/');
    base.join(hostname).join(format!("{flattened}.out.log"))
}

/// An open sink file, exclusively owned by the session that created it.
///
/// Two sessions announcing the same identity get two independent handles to
/// the same path; their appends interleave at chunk granularity. Known
/// limitation, tolerated.
#[derive(Debug)]
pub struct OutputSink {
    local_path: PathBuf,
    file: File,
}

impl OutputSink {
    /// Resolve the sink path for the identity and open it for append,
    /// creating the file and any intervening directories on demand.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created or the file
    /// cannot be opened.
    pub async fn open(
        base: &Path,
        hostname: &str,
        remote_path: &str,
    ) -> std::io::Result<Self> {
        let local_path = sink_path(base, hostname, remote_path);
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&local_path)
            .await?;
        tracing::info!(
            hostname,
            remote = remote_path,
            local = %local_path.display(),
            "Opened stream sink"
        );
        Ok(Self { local_path, file })
    }

    /// The resolved local path.
    #[must_use]
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    /// Append one chunk of payload bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn write_chunk(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.file.write_all(buf).await
    }

    /// Flush buffered bytes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub async fn sync(&mut self) -> std::io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_path_flattens_remote_path() {
        let path = sink_path(Path::new("/srv/logs"), "web01", "/var/log/auth.log");
        assert_eq!(
            path,
            PathBuf::from("/srv/logs/web01/var_log_auth.log.out.log")
        );
    }

    #[test]
    fn test_sink_path_trims_leading_and_trailing() {
        let path = sink_path(Path::new("/srv/logs"), "web01", "/var/log/dir/");
        assert_eq!(path, PathBuf::from("/srv/logs/web01/var_log_dir.out.log"));
    }

    #[test]
    fn test_sink_path_relative_remote() {
        let path = sink_path(Path::new("/srv/logs"), "db02", "app.log");
        assert_eq!(path, PathBuf::from("/srv/logs/db02/app.log.out.log"));
    }

    #[tokio::test]
    async fn test_open_creates_directories_and_appends() {
        let dir = tempfile::tempdir().unwrap();

        let mut sink = OutputSink::open(dir.path(), "web01", "/var/log/auth.log")
            .await
            .unwrap();
        sink.write_chunk(b"line1\n").await.unwrap();
        sink.sync().await.unwrap();
        drop(sink);

        // Reopening appends rather than truncating.
        let mut sink = OutputSink::open(dir.path(), "web01", "/var/log/auth.log")
            .await
            .unwrap();
        sink.write_chunk(b"line2\n").await.unwrap();
        sink.sync().await.unwrap();

        let content = std::fs::read_to_string(sink.local_path()).unwrap();
        assert_eq!(content, "line1\nline2\n");
    }

    #[tokio::test]
    async fn test_open_failure_surfaces_error() {
        // Base directory that is actually a file.
        let file = tempfile::NamedTempFile::new().unwrap();
        let result = OutputSink::open(file.path(), "web01", "/var/log/auth.log").await;
        assert!(result.is_err());
    }
}
