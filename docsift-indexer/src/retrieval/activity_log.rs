//! User-facing pipeline log and persisted diagnostic logs.
//!
//! [`ActivityLog`] keeps the most recent entries in memory (newest first) for
//! the host's log view and fans every entry out to subscribers over a
//! broadcast channel. When a log directory is configured, [`DiagnosticLogs`]
//! additionally appends human-readable records to three files:
//!
//! - `skip.log`: one line per skipped file
//! - `indexed.log`: one block per committed file
//! - `error.log`: one block per failed file
//!
//! Field order in these files is stable so tooling can tail them.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, broadcast};
use tracing::warn;

use crate::storage::IndexedDocument;
use docsift_extract::SkipReason;

pub const SKIP_LOG: &str = "skip.log";
pub const INDEXED_LOG: &str = "indexed.log";
pub const ERROR_LOG: &str = "error.log";

const PREVIEW_CHARS: usize = 100;
const SUBSCRIBER_BACKLOG: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStatus {
    Indexing,
    Committed,
    Skip,
    Error,
    RetrySuccess,
    Abandoned,
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogStatus::Indexing => "Indexing",
            LogStatus::Committed => "Committed",
            LogStatus::Skip => "Skip",
            LogStatus::Error => "Error",
            LogStatus::RetrySuccess => "Retry Success",
            LogStatus::Abandoned => "Abandoned",
        };
        f.write_str(s)
    }
}

/// One line in the pipeline log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Local wall-clock time, `HH:MM:SS`
    pub time: String,
    pub status: LogStatus,
    pub filename: String,
    pub detail: String,
}

#[derive(Debug)]
pub struct ActivityLog {
    recent: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
    events: broadcast::Sender<LogEntry>,
    diagnostics: Option<DiagnosticLogs>,
}

impl ActivityLog {
    pub fn new(capacity: usize, log_dir: Option<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(SUBSCRIBER_BACKLOG);
        Self {
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            events,
            diagnostics: log_dir.map(DiagnosticLogs::new),
        }
    }

    /// Append an entry, evicting the oldest past capacity.
    pub async fn record(&self, status: LogStatus, path: &Path, detail: impl Into<String>) -> LogEntry {
        let entry = LogEntry {
            time: Local::now().format("%H:%M:%S").to_string(),
            status,
            filename: display_name(path),
            detail: detail.into(),
        };

        {
            let mut recent = self.recent.lock().await;
            recent.push_front(entry.clone());
            recent.truncate(self.capacity);
        }
        // No subscribers is not an error
        let _ = self.events.send(entry.clone());
        entry
    }

    /// Up to `count` entries, newest first.
    pub async fn recent(&self, count: usize) -> Vec<LogEntry> {
        self.recent.lock().await.iter().take(count).cloned().collect()
    }

    pub async fn clear(&self) {
        self.recent.lock().await.clear();
    }

    /// Receive every entry recorded from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.events.subscribe()
    }

    pub fn diagnostics(&self) -> Option<&DiagnosticLogs> {
        self.diagnostics.as_ref()
    }

    /// Record a skip in memory and in the skip log.
    pub async fn skip(&self, path: &Path, reason: SkipReason, detail: &str) {
        self.record(LogStatus::Skip, path, format!("{reason}: {detail}"))
            .await;
        if let Some(diagnostics) = &self.diagnostics {
            diagnostics.log_skip(path, reason, detail).await;
        }
    }

    /// Record a committed document in memory and in the indexed-file log.
    pub async fn committed(&self, status: LogStatus, path: &Path, doc: &IndexedDocument) {
        self.record(
            status,
            path,
            format!("{} chars / {} tokens", doc.char_count(), doc.token_count),
        )
        .await;
        if let Some(diagnostics) = &self.diagnostics {
            diagnostics.log_indexed(path, doc).await;
        }
    }

    /// Record a failure in memory and in the error log.
    pub async fn error(&self, path: &Path, kind: &str, message: &str) {
        self.record(LogStatus::Error, path, format!("{kind}: {message}"))
            .await;
        if let Some(diagnostics) = &self.diagnostics {
            diagnostics.log_error(path, kind, message).await;
        }
    }
}

/// Append-only text logs in a directory.
#[derive(Debug)]
pub struct DiagnosticLogs {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl DiagnosticLogs {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn log_skip(&self, path: &Path, reason: SkipReason, detail: &str) {
        let line = format!(
            "[{}] {} : {} ({})\n",
            timestamp(),
            path.display(),
            reason,
            detail
        );
        self.append(SKIP_LOG, &line).await;
    }

    pub async fn log_indexed(&self, path: &Path, doc: &IndexedDocument) {
        let directory = path
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let preview: String = doc
            .content
            .chars()
            .take(PREVIEW_CHARS)
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        let block = format!(
            "[{}]\nDirectory: {}\nFilename: {}\nCharacters: {}\nTokens: {}\nPreview: {}\n{}\n",
            timestamp(),
            directory,
            display_name(path),
            doc.char_count(),
            doc.token_count,
            preview,
            "-".repeat(80)
        );
        self.append(INDEXED_LOG, &block).await;
    }

    pub async fn log_error(&self, path: &Path, kind: &str, message: &str) {
        let block = format!(
            "[{}] {}\nType: {}\nError: {}\n{}\n",
            timestamp(),
            path.display(),
            kind,
            message,
            "=".repeat(80)
        );
        self.append(ERROR_LOG, &block).await;
    }

    async fn append(&self, file: &str, text: &str) {
        let _guard = self.write_lock.lock().await;
        let result = async {
            tokio::fs::create_dir_all(&self.dir).await?;
            let mut handle = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.dir.join(file))
                .await?;
            handle.write_all(text.as_bytes()).await?;
            handle.flush().await
        }
        .await;

        if let Err(e) = result {
            warn!("Failed to write {}: {}", file, e);
        }
    }
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_ring_keeps_newest_first() {
        let log = ActivityLog::new(3, None);
        for i in 0..5 {
            log.record(LogStatus::Indexing, Path::new(&format!("/d/f{i}.txt")), "")
                .await;
        }

        let entries = log.recent(10).await;
        let names: Vec<_> = entries.iter().map(|e| e.filename.as_str()).collect();
        assert_eq!(names, vec!["f4.txt", "f3.txt", "f2.txt"]);
        assert_eq!(log.recent(1).await.len(), 1);
        assert_eq!(entries[0].time.len(), 8);
    }

    #[tokio::test]
    async fn test_subscribers_receive_entries() {
        let log = ActivityLog::new(10, None);
        let mut rx = log.subscribe();
        log.record(LogStatus::Error, Path::new("/d/bad.docx"), "Other: boom")
            .await;

        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.status, LogStatus::Error);
        assert_eq!(entry.filename, "bad.docx");
        assert_eq!(entry.detail, "Other: boom");
    }

    #[tokio::test]
    async fn test_diagnostic_files_have_stable_fields() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let log = ActivityLog::new(10, Some(dir.path().join("logs")));
        let path = Path::new("/data/reports/q1.txt");
        let doc = IndexedDocument::new(path, "first line\nsecond line".into(), 1.0);

        log.skip(path, SkipReason::Locked, "in use").await;
        log.committed(LogStatus::Committed, path, &doc).await;
        log.error(path, "Timeout", "took too long").await;

        let skip = tokio::fs::read_to_string(dir.path().join("logs").join(SKIP_LOG)).await?;
        assert!(skip.starts_with('['));
        assert!(skip.trim_end().ends_with("/data/reports/q1.txt : Locked (in use)"));

        let indexed = tokio::fs::read_to_string(dir.path().join("logs").join(INDEXED_LOG)).await?;
        let lines: Vec<_> = indexed.lines().collect();
        assert_eq!(lines[1], "Directory: /data/reports");
        assert_eq!(lines[2], "Filename: q1.txt");
        assert_eq!(lines[3], "Characters: 22");
        assert_eq!(lines[4], "Tokens: 4");
        assert_eq!(lines[5], "Preview: first line second line");

        let errors = tokio::fs::read_to_string(dir.path().join("logs").join(ERROR_LOG)).await?;
        assert!(errors.contains("Type: Timeout\nError: took too long\n"));

        let recent = log.recent(10).await;
        assert_eq!(recent[1].detail, "22 chars / 4 tokens");
        Ok(())
    }
}
