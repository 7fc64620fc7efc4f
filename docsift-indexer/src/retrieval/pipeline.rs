//! Crawl, extract and batch-commit pipeline.
//!
//! Each file moves through a small state machine:
//!
//! ```text
//! Discovered → Processing → Extracted → Batched → Committed
//!                  │
//!                  ├──────→ Skipped   (classified skip, maybe queued for retry)
//!                  └──────→ Error     (logged, never retried)
//! ```
//!
//! Extracted documents accumulate into a batch that is committed in one
//! transaction once it reaches `batch_size`; a partial batch is flushed when
//! the walk ends or a stop is requested. A failed commit marks every member
//! of that batch as errored and the pipeline moves on to the next batch.
//!
//! Between files the pipeline checks the stop flag and waits on the
//! [`ActivityThrottle`]. A stall watcher runs alongside and warns when no
//! file has completed within `stall_window` of active time; throttled time
//! does not count, and the watcher never cancels work.

use anyhow::Result;
use chrono::{DateTime, Utc};
use docsift_extract::{ExtractError, ExtractorRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::activity_log::{ActivityLog, LogStatus};
use super::crawler::{ChangeKind, CrawlEvent, Crawler, classify_mtime, file_mtime};
use super::retry_worker::{RetryPolicy, SkipRegistry};
use super::throttle::{ActivityThrottle, ThrottleState};
use crate::storage::{DocumentStore, IndexedDocument, normalize_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileState {
    Discovered,
    Processing,
    Extracted,
    Batched,
    Committed,
    Skipped,
    Error,
}

/// Diagnostic classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    Timeout,
    OutOfMemory,
    Permission,
    Storage,
    Other,
}

impl ErrorClass {
    pub fn of(err: &anyhow::Error) -> Self {
        if let Some(extract) = err.downcast_ref::<ExtractError>() {
            return Self::of_extract(extract);
        }
        if err.downcast_ref::<sqlx::Error>().is_some() {
            return Self::Storage;
        }
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            return Self::of_io(io);
        }
        Self::of_message(&err.to_string())
    }

    pub fn of_extract(err: &ExtractError) -> Self {
        match err {
            ExtractError::Io { source } => Self::of_io(source),
            other => Self::of_message(&other.to_string()),
        }
    }

    fn of_io(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Self::Timeout,
            std::io::ErrorKind::PermissionDenied => Self::Permission,
            std::io::ErrorKind::OutOfMemory => Self::OutOfMemory,
            _ => Self::of_message(&err.to_string()),
        }
    }

    fn of_message(message: &str) -> Self {
        let message = message.to_lowercase();
        if message.contains("timed out") || message.contains("timeout") {
            Self::Timeout
        } else if message.contains("out of memory") || message.contains("memory allocation") {
            Self::OutOfMemory
        } else if message.contains("permission") || message.contains("access is denied") {
            Self::Permission
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::Timeout => "Timeout",
            ErrorClass::OutOfMemory => "OutOfMemory",
            ErrorClass::Permission => "Permission",
            ErrorClass::Storage => "Storage",
            ErrorClass::Other => "Other",
        };
        f.write_str(s)
    }
}

/// Counters for the current or most recent crawl.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub total: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub errored: usize,
    pub new: usize,
    pub modified: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub directory_errors: usize,
    pub stalls: usize,
    pub current_file: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Progress {
    in_flight: Option<(PathBuf, FileState)>,
    last_completed: Instant,
    warned: bool,
}

impl Progress {
    fn new() -> Self {
        Self {
            in_flight: None,
            last_completed: Instant::now(),
            warned: false,
        }
    }
}

pub struct IndexingPipeline {
    store: Arc<dyn DocumentStore>,
    extractors: Arc<ExtractorRegistry>,
    crawler: Crawler,
    log: Arc<ActivityLog>,
    throttle: Arc<ActivityThrottle>,
    skips: SkipRegistry,
    policy: RetryPolicy,
    stats: Arc<RwLock<PipelineStats>>,
    stop: Arc<AtomicBool>,
    progress: Arc<Mutex<Progress>>,
    batch_size: usize,
    stall_window: Duration,
}

impl IndexingPipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        extractors: Arc<ExtractorRegistry>,
        crawler: Crawler,
        log: Arc<ActivityLog>,
    ) -> Self {
        Self {
            store,
            extractors,
            crawler,
            log,
            throttle: Arc::new(ActivityThrottle::default()),
            skips: SkipRegistry::new(),
            policy: RetryPolicy::default(),
            stats: Arc::new(RwLock::new(PipelineStats::default())),
            stop: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(Mutex::new(Progress::new())),
            batch_size: 100,
            stall_window: Duration::from_secs(120),
        }
    }

    pub fn with_throttle(mut self, throttle: Arc<ActivityThrottle>) -> Self {
        self.throttle = throttle;
        self
    }

    /// Share the skip registry and the policy deciding what gets registered.
    pub fn with_skips(mut self, skips: SkipRegistry, policy: RetryPolicy) -> Self {
        self.skips = skips;
        self.policy = policy;
        self
    }

    pub fn with_stats(mut self, stats: Arc<RwLock<PipelineStats>>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_stall_window(mut self, window: Duration) -> Self {
        self.stall_window = window;
        self
    }

    pub fn stats(&self) -> Arc<RwLock<PipelineStats>> {
        Arc::clone(&self.stats)
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Crawl `roots` to completion or until stopped.
    ///
    /// Deleted files are reconciled and the index compacted only when the
    /// crawl ran to completion.
    pub async fn run(&self, roots: Vec<PathBuf>) -> Result<PipelineStats> {
        info!("Starting crawl of {} root(s)", roots.len());
        *self.stats.write().await = PipelineStats {
            started_at: Some(Utc::now()),
            ..PipelineStats::default()
        };
        *self.progress.lock().await = Progress::new();

        let watcher = self.spawn_stall_watcher();
        let events = self.crawler.walk(roots.clone(), Arc::clone(&self.stop));
        let mut seen = HashSet::new();
        let mut batch: Vec<IndexedDocument> = Vec::with_capacity(self.batch_size);

        while let Ok(event) = events.recv_async().await {
            if self.throttle.wait_until_active(&self.stop).await {
                // Time spent yielding to the user is not a stall
                self.progress.lock().await.last_completed = Instant::now();
            }
            if self.stopped() {
                info!("Stop requested, ending crawl");
                break;
            }

            match event {
                CrawlEvent::DirectoryError { path, message } => {
                    let path = path.unwrap_or_default();
                    warn!("Skipping unreadable directory {}: {}", path.display(), message);
                    self.stats.write().await.directory_errors += 1;
                    self.log
                        .record(LogStatus::Error, &path, format!("Directory: {message}"))
                        .await;
                }
                CrawlEvent::File(path) => {
                    seen.insert(normalize_path(&path));
                    self.stats.write().await.total += 1;
                    if let Some(doc) = self.process_file(&path).await {
                        self.set_state(&path, FileState::Batched).await;
                        batch.push(doc);
                        if batch.len() >= self.batch_size {
                            self.commit_batch(&mut batch).await;
                        }
                    }
                    self.complete_file().await;
                }
            }
        }
        drop(events);

        self.commit_batch(&mut batch).await;

        if !self.stopped() {
            match Crawler::reconcile(&*self.store, &roots, &seen).await {
                Ok(deleted) => {
                    for path in &deleted {
                        debug!("Removed deleted file {}", path);
                    }
                    self.stats.write().await.deleted = deleted.len();
                }
                Err(e) => error!("Failed to reconcile deleted files: {}", e),
            }
            if let Err(e) = self.store.compact().await {
                error!("Failed to compact index: {}", e);
            }
        }

        watcher.abort();
        let mut stats = self.stats.write().await;
        stats.finished_at = Some(Utc::now());
        stats.current_file = None;
        info!(
            "Crawl finished: {} files, {} indexed, {} unchanged, {} skipped, {} errors, {} deleted",
            stats.total, stats.indexed, stats.unchanged, stats.skipped, stats.errored, stats.deleted
        );
        Ok(stats.clone())
    }

    /// Classify and extract one file. Returns a document ready to batch.
    async fn process_file(&self, path: &Path) -> Option<IndexedDocument> {
        self.set_state(path, FileState::Processing).await;

        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                self.handle_extract_failure(path, ExtractError::from_io(e, false))
                    .await;
                return None;
            }
        };
        let mtime = file_mtime(&metadata);

        let indexed = match self.store.indexed_mtime(&normalize_path(path)).await {
            Ok(indexed) => indexed,
            Err(e) => {
                self.fail(path, ErrorClass::Storage, &e.to_string()).await;
                return None;
            }
        };

        match classify_mtime(mtime, indexed) {
            ChangeKind::Unchanged => {
                debug!("Unchanged: {}", path.display());
                self.stats.write().await.unchanged += 1;
                return None;
            }
            ChangeKind::New => self.stats.write().await.new += 1,
            ChangeKind::Modified => self.stats.write().await.modified += 1,
        }

        self.log.record(LogStatus::Indexing, path, "").await;
        match self.extractors.extract(path).await {
            Ok(content) => {
                self.set_state(path, FileState::Extracted).await;
                Some(IndexedDocument::new(path, content, mtime))
            }
            Err(e) => {
                self.handle_extract_failure(path, e).await;
                None
            }
        }
    }

    async fn handle_extract_failure(&self, path: &Path, err: ExtractError) {
        match err.skip_reason() {
            Some(reason) => {
                self.set_state(path, FileState::Skipped).await;
                self.stats.write().await.skipped += 1;
                let detail = match &err {
                    ExtractError::Skipped { detail, .. } => detail.clone(),
                    other => other.to_string(),
                };
                debug!("Skipped {} ({}): {}", path.display(), reason, detail);
                self.log.skip(path, reason, &detail).await;
                if self.policy.is_eligible(reason) {
                    self.skips.register(path, reason).await;
                }
            }
            None => {
                self.fail(path, ErrorClass::of_extract(&err), &err.to_string())
                    .await;
            }
        }
    }

    async fn fail(&self, path: &Path, class: ErrorClass, message: &str) {
        warn!("Failed to index {} ({}): {}", path.display(), class, message);
        self.set_state(path, FileState::Error).await;
        self.stats.write().await.errored += 1;
        self.log.error(path, &class.to_string(), message).await;
    }

    /// Commit the batch in one transaction and clear it.
    async fn commit_batch(&self, batch: &mut Vec<IndexedDocument>) {
        if batch.is_empty() {
            return;
        }

        match self.store.insert_or_update_batch(batch).await {
            Ok(()) => {
                debug!("Committed batch of {} documents", batch.len());
                for doc in batch.iter() {
                    self.log
                        .committed(LogStatus::Committed, Path::new(&doc.path), doc)
                        .await;
                }
                self.stats.write().await.indexed += batch.len();
            }
            Err(e) => {
                error!("Batch of {} documents failed to commit: {}", batch.len(), e);
                let message = e.to_string();
                for doc in batch.iter() {
                    self.fail(Path::new(&doc.path), ErrorClass::Storage, &message)
                        .await;
                }
            }
        }
        batch.clear();
    }

    async fn set_state(&self, path: &Path, state: FileState) {
        self.progress.lock().await.in_flight = Some((path.to_path_buf(), state));
        if state == FileState::Processing {
            self.stats.write().await.current_file = Some(path.display().to_string());
        }
    }

    async fn complete_file(&self) {
        let mut progress = self.progress.lock().await;
        progress.last_completed = Instant::now();
        progress.warned = false;
    }

    fn spawn_stall_watcher(&self) -> tokio::task::JoinHandle<()> {
        let progress = Arc::clone(&self.progress);
        let stats = Arc::clone(&self.stats);
        let throttle = Arc::clone(&self.throttle);
        let window = self.stall_window;
        let poll = (window / 4).max(Duration::from_millis(10));

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(poll).await;
                let mut progress = progress.lock().await;
                if throttle.refresh() == ThrottleState::Throttled {
                    progress.last_completed = Instant::now();
                    continue;
                }
                if progress.warned || progress.last_completed.elapsed() < window {
                    continue;
                }
                let in_flight = progress
                    .in_flight
                    .as_ref()
                    .map(|(path, state)| format!("{} ({:?})", path.display(), state))
                    .unwrap_or_else(|| "none".to_string());
                warn!(
                    "No file completed in {:.0}s; in flight: {}",
                    window.as_secs_f64(),
                    in_flight
                );
                progress.warned = true;
                drop(progress);
                stats.write().await.stalls += 1;
            }
        })
    }
}
