//! Periodic re-attempts of skipped files.
//!
//! Files skipped for a transient reason are registered in the shared
//! [`SkipRegistry`]. The [`RetryWorker`] wakes every `interval`, snapshots the
//! registry and re-extracts each file that still exists. A success is written
//! through the store in its own single-document transaction, so retries never
//! hold up batch commits from a running crawl. A failure bumps the record's
//! retry count; reaching `max_retries` drops the record for good.

use chrono::{DateTime, Utc};
use docsift_extract::{ExtractorRegistry, SkipReason};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::activity_log::{ActivityLog, LogStatus};
use super::crawler::file_mtime;
use crate::storage::{DocumentStore, IndexedDocument, normalize_path};

/// A file waiting for another extraction attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipRecord {
    pub path: PathBuf,
    pub reason: SkipReason,
    pub retry_count: u32,
    pub first_seen: DateTime<Utc>,
}

/// Which skips are retried, how often and how many times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_retries: u32,
    pub eligible: BTreeSet<SkipReason>,
}

impl RetryPolicy {
    pub fn default_eligible() -> BTreeSet<SkipReason> {
        SkipReason::ALL
            .into_iter()
            .filter(|reason| !reason.is_terminal())
            .collect()
    }

    /// Terminal reasons are never eligible, whatever the configured set says.
    pub fn is_eligible(&self, reason: SkipReason) -> bool {
        !reason.is_terminal() && self.eligible.contains(&reason)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            max_retries: 5,
            eligible: Self::default_eligible(),
        }
    }
}

/// Pending skip records keyed by normalized path.
///
/// Shared between the pipeline, which registers skips, and the retry worker,
/// which updates and evicts them. Every access goes through the mutex.
#[derive(Debug, Clone, Default)]
pub struct SkipRegistry {
    records: Arc<Mutex<HashMap<String, SkipRecord>>>,
}

impl SkipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record unless the path is already pending. Returns whether it was added.
    pub async fn register(&self, path: &Path, reason: SkipReason) -> bool {
        let key = normalize_path(path);
        let mut records = self.records.lock().await;
        if records.contains_key(&key) {
            return false;
        }
        records.insert(
            key,
            SkipRecord {
                path: path.to_path_buf(),
                reason,
                retry_count: 0,
                first_seen: Utc::now(),
            },
        );
        true
    }

    pub async fn remove(&self, path: &Path) -> Option<SkipRecord> {
        self.records.lock().await.remove(&normalize_path(path))
    }

    /// Record one more failed attempt and return the new count.
    pub async fn increment(&self, path: &Path, reason: SkipReason) -> Option<u32> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(&normalize_path(path))?;
        record.retry_count += 1;
        record.reason = reason;
        Some(record.retry_count)
    }

    pub async fn get(&self, path: &Path) -> Option<SkipRecord> {
        self.records.lock().await.get(&normalize_path(path)).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Records sorted by path.
    pub async fn snapshot(&self) -> Vec<SkipRecord> {
        let mut records: Vec<_> = self.records.lock().await.values().cloned().collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records
    }

    pub async fn clear(&self) {
        self.records.lock().await.clear();
    }

    /// Clear `running` if nothing is pending, atomically with respect to
    /// [`register`](Self::register). Returns whether the flag was cleared.
    pub async fn retire_if_empty(&self, running: &AtomicBool) -> bool {
        let records = self.records.lock().await;
        if records.is_empty() {
            running.store(false, Ordering::SeqCst);
            true
        } else {
            false
        }
    }
}

/// Outcome counts for one pass over the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub dropped: usize,
}

#[derive(Clone)]
pub struct RetryWorker {
    skips: SkipRegistry,
    store: Arc<dyn DocumentStore>,
    extractors: Arc<ExtractorRegistry>,
    log: Arc<ActivityLog>,
    policy: RetryPolicy,
    running: Arc<AtomicBool>,
}

impl std::fmt::Debug for RetryWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryWorker")
            .field("policy", &self.policy)
            .field("running", &self.is_running())
            .finish()
    }
}

impl RetryWorker {
    pub fn new(
        skips: SkipRegistry,
        store: Arc<dyn DocumentStore>,
        extractors: Arc<ExtractorRegistry>,
        log: Arc<ActivityLog>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            skips,
            store,
            extractors,
            log,
            policy,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Re-attempt every pending record once.
    pub async fn tick(&self) -> TickSummary {
        let mut summary = TickSummary::default();

        for record in self.skips.snapshot().await {
            let path = record.path.as_path();

            let metadata = match tokio::fs::metadata(path).await {
                Ok(metadata) if metadata.is_file() => metadata,
                _ => {
                    debug!("Dropping retry for missing file {}", path.display());
                    self.skips.remove(path).await;
                    summary.dropped += 1;
                    continue;
                }
            };

            summary.attempted += 1;
            let failure = match self.extractors.extract(path).await {
                Ok(content) => {
                    let doc = IndexedDocument::new(path, content, file_mtime(&metadata));
                    match self.store.insert_or_update(&doc).await {
                        Ok(()) => {
                            self.skips.remove(path).await;
                            self.log.committed(LogStatus::RetrySuccess, path, &doc).await;
                            info!("Retry succeeded for {}", path.display());
                            summary.succeeded += 1;
                            continue;
                        }
                        Err(e) => {
                            warn!("Retry commit failed for {}: {}", path.display(), e);
                            record.reason
                        }
                    }
                }
                Err(e) => match e.skip_reason() {
                    Some(reason) if reason.is_terminal() => {
                        self.skips.remove(path).await;
                        self.log.skip(path, reason, &e.to_string()).await;
                        summary.dropped += 1;
                        continue;
                    }
                    Some(reason) => reason,
                    None => {
                        debug!("Retry of {} failed: {}", path.display(), e);
                        record.reason
                    }
                },
            };

            summary.failed += 1;
            let count = self.skips.increment(path, failure).await.unwrap_or(u32::MAX);
            if count >= self.policy.max_retries {
                self.skips.remove(path).await;
                self.log
                    .record(
                        LogStatus::Abandoned,
                        path,
                        format!("{failure} after {count} retries"),
                    )
                    .await;
                warn!("Abandoned {} after {} retries", path.display(), count);
                summary.abandoned += 1;
            }
        }

        summary
    }

    /// Start the periodic loop unless it is already running.
    ///
    /// The loop exits when the registry is empty or `shutdown` turns true.
    pub fn spawn(&self, mut shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return None;
        }

        let worker = self.clone();
        Some(tokio::spawn(async move {
            info!(
                "Retry worker started, interval {}s",
                worker.policy.interval.as_secs()
            );
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    _ = tokio::time::sleep(worker.policy.interval) => {}
                }

                let summary = worker.tick().await;
                debug!("Retry tick: {:?}", summary);
                // Once retired, a later spawn may already own the flag
                if worker.skips.retire_if_empty(&worker.running).await {
                    info!("Retry worker stopped, nothing pending");
                    return;
                }
            }
            worker.running.store(false, Ordering::SeqCst);
            info!("Retry worker stopped");
        }))
    }
}
