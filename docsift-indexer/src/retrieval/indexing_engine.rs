//! The engine context that owns every indexing component.
//!
//! [`IndexingEngine`] is the single object a host talks to. It owns the
//! store, the extractor registry, the throttle, the skip registry and the
//! activity log, and hands shared references to the pipeline and retry worker
//! it spawns. There is no global state: two engines over two databases can
//! live in the same process.
//!
//! ## Lifecycle
//!
//! - [`IndexingEngine::start_indexing`] spawns a crawl over the given roots
//!   and returns immediately.
//! - [`IndexingEngine::stop_indexing`] requests cooperative cancellation; the
//!   current file finishes and the partial batch is flushed.
//! - When a crawl ends with files pending retry, the retry worker starts and
//!   runs until its records are gone or the engine shuts down.
//! - [`IndexingEngine::shutdown`] stops the crawl, the retry worker and the
//!   throttle monitor and waits for them.
//!
//! ## Configuration
//!
//! [`EngineConfig`] is plain serde data, loadable from TOML:
//!
//! ```toml
//! db_path = "/var/lib/docsift/index.db"
//! log_dir = "/var/log/docsift"
//! batch_size = 100
//! retry_interval_ms = 300000
//! exclusion_patterns = ["*.bak", "**/archive/**"]
//!
//! [extract]
//! max_file_size = 104857600
//! timeout_ms = 60000
//! ```

use anyhow::{Context, Result, bail};
use docsift_extract::{ExtractConfig, ExtractorRegistry, SkipReason};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::activity_log::{ActivityLog, LogEntry};
use super::crawler::Crawler;
use super::exclusion::ExclusionRuleSet;
use super::pipeline::{IndexingPipeline, PipelineStats};
use super::retry_worker::{RetryPolicy, RetryWorker, SkipRecord, SkipRegistry};
use super::search_engine::{SearchEngine, SearchResponse};
use super::throttle::ActivityThrottle;
use crate::status::{EngineStatus, IndexStatistics, RetryWorkerStatus, RunCounts};
use crate::storage::sqlite_store::SqliteStore;
use crate::storage::{DocumentDetail, DocumentStore, SearchHistoryEntry, normalize_path};

/// Configuration for the indexing engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SQLite database file
    pub db_path: PathBuf,
    /// Directory for skip/indexed/error logs; disabled when unset
    pub log_dir: Option<PathBuf>,
    /// Documents per commit transaction
    pub batch_size: usize,
    /// Warn when no file completes within this window
    pub stall_window_ms: u64,
    pub retry_interval_ms: u64,
    pub max_retries: u32,
    /// Skip reasons queued for retry; terminal reasons are ignored here
    pub retry_eligible: BTreeSet<SkipReason>,
    /// Quiet time after user activity before indexing resumes
    pub idle_period_ms: u64,
    pub throttle_poll_ms: u64,
    pub max_log_entries: usize,
    /// Cap on filename matches collected per search
    pub name_search_limit: usize,
    pub exclusion_patterns: Vec<String>,
    pub extract: ExtractConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("docsift.db"),
            log_dir: None,
            batch_size: 100,
            stall_window_ms: 120_000,
            retry_interval_ms: 300_000,
            max_retries: 5,
            retry_eligible: RetryPolicy::default_eligible(),
            idle_period_ms: 500,
            throttle_poll_ms: 50,
            max_log_entries: 500,
            name_search_limit: 1000,
            exclusion_patterns: Vec::new(),
            extract: ExtractConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid engine configuration")
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_stall_window(mut self, window: Duration) -> Self {
        self.stall_window_ms = window.as_millis() as u64;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_eligible(mut self, reasons: impl IntoIterator<Item = SkipReason>) -> Self {
        self.retry_eligible = reasons.into_iter().collect();
        self
    }

    pub fn with_idle_period(mut self, period: Duration) -> Self {
        self.idle_period_ms = period.as_millis() as u64;
        self
    }

    pub fn with_exclusion_patterns<S: Into<String>>(
        mut self,
        patterns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.exclusion_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_extract_config(mut self, extract: ExtractConfig) -> Self {
        self.extract = extract;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            interval: Duration::from_millis(self.retry_interval_ms),
            max_retries: self.max_retries,
            eligible: self.retry_eligible.clone(),
        }
    }

    pub fn stall_window(&self) -> Duration {
        Duration::from_millis(self.stall_window_ms)
    }
}

/// The indexing engine context
pub struct IndexingEngine {
    config: EngineConfig,
    store: Arc<SqliteStore>,
    extractors: Arc<ExtractorRegistry>,
    throttle: Arc<ActivityThrottle>,
    skips: SkipRegistry,
    retry_worker: RetryWorker,
    log: Arc<ActivityLog>,
    rules: RwLock<Arc<ExclusionRuleSet>>,
    stats: Arc<RwLock<PipelineStats>>,
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    crawl: Mutex<Option<JoinHandle<()>>>,
    retry_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for IndexingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexingEngine")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish()
    }
}

impl IndexingEngine {
    /// Open an engine over the database at `config.db_path`.
    pub async fn new(config: EngineConfig) -> Result<Self> {
        Self::new_impl(config, false).await
    }

    /// Open an engine over an in-memory database, for tests and dry runs.
    pub async fn new_memory(config: EngineConfig) -> Result<Self> {
        Self::new_impl(config, true).await
    }

    async fn new_impl(config: EngineConfig, use_memory: bool) -> Result<Self> {
        info!("Initializing IndexingEngine");

        let store = Arc::new(if use_memory {
            SqliteStore::open_memory().await?
        } else {
            SqliteStore::open(&config.db_path).await?
        });
        let extractors = Arc::new(ExtractorRegistry::with_defaults(config.extract.clone()));
        debug!("Registered extractors for: {:?}", extractors.extensions());

        let rules = ExclusionRuleSet::with_patterns(&config.exclusion_patterns)?;
        let log = Arc::new(ActivityLog::new(
            config.max_log_entries,
            config.log_dir.clone(),
        ));
        let throttle = Arc::new(ActivityThrottle::new(
            Duration::from_millis(config.idle_period_ms),
            Duration::from_millis(config.throttle_poll_ms.max(1)),
        ));
        let skips = SkipRegistry::new();
        let retry_worker = RetryWorker::new(
            skips.clone(),
            store.clone(),
            extractors.clone(),
            log.clone(),
            config.retry_policy(),
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let monitor = throttle.spawn_monitor(shutdown_rx);

        Ok(Self {
            config,
            store,
            extractors,
            throttle,
            skips,
            retry_worker,
            log,
            rules: RwLock::new(Arc::new(rules)),
            stats: Arc::new(RwLock::new(PipelineStats::default())),
            stop: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            crawl: Mutex::new(None),
            retry_task: Arc::new(Mutex::new(None)),
            monitor: Mutex::new(Some(monitor)),
            shutdown,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    pub fn extractors(&self) -> &ExtractorRegistry {
        &self.extractors
    }

    pub fn skip_registry(&self) -> &SkipRegistry {
        &self.skips
    }

    pub fn retry_worker(&self) -> &RetryWorker {
        &self.retry_worker
    }

    /// Begin a crawl over `paths` in the background.
    ///
    /// Fails if a crawl is already running or no paths were given.
    pub async fn start_indexing(&self, paths: Vec<PathBuf>) -> Result<()> {
        if paths.is_empty() {
            bail!("No paths to index");
        }
        if self.running.swap(true, Ordering::SeqCst) {
            bail!("Indexing is already running");
        }
        self.stop.store(false, Ordering::SeqCst);

        let rules = Arc::clone(&*self.rules.read().await);
        let crawler = Crawler::new((*rules).clone(), self.extractors.extensions());
        let pipeline = IndexingPipeline::new(
            self.store.clone(),
            self.extractors.clone(),
            crawler,
            self.log.clone(),
        )
        .with_throttle(self.throttle.clone())
        .with_skips(self.skips.clone(), self.config.retry_policy())
        .with_stats(self.stats.clone())
        .with_stop_flag(self.stop.clone())
        .with_batch_size(self.config.batch_size)
        .with_stall_window(self.config.stall_window());

        let running = self.running.clone();
        let skips = self.skips.clone();
        let retry_worker = self.retry_worker.clone();
        let retry_task = self.retry_task.clone();
        let shutdown = self.shutdown.subscribe();

        info!("Starting indexing of {} path(s)", paths.len());
        let handle = tokio::spawn(async move {
            if let Err(e) = pipeline.run(paths).await {
                error!("Indexing run failed: {}", e);
            }
            let shutting_down = *shutdown.borrow();
            if !shutting_down && !skips.is_empty().await {
                if let Some(handle) = retry_worker.spawn(shutdown) {
                    *retry_task.lock().await = Some(handle);
                }
            }
            running.store(false, Ordering::SeqCst);
        });
        *self.crawl.lock().await = Some(handle);
        Ok(())
    }

    /// Request cooperative cancellation of the running crawl.
    pub fn stop_indexing(&self) {
        if self.is_running() {
            info!("Stop requested");
        }
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Wait for the current crawl, if any, to finish.
    pub async fn wait_until_idle(&self) -> Result<()> {
        let handle = self.crawl.lock().await.take();
        if let Some(handle) = handle {
            handle.await.context("Indexing task panicked")?;
        }
        Ok(())
    }

    pub async fn get_status(&self) -> EngineStatus {
        let stats = self.stats.read().await.clone();
        EngineStatus {
            is_running: self.is_running(),
            stats: RunCounts {
                total: stats.total,
                indexed: stats.indexed,
                skipped: stats.skipped,
                errored: stats.errored,
            },
            current_file: stats.current_file.clone(),
            throttle: self.throttle.state(),
            retry_worker: RetryWorkerStatus {
                is_running: self.retry_worker.is_running(),
                pending_count: self.skips.len().await,
                interval_seconds: self.retry_worker.policy().interval.as_secs(),
            },
            last_run: stats,
        }
    }

    /// Most recent `count` pipeline log entries, newest first.
    pub async fn get_logs(&self, count: usize) -> Vec<LogEntry> {
        self.log.recent(count).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.log.subscribe()
    }

    /// The host's user-activity signal.
    pub fn signal_activity(&self) {
        self.throttle.signal_activity();
    }

    pub async fn pending_skips(&self) -> Vec<SkipRecord> {
        self.skips.snapshot().await
    }

    /// Whether each path is indexed, keyed by the path as given.
    pub async fn check_indexed(&self, paths: &[PathBuf]) -> Result<HashMap<String, bool>> {
        let normalized: Vec<String> = paths.iter().map(|p| normalize_path(p)).collect();
        let indexed = self.store.check_indexed(&normalized).await?;
        Ok(paths
            .iter()
            .zip(&normalized)
            .map(|(path, key)| {
                (
                    path.display().to_string(),
                    indexed.get(key).copied().unwrap_or(false),
                )
            })
            .collect())
    }

    pub async fn get_indexed_detail(&self, path: &Path) -> Result<Option<DocumentDetail>> {
        self.store.get_document(&normalize_path(path)).await
    }

    /// Search names under `scope` and indexed content, recording the query.
    pub async fn search(
        &self,
        query: &str,
        scope: Option<&Path>,
        max_results: usize,
    ) -> Result<SearchResponse> {
        let rules = Arc::clone(&*self.rules.read().await);
        let engine = SearchEngine::new(self.store.clone(), self.config.name_search_limit)
            .with_rules(rules);
        let response = engine.search(query, scope, max_results).await?;

        let keyword = query.trim();
        if !keyword.is_empty() {
            if let Err(e) = self.store.add_search_history(keyword).await {
                warn!("Failed to record search history: {}", e);
            }
        }
        Ok(response)
    }

    pub async fn get_statistics(&self) -> Result<IndexStatistics> {
        Ok(IndexStatistics {
            total_indexed_files: self.store.total_count().await?,
            database_size: self.store.database_size().await?,
        })
    }

    /// Remove every document and pending retry. Refused while a crawl runs.
    pub async fn clear_index(&self) -> Result<()> {
        if self.is_running() {
            bail!("Cannot clear the index while indexing is running");
        }
        self.store.clear().await?;
        self.skips.clear().await;
        *self.stats.write().await = PipelineStats::default();
        info!("Index cleared");
        Ok(())
    }

    pub async fn optimize(&self) -> Result<()> {
        self.store.compact().await
    }

    pub async fn vacuum(&self) -> Result<()> {
        self.store.vacuum().await
    }

    pub async fn get_exclusion_patterns(&self) -> Vec<String> {
        self.rules.read().await.patterns().to_vec()
    }

    /// Add a glob pattern; takes effect at the next crawl. Returns false for duplicates.
    pub async fn add_exclusion_pattern(&self, pattern: &str) -> Result<bool> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            bail!("Exclusion pattern is empty");
        }
        let mut rules = self.rules.write().await;
        if rules.patterns().iter().any(|p| p == pattern) {
            return Ok(false);
        }
        let mut patterns = rules.patterns().to_vec();
        patterns.push(pattern.to_string());
        *rules = Arc::new(ExclusionRuleSet::with_patterns(&patterns)?);
        Ok(true)
    }

    pub async fn remove_exclusion_pattern(&self, pattern: &str) -> Result<bool> {
        let mut rules = self.rules.write().await;
        let patterns: Vec<String> = rules
            .patterns()
            .iter()
            .filter(|p| p.as_str() != pattern.trim())
            .cloned()
            .collect();
        if patterns.len() == rules.patterns().len() {
            return Ok(false);
        }
        *rules = Arc::new(ExclusionRuleSet::with_patterns(&patterns)?);
        Ok(true)
    }

    pub async fn clear_exclusion_patterns(&self) {
        *self.rules.write().await = Arc::new(ExclusionRuleSet::default());
    }

    pub async fn get_search_history(&self, limit: usize) -> Result<Vec<SearchHistoryEntry>> {
        self.store.search_history(limit).await
    }

    pub async fn delete_search_history(&self, keyword: &str) -> Result<bool> {
        self.store.delete_search_history(keyword).await
    }

    pub async fn clear_search_history(&self) -> Result<()> {
        self.store.clear_search_history().await
    }

    /// Stop all background work and wait for it to exit.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down IndexingEngine");
        self.stop_indexing();
        self.shutdown.send_replace(true);

        self.wait_until_idle().await?;
        let retry = self.retry_task.lock().await.take();
        if let Some(handle) = retry {
            handle.await.context("Retry worker panicked")?;
        }
        let monitor = self.monitor.lock().await.take();
        if let Some(handle) = monitor {
            handle.await.context("Throttle monitor panicked")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::activity_log::LogStatus;
    use tempfile::tempdir;

    #[test]
    fn test_config_from_toml_uses_defaults() -> Result<()> {
        let config = EngineConfig::from_toml_str(
            r#"
            db_path = "/tmp/index.db"
            batch_size = 25
            retry_eligible = ["Locked", "Timeout"]
            exclusion_patterns = ["*.bak"]

            [extract]
            timeout_ms = 1000
            "#,
        )?;
        assert_eq!(config.db_path, PathBuf::from("/tmp/index.db"));
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.name_search_limit, 1000);
        assert_eq!(config.extract.timeout_ms, 1000);
        assert!(!config.retry_policy().is_eligible(SkipReason::PasswordProtected));
        assert!(config.retry_policy().is_eligible(SkipReason::Timeout));

        assert!(EngineConfig::from_toml_str("batch_size = \"many\"").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_start_index_and_query() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("minutes.txt"), "the harbour committee met")?;
        std::fs::write(dir.path().join("notes.md"), "unrelated text")?;

        let engine = IndexingEngine::new_memory(EngineConfig::default()).await?;
        engine.start_indexing(vec![dir.path().to_path_buf()]).await?;
        // The single-threaded test runtime has not polled the crawl yet
        assert!(engine.start_indexing(vec![dir.path().to_path_buf()]).await.is_err());
        engine.wait_until_idle().await?;

        let status = engine.get_status().await;
        assert!(!status.is_running);
        assert_eq!(status.stats.indexed, 2);
        assert_eq!(status.retry_worker.pending_count, 0);
        assert_eq!(status.retry_worker.interval_seconds, 300);

        let checked = engine
            .check_indexed(&[dir.path().join("minutes.txt"), dir.path().join("absent.txt")])
            .await?;
        assert!(checked[&dir.path().join("minutes.txt").display().to_string()]);
        assert!(!checked[&dir.path().join("absent.txt").display().to_string()]);

        let detail = engine
            .get_indexed_detail(&dir.path().join("minutes.txt"))
            .await?
            .unwrap();
        assert_eq!(detail.content, "the harbour committee met");

        let response = engine.search("harbour", Some(dir.path()), 10).await?;
        assert_eq!(response.results.len(), 1);
        let history = engine.get_search_history(10).await?;
        assert_eq!(history[0].keyword, "harbour");

        let stats = engine.get_statistics().await?;
        assert_eq!(stats.total_indexed_files, 2);
        assert!(stats.database_size > 0);

        let logs = engine.get_logs(50).await;
        assert_eq!(logs.iter().filter(|e| e.status == LogStatus::Committed).count(), 2);

        engine.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_exclusion_pattern_crud() -> Result<()> {
        let engine =
            IndexingEngine::new_memory(EngineConfig::default().with_exclusion_patterns(["*.bak"]))
                .await?;
        assert_eq!(engine.get_exclusion_patterns().await, vec!["*.bak"]);

        assert!(engine.add_exclusion_pattern("**/drafts/**").await?);
        assert!(!engine.add_exclusion_pattern("*.bak").await?);
        assert!(engine.add_exclusion_pattern("").await.is_err());
        assert!(engine.add_exclusion_pattern("[broken").await.is_err());
        assert_eq!(engine.get_exclusion_patterns().await.len(), 2);

        assert!(engine.remove_exclusion_pattern("*.bak").await?);
        assert!(!engine.remove_exclusion_pattern("*.bak").await?);
        engine.clear_exclusion_patterns().await;
        assert!(engine.get_exclusion_patterns().await.is_empty());

        engine.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_index_resets_everything() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("a.txt"), "alpha bravo")?;
        let engine = IndexingEngine::new_memory(EngineConfig::default()).await?;
        engine.start_indexing(vec![dir.path().to_path_buf()]).await?;
        engine.wait_until_idle().await?;
        assert_eq!(engine.get_statistics().await?.total_indexed_files, 1);

        engine.clear_index().await?;
        assert_eq!(engine.get_statistics().await?.total_indexed_files, 0);
        assert_eq!(engine.get_status().await.stats.indexed, 0);
        engine.optimize().await?;
        engine.vacuum().await?;

        engine.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_start_requires_paths() -> Result<()> {
        let engine = IndexingEngine::new_memory(EngineConfig::default()).await?;
        assert!(engine.start_indexing(Vec::new()).await.is_err());
        assert!(!engine.is_running());
        engine.shutdown().await?;
        Ok(())
    }
}
