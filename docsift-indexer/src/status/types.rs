use serde::{Deserialize, Serialize};

use crate::retrieval::pipeline::PipelineStats;
use crate::retrieval::throttle::ThrottleState;

/// Snapshot returned by `GetStatus`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Is a crawl currently running?
    pub is_running: bool,
    /// Headline counters for the current or last crawl
    pub stats: RunCounts,
    /// File being processed, if any
    pub current_file: Option<String>,
    /// Whether user activity is holding indexing back
    pub throttle: ThrottleState,
    pub retry_worker: RetryWorkerStatus,
    /// Full counters for the current or last crawl
    pub last_run: PipelineStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub total: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub errored: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryWorkerStatus {
    pub is_running: bool,
    /// Files waiting for another attempt
    pub pending_count: usize,
    pub interval_seconds: u64,
}

/// Index size figures returned by `GetStatistics`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStatistics {
    pub total_indexed_files: usize,
    /// Database size in bytes
    pub database_size: u64,
}

/// Index health check information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexHealth {
    /// Database connectivity status
    pub database_connected: bool,
    /// Database error message (if any)
    pub database_error: Option<String>,
    /// Result of SQLite's quick integrity check
    pub database_integrity_ok: bool,
    /// Whether the log directory, when configured, can be written
    pub log_directory_writable: Option<bool>,
    /// Overall health status
    pub overall_status: HealthStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

/// Current indexing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfiguration {
    pub db_path: String,
    pub log_dir: Option<String>,
    pub batch_size: usize,
    pub max_file_size_bytes: u64,
    pub extraction_timeout_ms: u64,
    pub max_chars: usize,
    pub fallback_encoding: String,
    pub retry_interval_ms: u64,
    pub max_retries: u32,
    /// Skip reasons queued for retry
    pub retry_eligible: Vec<String>,
    pub idle_period_ms: u64,
    pub excluded_file_patterns: Vec<String>,
    /// Extensions with a registered extractor
    pub supported_extensions: Vec<String>,
}

/// Database information and statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseInfo {
    /// Database file locations and sizes
    pub database_files: Vec<DatabaseFile>,
    /// Total on-disk size in bytes, WAL included
    pub total_size_bytes: u64,
    pub sqlite_info: SqliteInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseFile {
    pub path: String,
    pub size_bytes: u64,
    /// File type (main, wal, shm)
    pub file_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteInfo {
    pub version: String,
    /// Journal mode (WAL, DELETE, etc.)
    pub journal_mode: Option<String>,
    pub synchronous_mode: Option<String>,
    pub page_size: Option<u64>,
    pub page_count: Option<u64>,
}

/// Everything `StatusApi::full_report` gathers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub version: String,
    pub status: EngineStatus,
    pub statistics: IndexStatistics,
    pub health: IndexHealth,
    pub configuration: IndexingConfiguration,
    pub database: DatabaseInfo,
}
