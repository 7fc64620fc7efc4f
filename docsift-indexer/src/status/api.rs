use anyhow::Result;
use std::path::Path;

use super::types::*;
use crate::retrieval::indexing_engine::IndexingEngine;
use crate::storage::sqlite_store::SqliteStore;

/// Main status API implementation
pub struct StatusApi;

impl StatusApi {
    /// Get current indexing operation status
    pub async fn get_engine_status(engine: &IndexingEngine) -> Result<EngineStatus> {
        Ok(engine.get_status().await)
    }

    /// Get index size statistics
    pub async fn get_index_statistics(engine: &IndexingEngine) -> Result<IndexStatistics> {
        engine.get_statistics().await
    }

    /// Get index health check information
    pub async fn get_index_health(engine: &IndexingEngine) -> Result<IndexHealth> {
        let mut health = IndexHealth {
            database_connected: false,
            database_error: None,
            database_integrity_ok: false,
            log_directory_writable: None,
            overall_status: HealthStatus::Critical,
        };

        match sqlx::query_scalar::<_, String>("PRAGMA quick_check")
            .fetch_one(engine.store().pool())
            .await
        {
            Ok(result) => {
                health.database_connected = true;
                health.database_integrity_ok = result == "ok";
                if !health.database_integrity_ok {
                    health.database_error = Some(result);
                }
            }
            Err(e) => {
                health.database_error = Some(e.to_string());
            }
        }

        if let Some(dir) = &engine.config().log_dir {
            health.log_directory_writable = Some(Self::is_writable_dir(dir).await);
        }

        health.overall_status = if !health.database_connected {
            HealthStatus::Critical
        } else if !health.database_integrity_ok || health.log_directory_writable == Some(false) {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };

        Ok(health)
    }

    /// Get current indexing configuration
    pub async fn get_indexing_config(engine: &IndexingEngine) -> Result<IndexingConfiguration> {
        let config = engine.config();
        Ok(IndexingConfiguration {
            db_path: config.db_path.to_string_lossy().to_string(),
            log_dir: config
                .log_dir
                .as_ref()
                .map(|d| d.to_string_lossy().to_string()),
            batch_size: config.batch_size,
            max_file_size_bytes: config.extract.max_file_size,
            extraction_timeout_ms: config.extract.timeout_ms,
            max_chars: config.extract.max_chars,
            fallback_encoding: config.extract.fallback_encoding.clone(),
            retry_interval_ms: config.retry_interval_ms,
            max_retries: config.max_retries,
            retry_eligible: config
                .retry_eligible
                .iter()
                .map(|r| r.to_string())
                .collect(),
            idle_period_ms: config.idle_period_ms,
            excluded_file_patterns: engine.get_exclusion_patterns().await,
            supported_extensions: engine.extractors().extensions().into_iter().collect(),
        })
    }

    /// Get database information and statistics
    pub async fn get_database_info(store: &SqliteStore) -> Result<DatabaseInfo> {
        let version: String = sqlx::query_scalar("SELECT sqlite_version()")
            .fetch_one(store.pool())
            .await
            .unwrap_or_else(|_| "unknown".to_string());

        let journal_mode: Option<String> = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_optional(store.pool())
            .await?;

        let synchronous_mode: Option<i64> = sqlx::query_scalar("PRAGMA synchronous")
            .fetch_optional(store.pool())
            .await?;
        let synchronous_mode = synchronous_mode.map(|v| match v {
            0 => "OFF".to_string(),
            1 => "NORMAL".to_string(),
            2 => "FULL".to_string(),
            3 => "EXTRA".to_string(),
            _ => format!("{v}"),
        });

        let page_size: Option<i64> = sqlx::query_scalar("PRAGMA page_size")
            .fetch_optional(store.pool())
            .await?;
        let page_count: Option<i64> = sqlx::query_scalar("PRAGMA page_count")
            .fetch_optional(store.pool())
            .await?;

        let mut database_files = Vec::new();
        if let Some(db_path) = store.db_path() {
            let mut wal = db_path.as_os_str().to_owned();
            wal.push("-wal");
            let mut shm = db_path.as_os_str().to_owned();
            shm.push("-shm");

            for (path, file_type) in [
                (db_path.to_path_buf(), "main"),
                (wal.into(), "wal"),
                (shm.into(), "shm"),
            ] {
                if let Ok(metadata) = tokio::fs::metadata(&path).await {
                    database_files.push(DatabaseFile {
                        path: path.to_string_lossy().to_string(),
                        size_bytes: metadata.len(),
                        file_type: file_type.to_string(),
                    });
                }
            }
        }

        let total_size_bytes = if database_files.is_empty() {
            store.database_size().await?
        } else {
            database_files.iter().map(|f| f.size_bytes).sum()
        };

        Ok(DatabaseInfo {
            database_files,
            total_size_bytes,
            sqlite_info: SqliteInfo {
                version,
                journal_mode,
                synchronous_mode,
                page_size: page_size.map(|p| p as u64),
                page_count: page_count.map(|p| p as u64),
            },
        })
    }

    /// Gather every status section into one serializable report
    pub async fn full_report(engine: &IndexingEngine) -> Result<StatusReport> {
        Ok(StatusReport {
            version: env!("CARGO_PKG_VERSION").to_string(),
            status: Self::get_engine_status(engine).await?,
            statistics: Self::get_index_statistics(engine).await?,
            health: Self::get_index_health(engine).await?,
            configuration: Self::get_indexing_config(engine).await?,
            database: Self::get_database_info(engine.store()).await?,
        })
    }

    async fn is_writable_dir(dir: &Path) -> bool {
        if tokio::fs::create_dir_all(dir).await.is_err() {
            return false;
        }
        match tokio::fs::metadata(dir).await {
            Ok(metadata) => metadata.is_dir() && !metadata.permissions().readonly(),
            Err(_) => false,
        }
    }
}
