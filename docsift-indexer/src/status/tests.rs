#[cfg(test)]
mod test_suite {
    use super::super::api::StatusApi;
    use super::super::types::HealthStatus;
    use crate::retrieval::indexing_engine::{EngineConfig, IndexingEngine};
    use anyhow::Result;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_get_index_statistics() -> Result<()> {
        let engine = IndexingEngine::new_memory(EngineConfig::default()).await?;

        let stats = StatusApi::get_index_statistics(&engine).await?;

        assert_eq!(stats.total_indexed_files, 0);
        assert!(stats.database_size > 0);

        engine.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_get_engine_status() -> Result<()> {
        let engine = IndexingEngine::new_memory(EngineConfig::default()).await?;

        let status = StatusApi::get_engine_status(&engine).await?;

        assert!(!status.is_running);
        assert_eq!(status.stats.errored, 0);
        assert_eq!(status.retry_worker.pending_count, 0);
        assert!(!status.retry_worker.is_running);

        engine.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_get_index_health() -> Result<()> {
        let temp_dir = tempdir()?;
        let config = EngineConfig::default().with_log_dir(temp_dir.path().join("logs"));
        let engine = IndexingEngine::new_memory(config).await?;

        let health = StatusApi::get_index_health(&engine).await?;

        assert!(health.database_connected);
        assert!(health.database_integrity_ok);
        assert_eq!(health.log_directory_writable, Some(true));
        assert_eq!(health.overall_status, HealthStatus::Healthy);

        engine.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_get_indexing_config() -> Result<()> {
        let config = EngineConfig::default()
            .with_batch_size(20)
            .with_exclusion_patterns(["*.tmp"]);
        let engine = IndexingEngine::new_memory(config).await?;
        engine.add_exclusion_pattern("*.old").await?;

        let snapshot = StatusApi::get_indexing_config(&engine).await?;

        assert_eq!(snapshot.batch_size, 20);
        assert_eq!(snapshot.excluded_file_patterns, vec!["*.tmp", "*.old"]);
        assert!(snapshot.supported_extensions.contains(&"docx".to_string()));
        assert!(snapshot.retry_eligible.contains(&"Locked".to_string()));

        engine.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_database_info_for_file_store() -> Result<()> {
        let temp_dir = tempdir()?;
        let config = EngineConfig::new(temp_dir.path().join("index.db"));
        let engine = IndexingEngine::new(config).await?;

        let info = StatusApi::get_database_info(engine.store()).await?;

        assert_eq!(info.sqlite_info.journal_mode.as_deref(), Some("wal"));
        assert_eq!(info.sqlite_info.synchronous_mode.as_deref(), Some("NORMAL"));
        assert!(info.database_files.iter().any(|f| f.file_type == "main"));
        assert!(info.total_size_bytes > 0);

        engine.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_full_report_serializes() -> Result<()> {
        let engine = IndexingEngine::new_memory(EngineConfig::default()).await?;

        let report = StatusApi::full_report(&engine).await?;
        let json = serde_json::to_value(&report)?;

        assert_eq!(json["statistics"]["total_indexed_files"], 0);
        assert_eq!(json["status"]["throttle"], "Active");
        assert!(json["version"].is_string());

        engine.shutdown().await?;
        Ok(())
    }
}
