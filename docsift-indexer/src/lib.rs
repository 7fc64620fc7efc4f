//! docsift-indexer: incremental document indexing and full-text search
//!
//! This crate crawls directory trees, extracts text from office documents,
//! PDFs and plain text through [`docsift_extract`], keeps a transactional
//! SQLite FTS5 index up to date, and answers combined filename/content
//! searches. It is built to share a machine with an interactive user: work
//! yields to user activity, locked files are retried later, and no single bad
//! file can stop a crawl.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: Engine context, crawler, pipeline, retry worker,
//!   throttle and search
//! - **[`storage`]**: Storage abstraction layer with SQLite implementation
//! - **[`status`]**: Status, statistics and health reporting APIs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docsift_indexer::retrieval::indexing_engine::{EngineConfig, IndexingEngine};
//! use std::path::{Path, PathBuf};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = IndexingEngine::new(EngineConfig::new("index.db")).await?;
//! engine.start_indexing(vec![PathBuf::from("/srv/documents")]).await?;
//! engine.wait_until_idle().await?;
//!
//! let response = engine
//!     .search("\"quarterly report\"", Some(Path::new("/srv/documents")), 20)
//!     .await?;
//! for result in response.results {
//!     println!("{} ({} matches)", result.path, result.match_count);
//! }
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Crawler → Pipeline → ExtractorRegistry → batch → SqliteStore
//!              ↑              ↑                        ↓
//!          Throttle      RetryWorker            SearchEngine ← name walk
//! ```

pub mod retrieval;
pub mod status;
pub mod storage;
