//! Directory walking and crawl-time change detection.
//!
//! The walk runs on a blocking thread and streams candidate files through a
//! bounded [`flume`] channel in file-name order, so the pipeline starts
//! extracting before the tree is fully enumerated and the walk never runs
//! far ahead of it. Directories that cannot be read are reported on the same
//! channel and their subtree is skipped.
//!
//! Change detection compares the file's current modification time with the
//! one stored at index time, within [`MTIME_TOLERANCE`] to absorb
//! filesystem timestamp jitter.

use anyhow::Result;
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};

use super::exclusion::ExclusionRuleSet;
use crate::storage::{DocumentStore, normalize_path};

/// Seconds of mtime difference still treated as the same version.
pub const MTIME_TOLERANCE: f64 = 1.0;

const WALK_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    New,
    Modified,
    Unchanged,
}

/// Classify a file from its current and previously indexed mtime.
pub fn classify_mtime(current: f64, indexed: Option<f64>) -> ChangeKind {
    match indexed {
        None => ChangeKind::New,
        Some(previous) if (current - previous).abs() < MTIME_TOLERANCE => ChangeKind::Unchanged,
        Some(_) => ChangeKind::Modified,
    }
}

/// Modification time in seconds since the Unix epoch.
pub fn file_mtime(metadata: &std::fs::Metadata) -> f64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// One item produced by a walk.
#[derive(Debug, Clone)]
pub enum CrawlEvent {
    File(PathBuf),
    /// A directory could not be enumerated; its subtree was skipped
    DirectoryError {
        path: Option<PathBuf>,
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct Crawler {
    rules: Arc<ExclusionRuleSet>,
    extensions: Arc<BTreeSet<String>>,
}

impl Crawler {
    /// A crawler selecting files with one of `extensions` (lowercase, no dot).
    pub fn new(rules: ExclusionRuleSet, extensions: BTreeSet<String>) -> Self {
        Self {
            rules: Arc::new(rules),
            extensions: Arc::new(extensions),
        }
    }

    pub fn rules(&self) -> &ExclusionRuleSet {
        &self.rules
    }

    /// Whether a file path is a crawl candidate.
    pub fn accepts_file(&self, path: &Path) -> bool {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        self.extensions.contains(&extension) && !self.rules.excludes_file(path)
    }

    /// Start walking `roots` on a blocking thread.
    ///
    /// The returned channel closes when the walk finishes, when `stop` is
    /// set, or when the receiver is dropped.
    pub fn walk(&self, roots: Vec<PathBuf>, stop: Arc<AtomicBool>) -> flume::Receiver<CrawlEvent> {
        let (tx, rx) = flume::bounded(WALK_CHANNEL_CAPACITY);
        let crawler = self.clone();
        tokio::task::spawn_blocking(move || {
            for root in roots {
                if !crawler.walk_root(&root, &tx, &stop) {
                    break;
                }
            }
        });
        rx
    }

    /// Walk one root; returns false if the walk should not continue.
    fn walk_root(&self, root: &Path, tx: &flume::Sender<CrawlEvent>, stop: &AtomicBool) -> bool {
        info!("Crawling {}", root.display());
        let rules = self.rules.clone();
        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(move |entry| {
                entry.depth() == 0
                    || !entry.file_type().is_some_and(|ft| ft.is_dir())
                    || !rules.excludes_dir(entry.path())
            })
            .build();

        for result in walker {
            if stop.load(Ordering::Relaxed) {
                debug!("Walk of {} stopped", root.display());
                return false;
            }

            let event = match result {
                Ok(entry) => {
                    if !entry.file_type().is_some_and(|ft| ft.is_file())
                        || !self.accepts_file(entry.path())
                    {
                        continue;
                    }
                    CrawlEvent::File(entry.into_path())
                }
                Err(err) => {
                    warn!("Skipping unreadable directory: {}", err);
                    CrawlEvent::DirectoryError {
                        path: error_path(&err),
                        message: err.to_string(),
                    }
                }
            };

            if tx.send(event).is_err() {
                return false;
            }
        }
        true
    }

    /// Delete indexed documents under `roots` that this crawl did not see and
    /// that no longer exist on disk.
    ///
    /// `seen` holds normalized paths. Returns the deleted paths.
    pub async fn reconcile(
        store: &dyn DocumentStore,
        roots: &[PathBuf],
        seen: &HashSet<String>,
    ) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for root in roots {
            let root = normalize_path(root);
            for path in store.indexed_paths_under(&root).await? {
                // Unseen but present means an unreadable subtree, not a deletion
                if !seen.contains(&path) && !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    missing.push(path);
                }
            }
        }
        missing.sort();
        missing.dedup();

        if !missing.is_empty() {
            let removed = store.delete_many(&missing).await?;
            info!("Removed {} deleted files from the index", removed);
        }
        Ok(missing)
    }
}

fn error_path(err: &ignore::Error) -> Option<PathBuf> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.clone()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            error_path(err)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::IndexedDocument;
    use crate::storage::sqlite_store::SqliteStore;
    use tempfile::tempdir;

    fn text_crawler() -> Crawler {
        let extensions = ["txt", "md", "docx"].iter().map(|s| s.to_string()).collect();
        Crawler::new(ExclusionRuleSet::default(), extensions)
    }

    async fn collect(crawler: &Crawler, root: &Path) -> Vec<PathBuf> {
        let rx = crawler.walk(vec![root.to_path_buf()], Arc::new(AtomicBool::new(false)));
        let mut files = Vec::new();
        while let Ok(event) = rx.recv_async().await {
            if let CrawlEvent::File(path) = event {
                files.push(path);
            }
        }
        files
    }

    #[test]
    fn test_mtime_tolerance() {
        assert_eq!(classify_mtime(100.0, None), ChangeKind::New);
        assert_eq!(classify_mtime(100.5, Some(100.0)), ChangeKind::Unchanged);
        assert_eq!(classify_mtime(99.5, Some(100.0)), ChangeKind::Unchanged);
        assert_eq!(classify_mtime(102.0, Some(100.0)), ChangeKind::Modified);
        assert_eq!(classify_mtime(98.0, Some(100.0)), ChangeKind::Modified);
    }

    #[tokio::test]
    async fn test_walk_filters_and_orders() -> Result<()> {
        let dir = tempdir()?;
        let root = dir.path();
        for sub in ["docs", "node_modules", ".hidden", "docs/inner"] {
            tokio::fs::create_dir_all(root.join(sub)).await?;
        }
        for file in [
            "docs/b.txt",
            "docs/a.md",
            "docs/inner/c.txt",
            "docs/~$lock.docx",
            "docs/image.png",
            "docs/script.rs",
            "node_modules/pkg.txt",
            ".hidden/secret.txt",
            "top.txt",
        ] {
            tokio::fs::write(root.join(file), "x").await?;
        }

        let files = collect(&text_crawler(), root).await;
        let relative: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(relative, vec!["docs/a.md", "docs/b.txt", "docs/inner/c.txt", "top.txt"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_walk_of_missing_root_reports_error() -> Result<()> {
        let dir = tempdir()?;
        let rx = text_crawler().walk(
            vec![dir.path().join("does-not-exist")],
            Arc::new(AtomicBool::new(false)),
        );
        let events: Vec<_> = rx.into_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], CrawlEvent::DirectoryError { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_flag_ends_walk() -> Result<()> {
        let dir = tempdir()?;
        for i in 0..20 {
            tokio::fs::write(dir.path().join(format!("f{i}.txt")), "x").await?;
        }
        let rx = text_crawler().walk(vec![dir.path().to_path_buf()], Arc::new(AtomicBool::new(true)));
        assert_eq!(rx.into_iter().count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_reconcile_removes_unseen_paths_under_roots() -> Result<()> {
        let dir = tempdir()?;
        let root = dir.path().join("tree");
        let store = SqliteStore::open_memory().await?;
        let kept = root.join("kept.txt");
        let gone = root.join("gone.txt");
        let outside = dir.path().join("elsewhere").join("other.txt");
        for path in [&kept, &gone, &outside] {
            store
                .insert_or_update(&IndexedDocument::new(path, "body".into(), 1.0))
                .await?;
        }

        let unreadable = dir.path().join("tree").join("still-here.txt");
        std::fs::create_dir_all(&root)?;
        std::fs::write(&unreadable, "body")?;
        store
            .insert_or_update(&IndexedDocument::new(&unreadable, "body".into(), 1.0))
            .await?;

        let seen: HashSet<String> = [normalize_path(&kept)].into_iter().collect();
        let removed = Crawler::reconcile(&store, &[root.clone()], &seen).await?;

        assert_eq!(removed, vec![normalize_path(&gone)]);
        assert!(store.is_indexed(&normalize_path(&kept)).await?);
        assert!(store.is_indexed(&normalize_path(&outside)).await?);
        assert!(!store.is_indexed(&normalize_path(&gone)).await?);
        assert!(store.is_indexed(&normalize_path(&unreadable)).await?);
        Ok(())
    }
}
