//! SQLite implementation of [`DocumentStore`](super::DocumentStore)
//!
//! Documents live in two tables joined on rowid: ordinary metadata in
//! `documents` and searchable text in an FTS5 virtual table using the
//! trigram tokenizer, which gives substring-style matching for any script
//! without language-specific word breaking.
//!
//! ## Database Schema
//!
//! ```sql
//! CREATE TABLE documents (
//!     id INTEGER PRIMARY KEY,
//!     path TEXT UNIQUE NOT NULL,       -- normalized absolute path
//!     mtime REAL NOT NULL,             -- seconds since epoch
//!     token_count INTEGER NOT NULL,
//!     content_length INTEGER NOT NULL, -- characters
//!     indexed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
//! );
//!
//! CREATE VIRTUAL TABLE documents_fts USING fts5(content, tokenize = 'trigram');
//!
//! CREATE TABLE search_history (
//!     keyword TEXT PRIMARY KEY,
//!     last_used REAL NOT NULL
//! );
//! ```
//!
//! ## SQLite Configuration
//!
//! - **WAL mode**: searches read concurrently with an in-flight commit
//! - **synchronous = NORMAL**: committed transactions survive a process
//!   crash; only an OS crash can lose the most recent ones
//! - **Serialized writers**: all writes take an async mutex before beginning
//!   a transaction, so batch commits and single-file retry commits never
//!   contend for the SQLite write lock

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    DocumentDetail, DocumentHit, DocumentStore, IndexedDocument, SearchHistoryEntry,
    count_matches, fold_text, scope_prefix,
};

/// Restricts `d.path` to a scope root or anything below it.
const SCOPE_CLAUSE: &str = " AND (d.path = ? OR substr(d.path, 1, ?) = ?)";

/// SQLite-backed document store.
#[derive(Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
    db_path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl SqliteStore {
    /// Opens (creating if needed) a persistent database at `db_path`.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(Duration::from_secs(5))
                .create_if_missing(true),
        )
        .await?;
        info!("Opened index database at {}", db_path.display());
        Self::new_with_pool(pool, Some(db_path.to_path_buf())).await
    }

    /// Opens an in-memory database for testing.
    ///
    /// Every pooled connection to `sqlite::memory:` would see its own empty
    /// database, so the pool holds exactly one connection that never expires.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
            .await?;
        Self::new_with_pool(pool, None).await
    }

    async fn new_with_pool(pool: SqlitePool, db_path: Option<PathBuf>) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self {
            pool,
            db_path,
            write_lock: Mutex::new(()),
        })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY,
                path TEXT UNIQUE NOT NULL,
                mtime REAL NOT NULL,
                token_count INTEGER NOT NULL,
                content_length INTEGER NOT NULL,
                indexed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS documents_fts USING fts5(
                content,
                tokenize = 'trigram'
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS search_history (
                keyword TEXT PRIMARY KEY,
                last_used REAL NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_mtime ON documents(mtime)")
            .execute(pool)
            .await?;

        Ok(())
    }

    /// The underlying pool, for maintenance and tests.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    async fn finish<T>(tx: Transaction<'_, Sqlite>, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!("Rollback failed after storage error: {}", rollback);
                }
                Err(e)
            }
        }
    }

    async fn upsert_in(conn: &mut SqliteConnection, doc: &IndexedDocument) -> Result<()> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO documents (path, mtime, token_count, content_length, indexed_at)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(path) DO UPDATE SET
                mtime = excluded.mtime,
                token_count = excluded.token_count,
                content_length = excluded.content_length,
                indexed_at = CURRENT_TIMESTAMP
            RETURNING id
            "#,
        )
        .bind(&doc.path)
        .bind(doc.mtime)
        .bind(doc.token_count as i64)
        .bind(doc.char_count() as i64)
        .fetch_one(&mut *conn)
        .await?;

        sqlx::query("DELETE FROM documents_fts WHERE rowid = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("INSERT INTO documents_fts (rowid, content) VALUES (?, ?)")
            .bind(id)
            .bind(&doc.content)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn delete_in(conn: &mut SqliteConnection, path: &str) -> Result<bool> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM documents WHERE path = ?")
            .bind(path)
            .fetch_optional(&mut *conn)
            .await?;
        let Some(id) = id else {
            return Ok(false);
        };

        sqlx::query("DELETE FROM documents_fts WHERE rowid = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(true)
    }

    /// Existence check for many paths at once.
    pub async fn check_indexed(&self, paths: &[String]) -> Result<HashMap<String, bool>> {
        let mut result = HashMap::with_capacity(paths.len());
        for path in paths {
            result.insert(path.clone(), self.is_indexed(path).await?);
        }
        Ok(result)
    }

    /// Remove every document.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let result: Result<()> = async {
            sqlx::query("DELETE FROM documents_fts").execute(&mut *tx).await?;
            sqlx::query("DELETE FROM documents").execute(&mut *tx).await?;
            Ok(())
        }
        .await;
        Self::finish(tx, result).await?;
        info!("Cleared index");
        Ok(())
    }

    /// Rebuild the database file to reclaim free pages.
    pub async fn vacuum(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("VACUUM").execute(&self.pool).await?;
        info!("Vacuumed index database");
        Ok(())
    }

    /// Size of the database in bytes.
    pub async fn database_size(&self) -> Result<u64> {
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await?;
        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await?;
        Ok((page_count.max(0) as u64) * (page_size.max(0) as u64))
    }

    /// Record a search keyword, refreshing its timestamp if already present.
    pub async fn add_search_history(&self, keyword: &str) -> Result<()> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(());
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();

        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            INSERT INTO search_history (keyword, last_used) VALUES (?, ?)
            ON CONFLICT(keyword) DO UPDATE SET last_used = excluded.last_used
            "#,
        )
        .bind(keyword)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recently used keywords first.
    pub async fn search_history(&self, limit: usize) -> Result<Vec<SearchHistoryEntry>> {
        let rows = sqlx::query(
            "SELECT keyword, last_used FROM search_history ORDER BY last_used DESC, keyword LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| SearchHistoryEntry {
                keyword: row.get("keyword"),
                last_used: row.get("last_used"),
            })
            .collect())
    }

    pub async fn delete_search_history(&self, keyword: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM search_history WHERE keyword = ?")
            .bind(keyword)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn clear_search_history(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM search_history")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn hit_from_row(row: &sqlx::sqlite::SqliteRow, score: f64) -> DocumentHit {
        DocumentHit {
            path: row.get("path"),
            content: row.get("content"),
            mtime: row.get("mtime"),
            score,
        }
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn insert_or_update(&self, doc: &IndexedDocument) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let result = Self::upsert_in(&mut tx, doc).await;
        Self::finish(tx, result).await
    }

    async fn insert_or_update_batch(&self, docs: &[IndexedDocument]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let result: Result<()> = async {
            for doc in docs {
                Self::upsert_in(&mut tx, doc).await?;
            }
            Ok(())
        }
        .await;
        Self::finish(tx, result).await?;
        debug!("Committed batch of {} documents", docs.len());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let result = Self::delete_in(&mut tx, path).await;
        Self::finish(tx, result).await
    }

    async fn delete_many(&self, paths: &[String]) -> Result<usize> {
        if paths.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let result: Result<usize> = async {
            let mut removed = 0;
            for path in paths {
                if Self::delete_in(&mut tx, path).await? {
                    removed += 1;
                }
            }
            Ok(removed)
        }
        .await;
        Self::finish(tx, result).await
    }

    async fn is_indexed(&self, path: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM documents WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn indexed_mtime(&self, path: &str) -> Result<Option<f64>> {
        let mtime: Option<f64> = sqlx::query_scalar("SELECT mtime FROM documents WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(mtime)
    }

    async fn get_document(&self, path: &str) -> Result<Option<DocumentDetail>> {
        let row = sqlx::query(
            r#"
            SELECT d.path, d.mtime, d.token_count, d.content_length,
                   CAST(d.indexed_at AS TEXT) AS indexed_at, documents_fts.content AS content
            FROM documents d
            JOIN documents_fts ON documents_fts.rowid = d.id
            WHERE d.path = ?
            "#,
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| DocumentDetail {
            path: row.get("path"),
            content: row.get("content"),
            content_length: row.get::<i64, _>("content_length") as usize,
            mtime: row.get("mtime"),
            token_count: row.get::<i64, _>("token_count") as usize,
            indexed_at: row.get("indexed_at"),
        }))
    }

    async fn indexed_paths_under(&self, root: &str) -> Result<Vec<String>> {
        let prefix = scope_prefix(root);
        let paths: Vec<String> = sqlx::query_scalar(
            "SELECT path FROM documents WHERE path = ? OR substr(path, 1, ?) = ? ORDER BY path",
        )
        .bind(root)
        .bind(prefix.chars().count() as i64)
        .bind(&prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(paths)
    }

    async fn query(
        &self,
        expression: &str,
        scope: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DocumentHit>> {
        let mut sql = String::from(
            "SELECT d.path, d.mtime, documents_fts.content AS content, \
             bm25(documents_fts) AS score \
             FROM documents_fts JOIN documents d ON d.id = documents_fts.rowid \
             WHERE documents_fts MATCH ?",
        );
        if scope.is_some() {
            sql.push_str(SCOPE_CLAUSE);
        }
        sql.push_str(" ORDER BY score LIMIT ?");

        let mut query = sqlx::query(&sql).bind(expression.to_string());
        if let Some(root) = scope {
            let prefix = scope_prefix(root);
            query = query
                .bind(root.to_string())
                .bind(prefix.chars().count() as i64)
                .bind(prefix);
        }
        let rows = query.bind(limit as i64).fetch_all(&self.pool).await?;

        // bm25 is negative with better matches lower; flip so higher is better
        Ok(rows
            .iter()
            .map(|row| Self::hit_from_row(row, -row.get::<f64, _>("score")))
            .collect())
    }

    async fn literal_query(
        &self,
        needles: &[String],
        scope: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DocumentHit>> {
        if needles.is_empty() {
            return Ok(Vec::new());
        }

        // SQLite's lower() folds ASCII only, so only ASCII needles can narrow
        // candidates in SQL; the fold below decides every match.
        let ascii: Vec<String> = needles
            .iter()
            .filter(|n| n.is_ascii())
            .map(|n| n.to_ascii_lowercase())
            .collect();
        let mut sql = String::from(
            "SELECT d.path, d.mtime, documents_fts.content AS content \
             FROM documents_fts JOIN documents d ON d.id = documents_fts.rowid WHERE 1 = 1",
        );
        for _ in &ascii {
            sql.push_str(" AND instr(lower(documents_fts.content), ?) > 0");
        }
        if scope.is_some() {
            sql.push_str(SCOPE_CLAUSE);
        }

        let mut query = sqlx::query(&sql);
        for needle in ascii {
            query = query.bind(needle);
        }
        if let Some(root) = scope {
            let prefix = scope_prefix(root);
            query = query
                .bind(root.to_string())
                .bind(prefix.chars().count() as i64)
                .bind(prefix);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let folded_needles: Vec<Vec<char>> = needles.iter().map(|n| fold_text(n)).collect();
        let mut hits: Vec<DocumentHit> = rows
            .iter()
            .filter_map(|row| {
                let content: String = row.get("content");
                let folded = fold_text(&content);
                let mut total = 0;
                for needle in &folded_needles {
                    let count = count_matches(&folded, needle);
                    if count == 0 {
                        return None;
                    }
                    total += count;
                }
                Some(Self::hit_from_row(row, total as f64))
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.path.cmp(&b.path)));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn total_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn compact(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("INSERT INTO documents_fts (documents_fts) VALUES ('optimize')")
            .execute(&mut *tx)
            .await
            .map(|_| ())
            .map_err(anyhow::Error::from);
        Self::finish(tx, result).await?;
        debug!("Compacted full-text index");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn doc(path: &str, content: &str, mtime: f64) -> IndexedDocument {
        IndexedDocument {
            path: path.to_string(),
            content: content.to_string(),
            mtime,
            token_count: crate::storage::count_tokens(content),
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_row_per_path() -> Result<()> {
        let store = SqliteStore::open_memory().await?;

        store.insert_or_update(&doc("/docs/a.txt", "first draft", 1.0)).await?;
        store.insert_or_update(&doc("/docs/a.txt", "second draft", 2.0)).await?;

        assert_eq!(store.total_count().await?, 1);
        assert_eq!(store.indexed_mtime("/docs/a.txt").await?, Some(2.0));
        let detail = store.get_document("/docs/a.txt").await?.unwrap();
        assert_eq!(detail.content, "second draft");
        assert_eq!(detail.content_length, 12);
        assert_eq!(detail.token_count, 2);
        assert!(store.query("\"first\"", None, 10).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_query_ranks_and_returns_content() -> Result<()> {
        let store = SqliteStore::open_memory().await?;
        store
            .insert_or_update_batch(&[
                doc("/docs/one.txt", "invoice invoice invoice for march", 1.0),
                doc("/docs/two.txt", "an invoice attached to a long letter about other things entirely", 1.0),
                doc("/docs/three.txt", "meeting notes", 1.0),
            ])
            .await?;

        let hits = store.query("\"invoice\"", None, 10).await?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].path, "/docs/one.txt");
        assert!(hits[0].score >= hits[1].score);
        assert!(hits[0].content.contains("march"));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_nothing_behind() -> Result<()> {
        let store = SqliteStore::open_memory().await?;
        sqlx::query(
            r#"
            CREATE TRIGGER reject_poison BEFORE INSERT ON documents
            WHEN NEW.path LIKE '%poison%'
            BEGIN SELECT RAISE(ABORT, 'simulated storage failure'); END
            "#,
        )
        .execute(store.pool())
        .await?;

        let result = store
            .insert_or_update_batch(&[
                doc("/docs/a.txt", "alpha", 1.0),
                doc("/docs/poison.txt", "beta", 1.0),
                doc("/docs/c.txt", "gamma", 1.0),
            ])
            .await;

        assert!(result.is_err());
        assert_eq!(store.total_count().await?, 0);
        assert!(!store.is_indexed("/docs/a.txt").await?);
        assert!(store.literal_query(&["alpha".into()], None, 10).await?.is_empty());

        // The store stays usable after the rollback
        store.insert_or_update(&doc("/docs/a.txt", "alpha", 1.0)).await?;
        assert!(store.is_indexed("/docs/a.txt").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_literal_query_requires_every_needle() -> Result<()> {
        let store = SqliteStore::open_memory().await?;
        store
            .insert_or_update_batch(&[
                doc("/d/1.txt", "Tom & Jerry", 1.0),
                doc("/d/2.txt", "Tom and Jerry", 1.0),
            ])
            .await?;

        let hits = store.literal_query(&["tom & jerry".into()], None, 10).await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "/d/1.txt");

        let hits = store
            .literal_query(&["tom".into(), "jerry".into()], None, 10)
            .await?;
        assert_eq!(hits.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_literal_query_folds_non_ascii_case() -> Result<()> {
        let store = SqliteStore::open_memory().await?;
        store
            .insert_or_update_batch(&[
                doc("/d/de.txt", "ÄRGER & Co", 1.0),
                doc("/d/other.txt", "Aerger & Co", 1.0),
            ])
            .await?;

        let hits = store.literal_query(&["ärger & co".into()], None, 10).await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "/d/de.txt");

        // Mixed needles: the ASCII one narrows in SQL, the other is folded here
        let hits = store
            .literal_query(&["co".into(), "Ärger".into()], None, 10)
            .await?;
        assert_eq!(hits.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_literal_query_ranks_before_limit() -> Result<()> {
        let store = SqliteStore::open_memory().await?;
        let mut docs: Vec<IndexedDocument> = (0..20)
            .map(|i| doc(&format!("/d/a{i:02}.txt"), "one ab here", 1.0))
            .collect();
        docs.push(doc("/d/zz.txt", "ab ab ab", 1.0));
        store.insert_or_update_batch(&docs).await?;

        let hits = store.literal_query(&["ab".into()], None, 3).await?;
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].path, "/d/zz.txt");
        assert_eq!(hits[0].score, 3.0);
        assert_eq!(hits[1].path, "/d/a00.txt");
        Ok(())
    }

    #[tokio::test]
    async fn test_scope_applies_before_limit() -> Result<()> {
        let store = SqliteStore::open_memory().await?;
        let mut docs: Vec<IndexedDocument> = (0..60)
            .map(|i| doc(&format!("/a_out/{i:02}.txt"), "ab note note", 1.0))
            .collect();
        docs.push(doc("/z_in/target.txt", "ab note", 1.0));
        docs.push(doc("/z_inner/sibling.txt", "ab note", 1.0));
        store.insert_or_update_batch(&docs).await?;

        let hits = store.query("\"note\"", Some("/z_in"), 5).await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "/z_in/target.txt");

        let hits = store.literal_query(&["ab".into()], Some("/z_in"), 5).await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "/z_in/target.txt");

        assert_eq!(store.query("\"note\"", None, 5).await?.len(), 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_and_paths_under() -> Result<()> {
        let store = SqliteStore::open_memory().await?;
        store
            .insert_or_update_batch(&[
                doc("/root/a/x.txt", "x", 1.0),
                doc("/root/a/sub/y.txt", "y", 1.0),
                doc("/root/ab/z.txt", "z", 1.0),
            ])
            .await?;

        let under = store.indexed_paths_under("/root/a").await?;
        assert_eq!(under, vec!["/root/a/sub/y.txt", "/root/a/x.txt"]);

        assert!(store.delete("/root/a/x.txt").await?);
        assert!(!store.delete("/root/a/x.txt").await?);
        assert_eq!(store.delete_many(&under).await?, 1);
        assert_eq!(store.total_count().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_persistent_store_maintenance() -> Result<()> {
        let dir = tempdir()?;
        let db_path = dir.path().join("nested").join("index.db");
        let store = SqliteStore::open(&db_path).await?;
        store.insert_or_update(&doc("/docs/a.txt", "content here", 1.0)).await?;

        store.compact().await?;
        store.vacuum().await?;
        assert!(store.database_size().await? > 0);
        assert_eq!(store.db_path(), Some(db_path.as_path()));

        store.clear().await?;
        assert_eq!(store.total_count().await?, 0);

        let checked = store.check_indexed(&["/docs/a.txt".to_string()]).await?;
        assert_eq!(checked.get("/docs/a.txt"), Some(&false));
        Ok(())
    }

    #[tokio::test]
    async fn test_search_history() -> Result<()> {
        let store = SqliteStore::open_memory().await?;
        store.add_search_history("report").await?;
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.add_search_history("budget").await?;
        store.add_search_history("   ").await?;

        let history = store.search_history(10).await?;
        let keywords: Vec<_> = history.iter().map(|h| h.keyword.as_str()).collect();
        assert_eq!(keywords, vec!["budget", "report"]);

        tokio::time::sleep(Duration::from_millis(5)).await;
        store.add_search_history("report").await?;
        assert_eq!(store.search_history(1).await?[0].keyword, "report");

        assert!(store.delete_search_history("budget").await?);
        store.clear_search_history().await?;
        assert!(store.search_history(10).await?.is_empty());
        Ok(())
    }
}
