//! Storage abstraction layer for docsift-indexer
//!
//! This module defines the transactional document store the indexing pipeline
//! writes to and the search engine reads from. Storage concerns stay behind
//! the [`DocumentStore`] trait so the pipeline, retry worker and search engine
//! can be exercised against alternative backends.
//!
//! ## Key Components
//!
//! - **DocumentStore**: Transactional document writes and full-text reads
//! - **SqliteStore**: SQLite/FTS5 implementation (see [`sqlite_store`])
//! - **Data Types**: [`IndexedDocument`], [`DocumentHit`], [`DocumentDetail`]
//!
//! ## Guarantees
//!
//! Every mutating call runs in its own explicit transaction. On any storage
//! error the transaction is rolled back and the error is returned, so a
//! failed batch leaves no partial rows behind. Paths are normalized before
//! they reach storage, giving at most one row per file.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

pub mod sqlite_store;

/// A document ready to be written to the index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    /// Normalized absolute path, the unique key
    pub path: String,
    pub content: String,
    /// Modification time in seconds since the Unix epoch
    pub mtime: f64,
    pub token_count: usize,
}

impl IndexedDocument {
    pub fn new(path: &Path, content: String, mtime: f64) -> Self {
        Self {
            path: normalize_path(path),
            token_count: count_tokens(&content),
            content,
            mtime,
        }
    }

    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }
}

/// A row returned from a content query.
#[derive(Debug, Clone)]
pub struct DocumentHit {
    pub path: String,
    pub content: String,
    pub mtime: f64,
    /// Relevance score, higher is better; the occurrence count for literal matches
    pub score: f64,
}

/// Full stored record for a single path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentDetail {
    pub path: String,
    pub content: String,
    pub content_length: usize,
    pub mtime: f64,
    pub token_count: usize,
    pub indexed_at: Option<String>,
}

/// A previously searched keyword.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHistoryEntry {
    pub keyword: String,
    /// Seconds since the Unix epoch
    pub last_used: f64,
}

/// Transactional document storage with full-text lookup.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace one document in its own transaction
    async fn insert_or_update(&self, doc: &IndexedDocument) -> Result<()>;

    /// Insert or replace many documents in a single transaction
    async fn insert_or_update_batch(&self, docs: &[IndexedDocument]) -> Result<()>;

    /// Remove a document; returns whether a row existed
    async fn delete(&self, path: &str) -> Result<bool>;

    /// Remove many documents in one transaction; returns the number removed
    async fn delete_many(&self, paths: &[String]) -> Result<usize>;

    async fn is_indexed(&self, path: &str) -> Result<bool>;

    /// The stored modification time, if the path is indexed
    async fn indexed_mtime(&self, path: &str) -> Result<Option<f64>>;

    async fn get_document(&self, path: &str) -> Result<Option<DocumentDetail>>;

    /// All indexed paths equal to or below `root`
    async fn indexed_paths_under(&self, root: &str) -> Result<Vec<String>>;

    /// Ranked full-text query using the engine's query syntax.
    ///
    /// `scope` restricts hits to paths equal to or below it before `limit`
    /// applies.
    async fn query(
        &self,
        expression: &str,
        scope: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DocumentHit>>;

    /// Case-insensitive substring match requiring every needle, ranked by
    /// total occurrences before `limit` applies
    async fn literal_query(
        &self,
        needles: &[String],
        scope: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DocumentHit>>;

    async fn total_count(&self) -> Result<usize>;

    /// Merge full-text index segments
    async fn compact(&self) -> Result<()>;
}

/// Whitespace-delimited token count.
pub fn count_tokens(content: &str) -> usize {
    content.split_whitespace().count()
}

/// `root` with a trailing separator, so `/a` does not claim `/ab/x.txt`.
pub fn scope_prefix(root: &str) -> String {
    let sep = std::path::MAIN_SEPARATOR;
    if root.ends_with(sep) {
        root.to_string()
    } else {
        format!("{root}{sep}")
    }
}

/// One-to-one case fold so offsets in folded text match the original.
pub fn fold_char(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

pub fn fold_text(text: &str) -> Vec<char> {
    text.chars().map(fold_char).collect()
}

pub(crate) fn find_from(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() || from > haystack.len() - needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| haystack[i..i + needle.len()] == *needle)
}

/// Non-overlapping occurrences of `needle`.
pub fn count_matches(haystack: &[char], needle: &[char]) -> usize {
    let mut count = 0;
    let mut from = 0;
    while let Some(at) = find_from(haystack, needle, from) {
        count += 1;
        from = at + needle.len();
    }
    count
}

/// Absolute, lexically cleaned form of a path used as the storage key.
///
/// `.` components are dropped and `..` pops its parent; symlinks are not
/// resolved, so the key does not depend on the file still existing.
pub fn normalize_path(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut clean = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                clean.pop();
            }
            other => clean.push(other.as_os_str()),
        }
    }
    clean.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_tokens() {
        assert_eq!(count_tokens("  one two\tthree\nfour  "), 4);
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn test_normalize_path_removes_dots() {
        let base = std::env::temp_dir();
        let messy = base.join("a").join(".").join("b").join("..").join("c.txt");
        let expected = base.join("a").join("c.txt");
        assert_eq!(normalize_path(&messy), normalize_path(&expected));
        assert!(Path::new(&normalize_path(&messy)).is_absolute());
    }

    #[test]
    fn test_fold_and_count_handle_non_ascii() {
        let text = fold_text("ÄRGER, Ärger und ärger");
        assert_eq!(count_matches(&text, &fold_text("ärger")), 3);
        assert_eq!(count_matches(&fold_text("aaaa"), &fold_text("aa")), 2);
        assert_eq!(count_matches(&text, &[]), 0);
    }

    #[test]
    fn test_scope_prefix_adds_separator_once() {
        let sep = std::path::MAIN_SEPARATOR;
        assert_eq!(scope_prefix("/docs"), format!("/docs{sep}"));
        assert_eq!(scope_prefix(&format!("/docs{sep}")), format!("/docs{sep}"));
    }

    #[test]
    fn test_indexed_document_derives_tokens() {
        let doc = IndexedDocument::new(Path::new("/tmp/x.txt"), "alpha beta gamma".into(), 10.0);
        assert_eq!(doc.token_count, 3);
        assert_eq!(doc.char_count(), 16);
    }
}
