//! Combined filename and content search.
//!
//! A search runs two independent lookups concurrently:
//!
//! 1. **Name walk**: a case-insensitive substring match of file names under
//!    the scope directory, done on the blocking pool.
//! 2. **Content query**: a ranked FTS5 query against the store, or a literal
//!    substring scan when [`ParsedQuery::requires_literal`] says the
//!    tokenizer would mangle the query.
//!
//! The two lists are merged by path. A path found by both keeps the database
//! record (it carries content and a rank) and absorbs the filename match count.

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::exclusion::ExclusionRuleSet;
use super::query::ParsedQuery;
use crate::storage::{
    DocumentHit, DocumentStore, count_matches, find_from, fold_text, normalize_path,
};

const PREVIEW_CHARS: usize = 200;
const PREVIEW_LEAD_CHARS: usize = 60;
const MAX_HIGHLIGHTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultSource {
    Filesystem,
    Database,
}

/// A matched span in a preview, as character offsets into the preview text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlight {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub path: String,
    pub name: String,
    pub source: ResultSource,
    pub match_count: usize,
    pub rank: f64,
    pub preview: String,
    pub highlights: Vec<Highlight>,
    pub mtime: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    /// Wall-clock seconds spent answering
    pub search_time: f64,
}

pub struct SearchEngine {
    store: Arc<dyn DocumentStore>,
    rules: Arc<ExclusionRuleSet>,
    name_limit: usize,
}

impl SearchEngine {
    pub fn new(store: Arc<dyn DocumentStore>, name_limit: usize) -> Self {
        Self {
            store,
            rules: Arc::new(ExclusionRuleSet::default()),
            name_limit,
        }
    }

    pub fn with_rules(mut self, rules: Arc<ExclusionRuleSet>) -> Self {
        self.rules = rules;
        self
    }

    /// Search names under `scope` and indexed content.
    ///
    /// Without a scope only indexed content is searched. With one, content
    /// hits outside it are dropped, as are hits whose file no longer exists.
    pub async fn search(
        &self,
        query: &str,
        scope: Option<&Path>,
        max_results: usize,
    ) -> Result<SearchResponse> {
        let started = Instant::now();
        let parsed = ParsedQuery::parse(query);
        if parsed.is_empty() || max_results == 0 {
            return Ok(SearchResponse {
                query: query.to_string(),
                results: Vec::new(),
                search_time: started.elapsed().as_secs_f64(),
            });
        }

        let scope = scope.map(|s| PathBuf::from(normalize_path(s)));
        let needles = parsed.lowercase_needles();

        let names = async {
            let Some(scope) = scope.clone() else {
                return Ok(Vec::new());
            };
            let needles = needles.clone();
            let rules = Arc::clone(&self.rules);
            let limit = self.name_limit;
            tokio::task::spawn_blocking(move || walk_names(&scope, &needles, &rules, limit))
                .await
                .context("Name search task failed")
        };
        let contents = self.search_contents(&parsed, &needles, scope.as_deref(), max_results);

        let (names, contents) = tokio::join!(names, contents);
        let results = merge_results(contents?, names?, max_results);

        let search_time = started.elapsed().as_secs_f64();
        debug!(
            "Search {:?} returned {} results in {:.3}s",
            query,
            results.len(),
            search_time
        );
        Ok(SearchResponse {
            query: query.to_string(),
            results,
            search_time,
        })
    }

    async fn search_contents(
        &self,
        parsed: &ParsedQuery,
        needles: &[String],
        scope: Option<&Path>,
        max_results: usize,
    ) -> Result<Vec<SearchResult>> {
        let scope_key = scope.map(|s| s.to_string_lossy().into_owned());
        let mut literal = parsed.requires_literal();
        let mut limit = max_results.saturating_mul(4).max(50);

        loop {
            let hits = if literal {
                self.store
                    .literal_query(needles, scope_key.as_deref(), limit)
                    .await?
            } else {
                match self
                    .store
                    .query(&parsed.fts_expression(), scope_key.as_deref(), limit)
                    .await
                {
                    Ok(hits) => hits,
                    Err(e) => {
                        warn!("Full-text query failed, using literal match: {}", e);
                        literal = true;
                        continue;
                    }
                }
            };

            let exhausted = hits.len() < limit;
            let results = self.to_results(hits, needles, scope, literal).await?;
            // Rows for files gone from disk are dropped after the fetch
            if exhausted || results.len() >= max_results {
                return Ok(results);
            }
            limit = limit.saturating_mul(4);
        }
    }

    async fn to_results(
        &self,
        hits: Vec<DocumentHit>,
        needles: &[String],
        scope: Option<&Path>,
        literal: bool,
    ) -> Result<Vec<SearchResult>> {
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let path = Path::new(&hit.path);
            if scope.is_some_and(|scope| !path.starts_with(scope)) {
                continue;
            }
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                debug!("Dropping stale hit {}", hit.path);
                continue;
            }

            let content = fold_text(&hit.content);
            let original: Vec<char> = hit.content.chars().collect();
            let folded_needles: Vec<Vec<char>> = needles.iter().map(|n| fold_text(n)).collect();

            let match_count: usize = folded_needles
                .iter()
                .map(|needle| count_matches(&content, needle))
                .sum();
            let (preview, highlights) = make_preview(&original, &content, &folded_needles);

            results.push(SearchResult {
                name: file_name(path),
                source: ResultSource::Database,
                match_count,
                rank: if literal { match_count as f64 } else { hit.score },
                preview,
                highlights,
                mtime: Some(hit.mtime),
                path: hit.path,
            });
        }
        Ok(results)
    }
}

/// Files under `scope` whose name contains every needle.
fn walk_names(
    scope: &Path,
    needles: &[String],
    rules: &Arc<ExclusionRuleSet>,
    limit: usize,
) -> Vec<SearchResult> {
    let filter_rules = Arc::clone(rules);
    let walker = WalkBuilder::new(scope)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            entry.depth() == 0
                || !entry.file_type().is_some_and(|t| t.is_dir())
                || !filter_rules.excludes_dir(entry.path())
        })
        .build();

    let mut results = Vec::new();
    for entry in walker {
        if results.len() >= limit {
            break;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Name search skipped entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) || rules.excludes_file(entry.path()) {
            continue;
        }

        let name = file_name(entry.path());
        let lower = name.to_lowercase();
        if needles.iter().all(|needle| lower.contains(needle.as_str())) {
            results.push(SearchResult {
                path: normalize_path(entry.path()),
                preview: format!("Filename match: {name}"),
                name,
                source: ResultSource::Filesystem,
                match_count: 1,
                rank: 0.0,
                highlights: Vec::new(),
                mtime: None,
            });
        }
    }
    results
}

/// Merge content and name hits, preferring the content record per path.
pub fn merge_results(
    database: Vec<SearchResult>,
    filesystem: Vec<SearchResult>,
    max_results: usize,
) -> Vec<SearchResult> {
    let mut by_path: HashMap<String, SearchResult> = HashMap::new();
    for result in database {
        by_path.entry(result.path.clone()).or_insert(result);
    }
    for result in filesystem {
        match by_path.get_mut(&result.path) {
            Some(existing) if existing.source == ResultSource::Database => {
                existing.match_count += result.match_count;
            }
            Some(_) => {}
            None => {
                by_path.insert(result.path.clone(), result);
            }
        }
    }

    let mut merged: Vec<_> = by_path.into_values().collect();
    merged.sort_by(|a, b| b.rank.total_cmp(&a.rank).then_with(|| a.path.cmp(&b.path)));
    merged.truncate(max_results);
    merged
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// About [`PREVIEW_CHARS`] characters around the first match, with `...`
/// markers where text was cut and up to three highlighted spans.
fn make_preview(
    original: &[char],
    folded: &[char],
    needles: &[Vec<char>],
) -> (String, Vec<Highlight>) {
    let first = needles
        .iter()
        .filter_map(|needle| find_from(folded, needle, 0))
        .min()
        .unwrap_or(0);
    let start = first.saturating_sub(PREVIEW_LEAD_CHARS);
    let end = (start + PREVIEW_CHARS).min(original.len());

    let mut preview = String::new();
    let offset = if start > 0 {
        preview.push_str("...");
        3
    } else {
        0
    };
    preview.extend(original[start..end].iter().map(|&c| {
        if c == '\n' || c == '\r' || c == '\t' { ' ' } else { c }
    }));
    if end < original.len() {
        preview.push_str("...");
    }

    let window = &folded[start..end];
    let mut spans: Vec<(usize, usize)> = Vec::new();
    for needle in needles {
        let mut from = 0;
        while let Some(at) = find_from(window, needle, from) {
            spans.push((at, at + needle.len()));
            from = at + needle.len();
        }
    }
    spans.sort_unstable();
    spans.dedup();

    let highlights = spans
        .into_iter()
        .take(MAX_HIGHLIGHTS)
        .map(|(s, e)| Highlight {
            start: s + offset,
            end: e + offset,
            text: original[start + s..start + e].iter().collect(),
        })
        .collect();

    (preview, highlights)
}
