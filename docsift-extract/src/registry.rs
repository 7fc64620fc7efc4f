//! Extension-dispatched extractor registry.
//!
//! Each [`Extractor`] is stateless with respect to the file it reads; the
//! registry wraps every call with the shared limits from [`ExtractConfig`]:
//! the size ceiling is checked from metadata before the file is opened, the
//! call runs under a wall-clock timeout, and the result is truncated.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::automation::AutomationExtractor;
use crate::config::ExtractConfig;
use crate::error::{ExtractError, Result, SkipReason, extension_of};
use crate::open_document::{OpenDocumentExtractor, OpenDocumentKind};
use crate::text::{PlainTextExtractor, TEXT_EXTENSIONS};

/// A pluggable text extractor for one family of file formats.
///
/// Implementations must only read the target: never write to it, hold a lock
/// on it, or let a driven application show UI for it.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Extract plain text from the file at `path`
    async fn extract(&self, path: &Path) -> Result<String>;
}

/// Maps lowercase file extensions to extractors.
#[derive(Clone)]
pub struct ExtractorRegistry {
    config: ExtractConfig,
    extractors: BTreeMap<String, Arc<dyn Extractor>>,
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: BTreeMap<&str, &str> = self
            .extractors
            .iter()
            .map(|(ext, x)| (ext.as_str(), x.name()))
            .collect();
        f.debug_struct("ExtractorRegistry")
            .field("config", &self.config)
            .field("extractors", &names)
            .finish()
    }
}

impl ExtractorRegistry {
    /// An empty registry. Nothing is supported until extractors are registered.
    pub fn empty(config: ExtractConfig) -> Self {
        Self {
            config,
            extractors: BTreeMap::new(),
        }
    }

    /// A registry with every built-in extractor available on this machine.
    ///
    /// Converter-backed formats are only registered when their program is
    /// installed, so unsupported formats never reach the crawl.
    pub fn with_defaults(config: ExtractConfig) -> Self {
        let mut registry = Self::empty(config);

        let text: Arc<dyn Extractor> = Arc::new(PlainTextExtractor::new(registry.config.fallback()));
        for ext in TEXT_EXTENSIONS {
            registry.register(ext, text.clone());
        }

        for kind in OpenDocumentKind::ALL {
            let extractor: Arc<dyn Extractor> = Arc::new(OpenDocumentExtractor::new(kind));
            for ext in kind.extensions() {
                registry.register(ext, extractor.clone());
            }
        }

        for (ext, automation) in AutomationExtractor::defaults(registry.config.fallback()) {
            if automation.is_available() {
                registry.register(ext, Arc::new(automation));
            } else {
                debug!("No converter for .{ext}; format unsupported");
            }
        }

        registry
    }

    /// Register (or replace) the extractor for an extension.
    pub fn register(&mut self, extension: &str, extractor: Arc<dyn Extractor>) {
        self.extractors.insert(
            extension.trim_start_matches('.').to_lowercase(),
            extractor,
        );
    }

    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    /// Whether a file with this path's extension can be extracted.
    pub fn supports(&self, path: &Path) -> bool {
        self.extractors.contains_key(&extension_of(path))
    }

    /// All registered extensions.
    pub fn extensions(&self) -> BTreeSet<String> {
        self.extractors.keys().cloned().collect()
    }

    /// Check the size ceiling without opening the file.
    pub async fn check_size(&self, path: &Path) -> Result<u64> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| ExtractError::from_io(e, false))?;
        let size = metadata.len();
        if size > self.config.max_file_size {
            return Err(ExtractError::skipped(
                SkipReason::SizeExceeded,
                format!("{size} bytes exceeds limit of {}", self.config.max_file_size),
            ));
        }
        Ok(size)
    }

    /// Extract text from a file, enforcing size, timeout and truncation.
    pub async fn extract(&self, path: &Path) -> Result<String> {
        let extractor = self
            .extractors
            .get(&extension_of(path))
            .ok_or_else(|| ExtractError::unsupported(path))?;

        self.check_size(path).await?;

        let timeout = self.config.timeout();
        let text = match tokio::time::timeout(timeout, extractor.extract(path)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ExtractError::skipped(
                    SkipReason::Timeout,
                    format!("{} exceeded {:.1}s", extractor.name(), timeout.as_secs_f64()),
                ));
            }
        };

        Ok(truncate_chars(text, self.config.max_chars))
    }
}

fn truncate_chars(mut text: String, max_chars: usize) -> String {
    if let Some((idx, _)) = text.char_indices().nth(max_chars) {
        text.truncate(idx);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    struct SlowExtractor;

    #[async_trait]
    impl Extractor for SlowExtractor {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn extract(&self, _path: &Path) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(String::new())
        }
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("가나다라".to_string(), 2), "가나");
        assert_eq!(truncate_chars("abc".to_string(), 10), "abc");
    }

    #[tokio::test]
    async fn test_defaults_support_text_and_open_documents() {
        let registry = ExtractorRegistry::with_defaults(ExtractConfig::default());
        assert!(registry.supports(Path::new("a.TXT")));
        assert!(registry.supports(Path::new("b.docx")));
        assert!(registry.supports(Path::new("c.xlsx")));
        assert!(registry.supports(Path::new("d.odt")));
        assert!(!registry.supports(Path::new("e.exe")));
        assert!(!registry.supports(Path::new("Makefile")));
    }

    #[tokio::test]
    async fn test_size_ceiling_skips_without_reading() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("big.txt");
        tokio::fs::write(&path, "x".repeat(64)).await?;

        let registry = ExtractorRegistry::with_defaults(ExtractConfig::default().with_max_file_size(10));
        let err = registry.extract(&path).await.unwrap_err();
        assert_eq!(err.skip_reason(), Some(SkipReason::SizeExceeded));
        Ok(())
    }

    #[tokio::test]
    async fn test_timeout_is_a_skip() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("hang.slow");
        tokio::fs::write(&path, "x").await?;

        let mut registry =
            ExtractorRegistry::empty(ExtractConfig::default().with_timeout(Duration::from_millis(50)));
        registry.register("slow", Arc::new(SlowExtractor));

        let err = registry.extract(&path).await.unwrap_err();
        assert_eq!(err.skip_reason(), Some(SkipReason::Timeout));
        Ok(())
    }

    #[tokio::test]
    async fn test_unsupported_extension() {
        let registry = ExtractorRegistry::empty(ExtractConfig::default());
        let err = registry.extract(Path::new("/nowhere/file.xyz")).await.unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported { ref extension } if extension == "xyz"));
    }

    #[tokio::test]
    async fn test_text_is_truncated() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("long.md");
        tokio::fs::write(&path, "abcdefghij").await?;

        let registry = ExtractorRegistry::with_defaults(ExtractConfig::default().with_max_chars(4));
        assert_eq!(registry.extract(&path).await?, "abcd");
        Ok(())
    }
}
