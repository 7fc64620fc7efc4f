//! Configuration for the extractor registry

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limits shared by every extractor in a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Files larger than this many bytes are skipped without being opened
    pub max_file_size: u64,
    /// Wall-clock limit for a single extraction, in milliseconds
    pub timeout_ms: u64,
    /// Extracted text is truncated to this many characters
    pub max_chars: usize,
    /// Encoding label tried when a text file is not valid UTF-8
    pub fallback_encoding: String,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            max_file_size: 100 * 1024 * 1024,
            timeout_ms: 60_000,
            max_chars: 100_000,
            fallback_encoding: "euc-kr".to_string(),
        }
    }
}

impl ExtractConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_chars(mut self, chars: usize) -> Self {
        self.max_chars = chars;
        self
    }

    pub fn with_fallback_encoding<S: Into<String>>(mut self, label: S) -> Self {
        self.fallback_encoding = label.into();
        self
    }

    /// The fallback encoding, resolving unknown labels to EUC-KR.
    pub fn fallback(&self) -> &'static encoding_rs::Encoding {
        encoding_rs::Encoding::for_label(self.fallback_encoding.as_bytes())
            .unwrap_or(encoding_rs::EUC_KR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExtractConfig::default();
        assert_eq!(config.max_file_size, 100 * 1024 * 1024);
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert_eq!(config.max_chars, 100_000);
        assert_eq!(config.fallback(), encoding_rs::EUC_KR);
    }

    #[test]
    fn test_builder_methods() {
        let config = ExtractConfig::default()
            .with_max_file_size(10)
            .with_timeout(Duration::from_millis(10))
            .with_max_chars(5)
            .with_fallback_encoding("shift_jis");
        assert_eq!(config.max_file_size, 10);
        assert_eq!(config.timeout(), Duration::from_millis(10));
        assert_eq!(config.max_chars, 5);
        assert_eq!(config.fallback(), encoding_rs::SHIFT_JIS);
    }

    #[test]
    fn test_unknown_fallback_label() {
        let config = ExtractConfig::default().with_fallback_encoding("no-such-charset");
        assert_eq!(config.fallback(), encoding_rs::EUC_KR);
    }
}
