//! Plain-text extraction with layered encoding detection.
//!
//! Text files in the wild are not reliably UTF-8. Decoding tries, in order:
//!
//! 1. a byte-order mark, when present
//! 2. strict UTF-8
//! 3. strict decode in the configured regional fallback (EUC-KR/CP949 by default)
//! 4. statistical detection via `chardetng`, accepted only if it decodes cleanly
//! 5. lossy UTF-8 with U+FFFD replacement, which always succeeds

use async_trait::async_trait;
use encoding_rs::Encoding;
use std::path::Path;
use tokio::io::AsyncReadExt;

use crate::error::{ExtractError, Result};
use crate::registry::Extractor;

/// Extensions handled by [`PlainTextExtractor`].
pub const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "log", "md", "py", "js", "ts", "jsx", "tsx", "java", "cpp", "c", "h", "cs", "json",
    "xml", "html", "css", "sql", "sh", "bat", "ps1", "yaml", "yml", "csv", "ini",
];

/// Which decoding layer produced the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeLayer {
    Bom,
    Utf8,
    Fallback,
    Detected,
    Lossy,
}

#[derive(Debug, Clone)]
pub struct DecodedText {
    pub text: String,
    pub encoding: &'static Encoding,
    pub layer: DecodeLayer,
}

/// Decode raw bytes, trying each layer in turn.
pub fn decode_bytes(bytes: &[u8], fallback: &'static Encoding) -> DecodedText {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return DecodedText {
            text: text.into_owned(),
            encoding,
            layer: DecodeLayer::Bom,
        };
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return DecodedText {
            text: text.to_string(),
            encoding: encoding_rs::UTF_8,
            layer: DecodeLayer::Utf8,
        };
    }

    if let Some(text) = fallback.decode_without_bom_handling_and_without_replacement(bytes) {
        return DecodedText {
            text: text.into_owned(),
            encoding: fallback,
            layer: DecodeLayer::Fallback,
        };
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    let guessed = detector.guess(None, true);
    if guessed != encoding_rs::UTF_8 {
        let (text, had_errors) = guessed.decode_without_bom_handling(bytes);
        if !had_errors {
            return DecodedText {
                text: text.into_owned(),
                encoding: guessed,
                layer: DecodeLayer::Detected,
            };
        }
    }

    DecodedText {
        text: String::from_utf8_lossy(bytes).into_owned(),
        encoding: encoding_rs::UTF_8,
        layer: DecodeLayer::Lossy,
    }
}

/// Reads a file and decodes it as text.
#[derive(Debug, Clone)]
pub struct PlainTextExtractor {
    fallback: &'static Encoding,
}

impl PlainTextExtractor {
    pub fn new(fallback: &'static Encoding) -> Self {
        Self { fallback }
    }
}

impl Default for PlainTextExtractor {
    fn default() -> Self {
        Self::new(encoding_rs::EUC_KR)
    }
}

#[async_trait]
impl Extractor for PlainTextExtractor {
    fn name(&self) -> &'static str {
        "plain-text"
    }

    async fn extract(&self, path: &Path) -> Result<String> {
        let bytes = read_shared(path).await?;
        let fallback = self.fallback;
        let decoded = tokio::task::spawn_blocking(move || decode_bytes(&bytes, fallback)).await?;
        Ok(decoded.text)
    }
}

/// Read a whole file through a read-only handle, classifying lock failures.
pub(crate) async fn read_shared(path: &Path) -> Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ExtractError::from_io(e, false))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .await
        .map_err(|e| ExtractError::from_io(e, true))?;
    Ok(bytes)
}
