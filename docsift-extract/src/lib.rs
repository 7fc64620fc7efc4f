//! # docsift-extract
//!
//! Text extraction for heterogeneous document formats, dispatched by file
//! extension through an [`ExtractorRegistry`].
//!
//! ## Extractors
//!
//! - [`text`]: plain-text files with layered encoding fallback
//! - [`open_document`]: native zip/XML readers for docx, pptx, xlsx and
//!   OpenDocument files
//! - [`automation`]: external converter programs for legacy office formats,
//!   HWP and PDF; registered only when the converter is installed
//!
//! ## Contract
//!
//! Every extraction through the registry:
//!
//! - skips files above the size ceiling without opening them
//! - is bounded by a wall-clock timeout
//! - opens the target read-only and never writes to it
//! - reports locked, protected, oversized and damaged files as
//!   [`ExtractError::Skipped`] with a [`SkipReason`], not as hard errors
//!
//! ## Quick Start
//!
//! ```no_run
//! use docsift_extract::{ExtractConfig, ExtractorRegistry};
//! use std::path::Path;
//!
//! # async fn example() -> docsift_extract::Result<()> {
//! let registry = ExtractorRegistry::with_defaults(ExtractConfig::default());
//! if registry.supports(Path::new("report.docx")) {
//!     let text = registry.extract(Path::new("report.docx")).await?;
//!     println!("{} chars", text.chars().count());
//! }
//! # Ok(())
//! # }
//! ```

pub mod automation;
pub mod config;
pub mod error;
pub mod open_document;
pub mod registry;
pub mod text;

// Re-export main types for easy access
pub use automation::AutomationExtractor;
pub use config::ExtractConfig;
pub use error::{ExtractError, Result, SkipReason};
pub use open_document::{OpenDocumentExtractor, OpenDocumentKind};
pub use registry::{Extractor, ExtractorRegistry};
pub use text::{PlainTextExtractor, decode_bytes};
