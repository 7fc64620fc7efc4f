//! Error types for document extraction

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::Path;
use std::str::FromStr;

/// Result type for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractError>;

/// Why a file was deliberately not extracted.
///
/// The first four kinds describe transient conditions (another application
/// holds the file, a slow converter, a protected document) and are normally
/// queued for a later attempt. `SizeExceeded` and `Corrupted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SkipReason {
    Locked,
    PermissionDenied,
    Timeout,
    PasswordProtected,
    SizeExceeded,
    Corrupted,
}

impl SkipReason {
    /// All reasons, in declaration order.
    pub const ALL: [SkipReason; 6] = [
        SkipReason::Locked,
        SkipReason::PermissionDenied,
        SkipReason::Timeout,
        SkipReason::PasswordProtected,
        SkipReason::SizeExceeded,
        SkipReason::Corrupted,
    ];

    /// Reasons that are never worth another attempt regardless of policy.
    pub fn is_terminal(self) -> bool {
        matches!(self, SkipReason::SizeExceeded | SkipReason::Corrupted)
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::Locked => "Locked",
            SkipReason::PermissionDenied => "PermissionDenied",
            SkipReason::Timeout => "Timeout",
            SkipReason::PasswordProtected => "PasswordProtected",
            SkipReason::SizeExceeded => "SizeExceeded",
            SkipReason::Corrupted => "Corrupted",
        };
        f.write_str(s)
    }
}

impl FromStr for SkipReason {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "locked" => Ok(SkipReason::Locked),
            "permissiondenied" | "permission" => Ok(SkipReason::PermissionDenied),
            "timeout" => Ok(SkipReason::Timeout),
            "passwordprotected" | "password" => Ok(SkipReason::PasswordProtected),
            "sizeexceeded" | "size" => Ok(SkipReason::SizeExceeded),
            "corrupted" | "corrupt" => Ok(SkipReason::Corrupted),
            _ => Err(format!("Invalid skip reason: {s}")),
        }
    }
}

/// Error type for all extraction operations.
///
/// `Skipped` is the expected failure path: the registry and every extractor
/// report locked, slow, protected, oversized and damaged files through it so
/// the caller can route them without inspecting messages. The remaining
/// variants are genuine errors.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The file was skipped for a classified reason
    #[error("Skipped ({reason}): {detail}")]
    Skipped { reason: SkipReason, detail: String },

    /// No extractor is registered for the extension
    #[error("Unsupported format: .{extension}")]
    Unsupported { extension: String },

    /// An external converter could not be run
    #[error("Converter {program} failed: {message}")]
    Tool { program: String, message: String },

    /// Archive container could not be read
    #[error("Archive error: {source}")]
    Zip {
        #[from]
        source: zip::result::ZipError,
    },

    /// Embedded XML part could not be parsed
    #[error("XML error: {source}")]
    Xml {
        #[from]
        source: quick_xml::Error,
    },

    /// IO errors while reading the file
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// Blocking extraction task failed
    #[error("Async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },
}

impl ExtractError {
    /// Create a skip error.
    pub fn skipped<S: Into<String>>(reason: SkipReason, detail: S) -> Self {
        Self::Skipped {
            reason,
            detail: detail.into(),
        }
    }

    /// Create an unsupported-format error for a path.
    pub fn unsupported(path: &Path) -> Self {
        Self::Unsupported {
            extension: extension_of(path),
        }
    }

    /// The skip classification of this error, if it has one.
    ///
    /// Damaged containers count as `Corrupted` even when they surface as a
    /// zip or XML error rather than an explicit skip.
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Self::Skipped { reason, .. } => Some(*reason),
            Self::Zip { .. } | Self::Xml { .. } => Some(SkipReason::Corrupted),
            _ => None,
        }
    }

    /// Map an IO error into the skip taxonomy.
    ///
    /// `opened` tells whether the handle was already acquired: a permission
    /// failure after that point means another process took an exclusive
    /// lock mid-read.
    pub fn from_io(err: io::Error, opened: bool) -> Self {
        if is_lock_violation(&err) {
            return Self::skipped(SkipReason::Locked, err.to_string());
        }
        match err.kind() {
            io::ErrorKind::PermissionDenied if opened => {
                Self::skipped(SkipReason::Locked, err.to_string())
            }
            io::ErrorKind::PermissionDenied => {
                Self::skipped(SkipReason::PermissionDenied, err.to_string())
            }
            io::ErrorKind::TimedOut => Self::skipped(SkipReason::Timeout, err.to_string()),
            _ => Self::Io { source: err },
        }
    }
}

/// Lowercase extension of a path without the dot, or an empty string.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

// ERROR_SHARING_VIOLATION (32) and ERROR_LOCK_VIOLATION (33)
fn is_lock_violation(err: &io::Error) -> bool {
    cfg!(windows) && matches!(err.raw_os_error(), Some(32) | Some(33))
}
