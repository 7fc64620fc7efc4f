//! Extraction by driving an external document converter.
//!
//! Legacy binary office formats, the HWP word processor format and PDF are
//! handed to a converter program that writes plain text to stdout. The child
//! gets no stdin, no console window on Windows, and is killed if the
//! registry's timeout drops the extraction future, so a hung converter can
//! never block the pipeline past its per-file budget.

use async_trait::async_trait;
use encoding_rs::Encoding;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::{ExtractError, Result, SkipReason};
use crate::registry::Extractor;
use crate::text::decode_bytes;

/// Argument placeholder replaced by the target file path.
pub const PATH_PLACEHOLDER: &str = "{path}";

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[derive(Debug, Clone)]
pub struct AutomationExtractor {
    name: &'static str,
    program: String,
    args: Vec<String>,
    fallback: &'static Encoding,
}

impl AutomationExtractor {
    pub fn new(name: &'static str, program: &str, args: &[&str], fallback: &'static Encoding) -> Self {
        Self {
            name,
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            fallback,
        }
    }

    /// Converters used for each extension when nothing else is configured.
    pub fn defaults(fallback: &'static Encoding) -> Vec<(&'static str, AutomationExtractor)> {
        vec![
            ("doc", Self::new("antiword", "antiword", &[PATH_PLACEHOLDER], fallback)),
            ("ppt", Self::new("catppt", "catppt", &[PATH_PLACEHOLDER], fallback)),
            ("xls", Self::new("xls2csv", "xls2csv", &[PATH_PLACEHOLDER], fallback)),
            ("hwp", Self::new("hwp5txt", "hwp5txt", &[PATH_PLACEHOLDER], fallback)),
            (
                "pdf",
                Self::new(
                    "pdftotext",
                    "pdftotext",
                    &["-q", "-enc", "UTF-8", PATH_PLACEHOLDER, "-"],
                    fallback,
                ),
            ),
        ]
    }

    /// Whether the converter program can be found.
    pub fn is_available(&self) -> bool {
        find_program(&self.program).is_some()
    }

    fn command(&self, path: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args.iter().map(|arg| {
            if arg == PATH_PLACEHOLDER {
                path.as_os_str().to_owned()
            } else {
                OsString::from(arg)
            }
        }))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        cmd
    }
}

#[async_trait]
impl Extractor for AutomationExtractor {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn extract(&self, path: &Path) -> Result<String> {
        // Converters report an exclusively locked input as a generic failure,
        // so probe with our own read-only open first.
        drop(
            tokio::fs::File::open(path)
                .await
                .map_err(|e| ExtractError::from_io(e, false))?,
        );

        debug!("Running {} on {}", self.program, path.display());
        let output = self
            .command(path)
            .output()
            .await
            .map_err(|e| ExtractError::Tool {
                program: self.program.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr, output.status.code()));
        }

        Ok(decode_bytes(&output.stdout, self.fallback).text)
    }
}

fn classify_failure(stderr: &str, code: Option<i32>) -> ExtractError {
    let lower = stderr.to_lowercase();
    let detail = stderr
        .lines()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim().to_string())
        .unwrap_or_else(|| format!("exit code {code:?}"));

    let reason = if lower.contains("password") || lower.contains("encrypt") {
        SkipReason::PasswordProtected
    } else if lower.contains("being used by another process") || lower.contains("locked") {
        SkipReason::Locked
    } else if lower.contains("permission denied") || lower.contains("access is denied") {
        SkipReason::PermissionDenied
    } else {
        SkipReason::Corrupted
    };
    ExtractError::skipped(reason, detail)
}

fn find_program(program: &str) -> Option<PathBuf> {
    let direct = Path::new(program);
    if direct.components().count() > 1 {
        return direct.is_file().then(|| direct.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths).find_map(|dir| {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) {
            let exe = candidate.with_extension("exe");
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}
