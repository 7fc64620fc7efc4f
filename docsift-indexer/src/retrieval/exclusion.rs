//! Rules deciding which directories and files a crawl never opens.
//!
//! An [`ExclusionRuleSet`] is built once per crawl pass and shared read-only
//! by the walk. Every comparison is case-insensitive: names, extensions,
//! absolute prefixes and user glob patterns alike.

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::Path;

/// Directory names that never hold user documents worth indexing.
pub const EXCLUDED_DIR_NAMES: &[&str] = &[
    ".git",
    "node_modules",
    "venv",
    "env",
    "__pycache__",
    ".vscode",
    ".idea",
    "dist",
    "build",
    "out",
    "target",
    ".next",
    ".nuxt",
    ".cache",
    ".temp",
    ".tmp",
    "vendor",
    "packages",
    "bower_components",
    "$recycle.bin",
    "system volume information",
];

pub const EXCLUDED_FILE_NAMES: &[&str] = &[
    "desktop.ini",
    "thumbs.db",
    "ehthumbs.db",
    ".ds_store",
    ".gitignore",
    ".gitattributes",
];

/// Lock and autosave files written by office suites next to open documents.
pub const TEMP_FILE_PREFIXES: &[&str] = &["~$", "~wrl"];

pub const EXCLUDED_EXTENSIONS: &[&str] = &[
    // executables and libraries
    "exe", "dll", "sys", "bin", "so", "dylib", "a", "lib", "o", "obj", "class", "pyc", "pyo", "pyd",
    // disk images and archives
    "iso", "img", "dmg", "vhd", "vmdk", "zip", "rar", "7z", "tar", "gz", "bz2",
    // media
    "mp3", "mp4", "avi", "mkv", "mov", "flv", "jpg", "jpeg", "png", "gif", "bmp", "ico", "svg",
    // fonts
    "ttf", "otf", "woff", "woff2", "eot",
];

pub const EXCLUDED_PATH_PREFIXES: &[&str] = &[
    r"C:\Windows",
    r"C:\Program Files",
    r"C:\Program Files (x86)",
    r"C:\ProgramData",
    r"C:\$Recycle.Bin",
];

#[cfg(unix)]
const UNIX_PSEUDO_FILESYSTEMS: &[&str] = &["/proc", "/sys", "/dev"];
#[cfg(not(unix))]
const UNIX_PSEUDO_FILESYSTEMS: &[&str] = &[];

#[derive(Debug, Clone)]
pub struct ExclusionRuleSet {
    dir_names: HashSet<String>,
    file_names: HashSet<String>,
    extensions: HashSet<String>,
    path_prefixes: Vec<String>,
    patterns: Vec<String>,
    globs: GlobSet,
}

impl Default for ExclusionRuleSet {
    fn default() -> Self {
        Self {
            dir_names: lowercase_set(EXCLUDED_DIR_NAMES),
            file_names: lowercase_set(EXCLUDED_FILE_NAMES),
            extensions: lowercase_set(EXCLUDED_EXTENSIONS),
            path_prefixes: EXCLUDED_PATH_PREFIXES
                .iter()
                .chain(UNIX_PSEUDO_FILESYSTEMS)
                .map(|p| p.to_lowercase())
                .collect(),
            patterns: Vec::new(),
            globs: GlobSet::empty(),
        }
    }
}

impl ExclusionRuleSet {
    /// The built-in rules plus user glob patterns such as `*.bak` or
    /// `**/archive/**`.
    pub fn with_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut kept = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            let glob = GlobBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .with_context(|| format!("Invalid exclusion pattern: {pattern}"))?;
            builder.add(glob);
            kept.push(pattern.to_string());
        }

        Ok(Self {
            patterns: kept,
            globs: builder.build()?,
            ..Self::default()
        })
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether a directory (and its whole subtree) is excluded.
    pub fn excludes_dir(&self, path: &Path) -> bool {
        let Some(name) = lower_name(path) else {
            return false;
        };
        self.dir_names.contains(&name)
            || !starts_alphanumeric(&name)
            || self.under_excluded_prefix(path)
            || self.matches_pattern(&name, path)
    }

    /// Whether a file is excluded before it is ever opened.
    pub fn excludes_file(&self, path: &Path) -> bool {
        let Some(name) = lower_name(path) else {
            return true;
        };
        if self.file_names.contains(&name)
            || TEMP_FILE_PREFIXES.iter().any(|p| name.starts_with(p))
            || !starts_alphanumeric(&name)
        {
            return true;
        }

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        self.extensions.contains(&extension)
            || self.under_excluded_prefix(path)
            || self.matches_pattern(&name, path)
    }

    fn under_excluded_prefix(&self, path: &Path) -> bool {
        let lower = path.to_string_lossy().to_lowercase();
        self.path_prefixes.iter().any(|prefix| {
            lower.strip_prefix(prefix.as_str()).is_some_and(|rest| {
                rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\')
            })
        })
    }

    fn matches_pattern(&self, name: &str, path: &Path) -> bool {
        !self.globs.is_empty() && (self.globs.is_match(name) || self.globs.is_match(path))
    }
}

fn lowercase_set(items: &[&str]) -> HashSet<String> {
    items.iter().map(|s| s.to_lowercase()).collect()
}

fn lower_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_lowercase())
}

// Hidden, system and temp entries conventionally start with punctuation
fn starts_alphanumeric(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_alphanumeric)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directory_rules() {
        let rules = ExclusionRuleSet::default();
        assert!(rules.excludes_dir(Path::new("/home/u/project/node_modules")));
        assert!(rules.excludes_dir(Path::new("/home/u/project/Target")));
        assert!(rules.excludes_dir(Path::new("/home/u/.config")));
        assert!(rules.excludes_dir(Path::new("/home/u/$Recycle.Bin")));
        assert!(!rules.excludes_dir(Path::new("/home/u/Documents")));
        assert!(!rules.excludes_dir(Path::new("/home/u/문서")));
    }

    #[test]
    fn test_default_file_rules() {
        let rules = ExclusionRuleSet::default();
        assert!(rules.excludes_file(Path::new("/d/Thumbs.db")));
        assert!(rules.excludes_file(Path::new("/d/~$report.docx")));
        assert!(rules.excludes_file(Path::new("/d/~WRL0001.tmp")));
        assert!(rules.excludes_file(Path::new("/d/.env")));
        assert!(rules.excludes_file(Path::new("/d/setup.EXE")));
        assert!(rules.excludes_file(Path::new("/d/photo.jpeg")));
        assert!(!rules.excludes_file(Path::new("/d/report.docx")));
        assert!(!rules.excludes_file(Path::new("/d/보고서.hwp")));
    }

    #[test]
    fn test_prefix_rules_are_case_insensitive_and_bounded() {
        let rules = ExclusionRuleSet::default();
        assert!(rules.excludes_file(Path::new(r"c:\windows\system32\notes.txt")));
        assert!(rules.excludes_dir(Path::new(r"C:\PROGRAM FILES\App")));
        assert!(!rules.excludes_dir(Path::new(r"C:\WindowsBackup")));
    }

    #[test]
    fn test_user_patterns() -> Result<()> {
        let rules = ExclusionRuleSet::with_patterns(&["*.BAK", "**/archive/**", "  "])?;
        assert_eq!(rules.patterns(), &["*.BAK".to_string(), "**/archive/**".to_string()]);
        assert!(rules.excludes_file(Path::new("/d/old.bak")));
        assert!(rules.excludes_file(Path::new("/d/archive/2019/notes.txt")));
        assert!(rules.excludes_dir(Path::new("/d/Archive/2019")));
        assert!(!rules.excludes_file(Path::new("/d/notes.txt")));
        Ok(())
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let err = ExclusionRuleSet::with_patterns(&["[unclosed"]).unwrap_err();
        assert!(err.to_string().contains("[unclosed"));
    }
}
