//! Built-in analyzer counting source files and lines.
//!
//! Hidden entries and common vendored/build directories are skipped, so the
//! numbers describe the project's own code.

use super::Analyzer;
use crate::error::AnalyzerError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Directory names never descended into.
const EXCLUDED_DIRS: &[&str] = &[
    "vendor",
    "node_modules",
    "tmp",
    "log",
    "coverage",
    "target",
    "dist",
    "build",
];

/// Counts of one extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtensionStats {
    pub files: u64,
    pub lines: u64,
}

/// Result of a source-stats run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub files: u64,
    pub lines: u64,
    pub blank_lines: u64,
    pub by_extension: BTreeMap<String, ExtensionStats>,
}

/// Counts files with the configured extensions and their lines.
#[derive(Debug, Clone)]
pub struct SourceStatsAnalyzer {
    name: String,
    extensions: Vec<String>,
}

impl SourceStatsAnalyzer {
    pub fn new(name: impl Into<String>, extensions: Vec<String>) -> Self {
        Self {
            name: name.into(),
            extensions,
        }
    }

    fn matches(&self, path: &Path) -> bool {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        self.extensions.iter().any(|e| e == ext)
    }

    /// Walk `root` synchronously and collect statistics.
    pub fn collect(&self, root: &Path) -> Result<SourceStats, AnalyzerError> {
        let mut stats = SourceStats::default();

        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_excluded(entry));

        for entry in walker {
            let entry = entry.map_err(|e| AnalyzerError::Walk {
                path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf()),
                message: e.to_string(),
            })?;

            if !entry.file_type().is_file() || !self.matches(entry.path()) {
                continue;
            }

            let (lines, blank) = count_lines(entry.path())?;

            let ext = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_string();

            stats.files += 1;
            stats.lines += lines;
            stats.blank_lines += blank;

            let per_ext = stats.by_extension.entry(ext).or_default();
            per_ext.files += 1;
            per_ext.lines += lines;
        }

        Ok(stats)
    }
}

/// Total and blank line counts of one file.
///
/// Files that are not UTF-8 count as files without lines; read failures are
/// errors.
fn count_lines(path: &Path) -> Result<(u64, u64), AnalyzerError> {
    let content = std::fs::read(path).map_err(|e| AnalyzerError::Walk {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let text = match String::from_utf8(content) {
        Ok(text) => text,
        Err(_) => return Ok((0, 0)),
    };

    let lines = text.lines().count() as u64;
    let blank = text.lines().filter(|l| l.trim().is_empty()).count() as u64;
    Ok((lines, blank))
}

fn is_excluded(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();

    // Hidden files and directories
    if name.starts_with('.') {
        return true;
    }

    entry.file_type().is_dir() && EXCLUDED_DIRS.contains(&&*name)
}

#[async_trait]
impl Analyzer for SourceStatsAnalyzer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, path: &Path) -> Result<Value, AnalyzerError> {
        let analyzer = self.clone();
        let root: PathBuf = path.to_path_buf();

        let stats = tokio::task::spawn_blocking(move || analyzer.collect(&root))
            .await
            .map_err(|e| AnalyzerError::Walk {
                path: path.to_path_buf(),
                message: e.to_string(),
            })??;

        serde_json::to_value(stats).map_err(|e| AnalyzerError::InvalidOutput(e.to_string()))
    }
}
