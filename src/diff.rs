//! Changed-file discovery for incremental runs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::config::FileFilter;
use crate::error::{MutationError, Result};
use crate::mutant::SourceSpan;

/// Changed line ranges per project-relative file.
///
/// A file with no recorded ranges counts as changed everywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    files: BTreeMap<PathBuf, Vec<(usize, usize)>>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a whole file as changed
    pub fn add_file(&mut self, path: impl Into<PathBuf>) {
        self.files.insert(path.into(), Vec::new());
    }

    /// Mark lines `first..=last` of a file as changed
    pub fn add_lines(&mut self, path: impl Into<PathBuf>, first: usize, last: usize) {
        self.files
            .entry(path.into())
            .or_default()
            .push((first, last.max(first)));
    }

    pub fn contains_file(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    /// Whether the diff touches code covered by `span` in `file`
    pub fn touches(&self, file: &Path, span: &SourceSpan) -> bool {
        match self.files.get(file) {
            None => false,
            Some(ranges) if ranges.is_empty() => true,
            Some(ranges) => ranges
                .iter()
                .any(|&(first, last)| span.overlaps_lines(first, last)),
        }
    }

    /// Drop files whose changes must not bring mutants back into scope
    pub fn without(mut self, ignored: &FileFilter) -> Self {
        self.files.retain(|path, _| !ignored.matches(path));
        self
    }

    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.files.keys().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Source of the files changed relative to a reference
pub trait DiffProvider {
    fn changes_since(&self, target: &str) -> Result<ChangeSet>;
}

/// Asks `git` for a zero-context diff of the working tree
pub struct GitDiffProvider {
    project_root: PathBuf,
}

impl GitDiffProvider {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }
}

impl DiffProvider for GitDiffProvider {
    fn changes_since(&self, target: &str) -> Result<ChangeSet> {
        let output = Command::new("git")
            .args(["diff", "--relative", "--unified=0", "--no-color", target])
            .current_dir(&self.project_root)
            .output()
            .map_err(|e| MutationError::DiffError {
                message: format!("Failed to run git: {e}"),
            })?;

        if !output.status.success() {
            return Err(MutationError::DiffError {
                message: format!(
                    "git diff against '{}' failed: {}",
                    target,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let changes = parse_unified_diff(&String::from_utf8_lossy(&output.stdout));
        debug!(reference = target, files = changes.len(), "collected git diff");
        Ok(changes)
    }
}

/// Read changed files and their new-side hunk ranges from `git diff -U0` output
pub fn parse_unified_diff(diff: &str) -> ChangeSet {
    let mut changes = ChangeSet::new();
    let mut current: Option<PathBuf> = None;

    // Deleted and binary files stay wholly changed whatever hunks follow.
    let mut whole_file = false;

    for line in diff.lines() {
        if let Some(header) = line.strip_prefix("diff --git ") {
            current = header.rsplit_once(" b/").map(|(_, path)| PathBuf::from(path));
            whole_file = false;
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            let new = rest.trim();
            if new != "/dev/null" {
                current = Some(PathBuf::from(new.strip_prefix("b/").unwrap_or(new)));
            }
        } else if let Some(rest) = line.strip_prefix("--- ") {
            // Deleted files only name the old side.
            let old = rest.trim();
            if old != "/dev/null" {
                current = Some(PathBuf::from(old.strip_prefix("a/").unwrap_or(old)));
            }
        } else if line.starts_with("@@ ") {
            if whole_file {
                continue;
            }
            if let (Some(path), Some((first, last))) = (&current, hunk_range(line)) {
                changes.add_lines(path.clone(), first, last);
            }
        } else if line.starts_with("Binary files ") || line.starts_with("deleted file mode") {
            if let Some(path) = &current {
                changes.add_file(path.clone());
                whole_file = true;
            }
        }
    }
    changes
}

/// New-side line range of a `@@ -a,b +c,d @@` header; pure deletions map to the
/// line they were removed at
fn hunk_range(header: &str) -> Option<(usize, usize)> {
    let new_side = header.split_whitespace().find(|part| part.starts_with('+'))?;
    let mut parts = new_side.trim_start_matches('+').splitn(2, ',');
    let start: usize = parts.next()?.parse().ok()?;
    let count: usize = match parts.next() {
        Some(count) => count.parse().ok()?,
        None => 1,
    };
    let first = start.max(1);
    Some((first, first + count.saturating_sub(1)))
}
