use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::fix::{Fix, FixBatch};

/// Applies fix batches to the working tree by text search, never by line
/// number, and keeps pre-run snapshots of every file it touches.
///
/// A backup is captured exactly once per run, before the file's first
/// modification; it is the sole authority for rollback content.
pub struct Applier {
    repo_root: PathBuf,
    backups: HashMap<String, Vec<u8>>,
}

impl Applier {
    pub fn new(repo_root: &Path) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            backups: HashMap::new(),
        }
    }

    /// Apply every fix in the batch, returning the list of modified files.
    ///
    /// Fixes are applied in model order; fixes in the same file mutate one
    /// in-memory buffer sequentially, so later fixes see earlier
    /// replacements. Any fix whose `original_code` cannot be located aborts
    /// the whole batch with an application error (the caller rolls back).
    pub fn apply(&mut self, batch: &FixBatch) -> Result<Vec<String>> {
        // Group per file, preserving first-appearance order across the batch.
        let mut order: Vec<&str> = Vec::new();
        let mut by_file: HashMap<&str, Vec<&Fix>> = HashMap::new();
        for fix in &batch.fixes {
            let file = fix.file.as_str();
            if !by_file.contains_key(file) {
                order.push(file);
            }
            by_file.entry(file).or_default().push(fix);
        }

        let mut modified = Vec::new();
        for file in order {
            let path = self.repo_root.join(file);
            let bytes = std::fs::read(&path).map_err(|e| {
                Error::Application(format!("cannot read {file}: {e}"))
            })?;

            self.backups
                .entry(file.to_string())
                .or_insert_with(|| bytes.clone());

            let mut buffer = String::from_utf8(bytes).map_err(|_| {
                Error::Application(format!("{file} is not valid UTF-8"))
            })?;

            for fix in &by_file[file] {
                buffer = apply_one(&buffer, fix)?;
                debug!(file, issue = %fix.issue_addressed, "applied fix");
            }

            std::fs::write(&path, &buffer)?;
            modified.push(file.to_string());
        }

        info!(files = modified.len(), fixes = batch.fixes.len(), "applied fix batch");
        Ok(modified)
    }

    /// Restore every backed-up file to its pre-run bytes and clear the table.
    pub fn restore(&mut self) -> Result<()> {
        for (file, bytes) in &self.backups {
            let path = self.repo_root.join(file);
            std::fs::write(&path, bytes)?;
            debug!(file, "restored from backup");
        }
        let count = self.backups.len();
        self.backups.clear();
        info!(files = count, "rolled back working tree");
        Ok(())
    }

    /// Commit to the applied edits: drop all backups.
    pub fn clear_backups(&mut self) {
        self.backups.clear();
    }

    pub fn backed_up_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self.backups.keys().cloned().collect();
        files.sort();
        files
    }
}

/// Apply a single fix to a file buffer: exact substring match first, then
/// the whitespace-normalized line-sequence fallback.
fn apply_one(buffer: &str, fix: &Fix) -> Result<String> {
    // 1. Exact match: replace the first occurrence, bytes verbatim.
    if buffer.contains(&fix.original_code) {
        return Ok(buffer.replacen(&fix.original_code, &fix.fixed_code, 1));
    }

    // 2. Whitespace-normalized match over trimmed lines.
    if let Some(replaced) = replace_normalized(buffer, &fix.original_code, &fix.fixed_code) {
        return Ok(replaced);
    }

    let preview: String = fix.original_code.chars().take(80).collect();
    Err(Error::Application(format!(
        "original code not found in {}: {preview:?}",
        fix.file
    )))
}

/// Find the first contiguous run of buffer lines whose trimmed forms equal
/// the trimmed `original` lines, and splice in `replacement` re-indented
/// with the leading whitespace of the first matched line.
fn replace_normalized(buffer: &str, original: &str, replacement: &str) -> Option<String> {
    let needle: Vec<&str> = strip_one_trailing_newline(original)
        .split('\n')
        .map(str::trim)
        .collect();
    if needle.is_empty() {
        return None;
    }

    let lines: Vec<&str> = buffer.split('\n').collect();
    if lines.len() < needle.len() {
        return None;
    }

    let start = (0..=lines.len() - needle.len()).find(|&start| {
        needle
            .iter()
            .enumerate()
            .all(|(k, want)| lines[start + k].trim() == *want)
    })?;

    let indent: String = lines[start]
        .chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .collect();

    let replacement_lines: Vec<String> = strip_one_trailing_newline(replacement)
        .split('\n')
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                format!("{indent}{}", line.trim_start())
            }
        })
        .collect();

    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    out.extend(lines[..start].iter().map(|l| l.to_string()));
    out.extend(replacement_lines);
    out.extend(lines[start + needle.len()..].iter().map(|l| l.to_string()));
    Some(out.join("\n"))
}

fn strip_one_trailing_newline(s: &str) -> &str {
    s.strip_suffix('\n').unwrap_or(s)
}
