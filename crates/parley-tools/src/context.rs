// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-session tracking of file reads and modifications.
//!
//! Lets the engine (and through it, the models) answer questions like "has
//! this file changed since I last read it?" without re-reading everything.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOperation {
    Create,
    Write,
    Edit,
    Delete,
}

impl std::fmt::Display for FileOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileOperation::Create => write!(f, "create"),
            FileOperation::Write => write!(f, "write"),
            FileOperation::Edit => write!(f, "edit"),
            FileOperation::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileModification {
    pub path: String,
    pub operation: FileOperation,
    pub timestamp: DateTime<Utc>,
    pub content_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReadRecord {
    pub path: String,
    pub content_hash: String,
    pub timestamp: DateTime<Utc>,
}

/// Compute the content hash used for staleness detection.
pub fn content_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

#[derive(Debug)]
pub struct ToolContext {
    pub session_id: String,
    modifications: Vec<FileModification>,
    read_files: HashMap<String, FileReadRecord>,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            modifications: Vec::new(),
            read_files: HashMap::new(),
        }
    }
}

impl ToolContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_modification(
        &mut self,
        path: impl Into<String>,
        operation: FileOperation,
        content_hash: Option<String>,
    ) {
        self.modifications.push(FileModification {
            path: path.into(),
            operation,
            timestamp: Utc::now(),
            content_hash,
        });
    }

    pub fn record_read(&mut self, path: impl Into<String>, content_hash: impl Into<String>) {
        let path = path.into();
        self.read_files.insert(
            path.clone(),
            FileReadRecord {
                path,
                content_hash: content_hash.into(),
                timestamp: Utc::now(),
            },
        );
    }

    /// True iff the file was read before and its content has changed since.
    /// A file that was never read is not "stale".
    pub fn is_file_stale(&self, path: &str, current_hash: &str) -> bool {
        match self.read_files.get(path) {
            Some(record) => record.content_hash != current_hash,
            None => false,
        }
    }

    pub fn was_modified(&self, path: &str) -> bool {
        self.modifications.iter().any(|m| m.path == path)
    }

    /// Paths of recently read files, most recent first.
    pub fn recently_read(&self, limit: usize) -> Vec<String> {
        let mut records: Vec<&FileReadRecord> = self.read_files.values().collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.into_iter().take(limit).map(|r| r.path.clone()).collect()
    }

    /// Unique paths of recently modified files, most recent first.
    pub fn recently_modified(&self, limit: usize) -> Vec<String> {
        let mut seen = Vec::new();
        for m in self.modifications.iter().rev() {
            if !seen.contains(&m.path) {
                seen.push(m.path.clone());
                if seen.len() >= limit {
                    break;
                }
            }
        }
        seen
    }

    /// Human-readable summary of this session's modifications, grouped by
    /// operation, bounded to the `max_entries` most recent.
    pub fn modification_summary(&self, max_entries: usize) -> String {
        if self.modifications.is_empty() {
            return "No file modifications in this session.".to_string();
        }

        let mut lines = vec![format!(
            "File modifications ({} total):",
            self.modifications.len()
        )];

        let recent = &self.modifications[self.modifications.len().saturating_sub(max_entries)..];
        let mut by_operation: Vec<(FileOperation, Vec<&str>)> = Vec::new();
        for m in recent {
            match by_operation.iter_mut().find(|(op, _)| *op == m.operation) {
                Some((_, paths)) => {
                    if !paths.contains(&m.path.as_str()) {
                        paths.push(&m.path);
                    }
                }
                None => by_operation.push((m.operation, vec![&m.path])),
            }
        }

        for (operation, paths) in by_operation {
            lines.push(format!("  {operation}: {} file(s)", paths.len()));
            for path in paths.iter().take(5) {
                lines.push(format!("    - {path}"));
            }
            if paths.len() > 5 {
                lines.push(format!("    ... and {} more", paths.len() - 5));
            }
        }
        lines.join("\n")
    }

    pub fn clear(&mut self) {
        self.modifications.clear();
        self.read_files.clear();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_has_no_activity() {
        let ctx = ToolContext::new();
        assert!(!ctx.was_modified("/a"));
        assert!(ctx.recently_read(10).is_empty());
        assert_eq!(
            ctx.modification_summary(10),
            "No file modifications in this session."
        );
    }

    #[test]
    fn staleness_requires_prior_read_and_changed_hash() {
        let mut ctx = ToolContext::new();
        // Never read → not stale.
        assert!(!ctx.is_file_stale("/a", "h1"));
        ctx.record_read("/a", "h1");
        assert!(!ctx.is_file_stale("/a", "h1"));
        ctx.record_modification("/a", FileOperation::Edit, Some("h2".into()));
        assert!(ctx.is_file_stale("/a", "h2"));
    }

    #[test]
    fn was_modified_tracks_paths() {
        let mut ctx = ToolContext::new();
        ctx.record_modification("/a", FileOperation::Write, None);
        assert!(ctx.was_modified("/a"));
        assert!(!ctx.was_modified("/b"));
    }

    #[test]
    fn recently_modified_is_unique_and_most_recent_first() {
        let mut ctx = ToolContext::new();
        ctx.record_modification("/a", FileOperation::Write, None);
        ctx.record_modification("/b", FileOperation::Edit, None);
        ctx.record_modification("/a", FileOperation::Edit, None);
        assert_eq!(ctx.recently_modified(10), vec!["/a", "/b"]);
        assert_eq!(ctx.recently_modified(1), vec!["/a"]);
    }

    #[test]
    fn summary_groups_by_operation() {
        let mut ctx = ToolContext::new();
        ctx.record_modification("/a", FileOperation::Write, None);
        ctx.record_modification("/b", FileOperation::Write, None);
        ctx.record_modification("/c", FileOperation::Delete, None);
        let summary = ctx.modification_summary(20);
        assert!(summary.contains("3 total"));
        assert!(summary.contains("write: 2 file(s)"));
        assert!(summary.contains("delete: 1 file(s)"));
    }

    #[test]
    fn content_hash_is_stable_and_distinct() {
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
        assert_eq!(content_hash(b"abc").len(), 64);
    }

    #[test]
    fn clear_resets_tracking() {
        let mut ctx = ToolContext::new();
        ctx.record_read("/a", "h");
        ctx.record_modification("/a", FileOperation::Write, None);
        ctx.clear();
        assert!(ctx.recently_read(10).is_empty());
        assert!(!ctx.was_modified("/a"));
    }
}
