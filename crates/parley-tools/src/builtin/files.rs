// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use parley_config::PermissionLevel;

use crate::{Tool, ToolDefinition, ToolError, ToolHandler, ToolParameter};

const SEARCH_RESULT_CAP: usize = 100;

static EXCLUDED_DIRS: &[&str] = &[".git", "target", "node_modules", "__pycache__", ".venv"];

/// File name fragments that tools refuse to touch regardless of location.
static BLOCKED_NAMES: &[&str] = &[".env", "id_rsa", "id_ed25519", ".ssh"];

/// Resolve `path` inside `root`, rejecting traversal out of the workspace
/// and access to credential-bearing files.  The check is lexical so it also
/// covers paths that do not exist yet (e.g. a `write_file` target).
pub(crate) fn resolve_within_root(root: &Path, path: &str) -> Result<PathBuf, ToolError> {
    let denied = |reason: &str| ToolError::PermissionDenied {
        tool: "file".into(),
        reason: reason.to_string(),
    };

    let candidate = Path::new(path);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(denied(&format!("path escapes the workspace root: {path}")));
                }
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }

    if !normalized.starts_with(root) {
        return Err(denied(&format!("path escapes the workspace root: {path}")));
    }
    for part in normalized.components() {
        let name = part.as_os_str().to_string_lossy();
        if BLOCKED_NAMES.iter().any(|b| name.starts_with(b)) {
            return Err(denied(&format!("access to {name} is blocked for safety")));
        }
    }
    Ok(normalized)
}

fn required_str<'a>(args: &'a Value, key: &str, tool: &str) -> Result<&'a str, ToolError> {
    args[key].as_str().ok_or_else(|| ToolError::Validation {
        tool: tool.to_string(),
        message: format!("missing required parameter: {key}"),
    })
}

fn io_error(tool: &str, e: std::io::Error) -> ToolError {
    match e.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            ToolError::Transient(format!("{tool}: {e}"))
        }
        _ => ToolError::Handler(format!("{tool}: {e}")),
    }
}

// ─── read_file ───────────────────────────────────────────────────────────────

pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    pub fn tool(root: PathBuf) -> Tool {
        Tool::new(
            ToolDefinition::new("read_file", "Read the contents of a text file.")
                .with_parameters(vec![ToolParameter::string(
                    "path",
                    "Path to the file, relative to the workspace root",
                    true,
                )]),
            Arc::new(Self { root }),
        )
        .with_category("file")
        .parallel_safe(true)
    }
}

#[async_trait]
impl ToolHandler for ReadFileTool {
    async fn run(&self, args: &Value) -> Result<Value, ToolError> {
        let path = required_str(args, "path", "read_file")?;
        let resolved = resolve_within_root(&self.root, path)?;
        debug!(path = %resolved.display(), "read_file");
        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| io_error("read_file", e))?;
        Ok(json!(content))
    }
}

// ─── write_file ──────────────────────────────────────────────────────────────

pub struct WriteFileTool {
    root: PathBuf,
}

impl WriteFileTool {
    pub fn tool(root: PathBuf) -> Tool {
        Tool::new(
            ToolDefinition::new(
                "write_file",
                "Write content to a file, creating it (and parent directories) if needed.",
            )
            .with_parameters(vec![
                ToolParameter::string("path", "Path to the file", true),
                ToolParameter::string("content", "Content to write", true),
            ]),
            Arc::new(Self { root }),
        )
        .with_permission(PermissionLevel::Cautious)
        .with_category("file")
    }
}

#[async_trait]
impl ToolHandler for WriteFileTool {
    async fn run(&self, args: &Value) -> Result<Value, ToolError> {
        let path = required_str(args, "path", "write_file")?;
        let content = required_str(args, "content", "write_file")?;
        let resolved = resolve_within_root(&self.root, path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("write_file", e))?;
        }
        tokio::fs::write(&resolved, content)
            .await
            .map_err(|e| io_error("write_file", e))?;
        debug!(path = %resolved.display(), bytes = content.len(), "write_file");
        Ok(json!(format!("Wrote {} bytes to {path}", content.len())))
    }
}

// ─── edit_file ───────────────────────────────────────────────────────────────

pub struct EditFileTool {
    root: PathBuf,
}

impl EditFileTool {
    pub fn tool(root: PathBuf) -> Tool {
        Tool::new(
            ToolDefinition::new(
                "edit_file",
                "Replace the first occurrence of old_text in a file with new_text.",
            )
            .with_parameters(vec![
                ToolParameter::string("path", "Path to the file", true),
                ToolParameter::string("old_text", "Exact text to replace", true),
                ToolParameter::string("new_text", "Replacement text", true),
            ]),
            Arc::new(Self { root }),
        )
        .with_permission(PermissionLevel::Cautious)
        .with_category("file")
    }
}

#[async_trait]
impl ToolHandler for EditFileTool {
    async fn run(&self, args: &Value) -> Result<Value, ToolError> {
        let path = required_str(args, "path", "edit_file")?;
        let old_text = required_str(args, "old_text", "edit_file")?;
        let new_text = required_str(args, "new_text", "edit_file")?;
        let resolved = resolve_within_root(&self.root, path)?;

        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| io_error("edit_file", e))?;
        if !content.contains(old_text) {
            return Err(ToolError::Handler(format!(
                "edit_file: old_text not found in {path}"
            )));
        }
        let updated = content.replacen(old_text, new_text, 1);
        tokio::fs::write(&resolved, &updated)
            .await
            .map_err(|e| io_error("edit_file", e))?;
        Ok(json!(format!("Edited {path}")))
    }
}

// ─── list_directory ──────────────────────────────────────────────────────────

pub struct ListDirectoryTool {
    root: PathBuf,
}

impl ListDirectoryTool {
    pub fn tool(root: PathBuf) -> Tool {
        Tool::new(
            ToolDefinition::new(
                "list_directory",
                "List directory contents. Directories have a trailing slash.",
            )
            .with_parameters(vec![ToolParameter::string(
                "path",
                "Directory to list (defaults to the workspace root)",
                false,
            )]),
            Arc::new(Self { root }),
        )
        .with_category("file")
        .parallel_safe(true)
    }
}

#[async_trait]
impl ToolHandler for ListDirectoryTool {
    async fn run(&self, args: &Value) -> Result<Value, ToolError> {
        let path = args["path"].as_str().unwrap_or(".");
        let resolved = resolve_within_root(&self.root, path)?;

        let mut rd = tokio::fs::read_dir(&resolved)
            .await
            .map_err(|e| io_error("list_directory", e))?;
        let mut entries: Vec<(String, bool)> = Vec::new();
        while let Ok(Some(entry)) = rd.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push((name, is_dir));
        }
        entries.sort_by(|(a, a_dir), (b, b_dir)| b_dir.cmp(a_dir).then(a.cmp(b)));

        if entries.is_empty() {
            return Ok(json!("(empty directory)"));
        }
        let listing: Vec<String> = entries
            .into_iter()
            .map(|(name, is_dir)| if is_dir { format!("{name}/") } else { name })
            .collect();
        Ok(json!(listing.join("\n")))
    }
}

// ─── search_files ────────────────────────────────────────────────────────────

pub struct SearchFilesTool {
    root: PathBuf,
}

impl SearchFilesTool {
    pub fn tool(root: PathBuf) -> Tool {
        Tool::new(
            ToolDefinition::new(
                "search_files",
                "Recursively search for files whose name contains a pattern \
                 (case-insensitive).",
            )
            .with_parameters(vec![
                ToolParameter::string("pattern", "Substring to match in file names", true),
                ToolParameter::string("path", "Directory to search from", false),
            ]),
            Arc::new(Self { root }),
        )
        .with_category("file")
        .parallel_safe(true)
    }
}

#[async_trait]
impl ToolHandler for SearchFilesTool {
    async fn run(&self, args: &Value) -> Result<Value, ToolError> {
        let pattern = required_str(args, "pattern", "search_files")?.to_lowercase();
        let start = args["path"].as_str().unwrap_or(".");
        let base = resolve_within_root(&self.root, start)?;

        let mut matches: Vec<String> = Vec::new();
        let mut stack = vec![base.clone()];
        while let Some(dir) = stack.pop() {
            let mut rd = match tokio::fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(_) => continue,
            };
            while let Ok(Some(entry)) = rd.next_entry().await {
                if matches.len() >= SEARCH_RESULT_CAP {
                    break;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                if is_dir {
                    if !EXCLUDED_DIRS.contains(&name.as_str()) && !name.starts_with('.') {
                        stack.push(entry.path());
                    }
                } else if name.to_lowercase().contains(&pattern) {
                    let rel = entry
                        .path()
                        .strip_prefix(&base)
                        .map(|p| p.to_string_lossy().to_string())
                        .unwrap_or_else(|_| entry.path().to_string_lossy().to_string());
                    matches.push(rel);
                }
            }
        }
        matches.sort();

        if matches.is_empty() {
            return Ok(json!(format!("No files matching '{pattern}'")));
        }
        let mut output = matches.join("\n");
        if matches.len() >= SEARCH_RESULT_CAP {
            output.push_str(&format!("\n... (capped at {SEARCH_RESULT_CAP} results)"));
        }
        Ok(json!(output))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
