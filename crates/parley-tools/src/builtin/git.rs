// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use parley_config::PermissionLevel;

use crate::{Tool, ToolDefinition, ToolError, ToolHandler, ToolParameter};

async fn run_git(root: &PathBuf, args: &[&str]) -> Result<String, ToolError> {
    debug!(?args, "git");
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .await
        .map_err(|e| ToolError::Handler(format!("git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ToolError::Handler(format!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
}

// ─── git_status ──────────────────────────────────────────────────────────────

pub struct GitStatusTool {
    root: PathBuf,
}

impl GitStatusTool {
    pub fn tool(root: PathBuf) -> Tool {
        Tool::new(
            ToolDefinition::new("git_status", "Show the working tree status."),
            Arc::new(Self { root }),
        )
        .with_category("git")
        .parallel_safe(true)
    }
}

#[async_trait]
impl ToolHandler for GitStatusTool {
    async fn run(&self, _args: &Value) -> Result<Value, ToolError> {
        let status = run_git(&self.root, &["status", "--short", "--branch"]).await?;
        if status.lines().count() <= 1 {
            return Ok(json!(format!("{status}\n(working tree clean)")));
        }
        Ok(json!(status))
    }
}

// ─── git_diff ────────────────────────────────────────────────────────────────

pub struct GitDiffTool {
    root: PathBuf,
}

impl GitDiffTool {
    pub fn tool(root: PathBuf) -> Tool {
        Tool::new(
            ToolDefinition::new("git_diff", "Show unstaged changes, optionally for one path.")
                .with_parameters(vec![ToolParameter::string(
                    "path",
                    "Limit the diff to this path",
                    false,
                )]),
            Arc::new(Self { root }),
        )
        .with_category("git")
        .parallel_safe(true)
    }
}

#[async_trait]
impl ToolHandler for GitDiffTool {
    async fn run(&self, args: &Value) -> Result<Value, ToolError> {
        let diff = match args["path"].as_str() {
            Some(path) => run_git(&self.root, &["diff", "--", path]).await?,
            None => run_git(&self.root, &["diff"]).await?,
        };
        if diff.is_empty() {
            return Ok(json!("(no unstaged changes)"));
        }
        Ok(json!(diff))
    }
}

// ─── git_log ─────────────────────────────────────────────────────────────────

pub struct GitLogTool {
    root: PathBuf,
}

impl GitLogTool {
    pub fn tool(root: PathBuf) -> Tool {
        Tool::new(
            ToolDefinition::new("git_log", "Show recent commits, one line each.")
                .with_parameters(vec![ToolParameter::integer(
                    "limit",
                    "Number of commits to show (default 10)",
                    false,
                )]),
            Arc::new(Self { root }),
        )
        .with_category("git")
        .parallel_safe(true)
    }
}

#[async_trait]
impl ToolHandler for GitLogTool {
    async fn run(&self, args: &Value) -> Result<Value, ToolError> {
        let limit = args["limit"].as_u64().unwrap_or(10).clamp(1, 100);
        let log = run_git(&self.root, &["log", "--oneline", "-n", &limit.to_string()]).await?;
        if log.is_empty() {
            return Ok(json!("(no commits)"));
        }
        Ok(json!(log))
    }
}

// ─── git_commit ──────────────────────────────────────────────────────────────

pub struct GitCommitTool {
    root: PathBuf,
}

impl GitCommitTool {
    pub fn tool(root: PathBuf) -> Tool {
        Tool::new(
            ToolDefinition::new(
                "git_commit",
                "Stage all changes and commit them with the given message.",
            )
            .with_parameters(vec![ToolParameter::string(
                "message",
                "Commit message",
                true,
            )]),
            Arc::new(Self { root }),
        )
        .with_permission(PermissionLevel::Cautious)
        .with_category("git")
    }
}

#[async_trait]
impl ToolHandler for GitCommitTool {
    async fn run(&self, args: &Value) -> Result<Value, ToolError> {
        let message = args["message"].as_str().ok_or_else(|| ToolError::Validation {
            tool: "git_commit".into(),
            message: "missing required parameter: message".into(),
        })?;
        if message.trim().is_empty() {
            return Err(ToolError::Validation {
                tool: "git_commit".into(),
                message: "commit message must not be empty".into(),
            });
        }
        run_git(&self.root, &["add", "-A"]).await?;
        let out = run_git(&self.root, &["commit", "-m", message]).await?;
        Ok(json!(out))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn init_repo() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        run_git(&root, &["init", "-q"]).await.unwrap();
        run_git(&root, &["config", "user.email", "test@example.com"])
            .await
            .unwrap();
        run_git(&root, &["config", "user.name", "Test"]).await.unwrap();
        (dir, root)
    }

    #[tokio::test]
    async fn status_reports_clean_tree() {
        let (_dir, root) = init_repo().await;
        let tool = GitStatusTool { root };
        let out = tool.run(&json!({})).await.unwrap();
        assert!(out.as_str().unwrap().contains("working tree clean"));
    }

    #[tokio::test]
    async fn status_reports_untracked_files() {
        let (_dir, root) = init_repo().await;
        std::fs::write(root.join("new.txt"), "x").unwrap();
        let tool = GitStatusTool { root };
        let out = tool.run(&json!({})).await.unwrap();
        assert!(out.as_str().unwrap().contains("new.txt"));
    }

    #[tokio::test]
    async fn commit_stages_and_commits_everything() {
        let (_dir, root) = init_repo().await;
        std::fs::write(root.join("a.txt"), "content").unwrap();
        let commit = GitCommitTool { root: root.clone() };
        commit
            .run(&json!({"message": "add a.txt"}))
            .await
            .unwrap();
        let log = GitLogTool { root };
        let out = log.run(&json!({})).await.unwrap();
        assert!(out.as_str().unwrap().contains("add a.txt"));
    }

    #[tokio::test]
    async fn empty_commit_message_fails_validation() {
        let (_dir, root) = init_repo().await;
        let commit = GitCommitTool { root };
        let err = commit.run(&json!({"message": "  "})).await.unwrap_err();
        assert!(matches!(err, ToolError::Validation { .. }));
    }

    #[tokio::test]
    async fn diff_shows_unstaged_changes() {
        let (_dir, root) = init_repo().await;
        std::fs::write(root.join("a.txt"), "v1\n").unwrap();
        let commit = GitCommitTool { root: root.clone() };
        commit.run(&json!({"message": "v1"})).await.unwrap();
        std::fs::write(root.join("a.txt"), "v2\n").unwrap();
        let diff = GitDiffTool { root };
        let out = diff.run(&json!({})).await.unwrap();
        let text = out.as_str().unwrap();
        assert!(text.contains("-v1"));
        assert!(text.contains("+v2"));
    }
}
