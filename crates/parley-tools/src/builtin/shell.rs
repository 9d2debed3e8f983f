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

/// Command substrings that are never executed, independent of permission
/// level or auto-approval.  Matched against the whitespace-normalized
/// command string.
static BLOCKED_COMMANDS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    ":(){ :|:& };:",
    "> /dev/sda",
    "mkfs",
    "cat /etc/shadow",
    "cat /etc/passwd",
];

fn is_command_blocked(command: &str) -> Option<&'static str> {
    let normalized = command.split_whitespace().collect::<Vec<_>>().join(" ");
    BLOCKED_COMMANDS
        .iter()
        .find(|blocked| normalized.contains(*blocked))
        .copied()
}

/// Run a shell command inside the workspace root.
///
/// The permission level is `Dangerous` so interactive sessions always
/// confirm; the blocklist above rejects the worst commands outright with a
/// permission error that never reaches the shell.
pub struct ExecuteCommandTool {
    root: PathBuf,
}

impl ExecuteCommandTool {
    pub fn tool(root: PathBuf) -> Tool {
        Tool::new(
            ToolDefinition::new(
                "execute_command",
                "Run a shell command in the workspace and capture its output.",
            )
            .with_parameters(vec![
                ToolParameter::string("command", "Shell command to run", true),
                ToolParameter::string(
                    "working_dir",
                    "Working directory relative to the workspace root",
                    false,
                ),
            ]),
            Arc::new(Self { root }),
        )
        .with_permission(PermissionLevel::Dangerous)
        .with_category("shell")
    }
}

#[async_trait]
impl ToolHandler for ExecuteCommandTool {
    async fn run(&self, args: &Value) -> Result<Value, ToolError> {
        let command = args["command"].as_str().ok_or_else(|| ToolError::Validation {
            tool: "execute_command".into(),
            message: "missing required parameter: command".into(),
        })?;

        if let Some(blocked) = is_command_blocked(command) {
            return Err(ToolError::PermissionDenied {
                tool: "execute_command".into(),
                reason: format!("command is blocked for safety: {blocked}"),
            });
        }

        let cwd = match args["working_dir"].as_str() {
            Some(dir) => super::files::resolve_within_root(&self.root, dir).map_err(|_| {
                ToolError::PermissionDenied {
                    tool: "execute_command".into(),
                    reason: "working_dir escapes the workspace root".into(),
                }
            })?,
            None => self.root.clone(),
        };

        debug!(command, cwd = %cwd.display(), "execute_command");
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&cwd)
            .output()
            .await
            .map_err(|e| ToolError::Handler(format!("execute_command: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut text = stdout.trim_end().to_string();
        if !stderr.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str("--- stderr ---\n");
            text.push_str(stderr.trim_end());
        }
        if !output.status.success() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&format!(
                "Exit code: {}",
                output.status.code().unwrap_or(-1)
            ));
        }
        if text.is_empty() {
            text = "(no output)".into();
        }
        Ok(json!(text))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
