// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Built-in tools: file operations, shell execution, and git.
//!
//! All path-taking tools are rooted in a workspace directory; paths that
//! escape it are rejected before any filesystem access happens.

mod files;
mod git;
mod shell;

pub use files::{
    EditFileTool, ListDirectoryTool, ReadFileTool, SearchFilesTool, WriteFileTool,
};
pub use git::{GitCommitTool, GitDiffTool, GitLogTool, GitStatusTool};
pub use shell::ExecuteCommandTool;

use std::path::PathBuf;

use crate::{ToolError, ToolRegistry};

/// Register the full built-in tool set, rooted at `root`.
pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    root: impl Into<PathBuf>,
) -> Result<(), ToolError> {
    let root = root.into();
    registry.register(ReadFileTool::tool(root.clone()))?;
    registry.register(WriteFileTool::tool(root.clone()))?;
    registry.register(EditFileTool::tool(root.clone()))?;
    registry.register(ListDirectoryTool::tool(root.clone()))?;
    registry.register(SearchFilesTool::tool(root.clone()))?;
    registry.register(ExecuteCommandTool::tool(root.clone()))?;
    registry.register(GitStatusTool::tool(root.clone()))?;
    registry.register(GitDiffTool::tool(root.clone()))?;
    registry.register(GitLogTool::tool(root.clone()))?;
    registry.register(GitCommitTool::tool(root))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_the_full_set() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, "/tmp").unwrap();
        let names = registry.names();
        for expected in [
            "read_file",
            "write_file",
            "edit_file",
            "list_directory",
            "search_files",
            "execute_command",
            "git_status",
            "git_diff",
            "git_log",
            "git_commit",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn read_only_tools_are_parallel_safe() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, "/tmp").unwrap();
        for name in ["read_file", "list_directory", "search_files"] {
            assert!(registry.is_parallel_safe(name), "{name} should be parallel-safe");
        }
        for name in ["write_file", "edit_file", "execute_command", "git_commit"] {
            assert!(!registry.is_parallel_safe(name), "{name} must be sequential");
        }
    }
}
