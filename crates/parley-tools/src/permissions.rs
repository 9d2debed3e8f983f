// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use parley_config::{PermissionLevel, ToolsConfig};

use crate::ToolError;

/// A request for permission to execute a tool, handed to the confirmation
/// callback when user input is needed.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub tool_name: String,
    pub arguments: Value,
    pub permission_level: PermissionLevel,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl PermissionRequest {
    /// Human-readable rendering for confirmation dialogs.
    pub fn format_for_display(&self) -> String {
        let mut lines = vec![
            format!("Tool: {}", self.tool_name),
            format!("Level: {}", self.permission_level),
            format!("Description: {}", self.description),
            "Arguments:".to_string(),
        ];
        if let Some(map) = self.arguments.as_object() {
            for (key, value) in map {
                let mut rendered = value.to_string();
                if rendered.chars().count() > 100 {
                    rendered = rendered.chars().take(97).collect::<String>() + "...";
                }
                lines.push(format!("  {key}: {rendered}"));
            }
        }
        lines.join("\n")
    }
}

/// Returns `true` when the user grants the request.
pub type ConfirmationCallback = Box<dyn Fn(&PermissionRequest) -> bool + Send + Sync>;

/// Decides whether a tool call may run.
///
/// Decision order: blocklist → auto-approve → effective-level threshold →
/// session grants → confirmation callback (absent callback denies).  A grant
/// from the callback is remembered for the rest of the session.
pub struct PermissionManager {
    auto_approve: bool,
    auto_approve_level: PermissionLevel,
    overrides: Mutex<HashMap<String, PermissionLevel>>,
    session_grants: Mutex<HashSet<String>>,
    blocked: Mutex<HashSet<String>>,
    confirm: Mutex<Option<ConfirmationCallback>>,
}

impl Default for PermissionManager {
    fn default() -> Self {
        Self {
            auto_approve: false,
            auto_approve_level: PermissionLevel::Safe,
            overrides: Mutex::new(HashMap::new()),
            session_grants: Mutex::new(HashSet::new()),
            blocked: Mutex::new(HashSet::new()),
            confirm: Mutex::new(None),
        }
    }
}

impl PermissionManager {
    pub fn new(auto_approve: bool, auto_approve_level: PermissionLevel) -> Self {
        Self {
            auto_approve,
            auto_approve_level,
            ..Self::default()
        }
    }

    pub fn from_config(cfg: &ToolsConfig) -> Self {
        let manager = Self::new(cfg.auto_approve, cfg.auto_approve_level);
        for tool in &cfg.blocked_tools {
            manager.block_tool(tool);
        }
        manager
    }

    pub fn set_confirmation_callback(&self, callback: ConfirmationCallback) {
        *self.confirm.lock().unwrap() = Some(callback);
    }

    pub fn block_tool(&self, name: &str) {
        self.blocked.lock().unwrap().insert(name.to_string());
        self.session_grants.lock().unwrap().remove(name);
        info!(tool = name, "blocked tool");
    }

    pub fn unblock_tool(&self, name: &str) {
        self.blocked.lock().unwrap().remove(name);
    }

    pub fn is_blocked(&self, name: &str) -> bool {
        self.blocked.lock().unwrap().contains(name)
    }

    pub fn set_tool_permission(&self, name: &str, level: PermissionLevel) {
        self.overrides.lock().unwrap().insert(name.to_string(), level);
    }

    pub fn clear_tool_permission(&self, name: &str) {
        self.overrides.lock().unwrap().remove(name);
    }

    /// The effective level for a tool: override when set, declared otherwise.
    pub fn effective_level(&self, name: &str, declared: PermissionLevel) -> PermissionLevel {
        self.overrides
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(declared)
    }

    pub fn grant_session_permission(&self, name: &str) {
        self.session_grants.lock().unwrap().insert(name.to_string());
    }

    pub fn has_session_permission(&self, name: &str) -> bool {
        self.session_grants.lock().unwrap().contains(name)
    }

    pub fn clear_session_grants(&self) {
        self.session_grants.lock().unwrap().clear();
    }

    /// Check whether a tool call is permitted.
    ///
    /// Returns `Ok(true)` to proceed, `Ok(false)` on a user denial, and
    /// `Err(PermissionDenied)` when the tool is blocked outright.
    pub fn check(
        &self,
        tool_name: &str,
        arguments: &Value,
        declared_level: PermissionLevel,
        description: &str,
    ) -> Result<bool, ToolError> {
        if self.is_blocked(tool_name) {
            return Err(ToolError::PermissionDenied {
                tool: tool_name.to_string(),
                reason: "tool is blocked".into(),
            });
        }

        let effective = self.effective_level(tool_name, declared_level);

        if self.auto_approve {
            debug!(tool = tool_name, "auto-approved");
            return Ok(true);
        }

        if effective <= self.auto_approve_level {
            debug!(tool = tool_name, level = %effective, "auto-approved by level");
            return Ok(true);
        }

        if self.has_session_permission(tool_name) {
            debug!(tool = tool_name, "session grant exists");
            return Ok(true);
        }

        let request = PermissionRequest {
            tool_name: tool_name.to_string(),
            arguments: arguments.clone(),
            permission_level: effective,
            description: if description.is_empty() {
                format!("Execute tool: {tool_name}")
            } else {
                description.to_string()
            },
            timestamp: Utc::now(),
        };

        let confirm = self.confirm.lock().unwrap();
        let granted = match confirm.as_ref() {
            Some(callback) => callback(&request),
            None => {
                warn!(tool = tool_name, "no confirmation callback set, denying");
                false
            }
        };
        drop(confirm);

        if granted {
            self.grant_session_permission(tool_name);
            info!(tool = tool_name, "permission granted by user");
        } else {
            info!(tool = tool_name, "permission denied by user");
        }
        Ok(granted)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn safe_tools_are_auto_approved_by_default() {
        let m = PermissionManager::default();
        let granted = m
            .check("read_file", &json!({}), PermissionLevel::Safe, "")
            .unwrap();
        assert!(granted);
    }

    #[test]
    fn cautious_tool_denied_without_callback() {
        let m = PermissionManager::default();
        let granted = m
            .check("write_file", &json!({}), PermissionLevel::Cautious, "")
            .unwrap();
        assert!(!granted);
    }

    #[test]
    fn blocked_tool_errors_even_with_auto_approve() {
        let m = PermissionManager::new(true, PermissionLevel::Safe);
        m.block_tool("execute_command");
        let result = m.check(
            "execute_command",
            &json!({}),
            PermissionLevel::Dangerous,
            "",
        );
        assert!(matches!(result, Err(ToolError::PermissionDenied { .. })));
    }

    #[test]
    fn auto_approve_grants_everything_not_blocked() {
        let m = PermissionManager::new(true, PermissionLevel::Safe);
        let granted = m
            .check("execute_command", &json!({}), PermissionLevel::Dangerous, "")
            .unwrap();
        assert!(granted);
    }

    #[test]
    fn threshold_grants_up_to_level() {
        let m = PermissionManager::new(false, PermissionLevel::Cautious);
        assert!(m
            .check("write_file", &json!({}), PermissionLevel::Cautious, "")
            .unwrap());
        assert!(!m
            .check("execute_command", &json!({}), PermissionLevel::Dangerous, "")
            .unwrap());
    }

    #[test]
    fn callback_grant_is_remembered_for_session() {
        let m = PermissionManager::default();
        m.set_confirmation_callback(Box::new(|_| true));
        assert!(m
            .check("write_file", &json!({}), PermissionLevel::Cautious, "")
            .unwrap());
        assert!(m.has_session_permission("write_file"));

        // Replace with a denying callback; the session grant still wins.
        m.set_confirmation_callback(Box::new(|_| false));
        assert!(m
            .check("write_file", &json!({}), PermissionLevel::Cautious, "")
            .unwrap());
    }

    #[test]
    fn override_changes_effective_level() {
        let m = PermissionManager::default();
        m.set_tool_permission("read_file", PermissionLevel::Dangerous);
        assert_eq!(
            m.effective_level("read_file", PermissionLevel::Safe),
            PermissionLevel::Dangerous
        );
        // Now requires confirmation, which is absent → denied.
        assert!(!m
            .check("read_file", &json!({}), PermissionLevel::Safe, "")
            .unwrap());
        m.clear_tool_permission("read_file");
        assert!(m
            .check("read_file", &json!({}), PermissionLevel::Safe, "")
            .unwrap());
    }

    #[test]
    fn blocking_revokes_session_grant() {
        let m = PermissionManager::default();
        m.grant_session_permission("shell");
        m.block_tool("shell");
        assert!(!m.has_session_permission("shell"));
    }

    #[test]
    fn request_display_truncates_long_arguments() {
        let request = PermissionRequest {
            tool_name: "write_file".into(),
            arguments: json!({ "content": "x".repeat(500) }),
            permission_level: PermissionLevel::Cautious,
            description: "write".into(),
            timestamp: Utc::now(),
        };
        let text = request.format_for_display();
        assert!(text.contains("Tool: write_file"));
        assert!(text.contains("..."));
    }
}
