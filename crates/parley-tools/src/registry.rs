// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use parley_config::PermissionLevel;
use parley_model::ToolSchema;

use crate::{ToolDefinition, ToolError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The executable body of a tool.
///
/// Handlers are async; a handler wrapping blocking work is expected to use
/// `tokio::task::spawn_blocking` internally so it never stalls the scheduler.
/// Failures are returned as [`ToolError`] values, not panics.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn run(&self, args: &Value) -> Result<Value, ToolError>;
}

/// A registered tool: schema, handler, and execution metadata.
pub struct Tool {
    pub definition: ToolDefinition,
    pub handler: Arc<dyn ToolHandler>,
    pub permission_level: PermissionLevel,
    pub category: String,
    pub timeout: Duration,
    enabled: AtomicBool,
    pub parallel_safe: bool,
}

impl Tool {
    pub fn new(definition: ToolDefinition, handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            definition,
            handler,
            permission_level: PermissionLevel::Safe,
            category: "general".into(),
            timeout: DEFAULT_TIMEOUT,
            enabled: AtomicBool::new(true),
            parallel_safe: false,
        }
    }

    pub fn with_permission(mut self, level: PermissionLevel) -> Self {
        self.permission_level = level;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read-only tools set this so the engine may run them concurrently.
    pub fn parallel_safe(mut self, yes: bool) -> Self {
        self.parallel_safe = yes;
        self
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

/// Central registry of available tools.  Registration is exclusive by name;
/// tools may be enabled and disabled at runtime without re-registration.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Tool) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::Validation {
                tool: name.clone(),
                message: "tool is already registered".into(),
            });
        }
        debug!(tool = %name, category = %tool.category, "registered tool");
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn get_enabled(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name).filter(|t| t.is_enabled())
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Enable or disable a tool.  Returns false when the tool is unknown.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.tools.get(name) {
            Some(t) => {
                t.enabled.store(enabled, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// `true` when the tool's registry entry is flagged parallel-safe.
    pub fn is_parallel_safe(&self, name: &str) -> bool {
        self.tools.get(name).map(|t| t.parallel_safe).unwrap_or(false)
    }

    /// Provider-facing schemas for all enabled tools, sorted by name so the
    /// advertised tool list is deterministic.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .filter(|t| t.is_enabled())
            .map(|t| t.definition.to_tool_schema())
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn run(&self, args: &Value) -> Result<Value, ToolError> {
            Ok(json!(format!("echo:{args}")))
        }
    }

    fn echo_tool(name: &str) -> Tool {
        Tool::new(
            ToolDefinition::new(name, "echoes its input"),
            Arc::new(EchoHandler),
        )
    }

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::new();
        reg.register(echo_tool("echo")).unwrap();
        assert!(reg.get("echo").is_some());
        assert!(reg.has("echo"));
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let mut reg = ToolRegistry::new();
        reg.register(echo_tool("echo")).unwrap();
        let err = reg.register(echo_tool("echo")).unwrap_err();
        assert!(matches!(err, ToolError::Validation { .. }));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn disable_hides_tool_from_get_enabled() {
        let mut reg = ToolRegistry::new();
        reg.register(echo_tool("echo")).unwrap();
        assert!(reg.set_enabled("echo", false));
        assert!(reg.get_enabled("echo").is_none());
        assert!(reg.get("echo").is_some(), "still registered");
        assert!(reg.set_enabled("echo", true));
        assert!(reg.get_enabled("echo").is_some());
    }

    #[test]
    fn set_enabled_unknown_tool_returns_false() {
        let reg = ToolRegistry::new();
        assert!(!reg.set_enabled("nope", true));
    }

    #[test]
    fn schemas_are_sorted_and_skip_disabled() {
        let mut reg = ToolRegistry::new();
        reg.register(echo_tool("b_tool")).unwrap();
        reg.register(echo_tool("a_tool")).unwrap();
        reg.register(echo_tool("c_tool")).unwrap();
        reg.set_enabled("c_tool", false);
        let schemas = reg.schemas();
        let names: Vec<&str> = schemas.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a_tool", "b_tool"]);
    }

    #[test]
    fn parallel_safe_flag_is_queryable() {
        let mut reg = ToolRegistry::new();
        reg.register(echo_tool("reader").parallel_safe(true)).unwrap();
        reg.register(echo_tool("writer")).unwrap();
        assert!(reg.is_parallel_safe("reader"));
        assert!(!reg.is_parallel_safe("writer"));
        assert!(!reg.is_parallel_safe("missing"));
    }

    #[test]
    fn tool_defaults() {
        let t = echo_tool("t");
        assert_eq!(t.permission_level, PermissionLevel::Safe);
        assert_eq!(t.timeout, Duration::from_secs(30));
        assert!(t.is_enabled());
        assert!(!t.parallel_safe);
    }
}
