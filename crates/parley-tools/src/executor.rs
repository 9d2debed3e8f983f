// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use parley_model::{ToolCall, ToolResult};

use crate::{PermissionManager, Tool, ToolError, ToolRegistry};

const DEFAULT_MAX_OUTPUT: usize = 100_000;

/// Structured outcome of one tool execution.
#[derive(Debug, Clone)]
pub struct ToolExecutionResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub success: bool,
    pub result: Option<String>,
    pub error: Option<String>,
    pub execution_time: Duration,
    pub timestamp: DateTime<Utc>,
}

impl ToolExecutionResult {
    fn ok(call: &ToolCall, result: String, elapsed: Duration) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            success: true,
            result: Some(result),
            error: None,
            execution_time: elapsed,
            timestamp: Utc::now(),
        }
    }

    fn failed(call: &ToolCall, error: String, elapsed: Duration) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            success: false,
            result: None,
            error: Some(error),
            execution_time: elapsed,
            timestamp: Utc::now(),
        }
    }

    /// `true` when the recorded failure is worth an automatic rerun.
    pub fn is_transient_failure(&self) -> bool {
        self.error
            .as_deref()
            .map(|e| {
                let e = e.to_lowercase();
                e.contains("transient error") || e.contains("timed out")
            })
            .unwrap_or(false)
    }

    /// Convert to the tool result the model sees.  Failures are formatted
    /// with an actionable hint so the model can recover.
    pub fn to_tool_result(&self) -> ToolResult {
        let content = if self.success {
            self.result.clone().unwrap_or_default()
        } else {
            self.format_error()
        };
        ToolResult {
            tool_call_id: self.tool_call_id.clone(),
            content,
            is_error: !self.success,
        }
    }

    fn format_error(&self) -> String {
        let error = self.error.as_deref().unwrap_or("unknown error");
        let mut lines = vec![format!("Error: {error}"), format!("Tool: {}", self.tool_name)];
        let lower = error.to_lowercase();

        if lower.contains("not found") || lower.contains("no such file") {
            lines.push(
                "Suggestion: Use list_directory or search_files to find the correct path."
                    .to_string(),
            );
        } else if lower.contains("permission") || lower.contains("denied") {
            lines.push(
                "Suggestion: Check if the path is within allowed directories, or if the \
                 operation requires elevated permissions."
                    .to_string(),
            );
        } else if lower.contains("timeout") || lower.contains("timed out") {
            lines.push(
                "Suggestion: The operation took too long. Try with a smaller scope or break \
                 it into multiple smaller operations."
                    .to_string(),
            );
        } else if lower.contains("validation") || lower.contains("invalid") {
            lines.push(
                "Suggestion: Check the argument types and values. Use the correct format as \
                 specified in the tool definition."
                    .to_string(),
            );
        } else if lower.contains("encoding") || lower.contains("decode") {
            lines.push(
                "Suggestion: The file may be binary or use a non-UTF8 encoding.".to_string(),
            );
        } else if lower.contains("connection") || lower.contains("network") {
            lines.push(
                "Suggestion: Network connectivity issue. The operation may succeed if retried."
                    .to_string(),
            );
        }
        lines.join("\n")
    }
}

/// Executes tool calls with validation, permission gating, and timeout
/// protection.  Every failure is converted into a structured result; the
/// executor itself never propagates errors.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    permissions: PermissionManager,
    pub max_output_length: usize,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, permissions: PermissionManager) -> Self {
        Self {
            registry,
            permissions,
            max_output_length: DEFAULT_MAX_OUTPUT,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn permissions(&self) -> &PermissionManager {
        &self.permissions
    }

    pub async fn execute(&self, call: &ToolCall) -> ToolExecutionResult {
        let start = Instant::now();
        match self.run_checked(call).await {
            Ok(output) => {
                let elapsed = start.elapsed();
                info!(
                    tool = %call.name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "tool executed successfully"
                );
                ToolExecutionResult::ok(call, output, elapsed)
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "tool execution failed");
                ToolExecutionResult::failed(call, e.to_string(), start.elapsed())
            }
        }
    }

    /// Rerun transient failures (timeouts, connection errors) with linear
    /// backoff `base_delay × (attempt + 1)`.  Permission denials, validation
    /// failures, and handler errors are returned immediately.
    pub async fn execute_with_retry(
        &self,
        call: &ToolCall,
        max_retries: u32,
        base_delay: Duration,
    ) -> ToolExecutionResult {
        let mut attempt = 0u32;
        loop {
            let result = self.execute(call).await;
            if result.success || !result.is_transient_failure() || attempt >= max_retries {
                if attempt > 0 && result.success {
                    info!(tool = %call.name, retries = attempt, "tool succeeded after retry");
                }
                return result;
            }
            let delay = base_delay * (attempt + 1);
            info!(
                tool = %call.name,
                attempt = attempt + 1,
                max_retries,
                delay_ms = delay.as_millis() as u64,
                "retrying transient tool failure"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Execute several calls, concurrently when `parallel` is set.  Results
    /// are returned in input order either way.
    pub async fn execute_batch(
        &self,
        calls: &[ToolCall],
        parallel: bool,
    ) -> Vec<ToolExecutionResult> {
        if parallel {
            futures::future::join_all(calls.iter().map(|c| self.execute(c))).await
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.execute(call).await);
            }
            results
        }
    }

    async fn run_checked(&self, call: &ToolCall) -> Result<String, ToolError> {
        let tool = match self.registry.get(&call.name) {
            Some(t) if t.is_enabled() => t,
            Some(_) => return Err(ToolError::Disabled(call.name.clone())),
            None => return Err(ToolError::NotFound(call.name.clone())),
        };

        validate_arguments(tool, &call.arguments)?;

        let granted = self.permissions.check(
            &call.name,
            &call.arguments,
            tool.permission_level,
            &tool.definition.description,
        )?;
        if !granted {
            return Err(ToolError::PermissionDenied {
                tool: call.name.clone(),
                reason: "user denied permission".into(),
            });
        }

        let output = tokio::time::timeout(tool.timeout, tool.handler.run(&call.arguments))
            .await
            .map_err(|_| ToolError::Timeout {
                tool: call.name.clone(),
                seconds: tool.timeout.as_secs(),
            })??;

        Ok(self.format_output(output))
    }

    fn format_output(&self, value: Value) -> String {
        let mut text = match value {
            Value::Null => "Success (no output)".to_string(),
            Value::String(s) => s,
            other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
        };
        if text.chars().count() > self.max_output_length {
            let total = text.chars().count();
            text = text.chars().take(self.max_output_length).collect::<String>()
                + &format!("\n... (truncated, {total} total characters)");
        }
        text
    }
}

/// Validate call arguments against the tool definition: required presence,
/// unknown rejection, enum membership, and base JSON type.
fn validate_arguments(tool: &Tool, args: &Value) -> Result<(), ToolError> {
    let name = tool.name().to_string();
    let object = args.as_object().ok_or_else(|| ToolError::Validation {
        tool: name.clone(),
        message: "arguments must be a JSON object".into(),
    })?;

    for param in &tool.definition.parameters {
        if param.required && !object.contains_key(&param.name) {
            return Err(ToolError::Validation {
                tool: name.clone(),
                message: format!("missing required parameter: {}", param.name),
            });
        }
    }

    let known: Vec<&str> = tool
        .definition
        .parameters
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    for arg_name in object.keys() {
        if !known.contains(&arg_name.as_str()) {
            return Err(ToolError::Validation {
                tool: name.clone(),
                message: format!("unknown parameter: {arg_name}"),
            });
        }
    }

    for param in &tool.definition.parameters {
        let Some(value) = object.get(&param.name) else {
            continue;
        };
        if let Some(allowed) = &param.enum_values {
            let matches = value
                .as_str()
                .map(|s| allowed.iter().any(|a| a == s))
                .unwrap_or(false);
            if !matches {
                return Err(ToolError::Validation {
                    tool: name.clone(),
                    message: format!("parameter '{}' must be one of: {allowed:?}", param.name),
                });
            }
        }
        if !type_matches(value, &param.param_type) {
            return Err(ToolError::Validation {
                tool: name,
                message: format!(
                    "parameter '{}' has invalid type, expected {}",
                    param.name, param.param_type
                ),
            });
        }
    }
    Ok(())
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        // Unknown type in the definition: accept anything.
        _ => true,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
