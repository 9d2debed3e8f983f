// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// Failure modes of tool resolution and execution.
///
/// These never abort the engine: the executor converts every variant into an
/// error tool result so the calling model can observe the failure and
/// recover.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool is disabled: {0}")]
    Disabled(String),

    #[error("Tool '{tool}' validation failed: {message}")]
    Validation { tool: String, message: String },

    #[error("Permission denied for tool '{tool}': {reason}")]
    PermissionDenied { tool: String, reason: String },

    #[error("Tool '{tool}' execution timed out after {seconds} seconds")]
    Timeout { tool: String, seconds: u64 },

    #[error("Transient error (retryable): {0}")]
    Transient(String),

    #[error("Execution error: {0}")]
    Handler(String),
}

impl ToolError {
    /// Only transient failures are rerun by `execute_with_retry`; permission
    /// denials, validation failures, and handler errors are final.
    pub fn is_transient(&self) -> bool {
        matches!(self, ToolError::Transient(_) | ToolError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_transient_are_retryable() {
        assert!(ToolError::Transient("io".into()).is_transient());
        assert!(ToolError::Timeout {
            tool: "t".into(),
            seconds: 30
        }
        .is_transient());
    }

    #[test]
    fn denials_and_validation_are_final() {
        assert!(!ToolError::PermissionDenied {
            tool: "t".into(),
            reason: "no".into()
        }
        .is_transient());
        assert!(!ToolError::Validation {
            tool: "t".into(),
            message: "bad".into()
        }
        .is_transient());
        assert!(!ToolError::Handler("boom".into()).is_transient());
    }
}
