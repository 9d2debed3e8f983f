use serde::{Deserialize, Serialize};

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// A single tool invocation requested by a model.
///
/// `id` is the provider-assigned identifier (unique within a turn) that tool
/// results reference.  `arguments` is the parsed JSON argument object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The outcome of executing one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

/// A message in the shared conversation transcript.
///
/// The transcript is shared between all participating models; `model`
/// identifies the author of `assistant` turns so each adapter can re-author
/// foreign turns before sending the transcript to its provider.  For `tool`
/// turns, `model` names the tool(s) the results belong to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
    /// Assigned when the message is persisted.  Pre-persistence messages are
    /// referenced by position within the in-memory transcript.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            model: None,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            id: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
            model: None,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            id: None,
        }
    }

    pub fn assistant(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            model: Some(model.into()),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            id: None,
        }
    }

    pub fn assistant_with_calls(
        text: impl Into<String>,
        model: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            model: Some(model.into()),
            tool_calls,
            tool_results: Vec::new(),
            id: None,
        }
    }

    /// A `tool` message carrying one result per preceding tool call, in call
    /// order.  `tool_names` labels the message with the tool(s) involved.
    pub fn tool_results(tool_names: impl Into<String>, results: Vec<ToolResult>) -> Self {
        Self {
            role: Role::Tool,
            content: String::new(),
            model: Some(tool_names.into()),
            tool_calls: Vec::new(),
            tool_results: results,
            id: None,
        }
    }
}

// ─── Completion types ─────────────────────────────────────────────────────────

/// A tool schema as handed to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: serde_json::Value,
}

/// Request sent to a model client.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub system: Option<String>,
    pub tools: Vec<ToolSchema>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    ToolUse,
    ContentFilter,
}

/// Token usage for one completion.  Additive across completions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_estimate: Option<f64>,
}

impl Usage {
    pub fn is_zero(&self) -> bool {
        self.total_tokens == 0
    }
}

impl std::ops::Add for Usage {
    type Output = Usage;
    fn add(self, rhs: Usage) -> Usage {
        let cost_estimate = match (self.cost_estimate, rhs.cost_estimate) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
        };
        Usage {
            prompt_tokens: self.prompt_tokens + rhs.prompt_tokens,
            completion_tokens: self.completion_tokens + rhs.completion_tokens,
            total_tokens: self.total_tokens + rhs.total_tokens,
            cost_estimate,
        }
    }
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, rhs: Usage) {
        *self = *self + rhs;
    }
}

/// One item of a model's streamed reply.
///
/// Tool-call argument deltas are accumulated inside the adapter; a
/// `ToolCall` chunk is only emitted once the call is complete.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Text(String),
    ToolCall(ToolCall),
    Done {
        finish_reason: FinishReason,
        usage: Option<Usage>,
    },
}

/// A completed reply from one model.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub model: String,
    pub content: String,
    pub finish_reason: FinishReason,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
}

impl ModelResponse {
    pub fn text(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            content: content.into(),
            finish_reason: FinishReason::Stop,
            tool_calls: Vec::new(),
            usage: None,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_user_sets_role_and_text() {
        let m = Message::user("hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.content, "hello");
        assert!(m.model.is_none());
    }

    #[test]
    fn message_assistant_records_author() {
        let m = Message::assistant("reply", "claude");
        assert_eq!(m.role, Role::Assistant);
        assert_eq!(m.model.as_deref(), Some("claude"));
    }

    #[test]
    fn message_tool_results_keeps_order() {
        let m = Message::tool_results(
            "read_file",
            vec![
                ToolResult {
                    tool_call_id: "a".into(),
                    content: "1".into(),
                    is_error: false,
                },
                ToolResult {
                    tool_call_id: "b".into(),
                    content: "2".into(),
                    is_error: true,
                },
            ],
        );
        assert_eq!(m.role, Role::Tool);
        assert_eq!(m.tool_results[0].tool_call_id, "a");
        assert_eq!(m.tool_results[1].tool_call_id, "b");
    }

    #[test]
    fn usage_addition_is_componentwise() {
        let a = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
            cost_estimate: Some(0.01),
        };
        let b = Usage {
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
            cost_estimate: None,
        };
        let sum = a + b;
        assert_eq!(sum.prompt_tokens, 11);
        assert_eq!(sum.completion_tokens, 7);
        assert_eq!(sum.total_tokens, 18);
        assert_eq!(sum.cost_estimate, Some(0.01));
    }

    #[test]
    fn usage_default_is_zero() {
        assert!(Usage::default().is_zero());
    }

    #[test]
    fn message_serde_round_trip_with_tool_calls() {
        let m = Message::assistant_with_calls(
            "",
            "gpt",
            vec![ToolCall {
                id: "call_1".into(),
                name: "read_file".into(),
                arguments: json!({"path": "a.txt"}),
            }],
        );
        let encoded = serde_json::to_string(&m).unwrap();
        let decoded: Message = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.tool_calls.len(), 1);
        assert_eq!(decoded.tool_calls[0].name, "read_file");
    }

    #[test]
    fn empty_tool_lists_are_not_serialized() {
        let m = Message::user("hi");
        let encoded = serde_json::to_string(&m).unwrap();
        assert!(!encoded.contains("tool_calls"));
        assert!(!encoded.contains("tool_results"));
    }

    #[test]
    fn finish_reason_serde_snake_case() {
        let fr: FinishReason = serde_json::from_str("\"tool_use\"").unwrap();
        assert_eq!(fr, FinishReason::ToolUse);
    }
}
