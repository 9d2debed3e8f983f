// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shared implementation for OpenAI-compatible chat completion APIs.
//!
//! GPT and Grok speak the same `/chat/completions` SSE wire format; only the
//! endpoint, identity, and defaults differ.  One client covers both.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use parley_config::ModelConfig;

use crate::anthropic::retry_after_header;
use crate::client::{ChunkStream, ModelClient};
use crate::reauthor::reauthor_transcript;
use crate::retry::{with_retry, RetryPolicy};
use crate::{
    CompletionRequest, FinishReason, Message, ModelError, ModelResponse, Role, StreamChunk,
    ToolCall, Usage,
};

pub struct OpenAiCompatClient {
    id: &'static str,
    display_name: &'static str,
    color: &'static str,
    api_key: Option<String>,
    model: String,
    chat_url: String,
    max_tokens: u32,
    temperature: f32,
    retry: RetryPolicy,
    http: reqwest::Client,
}

impl OpenAiCompatClient {
    /// Client for OpenAI's GPT models.
    pub fn gpt(cfg: &ModelConfig) -> Self {
        Self::with_identity(
            "gpt",
            "GPT",
            "#10A37F",
            "gpt-4o",
            "https://api.openai.com/v1",
            cfg,
        )
    }

    /// Client for xAI's Grok models (OpenAI-compatible endpoint).
    pub fn grok(cfg: &ModelConfig) -> Self {
        Self::with_identity(
            "grok",
            "Grok",
            "#7C3AED",
            "grok-3",
            "https://api.x.ai/v1",
            cfg,
        )
    }

    fn with_identity(
        id: &'static str,
        display_name: &'static str,
        color: &'static str,
        default_model: &str,
        base_url: &str,
        cfg: &ModelConfig,
    ) -> Self {
        Self {
            id,
            display_name,
            color,
            api_key: cfg.resolve_api_key(),
            model: cfg
                .model_id
                .clone()
                .unwrap_or_else(|| default_model.to_string()),
            chat_url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            max_tokens: cfg.max_tokens.unwrap_or(8192),
            temperature: cfg.temperature.unwrap_or(0.7),
            retry: RetryPolicy::default(),
            http: reqwest::Client::new(),
        }
    }

    /// Override the chat completions URL (local proxies, test servers).
    pub fn with_chat_url(mut self, url: impl Into<String>) -> Self {
        self.chat_url = url.into();
        self
    }

    fn build_body(&self, req: &CompletionRequest, stream: bool) -> Value {
        let reauthored = reauthor_transcript(&req.messages, self.id);
        let messages = render_messages(&reauthored, req.system.as_deref());

        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": req.max_tokens.unwrap_or(self.max_tokens),
            "temperature": req.temperature.unwrap_or(self.temperature),
            "stream": stream,
        });
        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, ModelError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ModelError::Auth(format!("{} API key not set", self.display_name)))?;

        debug!(driver = self.id, model = %self.model, "sending completion request");
        let resp = self
            .http
            .post(&self.chat_url)
            .bearer_auth(key)
            .json(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let retry_after = retry_after_header(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            return Err(ModelError::from_status(
                status,
                format!("{}: {text}", self.id),
                retry_after,
            ));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    fn id(&self) -> &str {
        self.id
    }
    fn display_name(&self) -> &str {
        self.display_name
    }
    fn color(&self) -> &str {
        self.color
    }
    fn model_id(&self) -> &str {
        &self.model
    }
    fn available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, req: CompletionRequest) -> Result<ModelResponse, ModelError> {
        let body = self.build_body(&req, false);
        let resp = with_retry(&self.retry, || self.send(&body)).await?;
        let v: Value = resp.json().await?;

        let choice = &v["choices"][0];
        let content = choice["message"]["content"].as_str().unwrap_or("").to_string();
        let mut tool_calls = Vec::new();
        if let Some(calls) = choice["message"]["tool_calls"].as_array() {
            for call in calls {
                tool_calls.push(ToolCall {
                    id: call["id"].as_str().unwrap_or("").to_string(),
                    name: call["function"]["name"].as_str().unwrap_or("").to_string(),
                    arguments: parse_arguments(call["function"]["arguments"].as_str().unwrap_or("")),
                });
            }
        }

        Ok(ModelResponse {
            model: self.id.to_string(),
            content,
            finish_reason: map_finish_reason(choice["finish_reason"].as_str()),
            tool_calls,
            usage: parse_usage(&v["usage"]),
        })
    }

    async fn stream(&self, req: CompletionRequest) -> Result<ChunkStream, ModelError> {
        let body = self.build_body(&req, true);
        let resp = with_retry(&self.retry, || self.send(&body)).await?;

        let stream = resp
            .bytes_stream()
            .scan(SseState::default(), |state, chunk| {
                let chunks: Vec<Result<StreamChunk, ModelError>> = match chunk {
                    Ok(bytes) => {
                        state.buf.push_str(&String::from_utf8_lossy(&bytes));
                        let mut out = Vec::new();
                        while let Some(pos) = state.buf.find('\n') {
                            let line = state.buf[..pos].trim_end_matches('\r').to_string();
                            state.buf.drain(..=pos);
                            if let Some(data) = line.strip_prefix("data: ") {
                                out.extend(state.dispatch(data.trim()).into_iter().map(Ok));
                            }
                        }
                        out
                    }
                    Err(e) => vec![Err(ModelError::from(e))],
                };
                futures::future::ready(Some(chunks))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(stream))
    }
}

/// Per-stream accumulation state for the OpenAI SSE decode.
///
/// OpenAI interleaves argument fragments for parallel tool calls keyed by a
/// `tool_calls[].index` field; fragments are buffered per index and flushed
/// at the `[DONE]` terminator.
#[derive(Default)]
struct SseState {
    buf: String,
    pending: BTreeMap<u64, PendingCall>,
    finish: FinishReason,
    usage: Option<Usage>,
    done: bool,
}

#[derive(Default)]
struct PendingCall {
    id: String,
    name: String,
    args: String,
}

impl SseState {
    fn dispatch(&mut self, data: &str) -> Vec<StreamChunk> {
        if data.is_empty() || self.done {
            return vec![];
        }
        if data == "[DONE]" {
            self.done = true;
            let mut out: Vec<StreamChunk> = std::mem::take(&mut self.pending)
                .into_values()
                .filter(|p| !p.name.is_empty())
                .map(|p| {
                    StreamChunk::ToolCall(ToolCall {
                        id: p.id,
                        name: p.name,
                        arguments: parse_arguments(&p.args),
                    })
                })
                .collect();
            out.push(StreamChunk::Done {
                finish_reason: self.finish,
                usage: self.usage,
            });
            return out;
        }
        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => return vec![],
        };

        // The final usage-only chunk has an empty choices array.
        if let Some(usage) = parse_usage(&v["usage"]) {
            self.usage = Some(usage);
        }

        let mut out = Vec::new();
        if let Some(choice) = v["choices"].as_array().and_then(|c| c.first()) {
            if let Some(reason) = choice["finish_reason"].as_str() {
                self.finish = map_finish_reason(Some(reason));
            }
            let delta = &choice["delta"];
            if let Some(text) = delta["content"].as_str() {
                if !text.is_empty() {
                    out.push(StreamChunk::Text(text.to_string()));
                }
            }
            if let Some(calls) = delta["tool_calls"].as_array() {
                for call in calls {
                    let index = call["index"].as_u64().unwrap_or(0);
                    let entry = self.pending.entry(index).or_default();
                    if let Some(id) = call["id"].as_str() {
                        entry.id = id.to_string();
                    }
                    if let Some(name) = call["function"]["name"].as_str() {
                        entry.name.push_str(name);
                    }
                    if let Some(args) = call["function"]["arguments"].as_str() {
                        entry.args.push_str(args);
                    }
                }
            }
        }
        out
    }
}

fn parse_arguments(raw: &str) -> Value {
    if raw.is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!(error = %e, "tool call arguments were not valid JSON; substituting {{}}");
        json!({})
    })
}

fn parse_usage(v: &Value) -> Option<Usage> {
    let prompt = v["prompt_tokens"].as_u64()?;
    let completion = v["completion_tokens"].as_u64().unwrap_or(0);
    Some(Usage {
        prompt_tokens: prompt as u32,
        completion_tokens: completion as u32,
        total_tokens: v["total_tokens"].as_u64().unwrap_or(prompt + completion) as u32,
        cost_estimate: None,
    })
}

fn map_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("tool_calls") => FinishReason::ToolUse,
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

/// Render a re-authored transcript into OpenAI chat messages.
fn render_messages(messages: &[Message], system: Option<&str>) -> Vec<Value> {
    let mut out = Vec::new();
    if let Some(system) = system {
        out.push(json!({ "role": "system", "content": system }));
    }
    for m in messages {
        match m.role {
            Role::System => out.push(json!({ "role": "system", "content": m.content })),
            Role::User => out.push(json!({ "role": "user", "content": m.content })),
            Role::Assistant => {
                let mut msg = json!({ "role": "assistant", "content": m.content });
                if !m.tool_calls.is_empty() {
                    let calls: Vec<Value> = m
                        .tool_calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": tc.arguments.to_string(),
                                }
                            })
                        })
                        .collect();
                    msg["tool_calls"] = json!(calls);
                }
                out.push(msg);
            }
            Role::Tool => {
                for r in &m.tool_results {
                    out.push(json!({
                        "role": "tool",
                        "tool_call_id": r.tool_call_id,
                        "content": r.content,
                    }));
                }
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolResult;

    fn cfg_with_key() -> ModelConfig {
        ModelConfig {
            api_key: Some("key".into()),
            ..ModelConfig::default()
        }
    }

    #[test]
    fn gpt_identity_and_defaults() {
        let c = OpenAiCompatClient::gpt(&cfg_with_key());
        assert_eq!(c.id(), "gpt");
        assert_eq!(c.display_name(), "GPT");
        assert_eq!(c.model_id(), "gpt-4o");
        assert!(c.chat_url.starts_with("https://api.openai.com/v1"));
    }

    #[test]
    fn grok_uses_xai_endpoint() {
        let c = OpenAiCompatClient::grok(&cfg_with_key());
        assert_eq!(c.id(), "grok");
        assert_eq!(c.model_id(), "grok-3");
        assert!(c.chat_url.starts_with("https://api.x.ai/v1"));
    }

    #[test]
    fn render_places_system_first() {
        let msgs = render_messages(&[Message::user("hi")], Some("sys"));
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[0]["content"], "sys");
        assert_eq!(msgs[1]["role"], "user");
    }

    #[test]
    fn render_assistant_tool_calls_json_encodes_arguments() {
        let msg = Message::assistant_with_calls(
            "",
            "gpt",
            vec![ToolCall {
                id: "call_1".into(),
                name: "read_file".into(),
                arguments: json!({"path": "a.txt"}),
            }],
        );
        let msgs = render_messages(&[msg], None);
        let call = &msgs[0]["tool_calls"][0];
        assert_eq!(call["type"], "function");
        assert_eq!(call["function"]["name"], "read_file");
        // Arguments are a JSON-encoded string on the OpenAI wire.
        let args: Value =
            serde_json::from_str(call["function"]["arguments"].as_str().unwrap()).unwrap();
        assert_eq!(args["path"], "a.txt");
    }

    #[test]
    fn render_tool_results_as_tool_role_messages() {
        let msg = Message::tool_results(
            "read_file",
            vec![
                ToolResult {
                    tool_call_id: "a".into(),
                    content: "one".into(),
                    is_error: false,
                },
                ToolResult {
                    tool_call_id: "b".into(),
                    content: "two".into(),
                    is_error: true,
                },
            ],
        );
        let msgs = render_messages(&[msg], None);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0]["role"], "tool");
        assert_eq!(msgs[0]["tool_call_id"], "a");
        assert_eq!(msgs[1]["tool_call_id"], "b");
    }

    #[test]
    fn build_body_reauthors_foreign_turns() {
        let c = OpenAiCompatClient::gpt(&cfg_with_key());
        let req = CompletionRequest {
            messages: vec![Message::assistant("claude's take", "claude")],
            ..Default::default()
        };
        let body = c.build_body(&req, false);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "[claude says]: claude's take");
    }

    #[test]
    fn sse_text_deltas_stream_through() {
        let mut state = SseState::default();
        let chunks =
            state.dispatch(r#"{"choices":[{"delta":{"content":"hel"},"index":0}]}"#);
        assert!(matches!(&chunks[0], StreamChunk::Text(t) if t == "hel"));
    }

    #[test]
    fn sse_tool_call_fragments_accumulate_across_chunks() {
        let mut state = SseState::default();
        state.dispatch(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"read_file","arguments":""}}]}}]}"#,
        );
        state.dispatch(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"path\":\"a.txt\"}"}}]}}]}"#,
        );
        state.dispatch(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#);
        let chunks = state.dispatch("[DONE]");
        match &chunks[0] {
            StreamChunk::ToolCall(tc) => {
                assert_eq!(tc.id, "call_1");
                assert_eq!(tc.arguments["path"], "a.txt");
            }
            other => panic!("expected ToolCall, got {other:?}"),
        }
        assert!(matches!(
            chunks.last().unwrap(),
            StreamChunk::Done {
                finish_reason: FinishReason::ToolUse,
                ..
            }
        ));
    }

    #[test]
    fn sse_usage_chunk_is_carried_into_done() {
        let mut state = SseState::default();
        state.dispatch(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#);
        state.dispatch(r#"{"choices":[],"usage":{"prompt_tokens":9,"completion_tokens":3,"total_tokens":12}}"#);
        let chunks = state.dispatch("[DONE]");
        match chunks.last().unwrap() {
            StreamChunk::Done { usage, .. } => {
                assert_eq!(usage.unwrap().total_tokens, 12);
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn sse_parallel_tool_calls_keep_index_order() {
        let mut state = SseState::default();
        state.dispatch(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"b","function":{"name":"two","arguments":"{}"}}]}}]}"#,
        );
        state.dispatch(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"a","function":{"name":"one","arguments":"{}"}}]}}]}"#,
        );
        let chunks = state.dispatch("[DONE]");
        let ids: Vec<&str> = chunks
            .iter()
            .filter_map(|c| match c {
                StreamChunk::ToolCall(tc) => Some(tc.id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(map_finish_reason(Some("stop")), FinishReason::Stop);
        assert_eq!(map_finish_reason(Some("tool_calls")), FinishReason::ToolUse);
        assert_eq!(map_finish_reason(Some("length")), FinishReason::Length);
        assert_eq!(
            map_finish_reason(Some("content_filter")),
            FinishReason::ContentFilter
        );
    }
}
