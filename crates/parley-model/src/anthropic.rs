// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use parley_config::ModelConfig;

use crate::client::{ChunkStream, ModelClient};
use crate::reauthor::reauthor_transcript;
use crate::retry::{with_retry, RetryPolicy};
use crate::{
    CompletionRequest, FinishReason, Message, ModelError, ModelResponse, Role, StreamChunk,
    ToolCall, Usage,
};

const DEFAULT_MODEL: &str = "claude-opus-4-5-20251101";
const API_VERSION: &str = "2023-06-01";

/// Client for Anthropic's Claude models.
pub struct AnthropicClient {
    api_key: Option<String>,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    retry: RetryPolicy,
    http: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(api_key: Option<String>, model_id: Option<String>) -> Self {
        Self {
            api_key,
            model: model_id.unwrap_or_else(|| DEFAULT_MODEL.into()),
            base_url: "https://api.anthropic.com".into(),
            max_tokens: 8192,
            temperature: 0.7,
            retry: RetryPolicy::default(),
            http: reqwest::Client::new(),
        }
    }

    pub fn from_config(cfg: &ModelConfig) -> Self {
        let mut client = Self::new(cfg.resolve_api_key(), cfg.model_id.clone());
        if let Some(mt) = cfg.max_tokens {
            client.max_tokens = mt;
        }
        if let Some(t) = cfg.temperature {
            client.temperature = t;
        }
        client
    }

    /// Override the API base URL (local proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_body(&self, req: &CompletionRequest, stream: bool) -> Value {
        let reauthored = reauthor_transcript(&req.messages, "claude");
        let (extracted_system, messages) = render_messages(&reauthored);

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": req.max_tokens.unwrap_or(self.max_tokens),
            "temperature": req.temperature.unwrap_or(self.temperature),
            "stream": stream,
        });
        if let Some(system) = req.system.clone().or(extracted_system) {
            body["system"] = json!(system);
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, ModelError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ModelError::Auth("ANTHROPIC_API_KEY not set".into()))?;

        debug!(model = %self.model, "sending anthropic request");
        let resp = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let retry_after = retry_after_header(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            return Err(ModelError::from_status(
                status,
                format!("anthropic: {text}"),
                retry_after,
            ));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    fn id(&self) -> &str {
        "claude"
    }
    fn display_name(&self) -> &str {
        "Claude"
    }
    fn color(&self) -> &str {
        "#E07B53"
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

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        if let Some(blocks) = v["content"].as_array() {
            for block in blocks {
                match block["type"].as_str().unwrap_or("") {
                    "text" => content.push_str(block["text"].as_str().unwrap_or("")),
                    "tool_use" => tool_calls.push(ToolCall {
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        name: block["name"].as_str().unwrap_or("").to_string(),
                        arguments: block["input"].clone(),
                    }),
                    _ => {}
                }
            }
        }

        Ok(ModelResponse {
            model: self.id().to_string(),
            content,
            finish_reason: map_stop_reason(v["stop_reason"].as_str()),
            tool_calls,
            usage: Some(Usage {
                prompt_tokens: v["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
                completion_tokens: v["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
                total_tokens: (v["usage"]["input_tokens"].as_u64().unwrap_or(0)
                    + v["usage"]["output_tokens"].as_u64().unwrap_or(0))
                    as u32,
                cost_estimate: None,
            }),
        })
    }

    async fn stream(&self, req: CompletionRequest) -> Result<ChunkStream, ModelError> {
        let body = self.build_body(&req, true);
        let resp = with_retry(&self.retry, || self.send(&body)).await?;

        // SSE lines can be split across TCP chunks; carry a remainder buffer
        // forward and only parse complete lines.
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
                                if let Ok(v) = serde_json::from_str::<Value>(data.trim()) {
                                    out.extend(state.dispatch(&v).into_iter().map(Ok));
                                }
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

/// Per-stream accumulation state for the Anthropic SSE decode.
#[derive(Default)]
struct SseState {
    buf: String,
    pending: BTreeMap<u64, PendingCall>,
    finish: FinishReason,
    usage: Usage,
    saw_usage: bool,
}

#[derive(Default)]
struct PendingCall {
    id: String,
    name: String,
    args: String,
}

impl PendingCall {
    fn finish(self) -> ToolCall {
        let arguments = if self.args.is_empty() {
            json!({})
        } else {
            serde_json::from_str(&self.args).unwrap_or_else(|e| {
                warn!(error = %e, "tool call arguments were not valid JSON; substituting {{}}");
                json!({})
            })
        };
        ToolCall {
            id: self.id,
            name: self.name,
            arguments,
        }
    }
}

impl SseState {
    fn dispatch(&mut self, v: &Value) -> Vec<StreamChunk> {
        match v["type"].as_str().unwrap_or("") {
            "content_block_start" => {
                let index = v["index"].as_u64().unwrap_or(0);
                let block = &v["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    self.pending.insert(
                        index,
                        PendingCall {
                            id: block["id"].as_str().unwrap_or("").to_string(),
                            name: block["name"].as_str().unwrap_or("").to_string(),
                            args: String::new(),
                        },
                    );
                }
                vec![]
            }
            "content_block_delta" => {
                let index = v["index"].as_u64().unwrap_or(0);
                let delta = &v["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => {
                        let text = delta["text"].as_str().unwrap_or("");
                        if text.is_empty() {
                            vec![]
                        } else {
                            vec![StreamChunk::Text(text.to_string())]
                        }
                    }
                    "input_json_delta" => {
                        if let Some(p) = self.pending.get_mut(&index) {
                            p.args.push_str(delta["partial_json"].as_str().unwrap_or(""));
                        }
                        vec![]
                    }
                    _ => vec![],
                }
            }
            "content_block_stop" => {
                let index = v["index"].as_u64().unwrap_or(0);
                match self.pending.remove(&index) {
                    Some(p) if !p.name.is_empty() => vec![StreamChunk::ToolCall(p.finish())],
                    _ => vec![],
                }
            }
            "message_start" => {
                if let Some(usage) = v["message"].get("usage") {
                    self.usage.prompt_tokens = usage["input_tokens"].as_u64().unwrap_or(0) as u32;
                    self.saw_usage = true;
                }
                vec![]
            }
            "message_delta" => {
                if let Some(reason) = v["delta"]["stop_reason"].as_str() {
                    self.finish = map_stop_reason(Some(reason));
                }
                if let Some(usage) = v.get("usage") {
                    self.usage.completion_tokens =
                        usage["output_tokens"].as_u64().unwrap_or(0) as u32;
                    self.saw_usage = true;
                }
                vec![]
            }
            "message_stop" => {
                // Flush any unterminated tool call before the terminal marker.
                let mut out: Vec<StreamChunk> = std::mem::take(&mut self.pending)
                    .into_values()
                    .filter(|p| !p.name.is_empty())
                    .map(|p| StreamChunk::ToolCall(p.finish()))
                    .collect();
                self.usage.total_tokens = self.usage.prompt_tokens + self.usage.completion_tokens;
                out.push(StreamChunk::Done {
                    finish_reason: self.finish,
                    usage: self.saw_usage.then_some(self.usage),
                });
                out
            }
            _ => vec![],
        }
    }
}

fn map_stop_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("tool_use") => FinishReason::ToolUse,
        Some("max_tokens") => FinishReason::Length,
        Some("refusal") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

/// Parse a `Retry-After` header (seconds form) into a duration.
pub(crate) fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .map(Duration::from_secs_f64)
}

/// Render a re-authored transcript into Anthropic wire messages.
///
/// Returns `(system_text, messages)`; system turns are carried separately
/// because Anthropic expects a top-level `system` field.
fn render_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system = None;
    let mut out = Vec::new();

    for m in messages {
        match m.role {
            Role::System => system = Some(m.content.clone()),
            Role::User => out.push(json!({ "role": "user", "content": m.content })),
            Role::Assistant => {
                let mut blocks: Vec<Value> = Vec::new();
                if !m.content.is_empty() {
                    blocks.push(json!({ "type": "text", "text": m.content }));
                }
                for tc in &m.tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.name,
                        "input": tc.arguments,
                    }));
                }
                if blocks.is_empty() {
                    out.push(json!({ "role": "assistant", "content": "" }));
                } else {
                    out.push(json!({ "role": "assistant", "content": blocks }));
                }
            }
            Role::Tool => {
                let blocks: Vec<Value> = m
                    .tool_results
                    .iter()
                    .map(|r| {
                        json!({
                            "type": "tool_result",
                            "tool_use_id": r.tool_call_id,
                            "content": r.content,
                            "is_error": r.is_error,
                        })
                    })
                    .collect();
                out.push(json!({ "role": "user", "content": blocks }));
            }
        }
    }
    (system, out)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
