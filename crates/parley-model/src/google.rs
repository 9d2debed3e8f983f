// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use parley_config::ModelConfig;

use crate::anthropic::retry_after_header;
use crate::client::{ChunkStream, ModelClient};
use crate::reauthor::reauthor_transcript;
use crate::retry::{with_retry, RetryPolicy};
use crate::{
    CompletionRequest, FinishReason, Message, ModelError, ModelResponse, Role, StreamChunk,
    ToolCall, Usage,
};

const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Client for Google's Gemini models.
///
/// Gemini does not assign tool-call ids; the adapter synthesizes stable
/// `gemini_call_<n>` ids while decoding so the engine's call/result pairing
/// works the same as for every other provider.
pub struct GoogleClient {
    api_key: Option<String>,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    retry: RetryPolicy,
    http: reqwest::Client,
}

impl GoogleClient {
    pub fn new(api_key: Option<String>, model_id: Option<String>) -> Self {
        Self {
            api_key,
            model: model_id.unwrap_or_else(|| DEFAULT_MODEL.into()),
            base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
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

    fn build_body(&self, req: &CompletionRequest) -> Value {
        let reauthored = reauthor_transcript(&req.messages, "gemini");
        let contents = render_contents(&reauthored);

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": req.max_tokens.unwrap_or(self.max_tokens),
                "temperature": req.temperature.unwrap_or(self.temperature),
            },
        });
        if let Some(system) = &req.system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        if !req.tools.is_empty() {
            let decls: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": decls }]);
        }
        body
    }

    async fn send(&self, body: &Value, stream: bool) -> Result<reqwest::Response, ModelError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ModelError::Auth("GOOGLE_API_KEY not set".into()))?;

        let endpoint = if stream {
            format!(
                "{}/models/{}:streamGenerateContent?alt=sse&key={key}",
                self.base_url, self.model
            )
        } else {
            format!("{}/models/{}:generateContent?key={key}", self.base_url, self.model)
        };

        debug!(model = %self.model, stream, "sending gemini request");
        let resp = self.http.post(&endpoint).json(body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let retry_after = retry_after_header(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            return Err(ModelError::from_status(
                status,
                format!("gemini: {text}"),
                retry_after,
            ));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ModelClient for GoogleClient {
    fn id(&self) -> &str {
        "gemini"
    }
    fn display_name(&self) -> &str {
        "Gemini"
    }
    fn color(&self) -> &str {
        "#4285F4"
    }
    fn model_id(&self) -> &str {
        &self.model
    }
    fn available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, req: CompletionRequest) -> Result<ModelResponse, ModelError> {
        let body = self.build_body(&req);
        let resp = with_retry(&self.retry, || self.send(&body, false)).await?;
        let v: Value = resp.json().await?;

        let mut state = GeminiState::default();
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for chunk in state.dispatch(&v) {
            match chunk {
                StreamChunk::Text(t) => content.push_str(&t),
                StreamChunk::ToolCall(tc) => tool_calls.push(tc),
                StreamChunk::Done { .. } => {}
            }
        }

        Ok(ModelResponse {
            model: self.id().to_string(),
            content,
            finish_reason: state.finish_reason(),
            tool_calls,
            usage: state.usage,
        })
    }

    async fn stream(&self, req: CompletionRequest) -> Result<ChunkStream, ModelError> {
        let body = self.build_body(&req);
        let resp = with_retry(&self.retry, || self.send(&body, true)).await?;

        let stream = resp
            .bytes_stream()
            .scan(GeminiState::default(), |state, chunk| {
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
                        // Gemini has no [DONE] marker; the terminal chunk
                        // carries finishReason and we emit Done right after it.
                        if state.saw_finish && !state.done_emitted {
                            state.done_emitted = true;
                            out.push(Ok(StreamChunk::Done {
                                finish_reason: state.finish_reason(),
                                usage: state.usage,
                            }));
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

#[derive(Default)]
struct GeminiState {
    buf: String,
    call_counter: u32,
    saw_tool_call: bool,
    saw_finish: bool,
    done_emitted: bool,
    finish: FinishReason,
    usage: Option<Usage>,
}

impl GeminiState {
    fn dispatch(&mut self, v: &Value) -> Vec<StreamChunk> {
        let mut out = Vec::new();

        if let Some(parts) = v["candidates"][0]["content"]["parts"].as_array() {
            for part in parts {
                if let Some(text) = part["text"].as_str() {
                    if !text.is_empty() {
                        out.push(StreamChunk::Text(text.to_string()));
                    }
                } else if let Some(fc) = part.get("functionCall") {
                    self.call_counter += 1;
                    self.saw_tool_call = true;
                    out.push(StreamChunk::ToolCall(ToolCall {
                        id: format!("gemini_call_{}", self.call_counter),
                        name: fc["name"].as_str().unwrap_or("").to_string(),
                        arguments: fc
                            .get("args")
                            .cloned()
                            .unwrap_or_else(|| json!({})),
                    }));
                }
            }
        }

        if let Some(reason) = v["candidates"][0]["finishReason"].as_str() {
            self.saw_finish = true;
            self.finish = match reason {
                "MAX_TOKENS" => FinishReason::Length,
                "SAFETY" | "PROHIBITED_CONTENT" => FinishReason::ContentFilter,
                _ => FinishReason::Stop,
            };
        }

        if let Some(meta) = v.get("usageMetadata") {
            let prompt = meta["promptTokenCount"].as_u64().unwrap_or(0) as u32;
            let completion = meta["candidatesTokenCount"].as_u64().unwrap_or(0) as u32;
            self.usage = Some(Usage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: meta["totalTokenCount"]
                    .as_u64()
                    .unwrap_or((prompt + completion) as u64) as u32,
                cost_estimate: None,
            });
        }

        out
    }

    /// A turn that produced function calls is a tool-use turn regardless of
    /// the reported finishReason (Gemini reports STOP either way).
    fn finish_reason(&self) -> FinishReason {
        if self.saw_tool_call {
            FinishReason::ToolUse
        } else {
            self.finish
        }
    }
}

/// Render a re-authored transcript into Gemini `contents`.
fn render_contents(messages: &[Message]) -> Vec<Value> {
    // Tool results reference call ids; Gemini wants function names back.
    let mut call_names = std::collections::HashMap::new();
    for m in messages {
        for tc in &m.tool_calls {
            call_names.insert(tc.id.as_str(), tc.name.as_str());
        }
    }

    let mut out = Vec::new();
    for m in messages {
        match m.role {
            // System turns are carried via systemInstruction; skip here.
            Role::System => {}
            Role::User => {
                out.push(json!({ "role": "user", "parts": [{ "text": m.content }] }));
            }
            Role::Assistant => {
                let mut parts: Vec<Value> = Vec::new();
                if !m.content.is_empty() {
                    parts.push(json!({ "text": m.content }));
                }
                for tc in &m.tool_calls {
                    parts.push(json!({
                        "functionCall": { "name": tc.name, "args": tc.arguments }
                    }));
                }
                if parts.is_empty() {
                    parts.push(json!({ "text": "" }));
                }
                out.push(json!({ "role": "model", "parts": parts }));
            }
            Role::Tool => {
                let parts: Vec<Value> = m
                    .tool_results
                    .iter()
                    .map(|r| {
                        let name = call_names
                            .get(r.tool_call_id.as_str())
                            .copied()
                            .unwrap_or("unknown");
                        json!({
                            "functionResponse": {
                                "name": name,
                                "response": { "content": r.content, "is_error": r.is_error },
                            }
                        })
                    })
                    .collect();
                out.push(json!({ "role": "user", "parts": parts }));
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

    #[test]
    fn client_identity() {
        let c = GoogleClient::new(Some("key".into()), None);
        assert_eq!(c.id(), "gemini");
        assert_eq!(c.model_id(), DEFAULT_MODEL);
        assert!(c.available());
    }

    #[test]
    fn render_maps_assistant_to_model_role() {
        let contents = render_contents(&[
            Message::user("q"),
            Message::assistant("a", "gemini"),
        ]);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["text"], "a");
    }

    #[test]
    fn render_function_call_and_response_pair() {
        let messages = vec![
            Message::assistant_with_calls(
                "",
                "gemini",
                vec![ToolCall {
                    id: "gemini_call_1".into(),
                    name: "list_directory".into(),
                    arguments: json!({"path": "."}),
                }],
            ),
            Message::tool_results(
                "list_directory",
                vec![ToolResult {
                    tool_call_id: "gemini_call_1".into(),
                    content: "a.txt".into(),
                    is_error: false,
                }],
            ),
        ];
        let contents = render_contents(&messages);
        assert_eq!(
            contents[0]["parts"][0]["functionCall"]["name"],
            "list_directory"
        );
        let fr = &contents[1]["parts"][0]["functionResponse"];
        assert_eq!(fr["name"], "list_directory");
        assert_eq!(fr["response"]["content"], "a.txt");
    }

    #[test]
    fn dispatch_text_part() {
        let mut state = GeminiState::default();
        let chunks = state.dispatch(&json!({
            "candidates": [{ "content": { "parts": [{ "text": "hello" }] } }]
        }));
        assert!(matches!(&chunks[0], StreamChunk::Text(t) if t == "hello"));
    }

    #[test]
    fn dispatch_function_call_synthesizes_ids() {
        let mut state = GeminiState::default();
        let chunks = state.dispatch(&json!({
            "candidates": [{ "content": { "parts": [
                { "functionCall": { "name": "read_file", "args": { "path": "x" } } },
                { "functionCall": { "name": "search_files", "args": {} } }
            ] } }]
        }));
        let ids: Vec<&str> = chunks
            .iter()
            .filter_map(|c| match c {
                StreamChunk::ToolCall(tc) => Some(tc.id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["gemini_call_1", "gemini_call_2"]);
    }

    #[test]
    fn tool_call_turn_reports_tool_use_finish() {
        let mut state = GeminiState::default();
        state.dispatch(&json!({
            "candidates": [{
                "content": { "parts": [{ "functionCall": { "name": "f", "args": {} } }] },
                "finishReason": "STOP"
            }]
        }));
        assert_eq!(state.finish_reason(), FinishReason::ToolUse);
    }

    #[test]
    fn usage_metadata_is_parsed() {
        let mut state = GeminiState::default();
        state.dispatch(&json!({
            "candidates": [{ "finishReason": "STOP" }],
            "usageMetadata": { "promptTokenCount": 5, "candidatesTokenCount": 2, "totalTokenCount": 7 }
        }));
        assert_eq!(state.usage.unwrap().total_tokens, 7);
        assert!(state.saw_finish);
    }

    #[test]
    fn max_tokens_maps_to_length() {
        let mut state = GeminiState::default();
        state.dispatch(&json!({ "candidates": [{ "finishReason": "MAX_TOKENS" }] }));
        assert_eq!(state.finish_reason(), FinishReason::Length);
    }
}
