// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Scripted mock client for tests.
//!
//! The mock pops one [`ModelResponse`] per call from its script, records
//! every request it receives, and can optionally delay before answering so
//! timeout paths are testable with short deadlines.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::client::{ChunkStream, ModelClient};
use crate::{CompletionRequest, ModelError, ModelResponse, StreamChunk};

pub struct ScriptedMockClient {
    id: String,
    display_name: String,
    responses: Mutex<VecDeque<ModelResponse>>,
    last: Mutex<Option<ModelResponse>>,
    requests: Mutex<Vec<CompletionRequest>>,
    delay: Option<Duration>,
    repeat_exhausted: bool,
    available: bool,
}

impl ScriptedMockClient {
    pub fn new(id: impl Into<String>, responses: Vec<ModelResponse>) -> Self {
        let id = id.into();
        let mut display = id.clone();
        if let Some(first) = display.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        Self {
            id,
            display_name: display,
            responses: Mutex::new(responses.into()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            delay: None,
            repeat_exhausted: false,
            available: true,
        }
    }

    /// A mock that replays `response` forever.
    pub fn looping(id: impl Into<String>, response: ModelResponse) -> Self {
        let mut mock = Self::new(id, vec![response]);
        mock.repeat_exhausted = true;
        mock
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Requests received so far, in call order.
    pub fn recorded_requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn next_response(&self) -> ModelResponse {
        let mut script = self.responses.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        match script.pop_front() {
            Some(r) => {
                *last = Some(r.clone());
                r
            }
            None if self.repeat_exhausted => last
                .clone()
                .unwrap_or_else(|| ModelResponse::text(&self.id, "")),
            None => ModelResponse::text(&self.id, ""),
        }
    }
}

#[async_trait]
impl ModelClient for ScriptedMockClient {
    fn id(&self) -> &str {
        &self.id
    }
    fn display_name(&self) -> &str {
        &self.display_name
    }
    fn color(&self) -> &str {
        "#888888"
    }
    fn model_id(&self) -> &str {
        "mock-model"
    }
    fn available(&self) -> bool {
        self.available
    }

    async fn generate(&self, req: CompletionRequest) -> Result<ModelResponse, ModelError> {
        self.requests.lock().unwrap().push(req);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.next_response())
    }

    async fn stream(&self, req: CompletionRequest) -> Result<ChunkStream, ModelError> {
        self.requests.lock().unwrap().push(req);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let response = self.next_response();

        let mut chunks: Vec<Result<StreamChunk, ModelError>> = Vec::new();
        if !response.content.is_empty() {
            chunks.push(Ok(StreamChunk::Text(response.content.clone())));
        }
        for tc in &response.tool_calls {
            chunks.push(Ok(StreamChunk::ToolCall(tc.clone())));
        }
        chunks.push(Ok(StreamChunk::Done {
            finish_reason: response.finish_reason,
            usage: response.usage,
        }));
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FinishReason, ToolCall};
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn generate_pops_responses_in_order() {
        let mock = ScriptedMockClient::new(
            "claude",
            vec![
                ModelResponse::text("claude", "first"),
                ModelResponse::text("claude", "second"),
            ],
        );
        let a = mock.generate(CompletionRequest::default()).await.unwrap();
        let b = mock.generate(CompletionRequest::default()).await.unwrap();
        assert_eq!(a.content, "first");
        assert_eq!(b.content, "second");
        assert_eq!(mock.request_count(), 2);
    }

    #[tokio::test]
    async fn looping_mock_repeats_last_response() {
        let mut r = ModelResponse::text("gpt", "");
        r.finish_reason = FinishReason::ToolUse;
        r.tool_calls = vec![ToolCall {
            id: "c".into(),
            name: "list_directory".into(),
            arguments: json!({"path": "."}),
        }];
        let mock = ScriptedMockClient::looping("gpt", r);
        for _ in 0..3 {
            let resp = mock.generate(CompletionRequest::default()).await.unwrap();
            assert_eq!(resp.finish_reason, FinishReason::ToolUse);
            assert_eq!(resp.tool_calls.len(), 1);
        }
    }

    #[tokio::test]
    async fn stream_emits_text_tool_calls_then_done() {
        let mut r = ModelResponse::text("claude", "hi");
        r.finish_reason = FinishReason::ToolUse;
        r.tool_calls = vec![ToolCall {
            id: "c1".into(),
            name: "read_file".into(),
            arguments: json!({}),
        }];
        let mock = ScriptedMockClient::new("claude", vec![r]);
        let chunks: Vec<_> = mock
            .stream(CompletionRequest::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert!(matches!(chunks[0].as_ref().unwrap(), StreamChunk::Text(t) if t == "hi"));
        assert!(matches!(
            chunks[1].as_ref().unwrap(),
            StreamChunk::ToolCall(_)
        ));
        assert!(matches!(
            chunks[2].as_ref().unwrap(),
            StreamChunk::Done {
                finish_reason: FinishReason::ToolUse,
                ..
            }
        ));
    }

    #[test]
    fn display_name_is_capitalized_id() {
        let mock = ScriptedMockClient::new("gemini", vec![]);
        assert_eq!(mock.display_name(), "Gemini");
    }
}
