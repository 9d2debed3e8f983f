// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The orchestration engine.
//!
//! One `process` call drives a full turn: parse mentions, evaluate who
//! speaks, order the contributors, then run each contributor's streaming
//! tool loop strictly sequentially, emitting [`OrchestratorEvent`]s through
//! the caller's channel.  The transcript is owned exclusively by the engine;
//! consumers only observe snapshots embedded in events.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use parley_config::Config;
use parley_model::{
    CompletionRequest, FinishReason, Message, ModelClient, ModelError, ModelResponse, StreamChunk,
    ToolCall, ToolResult, Usage,
};
use parley_store::{Session, SessionStore};
use parley_tools::{
    content_hash, FileOperation, PermissionManager, ToolContext, ToolExecutionResult,
    ToolExecutor, ToolRegistry,
};

use crate::{
    ContextAssembler, MentionParser, OrchestratorEvent, SpeakerDecision, SpeakingEvaluator,
    SummaryManager, TurnManager,
};

/// Canonical participant order for turn rotation.
const CANONICAL_ORDER: [&str; 4] = ["claude", "gpt", "gemini", "grok"];

/// Read-only tools that are always safe to run concurrently, regardless of
/// how their registry entry is flagged.
const PARALLEL_SAFE_TOOLS: [&str; 3] = ["read_file", "list_directory", "search_files"];

const PREVIOUS_RESPONSE_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct ModelStatus {
    pub available: bool,
    pub display_name: String,
    pub color: String,
    pub model_id: String,
}

pub struct Orchestrator {
    clients: BTreeMap<String, Arc<dyn ModelClient>>,
    config: Arc<Config>,
    canonical: Vec<String>,
    mentions: MentionParser,
    evaluator: SpeakingEvaluator,
    turn_manager: TurnManager,
    assembler: ContextAssembler,
    registry: Arc<ToolRegistry>,
    executor: Arc<ToolExecutor>,
    tool_context: ToolContext,
    transcript: Vec<Message>,
    pinned: HashSet<String>,
    /// Models disabled for the rest of the session after an auth failure.
    disabled: HashSet<String>,
    store: Option<Arc<dyn SessionStore>>,
    session: Option<Session>,
    summarizer: Option<Arc<dyn ModelClient>>,
    latest_summary: Option<String>,
}

impl Orchestrator {
    pub fn new(
        clients: BTreeMap<String, Arc<dyn ModelClient>>,
        config: Config,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        let config = Arc::new(config);
        let executor = Arc::new(ToolExecutor::new(
            registry.clone(),
            PermissionManager::from_config(&config.tools),
        ));
        let canonical = canonical_order(&clients);
        let mentions = MentionParser::new(clients.keys());
        let evaluator = SpeakingEvaluator::new(config.conversation.silence_threshold);
        let turn_manager =
            TurnManager::new(config.conversation.first_responder, canonical.clone());
        let assembler = ContextAssembler::new(
            config.conversation.max_context_tokens,
            config.conversation.response_reserve,
        );
        Self {
            clients,
            config,
            canonical,
            mentions,
            evaluator,
            turn_manager,
            assembler,
            registry,
            executor,
            tool_context: ToolContext::new(),
            transcript: Vec::new(),
            pinned: HashSet::new(),
            disabled: HashSet::new(),
            store: None,
            session: None,
            summarizer: None,
            latest_summary: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Model used for conversation summarization.  Without one (or without a
    /// store) summarization never triggers.
    pub fn with_summarizer(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.summarizer = Some(client);
        self
    }

    // ─── Turn processing ─────────────────────────────────────────────────────

    /// Process one user utterance, emitting events through `tx`.  Event
    /// delivery is pull-driven: a slow consumer applies backpressure at the
    /// channel send.
    pub async fn process(
        &mut self,
        user_text: &str,
        tx: mpsc::Sender<OrchestratorEvent>,
    ) -> anyhow::Result<()> {
        // Never fired; keeps the receiver pending for the whole turn.
        let (_keep_alive, cancel) = oneshot::channel();
        self.process_with_cancel(user_text, tx, cancel).await
    }

    /// Like [`process`] but cooperatively cancellable.  When `cancel`
    /// resolves (sent or dropped), in-flight provider and tool calls are
    /// dropped and no further events are emitted; messages already appended
    /// to the transcript remain.
    pub async fn process_with_cancel(
        &mut self,
        user_text: &str,
        tx: mpsc::Sender<OrchestratorEvent>,
        mut cancel: oneshot::Receiver<()>,
    ) -> anyhow::Result<()> {
        if cancelled(&mut cancel) {
            return Ok(());
        }

        let parsed = self.mentions.parse(user_text);
        let available = self.available_models();
        let forced: HashSet<String> = self
            .mentions
            .forced_speakers(&parsed, &available)
            .into_iter()
            .collect();

        self.append_to_transcript(Message::user(&parsed.clean_text), None)
            .await;

        let _ = tx.send(OrchestratorEvent::Thinking).await;

        let clients: Vec<Arc<dyn ModelClient>> = available
            .iter()
            .filter_map(|m| self.clients.get(m).cloned())
            .collect();
        let decisions = tokio::select! {
            biased;
            _ = &mut cancel => return Ok(()),
            decisions = self.evaluator.evaluate_all(
                &clients,
                &self.transcript,
                &parsed.clean_text,
                &[],
                &forced,
            ) => decisions,
        };

        for decision in &decisions {
            let event = if decision.will_speak {
                OrchestratorEvent::WillSpeak(decision.clone())
            } else {
                OrchestratorEvent::WillStaySilent(decision.clone())
            };
            let _ = tx.send(event).await;
        }

        let order = self.turn_manager.determine(&decisions);
        if order.is_empty() {
            info!("all models chose to stay silent");
            let _ = tx
                .send(OrchestratorEvent::TurnComplete {
                    responses: Vec::new(),
                    usage: None,
                })
                .await;
            return Ok(());
        }

        let mut responses: Vec<ModelResponse> = Vec::new();
        let mut total_usage = Usage::default();

        for model in order {
            if cancelled(&mut cancel) {
                return Ok(());
            }
            let extra = self.extra_context(&responses);
            let outcome = tokio::select! {
                biased;
                _ = &mut cancel => return Ok(()),
                outcome = self.contributor_step(&model, extra, &tx, &mut total_usage) => outcome,
            };
            if let Some(response) = outcome {
                responses.push(response);
            }
        }

        self.maybe_summarize().await;

        let usage = if total_usage.is_zero() {
            None
        } else {
            Some(total_usage)
        };
        let _ = tx
            .send(OrchestratorEvent::TurnComplete { responses, usage })
            .await;
        Ok(())
    }

    /// Re-run one contributor against the current transcript.  No
    /// evaluation, no ordering, no turn completion.
    pub async fn retry_model(
        &mut self,
        model: &str,
        tx: mpsc::Sender<OrchestratorEvent>,
    ) -> anyhow::Result<()> {
        let mut usage = Usage::default();
        self.contributor_step(model, None, &tx, &mut usage).await;
        Ok(())
    }

    /// Like [`retry_model`] but announced with a synthetic forced decision.
    pub async fn force_speak(
        &mut self,
        model: &str,
        tx: mpsc::Sender<OrchestratorEvent>,
    ) -> anyhow::Result<()> {
        let _ = tx
            .send(OrchestratorEvent::WillSpeak(SpeakerDecision::forced(model)))
            .await;
        let mut usage = Usage::default();
        self.contributor_step(model, None, &tx, &mut usage).await;
        Ok(())
    }

    // ─── Contributor step ────────────────────────────────────────────────────

    /// Stream one contributor's reply, executing tool calls until a
    /// non-tool-use finish or the iteration cap.  Returns the completed
    /// response, or `None` when the contributor errored out (an `Error`
    /// event has been emitted; the turn proceeds).
    async fn contributor_step(
        &mut self,
        model_name: &str,
        extra_context: Option<String>,
        tx: &mpsc::Sender<OrchestratorEvent>,
        turn_usage: &mut Usage,
    ) -> Option<ModelResponse> {
        let client = match self.clients.get(model_name) {
            Some(c) if c.available() && !self.disabled.contains(model_name) => c.clone(),
            _ => {
                let _ = tx
                    .send(OrchestratorEvent::Error {
                        model: Some(model_name.to_string()),
                        message: format!("Model {model_name} is not available"),
                    })
                    .await;
                return None;
            }
        };

        let _ = tx
            .send(OrchestratorEvent::ResponseStart {
                model: model_name.to_string(),
            })
            .await;

        let mut other_models = Vec::new();
        for name in self.available_models() {
            if name != model_name {
                if let Some(c) = self.clients.get(&name) {
                    other_models.push(c.display_name().to_string());
                }
            }
        }

        let (system, mut messages) = self.assembler.assemble(
            &self.transcript,
            client.as_ref(),
            &other_models,
            &self.pinned,
            extra_context.as_deref(),
        );

        let tools = self.registry.schemas();
        let max_iterations = self.config.tools.max_tool_iterations;
        let mut iteration = 0u32;

        loop {
            if iteration >= max_iterations {
                warn!(model = model_name, max_iterations, "maximum tool iterations reached");
                let _ = tx
                    .send(OrchestratorEvent::Error {
                        model: Some(model_name.to_string()),
                        message: format!("Maximum tool iterations ({max_iterations}) reached"),
                    })
                    .await;
                return None;
            }
            iteration += 1;

            let request = CompletionRequest {
                messages: messages.clone(),
                system: Some(system.clone()),
                tools: tools.clone(),
                max_tokens: None,
                temperature: None,
            };

            let mut stream = match client.stream(request).await {
                Ok(s) => s,
                Err(e) => {
                    self.handle_model_error(model_name, &e, tx).await;
                    return None;
                }
            };

            let mut content = String::new();
            let mut calls: Vec<ToolCall> = Vec::new();
            let mut finish = FinishReason::Stop;
            let mut usage: Option<Usage> = None;
            let mut stream_failed = false;

            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(StreamChunk::Text(text)) => {
                        content.push_str(&text);
                        let _ = tx
                            .send(OrchestratorEvent::ResponseChunk {
                                model: model_name.to_string(),
                                text,
                            })
                            .await;
                    }
                    Ok(StreamChunk::ToolCall(call)) => {
                        let _ = tx
                            .send(OrchestratorEvent::ToolCall {
                                model: model_name.to_string(),
                                call: call.clone(),
                            })
                            .await;
                        calls.push(call);
                    }
                    Ok(StreamChunk::Done {
                        finish_reason,
                        usage: chunk_usage,
                    }) => {
                        finish = finish_reason;
                        usage = chunk_usage;
                    }
                    Err(e) => {
                        self.handle_model_error(model_name, &e, tx).await;
                        stream_failed = true;
                        break;
                    }
                }
            }
            drop(stream);

            if let Some(u) = usage {
                *turn_usage += u;
            }

            if stream_failed {
                // Keep text that already streamed so the transcript stays
                // consistent with what the consumer rendered.
                if !content.is_empty() {
                    self.append_to_transcript(Message::assistant(&content, model_name), usage)
                        .await;
                }
                return None;
            }

            let assistant = self
                .append_to_transcript(
                    Message::assistant_with_calls(&content, model_name, calls.clone()),
                    usage,
                )
                .await;

            if finish == FinishReason::ToolUse && !calls.is_empty() {
                let results = self.execute_tools(&calls).await;
                for result in &results {
                    let _ = tx
                        .send(OrchestratorEvent::ToolResult {
                            model: model_name.to_string(),
                            result: result.clone(),
                        })
                        .await;
                }
                let mut names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
                names.dedup();
                let tool_message = self
                    .append_to_transcript(Message::tool_results(names.join(","), results), None)
                    .await;

                // The older context prefix did not change; extend the
                // in-memory suffix instead of reassembling.
                messages.push(assistant);
                messages.push(tool_message);
                continue;
            }

            let response = ModelResponse {
                model: model_name.to_string(),
                content,
                finish_reason: finish,
                tool_calls: calls,
                usage,
            };
            let _ = tx
                .send(OrchestratorEvent::ResponseComplete {
                    model: model_name.to_string(),
                    response: response.clone(),
                })
                .await;
            return Some(response);
        }
    }

    async fn handle_model_error(
        &mut self,
        model: &str,
        error: &ModelError,
        tx: &mpsc::Sender<OrchestratorEvent>,
    ) {
        if matches!(error, ModelError::Auth(_)) {
            warn!(model, "authentication failed; disabling model for this session");
            self.disabled.insert(model.to_string());
        }
        let _ = tx
            .send(OrchestratorEvent::Error {
                model: Some(model.to_string()),
                message: error.to_string(),
            })
            .await;
    }

    // ─── Tool execution ──────────────────────────────────────────────────────

    /// Execute one response's tool calls: the parallel-safe group runs
    /// concurrently first, then the sequential group in original relative
    /// order.  Results are reassembled into the original call order.
    async fn execute_tools(&mut self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let exec_results: Vec<ToolExecutionResult> = if self.config.tools.parallel_tools {
            let (parallel, sequential): (Vec<ToolCall>, Vec<ToolCall>) = calls
                .iter()
                .cloned()
                .partition(|c| self.is_parallel_safe(&c.name));

            let mut by_id: HashMap<String, ToolExecutionResult> = HashMap::new();
            if !parallel.is_empty() {
                info!(count = parallel.len(), "executing parallel-safe tool calls concurrently");
                for result in self.executor.execute_batch(&parallel, true).await {
                    by_id.insert(result.tool_call_id.clone(), result);
                }
            }
            for call in &sequential {
                let result = self.executor.execute(call).await;
                by_id.insert(result.tool_call_id.clone(), result);
            }
            calls
                .iter()
                .filter_map(|c| by_id.remove(&c.id))
                .collect()
        } else {
            self.executor.execute_batch(calls, false).await
        };

        for (call, result) in calls.iter().zip(exec_results.iter()) {
            self.record_tool_activity(call, result);
        }
        exec_results.iter().map(|r| r.to_tool_result()).collect()
    }

    fn is_parallel_safe(&self, name: &str) -> bool {
        PARALLEL_SAFE_TOOLS.contains(&name) || self.registry.is_parallel_safe(name)
    }

    fn record_tool_activity(&mut self, call: &ToolCall, result: &ToolExecutionResult) {
        if !result.success {
            return;
        }
        let path = call
            .arguments
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        match call.name.as_str() {
            "write_file" => {
                let hash = call
                    .arguments
                    .get("content")
                    .and_then(|v| v.as_str())
                    .map(|c| content_hash(c.as_bytes()));
                self.tool_context
                    .record_modification(path, FileOperation::Write, hash);
            }
            "edit_file" => {
                self.tool_context
                    .record_modification(path, FileOperation::Edit, None);
            }
            "read_file" => {
                if let Some(content) = result.result.as_deref() {
                    self.tool_context
                        .record_read(path, content_hash(content.as_bytes()));
                }
            }
            _ => {}
        }
    }

    // ─── Context helpers ─────────────────────────────────────────────────────

    /// Extra system context for a contributor: the latest stored summary
    /// plus previews of the responses earlier speakers gave this turn.
    fn extra_context(&self, previous: &[ModelResponse]) -> Option<String> {
        let mut sections = Vec::new();
        if let Some(summary) = &self.latest_summary {
            sections.push(format!("Summary of earlier conversation:\n{summary}"));
        }
        if !previous.is_empty() {
            let lines = previous
                .iter()
                .map(|r| {
                    let preview: String = r
                        .content
                        .chars()
                        .take(PREVIOUS_RESPONSE_PREVIEW_CHARS)
                        .collect();
                    if r.content.chars().count() > PREVIOUS_RESPONSE_PREVIEW_CHARS {
                        format!("- {}: {preview}...", r.model)
                    } else {
                        format!("- {}: {preview}", r.model)
                    }
                })
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(format!(
                "Other models have already responded this turn:\n{lines}"
            ));
        }
        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n\n"))
        }
    }

    async fn maybe_summarize(&mut self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let Some(summarizer) = self.summarizer.clone() else {
            return;
        };
        let Some(session_id) = self.session.as_ref().map(|s| s.id.clone()) else {
            return;
        };
        let manager = SummaryManager::new(
            store,
            summarizer,
            self.config.conversation.summarize_threshold_tokens,
        );
        match manager.check_and_summarize(&session_id, &self.transcript).await {
            Ok(Some(summary)) => self.latest_summary = Some(summary.content),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "summarization failed"),
        }
    }

    /// Append to the owned transcript, persisting first when a session is
    /// active so the stored id lands on the in-memory message.  Returns the
    /// appended message.
    async fn append_to_transcript(&mut self, mut message: Message, usage: Option<Usage>) -> Message {
        if let (Some(store), Some(session)) = (self.store.as_ref(), self.session.as_ref()) {
            match store.append_message(&session.id, &message, usage).await {
                Ok(id) => message.id = Some(id),
                Err(e) => warn!(error = %e, "failed to persist message"),
            }
        }
        self.transcript.push(message.clone());
        message
    }

    // ─── Sessions, pins, status ──────────────────────────────────────────────

    pub async fn new_session(
        &mut self,
        name: Option<String>,
        project_path: Option<String>,
    ) -> anyhow::Result<()> {
        let store = self.store.as_ref().context("no session store configured")?;
        let session = store.create_session(name, project_path, None).await?;
        self.session = Some(session);
        self.transcript.clear();
        self.pinned.clear();
        self.latest_summary = None;
        self.tool_context.clear();
        Ok(())
    }

    pub async fn load_session(&mut self, session_id: &str) -> anyhow::Result<()> {
        let store = self.store.as_ref().context("no session store configured")?;
        let (session, messages, pins) = store.load_session(session_id).await?;
        self.latest_summary = store.latest_summary(session_id).await?.map(|s| s.content);
        self.session = Some(session);
        self.transcript = messages;
        self.pinned = pins;
        self.tool_context.clear();
        Ok(())
    }

    pub async fn pin(&mut self, message_id: &str) -> anyhow::Result<()> {
        self.pinned.insert(message_id.to_string());
        if let (Some(store), Some(session)) = (self.store.as_ref(), self.session.as_ref()) {
            store.set_pin(&session.id, message_id, true).await?;
        }
        Ok(())
    }

    pub async fn unpin(&mut self, message_id: &str) -> anyhow::Result<()> {
        self.pinned.remove(message_id);
        if let (Some(store), Some(session)) = (self.store.as_ref(), self.session.as_ref()) {
            store.set_pin(&session.id, message_id, false).await?;
        }
        Ok(())
    }

    pub fn model_status(&self) -> BTreeMap<String, ModelStatus> {
        self.clients
            .iter()
            .map(|(name, client)| {
                (
                    name.clone(),
                    ModelStatus {
                        available: client.available() && !self.disabled.contains(name),
                        display_name: client.display_name().to_string(),
                        color: client.color().to_string(),
                        model_id: client.model_id().to_string(),
                    },
                )
            })
            .collect()
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    pub fn tool_context(&self) -> &ToolContext {
        &self.tool_context
    }

    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    pub fn current_first_responder(&self) -> Option<&str> {
        self.turn_manager.current_first_responder()
    }

    pub fn set_first_responder(&mut self, model: &str) {
        self.turn_manager.set_first(model);
    }

    pub fn reset_rotation(&mut self) {
        self.turn_manager.reset();
    }

    fn available_models(&self) -> Vec<String> {
        self.canonical
            .iter()
            .filter(|m| {
                !self.disabled.contains(*m)
                    && self
                        .clients
                        .get(*m)
                        .map(|c| c.available())
                        .unwrap_or(false)
            })
            .cloned()
            .collect()
    }
}

fn cancelled(cancel: &mut oneshot::Receiver<()>) -> bool {
    !matches!(
        cancel.try_recv(),
        Err(oneshot::error::TryRecvError::Empty)
    )
}

/// The canonical rotation order: the four known participants first, then
/// any additional clients in map order.
fn canonical_order(clients: &BTreeMap<String, Arc<dyn ModelClient>>) -> Vec<String> {
    let mut order: Vec<String> = CANONICAL_ORDER
        .iter()
        .filter(|m| clients.contains_key(**m))
        .map(|m| m.to_string())
        .collect();
    for key in clients.keys() {
        if !order.contains(key) {
            order.push(key.clone());
        }
    }
    order
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod unit_tests {
    use super::*;
    use parley_model::ScriptedMockClient;

    fn clients_of(ids: &[&str]) -> BTreeMap<String, Arc<dyn ModelClient>> {
        ids.iter()
            .map(|id| {
                (
                    id.to_string(),
                    Arc::new(ScriptedMockClient::new(*id, vec![])) as Arc<dyn ModelClient>,
                )
            })
            .collect()
    }

    #[test]
    fn canonical_order_puts_known_participants_first() {
        let clients = clients_of(&["gemini", "zeta", "claude"]);
        assert_eq!(canonical_order(&clients), vec!["claude", "gemini", "zeta"]);
    }

    #[test]
    fn model_status_reflects_client_attributes() {
        let orch = Orchestrator::new(
            clients_of(&["claude", "gpt"]),
            Config::default(),
            Arc::new(ToolRegistry::new()),
        );
        let status = orch.model_status();
        assert_eq!(status.len(), 2);
        assert!(status["claude"].available);
        assert_eq!(status["claude"].display_name, "Claude");
        assert_eq!(status["claude"].model_id, "mock-model");
    }

    #[test]
    fn extra_context_combines_summary_and_previous_responses() {
        let mut orch = Orchestrator::new(
            clients_of(&["claude"]),
            Config::default(),
            Arc::new(ToolRegistry::new()),
        );
        assert!(orch.extra_context(&[]).is_none());
        orch.latest_summary = Some("old stuff".into());
        let previous = vec![ModelResponse::text("gpt", "x".repeat(300))];
        let context = orch.extra_context(&previous).unwrap();
        assert!(context.contains("Summary of earlier conversation:\nold stuff"));
        assert!(context.contains("- gpt: "));
        assert!(context.contains("..."), "long previews are elided");
    }
}
