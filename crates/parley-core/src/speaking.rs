// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Parallel "should I speak?" evaluation.
//!
//! Every candidate is asked concurrently under a bounded timeout so one
//! slow provider cannot stall the turn.  Failures never abort evaluation:
//! a candidate that times out, errors, or answers with unparseable JSON is
//! defaulted to speaking at medium confidence, preserving interactivity.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use parley_model::{CompletionRequest, Message, ModelClient, Role};

use crate::{prompts, SpeakerDecision};

/// Wall-clock timeout for one candidate's evaluation call.
pub const EVALUATION_TIMEOUT: Duration = Duration::from_secs(5);

const EVALUATION_MAX_TOKENS: u32 = 150;
const EVALUATION_TEMPERATURE: f32 = 0.3;
/// History shown to candidates: the last N messages, truncated per message.
const HISTORY_MESSAGES: usize = 10;
const HISTORY_MESSAGE_CHARS: usize = 500;

/// Outcome of parsing a candidate's free-text answer.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed {
        speak: bool,
        confidence: f32,
        reason: String,
    },
    Malformed,
}

pub struct SpeakingEvaluator {
    pub silence_threshold: f32,
    pub timeout: Duration,
}

impl SpeakingEvaluator {
    pub fn new(silence_threshold: f32) -> Self {
        Self {
            silence_threshold,
            timeout: EVALUATION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Evaluate every available client concurrently.  Forced models are
    /// answered locally without an API call.  The result is sorted by
    /// confidence descending, forced decisions first among ties.
    pub async fn evaluate_all(
        &self,
        clients: &[Arc<dyn ModelClient>],
        transcript: &[Message],
        user_message: &str,
        previous_responses: &[(String, String)],
        forced: &HashSet<String>,
    ) -> Vec<SpeakerDecision> {
        let history = format_history(transcript);
        let previous = format_previous_responses(previous_responses);

        let evaluations = clients
            .iter()
            .filter(|c| c.available())
            .map(|client| {
                let other_names: Vec<String> = clients
                    .iter()
                    .filter(|c| c.available() && c.id() != client.id())
                    .map(|c| c.display_name().to_string())
                    .collect();
                self.evaluate_single(
                    Arc::clone(client),
                    other_names,
                    &history,
                    user_message,
                    previous.as_deref(),
                    forced.contains(client.id()),
                )
            });

        let mut decisions: Vec<SpeakerDecision> =
            futures::future::join_all(evaluations).await;
        decisions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.forced.cmp(&a.forced))
        });
        decisions
    }

    async fn evaluate_single(
        &self,
        client: Arc<dyn ModelClient>,
        other_models: Vec<String>,
        history: &str,
        user_message: &str,
        previous_responses: Option<&str>,
        is_forced: bool,
    ) -> SpeakerDecision {
        let model = client.id().to_string();
        if is_forced {
            return SpeakerDecision::forced(model);
        }

        let prompt = prompts::should_speak_prompt(
            client.display_name(),
            &other_models,
            history,
            user_message,
            previous_responses,
        );
        let request = CompletionRequest {
            messages: vec![Message::user(prompt)],
            max_tokens: Some(EVALUATION_MAX_TOKENS),
            temperature: Some(EVALUATION_TEMPERATURE),
            ..Default::default()
        };

        let response = match tokio::time::timeout(self.timeout, client.generate(request)).await {
            Err(_) => {
                warn!(model = %model, "speaking evaluation timed out");
                return SpeakerDecision::speak(
                    model,
                    0.5,
                    "Evaluation timed out - defaulting to speak",
                );
            }
            Ok(Err(e)) => {
                warn!(model = %model, error = %e, "speaking evaluation failed");
                return SpeakerDecision::speak(
                    model,
                    0.5,
                    "Evaluation error - defaulting to speak",
                );
            }
            Ok(Ok(response)) => response,
        };

        match parse_should_speak(&response.content) {
            ParseOutcome::Malformed => {
                warn!(model = %model, "unparseable speaking evaluation response");
                SpeakerDecision::speak(model, 0.5, "Could not parse response - defaulting to speak")
            }
            ParseOutcome::Parsed {
                speak,
                confidence,
                reason,
            } => {
                if speak && confidence < self.silence_threshold {
                    SpeakerDecision::silent(
                        model,
                        confidence,
                        format!(
                            "Below threshold ({confidence:.2} < {})",
                            self.silence_threshold
                        ),
                    )
                } else if speak {
                    SpeakerDecision::speak(model, confidence, reason)
                } else {
                    SpeakerDecision::silent(model, confidence, reason)
                }
            }
        }
    }
}

/// Best-effort extraction of the `{"should_speak": ...}` object from model
/// output.  The attempt order is: direct parse, fenced code block, substring
/// keyed on `"should_speak"`, single-quote normalization, Python
/// boolean-literal normalization.
pub fn parse_should_speak(content: &str) -> ParseOutcome {
    let content = content.trim();

    if let Some(outcome) = try_json(content) {
        return outcome;
    }

    let fenced = Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap();
    if let Some(captures) = fenced.captures(content) {
        if let Some(outcome) = try_json(&captures[1]) {
            return outcome;
        }
    }

    let embedded = Regex::new(r#"(?s)\{[^{}]*"should_speak"[^{}]*\}"#).unwrap();
    if let Some(found) = embedded.find(content) {
        if let Some(outcome) = try_json(found.as_str()) {
            return outcome;
        }
    }

    let requoted = content.replace('\'', "\"");
    if let Some(outcome) = try_json(&requoted) {
        return outcome;
    }

    let boolean_fix = Regex::new(r"\bTrue\b").unwrap().replace_all(content, "true");
    let boolean_fix = Regex::new(r"\bFalse\b")
        .unwrap()
        .replace_all(&boolean_fix, "false");
    if let Some(outcome) = try_json(&boolean_fix) {
        return outcome;
    }

    ParseOutcome::Malformed
}

fn try_json(text: &str) -> Option<ParseOutcome> {
    let value: Value = serde_json::from_str(text).ok()?;
    let object = value.as_object()?;
    let speak = object
        .get("should_speak")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let confidence = object
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.5) as f32;
    let reason = object
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("No reason provided")
        .to_string();
    Some(ParseOutcome::Parsed {
        speak,
        confidence: confidence.clamp(0.0, 1.0),
        reason,
    })
}

/// The recent transcript rendered for the evaluation prompt: last N
/// messages, each prefixed with role (and author model when set) and
/// truncated.
fn format_history(transcript: &[Message]) -> String {
    if transcript.is_empty() {
        return "(No previous messages)".to_string();
    }
    let start = transcript.len().saturating_sub(HISTORY_MESSAGES);
    transcript[start..]
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "USER",
                Role::Assistant => "ASSISTANT",
                Role::System => "SYSTEM",
                Role::Tool => "TOOL",
            };
            let author = m
                .model
                .as_deref()
                .map(|a| format!(" [{a}]"))
                .unwrap_or_default();
            let mut content = m.content.clone();
            if content.chars().count() > HISTORY_MESSAGE_CHARS {
                content = content.chars().take(HISTORY_MESSAGE_CHARS).collect::<String>() + "...";
            }
            format!("{role}{author}: {content}")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_previous_responses(previous: &[(String, String)]) -> Option<String> {
    if previous.is_empty() {
        return None;
    }
    Some(
        previous
            .iter()
            .map(|(model, content)| {
                let mut text = content.clone();
                if text.chars().count() > HISTORY_MESSAGE_CHARS {
                    text = text.chars().take(HISTORY_MESSAGE_CHARS).collect::<String>() + "...";
                }
                format!("{model}: {text}")
            })
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
