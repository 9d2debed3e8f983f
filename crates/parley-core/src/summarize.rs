// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info};

use parley_model::{CompletionRequest, Message, ModelClient, Role};
use parley_store::{SessionStore, Summary};

use crate::prompts;

const SUMMARY_TARGET_TOKENS: u32 = 1000;
const SUMMARY_TEMPERATURE: f32 = 0.3;
/// The older half is only summarized once it has this many messages.
const MIN_MESSAGES_TO_SUMMARIZE: usize = 4;

/// Rolling summarization of long conversations.
///
/// When the estimated transcript size crosses the threshold, the older half
/// of the messages is compressed into an `incremental` summary and stored;
/// the engine re-injects the latest summary as extra context on subsequent
/// turns.  Summaries are best-effort: a failed model call skips the summary
/// and leaves the transcript untouched.
pub struct SummaryManager {
    store: Arc<dyn SessionStore>,
    summarizer: Arc<dyn ModelClient>,
    pub token_threshold: usize,
}

impl SummaryManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        summarizer: Arc<dyn ModelClient>,
        token_threshold: usize,
    ) -> Self {
        Self {
            store,
            summarizer,
            token_threshold,
        }
    }

    /// Summarize the older half of `messages` when the threshold is
    /// exceeded.  Returns the stored summary, or `None` when nothing was
    /// done.
    pub async fn check_and_summarize(
        &self,
        session_id: &str,
        messages: &[Message],
    ) -> anyhow::Result<Option<Summary>> {
        let total: usize = messages
            .iter()
            .map(|m| self.summarizer.count_tokens(&m.content) + 4)
            .sum();
        if total < self.token_threshold {
            debug!(total, threshold = self.token_threshold, "below summarize threshold");
            return Ok(None);
        }

        let split = messages.len() / 2;
        let older = &messages[..split];
        if older.len() < MIN_MESSAGES_TO_SUMMARIZE {
            debug!(count = older.len(), "too few messages to summarize");
            return Ok(None);
        }

        info!(
            total,
            summarized = older.len(),
            "token threshold exceeded, generating summary"
        );

        let conversation = format_for_summary(older);
        let request = CompletionRequest {
            messages: vec![Message::user(prompts::summary_prompt(&conversation))],
            max_tokens: Some(SUMMARY_TARGET_TOKENS),
            temperature: Some(SUMMARY_TEMPERATURE),
            ..Default::default()
        };
        let response = self
            .summarizer
            .generate(request)
            .await
            .context("summary generation failed")?;

        let token_count = self.summarizer.count_tokens(&response.content);
        let summary = Summary::incremental(
            session_id,
            response.content,
            older.first().and_then(|m| m.id.clone()),
            older.last().and_then(|m| m.id.clone()),
            Some(token_count),
        );
        self.store
            .save_summary(summary.clone())
            .await
            .context("saving summary")?;
        Ok(Some(summary))
    }
}

fn format_for_summary(messages: &[Message]) -> String {
    messages
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
            format!("{role}{author}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use parley_model::{ModelResponse, ScriptedMockClient};
    use parley_store::MemoryStore;

    async fn setup(threshold: usize) -> (Arc<MemoryStore>, Arc<ScriptedMockClient>, SummaryManager, String) {
        let store = MemoryStore::shared();
        let session = store.create_session(None, None, None).await.unwrap();
        let summarizer = Arc::new(ScriptedMockClient::new(
            "claude",
            vec![ModelResponse::text("claude", "condensed history")],
        ));
        let manager = SummaryManager::new(
            store.clone(),
            summarizer.clone() as Arc<dyn ModelClient>,
            threshold,
        );
        (store, summarizer, manager, session.id)
    }

    fn long_conversation(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| Message::user(format!("message {i} {}", "filler ".repeat(50))))
            .collect()
    }

    #[tokio::test]
    async fn below_threshold_does_nothing() {
        let (_store, summarizer, manager, session_id) = setup(1_000_000).await;
        let result = manager
            .check_and_summarize(&session_id, &long_conversation(10))
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(summarizer.request_count(), 0);
    }

    #[tokio::test]
    async fn over_threshold_summarizes_older_half_and_stores() {
        let (store, summarizer, manager, session_id) = setup(10).await;
        let result = manager
            .check_and_summarize(&session_id, &long_conversation(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.content, "condensed history");
        assert_eq!(result.summary_type, "incremental");
        assert_eq!(summarizer.request_count(), 1);
        // The summarizer saw only the older half.
        let request = &summarizer.recorded_requests()[0];
        assert!(request.messages[0].content.contains("message 4"));
        assert!(!request.messages[0].content.contains("message 5"));
        let latest = store.latest_summary(&session_id).await.unwrap().unwrap();
        assert_eq!(latest.content, "condensed history");
    }

    #[tokio::test]
    async fn too_small_older_half_is_skipped() {
        let (_store, summarizer, manager, session_id) = setup(1).await;
        // 6 messages → older half is 3, below the minimum of 4.
        let result = manager
            .check_and_summarize(&session_id, &long_conversation(6))
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(summarizer.request_count(), 0);
    }
}
