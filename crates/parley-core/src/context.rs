// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashSet;

use tracing::{debug, warn};

use parley_model::{Message, ModelClient};

use crate::prompts;

/// Tokens always left for regular conversation after system text and pins.
/// A pin that would squeeze the conversation below this floor is dropped.
const MIN_CONVERSATION_TOKENS: usize = 2000;

/// Fixed per-message overhead for role framing.
const ROLE_OVERHEAD_TOKENS: usize = 4;

/// Builds the per-model `(system, messages)` pair within the model's
/// context budget.
///
/// Priority order: system prompt, pinned messages (in original order), then
/// regular messages newest-first until the budget is reached.  The returned
/// message list is chronological.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    pub max_tokens: usize,
    pub response_reserve: usize,
}

impl ContextAssembler {
    pub fn new(max_tokens: usize, response_reserve: usize) -> Self {
        Self {
            max_tokens,
            response_reserve,
        }
    }

    pub fn assemble(
        &self,
        transcript: &[Message],
        client: &dyn ModelClient,
        other_models: &[String],
        pinned_ids: &HashSet<String>,
        extra_context: Option<&str>,
    ) -> (String, Vec<Message>) {
        let available = self.max_tokens.saturating_sub(self.response_reserve);

        let system = prompts::system_prompt(client.display_name(), other_models, extra_context);
        let mut current = client.count_tokens(&system);

        let (pinned, regular): (Vec<&Message>, Vec<&Message>) = transcript.iter().partition(|m| {
            m.id
                .as_deref()
                .map(|id| pinned_ids.contains(id))
                .unwrap_or(false)
        });

        let mut included_pinned: Vec<Message> = Vec::new();
        for message in pinned {
            let tokens = self.estimate_message_tokens(message, client);
            if current + tokens + MIN_CONVERSATION_TOKENS < available {
                current += tokens;
                included_pinned.push(message.clone());
            } else {
                warn!(
                    message_id = message.id.as_deref().unwrap_or("?"),
                    "pinned message dropped: would not fit in the context budget"
                );
            }
        }

        let mut included_regular: Vec<Message> = Vec::new();
        for message in regular.iter().rev() {
            let tokens = self.estimate_message_tokens(message, client);
            if current + tokens < available {
                current += tokens;
                included_regular.insert(0, (*message).clone());
            } else {
                break;
            }
        }

        debug!(
            model = client.id(),
            pinned = included_pinned.len(),
            regular = included_regular.len(),
            tokens = current,
            budget = available,
            "assembled context"
        );

        included_pinned.extend(included_regular);
        (system, included_pinned)
    }

    /// Cost of one message: content tokens, role overhead, author-model
    /// overhead, and per-tool-call name + serialized argument tokens.
    pub fn estimate_message_tokens(&self, message: &Message, client: &dyn ModelClient) -> usize {
        let mut tokens = client.count_tokens(&message.content) + ROLE_OVERHEAD_TOKENS;
        if let Some(model) = &message.model {
            tokens += client.count_tokens(model) + 2;
        }
        for call in &message.tool_calls {
            tokens += client.count_tokens(&call.name) + 10;
            tokens += client.count_tokens(&call.arguments.to_string());
        }
        for result in &message.tool_results {
            tokens += client.count_tokens(&result.content);
        }
        tokens
    }

    pub fn estimate_tokens(&self, messages: &[Message], client: &dyn ModelClient) -> usize {
        messages
            .iter()
            .map(|m| self.estimate_message_tokens(m, client))
            .sum()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use parley_model::{ScriptedMockClient, ToolCall};
    use serde_json::json;

    fn client() -> ScriptedMockClient {
        ScriptedMockClient::new("claude", vec![])
    }

    fn with_id(mut m: Message, id: &str) -> Message {
        m.id = Some(id.into());
        m
    }

    #[test]
    fn everything_fits_in_a_large_budget() {
        let assembler = ContextAssembler::new(100_000, 4096);
        let transcript = vec![
            Message::user("first"),
            Message::assistant("second", "claude"),
            Message::user("third"),
        ];
        let (system, messages) =
            assembler.assemble(&transcript, &client(), &[], &HashSet::new(), None);
        assert!(!system.is_empty());
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[2].content, "third");
    }

    #[test]
    fn recency_wins_when_budget_is_tight() {
        // Budget leaves room for the system prompt and the small recent
        // message, but not for the large old one.
        let assembler = ContextAssembler::new(700, 0);
        let transcript = vec![
            Message::user("old ".repeat(600)),
            Message::user("recent message"),
        ];
        let (_, messages) =
            assembler.assemble(&transcript, &client(), &[], &HashSet::new(), None);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "recent message");
    }

    #[test]
    fn pinned_messages_survive_recency_pressure() {
        let assembler = ContextAssembler::new(3000, 0);
        let pinned_id = "pin-1";
        let transcript = vec![
            with_id(Message::user("pinned decision"), pinned_id),
            Message::user("filler ".repeat(200)),
            Message::user("latest"),
        ];
        let pins: HashSet<String> = [pinned_id.to_string()].into();
        let (_, messages) = assembler.assemble(&transcript, &client(), &[], &pins, None);
        assert!(messages.iter().any(|m| m.content == "pinned decision"));
        assert!(messages.iter().any(|m| m.content == "latest"));
    }

    #[test]
    fn pinned_come_first_then_chronological_regulars() {
        let assembler = ContextAssembler::new(100_000, 4096);
        let transcript = vec![
            Message::user("r1"),
            with_id(Message::user("p1"), "a"),
            Message::user("r2"),
        ];
        let pins: HashSet<String> = ["a".to_string()].into();
        let (_, messages) = assembler.assemble(&transcript, &client(), &[], &pins, None);
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["p1", "r1", "r2"]);
    }

    #[test]
    fn oversized_pin_is_dropped_not_included() {
        let assembler = ContextAssembler::new(2500, 0);
        let transcript = vec![
            with_id(Message::user("x ".repeat(5000)), "huge"),
            Message::user("small"),
        ];
        let pins: HashSet<String> = ["huge".to_string()].into();
        let (_, messages) = assembler.assemble(&transcript, &client(), &[], &pins, None);
        assert!(messages.iter().all(|m| m.content != "x ".repeat(5000)));
        assert!(messages.iter().any(|m| m.content == "small"));
    }

    /// Assembled context always fits the budget.
    #[test]
    fn budget_invariant_holds() {
        let assembler = ContextAssembler::new(5000, 1000);
        let c = client();
        let transcript: Vec<Message> = (0..50)
            .map(|i| Message::user(format!("message number {i} {}", "pad ".repeat(i % 7))))
            .collect();
        let (system, messages) =
            assembler.assemble(&transcript, &c, &[], &HashSet::new(), None);
        let total = c.count_tokens(&system) + assembler.estimate_tokens(&messages, &c);
        assert!(
            total <= assembler.max_tokens - assembler.response_reserve,
            "assembled {total} tokens exceeds budget"
        );
    }

    #[test]
    fn tool_calls_increase_the_estimate() {
        let assembler = ContextAssembler::new(100_000, 4096);
        let c = client();
        let plain = Message::assistant("text", "claude");
        let with_call = Message::assistant_with_calls(
            "text",
            "claude",
            vec![ToolCall {
                id: "c1".into(),
                name: "read_file".into(),
                arguments: json!({"path": "some/long/path/to/file.rs"}),
            }],
        );
        assert!(
            assembler.estimate_message_tokens(&with_call, &c)
                > assembler.estimate_message_tokens(&plain, &c)
        );
    }

    #[test]
    fn extra_context_lands_in_the_system_prompt() {
        let assembler = ContextAssembler::new(100_000, 4096);
        let (system, _) = assembler.assemble(
            &[],
            &client(),
            &["GPT".into()],
            &HashSet::new(),
            Some("earlier summary"),
        );
        assert!(system.contains("earlier summary"));
    }
}
