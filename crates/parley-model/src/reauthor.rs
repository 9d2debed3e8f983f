// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! First-person re-authoring of the shared transcript.
//!
//! The transcript is shared between all participating models, but each
//! provider API only knows two speaking parties.  Before a request is
//! rendered, the transcript is rewritten from the target adapter's point of
//! view: its own past turns keep the `assistant` role, every other model's
//! turn becomes a `user` turn quoting that model, and tool results are kept
//! in native form only when they answer the adapter's own tool calls.
//! Without this a model will happily continue arguments it never made, or
//! reference tool calls it never issued.
//!
//! The transformation is a pure transcript → transcript function shared by
//! all adapters; each adapter then renders the result into its wire format.
//! It is idempotent: re-authoring an already re-authored transcript is a
//! no-op.

use crate::{Message, Role, ToolResult};

/// Maximum characters of a foreign tool result quoted into a user turn.
const FOREIGN_RESULT_MAX_CHARS: usize = 2000;

/// Rewrite `messages` so that `self_id` sees a first-person transcript.
pub fn reauthor_transcript(messages: &[Message], self_id: &str) -> Vec<Message> {
    let own_call_ids = collect_own_call_ids(messages, self_id);

    let mut out: Vec<Message> = Vec::with_capacity(messages.len());
    for msg in messages {
        match msg.role {
            Role::System | Role::User => out.push(msg.clone()),
            Role::Assistant => {
                if is_foreign(msg.model.as_deref(), self_id) {
                    // Another model's turn: quote it as user text, tool calls
                    // dropped (their results are quoted separately below).
                    let author = msg.model.as_deref().unwrap_or("unknown");
                    out.push(Message::user(format!("[{author} says]: {}", msg.content)));
                } else {
                    out.push(msg.clone());
                }
            }
            Role::Tool => {
                let (own, foreign): (Vec<&ToolResult>, Vec<&ToolResult>) = msg
                    .tool_results
                    .iter()
                    .partition(|r| own_call_ids.contains(&r.tool_call_id.as_str()));
                if !own.is_empty() {
                    let mut kept = msg.clone();
                    kept.tool_results = own.into_iter().cloned().collect();
                    out.push(kept);
                }
                for result in foreign {
                    out.push(Message::user(quote_foreign_result(result)));
                }
            }
        }
    }
    out
}

/// `true` when an assistant turn was authored by a different model.
/// A missing `model` field is treated as our own (pre-attribution) turn.
fn is_foreign(model: Option<&str>, self_id: &str) -> bool {
    match model {
        Some(m) => !m.eq_ignore_ascii_case(self_id),
        None => false,
    }
}

fn collect_own_call_ids<'a>(messages: &'a [Message], self_id: &str) -> Vec<&'a str> {
    let mut ids = Vec::new();
    for msg in messages {
        if msg.role == Role::Assistant && !is_foreign(msg.model.as_deref(), self_id) {
            ids.extend(msg.tool_calls.iter().map(|tc| tc.id.as_str()));
        }
    }
    ids
}

fn quote_foreign_result(result: &ToolResult) -> String {
    let status = if result.is_error { "Error" } else { "Success" };
    let mut content = result.content.clone();
    if content.chars().count() > FOREIGN_RESULT_MAX_CHARS {
        content = content
            .chars()
            .take(FOREIGN_RESULT_MAX_CHARS - 3)
            .collect::<String>()
            + "...";
    }
    format!("[Tool Result ({status})]: {content}")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
