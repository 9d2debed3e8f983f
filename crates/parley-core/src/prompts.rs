// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Prompt templates for speaking evaluation, per-model system prompts, and
//! conversation summarization.

/// The meta-prompt asking one model whether it should contribute this turn.
/// The model is instructed to answer with a bare JSON object; the tolerant
/// parser in `speaking` handles the usual deviations.
pub fn should_speak_prompt(
    model_name: &str,
    other_models: &[String],
    conversation_history: &str,
    user_message: &str,
    previous_responses: Option<&str>,
) -> String {
    let others = if other_models.is_empty() {
        "(none)".to_string()
    } else {
        other_models.join(", ")
    };
    let previous_section = match previous_responses {
        Some(responses) if !responses.is_empty() => format!(
            "RESPONSES FROM OTHER MODELS IN THIS TURN:\n{responses}\n\n\
             Note: if they have already covered the topic well, consider staying silent.\n"
        ),
        _ => String::new(),
    };

    format!(
        "You are {model_name} in a group coding chat with other AI assistants: {others}.\n\n\
         CONVERSATION SO FAR:\n{conversation_history}\n\n\
         USER'S LATEST MESSAGE:\n{user_message}\n\n\
         {previous_section}\
         DECISION CRITERIA - Should you respond?\n\
         1. Do you have a genuinely different perspective or approach not yet mentioned?\n\
         2. Is there an error, security concern, or important caveat to address?\n\
         3. Can you add meaningful technical value beyond what's been said?\n\
         4. Were you directly addressed or @mentioned?\n\n\
         If others have already provided excellent, complete answers and you'd just be \
         repeating them, stay SILENT.\n\n\
         Respond with ONLY valid JSON (no markdown, no explanation):\n\
         {{\"should_speak\": true, \"confidence\": 0.7, \"reason\": \"brief 1-sentence explanation\"}}\n\n\
         Rules for confidence:\n\
         - 0.9-1.0: You have critical or unique information others missed\n\
         - 0.7-0.8: You have a valuable different perspective\n\
         - 0.5-0.6: You might add some value but are unsure\n\
         - 0.3-0.4: Minimal value to add\n\
         - 0.0-0.2: Would just be repeating others"
    )
}

/// The per-model system prompt for a response turn.  `extra_context` carries
/// a summary of earlier conversation and/or the responses other models have
/// already given this turn.
pub fn system_prompt(
    model_name: &str,
    other_models: &[String],
    extra_context: Option<&str>,
) -> String {
    let others = if other_models.is_empty() {
        "(none)".to_string()
    } else {
        other_models.join(", ")
    };
    let extra = match extra_context {
        Some(context) if !context.is_empty() => format!("\n\nADDITIONAL CONTEXT:\n{context}"),
        _ => String::new(),
    };

    format!(
        "You are {model_name}, an AI assistant in a collaborative coding group chat.\n\n\
         IMPORTANT: You ARE {model_name}. Messages from other models are marked with a \
         [ModelName says]: prefix. Your responses must NOT include such a prefix - just \
         respond naturally as yourself.\n\n\
         GROUP CHAT CONTEXT:\n\
         - Other AI assistants in this chat: {others}\n\
         - You're part of a team helping the user with coding problems\n\
         - Responses should be complementary, not redundant\n\n\
         YOUR ROLE:\n\
         - Provide your unique perspective and expertise as {model_name}\n\
         - Be concise but thorough\n\
         - If you agree with another model, add value rather than repeat\n\
         - Be direct and technical - this is a coding chat\n\n\
         FORMATTING:\n\
         - Use markdown for code blocks with language tags\n\
         - Keep explanations focused and practical{extra}"
    )
}

/// Prompt for compressing older conversation history into a summary.
pub fn summary_prompt(conversation: &str) -> String {
    format!(
        "Summarize this conversation history for context in a coding group chat.\n\
         Keep:\n\
         - Key technical decisions made\n\
         - Important code snippets or file references\n\
         - Unresolved questions or tasks\n\
         - Error messages or issues encountered\n\n\
         Discard:\n\
         - Pleasantries and greetings\n\
         - Redundant explanations\n\n\
         CONVERSATION TO SUMMARIZE:\n{conversation}\n\n\
         Provide a concise technical summary (aim for 500-1000 tokens):"
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
