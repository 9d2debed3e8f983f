// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use parley_model::{ModelResponse, ToolCall, ToolResult, Usage};

/// One model's decision about contributing to the current turn.
#[derive(Debug, Clone)]
pub struct SpeakerDecision {
    pub model: String,
    pub will_speak: bool,
    /// Confidence in [0, 1]; forced decisions are pinned to 1.0.
    pub confidence: f32,
    pub reason: String,
    /// Mandated by the user's mentions; bypasses evaluation entirely.
    pub forced: bool,
}

impl SpeakerDecision {
    pub fn forced(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            will_speak: true,
            confidence: 1.0,
            reason: "Directly mentioned".into(),
            forced: true,
        }
    }

    pub fn speak(model: impl Into<String>, confidence: f32, reason: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            will_speak: true,
            confidence,
            reason: reason.into(),
            forced: false,
        }
    }

    pub fn silent(model: impl Into<String>, confidence: f32, reason: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            will_speak: false,
            confidence,
            reason: reason.into(),
            forced: false,
        }
    }
}

/// Events emitted by the engine during one turn.
///
/// The consumer observes a strictly ordered log: `Thinking` first, then
/// every speaking decision, then per-contributor response events in turn
/// order, and finally `TurnComplete`.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// Speaking evaluation has started.
    Thinking,
    /// A model decided (or was forced) to contribute this turn.
    WillSpeak(SpeakerDecision),
    /// A model declined to contribute this turn.
    WillStaySilent(SpeakerDecision),
    /// A contributor's stream is about to start.
    ResponseStart { model: String },
    /// Incremental response text.
    ResponseChunk { model: String, text: String },
    /// A complete tool call parsed from the contributor's stream.
    ToolCall { model: String, call: ToolCall },
    /// The outcome of executing a tool call.
    ToolResult { model: String, result: ToolResult },
    /// The contributor finished, including its full tool loop.
    ResponseComplete {
        model: String,
        response: ModelResponse,
    },
    /// A model or tool condition the contributor could not recover from.
    Error {
        model: Option<String>,
        message: String,
    },
    /// End of the turn.  Always the last event.
    TurnComplete {
        responses: Vec<ModelResponse>,
        usage: Option<Usage>,
    },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_decision_is_pinned_to_full_confidence() {
        let d = SpeakerDecision::forced("claude");
        assert!(d.will_speak);
        assert!(d.forced);
        assert_eq!(d.confidence, 1.0);
    }

    #[test]
    fn speak_and_silent_are_not_forced() {
        assert!(!SpeakerDecision::speak("gpt", 0.7, "r").forced);
        let silent = SpeakerDecision::silent("gpt", 0.2, "r");
        assert!(!silent.will_speak);
        assert!(!silent.forced);
    }
}
