// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be enabled unless explicitly
/// disabled need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// Per-participant model settings, one table per known participant.
///
/// ```yaml
/// models:
///   claude:
///     model_id: claude-opus-4-5-20251101
///     max_tokens: 8192
///   grok:
///     enabled: false
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "ModelConfig::claude")]
    pub claude: ModelConfig,
    #[serde(default = "ModelConfig::gpt")]
    pub gpt: ModelConfig,
    #[serde(default = "ModelConfig::gemini")]
    pub gemini: ModelConfig,
    #[serde(default = "ModelConfig::grok")]
    pub grok: ModelConfig,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            claude: ModelConfig::claude(),
            gpt: ModelConfig::gpt(),
            gemini: ModelConfig::gemini(),
            grok: ModelConfig::grok(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider model identifier.  `None` uses the adapter's default.
    pub model_id: Option<String>,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer `api_key_env` in version-controlled files.
    pub api_key: Option<String>,
    /// Maximum tokens to request in a single completion.
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0).
    pub temperature: Option<f32>,
    /// Whether this participant takes part in conversations at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ModelConfig {
    fn with_key_env(env: &str) -> Self {
        Self {
            model_id: None,
            api_key_env: Some(env.to_string()),
            api_key: None,
            max_tokens: Some(8192),
            temperature: Some(0.7),
            enabled: true,
        }
    }

    pub fn claude() -> Self {
        Self::with_key_env("ANTHROPIC_API_KEY")
    }
    pub fn gpt() -> Self {
        Self::with_key_env("OPENAI_API_KEY")
    }
    pub fn gemini() -> Self {
        Self::with_key_env("GOOGLE_API_KEY")
    }
    pub fn grok() -> Self {
        Self::with_key_env("XAI_API_KEY")
    }

    /// Resolve the API key: explicit value first, then the environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(k) = &self.api_key {
            return Some(k.clone());
        }
        self.api_key_env
            .as_deref()
            .and_then(|env| std::env::var(env).ok())
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: None,
            api_key_env: None,
            api_key: None,
            max_tokens: Some(8192),
            temperature: Some(0.7),
            enabled: true,
        }
    }
}

fn default_silence_threshold() -> f32 {
    0.3
}
fn default_max_context_tokens() -> usize {
    100_000
}
fn default_response_reserve() -> usize {
    4096
}
fn default_summarize_threshold() -> usize {
    50_000
}

/// How the set of speakers for a turn is ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TurnStrategy {
    /// First responder rotates each turn; others follow the canonical order.
    #[default]
    Rotate,
    /// Speakers respond in descending evaluator-confidence order.
    Confidence,
    /// Always the same canonical order.
    Fixed,
}

impl std::fmt::Display for TurnStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnStrategy::Rotate => write!(f, "rotate"),
            TurnStrategy::Confidence => write!(f, "confidence"),
            TurnStrategy::Fixed => write!(f, "fixed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Minimum evaluator confidence required to speak (0.0–1.0).
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: f32,
    /// Turn-ordering strategy for the first responder.
    #[serde(default, alias = "first_responder_strategy")]
    pub first_responder: TurnStrategy,
    /// Token budget for per-model context assembly.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    /// Tokens reserved for the model's own response within the budget.
    #[serde(default = "default_response_reserve")]
    pub response_reserve: usize,
    /// Estimated transcript token count that triggers incremental
    /// summarization of the older half of the conversation.
    #[serde(default = "default_summarize_threshold")]
    pub summarize_threshold_tokens: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            silence_threshold: default_silence_threshold(),
            first_responder: TurnStrategy::default(),
            max_context_tokens: default_max_context_tokens(),
            response_reserve: default_response_reserve(),
            summarize_threshold_tokens: default_summarize_threshold(),
        }
    }
}

/// Permission levels for tool execution, ordered least to most restrictive.
///
/// The derived `Ord` follows declaration order, so
/// `Safe < Cautious < Dangerous < Blocked` holds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    /// Safe read-only operations; no confirmation needed.
    #[default]
    Safe,
    /// May modify state; confirmation recommended.
    Cautious,
    /// Potentially destructive; always requires confirmation.
    Dangerous,
    /// Never allowed until explicitly unblocked.
    Blocked,
}

impl PermissionLevel {
    pub fn requires_confirmation(self) -> bool {
        matches!(self, PermissionLevel::Cautious | PermissionLevel::Dangerous)
    }
}

impl std::fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionLevel::Safe => write!(f, "safe"),
            PermissionLevel::Cautious => write!(f, "cautious"),
            PermissionLevel::Dangerous => write!(f, "dangerous"),
            PermissionLevel::Blocked => write!(f, "blocked"),
        }
    }
}

fn default_max_tool_iterations() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Tool-loop iteration cap per contributor per turn.
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,
    /// Execute parallel-safe (read-only) tool calls concurrently.
    #[serde(default = "default_true")]
    pub parallel_tools: bool,
    /// Approve every tool call without confirmation.  For automated runs.
    #[serde(default)]
    pub auto_approve: bool,
    /// Maximum permission level that is approved without confirmation.
    #[serde(default)]
    pub auto_approve_level: PermissionLevel,
    /// Tool names that are never allowed to run.
    #[serde(default)]
    pub blocked_tools: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            parallel_tools: true,
            auto_approve: false,
            auto_approve_level: PermissionLevel::Safe,
            blocked_tools: Vec::new(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_all_models_enabled() {
        let cfg = Config::default();
        assert!(cfg.models.claude.enabled);
        assert!(cfg.models.gpt.enabled);
        assert!(cfg.models.gemini.enabled);
        assert!(cfg.models.grok.enabled);
    }

    #[test]
    fn default_conversation_knobs_match_documented_values() {
        let cfg = ConversationConfig::default();
        assert_eq!(cfg.silence_threshold, 0.3);
        assert_eq!(cfg.first_responder, TurnStrategy::Rotate);
        assert_eq!(cfg.max_context_tokens, 100_000);
        assert_eq!(cfg.response_reserve, 4096);
        assert_eq!(cfg.summarize_threshold_tokens, 50_000);
    }

    #[test]
    fn default_tools_knobs_match_documented_values() {
        let cfg = ToolsConfig::default();
        assert_eq!(cfg.max_tool_iterations, 10);
        assert!(cfg.parallel_tools);
        assert!(!cfg.auto_approve);
        assert_eq!(cfg.auto_approve_level, PermissionLevel::Safe);
    }

    #[test]
    fn permission_levels_are_ordered() {
        assert!(PermissionLevel::Safe < PermissionLevel::Cautious);
        assert!(PermissionLevel::Cautious < PermissionLevel::Dangerous);
        assert!(PermissionLevel::Dangerous < PermissionLevel::Blocked);
    }

    #[test]
    fn permission_level_confirmation_requirement() {
        assert!(!PermissionLevel::Safe.requires_confirmation());
        assert!(PermissionLevel::Cautious.requires_confirmation());
        assert!(PermissionLevel::Dangerous.requires_confirmation());
        assert!(!PermissionLevel::Blocked.requires_confirmation());
    }

    #[test]
    fn resolve_api_key_prefers_explicit_key() {
        let cfg = ModelConfig {
            api_key: Some("explicit-key".into()),
            api_key_env: Some("PARLEY_NONEXISTENT_ENV_XYZ".into()),
            ..ModelConfig::default()
        };
        assert_eq!(cfg.resolve_api_key().as_deref(), Some("explicit-key"));
    }

    #[test]
    fn resolve_api_key_none_when_unset() {
        let cfg = ModelConfig {
            api_key: None,
            api_key_env: Some("PARLEY_NONEXISTENT_ENV_XYZ".into()),
            ..ModelConfig::default()
        };
        assert!(cfg.resolve_api_key().is_none());
    }

    #[test]
    fn turn_strategy_serde_round_trip() {
        let s: TurnStrategy = serde_yaml::from_str("confidence").unwrap();
        assert_eq!(s, TurnStrategy::Confidence);
        assert_eq!(serde_yaml::to_string(&s).unwrap().trim(), "confidence");
    }

    #[test]
    fn first_responder_strategy_alias_is_accepted() {
        let cfg: ConversationConfig =
            serde_yaml::from_str("first_responder_strategy: fixed").unwrap();
        assert_eq!(cfg.first_responder, TurnStrategy::Fixed);
    }

    #[test]
    fn permission_level_serde_lowercase() {
        let l: PermissionLevel = serde_yaml::from_str("dangerous").unwrap();
        assert_eq!(l, PermissionLevel::Dangerous);
    }
}
