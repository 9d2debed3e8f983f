// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod anthropic;
mod client;
mod error;
mod google;
mod mock;
mod openai_compat;
pub mod reauthor;
pub mod retry;
mod types;

pub use anthropic::AnthropicClient;
pub use client::{ChunkStream, ModelClient};
pub use error::ModelError;
pub use google::GoogleClient;
pub use mock::ScriptedMockClient;
pub use openai_compat::OpenAiCompatClient;
pub use types::*;

use std::collections::BTreeMap;
use std::sync::Arc;

use parley_config::Config;

/// Construct clients for every enabled participant in the configuration.
///
/// The map is ordered (BTreeMap) so downstream consumers iterate the
/// participants deterministically.  Clients whose credentials are missing are
/// still constructed; they report `available() == false` and the engine
/// skips them.
pub fn clients_from_config(cfg: &Config) -> BTreeMap<String, Arc<dyn ModelClient>> {
    let mut clients: BTreeMap<String, Arc<dyn ModelClient>> = BTreeMap::new();
    if cfg.models.claude.enabled {
        clients.insert(
            "claude".into(),
            Arc::new(AnthropicClient::from_config(&cfg.models.claude)),
        );
    }
    if cfg.models.gpt.enabled {
        clients.insert(
            "gpt".into(),
            Arc::new(OpenAiCompatClient::gpt(&cfg.models.gpt)),
        );
    }
    if cfg.models.gemini.enabled {
        clients.insert(
            "gemini".into(),
            Arc::new(GoogleClient::from_config(&cfg.models.gemini)),
        );
    }
    if cfg.models.grok.enabled {
        clients.insert(
            "grok".into(),
            Arc::new(OpenAiCompatClient::grok(&cfg.models.grok)),
        );
    }
    clients
}
