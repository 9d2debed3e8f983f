// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{CompletionRequest, ModelError, ModelResponse, StreamChunk};

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ModelError>> + Send>>;

/// Uniform, provider-agnostic interface to one chat participant.
///
/// Adapters hide the provider wire format entirely: the engine hands every
/// adapter the same shared transcript and tool schemas, and each adapter
/// re-authors the transcript into its own first-person view (see
/// [`crate::reauthor`]) before rendering the provider request.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Stable participant id used in mentions and transcript attribution
    /// (e.g. `"claude"`).
    fn id(&self) -> &str;

    /// Human-readable name shown to users and other models.
    fn display_name(&self) -> &str;

    /// Hex color used by front-ends to tint this participant's output.
    fn color(&self) -> &str;

    /// Provider model identifier (e.g. `"claude-opus-4-5-20251101"`).
    fn model_id(&self) -> &str;

    /// `true` iff credentials are present and the client can be called.
    fn available(&self) -> bool;

    /// One-shot completion.
    async fn generate(&self, req: CompletionRequest) -> Result<ModelResponse, ModelError>;

    /// Streaming completion.  The stream always terminates with a
    /// [`StreamChunk::Done`] carrying the finish reason and final usage.
    async fn stream(&self, req: CompletionRequest) -> Result<ChunkStream, ModelError>;

    /// Best-effort token count used for context budgeting.
    fn count_tokens(&self, text: &str) -> usize {
        text.len() / 4
    }
}
