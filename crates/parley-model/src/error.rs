// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

/// Provider error taxonomy surfaced to the engine.
///
/// The engine branches on the variant, never on provider identity:
/// `Auth` aborts the contributor and marks the model unavailable for the
/// session, `RateLimit` and transient `Api` errors are retried by the
/// adapter before they ever reach the engine.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited: {message}")]
    RateLimit {
        message: String,
        /// Server-advertised delay, overrides the backoff schedule.
        retry_after: Option<Duration>,
    },

    #[error("api error: {message}")]
    Api {
        message: String,
        status: Option<u16>,
    },

    #[error("{0}")]
    Other(String),
}

impl ModelError {
    /// Classify an HTTP error status plus response body.
    ///
    /// `retry_after` is the parsed `Retry-After` header, when present.
    pub fn from_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => ModelError::Auth(body),
            429 => ModelError::RateLimit {
                message: body,
                retry_after,
            },
            _ => ModelError::Api {
                message: body,
                status: Some(status),
            },
        }
    }

    /// Errors worth retrying with backoff: rate limits, server-side
    /// failures, request timeouts, and transport errors with no status.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::RateLimit { .. } => true,
            ModelError::Api { status, .. } => match status {
                Some(s) => *s >= 500 || *s == 408,
                None => true,
            },
            ModelError::Auth(_) | ModelError::Other(_) => false,
        }
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(e: reqwest::Error) -> Self {
        ModelError::Api {
            message: e.to_string(),
            status: e.status().map(|s| s.as_u16()),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
