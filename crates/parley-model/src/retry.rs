// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Exponential backoff for provider calls.
//!
//! Adapters wrap their HTTP requests in [`with_retry`].  Rate-limit
//! responses that advertise a `Retry-After` delay override the computed
//! backoff for that attempt; authentication failures short-circuit.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::ModelError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is exhausted (in which case the last error is returned).
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, ModelError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ModelError>>,
{
    let mut delay = policy.base_delay;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let wait = match &e {
                    ModelError::RateLimit {
                        retry_after: Some(d),
                        ..
                    } => *d,
                    _ => delay.min(policy.max_delay),
                };
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    wait_secs = wait.as_secs_f64(),
                    error = %e,
                    "provider call failed, retrying"
                );
                tokio::time::sleep(wait).await;
                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * policy.factor).min(policy.max_delay.as_secs_f64()),
                );
            }
            Err(e) => return Err(e),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
