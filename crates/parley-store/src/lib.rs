// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Session persistence.
//!
//! The engine consumes only the [`SessionStore`] trait: messages are
//! appended in arrival order, pins form a per-session set, and summaries
//! accumulate with the latest one retrievable.  [`MemoryStore`] is the
//! in-process implementation used by default and in tests; durable backends
//! implement the same trait elsewhere.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use parley_model::{Message, Usage};

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("storage failure: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: Option<String>,
    pub project_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: String,
    pub session_id: String,
    /// `incremental` for the rolling older-half summaries; other kinds are
    /// backend-specific.
    pub summary_type: String,
    pub content: String,
    pub range_start_message_id: Option<String>,
    pub range_end_message_id: Option<String>,
    pub token_count: Option<usize>,
    pub created_at: DateTime<Utc>,
}

/// Persistence operations the engine depends on.
///
/// Contract: appends for one session are applied in call order, and a
/// successful return means the message is recoverable by a later
/// `load_session` of the same session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(
        &self,
        name: Option<String>,
        project_path: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Session, StoreError>;

    /// Load a session with its ordered messages and pinned-message id set.
    async fn load_session(
        &self,
        session_id: &str,
    ) -> Result<(Session, Vec<Message>, HashSet<String>), StoreError>;

    /// Append one message; returns the persisted message id.
    async fn append_message(
        &self,
        session_id: &str,
        message: &Message,
        usage: Option<Usage>,
    ) -> Result<String, StoreError>;

    async fn set_pin(
        &self,
        session_id: &str,
        message_id: &str,
        pinned: bool,
    ) -> Result<(), StoreError>;

    async fn save_summary(&self, summary: Summary) -> Result<(), StoreError>;

    async fn latest_summary(&self, session_id: &str) -> Result<Option<Summary>, StoreError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub message: Message,
    pub tokens_used: Option<u32>,
    pub cost_estimate: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct SessionRecord {
    session: Option<Session>,
    messages: Vec<StoredMessage>,
    pins: HashSet<String>,
    summaries: Vec<Summary>,
}

/// In-memory store.  All state lives behind one async mutex; the engine is
/// the only writer, so contention is not a concern.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, SessionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(
        &self,
        name: Option<String>,
        project_path: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Session, StoreError> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            name,
            project_path,
            created_at: now,
            updated_at: now,
            metadata,
        };
        let mut inner = self.inner.lock().await;
        inner.insert(
            session.id.clone(),
            SessionRecord {
                session: Some(session.clone()),
                ..SessionRecord::default()
            },
        );
        Ok(session)
    }

    async fn load_session(
        &self,
        session_id: &str,
    ) -> Result<(Session, Vec<Message>, HashSet<String>), StoreError> {
        let inner = self.inner.lock().await;
        let record = inner
            .get(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        let session = record
            .session
            .clone()
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        let messages = record
            .messages
            .iter()
            .map(|stored| {
                let mut m = stored.message.clone();
                m.id = Some(stored.id.clone());
                m
            })
            .collect();
        Ok((session, messages, record.pins.clone()))
    }

    async fn append_message(
        &self,
        session_id: &str,
        message: &Message,
        usage: Option<Usage>,
    ) -> Result<String, StoreError> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        let id = Uuid::new_v4().to_string();
        record.messages.push(StoredMessage {
            id: id.clone(),
            message: message.clone(),
            tokens_used: usage.map(|u| u.total_tokens),
            cost_estimate: usage.and_then(|u| u.cost_estimate),
            created_at: Utc::now(),
        });
        if let Some(session) = record.session.as_mut() {
            session.updated_at = Utc::now();
        }
        Ok(id)
    }

    async fn set_pin(
        &self,
        session_id: &str,
        message_id: &str,
        pinned: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        if pinned {
            record.pins.insert(message_id.to_string());
        } else {
            record.pins.remove(message_id);
        }
        Ok(())
    }

    async fn save_summary(&self, summary: Summary) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .get_mut(&summary.session_id)
            .ok_or_else(|| StoreError::SessionNotFound(summary.session_id.clone()))?;
        record.summaries.push(summary);
        Ok(())
    }

    async fn latest_summary(&self, session_id: &str) -> Result<Option<Summary>, StoreError> {
        let inner = self.inner.lock().await;
        let record = inner
            .get(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        Ok(record.summaries.last().cloned())
    }
}

impl Summary {
    pub fn incremental(
        session_id: impl Into<String>,
        content: impl Into<String>,
        range_start: Option<String>,
        range_end: Option<String>,
        token_count: Option<usize>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            summary_type: "incremental".into(),
            content: content.into(),
            range_start_message_id: range_start,
            range_end_message_id: range_end,
            token_count,
            created_at: Utc::now(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
