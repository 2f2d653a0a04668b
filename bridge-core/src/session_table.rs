//! Shadow Session Table (C7): the peer-prefixed-name-keyed registry of live
//! shadow sessions, with the `MAX_SHADOWS` cap from spec §4.6, guarded by
//! an `Arc<RwLock<...>>` over per-device state.

use crate::types::{SessionMeta, TopicEntry};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTableError {
    AtCapacity,
}

impl std::fmt::Display for SessionTableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionTableError::AtCapacity => write!(f, "session table at capacity"),
        }
    }
}

impl std::error::Error for SessionTableError {}

/// Bounded `prefixed_name -> SessionMeta` map (spec §4.6).
pub struct SessionTable {
    max_shadows: usize,
    sessions: RwLock<HashMap<String, SessionMeta>>,
}

impl SessionTable {
    pub fn new(max_shadows: usize) -> Self {
        Self {
            max_shadows,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn has_session(&self, prefixed_name: &str) -> bool {
        self.sessions.read().await.contains_key(prefixed_name)
    }

    /// Adds a new session, rejecting the call once the table is at
    /// `max_shadows` (spec §4.6 "Fleet cap"). Re-adding an existing
    /// `prefixed_name` overwrites its entry without counting against the cap.
    pub async fn add_session(&self, session: SessionMeta) -> Result<(), SessionTableError> {
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(&session.prefixed_name) && sessions.len() >= self.max_shadows {
            return Err(SessionTableError::AtCapacity);
        }
        sessions.insert(session.prefixed_name.clone(), session);
        Ok(())
    }

    pub async fn remove_session(&self, prefixed_name: &str) -> Option<SessionMeta> {
        self.sessions.write().await.remove(prefixed_name)
    }

    pub async fn get(&self, prefixed_name: &str) -> Option<SessionMeta> {
        self.sessions.read().await.get(prefixed_name).cloned()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_at_capacity(&self) -> bool {
        self.count().await >= self.max_shadows
    }

    /// Replaces the subscribed-topic list for a session, e.g. after the
    /// adapter re-subscribes following a reconnect.
    pub async fn set_subscribed_topics(&self, prefixed_name: &str, topics: Vec<TopicEntry>) {
        if let Some(session) = self.sessions.write().await.get_mut(prefixed_name) {
            session.subscribed_topics = topics;
        }
    }

    pub async fn set_last_state(&self, prefixed_name: &str, state: String) {
        if let Some(session) = self.sessions.write().await.get_mut(prefixed_name) {
            session.last_state = Some(state);
        }
    }

    pub async fn all_prefixed_names(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }
}
