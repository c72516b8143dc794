//! Registry of sessions that completed the handshake.

use std::sync::Arc;

use dashmap::DashMap;
use gamelink_core::ids::SessionId;
use gamelink_telemetry::names;
use metrics::{counter, gauge};
use tracing::{debug, warn};

use crate::session::Session;

/// Concurrent set of ready sessions, keyed by id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a session that completed its handshake.
    pub fn add(&self, session: Arc<Session>) {
        if self.sessions.insert(session.id().clone(), session).is_none() {
            gauge!(names::SESSIONS_ACTIVE).increment(1.0);
        }
    }

    /// Stop tracking a session. Returns it if it was present.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(id).map(|(_, s)| s);
        if removed.is_some() {
            gauge!(names::SESSIONS_ACTIVE).decrement(1.0);
        }
        removed
    }

    /// Session by id.
    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| Arc::clone(s.value()))
    }

    /// Number of ready sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is ready.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Point-in-time copy of the members.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Queue `frame` on every member. Returns how many accepted it.
    ///
    /// Iterates a snapshot so sessions joining or leaving mid-broadcast never
    /// block it. A failing session is logged and skipped.
    pub fn broadcast(&self, frame: &Arc<String>) -> usize {
        let sessions = self.snapshot();
        let mut delivered = 0;
        for session in &sessions {
            if session.send(Arc::clone(frame)) {
                delivered += 1;
            } else {
                counter!(names::SEND_FAILURES).increment(1);
                warn!(session_id = %session.id(), "failed to deliver broadcast frame");
            }
        }
        debug!(delivered, total = sessions.len(), "broadcast complete");
        delivered
    }

    /// Close and forget every member.
    pub fn close_all(&self) {
        for session in self.snapshot() {
            let _ = session.close();
            let _ = self.remove(session.id());
        }
    }
}
