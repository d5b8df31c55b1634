//! In-memory conversation state store.
//!
//! Single source of truth for the active session's turn log and in-flight
//! status. Append-only: existing turns are never mutated, reordered, or
//! deleted. No I/O happens here.

use crate::{ConversationSession, SessionStatus, Turn, TurnRole};

use std::sync::Mutex;

#[derive(Default)]
struct StoreInner {
    session: Option<ConversationSession>,
    processing: bool,
    last_error: Option<String>,
}

/// Process-wide store for one open conversation.
#[derive(Default)]
pub struct ConversationStore {
    inner: Mutex<StoreInner>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn, creating the session if this is the first turn.
    /// Never fails.
    pub fn append(&self, turn: Turn) {
        let mut inner = self.inner.lock().expect("store lock");
        match &mut inner.session {
            Some(session) => {
                if turn.role == TurnRole::User && turn.knowledge_context.is_some() {
                    session.knowledge_context = turn.knowledge_context.clone();
                }
                session.last_activity_at = chrono::Utc::now();
                session.turns.push(turn);
            }
            None => inner.session = Some(ConversationSession::seeded(turn)),
        }
    }

    /// Reset to an empty session. Idempotent.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("store lock");
        inner.session = None;
        inner.processing = false;
        inner.last_error = None;
    }

    pub fn set_processing(&self, processing: bool) {
        self.inner.lock().expect("store lock").processing = processing;
    }

    pub fn is_processing(&self) -> bool {
        self.inner.lock().expect("store lock").processing
    }

    pub fn set_error(&self, message: Option<String>) {
        self.inner.lock().expect("store lock").last_error = message;
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().expect("store lock").last_error.clone()
    }

    /// Caller-driven session status transition. No-op without a session.
    pub fn set_status(&self, status: SessionStatus) {
        if let Some(session) = self.inner.lock().expect("store lock").session.as_mut() {
            session.status = status;
        }
    }

    /// Cloned view of the session for UI binding.
    pub fn snapshot(&self) -> Option<ConversationSession> {
        self.inner.lock().expect("store lock").session.clone()
    }

    /// Cloned turn log, empty when no session exists.
    pub fn turns(&self) -> Vec<Turn> {
        self.inner
            .lock()
            .expect("store lock")
            .session
            .as_ref()
            .map(|s| s.turns.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_append_seeds_session() {
        let store = ConversationStore::new();
        assert!(store.snapshot().is_none());

        store.append(Turn::user("你好", None, vec![]));
        let session = store.snapshot().expect("session seeded");
        assert_eq!(session.turns.len(), 1);
        assert_eq!(session.status, SessionStatus::Active);
    }

    #[test]
    fn test_append_preserves_order() {
        let store = ConversationStore::new();
        for i in 0..5 {
            store.append(Turn::user(format!("question {i}"), None, vec![]));
            store.append(Turn::assistant(format!("answer {i}"), None));
        }
        let turns = store.turns();
        assert_eq!(turns.len(), 10);
        for i in 0..5 {
            assert_eq!(turns[2 * i].content, format!("question {i}"));
            assert_eq!(turns[2 * i + 1].content, format!("answer {i}"));
        }
    }

    #[test]
    fn test_clear_is_idempotent() {
        let store = ConversationStore::new();
        store.append(Turn::user("hi", None, vec![]));
        store.set_processing(true);
        store.set_error(Some("boom".into()));

        store.clear();
        assert!(store.snapshot().is_none());
        assert!(!store.is_processing());
        assert!(store.last_error().is_none());

        store.clear();
        assert!(store.snapshot().is_none());
    }

    #[test]
    fn test_flags_do_not_touch_turn_log() {
        let store = ConversationStore::new();
        store.append(Turn::user("hi", None, vec![]));
        store.set_processing(true);
        store.set_error(Some("transient".into()));
        assert_eq!(store.turns().len(), 1);
        assert!(store.is_processing());
        assert_eq!(store.last_error().as_deref(), Some("transient"));
    }

    #[test]
    fn test_session_context_follows_latest_user_turn() {
        let store = ConversationStore::new();
        let context = crate::context::KnowledgeContext {
            subject: Some("数学".into()),
            ..Default::default()
        };
        store.append(Turn::user("q1", None, vec![]));
        store.append(Turn::user("q2", Some(context.clone()), vec![]));
        let session = store.snapshot().unwrap();
        assert_eq!(session.knowledge_context, Some(context));
        // Historical turns keep their own snapshots untouched.
        assert!(session.turns[0].knowledge_context.is_none());
    }

    #[test]
    fn test_set_status_transitions() {
        let store = ConversationStore::new();
        store.set_status(SessionStatus::Paused); // no session yet, no-op
        store.append(Turn::user("hi", None, vec![]));
        store.set_status(SessionStatus::Completed);
        assert_eq!(store.snapshot().unwrap().status, SessionStatus::Completed);
    }
}
