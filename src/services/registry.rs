/// Session Registry
/// The single map from execution id to its live process session.
/// Holds at most one session per id; removal is idempotent so a natural exit
/// racing an explicit stop is harmless.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::session::ProcessSession;
use crate::error::{ExecError, Result};

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<ProcessSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a session. An id that is still active is rejected and the
    /// existing session is left untouched.
    pub fn register(&self, session: Arc<ProcessSession>) -> Result<()> {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(session.id()) {
            return Err(ExecError::DuplicateExecution(session.id().to_string()));
        }
        log::debug!("[Registry] registered {}", session.id());
        sessions.insert(session.id().to_string(), session);
        Ok(())
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<ProcessSession>> {
        self.sessions.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.lock().contains_key(id)
    }

    pub fn unregister(&self, id: &str) -> Option<Arc<ProcessSession>> {
        let removed = self.sessions.lock().remove(id);
        if removed.is_some() {
            log::debug!("[Registry] unregistered {}", id);
        }
        removed
    }

    /// Remove `session` only if it is still the one tracked under its id
    pub fn unregister_session(&self, session: &Arc<ProcessSession>) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get(session.id()) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(session.id());
                log::debug!("[Registry] unregistered {}", session.id());
                true
            }
            _ => false,
        }
    }

    /// Active ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Take every tracked session out of the registry
    pub fn drain(&self) -> Vec<Arc<ProcessSession>> {
        self.sessions.lock().drain().map(|(_, session)| session).collect()
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        // Nothing may outlive the registry; no time for a graceful ladder here
        let sessions = self.drain();
        if !sessions.is_empty() {
            log::warn!(
                "[Registry] dropped with {} live sessions, force killing",
                sessions.len()
            );
        }
        for session in sessions {
            session.force_kill();
        }
    }
}
