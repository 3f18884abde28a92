//! Extraction session management
//!
//! The page/browser automation resource is a single scarce external
//! resource: only one extraction session may be active at a time. The
//! manager enforces this through its own state - no ambient module-level
//! singleton - and a second `start` fails fast instead of queuing
//! silently. The queue's backoff retry picks the job up again later.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

/// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("extraction session already active for '{label}' since {since}")]
    AlreadyActive {
        label: String,
        since: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
struct ActiveSession {
    id: Uuid,
    label: String,
    started_at: DateTime<Utc>,
}

/// Single-slot session registry
#[derive(Debug, Default)]
pub struct SessionManager {
    active: Mutex<Option<ActiveSession>>,
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a session, failing fast when one is already active. The
    /// returned guard releases the slot on drop.
    pub fn start(self: &Arc<Self>, label: &str) -> Result<ExtractionSession, SessionError> {
        let mut active = self.active.lock().expect("session slot poisoned");
        if let Some(current) = active.as_ref() {
            return Err(SessionError::AlreadyActive {
                label: current.label.clone(),
                since: current.started_at,
            });
        }
        let session = ActiveSession {
            id: Uuid::new_v4(),
            label: label.to_string(),
            started_at: Utc::now(),
        };
        debug!(session_id = %session.id, %label, "extraction session started");
        let id = session.id;
        *active = Some(session);
        Ok(ExtractionSession {
            manager: Arc::clone(self),
            id,
        })
    }

    /// Explicitly stops the current session, whatever holds it
    pub fn stop(&self) {
        let mut active = self.active.lock().expect("session slot poisoned");
        if let Some(session) = active.take() {
            debug!(session_id = %session.id, "extraction session stopped");
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.lock().expect("session slot poisoned").is_some()
    }

    fn release(&self, id: Uuid) {
        let mut active = self.active.lock().expect("session slot poisoned");
        if active.as_ref().is_some_and(|s| s.id == id) {
            *active = None;
        }
    }
}

/// RAII guard for the single extraction session slot
#[derive(Debug)]
pub struct ExtractionSession {
    manager: Arc<SessionManager>,
    id: Uuid,
}

impl ExtractionSession {
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for ExtractionSession {
    fn drop(&mut self) {
        self.manager.release(self.id);
    }
}
