//! In-process session store.

use chrono::{DateTime, Utc};

use crate::day::DayRange;
use crate::store::{SessionStore, StoreError};
use crate::types::{OwnerId, SessionId, SessionStatus, TimeSegment, WorkSession};

/// A [`SessionStore`] kept entirely in memory.
///
/// Sessions are kept in creation order. Like the SQLite store it refuses a
/// second active session for the same owner.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    sessions: Vec<WorkSession>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored sessions in creation order.
    #[must_use]
    pub fn sessions(&self) -> &[WorkSession] {
        &self.sessions
    }

    /// Inserts a session as-is, bypassing the write operations.
    pub fn insert(&mut self, session: WorkSession) {
        self.sessions.push(session);
    }

    fn session_mut(&mut self, session_id: &SessionId) -> Result<&mut WorkSession, StoreError> {
        self.sessions
            .iter_mut()
            .find(|session| &session.id == session_id)
            .ok_or_else(|| StoreError::NotFound(session_id.clone()))
    }
}

impl SessionStore for MemoryStore {
    fn find_active_session(&self, owner: &OwnerId) -> Result<Option<WorkSession>, StoreError> {
        Ok(self
            .sessions
            .iter()
            .find(|session| &session.owner == owner && session.is_active())
            .cloned())
    }

    fn create_session(
        &mut self,
        session_id: &SessionId,
        owner: &OwnerId,
        segment: &TimeSegment,
    ) -> Result<(), StoreError> {
        if self.sessions.iter().any(|s| &s.id == session_id) {
            return Err(StoreError::Conflict(format!(
                "session {session_id} already exists"
            )));
        }
        if let Some(active) = self.find_active_session(owner)? {
            return Err(StoreError::Conflict(format!(
                "{owner} already has active session {}",
                active.id
            )));
        }
        self.sessions.push(WorkSession {
            id: session_id.clone(),
            owner: owner.clone(),
            status: SessionStatus::Running,
            segments: vec![*segment],
        });
        Ok(())
    }

    fn append_segment(
        &mut self,
        session_id: &SessionId,
        segment: &TimeSegment,
    ) -> Result<(), StoreError> {
        let session = self.session_mut(session_id)?;
        if session.status == SessionStatus::Stopped {
            return Err(StoreError::Conflict(format!(
                "session {session_id} is stopped"
            )));
        }
        session.segments.push(*segment);
        session.status = SessionStatus::Running;
        Ok(())
    }

    fn close_open_segment(
        &mut self,
        session_id: &SessionId,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let session = self.session_mut(session_id)?;
        if let Some(open) = session.segments.iter_mut().find(|s| s.is_open()) {
            open.ended_at = Some(ended_at);
        }
        if session.status == SessionStatus::Running {
            session.status = SessionStatus::Paused;
        }
        Ok(())
    }

    fn mark_stopped(
        &mut self,
        session_id: &SessionId,
        stopped_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let session = self.session_mut(session_id)?;
        if let Some(open) = session.segments.iter_mut().find(|s| s.is_open()) {
            open.ended_at = Some(stopped_at.max(open.started_at));
        }
        session.status = SessionStatus::Stopped;
        Ok(())
    }

    fn sessions_in_range(
        &self,
        owner: &OwnerId,
        range: &DayRange,
    ) -> Result<Vec<WorkSession>, StoreError> {
        let mut sessions: Vec<WorkSession> = self
            .sessions
            .iter()
            .filter(|session| &session.owner == owner)
            .filter(|session| {
                session.segments.iter().any(|segment| {
                    segment.started_at < range.end
                        && segment.ended_at.is_none_or(|ended_at| ended_at > range.start)
                })
            })
            .cloned()
            .collect();
        sessions.sort_by_key(WorkSession::started_at);
        Ok(sessions)
    }
}
