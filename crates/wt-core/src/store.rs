//! Persistence contract consumed by the engine.
//!
//! A [`SessionStore`] is the durable record of work sessions. The engine reads
//! it synchronously (reconciliation, `start()` conflict checks, daily totals)
//! and writes to it through [`StoreCommand`](crate::StoreCommand)s applied by a
//! background writer.

use std::error::Error as StdError;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::day::DayRange;
use crate::types::{OwnerId, SessionId, TimeSegment, WorkSession};

/// Boxed error from the underlying storage backend.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// A store shared between the engine (reads) and the writer (writes).
pub type SharedStore<S> = Arc<Mutex<S>>;

/// Session store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend was busy, locked or failed on I/O. Retryable.
    #[error("session store unavailable: {0}")]
    Unavailable(#[source] BoxError),
    /// The write contradicts stored state (e.g. a second active session).
    #[error("conflicting write: {0}")]
    Conflict(String),
    /// The referenced session does not exist.
    #[error("session {0} not found")]
    NotFound(SessionId),
    /// Stored data could not be decoded.
    #[error("invalid stored data: {0}")]
    Corrupt(String),
    /// The backend refused the operation in a way retrying cannot fix
    /// (missing schema, read-only file, misuse).
    #[error("session store rejected the operation: {0}")]
    Rejected(#[source] BoxError),
}

impl StoreError {
    /// Whether repeating the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub(crate) fn poisoned() -> Self {
        Self::Unavailable("session store lock poisoned".into())
    }
}

/// Durable record of work sessions and their segments.
pub trait SessionStore {
    /// Returns the owner's running or paused session, if any.
    fn find_active_session(&self, owner: &OwnerId) -> Result<Option<WorkSession>, StoreError>;

    /// Persists a new running session with one open segment.
    ///
    /// The id is assigned by the caller.
    fn create_session(
        &mut self,
        session_id: &SessionId,
        owner: &OwnerId,
        segment: &TimeSegment,
    ) -> Result<(), StoreError>;

    /// Persists a newly opened segment and marks the session running.
    fn append_segment(
        &mut self,
        session_id: &SessionId,
        segment: &TimeSegment,
    ) -> Result<(), StoreError>;

    /// Closes the open segment at `ended_at` and marks the session paused.
    fn close_open_segment(
        &mut self,
        session_id: &SessionId,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Persists the terminal `stopped` status.
    ///
    /// A segment still open is closed at `stopped_at` (never before its
    /// start), so a dropped close write cannot leave a stopped session
    /// counting forever.
    fn mark_stopped(
        &mut self,
        session_id: &SessionId,
        stopped_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Lists the owner's sessions with at least one segment touching `range`,
    /// ordered by start time.
    fn sessions_in_range(
        &self,
        owner: &OwnerId,
        range: &DayRange,
    ) -> Result<Vec<WorkSession>, StoreError>;

    /// Total tracked time inside `range`, skipping the sessions in `exclude`.
    ///
    /// Open segments count up to `range.end`.
    fn sum_durations(
        &self,
        owner: &OwnerId,
        range: &DayRange,
        exclude: &[SessionId],
    ) -> Result<Duration, StoreError> {
        let total = self
            .sessions_in_range(owner, range)?
            .iter()
            .filter(|session| !exclude.contains(&session.id))
            .map(|session| session.duration_within(range))
            .fold(Duration::zero(), |acc, d| acc + d);
        Ok(total)
    }
}

/// Runs a read against a shared store.
pub fn with_store<S, T>(
    store: &SharedStore<S>,
    f: impl FnOnce(&S) -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    let guard = store.lock().map_err(|_| StoreError::poisoned())?;
    f(&guard)
}

/// Runs a write against a shared store.
pub fn with_store_mut<S, T>(
    store: &SharedStore<S>,
    f: impl FnOnce(&mut S) -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    let mut guard = store.lock().map_err(|_| StoreError::poisoned())?;
    f(&mut guard)
}
