//! Persistence commands issued by the engine on every transition.

use chrono::{DateTime, Utc};

use crate::store::{SessionStore, StoreError};
use crate::types::{OwnerId, SessionId, TimeSegment};

/// A single write against the [`SessionStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCommand {
    /// `start()`: new session with its first open segment.
    CreateSession {
        session_id: SessionId,
        owner: OwnerId,
        segment: TimeSegment,
    },
    /// `resume()`: newly opened segment.
    AppendSegment {
        session_id: SessionId,
        segment: TimeSegment,
    },
    /// `pause()` and `stop()` while running.
    CloseOpenSegment {
        session_id: SessionId,
        ended_at: DateTime<Utc>,
    },
    /// `stop()`: terminal status.
    MarkStopped {
        session_id: SessionId,
        stopped_at: DateTime<Utc>,
    },
}

impl StoreCommand {
    /// The session this command writes to.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        match self {
            Self::CreateSession { session_id, .. }
            | Self::AppendSegment { session_id, .. }
            | Self::CloseOpenSegment { session_id, .. }
            | Self::MarkStopped { session_id, .. } => session_id,
        }
    }

    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateSession { .. } => "create_session",
            Self::AppendSegment { .. } => "append_segment",
            Self::CloseOpenSegment { .. } => "close_open_segment",
            Self::MarkStopped { .. } => "mark_stopped",
        }
    }

    /// Applies the command to `store`.
    pub fn apply<S: SessionStore + ?Sized>(&self, store: &mut S) -> Result<(), StoreError> {
        match self {
            Self::CreateSession {
                session_id,
                owner,
                segment,
            } => store.create_session(session_id, owner, segment),
            Self::AppendSegment {
                session_id,
                segment,
            } => store.append_segment(session_id, segment),
            Self::CloseOpenSegment {
                session_id,
                ended_at,
            } => store.close_open_segment(session_id, *ended_at),
            Self::MarkStopped {
                session_id,
                stopped_at,
            } => store.mark_stopped(session_id, *stopped_at),
        }
    }
}

/// Receives the engine's persistence commands.
///
/// Submission is fire-and-forget: failures surface on the writer's side
/// channel, never as a result of the transition that issued the command.
pub trait CommandSink {
    fn submit(&self, command: StoreCommand);
}

impl<T: CommandSink + ?Sized> CommandSink for &T {
    fn submit(&self, command: StoreCommand) {
        (**self).submit(command);
    }
}
