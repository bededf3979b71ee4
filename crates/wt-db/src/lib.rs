//! Storage layer for the work-time tracker.
//!
//! Provides a [`SessionStore`] backed by `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! The engine and the background writer share it as a
//! [`SharedStore`](wt_core::SharedStore) (`Arc<Mutex<Database>>`).
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in ISO 8601 format with millisecond precision
//! (e.g., `2024-01-15T10:30:00.000Z`). This ensures:
//! - Lexicographic ordering matches chronological ordering
//! - Human-readable values in the database
//! - Timezone-aware (always UTC)
//!
//! ## Session Status
//!
//! `work_sessions.status` follows the writes: appending a segment marks the
//! session `running`, closing the open segment marks it `paused` and
//! `mark_stopped` makes it `stopped` and closes any segment still open. A partial unique index keeps at most one
//! running or paused session per owner, and at most one open segment per
//! session.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Transaction, params};
use thiserror::Error;
use tracing::debug;
use wt_core::{
    DayRange, OwnerId, SessionId, SessionStatus, SessionStore, StoreError, TimeSegment,
    ValidationError, WorkSession,
};

/// How long a write waits for another process holding the database lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp for session {session_id}: {timestamp}")]
    TimestampParse {
        session_id: String,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored row failed validation.
    #[error("invalid stored value for session {session_id}")]
    InvalidRow {
        session_id: String,
        #[source]
        source: ValidationError,
    },
    /// The session does not exist.
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    /// The session is already stopped and cannot change.
    #[error("session {0} is stopped")]
    SessionStopped(SessionId),
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sqlite(source) => match source.sqlite_error_code() {
                Some(ErrorCode::ConstraintViolation) => Self::Conflict(source.to_string()),
                Some(
                    ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::CannotOpen,
                ) => Self::Unavailable(Box::new(source)),
                _ => Self::Rejected(Box::new(source)),
            },
            DbError::SessionNotFound(session_id) => Self::NotFound(session_id),
            DbError::SessionStopped(session_id) => {
                Self::Conflict(format!("session {session_id} is stopped"))
            }
            err @ (DbError::TimestampParse { .. } | DbError::InvalidRow { .. }) => {
                Self::Corrupt(err.to_string())
            }
        }
    }
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

#[derive(Debug)]
struct SessionRow {
    id: String,
    owner: String,
    status: String,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            -- One row per tracking session
            -- status: 'running' | 'paused' | 'stopped'
            CREATE TABLE IF NOT EXISTS work_sessions (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('running', 'paused', 'stopped')),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_work_sessions_owner ON work_sessions(owner, status);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_work_sessions_one_active
                ON work_sessions(owner) WHERE status IN ('running', 'paused');

            -- Segments of active tracking; ended_at is NULL while open
            CREATE TABLE IF NOT EXISTS time_segments (
                session_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                PRIMARY KEY (session_id, seq),
                FOREIGN KEY (session_id) REFERENCES work_sessions(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_time_segments_started ON time_segments(started_at);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_time_segments_one_open
                ON time_segments(session_id) WHERE ended_at IS NULL;
            ",
        )?;
        Ok(())
    }

    fn active_session(&self, owner: &OwnerId) -> Result<Option<WorkSession>, DbError> {
        let row = self
            .conn
            .query_row(
                "
                SELECT id, owner, status
                FROM work_sessions
                WHERE owner = ? AND status IN ('running', 'paused')
                ORDER BY updated_at DESC
                LIMIT 1
                ",
                [owner.as_str()],
                |row| {
                    Ok(SessionRow {
                        id: row.get(0)?,
                        owner: row.get(1)?,
                        status: row.get(2)?,
                    })
                },
            )
            .optional()?;
        row.map(|row| self.hydrate(row)).transpose()
    }

    fn sessions_touching(
        &self,
        owner: &OwnerId,
        range: &DayRange,
    ) -> Result<Vec<WorkSession>, DbError> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(
            "
            SELECT DISTINCT s.id, s.owner, s.status
            FROM work_sessions s
            JOIN time_segments t ON t.session_id = s.id
            WHERE s.owner = ?
              AND t.started_at < ?
              AND (t.ended_at IS NULL OR t.ended_at > ?)
            ",
        )?;
        let rows = stmt.query_map(
            params![
                owner.as_str(),
                format_timestamp(range.end),
                format_timestamp(range.start)
            ],
            |row| {
                Ok(SessionRow {
                    id: row.get(0)?,
                    owner: row.get(1)?,
                    status: row.get(2)?,
                })
            },
        )?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(self.hydrate(row?)?);
        }
        sessions.sort_by_key(WorkSession::started_at);
        Ok(sessions)
    }

    fn hydrate(&self, row: SessionRow) -> Result<WorkSession, DbError> {
        let invalid = |source| DbError::InvalidRow {
            session_id: row.id.clone(),
            source,
        };
        let id = SessionId::new(row.id.clone()).map_err(invalid)?;
        let owner = OwnerId::new(row.owner.clone()).map_err(invalid)?;
        let status: SessionStatus = row.status.parse().map_err(invalid)?;
        let segments = self.segments(&row.id)?;
        Ok(WorkSession {
            id,
            owner,
            status,
            segments,
        })
    }

    fn segments(&self, session_id: &str) -> Result<Vec<TimeSegment>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT started_at, ended_at
            FROM time_segments
            WHERE session_id = ?
            ORDER BY seq ASC
            ",
        )?;
        let rows = stmt.query_map([session_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;
        let mut segments = Vec::new();
        for row in rows {
            let (started_at, ended_at) = row?;
            segments.push(TimeSegment {
                started_at: parse_timestamp(&started_at, session_id)?,
                ended_at: ended_at
                    .map(|ended_at| parse_timestamp(&ended_at, session_id))
                    .transpose()?,
            });
        }
        Ok(segments)
    }

    fn insert_session(
        &mut self,
        session_id: &SessionId,
        owner: &OwnerId,
        segment: &TimeSegment,
    ) -> Result<(), DbError> {
        let started_at = format_timestamp(segment.started_at);
        let tx = self.conn.transaction()?;
        tx.execute(
            "
            INSERT INTO work_sessions (id, owner, status, created_at, updated_at)
            VALUES (?, ?, 'running', ?, ?)
            ",
            params![session_id.as_str(), owner.as_str(), started_at, started_at],
        )?;
        tx.execute(
            "
            INSERT INTO time_segments (session_id, seq, started_at, ended_at)
            VALUES (?, 0, ?, ?)
            ",
            params![
                session_id.as_str(),
                started_at,
                segment.ended_at.map(format_timestamp)
            ],
        )?;
        tx.commit()?;
        debug!(%session_id, %owner, "session created");
        Ok(())
    }

    fn insert_segment(
        &mut self,
        session_id: &SessionId,
        segment: &TimeSegment,
    ) -> Result<(), DbError> {
        let started_at = format_timestamp(segment.started_at);
        let tx = self.conn.transaction()?;
        require_mutable(&tx, session_id)?;
        tx.execute(
            "
            INSERT INTO time_segments (session_id, seq, started_at, ended_at)
            SELECT ?1, COALESCE(MAX(seq) + 1, 0), ?2, ?3
            FROM time_segments
            WHERE session_id = ?1
            ",
            params![
                session_id.as_str(),
                started_at,
                segment.ended_at.map(format_timestamp)
            ],
        )?;
        tx.execute(
            "UPDATE work_sessions SET status = 'running', updated_at = ? WHERE id = ?",
            params![started_at, session_id.as_str()],
        )?;
        tx.commit()?;
        debug!(%session_id, "segment appended");
        Ok(())
    }

    fn close_segment(
        &mut self,
        session_id: &SessionId,
        ended_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let ended_at = format_timestamp(ended_at);
        let tx = self.conn.transaction()?;
        require_mutable(&tx, session_id)?;
        let closed = tx.execute(
            "
            UPDATE time_segments
            SET ended_at = ?
            WHERE session_id = ? AND ended_at IS NULL
            ",
            params![ended_at, session_id.as_str()],
        )?;
        tx.execute(
            "
            UPDATE work_sessions
            SET status = 'paused', updated_at = ?
            WHERE id = ? AND status = 'running'
            ",
            params![ended_at, session_id.as_str()],
        )?;
        tx.commit()?;
        debug!(%session_id, closed, "open segment closed");
        Ok(())
    }

    fn stop_session(
        &mut self,
        session_id: &SessionId,
        stopped_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let stopped_at = format_timestamp(stopped_at);
        let tx = self.conn.transaction()?;
        let updated = tx.execute(
            "UPDATE work_sessions SET status = 'stopped', updated_at = ? WHERE id = ?",
            params![stopped_at, session_id.as_str()],
        )?;
        if updated == 0 {
            return Err(DbError::SessionNotFound(session_id.clone()));
        }
        // Closes a segment whose close write never arrived.
        let closed = tx.execute(
            "
            UPDATE time_segments
            SET ended_at = MAX(started_at, ?)
            WHERE session_id = ? AND ended_at IS NULL
            ",
            params![stopped_at, session_id.as_str()],
        )?;
        tx.commit()?;
        debug!(%session_id, closed, "session stopped");
        Ok(())
    }
}

impl SessionStore for Database {
    fn find_active_session(&self, owner: &OwnerId) -> Result<Option<WorkSession>, StoreError> {
        Ok(self.active_session(owner)?)
    }

    fn create_session(
        &mut self,
        session_id: &SessionId,
        owner: &OwnerId,
        segment: &TimeSegment,
    ) -> Result<(), StoreError> {
        Ok(self.insert_session(session_id, owner, segment)?)
    }

    fn append_segment(
        &mut self,
        session_id: &SessionId,
        segment: &TimeSegment,
    ) -> Result<(), StoreError> {
        Ok(self.insert_segment(session_id, segment)?)
    }

    fn close_open_segment(
        &mut self,
        session_id: &SessionId,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Ok(self.close_segment(session_id, ended_at)?)
    }

    fn mark_stopped(
        &mut self,
        session_id: &SessionId,
        stopped_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Ok(self.stop_session(session_id, stopped_at)?)
    }

    fn sessions_in_range(
        &self,
        owner: &OwnerId,
        range: &DayRange,
    ) -> Result<Vec<WorkSession>, StoreError> {
        Ok(self.sessions_touching(owner, range)?)
    }
}

/// Fails unless the session exists and is not stopped.
fn require_mutable(tx: &Transaction<'_>, session_id: &SessionId) -> Result<(), DbError> {
    let status: Option<String> = tx
        .query_row(
            "SELECT status FROM work_sessions WHERE id = ?",
            [session_id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    match status.as_deref() {
        None => Err(DbError::SessionNotFound(session_id.clone())),
        Some("stopped") => Err(DbError::SessionStopped(session_id.clone())),
        Some(_) => Ok(()),
    }
}

fn parse_timestamp(timestamp: &str, session_id: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            session_id: session_id.to_string(),
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
