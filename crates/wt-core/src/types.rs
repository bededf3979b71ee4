//! Session and segment types with validation.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::day::DayRange;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// Invalid session status value.
    #[error("invalid session status: {value}")]
    InvalidStatus { value: String },

    /// A session must contain at least one segment.
    #[error("session has no segments")]
    NoSegments,

    /// A closed segment ends before it starts.
    #[error("segment {index} ends before it starts")]
    NegativeSegment { index: usize },

    /// A segment starts before the previous one closed.
    #[error("segment {index} overlaps the previous segment")]
    OverlappingSegments { index: usize },

    /// The open segment does not agree with the session status.
    #[error("session is {status} but has {open} open segment(s)")]
    OpenSegmentMismatch { status: SessionStatus, open: usize },
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(id))
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// Identifier of the user whose work time is tracked.
    OwnerId, "owner ID"
);

define_string_id!(
    /// A validated work session identifier.
    ///
    /// Assigned by the engine when a session starts.
    SessionId, "session ID"
);

impl SessionId {
    /// Generates a fresh random session ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Lifecycle status of a [`WorkSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Paused,
    Stopped,
}

impl SessionStatus {
    /// String representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }

    /// Whether the session still counts as the owner's active session.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "stopped" => Ok(Self::Stopped),
            _ => Err(ValidationError::InvalidStatus {
                value: s.to_string(),
            }),
        }
    }
}

/// One uninterrupted interval of active tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSegment {
    pub started_at: DateTime<Utc>,
    /// `None` while the segment is open.
    pub ended_at: Option<DateTime<Utc>>,
}

impl TimeSegment {
    /// Opens a segment at `at`.
    #[must_use]
    pub const fn open(at: DateTime<Utc>) -> Self {
        Self {
            started_at: at,
            ended_at: None,
        }
    }

    /// Creates a closed segment.
    #[must_use]
    pub const fn closed(started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            ended_at: Some(ended_at),
        }
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Duration of the segment, measuring an open segment up to `now`.
    ///
    /// Never negative: a start later than the end yields zero.
    #[must_use]
    pub fn duration_until(&self, now: DateTime<Utc>) -> Duration {
        let end = self.ended_at.unwrap_or(now);
        (end - self.started_at).max(Duration::zero())
    }

    /// Portion of the segment that lies inside `range`.
    ///
    /// An open segment is treated as running until `range.end`.
    #[must_use]
    pub fn overlap(&self, range: &DayRange) -> Duration {
        let end = self.ended_at.unwrap_or(range.end).min(range.end);
        let start = self.started_at.max(range.start);
        (end - start).max(Duration::zero())
    }
}

/// One continuous tracking session from start to stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSession {
    pub id: SessionId,
    pub owner: OwnerId,
    pub status: SessionStatus,
    /// Chronological order; only the last segment may be open.
    pub segments: Vec<TimeSegment>,
}

impl WorkSession {
    /// Creates a running session with its first segment opened at `at`.
    #[must_use]
    pub fn start(id: SessionId, owner: OwnerId, at: DateTime<Utc>) -> Self {
        Self {
            id,
            owner,
            status: SessionStatus::Running,
            segments: vec![TimeSegment::open(at)],
        }
    }

    /// The currently open segment, if any.
    #[must_use]
    pub fn open_segment(&self) -> Option<&TimeSegment> {
        self.segments.last().filter(|segment| segment.is_open())
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Start of the first segment.
    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.segments.first().map(|segment| segment.started_at)
    }

    /// End of the last closed segment.
    #[must_use]
    pub fn last_ended_at(&self) -> Option<DateTime<Utc>> {
        self.segments.iter().rev().find_map(|segment| segment.ended_at)
    }

    /// Sum of all closed segment durations.
    #[must_use]
    pub fn closed_duration(&self) -> Duration {
        self.segments
            .iter()
            .filter_map(|segment| {
                segment
                    .ended_at
                    .map(|ended_at| (ended_at - segment.started_at).max(Duration::zero()))
            })
            .fold(Duration::zero(), |acc, d| acc + d)
    }

    /// Elapsed tracked time at `now`: closed segments plus the open one.
    #[must_use]
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> Duration {
        let open = self
            .open_segment()
            .map_or_else(Duration::zero, |segment| segment.duration_until(now));
        self.closed_duration() + open
    }

    /// Tracked time falling inside `range`.
    #[must_use]
    pub fn duration_within(&self, range: &DayRange) -> Duration {
        self.segments
            .iter()
            .map(|segment| segment.overlap(range))
            .fold(Duration::zero(), |acc, d| acc + d)
    }

    /// Closes the open segment at `at`, returning the stored end.
    ///
    /// The end is clamped to the segment start so a lagging clock cannot
    /// produce a negative duration.
    pub(crate) fn close_open_segment(&mut self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let open = self.segments.last_mut().filter(|segment| segment.is_open())?;
        let ended_at = at.max(open.started_at);
        open.ended_at = Some(ended_at);
        Some(ended_at)
    }

    /// Opens a new segment at `at`, never before the previous segment ended.
    pub(crate) fn open_segment_at(&mut self, at: DateTime<Utc>) -> TimeSegment {
        let started_at = self.last_ended_at().map_or(at, |ended_at| at.max(ended_at));
        let segment = TimeSegment::open(started_at);
        self.segments.push(segment);
        segment
    }

    /// Checks the session invariants.
    ///
    /// Segments must be ordered and non-overlapping, closed segments must not
    /// end before they start, and exactly one open segment exists iff the
    /// session is running.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.segments.is_empty() {
            return Err(ValidationError::NoSegments);
        }

        let mut previous_end: Option<DateTime<Utc>> = None;
        for (index, segment) in self.segments.iter().enumerate() {
            if index > 0 {
                match previous_end {
                    Some(end) if segment.started_at >= end => {}
                    _ => return Err(ValidationError::OverlappingSegments { index }),
                }
            }
            if let Some(ended_at) = segment.ended_at {
                if ended_at < segment.started_at {
                    return Err(ValidationError::NegativeSegment { index });
                }
            }
            previous_end = segment.ended_at;
        }

        let open = self.segments.iter().filter(|s| s.is_open()).count();
        let expected = usize::from(self.status == SessionStatus::Running);
        if open != expected {
            return Err(ValidationError::OpenSegmentMismatch {
                status: self.status,
                open,
            });
        }
        Ok(())
    }
}
