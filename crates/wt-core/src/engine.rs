//! The work-time tracking state machine.
//!
//! # States
//!
//! | From    | Operation  | To      |
//! |---------|------------|---------|
//! | Idle    | `start()`  | Running |
//! | Running | `pause()`  | Paused  |
//! | Paused  | `resume()` | Running |
//! | Running | `stop()`   | Idle    |
//! | Paused  | `stop()`   | Idle    |
//!
//! Every other combination fails with [`EngineError::InvalidTransition`] and
//! leaves both the state and the store untouched. A stopped session is handed
//! back to the caller and the engine returns to `Idle`.
//!
//! # Time
//!
//! Elapsed time is always derived from segment timestamps and the [`Clock`];
//! nothing is accumulated between calls, so a display tick can be paused or
//! dropped at any moment.
//!
//! # Persistence
//!
//! Transitions apply to the in-memory session first and then submit a
//! [`StoreCommand`] to the [`CommandSink`]. Write failures never roll back a
//! transition. On startup the store is authoritative: an active session found
//! there is adopted with its stored timestamps.

use std::fmt;

use chrono::{DateTime, Duration, Local, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::command::{CommandSink, StoreCommand};
use crate::day::{DayRange, duration_hours};
use crate::store::{SessionStore, SharedStore, StoreError, with_store};
use crate::types::{
    OwnerId, SessionId, SessionStatus, TimeSegment, ValidationError, WorkSession,
};

/// Observable engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Idle,
    Running,
    Paused,
}

impl EngineState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four mutating operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Start,
    Pause,
    Resume,
    Stop,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
        };
        f.write_str(s)
    }
}

/// Engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The operation is not legal from the current state.
    ///
    /// Signals that the caller's view of the state is out of date; refresh
    /// before retrying.
    #[error("cannot {operation} while {state}")]
    InvalidTransition {
        operation: Operation,
        state: EngineState,
    },
    /// The owner already has a running or paused session.
    #[error("tracking already running for {owner} (session {session_id})")]
    SessionAlreadyActive {
        owner: OwnerId,
        session_id: SessionId,
    },
    /// A synchronous store read failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The active session in the store violates the session invariants.
    #[error("stored session {session_id} is inconsistent")]
    CorruptSession {
        session_id: SessionId,
        #[source]
        source: ValidationError,
    },
}

/// A stored timestamp that lies ahead of the local clock.
///
/// Elapsed time is clamped to zero until the local clock catches up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("stored timestamp {stored_at} is ahead of local time {observed_at}")]
pub struct ClockSkew {
    pub stored_at: DateTime<Utc>,
    pub observed_at: DateTime<Utc>,
}

/// Derived values for one render of the tracking card.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub owner: OwnerId,
    pub state: EngineState,
    pub session_id: Option<SessionId>,
    pub elapsed_ms: i64,
    pub daily_hours: f64,
    pub captured_at: DateTime<Utc>,
}

/// Tracks one owner's work sessions.
///
/// Operations must not be called concurrently; callers serialize user
/// intents.
pub struct TimeTrackingEngine<S, C, K> {
    owner: OwnerId,
    store: SharedStore<S>,
    clock: C,
    sink: K,
    session: Option<WorkSession>,
    /// Sessions stopped by this engine. Their writes may still be queued, so
    /// the store's copy can lag behind.
    completed: Vec<WorkSession>,
    clock_skew: Option<ClockSkew>,
}

impl<S, C, K> fmt::Debug for TimeTrackingEngine<S, C, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeTrackingEngine")
            .field("owner", &self.owner)
            .field("session", &self.session)
            .field("completed", &self.completed.len())
            .field("clock_skew", &self.clock_skew)
            .finish_non_exhaustive()
    }
}

impl<S, C, K> TimeTrackingEngine<S, C, K>
where
    S: SessionStore,
    C: Clock,
    K: CommandSink,
{
    /// Creates an engine for `owner`, reconciling with the store.
    ///
    /// An active session in the store is adopted as-is: a running session
    /// keeps counting from its stored open segment, a paused one stays frozen
    /// at its closed-segment total.
    pub fn initialize(
        owner: OwnerId,
        store: SharedStore<S>,
        clock: C,
        sink: K,
    ) -> Result<Self, EngineError> {
        let stored = with_store(&store, |s| s.find_active_session(&owner))?;
        let mut engine = Self {
            owner,
            store,
            clock,
            sink,
            session: None,
            completed: Vec::new(),
            clock_skew: None,
        };
        match stored {
            Some(session) if session.is_active() => engine.adopt(session)?,
            _ => debug!(owner = %engine.owner, "no active session, starting idle"),
        }
        Ok(engine)
    }

    fn adopt(&mut self, session: WorkSession) -> Result<(), EngineError> {
        session
            .validate()
            .map_err(|source| EngineError::CorruptSession {
                session_id: session.id.clone(),
                source,
            })?;

        let now = self.clock.now();
        let latest = session
            .open_segment()
            .map(|segment| segment.started_at)
            .or_else(|| session.last_ended_at());
        if let Some(stored_at) = latest.filter(|stored_at| *stored_at > now) {
            let skew = ClockSkew {
                stored_at,
                observed_at: now,
            };
            warn!(
                session_id = %session.id,
                %stored_at,
                observed_at = %now,
                "stored session is ahead of local clock; clamping elapsed time"
            );
            self.clock_skew = Some(skew);
        }

        info!(
            owner = %self.owner,
            session_id = %session.id,
            status = %session.status,
            elapsed_ms = session.elapsed_at(now).num_milliseconds(),
            "reconciled active session from store"
        );
        self.session = Some(session);
        Ok(())
    }

    /// Current state.
    pub fn state(&self) -> EngineState {
        match self.session.as_ref().map(|session| session.status) {
            Some(SessionStatus::Running) => EngineState::Running,
            Some(SessionStatus::Paused) => EngineState::Paused,
            Some(SessionStatus::Stopped) | None => EngineState::Idle,
        }
    }

    pub const fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// The active session, if any.
    pub const fn session(&self) -> Option<&WorkSession> {
        self.session.as_ref()
    }

    /// Skew detected while reconciling, if any.
    pub const fn clock_skew(&self) -> Option<ClockSkew> {
        self.clock_skew
    }

    /// The sink receiving persistence commands.
    pub const fn sink(&self) -> &K {
        &self.sink
    }

    /// Starts a new session.
    ///
    /// Fails with [`EngineError::SessionAlreadyActive`] if this engine or the
    /// store already holds an active session for the owner.
    pub fn start(&mut self) -> Result<SessionId, EngineError> {
        if let Some(active) = &self.session {
            return Err(EngineError::SessionAlreadyActive {
                owner: self.owner.clone(),
                session_id: active.id.clone(),
            });
        }

        let stored = with_store(&self.store, |s| s.find_active_session(&self.owner))?;
        if let Some(other) = stored.filter(|s| !self.is_completed(&s.id)) {
            warn!(
                owner = %self.owner,
                session_id = %other.id,
                "refusing to start: store has an active session"
            );
            return Err(EngineError::SessionAlreadyActive {
                owner: self.owner.clone(),
                session_id: other.id,
            });
        }

        let now = self.clock.now();
        self.prune_completed(now);
        let session_id = SessionId::generate();
        let session = WorkSession::start(session_id.clone(), self.owner.clone(), now);
        self.session = Some(session);
        self.clock_skew = None;

        self.sink.submit(StoreCommand::CreateSession {
            session_id: session_id.clone(),
            owner: self.owner.clone(),
            segment: TimeSegment::open(now),
        });
        info!(owner = %self.owner, %session_id, started_at = %now, "session started");
        Ok(session_id)
    }

    /// Pauses the running session.
    pub fn pause(&mut self) -> Result<(), EngineError> {
        let now = self.clock.now();
        let session = self.require(Operation::Pause, EngineState::Running)?;
        let Some(ended_at) = session.close_open_segment(now) else {
            return Err(EngineError::InvalidTransition {
                operation: Operation::Pause,
                state: EngineState::Running,
            });
        };
        session.status = SessionStatus::Paused;
        let session_id = session.id.clone();

        self.sink.submit(StoreCommand::CloseOpenSegment {
            session_id: session_id.clone(),
            ended_at,
        });
        info!(%session_id, paused_at = %ended_at, "session paused");
        Ok(())
    }

    /// Resumes the paused session with a new segment.
    pub fn resume(&mut self) -> Result<(), EngineError> {
        let now = self.clock.now();
        let session = self.require(Operation::Resume, EngineState::Paused)?;
        let segment = session.open_segment_at(now);
        session.status = SessionStatus::Running;
        let session_id = session.id.clone();

        self.sink.submit(StoreCommand::AppendSegment {
            session_id: session_id.clone(),
            segment,
        });
        info!(%session_id, resumed_at = %segment.started_at, "session resumed");
        Ok(())
    }

    /// Stops the active session and returns it.
    ///
    /// The open segment, if any, is closed before the session is marked
    /// stopped.
    pub fn stop(&mut self) -> Result<WorkSession, EngineError> {
        let state = self.state();
        if state == EngineState::Idle {
            return Err(EngineError::InvalidTransition {
                operation: Operation::Stop,
                state,
            });
        }
        let Some(mut session) = self.session.take() else {
            return Err(EngineError::InvalidTransition {
                operation: Operation::Stop,
                state,
            });
        };

        let now = self.clock.now();
        if let Some(ended_at) = session.close_open_segment(now) {
            self.sink.submit(StoreCommand::CloseOpenSegment {
                session_id: session.id.clone(),
                ended_at,
            });
        }
        let stopped_at = session.last_ended_at().map_or(now, |ended_at| now.max(ended_at));
        session.status = SessionStatus::Stopped;
        self.sink.submit(StoreCommand::MarkStopped {
            session_id: session.id.clone(),
            stopped_at,
        });

        info!(
            session_id = %session.id,
            %stopped_at,
            segments = session.segments.len(),
            elapsed_ms = session.closed_duration().num_milliseconds(),
            "session stopped"
        );
        self.clock_skew = None;
        self.completed.push(session.clone());
        self.prune_completed(now);
        Ok(session)
    }

    /// Elapsed time of the active session; zero when idle.
    pub fn elapsed_time(&self) -> Duration {
        self.session
            .as_ref()
            .map_or_else(Duration::zero, |session| {
                session.elapsed_at(self.clock.now())
            })
    }

    /// Total tracked time for the owner in the current local calendar day.
    pub fn daily_total(&self) -> Result<Duration, EngineError> {
        let range = DayRange::today_until(self.clock.now(), &Local);
        let local: Vec<SessionId> = self
            .session
            .iter()
            .chain(&self.completed)
            .map(|session| session.id.clone())
            .collect();
        let stored = with_store(&self.store, |s| s.sum_durations(&self.owner, &range, &local))?;
        let in_memory = self
            .session
            .iter()
            .chain(&self.completed)
            .map(|session| session.duration_within(&range))
            .fold(Duration::zero(), |acc, d| acc + d);
        Ok(stored + in_memory)
    }

    /// The owner's sessions touching the current local day, ordered by start.
    ///
    /// Sessions held by this engine replace their stored copies.
    pub fn sessions_today(&self) -> Result<Vec<WorkSession>, EngineError> {
        let range = DayRange::today_until(self.clock.now(), &Local);
        let stored = with_store(&self.store, |s| s.sessions_in_range(&self.owner, &range))?;
        let mut sessions: Vec<WorkSession> = stored
            .into_iter()
            .filter(|stored| {
                !self.is_completed(&stored.id)
                    && self.session.as_ref().is_none_or(|active| active.id != stored.id)
            })
            .chain(self.session.iter().cloned())
            .chain(
                self.completed
                    .iter()
                    .filter(|session| session.duration_within(&range) > Duration::zero())
                    .cloned(),
            )
            .collect();
        sessions.sort_by_key(WorkSession::started_at);
        Ok(sessions)
    }

    /// Daily total as fractional hours.
    pub fn daily_work_hours(&self) -> Result<f64, EngineError> {
        self.daily_total().map(duration_hours)
    }

    /// Captures everything a display tick renders.
    pub fn snapshot(&self) -> Result<EngineSnapshot, EngineError> {
        let daily_hours = self.daily_work_hours()?;
        Ok(EngineSnapshot {
            owner: self.owner.clone(),
            state: self.state(),
            session_id: self.session.as_ref().map(|session| session.id.clone()),
            elapsed_ms: self.elapsed_time().num_milliseconds(),
            daily_hours,
            captured_at: self.clock.now(),
        })
    }

    fn require(
        &mut self,
        operation: Operation,
        expected: EngineState,
    ) -> Result<&mut WorkSession, EngineError> {
        let state = self.state();
        match self.session.as_mut() {
            Some(session) if state == expected => Ok(session),
            _ => Err(EngineError::InvalidTransition { operation, state }),
        }
    }

    /// Drops locally stopped sessions that no longer touch today.
    fn prune_completed(&mut self, now: DateTime<Utc>) {
        let range = DayRange::today_until(now, &Local);
        self.completed
            .retain(|session| session.duration_within(&range) > Duration::zero());
    }

    fn is_completed(&self, session_id: &SessionId) -> bool {
        self.completed.iter().any(|session| &session.id == session_id)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::sync::{Arc, Mutex};

    use chrono::TimeZone;

    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::MemoryStore;
    use crate::store::with_store_mut;

    /// Applies commands immediately and records them.
    struct InlineSink {
        store: SharedStore<MemoryStore>,
        submitted: RefCell<Vec<StoreCommand>>,
    }

    impl InlineSink {
        fn new(store: &SharedStore<MemoryStore>) -> Self {
            Self {
                store: Arc::clone(store),
                submitted: RefCell::new(Vec::new()),
            }
        }

        fn count(&self) -> usize {
            self.submitted.borrow().len()
        }
    }

    impl CommandSink for InlineSink {
        fn submit(&self, command: StoreCommand) {
            with_store_mut(&self.store, |s| command.apply(s)).expect("apply command");
            self.submitted.borrow_mut().push(command);
        }
    }

    /// Records commands without applying them, like a stalled writer.
    #[derive(Default)]
    struct QueuedSink {
        queued: RefCell<Vec<StoreCommand>>,
    }

    impl CommandSink for QueuedSink {
        fn submit(&self, command: StoreCommand) {
            self.queued.borrow_mut().push(command);
        }
    }

    fn local(h: u32, m: u32) -> DateTime<Utc> {
        Local
            .with_ymd_and_hms(2025, 1, 15, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn owner() -> OwnerId {
        OwnerId::new("alice").unwrap()
    }

    fn shared(store: MemoryStore) -> SharedStore<MemoryStore> {
        Arc::new(Mutex::new(store))
    }

    #[test]
    fn full_day_scenario() {
        let store = shared(MemoryStore::new());
        let clock = ManualClock::new(local(9, 0));
        let sink = InlineSink::new(&store);
        let mut engine =
            TimeTrackingEngine::initialize(owner(), Arc::clone(&store), &clock, &sink).unwrap();
        assert_eq!(engine.state(), EngineState::Idle);

        let id = engine.start().unwrap();
        assert_eq!(engine.state(), EngineState::Running);

        clock.set(local(9, 30));
        engine.pause().unwrap();
        clock.set(local(9, 45));
        assert_eq!(engine.elapsed_time(), Duration::minutes(30));

        engine.resume().unwrap();
        clock.set(local(10, 15));
        let stopped = engine.stop().unwrap();

        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(stopped.id, id);
        assert_eq!(stopped.status, SessionStatus::Stopped);
        assert_eq!(
            stopped.segments,
            vec![
                TimeSegment::closed(local(9, 0), local(9, 30)),
                TimeSegment::closed(local(9, 45), local(10, 15)),
            ]
        );
        assert_eq!(stopped.closed_duration(), Duration::hours(1));
        assert!((engine.daily_work_hours().unwrap() - 1.0).abs() < 1e-9);

        let stored = store.lock().unwrap().sessions()[0].clone();
        assert_eq!(stored, stopped);
        assert_eq!(sink.count(), 5);
    }

    #[test]
    fn pause_from_idle_is_rejected_without_writes() {
        let store = shared(MemoryStore::new());
        let clock = ManualClock::new(local(9, 0));
        let sink = InlineSink::new(&store);
        let mut engine =
            TimeTrackingEngine::initialize(owner(), Arc::clone(&store), &clock, &sink).unwrap();

        for (result, operation) in [
            (engine.pause(), Operation::Pause),
            (engine.resume(), Operation::Resume),
            (engine.stop().map(|_| ()), Operation::Stop),
        ] {
            match result {
                Err(EngineError::InvalidTransition { operation: op, state }) => {
                    assert_eq!(op, operation);
                    assert_eq!(state, EngineState::Idle);
                }
                other => panic!("expected invalid transition, got {other:?}"),
            }
        }
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn repeated_pause_and_resume_are_invalid() {
        let store = shared(MemoryStore::new());
        let clock = ManualClock::new(local(9, 0));
        let sink = InlineSink::new(&store);
        let mut engine =
            TimeTrackingEngine::initialize(owner(), Arc::clone(&store), &clock, &sink).unwrap();

        engine.start().unwrap();
        assert!(matches!(
            engine.resume(),
            Err(EngineError::InvalidTransition {
                operation: Operation::Resume,
                state: EngineState::Running,
            })
        ));
        engine.pause().unwrap();
        let writes = sink.count();
        assert!(matches!(
            engine.pause(),
            Err(EngineError::InvalidTransition {
                operation: Operation::Pause,
                state: EngineState::Paused,
            })
        ));
        assert_eq!(engine.state(), EngineState::Paused);
        assert_eq!(sink.count(), writes);
    }

    #[test]
    fn second_start_reports_active_session() {
        let store = shared(MemoryStore::new());
        let clock = ManualClock::new(local(9, 0));
        let sink = InlineSink::new(&store);
        let mut engine =
            TimeTrackingEngine::initialize(owner(), Arc::clone(&store), &clock, &sink).unwrap();

        let id = engine.start().unwrap();
        match engine.start() {
            Err(EngineError::SessionAlreadyActive { session_id, .. }) => assert_eq!(session_id, id),
            other => panic!("expected SessionAlreadyActive, got {other:?}"),
        }
        assert_eq!(store.lock().unwrap().sessions().len(), 1);
    }

    #[test]
    fn start_detects_session_from_another_engine() {
        let store = shared(MemoryStore::new());
        let clock = ManualClock::new(local(9, 0));
        let sink = InlineSink::new(&store);
        let mut first =
            TimeTrackingEngine::initialize(owner(), Arc::clone(&store), &clock, &sink).unwrap();
        let mut second =
            TimeTrackingEngine::initialize(owner(), Arc::clone(&store), &clock, &sink).unwrap();

        let id = first.start().unwrap();
        match second.start() {
            Err(EngineError::SessionAlreadyActive { session_id, .. }) => assert_eq!(session_id, id),
            other => panic!("expected SessionAlreadyActive, got {other:?}"),
        }
        assert_eq!(second.state(), EngineState::Idle);
    }

    #[test]
    fn reload_reconstructs_running_elapsed_time() {
        let store = shared(MemoryStore::new());
        let clock = ManualClock::new(local(9, 0));
        let sink = InlineSink::new(&store);
        let mut engine =
            TimeTrackingEngine::initialize(owner(), Arc::clone(&store), &clock, &sink).unwrap();
        let id = engine.start().unwrap();
        drop(engine);

        clock.set(local(11, 20));
        let reloaded =
            TimeTrackingEngine::initialize(owner(), Arc::clone(&store), &clock, &sink).unwrap();
        assert_eq!(reloaded.state(), EngineState::Running);
        assert_eq!(reloaded.session().unwrap().id, id);
        assert_eq!(reloaded.elapsed_time(), Duration::minutes(140));
        assert!(reloaded.clock_skew().is_none());
    }

    #[test]
    fn reload_keeps_paused_session_frozen() {
        let store = shared(MemoryStore::new());
        let clock = ManualClock::new(local(9, 0));
        let sink = InlineSink::new(&store);
        let mut engine =
            TimeTrackingEngine::initialize(owner(), Arc::clone(&store), &clock, &sink).unwrap();
        engine.start().unwrap();
        clock.set(local(9, 40));
        engine.pause().unwrap();
        drop(engine);

        clock.set(local(12, 0));
        let mut reloaded =
            TimeTrackingEngine::initialize(owner(), Arc::clone(&store), &clock, &sink).unwrap();
        assert_eq!(reloaded.state(), EngineState::Paused);
        assert_eq!(reloaded.elapsed_time(), Duration::minutes(40));

        reloaded.resume().unwrap();
        clock.set(local(12, 20));
        assert_eq!(reloaded.elapsed_time(), Duration::hours(1));
        let stopped = reloaded.stop().unwrap();
        assert_eq!(stopped.segments.len(), 2);
        assert!(store.lock().unwrap().sessions()[0].validate().is_ok());
    }

    #[test]
    fn future_start_is_clamped_and_flagged() {
        let mut store = MemoryStore::new();
        store.insert(WorkSession {
            id: SessionId::new("from-skewed-device").unwrap(),
            owner: owner(),
            status: SessionStatus::Running,
            segments: vec![TimeSegment::open(local(10, 0))],
        });
        let store = shared(store);
        let clock = ManualClock::new(local(9, 55));
        let sink = InlineSink::new(&store);
        let mut engine =
            TimeTrackingEngine::initialize(owner(), Arc::clone(&store), &clock, &sink).unwrap();

        assert_eq!(engine.elapsed_time(), Duration::zero());
        assert_eq!(
            engine.clock_skew(),
            Some(ClockSkew {
                stored_at: local(10, 0),
                observed_at: local(9, 55),
            })
        );

        // Pausing before the stored start must not produce a negative segment.
        engine.pause().unwrap();
        let segment = engine.session().unwrap().segments[0];
        assert_eq!(segment.ended_at, Some(local(10, 0)));
        assert_eq!(engine.elapsed_time(), Duration::zero());
    }

    #[test]
    fn corrupt_stored_session_is_reported() {
        let mut store = MemoryStore::new();
        store.insert(WorkSession {
            id: SessionId::new("broken").unwrap(),
            owner: owner(),
            status: SessionStatus::Paused,
            segments: vec![TimeSegment::open(local(9, 0))],
        });
        let store = shared(store);
        let clock = ManualClock::new(local(10, 0));
        let sink = InlineSink::new(&store);
        let err = TimeTrackingEngine::initialize(owner(), Arc::clone(&store), &clock, &sink)
            .unwrap_err();
        assert!(matches!(err, EngineError::CorruptSession { .. }));
    }

    #[test]
    fn elapsed_time_is_derived_not_accumulated() {
        let store = shared(MemoryStore::new());
        let clock = ManualClock::new(local(9, 0));
        let sink = InlineSink::new(&store);
        let mut engine =
            TimeTrackingEngine::initialize(owner(), Arc::clone(&store), &clock, &sink).unwrap();
        engine.start().unwrap();

        clock.advance(Duration::seconds(5));
        let first = engine.elapsed_time();
        let second = engine.elapsed_time();
        assert_eq!(first, second);

        clock.advance(Duration::seconds(1));
        assert!(engine.elapsed_time() >= second);
        assert_eq!(engine.elapsed_time(), Duration::seconds(6));
    }

    #[test]
    fn closed_segments_equal_wall_time_minus_pauses() {
        let store = shared(MemoryStore::new());
        let clock = ManualClock::new(local(8, 0));
        let sink = InlineSink::new(&store);
        let mut engine =
            TimeTrackingEngine::initialize(owner(), Arc::clone(&store), &clock, &sink).unwrap();

        let start = clock.now();
        engine.start().unwrap();
        let mut paused = Duration::zero();
        for (work, pause) in [(17, 3), (41, 12), (5, 1), (29, 60)] {
            clock.advance(Duration::seconds(work));
            engine.pause().unwrap();
            clock.advance(Duration::seconds(pause));
            paused += Duration::seconds(pause);
            engine.resume().unwrap();
        }
        clock.advance(Duration::seconds(11));
        let stop = clock.now();
        let stopped = engine.stop().unwrap();

        assert_eq!(stopped.closed_duration(), stop - start - paused);
        stopped.validate().unwrap();
    }

    #[test]
    fn daily_hours_sum_stopped_sessions() {
        let store = shared(MemoryStore::new());
        let clock = ManualClock::new(local(8, 0));
        let sink = InlineSink::new(&store);
        let mut engine =
            TimeTrackingEngine::initialize(owner(), Arc::clone(&store), &clock, &sink).unwrap();

        for (start, minutes) in [((8, 0), 60), ((10, 0), 120), ((13, 0), 30)] {
            clock.set(local(start.0, start.1));
            engine.start().unwrap();
            clock.advance(Duration::minutes(minutes));
            engine.stop().unwrap();
        }
        clock.set(local(17, 0));
        assert!((engine.daily_work_hours().unwrap() - 3.5).abs() < 1e-9);

        // A fresh engine reads the same total from the store alone.
        let fresh =
            TimeTrackingEngine::initialize(owner(), Arc::clone(&store), &clock, &sink).unwrap();
        assert!((fresh.daily_work_hours().unwrap() - 3.5).abs() < 1e-9);
    }

    #[test]
    fn daily_total_includes_running_session_and_ignores_yesterday() {
        let mut store = MemoryStore::new();
        let yesterday = local(10, 0) - Duration::days(1);
        store.insert(WorkSession {
            id: SessionId::new("yesterday").unwrap(),
            owner: owner(),
            status: SessionStatus::Stopped,
            segments: vec![TimeSegment::closed(yesterday, yesterday + Duration::hours(4))],
        });
        let store = shared(store);
        let clock = ManualClock::new(local(9, 0));
        let sink = InlineSink::new(&store);
        let mut engine =
            TimeTrackingEngine::initialize(owner(), Arc::clone(&store), &clock, &sink).unwrap();

        engine.start().unwrap();
        clock.set(local(9, 45));
        assert_eq!(engine.daily_total().unwrap(), Duration::minutes(45));
    }

    #[test]
    fn stopped_sessions_from_yesterday_are_pruned_on_start() {
        let store = shared(MemoryStore::new());
        let clock = ManualClock::new(local(9, 0));
        let queued = QueuedSink::default();
        let mut engine =
            TimeTrackingEngine::initialize(owner(), Arc::clone(&store), &clock, &queued).unwrap();
        engine.start().unwrap();
        clock.set(local(17, 0));
        engine.stop().unwrap();
        assert_eq!(engine.completed.len(), 1);

        clock.set(local(9, 0) + Duration::days(1));
        engine.start().unwrap();
        assert!(engine.completed.is_empty());

        clock.advance(Duration::minutes(30));
        assert_eq!(read_total(&engine), Duration::minutes(30));
    }

    fn read_total<S, C, K>(engine: &TimeTrackingEngine<S, C, K>) -> Duration
    where
        S: SessionStore,
        C: Clock,
        K: CommandSink,
    {
        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.elapsed_ms, engine.elapsed_time().num_milliseconds());
        engine.daily_total().unwrap()
    }

    #[test]
    fn queued_stop_does_not_block_next_start() {
        let store = shared(MemoryStore::new());
        let clock = ManualClock::new(local(9, 0));
        let inline = InlineSink::new(&store);
        let mut engine =
            TimeTrackingEngine::initialize(owner(), Arc::clone(&store), &clock, &inline).unwrap();
        engine.start().unwrap();
        drop(engine);

        // The stop write never reaches the store.
        let queued = QueuedSink::default();
        let mut engine =
            TimeTrackingEngine::initialize(owner(), Arc::clone(&store), &clock, &queued).unwrap();
        clock.set(local(10, 0));
        engine.stop().unwrap();
        assert!(store.lock().unwrap().find_active_session(&owner()).unwrap().is_some());

        clock.set(local(10, 30));
        engine.start().unwrap();
        clock.set(local(11, 0));
        assert_eq!(engine.daily_total().unwrap(), Duration::minutes(90));
        assert_eq!(
            queued
                .queued
                .borrow()
                .iter()
                .map(StoreCommand::name)
                .collect::<Vec<_>>(),
            vec!["close_open_segment", "mark_stopped", "create_session"]
        );
    }

    #[test]
    fn sessions_today_prefer_local_copies() {
        let store = shared(MemoryStore::new());
        let clock = ManualClock::new(local(9, 0));
        let inline = InlineSink::new(&store);
        let mut engine =
            TimeTrackingEngine::initialize(owner(), Arc::clone(&store), &clock, &inline).unwrap();
        engine.start().unwrap();
        drop(engine);

        let queued = QueuedSink::default();
        let mut engine =
            TimeTrackingEngine::initialize(owner(), Arc::clone(&store), &clock, &queued).unwrap();
        clock.set(local(10, 0));
        let first = engine.stop().unwrap();
        clock.set(local(10, 30));
        let second = engine.start().unwrap();

        let sessions = engine.sessions_today().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0], first);
        assert_eq!(sessions[1].id, second);
        assert_eq!(sessions[1].status, SessionStatus::Running);
    }

    #[test]
    fn snapshot_serializes_for_display() {
        let store = shared(MemoryStore::new());
        let clock = ManualClock::new(local(9, 0));
        let sink = InlineSink::new(&store);
        let mut engine =
            TimeTrackingEngine::initialize(owner(), Arc::clone(&store), &clock, &sink).unwrap();
        engine.start().unwrap();
        clock.set(local(9, 30));

        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.state, EngineState::Running);
        assert_eq!(snapshot.elapsed_ms, 30 * 60 * 1000);
        assert!((snapshot.daily_hours - 0.5).abs() < 1e-9);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["state"], "running");
        assert_eq!(json["owner"], "alice");
    }
}
