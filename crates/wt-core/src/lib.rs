//! Core domain logic for work-time tracking.
//!
//! This crate contains:
//! - Types: work sessions, segments and their invariants
//! - Engine: the start/pause/resume/stop state machine with derived elapsed time
//! - Store contract: what the engine reads from and writes to durable storage
//! - Writer: background write-behind with retries for persistence commands

pub mod clock;
mod command;
pub mod day;
pub mod engine;
mod memory;
mod store;
pub mod types;
pub mod writer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{CommandSink, StoreCommand};
pub use day::{DayRange, duration_hours};
pub use engine::{
    ClockSkew, EngineError, EngineSnapshot, EngineState, Operation, TimeTrackingEngine,
};
pub use memory::MemoryStore;
pub use store::{
    BoxError, SessionStore, SharedStore, StoreError, with_store, with_store_mut,
};
pub use types::{OwnerId, SessionId, SessionStatus, TimeSegment, ValidationError, WorkSession};
pub use writer::{PersistenceEvent, RetryPolicy, WriteBehind, WriterHandle, spawn_writer};
