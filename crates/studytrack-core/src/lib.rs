//! # StudyTrack Core Library
//!
//! This library provides the core logic of the StudyTrack study timer: a
//! resumable timer that survives reloads and restarts and reports every
//! session to a remote study-tracking API. It follows a CLI-first
//! philosophy where all operations are available via the standalone
//! `studytrack-cli` binary.
//!
//! ## Architecture
//!
//! - **Timer Engine**: A wall-clock-based state machine parameterized by a
//!   countdown or count-up policy. The caller invokes `tick()` periodically
//! - **Storage**: SQLite snapshot slots and session history, TOML
//!   configuration
//! - **Gateway**: The remote session API (`reqwest`)
//! - **Service**: A tokio actor that ticks the engine, runs gateway calls in
//!   the background and broadcasts events
//!
//! ## Key Components
//!
//! - [`TimerEngine`]: Core timer state machine
//! - [`SnapshotStore`]: Persistence port for live timer state
//! - [`SessionGateway`]: Trait for the remote session API
//! - [`TimerService`]: Async driver with a cloneable [`TimerHandle`]
//! - [`Database`]: SQLite snapshot store and session history
//! - [`Config`]: Application configuration management

pub mod clock;
pub mod error;
pub mod events;
pub mod gateway;
pub mod service;
pub mod storage;
pub mod timer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    ConfigError, CoreError, GatewayError, PersistenceError, Result, TimerError, ValidationError,
};
pub use events::Event;
pub use gateway::{HttpSessionGateway, SessionGateway, SessionType};
pub use service::{TimerHandle, TimerService};
pub use storage::{Config, Database, MemorySnapshotStore, SnapshotStore};
pub use timer::{
    EndReason, OverrunPolicy, Restored, SessionEnd, StartConfig, Stopped, TimerEngine, TimerMode,
    TimerPolicy, TimerSnapshot, TimerStatus, TimerView,
};
