mod engine;
mod policy;
mod snapshot;

pub use engine::{
    EndReason, Restored, SessionEnd, StartConfig, StartOutcome, StartRequest, StartTicket,
    Stopped, Tick, TimerEngine, TimerView,
};
pub use policy::{OverrunPolicy, TimerPolicy, MAX_COUNTDOWN_MINUTES, MIN_COUNTDOWN_MINUTES};
pub use snapshot::{TimerMode, TimerSnapshot, TimerStatus};
