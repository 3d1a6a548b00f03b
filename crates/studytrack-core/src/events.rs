use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timer::{EndReason, SessionEnd, TimerMode, TimerStatus, TimerView};

/// Every state change of a timer produces an Event.
/// Consumers subscribe through the timer service's broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    SessionStarted {
        mode: TimerMode,
        remote_session_id: i64,
        target_duration_seconds: Option<u64>,
        at: DateTime<Utc>,
    },
    /// The gateway refused to open a session; the timer is still idle.
    StartFailed {
        mode: TimerMode,
        error: String,
        at: DateTime<Utc>,
    },
    TimerPaused {
        remote_session_id: i64,
        accumulated_seconds: u64,
        at: DateTime<Utc>,
    },
    TimerResumed {
        remote_session_id: i64,
        accumulated_seconds: u64,
        at: DateTime<Utc>,
    },
    TimerStopped {
        remote_session_id: i64,
        duration_seconds: u64,
        discarded: bool,
        at: DateTime<Utc>,
    },
    TimerCompleted {
        remote_session_id: i64,
        duration_seconds: u64,
        reason: EndReason,
        at: DateTime<Utc>,
    },
    /// A persisted session was picked up again after a restart.
    SessionRecovered {
        remote_session_id: i64,
        status: TimerStatus,
        accumulated_seconds: u64,
        at: DateTime<Utc>,
    },
    /// The gateway acknowledged the end of a session.
    SessionEnded { end: SessionEnd, at: DateTime<Utc> },
    /// The gateway rejected the end of a session. Local state was already
    /// reset; this is a dismissible warning.
    SessionEndFailed {
        end: SessionEnd,
        error: String,
        at: DateTime<Utc>,
    },
    StateSnapshot {
        view: TimerView,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Event::SessionStarted { at, .. }
            | Event::StartFailed { at, .. }
            | Event::TimerPaused { at, .. }
            | Event::TimerResumed { at, .. }
            | Event::TimerStopped { at, .. }
            | Event::TimerCompleted { at, .. }
            | Event::SessionRecovered { at, .. }
            | Event::SessionEnded { at, .. }
            | Event::SessionEndFailed { at, .. }
            | Event::StateSnapshot { at, .. } => *at,
        }
    }

    /// The session end this event reports on, with the gateway error if it
    /// was rejected.
    pub fn session_end(&self) -> Option<(&SessionEnd, Option<&str>)> {
        match self {
            Event::SessionEnded { end, .. } => Some((end, None)),
            Event::SessionEndFailed { end, error, .. } => Some((end, Some(error.as_str()))),
            _ => None,
        }
    }
}
