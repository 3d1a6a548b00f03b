//! Timer modes, statuses and the persisted snapshot.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;

/// Selects the timer policy. Fixed per engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimerMode {
    /// Pomodoro-style countdown towards a target.
    Countdown,
    /// Free-running stopwatch.
    CountUp,
}

impl TimerMode {
    pub const ALL: [TimerMode; 2] = [TimerMode::Countdown, TimerMode::CountUp];

    /// Storage slot key.
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerMode::Countdown => "countdown",
            TimerMode::CountUp => "count_up",
        }
    }
}

impl fmt::Display for TimerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerStatus {
    Idle,
    Running,
    Paused,
    /// Only reported by the view of the tick that finished a countdown.
    Completed,
}

impl fmt::Display for TimerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimerStatus::Idle => "idle",
            TimerStatus::Running => "running",
            TimerStatus::Paused => "paused",
            TimerStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Serialized state of a live timer, written on every transition and on
/// every running tick.
///
/// Only `Running` and `Paused` timers are ever persisted; an idle engine
/// has no snapshot at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub mode: TimerMode,
    pub status: TimerStatus,
    pub remote_session_id: i64,
    /// Start of the current running segment. Present iff `Running`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<DateTime<Utc>>,
    /// Seconds banked from earlier running segments.
    pub accumulated_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_duration_seconds: Option<u64>,
    #[serde(default)]
    pub topic_id: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl TimerSnapshot {
    /// Check the invariants a stored snapshot must satisfy before it is
    /// trusted for recovery.
    pub fn validate(&self) -> Result<(), PersistenceError> {
        match (self.status, self.start_timestamp) {
            (TimerStatus::Running, Some(_)) | (TimerStatus::Paused, None) => {}
            (TimerStatus::Running, None) => {
                return Err(PersistenceError::Corrupt(
                    "running snapshot has no startTimestamp".into(),
                ));
            }
            (TimerStatus::Paused, Some(_)) => {
                return Err(PersistenceError::Corrupt(
                    "paused snapshot carries a startTimestamp".into(),
                ));
            }
            (status, _) => {
                return Err(PersistenceError::Corrupt(format!(
                    "{status} timers are never persisted"
                )));
            }
        }

        match (self.mode, self.target_duration_seconds) {
            (TimerMode::Countdown, None) => Err(PersistenceError::Corrupt(
                "countdown snapshot has no targetDurationSeconds".into(),
            )),
            (TimerMode::Countdown, Some(0)) => Err(PersistenceError::Corrupt(
                "countdown snapshot has a zero target".into(),
            )),
            _ => Ok(()),
        }
    }
}
