//! Countdown vs count-up behavior.
//!
//! Both variants share the engine's state machine; a policy only decides
//! what is displayed and when a session completes on its own.

use serde::{Deserialize, Serialize};

use super::snapshot::TimerMode;
use crate::error::ValidationError;

pub const MIN_COUNTDOWN_MINUTES: u64 = 1;
pub const MAX_COUNTDOWN_MINUTES: u64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TimerPolicy {
    Countdown { target_duration_seconds: u64 },
    CountUp,
}

/// Duration reported for a countdown whose elapsed time ran past the target,
/// which happens when the process was not ticking (closed tab, sleep).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrunPolicy {
    /// Report the real wall-clock study time, even past the target.
    #[default]
    ActualElapsed,
    /// Never report more than the target.
    ClampToTarget,
}

impl TimerPolicy {
    /// Build the policy for a new session, validating the countdown target.
    ///
    /// Count-up timers ignore any target.
    pub fn for_start(
        mode: TimerMode,
        target_duration_seconds: Option<u64>,
    ) -> Result<Self, ValidationError> {
        match mode {
            TimerMode::CountUp => Ok(TimerPolicy::CountUp),
            TimerMode::Countdown => {
                let seconds = target_duration_seconds.ok_or(ValidationError::MissingTarget)?;
                let range = MIN_COUNTDOWN_MINUTES * 60..=MAX_COUNTDOWN_MINUTES * 60;
                if !range.contains(&seconds) {
                    return Err(ValidationError::TargetOutOfRange {
                        seconds,
                        min_minutes: MIN_COUNTDOWN_MINUTES,
                        max_minutes: MAX_COUNTDOWN_MINUTES,
                    });
                }
                Ok(TimerPolicy::Countdown {
                    target_duration_seconds: seconds,
                })
            }
        }
    }

    /// Rebuild a policy from persisted fields without range checks; the
    /// target was validated when the session started.
    pub(crate) fn restored(mode: TimerMode, target_duration_seconds: Option<u64>) -> Self {
        match (mode, target_duration_seconds) {
            (TimerMode::Countdown, Some(target)) => TimerPolicy::Countdown {
                target_duration_seconds: target,
            },
            _ => TimerPolicy::CountUp,
        }
    }

    pub fn mode(&self) -> TimerMode {
        match self {
            TimerPolicy::Countdown { .. } => TimerMode::Countdown,
            TimerPolicy::CountUp => TimerMode::CountUp,
        }
    }

    pub fn target(&self) -> Option<u64> {
        match self {
            TimerPolicy::Countdown {
                target_duration_seconds,
            } => Some(*target_duration_seconds),
            TimerPolicy::CountUp => None,
        }
    }

    /// Remaining seconds, saturating at zero. `None` for count-up.
    pub fn remaining(&self, elapsed: u64) -> Option<u64> {
        self.target().map(|target| target.saturating_sub(elapsed))
    }

    /// The value a consumer renders: remaining for countdown, elapsed for
    /// count-up.
    pub fn display_seconds(&self, elapsed: u64) -> u64 {
        self.remaining(elapsed).unwrap_or(elapsed)
    }

    /// Whether the session finishes on its own at this elapsed time.
    pub fn is_complete(&self, elapsed: u64) -> bool {
        match self.remaining(elapsed) {
            Some(remaining) => remaining == 0,
            None => false,
        }
    }

    /// Duration to report for an automatic completion.
    pub fn completion_duration(&self, elapsed: u64, overrun: OverrunPolicy) -> u64 {
        match (overrun, self.target()) {
            (OverrunPolicy::ClampToTarget, Some(target)) => elapsed.min(target),
            _ => elapsed,
        }
    }
}
