//! Remote study-session API.
//!
//! The engine never talks HTTP itself: it hands a [`SessionGateway`] the
//! requests it needs and reacts to the answers.

mod http;

pub use http::HttpSessionGateway;

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::timer::TimerMode;

/// Remote session kind, sent as an integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionType {
    /// Countdown timer sessions.
    Pomodoro,
    /// Count-up timer sessions.
    Normal,
}

impl SessionType {
    pub fn code(&self) -> u8 {
        match self {
            SessionType::Pomodoro => 1,
            SessionType::Normal => 2,
        }
    }
}

impl From<TimerMode> for SessionType {
    fn from(mode: TimerMode) -> Self {
        match mode {
            TimerMode::Countdown => SessionType::Pomodoro,
            TimerMode::CountUp => SessionType::Normal,
        }
    }
}

/// Opens and closes tracked study sessions on the backend.
///
/// Methods return `impl Future + Send` so a driver can spawn the calls on
/// a tokio runtime while it keeps ticking.
pub trait SessionGateway: Send + Sync {
    /// Open a session and return its remote id.
    fn start(
        &self,
        session_type: SessionType,
        topic_id: Option<i64>,
        notes: Option<String>,
    ) -> impl Future<Output = Result<i64, GatewayError>> + Send;

    /// Close a session with its total tracked duration.
    fn end(
        &self,
        remote_session_id: i64,
        duration_seconds: u64,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;
}
