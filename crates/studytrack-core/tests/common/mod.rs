//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use studytrack_core::{
    GatewayError, ManualClock, MemorySnapshotStore, SessionGateway, SessionType, TimerEngine,
    TimerMode,
};
use tokio::sync::Notify;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCall {
    pub session_type: SessionType,
    pub topic_id: Option<i64>,
    pub notes: Option<String>,
}

/// In-process gateway that records every call.
#[derive(Default)]
pub struct RecordingGateway {
    next_id: AtomicI64,
    starts: Mutex<Vec<StartCall>>,
    ends: Mutex<Vec<(i64, u64)>>,
    fail_start: AtomicBool,
    fail_end: AtomicBool,
    start_gate: Option<Arc<Notify>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(100),
            ..Self::default()
        }
    }

    /// Start calls wait for `gate` to be notified before answering.
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            start_gate: Some(gate),
            ..Self::new()
        }
    }

    pub fn fail_starts(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub fn fail_ends(&self) {
        self.fail_end.store(true, Ordering::SeqCst);
    }

    pub fn starts(&self) -> Vec<StartCall> {
        self.starts.lock().unwrap().clone()
    }

    pub fn ends(&self) -> Vec<(i64, u64)> {
        self.ends.lock().unwrap().clone()
    }
}

impl SessionGateway for RecordingGateway {
    async fn start(
        &self,
        session_type: SessionType,
        topic_id: Option<i64>,
        notes: Option<String>,
    ) -> Result<i64, GatewayError> {
        if let Some(gate) = &self.start_gate {
            gate.notified().await;
        }
        self.starts.lock().unwrap().push(StartCall {
            session_type,
            topic_id,
            notes,
        });
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport {
                endpoint: "session/start".into(),
                message: "connection refused".into(),
            });
        }
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn end(&self, remote_session_id: i64, duration_seconds: u64) -> Result<(), GatewayError> {
        self.ends
            .lock()
            .unwrap()
            .push((remote_session_id, duration_seconds));
        if self.fail_end.load(Ordering::SeqCst) {
            return Err(GatewayError::Status {
                endpoint: "session/end".into(),
                status: 503,
                body: "maintenance".into(),
            });
        }
        Ok(())
    }
}

pub struct Harness {
    pub clock: ManualClock,
    pub store: MemorySnapshotStore,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            clock: ManualClock::new(t0()),
            store: MemorySnapshotStore::new(),
        }
    }

    /// A fresh engine over the shared clock and store, as after a reload.
    pub fn engine(&self, mode: TimerMode) -> TimerEngine {
        TimerEngine::new(
            mode,
            Arc::new(self.clock.clone()),
            Box::new(self.store.clone()),
        )
    }
}
