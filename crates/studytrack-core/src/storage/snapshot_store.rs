//! Snapshot store trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::PersistenceError;
use crate::timer::{TimerMode, TimerSnapshot};

/// Timer snapshot persistence: one slot per [`TimerMode`], overwrite
/// semantics.
///
/// Survives a reload or restart but not loss of the device. The engine
/// treats every error as non-fatal.
pub trait SnapshotStore: Send {
    /// Save a snapshot, replacing whatever its mode's slot held.
    fn save(&mut self, snapshot: &TimerSnapshot) -> Result<(), PersistenceError>;
    /// Load the stored snapshot for `mode`, if any.
    fn load(&self, mode: TimerMode) -> Result<Option<TimerSnapshot>, PersistenceError>;
    /// Remove the slot for `mode`.
    fn clear(&mut self, mode: TimerMode) -> Result<(), PersistenceError>;
}

/// In-memory store holding serialized JSON, like a browser's local storage.
///
/// Clones share the same slots, so a caller can keep a handle to inspect
/// what an engine wrote, or simulate a reload by building a second engine
/// over a clone.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    slots: Arc<Mutex<HashMap<TimerMode, String>>>,
    failing: Arc<AtomicBool>,
    failing_reads: Arc<AtomicBool>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (quota exceeded, storage disabled).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make every subsequent read fail as a locked or unreachable backend
    /// would. Stored payloads are kept.
    pub fn set_failing_reads(&self, failing: bool) {
        self.failing_reads.store(failing, Ordering::SeqCst);
    }

    /// Raw stored payload for `mode`.
    pub fn raw(&self, mode: TimerMode) -> Option<String> {
        self.lock().ok()?.get(&mode).cloned()
    }

    /// Overwrite a slot with an arbitrary payload.
    pub fn put_raw(&self, mode: TimerMode, payload: impl Into<String>) {
        if let Ok(mut slots) = self.lock() {
            slots.insert(mode, payload.into());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lock().map(|slots| slots.is_empty()).unwrap_or(true)
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<TimerMode, String>>, PersistenceError> {
        self.slots
            .lock()
            .map_err(|e| PersistenceError::Unavailable(format!("snapshot slots poisoned: {e}")))
    }

    fn check_writable(&self) -> Result<(), PersistenceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("storage is read-only".into()));
        }
        Ok(())
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&mut self, snapshot: &TimerSnapshot) -> Result<(), PersistenceError> {
        self.check_writable()?;
        let payload = serde_json::to_string(snapshot)?;
        self.lock()?.insert(snapshot.mode, payload);
        Ok(())
    }

    fn load(&self, mode: TimerMode) -> Result<Option<TimerSnapshot>, PersistenceError> {
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("storage is locked".into()));
        }
        let Some(payload) = self.lock()?.get(&mode).cloned() else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&payload)?))
    }

    fn clear(&mut self, mode: TimerMode) -> Result<(), PersistenceError> {
        self.check_writable()?;
        self.lock()?.remove(&mode);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TimerStatus;

    fn paused(mode: TimerMode, id: i64) -> TimerSnapshot {
        TimerSnapshot {
            mode,
            status: TimerStatus::Paused,
            remote_session_id: id,
            start_timestamp: None,
            accumulated_seconds: 30,
            target_duration_seconds: match mode {
                TimerMode::Countdown => Some(600),
                TimerMode::CountUp => None,
            },
            topic_id: None,
            notes: None,
        }
    }

    #[test]
    fn starts_empty() {
        let store = MemorySnapshotStore::new();
        assert!(store.load(TimerMode::Countdown).unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn one_slot_per_mode() {
        let mut store = MemorySnapshotStore::new();
        store.save(&paused(TimerMode::Countdown, 1)).unwrap();
        store.save(&paused(TimerMode::CountUp, 2)).unwrap();
        store.save(&paused(TimerMode::Countdown, 3)).unwrap();

        assert_eq!(
            store.load(TimerMode::Countdown).unwrap().unwrap().remote_session_id,
            3
        );
        assert_eq!(
            store.load(TimerMode::CountUp).unwrap().unwrap().remote_session_id,
            2
        );

        store.clear(TimerMode::Countdown).unwrap();
        assert!(store.load(TimerMode::Countdown).unwrap().is_none());
        assert!(store.load(TimerMode::CountUp).unwrap().is_some());
    }

    #[test]
    fn clones_share_slots() {
        let mut store = MemorySnapshotStore::new();
        let observer = store.clone();
        store.save(&paused(TimerMode::CountUp, 9)).unwrap();
        assert!(observer.raw(TimerMode::CountUp).unwrap().contains("\"remoteSessionId\":9"));
    }

    #[test]
    fn failing_store_rejects_writes() {
        let mut store = MemorySnapshotStore::new();
        store.set_failing(true);
        assert!(matches!(
            store.save(&paused(TimerMode::CountUp, 1)),
            Err(PersistenceError::Unavailable(_))
        ));
    }

    #[test]
    fn failing_reads_keep_payload() {
        let mut store = MemorySnapshotStore::new();
        store.save(&paused(TimerMode::CountUp, 4)).unwrap();
        store.set_failing_reads(true);
        assert!(matches!(
            store.load(TimerMode::CountUp),
            Err(PersistenceError::Unavailable(_))
        ));
        assert!(store.raw(TimerMode::CountUp).is_some());

        store.set_failing_reads(false);
        assert_eq!(
            store.load(TimerMode::CountUp).unwrap().unwrap().remote_session_id,
            4
        );
    }

    #[test]
    fn garbage_payload_is_a_serialization_error() {
        let store = MemorySnapshotStore::new();
        store.put_raw(TimerMode::Countdown, "{not json");
        assert!(matches!(
            store.load(TimerMode::Countdown),
            Err(PersistenceError::Serialization(_))
        ));
    }
}
