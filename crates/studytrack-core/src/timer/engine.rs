//! Timer engine implementation.
//!
//! The timer engine is a wall-clock-based state machine. It does not use
//! internal threads - the caller is responsible for calling `tick()`
//! periodically (see [`crate::service::TimerService`] for a driver).
//!
//! ## State Transitions
//!
//! ```text
//! Idle --start--> Running --pause--> Paused --resume--> Running
//! Running | Paused --stop(save) / complete / stop(discard)--> Idle
//! ```
//!
//! Every transition writes the snapshot store: a live timer is saved, an
//! idle one clears its slot. Store failures are logged and the engine keeps
//! running in memory. A slot that could not be cleared is retried on the
//! next idle tick or restore so a finished session is not replayed.
//!
//! Talking to the [`SessionGateway`] is split in two so a driver can keep
//! ticking while a request is in flight: `begin_start`/`finish_start` for
//! opening a session, and [`SessionEnd::dispatch`] for closing one after
//! local state has already been reset. The async [`TimerEngine::start`] and
//! [`TimerEngine::stop`] wrap both halves for callers that own the engine
//! exclusively.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::policy::{OverrunPolicy, TimerPolicy};
use super::snapshot::{TimerMode, TimerSnapshot, TimerStatus};
use crate::clock::{elapsed_secs, Clock};
use crate::error::{GatewayError, PersistenceError, TimerError};
use crate::events::Event;
use crate::gateway::{SessionGateway, SessionType};
use crate::storage::SnapshotStore;

/// Parameters of a new session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartConfig {
    pub topic_id: Option<i64>,
    pub notes: Option<String>,
    /// Required for countdown timers, ignored by count-up timers.
    pub target_duration_seconds: Option<u64>,
}

impl StartConfig {
    pub fn countdown_minutes(minutes: u64) -> Self {
        Self {
            target_duration_seconds: Some(minutes.saturating_mul(60)),
            ..Self::default()
        }
    }

    pub fn with_topic(mut self, topic_id: i64) -> Self {
        self.topic_id = Some(topic_id);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Correlates a gateway start response with the request that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StartTicket(u64);

/// What the gateway must be asked to open a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub ticket: StartTicket,
    pub session_type: SessionType,
    pub topic_id: Option<i64>,
    pub notes: Option<String>,
}

/// Result of feeding a gateway answer back into the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Started(Event),
    /// The ticket no longer matches the pending start; the answer was
    /// dropped.
    Discarded,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Explicit stop with save.
    Stopped,
    /// Countdown reached zero while ticking.
    Completed,
    /// Countdown ran out while no process was ticking and was completed on
    /// restore.
    Recovered,
}

/// A `SessionGateway::end` call owed to the backend. Local state has
/// already been reset when one of these exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEnd {
    pub remote_session_id: i64,
    pub mode: TimerMode,
    pub duration_seconds: u64,
    pub reason: EndReason,
    pub ended_at: DateTime<Utc>,
}

impl SessionEnd {
    /// Send the end call. Failures become [`TimerError::EndFailed`] and are
    /// not retried.
    pub async fn dispatch<G: SessionGateway>(&self, gateway: &G) -> Result<(), TimerError> {
        gateway
            .end(self.remote_session_id, self.duration_seconds)
            .await
            .map_err(|source| self.failed(source))
    }

    pub fn failed(&self, source: GatewayError) -> TimerError {
        warn!(
            remote_session_id = self.remote_session_id,
            duration_seconds = self.duration_seconds,
            error = %source,
            "session end was not recorded remotely"
        );
        TimerError::EndFailed {
            remote_session_id: self.remote_session_id,
            duration_seconds: self.duration_seconds,
            source,
        }
    }
}

/// A session that just left the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Stopped {
    pub event: Event,
    /// `None` when the session was discarded.
    pub end: Option<SessionEnd>,
}

/// Read model rendered on every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerView {
    pub mode: TimerMode,
    pub status: TimerStatus,
    /// Remaining seconds for countdown, elapsed seconds for count-up.
    pub display_seconds: u64,
    pub elapsed_seconds: u64,
    pub remaining_seconds: Option<u64>,
    pub target_duration_seconds: Option<u64>,
    pub remote_session_id: Option<i64>,
    /// A start request is waiting on the gateway.
    pub starting: bool,
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub view: TimerView,
    /// Set when this tick finished a countdown.
    pub completion: Option<Stopped>,
}

/// Result of restoring a persisted snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Restored {
    /// Nothing usable was stored.
    Empty,
    /// The session continues; carries a `SessionRecovered` event.
    Resumed(Event),
    /// The countdown ran out while nothing was ticking.
    Completed(Stopped),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    /// `high_water` is the largest segment elapsed observed so far, so a
    /// rewound clock never makes the displayed time go backwards.
    Running {
        started_at: DateTime<Utc>,
        high_water: u64,
    },
    Paused,
}

#[derive(Debug, Clone)]
struct ActiveSession {
    remote_session_id: i64,
    policy: TimerPolicy,
    accumulated_seconds: u64,
    segment: Segment,
    topic_id: Option<i64>,
    notes: Option<String>,
}

impl ActiveSession {
    fn status(&self) -> TimerStatus {
        match self.segment {
            Segment::Running { .. } => TimerStatus::Running,
            Segment::Paused => TimerStatus::Paused,
        }
    }

    /// Elapsed seconds of the current segment at `now`, never below what
    /// was already observed.
    fn segment_elapsed(&self, now: DateTime<Utc>) -> u64 {
        match self.segment {
            Segment::Running {
                started_at,
                high_water,
            } => elapsed_secs(started_at, now).unwrap_or(0).max(high_water),
            Segment::Paused => 0,
        }
    }

    fn total_elapsed(&self, now: DateTime<Utc>) -> u64 {
        self.accumulated_seconds
            .saturating_add(self.segment_elapsed(now))
    }

    /// Fold a rewound clock into the segment start so elapsed time resumes
    /// from the high-water mark instead of stalling or going negative.
    /// Returns true when the segment was rebased.
    fn observe(&mut self, now: DateTime<Utc>) -> bool {
        let Segment::Running {
            started_at,
            high_water,
        } = &mut self.segment
        else {
            return false;
        };
        match elapsed_secs(*started_at, now) {
            Some(raw) if raw >= *high_water => {
                *high_water = raw;
                false
            }
            _ => {
                let held = i64::try_from(*high_water)
                    .ok()
                    .and_then(Duration::try_seconds)
                    .unwrap_or_else(Duration::zero);
                *started_at = now.checked_sub_signed(held).unwrap_or(now);
                true
            }
        }
    }

    fn snapshot(&self) -> TimerSnapshot {
        let start_timestamp = match self.segment {
            Segment::Running { started_at, .. } => Some(started_at),
            Segment::Paused => None,
        };
        TimerSnapshot {
            mode: self.policy.mode(),
            status: self.status(),
            remote_session_id: self.remote_session_id,
            start_timestamp,
            accumulated_seconds: self.accumulated_seconds,
            target_duration_seconds: self.policy.target(),
            topic_id: self.topic_id,
            notes: self.notes.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingStart {
    ticket: StartTicket,
    policy: TimerPolicy,
    topic_id: Option<i64>,
    notes: Option<String>,
}

/// Core timer engine, one per [`TimerMode`].
///
/// Operates on wall-clock deltas -- no internal thread.
pub struct TimerEngine {
    mode: TimerMode,
    clock: Arc<dyn Clock>,
    store: Box<dyn SnapshotStore>,
    overrun: OverrunPolicy,
    session: Option<ActiveSession>,
    pending_start: Option<PendingStart>,
    next_ticket: u64,
    /// The slot still holds a session that already left the engine.
    clear_pending: bool,
}

impl TimerEngine {
    /// Create an idle engine. Call [`TimerEngine::restore`] to pick up a
    /// persisted session.
    pub fn new(mode: TimerMode, clock: Arc<dyn Clock>, store: Box<dyn SnapshotStore>) -> Self {
        Self {
            mode,
            clock,
            store,
            overrun: OverrunPolicy::default(),
            session: None,
            pending_start: None,
            next_ticket: 0,
            clear_pending: false,
        }
    }

    pub fn with_overrun_policy(mut self, overrun: OverrunPolicy) -> Self {
        self.overrun = overrun;
        self
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn mode(&self) -> TimerMode {
        self.mode
    }

    pub fn status(&self) -> TimerStatus {
        self.session
            .as_ref()
            .map(ActiveSession::status)
            .unwrap_or(TimerStatus::Idle)
    }

    /// Current reading of the engine's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn is_starting(&self) -> bool {
        self.pending_start.is_some()
    }

    pub fn remote_session_id(&self) -> Option<i64> {
        self.session.as_ref().map(|s| s.remote_session_id)
    }

    pub fn accumulated_seconds(&self) -> u64 {
        self.session
            .as_ref()
            .map(|s| s.accumulated_seconds)
            .unwrap_or(0)
    }

    /// The snapshot that is (or would be) persisted right now.
    pub fn snapshot(&self) -> Option<TimerSnapshot> {
        self.session.as_ref().map(ActiveSession::snapshot)
    }

    /// Live view at the current clock reading. Does not persist.
    pub fn view(&self) -> TimerView {
        self.view_at(self.clock.now())
    }

    fn view_at(&self, now: DateTime<Utc>) -> TimerView {
        match &self.session {
            Some(session) => {
                let elapsed = session.total_elapsed(now);
                TimerView {
                    mode: self.mode,
                    status: session.status(),
                    display_seconds: session.policy.display_seconds(elapsed),
                    elapsed_seconds: elapsed,
                    remaining_seconds: session.policy.remaining(elapsed),
                    target_duration_seconds: session.policy.target(),
                    remote_session_id: Some(session.remote_session_id),
                    starting: false,
                }
            }
            None => TimerView {
                mode: self.mode,
                status: TimerStatus::Idle,
                display_seconds: 0,
                elapsed_seconds: 0,
                remaining_seconds: None,
                target_duration_seconds: None,
                remote_session_id: None,
                starting: self.pending_start.is_some(),
            },
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Validate `config` and reserve the start. The caller must send the
    /// returned request to the gateway and hand the answer to
    /// [`TimerEngine::finish_start`].
    pub fn begin_start(&mut self, config: StartConfig) -> Result<StartRequest, TimerError> {
        if self.pending_start.is_some() {
            return Err(TimerError::StartInFlight);
        }
        if let Some(session) = &self.session {
            return Err(TimerError::InvalidTransition {
                operation: "start",
                status: session.status(),
            });
        }
        let policy = TimerPolicy::for_start(self.mode, config.target_duration_seconds)?;

        self.next_ticket += 1;
        let ticket = StartTicket(self.next_ticket);
        self.pending_start = Some(PendingStart {
            ticket,
            policy,
            topic_id: config.topic_id,
            notes: config.notes.clone(),
        });
        debug!(mode = %self.mode, ?ticket, "start requested");

        Ok(StartRequest {
            ticket,
            session_type: SessionType::from(self.mode),
            topic_id: config.topic_id,
            notes: config.notes,
        })
    }

    /// Apply the gateway's answer to a start request.
    ///
    /// On failure the engine stays idle and the error is returned as
    /// [`TimerError::Network`]. An answer for a ticket that is no longer
    /// pending is discarded.
    pub fn finish_start(
        &mut self,
        ticket: StartTicket,
        result: Result<i64, GatewayError>,
    ) -> Result<StartOutcome, TimerError> {
        let pending = match self.pending_start.take() {
            Some(pending) if pending.ticket == ticket => pending,
            other => {
                self.pending_start = other;
                match &result {
                    Ok(remote_session_id) => warn!(
                        ?ticket,
                        remote_session_id,
                        "discarding stale start response; remote session left open"
                    ),
                    Err(e) => debug!(?ticket, error = %e, "discarding stale start failure"),
                }
                return Ok(StartOutcome::Discarded);
            }
        };

        let remote_session_id = match result {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    mode = %self.mode,
                    error = %e,
                    "gateway refused to open a session; staying idle"
                );
                return Err(TimerError::Network(e));
            }
        };
        let now = self.clock.now();
        self.session = Some(ActiveSession {
            remote_session_id,
            policy: pending.policy,
            accumulated_seconds: 0,
            segment: Segment::Running {
                started_at: now,
                high_water: 0,
            },
            topic_id: pending.topic_id,
            notes: pending.notes,
        });
        // The new session owns the slot now; any stale payload is overwritten.
        self.clear_pending = false;
        self.persist();
        info!(mode = %self.mode, remote_session_id, "timer started");

        Ok(StartOutcome::Started(Event::SessionStarted {
            mode: self.mode,
            remote_session_id,
            target_duration_seconds: pending.policy.target(),
            at: now,
        }))
    }

    /// Forget an in-flight start. A late answer for it will be discarded.
    pub fn abandon_start(&mut self) -> bool {
        match self.pending_start.take() {
            Some(pending) => {
                info!(ticket = ?pending.ticket, "start abandoned");
                true
            }
            None => false,
        }
    }

    /// Open a session through `gateway` and start running.
    pub async fn start<G: SessionGateway>(
        &mut self,
        gateway: &G,
        config: StartConfig,
    ) -> Result<Event, TimerError> {
        let request = self.begin_start(config)?;
        let result = gateway
            .start(request.session_type, request.topic_id, request.notes)
            .await;
        match self.finish_start(request.ticket, result)? {
            StartOutcome::Started(event) => Ok(event),
            StartOutcome::Discarded => Err(TimerError::StartAbandoned),
        }
    }

    /// Bank the running segment. A paused timer is left alone.
    pub fn pause(&mut self) -> Result<Option<Event>, TimerError> {
        let now = self.clock.now();
        let session = self.require_session("pause")?;
        if session.segment == Segment::Paused {
            return Ok(None);
        }

        session.observe(now);
        let banked = session.segment_elapsed(now);
        session.accumulated_seconds = session.accumulated_seconds.saturating_add(banked);
        session.segment = Segment::Paused;
        let remote_session_id = session.remote_session_id;
        let accumulated_seconds = session.accumulated_seconds;
        self.persist();
        info!(remote_session_id, accumulated_seconds, "timer paused");

        Ok(Some(Event::TimerPaused {
            remote_session_id,
            accumulated_seconds,
            at: now,
        }))
    }

    /// Start a new running segment. A running timer is left alone.
    pub fn resume(&mut self) -> Result<Option<Event>, TimerError> {
        let now = self.clock.now();
        let session = self.require_session("resume")?;
        if matches!(session.segment, Segment::Running { .. }) {
            return Ok(None);
        }

        session.segment = Segment::Running {
            started_at: now,
            high_water: 0,
        };
        let remote_session_id = session.remote_session_id;
        let accumulated_seconds = session.accumulated_seconds;
        self.persist();
        info!(remote_session_id, accumulated_seconds, "timer resumed");

        Ok(Some(Event::TimerResumed {
            remote_session_id,
            accumulated_seconds,
            at: now,
        }))
    }

    /// Leave the session locally. With `discard` nothing is owed to the
    /// gateway; otherwise the returned [`SessionEnd`] must be dispatched.
    pub fn stop_local(&mut self, discard: bool) -> Result<Stopped, TimerError> {
        let now = self.clock.now();
        let mut session = self.take_session("stop")?;
        session.observe(now);

        if !discard {
            return Ok(self.finish(session, EndReason::Stopped, now));
        }

        let elapsed = session.total_elapsed(now);
        let remote_session_id = session.remote_session_id;
        self.clear_slot();
        info!(remote_session_id, elapsed, "timer discarded");
        Ok(Stopped {
            event: Event::TimerStopped {
                remote_session_id,
                duration_seconds: elapsed,
                discarded: true,
                at: now,
            },
            end: None,
        })
    }

    /// Stop with save and close the session remotely. Local state is reset
    /// even when the gateway fails; the failure is still returned.
    pub async fn stop<G: SessionGateway>(
        &mut self,
        gateway: &G,
        discard: bool,
    ) -> Result<Event, TimerError> {
        let stopped = self.stop_local(discard)?;
        if let Some(end) = &stopped.end {
            end.dispatch(gateway).await?;
        }
        Ok(stopped.event)
    }

    /// Finish a countdown as completed. Triggered by `tick` when it runs
    /// out; always reports the duration to the gateway. Count-up timers only
    /// end through [`TimerEngine::stop`].
    pub fn complete(&mut self) -> Result<Stopped, TimerError> {
        if self.mode == TimerMode::CountUp {
            return Err(TimerError::InvalidTransition {
                operation: "complete",
                status: self.status(),
            });
        }
        let now = self.clock.now();
        let mut session = self.take_session("complete")?;
        session.observe(now);
        Ok(self.finish(session, EndReason::Completed, now))
    }

    /// Advance the live view. While running this re-saves the snapshot and
    /// completes a countdown whose remaining time reached zero.
    pub fn tick(&mut self) -> Tick {
        let now = self.clock.now();
        if self.session.is_none() && self.clear_pending {
            self.clear_slot();
        }
        let complete = match self.session.as_mut() {
            Some(session) if session.segment != Segment::Paused => {
                if session.observe(now) {
                    warn!(
                        remote_session_id = session.remote_session_id,
                        "wall clock moved backwards; elapsed time held at last reading"
                    );
                }
                session.policy.is_complete(session.total_elapsed(now))
            }
            _ => {
                return Tick {
                    view: self.view_at(now),
                    completion: None,
                };
            }
        };

        if complete {
            if let Some(session) = self.session.take() {
                let target = session.policy.target();
                let stopped = self.finish(session, EndReason::Completed, now);
                return Tick {
                    view: completed_view(self.mode, target, &stopped),
                    completion: Some(stopped),
                };
            }
        }

        self.persist();
        let view = self.view_at(now);
        debug!(display_seconds = view.display_seconds, "tick");
        Tick {
            view,
            completion: None,
        }
    }

    /// Load this mode's slot and restore it.
    ///
    /// An unreadable payload is cleared. A store that cannot be read at all
    /// leaves the slot untouched for a later attempt.
    pub fn restore(&mut self) -> Result<Restored, TimerError> {
        self.ensure_restorable()?;
        if self.clear_pending && !self.clear_slot() {
            warn!(
                mode = %self.mode,
                "slot of a finished session is still stored; not restoring it"
            );
            return Ok(Restored::Empty);
        }

        let snapshot = match self.store.load(self.mode) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(Restored::Empty),
            Err(e @ (PersistenceError::Corrupt(_) | PersistenceError::Serialization(_))) => {
                warn!(mode = %self.mode, error = %e, "discarding unreadable timer snapshot");
                self.clear_slot();
                return Ok(Restored::Empty);
            }
            Err(e) => {
                warn!(
                    mode = %self.mode,
                    error = %e,
                    "could not read timer snapshot; starting idle"
                );
                return Ok(Restored::Empty);
            }
        };
        if snapshot.mode != self.mode {
            warn!(
                expected = %self.mode,
                found = %snapshot.mode,
                "slot holds another timer's snapshot; discarding"
            );
            self.clear_slot();
            return Ok(Restored::Empty);
        }
        let now = self.clock.now();
        self.restore_from_snapshot(snapshot, now)
    }

    /// Reconstruct state from `snapshot` as if the timer had been ticking
    /// since it was written.
    ///
    /// A running countdown that ran out in the meantime is completed at
    /// once with reason [`EndReason::Recovered`]. Invalid snapshots are
    /// cleared and leave the engine idle.
    pub fn restore_from_snapshot(
        &mut self,
        snapshot: TimerSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Restored, TimerError> {
        self.ensure_restorable()?;
        if snapshot.mode != self.mode {
            warn!(
                expected = %self.mode,
                found = %snapshot.mode,
                "snapshot belongs to another timer; ignoring"
            );
            return Ok(Restored::Empty);
        }
        if let Err(e) = snapshot.validate() {
            warn!(mode = %self.mode, error = %e, "discarding invalid timer snapshot");
            self.clear_slot();
            return Ok(Restored::Empty);
        }

        let segment = match snapshot.start_timestamp {
            Some(started_at) if started_at > now => {
                warn!(
                    remote_session_id = snapshot.remote_session_id,
                    %started_at,
                    %now,
                    "snapshot starts in the future; clock was rewound, restarting segment now"
                );
                Segment::Running {
                    started_at: now,
                    high_water: 0,
                }
            }
            Some(started_at) => Segment::Running {
                started_at,
                high_water: 0,
            },
            None => Segment::Paused,
        };
        let mut session = ActiveSession {
            remote_session_id: snapshot.remote_session_id,
            policy: TimerPolicy::restored(snapshot.mode, snapshot.target_duration_seconds),
            accumulated_seconds: snapshot.accumulated_seconds,
            segment,
            topic_id: snapshot.topic_id,
            notes: snapshot.notes,
        };
        session.observe(now);
        let elapsed = session.total_elapsed(now);
        let status = session.status();

        if status == TimerStatus::Running && session.policy.is_complete(elapsed) {
            info!(
                remote_session_id = snapshot.remote_session_id,
                elapsed, "countdown ran out while offline; completing"
            );
            return Ok(Restored::Completed(self.finish(session, EndReason::Recovered, now)));
        }

        self.session = Some(session);
        self.persist();
        info!(
            remote_session_id = snapshot.remote_session_id,
            %status,
            elapsed,
            "timer session recovered"
        );
        Ok(Restored::Resumed(Event::SessionRecovered {
            remote_session_id: snapshot.remote_session_id,
            status,
            accumulated_seconds: snapshot.accumulated_seconds,
            at: now,
        }))
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn ensure_restorable(&self) -> Result<(), TimerError> {
        if self.pending_start.is_some() {
            return Err(TimerError::StartInFlight);
        }
        match &self.session {
            Some(session) => Err(TimerError::InvalidTransition {
                operation: "restore",
                status: session.status(),
            }),
            None => Ok(()),
        }
    }

    fn require_session(
        &mut self,
        operation: &'static str,
    ) -> Result<&mut ActiveSession, TimerError> {
        self.session
            .as_mut()
            .ok_or(TimerError::InvalidTransition {
                operation,
                status: TimerStatus::Idle,
            })
    }

    fn take_session(&mut self, operation: &'static str) -> Result<ActiveSession, TimerError> {
        self.session.take().ok_or(TimerError::InvalidTransition {
            operation,
            status: TimerStatus::Idle,
        })
    }

    /// Clear the slot for a session already taken out of the engine and
    /// build the end owed to the gateway.
    fn finish(&mut self, session: ActiveSession, reason: EndReason, now: DateTime<Utc>) -> Stopped {
        self.clear_slot();

        let elapsed = session.total_elapsed(now);
        let duration_seconds = match reason {
            EndReason::Stopped => elapsed,
            EndReason::Completed | EndReason::Recovered => {
                session.policy.completion_duration(elapsed, self.overrun)
            }
        };
        let remote_session_id = session.remote_session_id;
        info!(remote_session_id, duration_seconds, ?reason, "timer session finished");

        let event = match reason {
            EndReason::Stopped => Event::TimerStopped {
                remote_session_id,
                duration_seconds,
                discarded: false,
                at: now,
            },
            EndReason::Completed | EndReason::Recovered => Event::TimerCompleted {
                remote_session_id,
                duration_seconds,
                reason,
                at: now,
            },
        };
        Stopped {
            event,
            end: Some(SessionEnd {
                remote_session_id,
                mode: self.mode,
                duration_seconds,
                reason,
                ended_at: now,
            }),
        }
    }

    fn persist(&mut self) {
        let Some(snapshot) = self.snapshot() else {
            self.clear_slot();
            return;
        };
        match self.store.save(&snapshot) {
            Ok(()) => self.clear_pending = false,
            Err(e) => {
                warn!(
                    mode = %self.mode,
                    error = %e,
                    "failed to save timer snapshot; continuing in memory"
                );
            }
        }
    }

    /// Returns whether the slot is now empty.
    fn clear_slot(&mut self) -> bool {
        match self.store.clear(self.mode) {
            Ok(()) => {
                self.clear_pending = false;
                true
            }
            Err(e) => {
                warn!(
                    mode = %self.mode,
                    error = %e,
                    "failed to clear timer snapshot; a reload before the next retry replays it"
                );
                self.clear_pending = true;
                false
            }
        }
    }
}

/// View reported by the tick that finished a countdown.
fn completed_view(mode: TimerMode, target: Option<u64>, stopped: &Stopped) -> TimerView {
    let (remote_session_id, elapsed_seconds) = match &stopped.end {
        Some(end) => (Some(end.remote_session_id), end.duration_seconds),
        None => (None, 0),
    };
    TimerView {
        mode,
        status: TimerStatus::Completed,
        display_seconds: 0,
        elapsed_seconds,
        remaining_seconds: Some(0),
        target_duration_seconds: target,
        remote_session_id,
        starting: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemorySnapshotStore;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn engine(mode: TimerMode) -> (TimerEngine, ManualClock, MemorySnapshotStore) {
        let clock = ManualClock::new(t0());
        let store = MemorySnapshotStore::new();
        let engine = TimerEngine::new(mode, Arc::new(clock.clone()), Box::new(store.clone()));
        (engine, clock, store)
    }

    fn started(engine: &mut TimerEngine, config: StartConfig, remote_session_id: i64) -> Event {
        let request = engine.begin_start(config).unwrap();
        match engine.finish_start(request.ticket, Ok(remote_session_id)).unwrap() {
            StartOutcome::Started(event) => event,
            StartOutcome::Discarded => panic!("start was discarded"),
        }
    }

    #[test]
    fn start_runs_and_persists() {
        let (mut engine, _clock, store) = engine(TimerMode::Countdown);
        let event = started(&mut engine, StartConfig::countdown_minutes(25).with_topic(3), 11);

        assert!(matches!(
            event,
            Event::SessionStarted {
                remote_session_id: 11,
                target_duration_seconds: Some(1500),
                ..
            }
        ));
        assert_eq!(engine.status(), TimerStatus::Running);
        let saved = store.load(TimerMode::Countdown).unwrap().unwrap();
        assert_eq!(saved.start_timestamp, Some(t0()));
        assert_eq!(saved.accumulated_seconds, 0);
        assert_eq!(saved.topic_id, Some(3));
    }

    #[test]
    fn begin_start_reports_session_type() {
        let (mut engine, _clock, _store) = engine(TimerMode::CountUp);
        let request = engine.begin_start(StartConfig::default().with_notes("ch. 2")).unwrap();
        assert_eq!(request.session_type, SessionType::Normal);
        assert_eq!(request.notes.as_deref(), Some("ch. 2"));
        assert!(engine.is_starting());
        assert!(engine.view().starting);
    }

    #[test]
    fn invalid_target_changes_nothing() {
        let (mut engine, _clock, store) = engine(TimerMode::Countdown);
        let err = engine.begin_start(StartConfig::countdown_minutes(0)).unwrap_err();
        assert!(matches!(err, TimerError::Validation(_)));
        assert!(!engine.is_starting());
        assert!(store.is_empty());
    }

    #[test]
    fn gateway_failure_leaves_engine_idle() {
        let (mut engine, _clock, store) = engine(TimerMode::CountUp);
        let request = engine.begin_start(StartConfig::default()).unwrap();
        let err = engine
            .finish_start(
                request.ticket,
                Err(GatewayError::Transport {
                    endpoint: "session/start".into(),
                    message: "connection refused".into(),
                }),
            )
            .unwrap_err();
        assert!(matches!(err, TimerError::Network(_)));
        assert_eq!(engine.status(), TimerStatus::Idle);
        assert!(!engine.is_starting());
        assert!(store.is_empty());
    }

    #[test]
    fn second_start_while_pending_is_rejected() {
        let (mut engine, _clock, _store) = engine(TimerMode::CountUp);
        engine.begin_start(StartConfig::default()).unwrap();
        assert!(matches!(
            engine.begin_start(StartConfig::default()),
            Err(TimerError::StartInFlight)
        ));
    }

    #[test]
    fn start_while_running_is_invalid() {
        let (mut engine, _clock, _store) = engine(TimerMode::CountUp);
        started(&mut engine, StartConfig::default(), 1);
        assert!(matches!(
            engine.begin_start(StartConfig::default()),
            Err(TimerError::InvalidTransition {
                operation: "start",
                status: TimerStatus::Running
            })
        ));
    }

    #[test]
    fn abandoned_start_discards_late_answer() {
        let (mut engine, _clock, store) = engine(TimerMode::CountUp);
        let request = engine.begin_start(StartConfig::default()).unwrap();
        assert!(engine.abandon_start());
        assert!(!engine.abandon_start());

        let outcome = engine.finish_start(request.ticket, Ok(5)).unwrap();
        assert_eq!(outcome, StartOutcome::Discarded);
        assert_eq!(engine.status(), TimerStatus::Idle);
        assert!(store.is_empty());
    }

    #[test]
    fn stale_ticket_does_not_clobber_newer_start() {
        let (mut engine, _clock, _store) = engine(TimerMode::CountUp);
        let first = engine.begin_start(StartConfig::default()).unwrap();
        engine.abandon_start();
        let second = engine.begin_start(StartConfig::default()).unwrap();

        assert_eq!(
            engine.finish_start(first.ticket, Ok(1)).unwrap(),
            StartOutcome::Discarded
        );
        assert!(engine.is_starting());
        assert!(matches!(
            engine.finish_start(second.ticket, Ok(2)).unwrap(),
            StartOutcome::Started(_)
        ));
        assert_eq!(engine.remote_session_id(), Some(2));
    }

    #[test]
    fn pause_and_resume_are_idempotent() {
        let (mut engine, clock, _store) = engine(TimerMode::CountUp);
        started(&mut engine, StartConfig::default(), 1);

        clock.advance_secs(30);
        assert!(engine.pause().unwrap().is_some());
        assert!(engine.pause().unwrap().is_none());
        assert_eq!(engine.accumulated_seconds(), 30);

        clock.advance_secs(100);
        assert!(engine.resume().unwrap().is_some());
        assert!(engine.resume().unwrap().is_none());
        clock.advance_secs(5);
        assert_eq!(engine.view().elapsed_seconds, 35);
    }

    #[test]
    fn pause_while_idle_fails_loudly() {
        let (mut engine, _clock, _store) = engine(TimerMode::CountUp);
        assert!(matches!(
            engine.pause(),
            Err(TimerError::InvalidTransition {
                operation: "pause",
                status: TimerStatus::Idle
            })
        ));
        assert!(engine.resume().is_err());
        assert!(engine.stop_local(false).is_err());
        assert!(engine.complete().is_err());
    }

    #[test]
    fn countdown_view_counts_down() {
        let (mut engine, clock, _store) = engine(TimerMode::Countdown);
        started(&mut engine, StartConfig::countdown_minutes(10), 1);
        clock.advance_secs(45);

        let tick = engine.tick();
        assert_eq!(tick.view.display_seconds, 555);
        assert_eq!(tick.view.remaining_seconds, Some(555));
        assert_eq!(tick.view.elapsed_seconds, 45);
        assert!(tick.completion.is_none());
    }

    #[test]
    fn count_up_never_completes() {
        let (mut engine, clock, _store) = engine(TimerMode::CountUp);
        started(&mut engine, StartConfig::default(), 1);
        clock.advance_secs(10 * 3600);
        let tick = engine.tick();
        assert!(tick.completion.is_none());
        assert_eq!(tick.view.display_seconds, 36_000);
    }

    #[test]
    fn tick_completes_countdown() {
        let (mut engine, clock, store) = engine(TimerMode::Countdown);
        started(&mut engine, StartConfig::countdown_minutes(1), 9);
        clock.advance_secs(60);

        let tick = engine.tick();
        assert_eq!(tick.view.status, TimerStatus::Completed);
        assert_eq!(tick.view.display_seconds, 0);
        let end = tick.completion.unwrap().end.unwrap();
        assert_eq!(end.remote_session_id, 9);
        assert_eq!(end.duration_seconds, 60);
        assert_eq!(end.reason, EndReason::Completed);
        assert_eq!(engine.status(), TimerStatus::Idle);
        assert!(store.is_empty());
    }

    #[test]
    fn paused_countdown_does_not_complete() {
        let (mut engine, clock, _store) = engine(TimerMode::Countdown);
        started(&mut engine, StartConfig::countdown_minutes(1), 1);
        clock.advance_secs(59);
        engine.pause().unwrap();
        clock.advance_secs(600);
        assert!(engine.tick().completion.is_none());
        assert_eq!(engine.status(), TimerStatus::Paused);
    }

    #[test]
    fn discard_owes_nothing() {
        let (mut engine, clock, store) = engine(TimerMode::CountUp);
        started(&mut engine, StartConfig::default(), 4);
        clock.advance_secs(70);

        let stopped = engine.stop_local(true).unwrap();
        assert!(stopped.end.is_none());
        assert!(matches!(
            stopped.event,
            Event::TimerStopped {
                discarded: true,
                duration_seconds: 70,
                ..
            }
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn rewound_clock_holds_elapsed_time() {
        let (mut engine, clock, store) = engine(TimerMode::CountUp);
        started(&mut engine, StartConfig::default(), 1);
        clock.advance_secs(100);
        assert_eq!(engine.tick().view.elapsed_seconds, 100);

        clock.advance_secs(-40);
        assert_eq!(engine.tick().view.elapsed_seconds, 100);

        clock.advance_secs(10);
        assert_eq!(engine.tick().view.elapsed_seconds, 110);
        let saved = store.load(TimerMode::CountUp).unwrap().unwrap();
        assert_eq!(saved.start_timestamp, Some(clock.now() - Duration::seconds(110)));
    }

    #[test]
    fn clamp_policy_caps_overrun() {
        let (engine, clock, _store) = engine(TimerMode::Countdown);
        let mut engine = engine.with_overrun_policy(OverrunPolicy::ClampToTarget);
        started(&mut engine, StartConfig::countdown_minutes(10), 1);
        clock.advance_secs(650);
        let end = engine.tick().completion.unwrap().end.unwrap();
        assert_eq!(end.duration_seconds, 600);
    }

    #[test]
    fn restore_rejects_busy_engine() {
        let (mut engine, _clock, _store) = engine(TimerMode::CountUp);
        started(&mut engine, StartConfig::default(), 1);
        let snapshot = engine.snapshot().unwrap();
        assert!(matches!(
            engine.restore_from_snapshot(snapshot, t0()),
            Err(TimerError::InvalidTransition {
                operation: "restore",
                ..
            })
        ));
    }

    #[test]
    fn restore_ignores_other_mode() {
        let (mut engine, _clock, store) = engine(TimerMode::CountUp);
        let snapshot = TimerSnapshot {
            mode: TimerMode::Countdown,
            status: TimerStatus::Paused,
            remote_session_id: 1,
            start_timestamp: None,
            accumulated_seconds: 10,
            target_duration_seconds: Some(600),
            topic_id: None,
            notes: None,
        };
        assert_eq!(
            engine.restore_from_snapshot(snapshot, t0()).unwrap(),
            Restored::Empty
        );
        assert!(store.is_empty());
    }

    #[test]
    fn restore_restarts_future_segment_at_now() {
        let (mut engine, _clock, _store) = engine(TimerMode::CountUp);
        let snapshot = TimerSnapshot {
            mode: TimerMode::CountUp,
            status: TimerStatus::Running,
            remote_session_id: 2,
            start_timestamp: Some(t0() + Duration::seconds(300)),
            accumulated_seconds: 40,
            target_duration_seconds: None,
            topic_id: None,
            notes: None,
        };
        assert!(matches!(
            engine.restore_from_snapshot(snapshot, t0()).unwrap(),
            Restored::Resumed(_)
        ));
        assert_eq!(engine.view().elapsed_seconds, 40);
        assert_eq!(engine.snapshot().unwrap().start_timestamp, Some(t0()));
    }

    #[test]
    fn complete_is_countdown_only() {
        let (mut engine, clock, store) = engine(TimerMode::CountUp);
        started(&mut engine, StartConfig::default(), 3);
        clock.advance_secs(90);

        assert!(matches!(
            engine.complete(),
            Err(TimerError::InvalidTransition {
                operation: "complete",
                status: TimerStatus::Running
            })
        ));
        assert_eq!(engine.status(), TimerStatus::Running);
        assert!(store.load(TimerMode::CountUp).unwrap().is_some());
    }

    #[test]
    fn complete_finishes_countdown_early() {
        let (mut engine, clock, _store) = engine(TimerMode::Countdown);
        started(&mut engine, StartConfig::countdown_minutes(25), 3);
        clock.advance_secs(90);

        let end = engine.complete().unwrap().end.unwrap();
        assert_eq!(end.reason, EndReason::Completed);
        assert_eq!(end.duration_seconds, 90);
    }

    #[test]
    fn uncleared_slot_is_retried_on_idle_tick() {
        let (mut engine, clock, store) = engine(TimerMode::Countdown);
        started(&mut engine, StartConfig::countdown_minutes(10), 8);
        store.set_failing(true);
        clock.advance_secs(600);
        assert!(engine.tick().completion.is_some());
        assert!(store.raw(TimerMode::Countdown).is_some());

        // Still failing: the stale slot is not restored as a live session.
        assert_eq!(engine.restore().unwrap(), Restored::Empty);
        assert_eq!(engine.status(), TimerStatus::Idle);

        store.set_failing(false);
        engine.tick();
        assert!(store.is_empty());
    }
}
