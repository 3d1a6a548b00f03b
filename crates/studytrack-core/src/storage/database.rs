//! SQLite-based snapshot and history storage.
//!
//! Provides persistent storage for:
//! - The live timer snapshot, one row per timer mode
//! - A local history of session ends and whether the backend accepted them

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::data_dir;
use super::migrations;
use super::snapshot_store::SnapshotStore;
use crate::error::PersistenceError;
use crate::timer::{EndReason, SessionEnd, TimerMode, TimerSnapshot};

/// Whether the backend recorded a session end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndOutcome {
    Acknowledged,
    Failed,
}

impl EndOutcome {
    fn as_str(self) -> &'static str {
        match self {
            EndOutcome::Acknowledged => "acknowledged",
            EndOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: i64,
    pub remote_session_id: i64,
    pub mode: TimerMode,
    pub duration_seconds: u64,
    pub reason: EndReason,
    pub outcome: EndOutcome,
    pub error: Option<String>,
    pub ended_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTotals {
    pub sessions: u64,
    pub acknowledged_sessions: u64,
    pub failed_sessions: u64,
    /// Seconds the backend has on record.
    pub acknowledged_seconds: u64,
    /// Seconds tracked locally that never reached the backend.
    pub lost_seconds: u64,
}

fn reason_str(reason: EndReason) -> &'static str {
    match reason {
        EndReason::Stopped => "stopped",
        EndReason::Completed => "completed",
        EndReason::Recovered => "recovered",
    }
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

fn parse_mode(column: usize, raw: &str) -> Result<TimerMode, rusqlite::Error> {
    TimerMode::ALL
        .into_iter()
        .find(|mode| mode.as_str() == raw)
        .ok_or_else(|| conversion_error(column, format!("unknown timer mode '{raw}'")))
}

fn parse_reason(column: usize, raw: &str) -> Result<EndReason, rusqlite::Error> {
    match raw {
        "stopped" => Ok(EndReason::Stopped),
        "completed" => Ok(EndReason::Completed),
        "recovered" => Ok(EndReason::Recovered),
        other => Err(conversion_error(column, format!("unknown end reason '{other}'"))),
    }
}

fn parse_outcome(column: usize, raw: &str) -> Result<EndOutcome, rusqlite::Error> {
    match raw {
        "acknowledged" => Ok(EndOutcome::Acknowledged),
        "failed" => Ok(EndOutcome::Failed),
        other => Err(conversion_error(column, format!("unknown outcome '{other}'"))),
    }
}

fn parse_timestamp(column: usize, raw: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e.to_string()))
}

/// SQLite database for snapshots and session history.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Get a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open the database at `~/.config/studytrack/studytrack.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, PersistenceError> {
        let dir = data_dir().map_err(|e| PersistenceError::Unavailable(e.to_string()))?;
        Self::open_at(&dir.join("studytrack.db"))
    }

    pub fn open_at(path: &Path) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path).map_err(|source| PersistenceError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), rusqlite::Error> {
        migrations::migrate(&self.conn)
    }

    /// Record a session end and whether the backend accepted it.
    ///
    /// `error` is the gateway failure, if any; it decides the outcome.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub fn record_session_end(
        &self,
        end: &SessionEnd,
        error: Option<&str>,
    ) -> Result<i64, PersistenceError> {
        let outcome = if error.is_some() {
            EndOutcome::Failed
        } else {
            EndOutcome::Acknowledged
        };
        self.conn.execute(
            "INSERT INTO session_history
                (remote_session_id, mode, duration_seconds, reason, outcome, error, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                end.remote_session_id,
                end.mode.as_str(),
                end.duration_seconds,
                reason_str(end.reason),
                outcome.as_str(),
                error,
                end.ended_at.to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent session ends first.
    pub fn recent_sessions(&self, limit: usize) -> Result<Vec<SessionRecord>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, remote_session_id, mode, duration_seconds, reason, outcome, error, ended_at
             FROM session_history
             ORDER BY ended_at DESC, id DESC
             LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], |row| {
            Ok(SessionRecord {
                id: row.get(0)?,
                remote_session_id: row.get(1)?,
                mode: parse_mode(2, &row.get::<_, String>(2)?)?,
                duration_seconds: row.get(3)?,
                reason: parse_reason(4, &row.get::<_, String>(4)?)?,
                outcome: parse_outcome(5, &row.get::<_, String>(5)?)?,
                error: row.get(6)?,
                ended_at: parse_timestamp(7, &row.get::<_, String>(7)?)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn totals(&self) -> Result<HistoryTotals, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT outcome, COUNT(*), COALESCE(SUM(duration_seconds), 0)
             FROM session_history
             GROUP BY outcome",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u64>(1)?,
                row.get::<_, u64>(2)?,
            ))
        })?;

        let mut totals = HistoryTotals::default();
        for row in rows {
            let (outcome, count, seconds) = row?;
            totals.sessions += count;
            match parse_outcome(0, &outcome)? {
                EndOutcome::Acknowledged => {
                    totals.acknowledged_sessions += count;
                    totals.acknowledged_seconds += seconds;
                }
                EndOutcome::Failed => {
                    totals.failed_sessions += count;
                    totals.lost_seconds += seconds;
                }
            }
        }
        Ok(totals)
    }
}

impl SnapshotStore for Database {
    fn save(&mut self, snapshot: &TimerSnapshot) -> Result<(), PersistenceError> {
        let payload = serde_json::to_string(snapshot)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO timer_snapshots (mode, payload, updated_at)
             VALUES (?1, ?2, ?3)",
            params![snapshot.mode.as_str(), payload, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn load(&self, mode: TimerMode) -> Result<Option<TimerSnapshot>, PersistenceError> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM timer_snapshots WHERE mode = ?1",
                params![mode.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(payload) = payload else {
            return Ok(None);
        };
        let snapshot: TimerSnapshot = serde_json::from_str(&payload)
            .map_err(|e| PersistenceError::Corrupt(format!("{mode} slot: {e}")))?;
        Ok(Some(snapshot))
    }

    fn clear(&mut self, mode: TimerMode) -> Result<(), PersistenceError> {
        self.conn.execute(
            "DELETE FROM timer_snapshots WHERE mode = ?1",
            params![mode.as_str()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TimerStatus;
    use chrono::TimeZone;

    fn end(id: i64, seconds: u64, minute: u32) -> SessionEnd {
        SessionEnd {
            remote_session_id: id,
            mode: TimerMode::Countdown,
            duration_seconds: seconds,
            reason: EndReason::Completed,
            ended_at: Utc.with_ymd_and_hms(2026, 3, 2, 9, minute, 0).unwrap(),
        }
    }

    fn running_snapshot() -> TimerSnapshot {
        TimerSnapshot {
            mode: TimerMode::CountUp,
            status: TimerStatus::Running,
            remote_session_id: 42,
            start_timestamp: Some(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()),
            accumulated_seconds: 120,
            target_duration_seconds: None,
            topic_id: Some(7),
            notes: Some("linear algebra".into()),
        }
    }

    #[test]
    fn snapshot_slot_round_trip() {
        let mut db = Database::open_memory().unwrap();
        assert!(db.load(TimerMode::CountUp).unwrap().is_none());

        db.save(&running_snapshot()).unwrap();
        assert_eq!(db.load(TimerMode::CountUp).unwrap(), Some(running_snapshot()));
        assert!(db.load(TimerMode::Countdown).unwrap().is_none());

        db.clear(TimerMode::CountUp).unwrap();
        assert!(db.load(TimerMode::CountUp).unwrap().is_none());
    }

    #[test]
    fn save_overwrites_slot() {
        let mut db = Database::open_memory().unwrap();
        db.save(&running_snapshot()).unwrap();
        let mut paused = running_snapshot();
        paused.status = TimerStatus::Paused;
        paused.start_timestamp = None;
        db.save(&paused).unwrap();

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM timer_snapshots", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(db.load(TimerMode::CountUp).unwrap(), Some(paused));
    }

    #[test]
    fn unparseable_payload_is_corrupt() {
        let db = Database::open_memory().unwrap();
        db.conn()
            .execute(
                "INSERT INTO timer_snapshots (mode, payload, updated_at) VALUES ('countdown', 'oops', '')",
                [],
            )
            .unwrap();
        assert!(matches!(
            db.load(TimerMode::Countdown),
            Err(PersistenceError::Corrupt(_))
        ));
    }

    #[test]
    fn record_and_query_history() {
        let db = Database::open_memory().unwrap();
        db.record_session_end(&end(1, 1500, 25), None).unwrap();
        db.record_session_end(&end(2, 650, 40), Some("HTTP 500")).unwrap();

        let recent = db.recent_sessions(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].remote_session_id, 2);
        assert_eq!(recent[0].outcome, EndOutcome::Failed);
        assert_eq!(recent[0].error.as_deref(), Some("HTTP 500"));
        assert_eq!(recent[1].outcome, EndOutcome::Acknowledged);
        assert_eq!(recent[1].reason, EndReason::Completed);

        assert_eq!(db.recent_sessions(1).unwrap().len(), 1);

        let totals = db.totals().unwrap();
        assert_eq!(totals.sessions, 2);
        assert_eq!(totals.acknowledged_seconds, 1500);
        assert_eq!(totals.lost_seconds, 650);
        assert_eq!(totals.failed_sessions, 1);
    }

    #[test]
    fn open_at_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("studytrack.db");
        {
            let mut db = Database::open_at(&path).unwrap();
            db.save(&running_snapshot()).unwrap();
        }
        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.load(TimerMode::CountUp).unwrap(), Some(running_snapshot()));
    }
}
