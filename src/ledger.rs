// 📒 Run Ledger - append-only audit trail of every migration run
//
// "Every change is an event": phase start, rollback points, per-module
// outcomes, rollbacks and phase completion all land in `events`.
// Identifiers synthesized by the transform land in `synthesized_ids` so a
// later phase can reconcile temporary IDs against real ones.

use crate::error::{MigrationError, Result};
use crate::transform::SynthesizedId;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ============================================================================
// EVENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    PhaseStarted,
    RollbackPointCreated,
    ModuleCompleted,
    ModuleSkipped,
    ModuleFailed,
    RollbackExecuted,
    PhaseCompleted,
    PhaseFailed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PhaseStarted => "phase_started",
            EventType::RollbackPointCreated => "rollback_point_created",
            EventType::ModuleCompleted => "module_completed",
            EventType::ModuleSkipped => "module_skipped",
            EventType::ModuleFailed => "module_failed",
            EventType::RollbackExecuted => "rollback_executed",
            EventType::PhaseCompleted => "phase_completed",
            EventType::PhaseFailed => "phase_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub event_id: String,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub phase: String,
    pub module: Option<String>,
    pub data: serde_json::Value,
}

impl LedgerEvent {
    pub fn new(
        run_id: &str,
        event_type: EventType,
        phase: &str,
        module: Option<&str>,
        data: serde_json::Value,
    ) -> Self {
        LedgerEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            timestamp: Utc::now(),
            event_type: event_type.as_str().to_string(),
            phase: phase.to_string(),
            module: module.map(str::to_string),
            data,
        }
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_ledger(conn: &Connection) -> Result<()> {
    // WAL keeps the ledger readable if a run dies mid-write
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            run_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            phase TEXT NOT NULL,
            module TEXT,
            data TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS synthesized_ids (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            phase TEXT NOT NULL,
            module TEXT NOT NULL,
            field TEXT NOT NULL,
            reference TEXT NOT NULL,
            identifier TEXT NOT NULL,
            run_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(phase, module, field, reference)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_run ON events(run_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_phase ON events(phase, timestamp)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// RUN LEDGER
// ============================================================================

pub struct RunLedger {
    conn: Connection,
    run_id: String,
}

impl RunLedger {
    /// Open (or create) the ledger file and start a new run
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| MigrationError::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        setup_ledger(&conn)?;
        Ok(RunLedger {
            conn,
            run_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn record(
        &self,
        event_type: EventType,
        phase: &str,
        module: Option<&str>,
        data: serde_json::Value,
    ) -> Result<()> {
        let event = LedgerEvent::new(&self.run_id, event_type, phase, module, data);
        self.insert_event(&event)
    }

    pub fn insert_event(&self, event: &LedgerEvent) -> Result<()> {
        let data_json = serde_json::to_string(&event.data)?;

        self.conn.execute(
            "INSERT INTO events (
                event_id, run_id, timestamp, event_type, phase, module, data
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.event_id,
                event.run_id,
                event.timestamp.to_rfc3339(),
                event.event_type,
                event.phase,
                event.module,
                data_json,
            ],
        )?;

        Ok(())
    }

    /// Events of one run, oldest first
    pub fn events_for_run(&self, run_id: &str) -> Result<Vec<LedgerEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, run_id, timestamp, event_type, phase, module, data
             FROM events
             WHERE run_id = ?1
             ORDER BY id ASC",
        )?;

        let events = stmt
            .query_map(params![run_id], |row| {
                let timestamp_str: String = row.get(2)?;
                let data_json: String = row.get(6)?;

                Ok(LedgerEvent {
                    event_id: row.get(0)?,
                    run_id: row.get(1)?,
                    timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                        .map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e))
                        })?
                        .with_timezone(&Utc),
                    event_type: row.get(3)?,
                    phase: row.get(4)?,
                    module: row.get(5)?,
                    data: serde_json::from_str(&data_json).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e))
                    })?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(events)
    }

    /// Record synthesized identifiers; re-recording the same reference is a no-op.
    /// Returns how many were new.
    pub fn record_synthesized_ids(
        &self,
        phase: &str,
        module: &str,
        ids: &[SynthesizedId],
    ) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let mut inserted = 0;

        for id in ids {
            inserted += self.conn.execute(
                "INSERT OR IGNORE INTO synthesized_ids (
                    phase, module, field, reference, identifier, run_id, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![phase, module, id.field, id.reference, id.identifier, self.run_id, now],
            )?;
        }

        if inserted > 0 {
            tracing::info!(phase, module, inserted, "recorded synthesized identifiers");
        }
        Ok(inserted)
    }

    pub fn synthesized_ids(&self, phase: &str, module: &str) -> Result<Vec<SynthesizedId>> {
        let mut stmt = self.conn.prepare(
            "SELECT field, reference, identifier
             FROM synthesized_ids
             WHERE phase = ?1 AND module = ?2
             ORDER BY id ASC",
        )?;

        let ids = stmt
            .query_map(params![phase, module], |row| {
                Ok(SynthesizedId {
                    field: row.get(0)?,
                    reference: row.get(1)?,
                    identifier: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(ids)
    }
}

// ============================================================================
// TESTS
// ============================================================================
