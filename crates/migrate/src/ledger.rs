//! Migrations-applied ledger
//!
//! A table recording which migration documents were applied, with the
//! checksum of the document and the batch it was applied in.

use chrono::{DateTime, Utc};
use serde::Serialize;

use sqlpush_core::config::{ConfigValidator, IdentifierValidator};
use sqlpush_core::{ConfigResult, LedgerSettings};

use crate::outcome::ExecutionReport;

/// A ledger row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub id: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
    pub batch: i32,
    /// Statements that succeeded when the script was recorded
    pub statements: i32,
    /// Statements skipped as already present
    pub skipped: i32,
}

impl LedgerEntry {
    /// Entry for a finished run
    pub fn from_report(report: &ExecutionReport, batch: i32) -> Self {
        Self {
            id: report.script_id.clone(),
            checksum: report.checksum.clone(),
            applied_at: Utc::now(),
            batch,
            statements: i32::try_from(report.succeeded).unwrap_or(i32::MAX),
            skipped: i32::try_from(report.skipped).unwrap_or(i32::MAX),
        }
    }
}

/// Ledger table location and the SQL to maintain it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    table: String,
}

impl Ledger {
    /// The table name must be a plain (optionally schema-qualified) identifier
    pub fn new(table: impl Into<String>) -> ConfigResult<Self> {
        let table = table.into();
        IdentifierValidator::new("ledger.table").validate(table.as_str())?;
        Ok(Self { table })
    }

    /// Ledger from settings, `None` when disabled
    pub fn from_settings(settings: &LedgerSettings) -> ConfigResult<Option<Self>> {
        if settings.enabled {
            Self::new(settings.table.clone()).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// SQL to create the ledger table
    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                id TEXT PRIMARY KEY,\n    \
                checksum TEXT NOT NULL,\n    \
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now(),\n    \
                batch INTEGER NOT NULL,\n    \
                statements INTEGER NOT NULL,\n    \
                skipped INTEGER NOT NULL\n\
            )",
            self.table
        )
    }

    /// SQL to fetch one entry, `$1` = id
    pub fn select_entry_sql(&self) -> String {
        format!(
            "SELECT id, checksum, applied_at, batch, statements, skipped FROM {} WHERE id = $1",
            self.table
        )
    }

    /// SQL to record an entry, replacing an older row for the same id
    pub fn upsert_entry_sql(&self) -> String {
        format!(
            "INSERT INTO {} (id, checksum, applied_at, batch, statements, skipped) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (id) DO UPDATE SET \
             checksum = EXCLUDED.checksum, applied_at = EXCLUDED.applied_at, \
             batch = EXCLUDED.batch, statements = EXCLUDED.statements, skipped = EXCLUDED.skipped",
            self.table
        )
    }

    /// SQL to get the latest batch number
    pub fn latest_batch_sql(&self) -> String {
        format!("SELECT COALESCE(MAX(batch), 0) FROM {}", self.table)
    }

    /// SQL to list entries
    pub fn list_entries_sql(&self) -> String {
        format!(
            "SELECT id, checksum, applied_at, batch, statements, skipped FROM {} \
             ORDER BY batch DESC, applied_at DESC",
            self.table
        )
    }
}

/// What the ledger says about a script about to be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerState {
    NotApplied,
    Applied(LedgerEntry),
    /// Recorded under the same id with a different checksum
    Changed(LedgerEntry),
}

impl LedgerState {
    pub fn of(entry: Option<LedgerEntry>, checksum: &str) -> Self {
        match entry {
            None => LedgerState::NotApplied,
            Some(entry) if entry.checksum == checksum => LedgerState::Applied(entry),
            Some(entry) => LedgerState::Changed(entry),
        }
    }
}
