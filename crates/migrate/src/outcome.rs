//! Per-statement outcomes and the aggregate report of one run

use serde::Serialize;
use std::fmt;

use crate::error::DbError;
use crate::script::{MigrationScript, Statement};

/// What happened to a single statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatementOutcome {
    Succeeded { rows_affected: u64 },
    /// Idempotent skip: the target object already exists
    Skipped { reason: String },
    Failed { error: DbError },
    /// Listed by a dry run, never sent
    Pending,
}

impl StatementOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, StatementOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementRecord {
    pub ordinal: usize,
    pub line: usize,
    pub summary: String,
    #[serde(flatten)]
    pub outcome: StatementOutcome,
}

/// How the run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The transaction was committed
    Committed,
    /// The transaction was rolled back (atomic policy)
    RolledBack,
    /// The ledger already lists this script with the same checksum
    AlreadyApplied,
    /// Statements were sent one by one without a surrounding transaction
    Autocommit,
    /// Nothing was sent
    DryRun,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            RunStatus::Committed => "committed",
            RunStatus::RolledBack => "rolled back",
            RunStatus::AlreadyApplied => "already applied",
            RunStatus::Autocommit => "autocommit",
            RunStatus::DryRun => "dry run",
        };
        f.write_str(status)
    }
}

/// Aggregate result of applying one script
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub script_id: String,
    pub checksum: String,
    /// Candidate label, or the admin endpoint for HTTP runs
    pub target: String,
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub status: RunStatus,
    /// Batch number recorded in the ledger, when one was written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_batch: Option<i32>,
    /// Candidates that failed before `target` connected
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub connect_failures: Vec<String>,
    pub execution_time_ms: u128,
    pub statements: Vec<StatementRecord>,
}

impl ExecutionReport {
    pub fn new(script: &MigrationScript, target: impl Into<String>) -> Self {
        Self {
            script_id: script.id().to_string(),
            checksum: script.checksum().to_string(),
            target: target.into(),
            total: script.len(),
            succeeded: 0,
            skipped: 0,
            failed: 0,
            status: RunStatus::Committed,
            ledger_batch: None,
            connect_failures: Vec::new(),
            execution_time_ms: 0,
            statements: Vec::new(),
        }
    }

    /// Report for a dry run: every statement listed, nothing sent
    pub fn dry_run(script: &MigrationScript) -> Self {
        let mut report = Self::new(script, "dry-run");
        report.status = RunStatus::DryRun;
        for statement in script.statements() {
            report.record(statement, StatementOutcome::Pending);
        }
        report
    }

    /// Count one statement outcome
    pub fn record(&mut self, statement: &Statement, outcome: StatementOutcome) {
        match &outcome {
            StatementOutcome::Succeeded { .. } => self.succeeded += 1,
            StatementOutcome::Skipped { .. } => self.skipped += 1,
            StatementOutcome::Failed { .. } => self.failed += 1,
            StatementOutcome::Pending => {}
        }
        self.statements.push(StatementRecord {
            ordinal: statement.ordinal,
            line: statement.line,
            summary: statement.summary(),
            outcome,
        });
    }

    /// Statements attempted so far
    pub fn processed(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }

    /// No genuine failures and nothing rolled back
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.status != RunStatus::RolledBack
    }

    /// Process exit code for this report
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// One-line human readable summary
    pub fn summary(&self) -> String {
        format!(
            "{} '{}' via {}: {}/{} processed, {} succeeded, {} skipped, {} failed ({}) in {}ms",
            if self.is_success() { "Applied" } else { "FAILED" },
            self.script_id,
            self.target,
            self.processed(),
            self.total,
            self.succeeded,
            self.skipped,
            self.failed,
            self.status,
            self.execution_time_ms
        )
    }

    pub fn failures(&self) -> impl Iterator<Item = &StatementRecord> {
        self.statements
            .iter()
            .filter(|record| record.outcome.is_failure())
    }
}
