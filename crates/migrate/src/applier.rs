//! Migration Applier - applies a script through the first reachable candidate
//!
//! Candidates are tried strictly in order, each bounded by the connect
//! timeout. The script runs inside one transaction with a savepoint around
//! every statement, so a failing statement can be rolled back on its own and
//! the rest of the batch continues.

use std::time::{Duration, Instant};

use sqlpush_core::{ConfigResult, FailurePolicy, SqlpushConfig};

use crate::candidate::ConnectionCandidate;
use crate::classify::outcome_for_error;
use crate::error::{ConnectAttempt, ConnectError, DbError, MigrateError, MigrateResult};
use crate::ledger::{Ledger, LedgerEntry, LedgerState};
use crate::outcome::{ExecutionReport, RunStatus, StatementOutcome};
use crate::script::{MigrationScript, Statement, TRANSACTION_CONTROL_REASON};
use crate::session::{Connector, Session, SessionResult};

/// Savepoint wrapped around each statement
pub const STATEMENT_SAVEPOINT: &str = "sqlpush_statement";

/// SQLSTATE for undefined_table
const UNDEFINED_TABLE: &str = "42P01";

/// Run settings for the applier
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub policy: FailurePolicy,
    pub connect_timeout: Duration,
    /// Ledger to consult and update; `None` disables it
    pub ledger: Option<Ledger>,
    /// Apply even when the ledger lists the script with the same checksum
    pub force: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            policy: FailurePolicy::default(),
            connect_timeout: Duration::from_secs(sqlpush_core::config::DEFAULT_CONNECT_TIMEOUT_SECS),
            ledger: None,
            force: false,
        }
    }
}

impl ApplyOptions {
    pub fn from_config(config: &SqlpushConfig) -> ConfigResult<Self> {
        Ok(Self {
            policy: config.policy,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            ledger: Ledger::from_settings(&config.ledger)?,
            force: false,
        })
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_ledger(mut self, ledger: Option<Ledger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// A session on the first candidate that accepted the connection
pub struct Connected<S> {
    pub session: S,
    pub candidate: String,
    /// Candidates tried before this one
    pub failures: Vec<ConnectAttempt>,
}

/// Applies migration scripts through a [`Connector`]
pub struct MigrationApplier<C: Connector> {
    connector: C,
    options: ApplyOptions,
}

impl<C: Connector> MigrationApplier<C> {
    pub fn new(connector: C, options: ApplyOptions) -> Self {
        Self { connector, options }
    }

    pub fn options(&self) -> &ApplyOptions {
        &self.options
    }

    /// Try each candidate in order and return the first open session
    pub async fn connect_first(
        &self,
        candidates: &[ConnectionCandidate],
    ) -> MigrateResult<Connected<C::Session>> {
        if candidates.is_empty() {
            tracing::error!("No connection attempted: no connection candidates are configured");
            return Err(MigrateError::NoCandidates);
        }

        let total = candidates.len();
        let mut failures = Vec::new();

        for (index, candidate) in candidates.iter().enumerate() {
            tracing::info!("Connecting [{}/{}] {}", index + 1, total, candidate);

            let error = match tokio::time::timeout(
                self.options.connect_timeout,
                self.connector.connect(candidate),
            )
            .await
            {
                Ok(Ok(session)) => {
                    tracing::info!("Connected to {}", candidate.label);
                    return Ok(Connected {
                        session,
                        candidate: candidate.label.clone(),
                        failures,
                    });
                }
                Ok(Err(error)) => error,
                Err(_) => ConnectError::Timeout {
                    secs: self.options.connect_timeout.as_secs(),
                },
            };

            tracing::warn!("Candidate {} unavailable: {}", candidate.label, error);
            failures.push(ConnectAttempt {
                candidate: candidate.label.clone(),
                error,
            });
        }

        tracing::error!("All {} connection candidate(s) failed:", total);
        for attempt in &failures {
            tracing::error!("  {}", attempt);
        }
        Err(MigrateError::AllCandidatesFailed { attempts: failures })
    }

    /// Apply a script through the first reachable candidate
    pub async fn apply(
        &self,
        script: &MigrationScript,
        candidates: &[ConnectionCandidate],
    ) -> MigrateResult<ExecutionReport> {
        let start_time = Instant::now();

        let Connected {
            mut session,
            candidate,
            failures,
        } = self.connect_first(candidates).await?;

        let mut report = ExecutionReport::new(script, candidate.as_str());
        report.connect_failures = failures.iter().map(ToString::to_string).collect();

        tracing::info!(
            "Applying '{}' ({} statements, policy {}) via {}",
            script.id(),
            script.len(),
            self.options.policy,
            candidate
        );

        session
            .begin()
            .await
            .map_err(|e| MigrateError::transaction(&candidate, e))?;

        if let Err(err) = self.run_transaction(&mut session, script, &mut report).await {
            if let Err(rollback_err) = session.rollback().await {
                tracing::warn!("Rollback after failure also failed: {}", rollback_err);
            }
            tracing::error!("Rolled back '{}': {}", script.id(), err);
            return Err(err);
        }

        report.execution_time_ms = start_time.elapsed().as_millis();
        if report.is_success() {
            tracing::info!("{}", report.summary());
        } else {
            tracing::error!("{}", report.summary());
        }
        Ok(report)
    }

    /// Ledger rows from the first reachable candidate
    pub async fn ledger_entries(
        &self,
        candidates: &[ConnectionCandidate],
    ) -> MigrateResult<(String, Vec<LedgerEntry>)> {
        let ledger = self
            .options
            .ledger
            .as_ref()
            .ok_or_else(|| MigrateError::ledger("the ledger is disabled in the configuration"))?;

        let Connected {
            mut session,
            candidate,
            ..
        } = self.connect_first(candidates).await?;

        match session.ledger_entries(ledger).await {
            Ok(entries) => Ok((candidate, entries)),
            Err(e) if e.code.as_deref() == Some(UNDEFINED_TABLE) => {
                tracing::info!("Ledger table {} does not exist yet", ledger.table());
                Ok((candidate, Vec::new()))
            }
            Err(e) => Err(MigrateError::ledger(format!(
                "failed to read {}: {}",
                ledger.table(),
                e
            ))),
        }
    }

    async fn run_transaction(
        &self,
        session: &mut C::Session,
        script: &MigrationScript,
        report: &mut ExecutionReport,
    ) -> MigrateResult<()> {
        let candidate = report.target.clone();
        let tx_err = |e: DbError| MigrateError::transaction(&candidate, e);

        if let Some(ledger) = &self.options.ledger {
            let ledger_err =
                |e: DbError| MigrateError::ledger(format!("{} on {}: {}", ledger.table(), candidate, e));
            session.ensure_ledger(ledger).await.map_err(ledger_err)?;
            let entry = session
                .ledger_entry(ledger, script.id())
                .await
                .map_err(ledger_err)?;

            match LedgerState::of(entry, script.checksum()) {
                LedgerState::Applied(entry) if !self.options.force => {
                    tracing::info!(
                        "'{}' already applied in batch {} at {}; nothing to do",
                        entry.id,
                        entry.batch,
                        entry.applied_at
                    );
                    session.commit().await.map_err(tx_err)?;
                    report.status = RunStatus::AlreadyApplied;
                    report.ledger_batch = Some(entry.batch);
                    return Ok(());
                }
                LedgerState::Applied(entry) => {
                    tracing::info!(
                        "'{}' already applied in batch {}; re-applying (forced)",
                        entry.id,
                        entry.batch
                    );
                }
                LedgerState::Changed(entry) => {
                    tracing::warn!(
                        "'{}' was applied in batch {} with checksum {}; the document changed since, applying it again",
                        entry.id,
                        entry.batch,
                        entry.checksum
                    );
                }
                LedgerState::NotApplied => {}
            }
        }

        for statement in script.statements() {
            let outcome = if statement.is_transaction_control() {
                tracing::warn!(
                    "Skipping statement {} ({}): '{}' already runs in one transaction",
                    statement.ordinal,
                    statement.summary(),
                    script.id()
                );
                StatementOutcome::Skipped {
                    reason: TRANSACTION_CONTROL_REASON.to_string(),
                }
            } else {
                tracing::debug!("Executing statement {}: {}", statement.ordinal, statement.summary());
                Self::execute_statement(session, statement)
                    .await
                    .map_err(tx_err)?
            };
            let failed = outcome.is_failure();
            report.record(statement, outcome);

            tracing::info!(
                "Progress {}/{}: {} succeeded, {} skipped, {} failed",
                report.processed(),
                report.total,
                report.succeeded,
                report.skipped,
                report.failed
            );

            if failed && self.options.policy == FailurePolicy::Atomic {
                tracing::error!(
                    "Statement {} failed under the atomic policy; rolling back '{}'",
                    statement.ordinal,
                    script.id()
                );
                session.rollback().await.map_err(tx_err)?;
                report.status = RunStatus::RolledBack;
                return Ok(());
            }
        }

        if let Some(ledger) = &self.options.ledger {
            if report.failed == 0 {
                let ledger_err =
                    |e: DbError| MigrateError::ledger(format!("{} on {}: {}", ledger.table(), candidate, e));
                let batch = session.next_batch(ledger).await.map_err(ledger_err)?;
                let entry = LedgerEntry::from_report(report, batch);
                session
                    .record_ledger(ledger, &entry)
                    .await
                    .map_err(ledger_err)?;
                report.ledger_batch = Some(batch);
            } else {
                tracing::warn!(
                    "Not recording '{}' in {}: {} statement(s) failed",
                    script.id(),
                    ledger.table(),
                    report.failed
                );
            }
        }

        session.commit().await.map_err(tx_err)?;
        report.status = RunStatus::Committed;
        Ok(())
    }

    /// Run one statement under a savepoint. `Err` means the session itself
    /// failed; statement errors come back as an outcome.
    async fn execute_statement(
        session: &mut C::Session,
        statement: &Statement,
    ) -> SessionResult<StatementOutcome> {
        session.savepoint(STATEMENT_SAVEPOINT).await?;
        match session.execute(&statement.sql).await {
            Ok(rows_affected) => {
                session.release_savepoint(STATEMENT_SAVEPOINT).await?;
                Ok(StatementOutcome::Succeeded { rows_affected })
            }
            Err(error) => {
                session.rollback_to_savepoint(STATEMENT_SAVEPOINT).await?;
                session.release_savepoint(STATEMENT_SAVEPOINT).await?;
                Ok(outcome_for_error(statement, error))
            }
        }
    }
}
