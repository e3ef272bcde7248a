//! Applier behaviour against an in-memory database

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sqlpush_core::FailurePolicy;
use sqlpush_migrate::{
    ApplyOptions, ConnectError, ConnectionCandidate, Connector, DbError, Ledger, LedgerEntry,
    MigrateError, MigrationApplier, MigrationScript, RunStatus, Session, SessionResult,
    StatementOutcome, TRANSACTION_CONTROL_REASON,
};

const EXAMPLE_DOCUMENT: &str = "CREATE TABLE a (id int); -- comment\nCREATE TABLE a (id int);";

#[derive(Debug, Default, Clone)]
struct State {
    tables: BTreeSet<String>,
    ledger_created: bool,
    ledger: Vec<LedgerEntry>,
}

#[derive(Debug, Default)]
struct FakeDb {
    committed: State,
    log: Vec<String>,
}

type SharedDb = Arc<Mutex<FakeDb>>;

fn table_name(sql: &str) -> Option<String> {
    let lower = sql.trim().to_lowercase();
    let rest = lower.strip_prefix("create table ")?;
    let rest = rest.strip_prefix("if not exists ").unwrap_or(rest);
    let name: String = rest
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '(')
        .collect();
    Some(name)
}

fn run(state: &mut State, sql: &str) -> SessionResult<u64> {
    if let Some(name) = table_name(sql) {
        if !state.tables.insert(name.clone()) {
            return Err(DbError::with_code(
                "42P07",
                format!("relation \"{}\" already exists", name),
            ));
        }
        return Ok(0);
    }
    if sql.to_lowercase().contains("broken") {
        return Err(DbError::with_code(
            "42703",
            "column \"broken\" does not exist",
        ));
    }
    Ok(1)
}

#[derive(Clone, Default)]
struct FakeConnector {
    db: SharedDb,
    refused: Vec<String>,
    hanging: Vec<String>,
    fail_commit: bool,
}

impl FakeConnector {
    fn new() -> Self {
        Self::default()
    }

    fn refusing(mut self, host: &str) -> Self {
        self.refused.push(host.to_string());
        self
    }

    fn hanging(mut self, host: &str) -> Self {
        self.hanging.push(host.to_string());
        self
    }

    fn tables(&self) -> BTreeSet<String> {
        self.db.lock().unwrap().committed.tables.clone()
    }

    fn seed_table(&self, name: &str) {
        self.db
            .lock()
            .unwrap()
            .committed
            .tables
            .insert(name.to_string());
    }

    fn ledger(&self) -> Vec<LedgerEntry> {
        self.db.lock().unwrap().committed.ledger.clone()
    }

    fn log(&self) -> Vec<String> {
        self.db.lock().unwrap().log.clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Session = FakeSession;

    async fn connect(&self, candidate: &ConnectionCandidate) -> Result<FakeSession, ConnectError> {
        if self.hanging.contains(&candidate.host) {
            std::future::pending::<()>().await;
        }
        if self.refused.contains(&candidate.host) {
            return Err(ConnectError::failed("Connection refused (os error 111)"));
        }
        Ok(FakeSession {
            db: self.db.clone(),
            tx: None,
            savepoint: None,
            fail_commit: self.fail_commit,
        })
    }
}

struct FakeSession {
    db: SharedDb,
    tx: Option<State>,
    savepoint: Option<State>,
    fail_commit: bool,
}

impl FakeSession {
    fn with_state<T>(&mut self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut db = self.db.lock().unwrap();
        match self.tx.as_mut() {
            Some(state) => f(state),
            None => f(&mut db.committed),
        }
    }

    fn log(&self, entry: impl Into<String>) {
        self.db.lock().unwrap().log.push(entry.into());
    }

    fn require_transaction(&self, command: &str) -> SessionResult<()> {
        if self.tx.is_none() {
            return Err(DbError::with_code(
                "25P01",
                format!("{} can only be used in transaction blocks", command),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn begin(&mut self) -> SessionResult<()> {
        self.log("BEGIN");
        self.tx = Some(self.db.lock().unwrap().committed.clone());
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> SessionResult<u64> {
        self.log(sql);
        // A COMMIT inside the script ends the open transaction
        if matches!(sql.trim().to_uppercase().as_str(), "COMMIT" | "END") {
            if let Some(state) = self.tx.take() {
                self.db.lock().unwrap().committed = state;
            }
            return Ok(0);
        }
        self.with_state(|state| run(state, sql))
    }

    async fn savepoint(&mut self, name: &str) -> SessionResult<()> {
        self.log(format!("SAVEPOINT {}", name));
        self.require_transaction("SAVEPOINT")?;
        self.savepoint = self.tx.clone();
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> SessionResult<()> {
        self.log(format!("RELEASE SAVEPOINT {}", name));
        self.require_transaction("RELEASE SAVEPOINT")
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> SessionResult<()> {
        self.log(format!("ROLLBACK TO SAVEPOINT {}", name));
        self.require_transaction("ROLLBACK TO SAVEPOINT")?;
        if let Some(state) = self.savepoint.clone() {
            self.tx = Some(state);
        }
        Ok(())
    }

    async fn commit(&mut self) -> SessionResult<()> {
        self.log("COMMIT");
        if self.fail_commit {
            return Err(DbError::with_code("08006", "connection lost during commit"));
        }
        if let Some(state) = self.tx.take() {
            self.db.lock().unwrap().committed = state;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> SessionResult<()> {
        self.log("ROLLBACK");
        self.tx = None;
        Ok(())
    }

    async fn ensure_ledger(&mut self, _ledger: &Ledger) -> SessionResult<()> {
        self.with_state(|state| state.ledger_created = true);
        Ok(())
    }

    async fn ledger_entry(&mut self, _ledger: &Ledger, id: &str) -> SessionResult<Option<LedgerEntry>> {
        Ok(self.with_state(|state| state.ledger.iter().find(|e| e.id == id).cloned()))
    }

    async fn next_batch(&mut self, _ledger: &Ledger) -> SessionResult<i32> {
        Ok(self.with_state(|state| state.ledger.iter().map(|e| e.batch).max().unwrap_or(0) + 1))
    }

    async fn record_ledger(&mut self, _ledger: &Ledger, entry: &LedgerEntry) -> SessionResult<()> {
        self.with_state(|state| {
            state.ledger.retain(|e| e.id != entry.id);
            state.ledger.push(entry.clone());
        });
        Ok(())
    }

    async fn ledger_entries(&mut self, ledger: &Ledger) -> SessionResult<Vec<LedgerEntry>> {
        self.with_state(|state| {
            if !state.ledger_created {
                return Err(DbError::with_code(
                    "42P01",
                    format!("relation \"{}\" does not exist", ledger.table()),
                ));
            }
            let mut entries = state.ledger.clone();
            entries.sort_by(|a, b| b.batch.cmp(&a.batch));
            Ok(entries)
        })
    }
}

fn candidate(host: &str) -> ConnectionCandidate {
    ConnectionCandidate::new(host, 5432, "postgres", "postgres").with_label(host)
}

fn options() -> ApplyOptions {
    ApplyOptions::default().with_connect_timeout(Duration::from_millis(200))
}

fn with_ledger() -> ApplyOptions {
    options().with_ledger(Some(Ledger::new("sqlpush_migrations").unwrap()))
}

fn script(id: &str, sql: &str) -> MigrationScript {
    MigrationScript::parse(id, sql).unwrap()
}

#[tokio::test]
async fn test_example_document_creates_then_skips() {
    let connector = FakeConnector::new();
    let applier = MigrationApplier::new(connector.clone(), options());
    let script = script("example", EXAMPLE_DOCUMENT);

    let report = applier.apply(&script, &[candidate("direct")]).await.unwrap();

    assert_eq!(report.total, 2);
    assert_eq!((report.succeeded, report.skipped, report.failed), (1, 1, 0));
    assert_eq!(report.status, RunStatus::Committed);
    assert_eq!(report.exit_code(), 0);
    assert!(matches!(
        &report.statements[1].outcome,
        StatementOutcome::Skipped { reason } if reason.contains("already exists")
    ));
    assert!(connector.tables().contains("a"));

    // The same document again, with nothing recording it
    let report = applier.apply(&script, &[candidate("direct")]).await.unwrap();
    assert_eq!((report.succeeded, report.skipped, report.failed), (0, 2, 0));
    assert!(report.is_success());
}

#[tokio::test]
async fn test_ledger_reports_repeat_as_already_applied() {
    let connector = FakeConnector::new();
    let applier = MigrationApplier::new(connector.clone(), with_ledger());
    let script = script("example", EXAMPLE_DOCUMENT);

    let first = applier.apply(&script, &[candidate("direct")]).await.unwrap();
    assert_eq!(first.status, RunStatus::Committed);
    assert_eq!(first.ledger_batch, Some(1));

    let ledger = connector.ledger();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].id, "example");
    assert_eq!(ledger[0].checksum, script.checksum());
    assert_eq!((ledger[0].statements, ledger[0].skipped), (1, 1));

    let second = applier.apply(&script, &[candidate("direct")]).await.unwrap();
    assert_eq!(second.status, RunStatus::AlreadyApplied);
    assert_eq!(second.processed(), 0);
    assert_eq!(second.ledger_batch, Some(1));
    assert_eq!(second.exit_code(), 0);
}

#[tokio::test]
async fn test_force_and_changed_document_reapply() {
    let connector = FakeConnector::new();
    let candidates = [candidate("direct")];

    let applier = MigrationApplier::new(connector.clone(), with_ledger());
    applier
        .apply(&script("001_init", "CREATE TABLE a (id int);"), &candidates)
        .await
        .unwrap();

    let forced = MigrationApplier::new(connector.clone(), with_ledger().with_force(true));
    let report = forced
        .apply(&script("001_init", "CREATE TABLE a (id int);"), &candidates)
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Committed);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.ledger_batch, Some(2));

    let changed = script("001_init", "CREATE TABLE a (id int);\nCREATE TABLE b (id int);");
    let report = applier.apply(&changed, &candidates).await.unwrap();
    assert_eq!(report.status, RunStatus::Committed);
    assert_eq!((report.succeeded, report.skipped), (1, 1));
    assert_eq!(report.ledger_batch, Some(3));
    assert_eq!(connector.ledger()[0].checksum, changed.checksum());
}

#[tokio::test]
async fn test_seeded_target_reports_skips() {
    let connector = FakeConnector::new();
    connector.seed_table("users");
    connector.seed_table("posts");
    let applier = MigrationApplier::new(connector.clone(), options());

    let script = script(
        "002_schema",
        "CREATE TABLE users (id int);\nCREATE TABLE IF NOT EXISTS comments (id int);\nCREATE TABLE posts (id int);",
    );
    let report = applier.apply(&script, &[candidate("direct")]).await.unwrap();

    assert_eq!((report.succeeded, report.skipped, report.failed), (1, 2, 0));
    assert_eq!(connector.tables().len(), 3);
}

#[tokio::test]
async fn test_best_effort_continues_past_failures() {
    let connector = FakeConnector::new();
    let applier = MigrationApplier::new(connector.clone(), with_ledger());
    let script = script(
        "003_mixed",
        "CREATE TABLE a (id int);\nSELECT broken;\nCREATE TABLE b (id int);",
    );

    let report = applier.apply(&script, &[candidate("direct")]).await.unwrap();

    assert_eq!((report.succeeded, report.skipped, report.failed), (2, 0, 1));
    assert_eq!(report.status, RunStatus::Committed);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.failures().next().unwrap().ordinal, 2);
    assert_eq!(
        connector.tables().into_iter().collect::<Vec<_>>(),
        vec!["a".to_string(), "b".to_string()]
    );
    assert!(report.ledger_batch.is_none());
    assert!(connector.ledger().is_empty());
}

#[tokio::test]
async fn test_atomic_policy_rolls_back() {
    let connector = FakeConnector::new();
    let applier = MigrationApplier::new(
        connector.clone(),
        options().with_policy(FailurePolicy::Atomic),
    );
    let script = script(
        "003_mixed",
        "CREATE TABLE a (id int);\nSELECT broken;\nCREATE TABLE b (id int);",
    );

    let report = applier.apply(&script, &[candidate("direct")]).await.unwrap();

    assert_eq!(report.status, RunStatus::RolledBack);
    assert_eq!(report.processed(), 2);
    assert_eq!(report.exit_code(), 1);
    assert!(connector.tables().is_empty());
    assert_eq!(connector.log().last().map(String::as_str), Some("ROLLBACK"));
}

#[tokio::test]
async fn test_statement_errors_are_rolled_back_to_savepoint() {
    let connector = FakeConnector::new();
    let applier = MigrationApplier::new(connector.clone(), options());

    applier
        .apply(&script("s", "SELECT broken;"), &[candidate("direct")])
        .await
        .unwrap();

    assert_eq!(
        connector.log(),
        vec![
            "BEGIN",
            "SAVEPOINT sqlpush_statement",
            "SELECT broken",
            "ROLLBACK TO SAVEPOINT sqlpush_statement",
            "RELEASE SAVEPOINT sqlpush_statement",
            "COMMIT",
        ]
    );
}

#[tokio::test]
async fn test_transaction_control_in_document_is_not_sent() {
    let connector = FakeConnector::new();
    let applier = MigrationApplier::new(connector.clone(), with_ledger());
    let script = script(
        "004_wrapped",
        "BEGIN;\nCREATE TABLE a (id int);\nCOMMIT;\nCREATE TABLE b (id int);",
    );

    let report = applier.apply(&script, &[candidate("direct")]).await.unwrap();

    assert_eq!(report.status, RunStatus::Committed);
    assert_eq!((report.succeeded, report.skipped, report.failed), (2, 2, 0));
    assert!(matches!(
        &report.statements[2].outcome,
        StatementOutcome::Skipped { reason } if reason == TRANSACTION_CONTROL_REASON
    ));
    assert_eq!(report.ledger_batch, Some(1));
    assert_eq!(connector.ledger().len(), 1);
    assert_eq!(connector.tables().len(), 2);
    assert_eq!(
        connector.log(),
        vec![
            "BEGIN",
            "SAVEPOINT sqlpush_statement",
            "CREATE TABLE a (id int)",
            "RELEASE SAVEPOINT sqlpush_statement",
            "SAVEPOINT sqlpush_statement",
            "CREATE TABLE b (id int)",
            "RELEASE SAVEPOINT sqlpush_statement",
            "COMMIT",
        ]
    );
}

#[tokio::test]
async fn test_falls_through_candidates_in_order() {
    let connector = FakeConnector::new()
        .refusing("direct")
        .hanging("pooler");
    let applier = MigrationApplier::new(connector.clone(), options());
    let candidates = [candidate("direct"), candidate("pooler"), candidate("replica-proxy")];

    let report = applier
        .apply(&script("001", "CREATE TABLE a (id int);"), &candidates)
        .await
        .unwrap();

    assert_eq!(report.target, "replica-proxy");
    assert_eq!(report.connect_failures.len(), 2);
    assert!(report.connect_failures[0].starts_with("direct: connection failed"));
    assert!(report.connect_failures[1].contains("timed out"));
    assert_eq!(report.succeeded, 1);
}

#[tokio::test]
async fn test_all_candidates_failing_applies_nothing() {
    let connector = FakeConnector::new()
        .refusing("direct")
        .hanging("pooler");
    let applier = MigrationApplier::new(connector.clone(), options());

    let err = applier
        .apply(
            &script("001", "CREATE TABLE a (id int);"),
            &[candidate("direct"), candidate("pooler")],
        )
        .await
        .unwrap_err();

    match err {
        MigrateError::AllCandidatesFailed { attempts } => {
            assert_eq!(attempts.len(), 2);
            assert_eq!(attempts[0].candidate, "direct");
            assert!(matches!(attempts[1].error, ConnectError::Timeout { .. }));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(connector.tables().is_empty());
    assert!(connector.log().is_empty());
}

#[tokio::test]
async fn test_no_candidates_fails_immediately() {
    let applier = MigrationApplier::new(FakeConnector::new(), options());
    let err = applier
        .apply(&script("001", "CREATE TABLE a (id int);"), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::NoCandidates));
}

#[tokio::test]
async fn test_commit_failure_is_a_transaction_error() {
    let connector = FakeConnector {
        fail_commit: true,
        ..FakeConnector::new()
    };
    let applier = MigrationApplier::new(connector.clone(), options());

    let err = applier
        .apply(&script("001", "CREATE TABLE a (id int);"), &[candidate("direct")])
        .await
        .unwrap_err();

    match err {
        MigrateError::Transaction { candidate, source } => {
            assert_eq!(candidate, "direct");
            assert_eq!(source.code.as_deref(), Some("08006"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(connector.tables().is_empty());
    assert_eq!(connector.log().last().map(String::as_str), Some("ROLLBACK"));
}

#[tokio::test]
async fn test_ledger_entries() {
    let connector = FakeConnector::new();
    let applier = MigrationApplier::new(connector.clone(), with_ledger());
    let candidates = [candidate("direct")];

    let (target, entries) = applier.ledger_entries(&candidates).await.unwrap();
    assert_eq!(target, "direct");
    assert!(entries.is_empty());

    applier
        .apply(&script("001", "CREATE TABLE a (id int);"), &candidates)
        .await
        .unwrap();
    applier
        .apply(&script("002", "CREATE TABLE b (id int);"), &candidates)
        .await
        .unwrap();

    let (_, entries) = applier.ledger_entries(&candidates).await.unwrap();
    let ids: Vec<_> = entries.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["002", "001"]);

    let without = MigrationApplier::new(connector, options());
    assert!(matches!(
        without.ledger_entries(&candidates).await,
        Err(MigrateError::Ledger { .. })
    ));
}
