//! # sqlpush-migrate
//!
//! Applies a SQL migration document to PostgreSQL. The document is split into
//! statements, the first reachable connection candidate is used, and every
//! statement runs under a savepoint inside one transaction so that "already
//! exists" errors are recorded as skips instead of aborting the run.
//!
//! When no candidate is reachable the document can be sent through a hosted
//! backend's "execute SQL" RPC endpoint instead, see [`admin`].

pub mod admin;
pub mod applier;
pub mod candidate;
pub mod classify;
pub mod error;
pub mod ledger;
pub mod outcome;
pub mod postgres;
pub mod script;
pub mod session;

pub use admin::{AdminClient, AdminUser};
pub use applier::{ApplyOptions, Connected, MigrationApplier, STATEMENT_SAVEPOINT};
pub use candidate::ConnectionCandidate;
pub use classify::{classify, is_idempotent, message_is_idempotent, ErrorClass};
pub use error::{
    AdminError, ConnectAttempt, ConnectError, DbError, MigrateError, MigrateResult,
};
pub use ledger::{Ledger, LedgerEntry, LedgerState};
pub use outcome::{ExecutionReport, RunStatus, StatementOutcome, StatementRecord};
pub use postgres::{PgConnector, PgSession};
pub use script::{
    split_statements, MigrationScript, Statement, SyntaxWarning, TRANSACTION_CONTROL_REASON,
};
pub use session::{Connector, Session, SessionResult};
