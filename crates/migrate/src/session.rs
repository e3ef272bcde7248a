//! Database session seam
//!
//! The applier talks to the database only through these traits. The
//! PostgreSQL implementation lives in [`crate::postgres`].

use async_trait::async_trait;

use crate::candidate::ConnectionCandidate;
use crate::error::{ConnectError, DbError};
use crate::ledger::{Ledger, LedgerEntry};

/// Result of a session operation
pub type SessionResult<T> = Result<T, DbError>;

/// Opens sessions for connection candidates
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: Session;

    /// Establish a connection. The caller bounds this with a timeout.
    async fn connect(&self, candidate: &ConnectionCandidate) -> Result<Self::Session, ConnectError>;
}

/// One open connection
#[async_trait]
pub trait Session: Send {
    async fn begin(&mut self) -> SessionResult<()>;

    /// Execute one statement, returning the affected row count
    async fn execute(&mut self, sql: &str) -> SessionResult<u64>;

    async fn savepoint(&mut self, name: &str) -> SessionResult<()>;

    async fn release_savepoint(&mut self, name: &str) -> SessionResult<()>;

    async fn rollback_to_savepoint(&mut self, name: &str) -> SessionResult<()>;

    async fn commit(&mut self) -> SessionResult<()>;

    async fn rollback(&mut self) -> SessionResult<()>;

    /// Create the ledger table if it is missing
    async fn ensure_ledger(&mut self, ledger: &Ledger) -> SessionResult<()>;

    /// Ledger row for a script id
    async fn ledger_entry(&mut self, ledger: &Ledger, id: &str) -> SessionResult<Option<LedgerEntry>>;

    /// Batch number for the next recorded run
    async fn next_batch(&mut self, ledger: &Ledger) -> SessionResult<i32>;

    async fn record_ledger(&mut self, ledger: &Ledger, entry: &LedgerEntry) -> SessionResult<()>;

    /// All ledger rows, most recent batch first
    async fn ledger_entries(&mut self, ledger: &Ledger) -> SessionResult<Vec<LedgerEntry>>;
}
