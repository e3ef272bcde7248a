//! PostgreSQL sessions over sqlx
//!
//! Migration statements are sent with the simple-query protocol and ledger
//! queries use unnamed prepared statements, so both work through a
//! transaction-mode connection pooler.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::{Connection, Executor, Row};

use sqlpush_core::SslMode;

use crate::candidate::ConnectionCandidate;
use crate::error::ConnectError;
use crate::ledger::{Ledger, LedgerEntry};
use crate::session::{Connector, Session, SessionResult};

pub const APPLICATION_NAME: &str = "sqlpush";

/// Opens [`PgSession`]s
#[derive(Debug, Clone, Default)]
pub struct PgConnector;

impl PgConnector {
    pub fn new() -> Self {
        Self
    }

    /// Connection options for a candidate. Every connection parameter comes
    /// from the candidate; `.pgpass` is not consulted.
    pub fn connect_options(candidate: &ConnectionCandidate) -> PgConnectOptions {
        let mut options = PgConnectOptions::new_without_pgpass()
            .host(&candidate.host)
            .port(candidate.port)
            .database(&candidate.database)
            .username(&candidate.user)
            .ssl_mode(pg_ssl_mode(candidate.ssl_mode))
            .application_name(APPLICATION_NAME)
            .statement_cache_capacity(0);
        if let Some(password) = &candidate.password {
            options = options.password(password.expose());
        }
        options
    }
}

fn pg_ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
        SslMode::VerifyCa => PgSslMode::VerifyCa,
        SslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Session = PgSession;

    async fn connect(&self, candidate: &ConnectionCandidate) -> Result<PgSession, ConnectError> {
        let options = Self::connect_options(candidate);
        let conn = PgConnection::connect_with(&options).await?;
        Ok(PgSession { conn })
    }
}

/// An open PostgreSQL connection
pub struct PgSession {
    conn: PgConnection,
}

impl PgSession {
    async fn simple(&mut self, sql: &str) -> SessionResult<u64> {
        let result = self.conn.execute(sql).await?;
        Ok(result.rows_affected())
    }
}

fn row_to_entry(row: &sqlx::postgres::PgRow) -> SessionResult<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        checksum: row.try_get("checksum")?,
        applied_at: row.try_get("applied_at")?,
        batch: row.try_get("batch")?,
        statements: row.try_get("statements")?,
        skipped: row.try_get("skipped")?,
    })
}

#[async_trait]
impl Session for PgSession {
    async fn begin(&mut self) -> SessionResult<()> {
        self.simple("BEGIN").await.map(|_| ())
    }

    async fn execute(&mut self, sql: &str) -> SessionResult<u64> {
        self.simple(sql).await
    }

    async fn savepoint(&mut self, name: &str) -> SessionResult<()> {
        self.simple(&format!("SAVEPOINT {}", name)).await.map(|_| ())
    }

    async fn release_savepoint(&mut self, name: &str) -> SessionResult<()> {
        self.simple(&format!("RELEASE SAVEPOINT {}", name))
            .await
            .map(|_| ())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> SessionResult<()> {
        self.simple(&format!("ROLLBACK TO SAVEPOINT {}", name))
            .await
            .map(|_| ())
    }

    async fn commit(&mut self) -> SessionResult<()> {
        self.simple("COMMIT").await.map(|_| ())
    }

    async fn rollback(&mut self) -> SessionResult<()> {
        self.simple("ROLLBACK").await.map(|_| ())
    }

    async fn ensure_ledger(&mut self, ledger: &Ledger) -> SessionResult<()> {
        self.simple(&ledger.create_table_sql()).await.map(|_| ())
    }

    async fn ledger_entry(&mut self, ledger: &Ledger, id: &str) -> SessionResult<Option<LedgerEntry>> {
        let sql = ledger.select_entry_sql();
        let row = sqlx::query(&sql)
            .bind(id)
            .persistent(false)
            .fetch_optional(&mut self.conn)
            .await?;
        row.as_ref().map(row_to_entry).transpose()
    }

    async fn next_batch(&mut self, ledger: &Ledger) -> SessionResult<i32> {
        let sql = ledger.latest_batch_sql();
        let row = sqlx::query(&sql)
            .persistent(false)
            .fetch_one(&mut self.conn)
            .await?;
        let latest: i32 = row.try_get(0)?;
        Ok(latest + 1)
    }

    async fn record_ledger(&mut self, ledger: &Ledger, entry: &LedgerEntry) -> SessionResult<()> {
        let sql = ledger.upsert_entry_sql();
        sqlx::query(&sql)
            .bind(&entry.id)
            .bind(&entry.checksum)
            .bind(entry.applied_at)
            .bind(entry.batch)
            .bind(entry.statements)
            .bind(entry.skipped)
            .persistent(false)
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn ledger_entries(&mut self, ledger: &Ledger) -> SessionResult<Vec<LedgerEntry>> {
        let sql = ledger.list_entries_sql();
        let rows = sqlx::query(&sql)
            .persistent(false)
            .fetch_all(&mut self.conn)
            .await?;
        rows.iter().map(row_to_entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlpush_core::Secret;

    #[test]
    fn test_connect_options_follow_candidate() {
        let candidate = ConnectionCandidate::new("db.internal", 6543, "app", "deploy")
            .with_password(Secret::new("pw"))
            .with_ssl_mode(SslMode::Require);
        let options = PgConnector::connect_options(&candidate);

        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("app"));
        assert_eq!(options.get_username(), "deploy");
        assert!(matches!(options.get_ssl_mode(), PgSslMode::Require));
    }

    #[test]
    fn test_ssl_mode_mapping_defaults_to_verify_full() {
        assert!(matches!(pg_ssl_mode(SslMode::default()), PgSslMode::VerifyFull));
        assert!(matches!(pg_ssl_mode(SslMode::Disable), PgSslMode::Disable));
        assert!(matches!(pg_ssl_mode(SslMode::VerifyCa), PgSslMode::VerifyCa));
    }
}
