//! Statement error classification
//!
//! Re-running a migration document against a database that already has some
//! of its objects produces "already exists" errors. Those are counted as
//! skips rather than failures.

use crate::error::DbError;
use crate::outcome::StatementOutcome;
use crate::script::Statement;

/// SQLSTATE codes of the `duplicate_*` conditions
const DUPLICATE_OBJECT_CODES: &[&str] = &[
    "42P03", // duplicate_cursor
    "42P04", // duplicate_database
    "42723", // duplicate_function
    "42P05", // duplicate_prepared_statement
    "42P06", // duplicate_schema
    "42P07", // duplicate_table
    "42712", // duplicate_alias
    "42710", // duplicate_object
    "42701", // duplicate_column
];

const IDEMPOTENT_PHRASES: &[&str] = &["already exists", "duplicate"];

/// How a failed statement is counted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The target object is already there; the statement is a no-op
    Idempotent,
    /// A real failure
    Genuine,
}

/// Classify a statement error
pub fn classify(error: &DbError) -> ErrorClass {
    if is_idempotent(error) {
        ErrorClass::Idempotent
    } else {
        ErrorClass::Genuine
    }
}

/// Whether the error means the statement's target already exists
pub fn is_idempotent(error: &DbError) -> bool {
    if let Some(code) = &error.code {
        if DUPLICATE_OBJECT_CODES.contains(&code.as_str()) {
            return true;
        }
    }
    message_is_idempotent(&error.message)
}

/// Message-only check, used where no SQLSTATE is available (HTTP RPC errors)
pub fn message_is_idempotent(message: &str) -> bool {
    let message = message.to_lowercase();
    IDEMPOTENT_PHRASES
        .iter()
        .any(|phrase| message.contains(phrase))
}

/// Turn a statement error into its recorded outcome
pub fn outcome_for_error(statement: &Statement, error: DbError) -> StatementOutcome {
    match classify(&error) {
        ErrorClass::Idempotent => {
            tracing::info!(
                "Statement {} skipped, target already exists: {}",
                statement.ordinal,
                error.message
            );
            StatementOutcome::Skipped {
                reason: error.message,
            }
        }
        ErrorClass::Genuine => {
            tracing::error!(
                "Statement {} (line {}) failed: {} -- {}",
                statement.ordinal,
                statement.line,
                error,
                statement.summary()
            );
            StatementOutcome::Failed { error }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_exists_messages_are_idempotent() {
        for message in [
            "relation \"drivers\" already exists",
            "type \"shift_kind\" already exists",
            "policy \"drivers_select\" for table \"drivers\" already exists",
            "trigger \"touch\" for relation \"drivers\" already exists",
            "ERROR: Function Touch Already Exists With Same Argument Types",
        ] {
            assert!(is_idempotent(&DbError::new(message)), "{}", message);
        }
    }

    #[test]
    fn test_duplicate_messages_are_idempotent_for_any_statement() {
        assert!(is_idempotent(&DbError::new(
            "duplicate key value violates unique constraint \"drivers_pkey\""
        )));
        assert!(is_idempotent(&DbError::new("Duplicate column name")));
    }

    #[test]
    fn test_duplicate_sqlstate_without_phrase() {
        let err = DbError::with_code("42710", "object exists");
        assert_eq!(classify(&err), ErrorClass::Idempotent);
    }

    #[test]
    fn test_outcome_for_error() {
        let statement = Statement {
            ordinal: 2,
            line: 4,
            sql: "CREATE TABLE a (id int)".to_string(),
        };
        let skipped = outcome_for_error(
            &statement,
            DbError::with_code("42P07", "relation \"a\" already exists"),
        );
        assert_eq!(
            skipped,
            StatementOutcome::Skipped {
                reason: "relation \"a\" already exists".to_string()
            }
        );

        let failed = outcome_for_error(&statement, DbError::new("permission denied"));
        assert!(failed.is_failure());
    }

    #[test]
    fn test_genuine_failures() {
        for err in [
            DbError::with_code("42601", "syntax error at or near \"CREAT\""),
            DbError::with_code("42P01", "relation \"missing\" does not exist"),
            DbError::new("permission denied for schema public"),
        ] {
            assert_eq!(classify(&err), ErrorClass::Genuine, "{}", err);
        }
    }
}
