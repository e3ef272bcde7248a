//! Error types for migration application
//!
//! The taxonomy follows how failures are handled at run time: connection
//! errors move on to the next candidate, statement errors are classified and
//! recorded, transaction errors roll the run back.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use sqlpush_core::ConfigError;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Errors that end a migration run
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Script error: {message}")]
    Script { message: String },

    #[error("Invalid connection candidate '{label}': {message}")]
    InvalidCandidate { label: String, message: String },

    #[error("No connection attempted: the candidate list is empty")]
    NoCandidates,

    #[error(
        "All {} connection candidate(s) failed; nothing was applied and the SQL document can be applied manually",
        .attempts.len()
    )]
    AllCandidatesFailed { attempts: Vec<ConnectAttempt> },

    #[error("Transaction error on '{candidate}': {source}")]
    Transaction {
        candidate: String,
        #[source]
        source: DbError,
    },

    #[error("Ledger error: {message}")]
    Ledger { message: String },

    #[error(transparent)]
    Admin(#[from] AdminError),
}

impl MigrateError {
    pub fn script(message: impl Into<String>) -> Self {
        Self::Script {
            message: message.into(),
        }
    }

    pub fn invalid_candidate(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidCandidate {
            label: label.into(),
            message: message.into(),
        }
    }

    pub fn transaction(candidate: impl Into<String>, source: DbError) -> Self {
        Self::Transaction {
            candidate: candidate.into(),
            source,
        }
    }

    pub fn ledger(message: impl Into<String>) -> Self {
        Self::Ledger {
            message: message.into(),
        }
    }
}

/// An error reported by the database (or by the HTTP RPC endpoint standing in
/// for it)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbError {
    /// SQLSTATE, when the server provided one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

impl DbError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for DbError {}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err.as_database_error() {
            Some(db_err) => DbError {
                code: db_err.code().map(|code| code.into_owned()),
                message: db_err.message().to_string(),
            },
            None => DbError::new(err.to_string()),
        }
    }
}

/// Why a connection candidate could not be used
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("connection timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("connection failed: {message}")]
    Failed { message: String },
}

impl ConnectError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for ConnectError {
    fn from(err: sqlx::Error) -> Self {
        ConnectError::failed(err.to_string())
    }
}

/// One failed connection attempt, kept for the final report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectAttempt {
    pub candidate: String,
    pub error: ConnectError,
}

impl fmt::Display for ConnectAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.candidate, self.error)
    }
}

/// Hosted backend admin API errors
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Admin API returned {status}: {message}")]
    Http {
        status: u16,
        /// SQLSTATE or API error code from the response body
        code: Option<String>,
        message: String,
    },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Unexpected response: {message}")]
    Decode { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("User not found: {email}")]
    UserNotFound { email: String },
}

impl AdminError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            code: None,
            message: message.into(),
        }
    }

    /// The error as a statement error, when the endpoint rejected the SQL
    /// itself rather than the request. Authentication failures are not.
    pub fn as_statement_error(&self) -> Option<DbError> {
        match self {
            Self::Http {
                status,
                code,
                message,
            } if !matches!(status, 401 | 403) => Some(DbError {
                code: code.clone(),
                message: message.clone(),
            }),
            _ => None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for AdminError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::decode(err.to_string())
        } else {
            Self::network(err.to_string())
        }
    }
}
