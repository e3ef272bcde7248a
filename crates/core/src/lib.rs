//! # sqlpush-core
//!
//! Foundation shared by the sqlpush crates: the validated configuration
//! object, secret references, and logging setup.

pub mod config;
pub mod error;
pub mod logging;
pub mod secret;

pub use config::{
    AdminSettings, CandidateSettings, ConfigError, ConfigResult, ConfigSource, FailurePolicy,
    LedgerSettings, SqlpushConfig, SslMode,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use secret::{Secret, SecretRef, SecretSetting};
