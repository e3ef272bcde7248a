use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Result type alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Configuration validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Secret error: {message}")]
    SecretError { message: String },

    #[error("File system error: {message}")]
    FileSystemError { message: String },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConfigError {
    /// Create a missing required field error
    pub fn missing_required(field: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingRequired {
            field: field.into(),
            hint: hint.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }

    /// Create a validation failed error
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
        }
    }

    /// Create a secret resolution error
    pub fn secret_error(message: impl Into<String>) -> Self {
        Self::SecretError {
            message: message.into(),
        }
    }
}

/// Trait for validating configuration values
pub trait ConfigValidator<T: ?Sized> {
    /// Validate a configuration value
    fn validate(&self, value: &T) -> Result<(), ConfigError>;
}

/// Rejects empty (or whitespace-only) strings
pub struct NonEmptyValidator {
    pub field: String,
}

impl NonEmptyValidator {
    pub fn new(field: impl Into<String>) -> Self {
        Self { field: field.into() }
    }
}

impl ConfigValidator<str> for NonEmptyValidator {
    fn validate(&self, value: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                &self.field,
                value,
                "a non-empty value",
            ));
        }
        Ok(())
    }
}

/// Port must be in 1..=65535
pub struct PortValidator;

impl ConfigValidator<u16> for PortValidator {
    fn validate(&self, value: &u16) -> Result<(), ConfigError> {
        if *value == 0 {
            return Err(ConfigError::invalid_value(
                "port",
                value.to_string(),
                "valid port number (1-65535)",
            ));
        }
        Ok(())
    }
}

/// Plain SQL identifier, optionally schema-qualified (`schema.table`)
pub struct IdentifierValidator {
    pub field: String,
}

impl IdentifierValidator {
    pub fn new(field: impl Into<String>) -> Self {
        Self { field: field.into() }
    }

    fn pattern() -> &'static Regex {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        PATTERN.get_or_init(|| {
            Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}(\.[A-Za-z_][A-Za-z0-9_]{0,62})?$")
                .expect("identifier pattern is valid")
        })
    }
}

impl ConfigValidator<str> for IdentifierValidator {
    fn validate(&self, value: &str) -> Result<(), ConfigError> {
        if !Self::pattern().is_match(value) {
            return Err(ConfigError::invalid_value(
                &self.field,
                value,
                "a plain SQL identifier such as sqlpush_migrations or ops.sqlpush_migrations",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty_validator() {
        let validator = NonEmptyValidator::new("host");
        assert!(validator.validate("db.internal").is_ok());
        assert!(validator.validate("   ").is_err());
    }

    #[test]
    fn test_port_validator() {
        assert!(PortValidator.validate(&5432).is_ok());
        assert!(PortValidator.validate(&0).is_err());
    }

    #[test]
    fn test_identifier_validator() {
        let validator = IdentifierValidator::new("ledger.table");
        assert!(validator.validate("sqlpush_migrations").is_ok());
        assert!(validator.validate("ops.sqlpush_migrations").is_ok());
        assert!(validator.validate("migrations; DROP TABLE users").is_err());
        assert!(validator.validate("1table").is_err());
        assert!(validator.validate("").is_err());
    }
}
