//! Secret references and resolved secret values
//!
//! Credentials are never written into configuration files. A configuration
//! entry names *where* the secret lives (an environment variable or a file,
//! e.g. a mounted container secret) and the value is resolved at load time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::config::{ConfigError, ConfigResult};

/// A resolved secret value. `Debug` and `Display` never print the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the underlying value
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

/// Location of a secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretRef {
    /// Environment variable holding the secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    /// File whose (trimmed) contents are the secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl SecretRef {
    pub fn env(var: impl Into<String>) -> Self {
        Self {
            env: Some(var.into()),
            file: None,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            env: None,
            file: Some(path.into()),
        }
    }

    /// Human readable location, safe to log
    pub fn describe(&self) -> String {
        match (&self.env, &self.file) {
            (Some(var), _) => format!("env:{}", var),
            (None, Some(path)) => format!("file:{}", path.display()),
            (None, None) => "<unset>".to_string(),
        }
    }

    /// Exactly one of `env` and `file` must be set
    pub fn validate(&self, field: &str) -> ConfigResult<()> {
        match (&self.env, &self.file) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(ConfigError::invalid_value(
                field,
                self.describe(),
                "exactly one of `env` or `file`",
            )),
        }
    }

    /// Read the secret from its location
    pub fn resolve(&self) -> ConfigResult<Secret> {
        let value = match (&self.env, &self.file) {
            (Some(var), None) => std::env::var(var).map_err(|_| {
                ConfigError::secret_error(format!("environment variable {} is not set", var))
            })?,
            (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| {
                ConfigError::secret_error(format!(
                    "failed to read secret file {}: {}",
                    path.display(),
                    e
                ))
            })?,
            _ => {
                return Err(ConfigError::secret_error(format!(
                    "secret reference {} must name exactly one of `env` or `file`",
                    self.describe()
                )))
            }
        };

        let value = value.trim_end_matches(['\r', '\n']).to_string();
        if value.is_empty() {
            return Err(ConfigError::secret_error(format!(
                "secret at {} is empty",
                self.describe()
            )));
        }
        Ok(Secret(value))
    }
}

/// What a secret field may contain in the configuration file.
///
/// Plain strings parse so that the loader can reject them with a useful
/// message instead of a generic deserialization error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecretSetting {
    Ref(SecretRef),
    Literal(String),
}

impl SecretSetting {
    /// Return the reference, rejecting inline literals
    pub fn reference(&self, field: &str) -> ConfigResult<&SecretRef> {
        match self {
            SecretSetting::Ref(secret_ref) => {
                secret_ref.validate(field)?;
                Ok(secret_ref)
            }
            SecretSetting::Literal(_) => Err(ConfigError::invalid_value(
                field,
                "****",
                "a secret reference ({ env: VAR } or { file: PATH }); inline secrets are not accepted",
            )),
        }
    }

    pub fn resolve(&self, field: &str) -> ConfigResult<Secret> {
        self.reference(field)?.resolve()
    }
}

impl From<SecretRef> for SecretSetting {
    fn from(secret_ref: SecretRef) -> Self {
        SecretSetting::Ref(secret_ref)
    }
}
