//! Provenance of configuration values, reported with `-v`

use std::fmt;

/// Where a configuration value came from. Later variants override earlier
/// ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Built-in default, with the value it stands for
    Default(String),
    /// Path of the configuration file
    File(String),
    /// Name of the environment variable
    EnvVar(String),
    CommandLine,
}

impl ConfigSource {
    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default(_))
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }

    pub fn is_env_var(&self) -> bool {
        matches!(self, Self::EnvVar(_))
    }

    pub fn is_command_line(&self) -> bool {
        matches!(self, Self::CommandLine)
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default(value) => write!(f, "default ({})", value),
            Self::File(path) => write!(f, "file {}", path),
            Self::EnvVar(var) => write!(f, "${}", var),
            Self::CommandLine => f.write_str("command line"),
        }
    }
}
