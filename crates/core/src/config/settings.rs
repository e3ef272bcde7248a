use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::{
    ConfigError, ConfigResult, ConfigSource, ConfigValidator, IdentifierValidator,
    NonEmptyValidator, PortValidator,
};
use crate::secret::{SecretRef, SecretSetting};

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "sqlpush.yaml";
/// Default ledger table name
pub const DEFAULT_LEDGER_TABLE: &str = "sqlpush_migrations";
/// Default per-candidate connection timeout
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Default server-side function used by the HTTP fallback
pub const DEFAULT_RPC_FUNCTION: &str = "exec_sql";

/// What to do when a statement fails for a reason other than an idempotent
/// "already exists" / "duplicate" error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Record the failure, keep going, commit once every statement was tried
    #[default]
    BestEffort,
    /// Stop at the first failure and roll the whole transaction back
    Atomic,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::BestEffort => "best-effort",
            FailurePolicy::Atomic => "atomic",
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "best-effort" | "continue" => Ok(FailurePolicy::BestEffort),
            "atomic" | "abort" => Ok(FailurePolicy::Atomic),
            _ => Err(ConfigError::invalid_value(
                "policy",
                s,
                "best-effort or atomic",
            )),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport security for a database connection. Defaults to full
/// certificate and hostname verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    Prefer,
    Require,
    VerifyCa,
    #[default]
    VerifyFull,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }

    /// Whether the server certificate chain is checked
    pub fn verifies_certificate(&self) -> bool {
        matches!(self, SslMode::VerifyCa | SslMode::VerifyFull)
    }
}

impl FromStr for SslMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "disable" => Ok(SslMode::Disable),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            _ => Err(ConfigError::invalid_value(
                "ssl_mode",
                s,
                "disable, prefer, require, verify-ca or verify-full",
            )),
        }
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Migrations-applied table settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ledger_table")]
    pub table: String,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            table: DEFAULT_LEDGER_TABLE.to_string(),
        }
    }
}

/// One connection candidate as written in the configuration file.
///
/// Either `url` or the discrete `host`/`database`/`user` fields are given.
/// The password is always a secret reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CandidateSettings {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<SecretSetting>,
    #[serde(default)]
    pub ssl_mode: Option<SslMode>,
}

impl CandidateSettings {
    /// Candidate described by a connection URL
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_password(mut self, password: SecretRef) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn validate(&self, index: usize) -> ConfigResult<()> {
        let field = |name: &str| format!("candidates[{}].{}", index, name);

        match &self.url {
            Some(url) => {
                NonEmptyValidator::new(field("url")).validate(url.as_str())?;
                if self.host.is_some() || self.database.is_some() || self.user.is_some() {
                    return Err(ConfigError::validation_failed(format!(
                        "candidates[{}] sets both `url` and discrete host/database/user fields",
                        index
                    )));
                }
            }
            None => {
                for (name, value) in [
                    ("host", &self.host),
                    ("database", &self.database),
                    ("user", &self.user),
                ] {
                    let value = value.as_deref().ok_or_else(|| {
                        ConfigError::missing_required(
                            field(name),
                            "Set it or provide a `url` for this candidate.",
                        )
                    })?;
                    NonEmptyValidator::new(field(name)).validate(value)?;
                }
            }
        }

        if let Some(port) = self.port {
            PortValidator.validate(&port)?;
        }
        if let Some(password) = &self.password {
            password.reference(&field("password"))?;
        }
        Ok(())
    }
}

/// Hosted backend admin API settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminSettings {
    pub base_url: String,
    pub service_key: SecretSetting,
    #[serde(default = "default_rpc_function")]
    pub rpc_function: String,
    #[serde(default = "default_admin_timeout")]
    pub timeout_secs: u64,
}

impl AdminSettings {
    pub fn validate(&self) -> ConfigResult<()> {
        NonEmptyValidator::new("admin.base_url").validate(self.base_url.as_str())?;
        self.service_key.reference("admin.service_key")?;
        IdentifierValidator::new("admin.rpc_function").validate(self.rpc_function.as_str())?;
        if self.timeout_secs == 0 {
            return Err(ConfigError::invalid_value(
                "admin.timeout_secs",
                "0",
                "a timeout of at least one second",
            ));
        }
        Ok(())
    }
}

/// The single validated configuration object for a sqlpush run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqlpushConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub policy: FailurePolicy,
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub candidates: Vec<CandidateSettings>,
    #[serde(default)]
    pub admin: Option<AdminSettings>,
    #[serde(skip)]
    sources: HashMap<String, ConfigSource>,
}

impl Default for SqlpushConfig {
    fn default() -> Self {
        let mut config = Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            policy: FailurePolicy::default(),
            ledger: LedgerSettings::default(),
            candidates: Vec::new(),
            admin: None,
            sources: HashMap::new(),
        };
        config.mark_all(ConfigSource::Default);
        config
    }
}

impl SqlpushConfig {
    /// Parse configuration from YAML text; `origin` names the file for diagnostics
    pub fn from_yaml_str(yaml: &str, origin: &str) -> ConfigResult<Self> {
        let mut config: SqlpushConfig = serde_yaml::from_str(yaml)?;
        config.mark_all(|_| ConfigSource::File(origin.to_string()));
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileSystemError {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        Self::from_yaml_str(&content, &path.display().to_string())
    }

    /// Resolve the configuration for a run.
    ///
    /// Lookup order: explicit path, `SQLPUSH_CONFIG`, `./sqlpush.yaml`, built-in
    /// defaults. Environment overrides are applied on top and the result is
    /// validated.
    pub fn load(explicit: Option<&Path>) -> ConfigResult<Self> {
        let path: Option<PathBuf> = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => match std::env::var("SQLPUSH_CONFIG") {
                Ok(path) => Some(PathBuf::from(path)),
                Err(_) => {
                    let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                    default.exists().then_some(default)
                }
            },
        };

        let mut config = match path {
            Some(path) => {
                tracing::debug!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            None => {
                tracing::debug!("No configuration file found, using defaults");
                Self::default()
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SQLPUSH_*` overrides using the given variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(timeout) = lookup("SQLPUSH_CONNECT_TIMEOUT") {
            self.connect_timeout_secs = timeout.parse().map_err(|_| {
                ConfigError::invalid_value(
                    "connect_timeout_secs",
                    &timeout,
                    "a whole number of seconds",
                )
            })?;
            self.mark("connect_timeout_secs", ConfigSource::EnvVar("SQLPUSH_CONNECT_TIMEOUT".into()));
        }

        if let Some(policy) = lookup("SQLPUSH_POLICY") {
            self.policy = policy.parse()?;
            self.mark("policy", ConfigSource::EnvVar("SQLPUSH_POLICY".into()));
        }

        if let Some(url) = lookup("SQLPUSH_DATABASE_URL") {
            let mut candidate = CandidateSettings::from_url(url).with_label("env");
            if lookup("SQLPUSH_DB_PASSWORD").is_some() {
                candidate = candidate.with_password(SecretRef::env("SQLPUSH_DB_PASSWORD"));
            }
            // The environment candidate is tried before anything from the file
            self.candidates.insert(0, candidate);
            self.mark("candidates", ConfigSource::EnvVar("SQLPUSH_DATABASE_URL".into()));
        }

        if let Some(base_url) = lookup("SQLPUSH_ADMIN_URL") {
            match &mut self.admin {
                Some(admin) => admin.base_url = base_url,
                None => {
                    self.admin = Some(AdminSettings {
                        base_url,
                        service_key: SecretRef::env("SQLPUSH_SERVICE_KEY").into(),
                        rpc_function: default_rpc_function(),
                        timeout_secs: default_admin_timeout(),
                    })
                }
            }
            self.mark("admin", ConfigSource::EnvVar("SQLPUSH_ADMIN_URL".into()));
        }

        if lookup("SQLPUSH_SERVICE_KEY").is_some() {
            if let Some(admin) = &mut self.admin {
                admin.service_key = SecretRef::env("SQLPUSH_SERVICE_KEY").into();
                self.mark("admin.service_key", ConfigSource::EnvVar("SQLPUSH_SERVICE_KEY".into()));
            }
        }

        Ok(())
    }

    /// Validate every section
    pub fn validate(&self) -> ConfigResult<()> {
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::invalid_value(
                "connect_timeout_secs",
                "0",
                "a timeout of at least one second",
            ));
        }

        IdentifierValidator::new("ledger.table").validate(self.ledger.table.as_str())?;

        for (index, candidate) in self.candidates.iter().enumerate() {
            candidate.validate(index)?;
        }

        if let Some(admin) = &self.admin {
            admin.validate()?;
        }
        Ok(())
    }

    /// Admin settings, or an error naming how to configure them
    pub fn require_admin(&self) -> ConfigResult<&AdminSettings> {
        self.admin.as_ref().ok_or_else(|| {
            ConfigError::missing_required(
                "admin",
                "Add an `admin` section to the configuration or set SQLPUSH_ADMIN_URL.",
            )
        })
    }

    /// Record that a value was set on the command line
    pub fn mark_command_line(&mut self, key: &str) {
        self.mark(key, ConfigSource::CommandLine);
    }

    /// Where each top-level value came from
    pub fn config_sources(&self) -> &HashMap<String, ConfigSource> {
        &self.sources
    }

    fn mark(&mut self, key: &str, source: ConfigSource) {
        self.sources.insert(key.to_string(), source);
    }

    fn mark_all<F>(&mut self, source: F)
    where
        F: Fn(String) -> ConfigSource,
    {
        let values = [
            ("connect_timeout_secs", self.connect_timeout_secs.to_string()),
            ("policy", self.policy.to_string()),
            ("ledger", self.ledger.table.clone()),
            ("candidates", self.candidates.len().to_string()),
            (
                "admin",
                self.admin
                    .as_ref()
                    .map(|admin| admin.base_url.clone())
                    .unwrap_or_else(|| "none".to_string()),
            ),
        ];
        for (key, value) in values {
            self.sources.insert(key.to_string(), source(value));
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_ledger_table() -> String {
    DEFAULT_LEDGER_TABLE.to_string()
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_rpc_function() -> String {
    DEFAULT_RPC_FUNCTION.to_string()
}

fn default_admin_timeout() -> u64 {
    30
}
