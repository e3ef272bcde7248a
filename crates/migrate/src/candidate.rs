//! Connection candidates
//!
//! A candidate is one complete set of connection parameters. Candidates are
//! built from the validated configuration, tried in order once per run, and
//! dropped when they fail.

use percent_encoding::percent_decode_str;
use std::fmt;
use url::Url;

use sqlpush_core::{CandidateSettings, Secret, SslMode};

use crate::error::{MigrateError, MigrateResult};

pub const DEFAULT_PORT: u16 = 5432;

/// Parameters for one connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionCandidate {
    pub label: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<Secret>,
    pub ssl_mode: SslMode,
}

impl ConnectionCandidate {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        let host = host.into();
        let user = user.into();
        Self {
            label: format!("{}@{}:{}", user, host, port),
            host,
            port,
            database: database.into(),
            user,
            password: None,
            ssl_mode: SslMode::default(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_password(mut self, password: Secret) -> Self {
        self.password = Some(password);
        self
    }

    pub fn with_ssl_mode(mut self, ssl_mode: SslMode) -> Self {
        self.ssl_mode = ssl_mode;
        self
    }

    /// Build a candidate from a `postgres://` URL.
    ///
    /// Passwords embedded in the URL are refused; pass them as a resolved
    /// secret instead. An `sslmode` query parameter is honoured.
    pub fn from_url(raw: &str, password: Option<Secret>) -> MigrateResult<Self> {
        let url = Url::parse(raw).map_err(|e| {
            MigrateError::invalid_candidate(redact_userinfo(raw), format!("invalid URL: {}", e))
        })?;
        let display = mask_url(&url);

        if !matches!(url.scheme(), "postgres" | "postgresql") {
            return Err(MigrateError::invalid_candidate(
                display,
                "scheme must be postgres:// or postgresql://",
            ));
        }
        if url.password().is_some() {
            return Err(MigrateError::invalid_candidate(
                display,
                "the URL embeds a password; provide it through a secret reference instead",
            ));
        }

        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| MigrateError::invalid_candidate(&display, "missing host"))?;
        if url.username().is_empty() {
            return Err(MigrateError::invalid_candidate(&display, "missing user"));
        }
        let database = percent_decode(&display, "database", url.path().trim_start_matches('/'))?;
        let database = if database.is_empty() { "postgres".to_string() } else { database };

        let user = percent_decode(&display, "user", url.username())?;
        let mut candidate = Self::new(host, url.port().unwrap_or(DEFAULT_PORT), database, user);

        for (key, value) in url.query_pairs() {
            if key == "sslmode" {
                candidate.ssl_mode = value.parse()?;
            }
        }
        if let Some(password) = password {
            candidate.password = Some(password);
        }
        Ok(candidate)
    }

    /// Resolve a configured candidate, reading its password secret
    pub fn from_settings(settings: &CandidateSettings, index: usize) -> MigrateResult<Self> {
        settings.validate(index)?;
        let password = settings
            .password
            .as_ref()
            .map(|secret| secret.resolve(&format!("candidates[{}].password", index)))
            .transpose()?;

        let mut candidate = match &settings.url {
            Some(url) => Self::from_url(url, password)?,
            None => {
                // validate() guarantees the discrete fields are present
                let field = |value: &Option<String>| value.clone().unwrap_or_default();
                let mut candidate = Self::new(
                    field(&settings.host),
                    settings.port.unwrap_or(DEFAULT_PORT),
                    field(&settings.database),
                    field(&settings.user),
                );
                candidate.password = password;
                candidate
            }
        };

        if let Some(port) = settings.port {
            candidate.port = port;
        }
        if let Some(ssl_mode) = settings.ssl_mode {
            candidate.ssl_mode = ssl_mode;
        }
        if let Some(label) = &settings.label {
            candidate.label = label.clone();
        }
        Ok(candidate)
    }

    /// Resolve every configured candidate, preserving order
    pub fn from_settings_list(settings: &[CandidateSettings]) -> MigrateResult<Vec<Self>> {
        settings
            .iter()
            .enumerate()
            .map(|(index, candidate)| Self::from_settings(candidate, index))
            .collect()
    }

    /// Connection URL with the password masked, safe to print
    pub fn masked_url(&self) -> String {
        let password = if self.password.is_some() { ":****" } else { "" };
        format!(
            "postgres://{}{}@{}:{}/{}?sslmode={}",
            self.user, password, self.host, self.port, self.database, self.ssl_mode
        )
    }
}

impl fmt::Display for ConnectionCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.masked_url())
    }
}

/// Mask the password of a URL for error messages
fn mask_url(url: &Url) -> String {
    let mut masked = url.clone();
    if masked.password().is_some() && masked.set_password(Some("****")).is_err() {
        return format!("{}://<redacted>", url.scheme());
    }
    masked.to_string()
}

/// Replace everything between the scheme and the last `@` of an unparsed URL
fn redact_userinfo(raw: &str) -> String {
    let Some(start) = raw.find("://").map(|i| i + 3) else {
        return match raw.rfind('@') {
            Some(at) => format!("<redacted>{}", &raw[at..]),
            None => raw.to_string(),
        };
    };
    match raw[start..].rfind('@') {
        Some(at) => format!("{}<redacted>{}", &raw[..start], &raw[start + at..]),
        None => raw.to_string(),
    }
}

fn percent_decode(display: &str, field: &str, value: &str) -> MigrateResult<String> {
    percent_decode_str(value)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| MigrateError::invalid_candidate(display, format!("{} is not valid UTF-8", field)))
}
