pub mod apply;
pub mod split;
pub mod status;
pub mod users;

use clap::Args;
use std::path::Path;

use sqlpush_core::{CandidateSettings, ConfigResult, SecretRef, SqlpushConfig};

/// Connection options shared by the commands that talk to the database
#[derive(Args, Debug, Clone)]
pub struct CandidateArgs {
    /// Connection URL to try before the configured candidates (repeatable)
    #[arg(long = "candidate", value_name = "URL")]
    pub candidates: Vec<String>,

    /// Environment variable holding the password for --candidate URLs
    #[arg(long, value_name = "VAR", default_value = "SQLPUSH_DB_PASSWORD")]
    pub db_password_env: String,

    /// Per-candidate connect timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

impl CandidateArgs {
    /// Fold the command line settings into the configuration
    pub fn apply_to<F>(&self, config: &mut SqlpushConfig, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(timeout) = self.timeout {
            config.connect_timeout_secs = timeout;
            config.mark_command_line("connect_timeout_secs");
        }

        if !self.candidates.is_empty() {
            let has_password = lookup(&self.db_password_env).is_some();
            let mut candidates: Vec<_> = self
                .candidates
                .iter()
                .enumerate()
                .map(|(index, url)| {
                    let candidate = CandidateSettings::from_url(url.clone())
                        .with_label(format!("cli-{}", index + 1));
                    if has_password {
                        candidate.with_password(SecretRef::env(self.db_password_env.clone()))
                    } else {
                        candidate
                    }
                })
                .collect();
            candidates.append(&mut config.candidates);
            config.candidates = candidates;
            config.mark_command_line("candidates");
        }

        config.validate()
    }
}

/// Load the configuration and log where each value came from when verbose
pub fn load_config(path: Option<&Path>, verbose: bool) -> ConfigResult<SqlpushConfig> {
    let config = SqlpushConfig::load(path)?;
    if verbose {
        let mut sources: Vec<_> = config.config_sources().iter().collect();
        sources.sort_by(|a, b| a.0.cmp(b.0));
        for (key, source) in sources {
            tracing::info!("config {} from {}", key, source);
        }
    }
    Ok(config)
}
