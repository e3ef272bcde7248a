mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::*;
use sqlpush_core::{init_logging, LogFormat, LoggingConfig};

#[derive(Parser)]
#[command(name = "sqlpush")]
#[command(about = "Apply SQL migration documents to PostgreSQL", version)]
struct Cli {
    /// Configuration file (default: $SQLPUSH_CONFIG, then ./sqlpush.yaml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level, used when RUST_LOG is not set
    #[arg(long, global = true, env = "SQLPUSH_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log line format: text or json
    #[arg(long, global = true, env = "SQLPUSH_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Debug logging, and report where each setting came from
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a migration document through the first reachable candidate
    Apply(apply::ApplyArgs),

    /// Print the statements a document splits into
    Split {
        /// SQL document
        file: PathBuf,

        /// Check each statement against the PostgreSQL grammar
        #[arg(long)]
        validate: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the migrations recorded in the ledger
    Status {
        #[command(flatten)]
        target: CandidateArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage auth users through the admin API
    Users {
        #[command(subcommand)]
        users_command: UsersCommands,
    },
}

#[derive(Subcommand)]
enum UsersCommands {
    /// List all users
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Set a new password for the user with the given email
    ResetPassword {
        /// Email of the user
        #[arg(long)]
        email: String,

        /// Environment variable holding the new password
        #[arg(long, value_name = "VAR")]
        password_env: String,
    },
}

impl Cli {
    fn logging_config(&self) -> LoggingConfig {
        let config = if self.verbose {
            LoggingConfig::verbose()
        } else if self.log_format == LogFormat::Json {
            LoggingConfig::json().with_level(&self.log_level)
        } else {
            LoggingConfig::default().with_level(&self.log_level)
        };
        config.with_format(self.log_format)
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Apply(args) => apply::run(&args, config_path, cli.verbose).await,
        Commands::Split {
            file,
            validate,
            json,
        } => split::run(&file, validate, json),
        Commands::Status { target, json } => {
            status::run(&target, config_path, cli.verbose, json).await
        }
        Commands::Users { users_command } => match users_command {
            UsersCommands::List { json } => users::list(config_path, cli.verbose, json).await,
            UsersCommands::ResetPassword {
                email,
                password_env,
            } => users::reset_password(config_path, cli.verbose, &email, &password_env).await,
        },
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = init_logging(&cli.logging_config()) {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            1
        }
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_arguments() {
        let cli = Cli::try_parse_from([
            "sqlpush",
            "apply",
            "migrations/001_init.sql",
            "--candidate",
            "postgres://deploy@db.internal/app",
            "--candidate",
            "postgres://deploy@pooler.internal:6543/app",
            "--atomic",
            "--http-fallback",
            "--timeout",
            "5",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Commands::Apply(args) => {
                assert_eq!(args.file, Some(PathBuf::from("migrations/001_init.sql")));
                assert_eq!(args.target.candidates.len(), 2);
                assert_eq!(args.target.timeout, Some(5));
                assert!(args.atomic && args.http_fallback);
                assert!(!args.force && !args.no_ledger && !args.dry_run);
            }
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn test_apply_needs_exactly_one_source() {
        assert!(Cli::try_parse_from(["sqlpush", "apply"]).is_err());
        assert!(Cli::try_parse_from(["sqlpush", "apply", "a.sql", "--sql", "SELECT 1"]).is_err());
        assert!(Cli::try_parse_from(["sqlpush", "apply", "--sql", "SELECT 1"]).is_ok());
    }

    #[test]
    fn test_users_reset_password_arguments() {
        let cli = Cli::try_parse_from([
            "sqlpush",
            "users",
            "reset-password",
            "--email",
            "ops@example.co",
            "--password-env",
            "NEW_PASSWORD",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Users {
                users_command: UsersCommands::ResetPassword { .. }
            }
        ));

        // The password itself is never accepted on the command line
        assert!(Cli::try_parse_from([
            "sqlpush",
            "users",
            "reset-password",
            "--email",
            "ops@example.co",
            "--password",
            "hunter2",
        ])
        .is_err());
    }

    #[test]
    fn test_logging_config_from_flags() {
        let cli = Cli::try_parse_from(["sqlpush", "-v", "split", "a.sql"]).unwrap();
        assert_eq!(cli.logging_config().level, "debug");

        let cli = Cli::try_parse_from(["sqlpush", "--log-level", "warn", "split", "a.sql"]).unwrap();
        let logging = cli.logging_config();
        assert_eq!(logging.level, "warn");
        assert_eq!(logging.format, LogFormat::Text);

        assert!(Cli::try_parse_from(["sqlpush", "--log-format", "xml", "split", "a.sql"]).is_err());
    }
}
