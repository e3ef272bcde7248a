use clap::Args;
use std::path::{Path, PathBuf};

use sqlpush_core::FailurePolicy;
use sqlpush_migrate::{
    AdminClient, ApplyOptions, ConnectionCandidate, ExecutionReport, MigrateError,
    MigrationApplier, MigrationScript, PgConnector, StatementOutcome,
};

use super::{load_config, CandidateArgs};

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// SQL document to apply
    #[arg(required_unless_present = "sql", conflicts_with = "sql")]
    pub file: Option<PathBuf>,

    /// SQL given inline instead of a file
    #[arg(long, value_name = "SQL")]
    pub sql: Option<String>,

    #[command(flatten)]
    pub target: CandidateArgs,

    /// Roll everything back when any statement fails
    #[arg(long)]
    pub atomic: bool,

    /// Apply even if the ledger lists the document as applied
    #[arg(long)]
    pub force: bool,

    /// Neither consult nor update the ledger
    #[arg(long)]
    pub no_ledger: bool,

    /// Split and list the statements without connecting
    #[arg(long)]
    pub dry_run: bool,

    /// Use the admin RPC endpoint when every candidate fails
    #[arg(long)]
    pub http_fallback: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

impl ApplyArgs {
    fn script(&self) -> anyhow::Result<MigrationScript> {
        let script = match (&self.file, &self.sql) {
            (Some(path), _) => MigrationScript::from_file(path)?,
            (None, Some(sql)) => MigrationScript::inline(sql.clone())?,
            (None, None) => anyhow::bail!("Provide a SQL file or --sql"),
        };
        if script.is_empty() {
            tracing::warn!("'{}' contains no statements", script.id());
        }
        Ok(script)
    }
}

pub async fn run(args: &ApplyArgs, config_path: Option<&Path>, verbose: bool) -> anyhow::Result<i32> {
    let script = args.script()?;

    if args.dry_run {
        let report = ExecutionReport::dry_run(&script);
        if args.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!("Dry run of '{}' ({} statements):", script.id(), script.len());
            for statement in script.statements() {
                println!("  [{}] line {}: {}", statement.ordinal, statement.line, statement.summary());
            }
        }
        return Ok(0);
    }

    let mut config = load_config(config_path, verbose)?;
    args.target
        .apply_to(&mut config, |key| std::env::var(key).ok())?;
    if args.atomic {
        config.policy = FailurePolicy::Atomic;
        config.mark_command_line("policy");
    }
    if args.no_ledger {
        config.ledger.enabled = false;
        config.mark_command_line("ledger");
    }

    let options = ApplyOptions::from_config(&config)?.with_force(args.force);
    let candidates = ConnectionCandidate::from_settings_list(&config.candidates)?;
    let applier = MigrationApplier::new(PgConnector::new(), options);

    let report = match applier.apply(&script, &candidates).await {
        Ok(report) => report,
        Err(MigrateError::AllCandidatesFailed { attempts }) if args.http_fallback => {
            tracing::warn!(
                "All {} connection candidate(s) failed; falling back to the admin RPC endpoint",
                attempts.len()
            );
            let admin = AdminClient::from_settings(config.require_admin()?)?;
            let mut report = admin.apply_script(&script, config.policy).await?;
            report.connect_failures = attempts.iter().map(ToString::to_string).collect();
            report
        }
        Err(err) => return Err(err.into()),
    };

    print_report(&report, args.json)?;
    Ok(report.exit_code())
}

fn print_report(report: &ExecutionReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for failure in &report.connect_failures {
        println!("  unavailable: {}", failure);
    }
    for record in &report.statements {
        match &record.outcome {
            StatementOutcome::Succeeded { .. } | StatementOutcome::Pending => {}
            StatementOutcome::Skipped { reason } => {
                println!("  skipped [{}] line {}: {} ({})", record.ordinal, record.line, record.summary, reason);
            }
            StatementOutcome::Failed { error } => {
                println!("  FAILED  [{}] line {}: {} -- {}", record.ordinal, record.line, record.summary, error);
            }
        }
    }
    println!("{}", report.summary());
    Ok(())
}
