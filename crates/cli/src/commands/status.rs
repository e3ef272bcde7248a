use std::path::Path;

use sqlpush_migrate::{ApplyOptions, ConnectionCandidate, MigrationApplier, PgConnector};

use super::{load_config, CandidateArgs};

pub async fn run(
    target: &CandidateArgs,
    config_path: Option<&Path>,
    verbose: bool,
    json: bool,
) -> anyhow::Result<i32> {
    let mut config = load_config(config_path, verbose)?;
    target.apply_to(&mut config, |key| std::env::var(key).ok())?;
    if !config.ledger.enabled {
        anyhow::bail!("The ledger is disabled in the configuration; there is nothing to list");
    }

    let options = ApplyOptions::from_config(&config)?;
    let candidates = ConnectionCandidate::from_settings_list(&config.candidates)?;
    let applier = MigrationApplier::new(PgConnector::new(), options);
    let (candidate, entries) = applier.ledger_entries(&candidates).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(0);
    }

    if entries.is_empty() {
        println!("No migrations recorded on {}", candidate);
        return Ok(0);
    }

    println!("Migrations recorded on {}:", candidate);
    println!(
        "  {:<32} {:>5} {:>10} {:>7}  {:<25} {}",
        "ID", "BATCH", "STATEMENTS", "SKIPPED", "APPLIED AT", "CHECKSUM"
    );
    for entry in &entries {
        println!(
            "  {:<32} {:>5} {:>10} {:>7}  {:<25} {}",
            entry.id,
            entry.batch,
            entry.statements,
            entry.skipped,
            entry.applied_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            short_checksum(&entry.checksum)
        );
    }
    Ok(0)
}

/// Leading characters of a ledger checksum for the table view
fn short_checksum(checksum: &str) -> String {
    checksum.chars().take(12).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_checksum() {
        assert_eq!(short_checksum("9f86d081884c7d659a2feaa0"), "9f86d081884c");
        assert_eq!(short_checksum("abc"), "abc");
        // Rows edited by hand may hold anything
        assert_eq!(short_checksum("ééééééééééééé"), "éééééééééééé");
    }
}
