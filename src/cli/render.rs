//! Text, table and JSON rendering of command results

use owo_colors::OwoColorize;
use tabled::{Table, Tabled};

use super::OutputFormat;
use crate::backup::{BackupSet, VerificationReport};
use crate::health::HealthResult;
use crate::restore::{JobOutcome, RestoreOutcome, RestoreResult};

pub fn backup_sets(sets: &[BackupSet], format: OutputFormat) -> serde_json::Result<String> {
    if format == OutputFormat::Json {
        return serde_json::to_string_pretty(sets);
    }
    if sets.is_empty() {
        return Ok("No backup sets found".to_string());
    }

    #[derive(Tabled)]
    struct SetRow {
        #[tabled(rename = "Backup ID")]
        id: String,
        #[tabled(rename = "Scope")]
        scope: String,
        #[tabled(rename = "Artifacts")]
        artifacts: usize,
        #[tabled(rename = "Size")]
        size: String,
        #[tabled(rename = "Verified")]
        verified: String,
    }

    let rows: Vec<SetRow> = sets
        .iter()
        .map(|set| SetRow {
            id: set.id.to_string(),
            scope: set.scope.to_string(),
            artifacts: set.artifacts.len(),
            size: human_size(set.total_size()),
            verified: match (set.is_selectable(), set.verified_at) {
                (false, _) => "invalid (no artifacts)".to_string(),
                (true, Some(at)) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
                (true, None) => "unverified".to_string(),
            },
        })
        .collect();

    Ok(Table::new(rows).to_string())
}

pub fn verification(report: &VerificationReport, format: OutputFormat) -> serde_json::Result<String> {
    if format == OutputFormat::Json {
        return serde_json::to_string_pretty(report);
    }

    let mut out = if report.ok {
        let note = if report.cached { " (recent verification reused)" } else { "" };
        format!("{} {}{}", "PASS".green().bold(), report.backup_id, note)
    } else {
        format!("{} {}", "FAIL".red().bold(), report.backup_id)
    };
    for failure in &report.failures {
        out.push_str(&format!("\n  {}: {}", failure.artifact, failure.reason));
    }
    Ok(out)
}

pub fn health(results: &[HealthResult], format: OutputFormat) -> serde_json::Result<String> {
    if format == OutputFormat::Json {
        return serde_json::to_string_pretty(results);
    }

    let lines: Vec<String> = results
        .iter()
        .map(|result| {
            let status = if result.healthy {
                "healthy".green().to_string()
            } else {
                "unhealthy".red().to_string()
            };
            match &result.last_error {
                Some(error) => format!("  {:<16} {} ({})", result.tier.name(), status, error),
                None => format!("  {:<16} {}", result.tier.name(), status),
            }
        })
        .collect();
    Ok(lines.join("\n"))
}

pub fn restore(result: &RestoreResult, format: OutputFormat) -> serde_json::Result<String> {
    if format == OutputFormat::Json {
        return serde_json::to_string_pretty(result);
    }

    let mut out = format!("Restore {} ({})\n", result.scope, result.invocation_id);

    if format == OutputFormat::Table {
        #[derive(Tabled)]
        struct JobRow {
            #[tabled(rename = "Tier")]
            tier: String,
            #[tabled(rename = "Backup ID")]
            backup_id: String,
            #[tabled(rename = "Outcome")]
            outcome: String,
            #[tabled(rename = "Attempts")]
            attempts: u32,
            #[tabled(rename = "Health")]
            health: String,
        }

        let rows: Vec<JobRow> = result
            .jobs
            .iter()
            .map(|job| JobRow {
                tier: job.tier.to_string(),
                backup_id: job.backup_set_id.to_string(),
                outcome: job.outcome().to_string(),
                attempts: job.attempts,
                health: job
                    .health_result
                    .as_ref()
                    .map(|h| if h.healthy { "healthy" } else { "unhealthy" })
                    .unwrap_or("-")
                    .to_string(),
            })
            .collect();
        out.push_str(&Table::new(rows).to_string());
        out.push('\n');
    } else {
        for job in &result.jobs {
            out.push_str(&format!(
                "  {:<16} {:<12} {}\n",
                job.tier.name(),
                outcome_colored(job.outcome()),
                job.backup_set_id
            ));
        }
    }

    if let Some(failure) = &result.failure {
        out.push_str(&format!("Failure in {}: {}\n", failure.tier, failure.detail));
    }
    if let Some(rollback) = &result.rollback {
        out.push_str(&format!("Rollback of {}: {}\n", rollback.tier, rollback.detail));
    }

    let outcome = match result.outcome {
        RestoreOutcome::Complete => "complete".green().bold().to_string(),
        RestoreOutcome::Partial => "partial".yellow().bold().to_string(),
        RestoreOutcome::Aborted => "aborted".red().bold().to_string(),
    };
    out.push_str(&format!("Outcome: {}", outcome));
    if result.requires_manual_intervention() {
        out.push_str(&format!(" {}", "(UNKNOWN STATE)".red().bold()));
    }
    Ok(out)
}

fn outcome_colored(outcome: JobOutcome) -> String {
    match outcome {
        JobOutcome::Succeeded => outcome.green().to_string(),
        JobOutcome::Failed => outcome.red().to_string(),
        JobOutcome::RolledBack => outcome.yellow().to_string(),
        JobOutcome::Running => outcome.blue().to_string(),
        JobOutcome::Pending => outcome.dimmed().to_string(),
    }
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
