//! Ledger subcommand handlers.

use std::io::IsTerminal;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use dialoguer::Confirm;
use serde::Serialize;
use tabled::Tabled;

use obdrelay_core::{Ledger, LedgerRecord};

use crate::cli::{GlobalOpts, LedgerArgs, LedgerCommand};
use crate::config;
use crate::error::CliError;
use crate::output;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

// ── Rows ────────────────────────────────────────────────────────────

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Recorded")]
    recorded: String,
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Sent")]
    sent: String,
}

fn record_row(r: &LedgerRecord) -> RecordRow {
    RecordRow {
        id: r.id,
        recorded: r.recorded_at().map_or_else(
            || r.timestamp.to_string(),
            |t| t.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
        key: r.key.clone(),
        value: r.value.clone(),
        sent: if r.sent { "yes".into() } else { "no".into() },
    }
}

#[derive(Debug, Serialize)]
struct LedgerStats {
    path: String,
    total: u64,
    sent: u64,
    unsent: u64,
}

#[derive(Debug, Serialize)]
struct Removed {
    removed: usize,
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: LedgerArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load_config_or_default();
    let profile_name = config::active_profile_name(global, &cfg);
    let path = config::resolve_ledger_path(global, &cfg, &profile_name);
    let ledger = Ledger::open(&path)?;

    match args.command {
        LedgerCommand::Stats => {
            let stats = stats(&ledger, &path)?;
            let color = output::should_color(&global.color);
            let out = output::render_single(
                &global.output,
                &stats,
                |s| format_stats(s, color),
                |s| s.unsent.to_string(),
            );
            output::print_output(&out, global.quiet);
        }

        LedgerCommand::Unsent { limit } => {
            let mut records = ledger.unsent()?;
            if let Some(limit) = limit {
                records.truncate(limit);
            }
            print_records(&records, global);
        }

        LedgerCommand::Range { from, to } => {
            let start = parse_instant("from", &from)?;
            let end = match to {
                Some(ref to) => parse_instant("to", to)?,
                None => Utc::now().timestamp_millis(),
            };
            if end < start {
                return Err(CliError::Validation {
                    field: "to".into(),
                    reason: "end of range is before its start".into(),
                });
            }
            print_records(&ledger.by_time_range(start, end)?, global);
        }

        LedgerCommand::Purge { older_than_days } => {
            let days = older_than_days.unwrap_or_else(|| {
                cfg.profiles
                    .get(&profile_name)
                    .and_then(|p| p.ledger_retention_days)
                    .unwrap_or(cfg.defaults.ledger_retention_days)
            });
            let removed = ledger.purge_sent_older_than(purge_cutoff(Utc::now(), days))?;
            tracing::info!(removed, days, "purged sent ledger records");
            print_removed(removed, global);
        }

        LedgerCommand::Clear => {
            confirm_clear(&path, global)?;
            let removed = ledger.clear()?;
            print_removed(removed, global);
        }
    }
    Ok(())
}

// ── Helpers ─────────────────────────────────────────────────────────

fn stats(ledger: &Ledger, path: &Path) -> Result<LedgerStats, CliError> {
    let total = ledger.count()?;
    let unsent = ledger.unsent_count()?;
    Ok(LedgerStats {
        path: path.display().to_string(),
        total,
        sent: total.saturating_sub(unsent),
        unsent,
    })
}

fn format_stats(s: &LedgerStats, color: bool) -> String {
    let unsent = if s.unsent > 0 {
        output::warn_text(&s.unsent.to_string(), color)
    } else {
        output::ok_text("0", color)
    };
    format!(
        "Ledger:  {}\n\
         Total:   {}\n\
         Sent:    {}\n\
         Unsent:  {unsent}",
        s.path, s.total, s.sent,
    )
}

fn print_records(records: &[LedgerRecord], global: &GlobalOpts) {
    let out = output::render_list(&global.output, records, record_row, |r| {
        format!("{}={}", r.key, r.value)
    });
    output::print_output(&out, global.quiet);
}

fn print_removed(removed: usize, global: &GlobalOpts) {
    let out = output::render_single(
        &global.output,
        &Removed { removed },
        |r| format!("Removed {} record(s)", r.removed),
        |r| r.removed.to_string(),
    );
    output::print_output(&out, global.quiet);
}

fn confirm_clear(path: &Path, global: &GlobalOpts) -> Result<(), CliError> {
    if global.yes {
        return Ok(());
    }
    if !std::io::stdin().is_terminal() {
        return Err(CliError::NonInteractiveRequiresYes {
            action: "ledger clear".into(),
        });
    }
    let confirmed = Confirm::new()
        .with_prompt(format!("Delete every record in {}?", path.display()))
        .default(false)
        .interact()
        .map_err(|e| CliError::Validation {
            field: "interactive".into(),
            reason: format!("prompt failed: {e}"),
        })?;
    if confirmed {
        Ok(())
    } else {
        Err(CliError::Validation {
            field: "confirmation".into(),
            reason: "aborted".into(),
        })
    }
}

/// Epoch milliseconds or an RFC 3339 timestamp.
fn parse_instant(field: &str, raw: &str) -> Result<i64, CliError> {
    if let Ok(ms) = raw.parse::<i64>() {
        return Ok(ms);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.timestamp_millis())
        .map_err(|e| CliError::Validation {
            field: field.into(),
            reason: format!("expected RFC 3339 or epoch milliseconds: {e}"),
        })
}

fn purge_cutoff(now: DateTime<Utc>, days: u64) -> i64 {
    let days = i64::try_from(days).unwrap_or(i64::MAX);
    now.timestamp_millis()
        .saturating_sub(days.saturating_mul(MILLIS_PER_DAY))
}
