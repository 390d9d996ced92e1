//! `obdrelay run`: feed JSON-lines samples into a live relay.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use obdrelay_core::{HomeAssistantPublisher, Ledger, NetworkControl, Publisher, Relay};

use crate::cli::{GlobalOpts, RunArgs};
use crate::config;
use crate::error::CliError;
use crate::ingest::{self, Input};
use crate::nmcli::NmcliNetwork;
use crate::output;

/// What happened during one `run`.
#[derive(Debug, Default, Serialize)]
struct RunSummary {
    profile: String,
    lines: usize,
    accepted: usize,
    dropped: usize,
    invalid: usize,
    catalogs: usize,
    known_keys: usize,
    /// Still buffered at shutdown.
    pending: usize,
    /// Ledger records never confirmed by Home Assistant.
    unsent: Option<u64>,
    interrupted: bool,
}

pub async fn handle(args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut cfg = config::load_config_or_default();
    let resolved = config::resolve(global, &cfg)?;
    resolved.relay.check_ready()?;
    if let obdrelay_core::TransmissionMode::Unknown(ref raw) = resolved.relay.mode {
        warn!(mode = %raw, "unrecognised transmission mode, sending whenever online");
    }

    let publisher = Arc::new(HomeAssistantPublisher::new(&resolved.relay.endpoint)?);
    let network = Arc::new(NmcliNetwork::new(args.interface.clone()));
    let ledger = if args.no_ledger {
        None
    } else {
        Some(Arc::new(Ledger::open(&resolved.ledger_path)?))
    };

    let relay = Relay::new(resolved.relay.clone(), publisher, network, ledger.clone())?;
    relay.start().await?;
    info!(
        profile = %resolved.profile_name,
        mode = %resolved.relay.mode,
        auto_switch = resolved.relay.auto_switch,
        "relay running"
    );

    let mut summary = RunSummary {
        profile: resolved.profile_name.clone(),
        ..RunSummary::default()
    };

    let outcome = match args.input.as_deref() {
        Some(path) if path != Path::new("-") => match tokio::fs::File::open(path).await {
            Ok(file) => pump(&relay, BufReader::new(file), &mut summary).await,
            Err(e) => Err(e.into()),
        },
        _ => pump(&relay, BufReader::new(tokio::io::stdin()), &mut summary).await,
    };

    if matches!(outcome, Ok(false)) && args.linger > 0 {
        linger(&relay, Duration::from_secs(args.linger)).await;
    }
    relay.shutdown().await;
    summary.interrupted = outcome?;

    let known = relay.known_keys().borrow().clone();
    summary.known_keys = known.len();
    summary.pending = relay.buffered();
    if let Some(ref ledger) = ledger {
        summary.unsent = Some(ledger.unsent_count()?);
    }

    if resolved.persisted
        && !args.no_persist_keys
        && cfg.merge_known_keys(&resolved.profile_name, known.iter())
    {
        config::save_config(&cfg)?;
        info!(count = known.len(), "known keys saved to profile");
    }

    let out = output::render_single(&global.output, &summary, format_summary, |s| {
        s.accepted.to_string()
    });
    output::print_output(&out, global.quiet);
    Ok(())
}

/// Feed every input line to the relay. Returns `true` when interrupted
/// by Ctrl-C, `false` at end of input.
async fn pump<R, P, N>(
    relay: &Relay<P, N>,
    reader: R,
    summary: &mut RunSummary,
) -> Result<bool, CliError>
where
    R: AsyncBufRead + Unpin,
    P: Publisher,
    N: NetworkControl,
{
    let mut lines = reader.lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                return Ok(true);
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(false);
                };
                summary.lines += 1;
                apply_line(relay, &line, summary).await?;
            }
        }
    }
}

async fn apply_line<P: Publisher, N: NetworkControl>(
    relay: &Relay<P, N>,
    line: &str,
    summary: &mut RunSummary,
) -> Result<(), CliError> {
    match ingest::parse_line(summary.lines, line) {
        Ok(None) => {}
        Ok(Some(Input::Sample { key, value })) => {
            if relay.submit_sample(&key, &value) {
                summary.accepted += 1;
            } else {
                summary.dropped += 1;
            }
        }
        Ok(Some(Input::Catalog(csv))) => {
            let keys = relay.catalog_update_csv(&csv).await?;
            summary.catalogs += 1;
            info!(keys, "catalog replaced");
        }
        Ok(Some(Input::Flush)) => relay.flush_now().await?,
        Err(e) => {
            summary.invalid += 1;
            warn!("skipping input {e}");
        }
    }
    Ok(())
}

/// Give buffered samples one last chance to go out.
async fn linger<P: Publisher, N: NetworkControl>(relay: &Relay<P, N>, wait: Duration) {
    if let Err(e) = relay.flush_now().await {
        warn!(error = %e, "final flush not requested");
        return;
    }
    tokio::select! {
        () = tokio::time::sleep(wait) => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }
}

fn format_summary(s: &RunSummary) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    let _ = writeln!(out, "Profile:     {}", s.profile);
    let _ = writeln!(out, "Lines read:  {}", s.lines);
    let _ = writeln!(out, "Accepted:    {}", s.accepted);
    let _ = writeln!(out, "Dropped:     {}", s.dropped);
    let _ = writeln!(out, "Invalid:     {}", s.invalid);
    let _ = writeln!(out, "Catalogs:    {}", s.catalogs);
    let _ = writeln!(out, "Known keys:  {}", s.known_keys);
    let _ = writeln!(out, "Pending:     {}", s.pending);
    if let Some(unsent) = s.unsent {
        let _ = writeln!(out, "Unsent:      {unsent}");
    }
    if s.interrupted {
        let _ = write!(out, "(interrupted)");
    }
    out.trim_end().to_owned()
}
