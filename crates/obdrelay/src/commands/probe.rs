//! `obdrelay probe`: check reachability and token with `GET /api/`.

use std::time::Instant;

use serde::Serialize;

use obdrelay_api::{Error as ApiError, StatesClient};
use obdrelay_core::{CoreError, build_transport};

use crate::cli::GlobalOpts;
use crate::config;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct ProbeReport {
    profile: String,
    url: String,
    message: String,
    latency_ms: u128,
    mode: String,
    entity_prefix: String,
}

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load_config_or_default();
    let resolved = config::resolve(global, &cfg)?;
    let endpoint = &resolved.relay.endpoint;

    let client = StatesClient::new(&endpoint.base_url, &endpoint.token, &build_transport(endpoint))
        .map_err(CoreError::from)?;

    let started = Instant::now();
    let status = client.check_api().await.map_err(|e| match e {
        e if e.is_auth_error() => CliError::AuthFailed {
            profile: resolved.profile_name.clone(),
        },
        ApiError::Transport(source) => CliError::ConnectionFailed {
            url: endpoint.base_url.clone(),
            source: Box::new(source),
        },
        other => CoreError::from(other).into(),
    })?;

    let report = ProbeReport {
        profile: resolved.profile_name.clone(),
        url: client.base_url().to_string(),
        message: status.message,
        latency_ms: started.elapsed().as_millis(),
        mode: resolved.relay.mode.to_string(),
        entity_prefix: endpoint.entity_prefix.clone(),
    };

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &report,
        |r| format_report(r, color),
        |r| r.message.clone(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

fn format_report(r: &ProbeReport, color: bool) -> String {
    format!(
        "{} {}\n\
         Profile:        {}\n\
         Message:        {}\n\
         Latency:        {} ms\n\
         Mode:           {}\n\
         Entity prefix:  {}",
        output::ok_text("✓ reachable", color),
        r.url,
        r.profile,
        r.message,
        r.latency_ms,
        r.mode,
        r.entity_prefix,
    )
}
