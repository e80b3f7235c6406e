//! `sloserve probe` command implementation

use colored::Colorize;
use serde::Serialize;
use sloserve_kernel::SloServeConfig;

use super::{build_client, print_json};
use crate::cli::OutputFormat;

#[derive(Debug, Serialize)]
struct ProbeResult<'a> {
    proxy_url: &'a str,
    rounds: u32,
    rtt_ms: f64,
    bandwidth_bps: f64,
    measured: bool,
}

/// Execute the `sloserve probe` command
pub async fn run(config: &SloServeConfig, rounds: u32, output: OutputFormat) -> anyhow::Result<()> {
    let client = build_client(config)?;
    client.warm_up(rounds.max(1)).await;
    let state = client.estimator().state();
    client.shutdown().await;

    let result = ProbeResult {
        proxy_url: &config.remote.proxy_url,
        rounds: rounds.max(1),
        rtt_ms: state.rtt * 1000.0,
        bandwidth_bps: state.bandwidth,
        measured: state.rtt_updated.is_some(),
    };

    if output == OutputFormat::Json {
        return print_json(&result);
    }

    println!();
    println!("  {} {}", "Proxy".bold(), result.proxy_url.cyan());
    if !result.measured {
        println!(
            "    {}",
            "no probe succeeded; showing initial estimates".yellow()
        );
    }
    println!("    RTT:       {:.2} ms", result.rtt_ms);
    println!(
        "    Bandwidth: {:.1} kB/s",
        result.bandwidth_bps / 1000.0
    );
    println!();
    Ok(())
}
