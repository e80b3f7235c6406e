//! `sloserve variants` command implementation
//!
//! Lists the configured on-device variants and, with `--remote`, the
//! endpoints the proxy advertises for each application.

use colored::Colorize;
use serde::Serialize;
use sloserve_foundation::Variant;
use sloserve_kernel::{Application, Placement, SloServeConfig};

use super::{build_client, print_json};
use crate::cli::OutputFormat;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantRow {
    pub application: Application,
    pub placement: Placement,
    pub name: String,
    pub accuracy: f64,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Rows for the on-device variants of `config`, optionally for one
/// application only.
pub fn local_rows(config: &SloServeConfig, only: Option<Application>) -> Vec<VariantRow> {
    config
        .applications
        .iter()
        .filter(|(app, _)| only.is_none_or(|o| o == **app))
        .flat_map(|(&application, variants)| {
            variants.iter().map(move |v| VariantRow {
                application,
                placement: Placement::Local,
                name: v.name.clone(),
                accuracy: v.accuracy,
                latency_ms: v.latency_ms as f64,
                endpoint: None,
            })
        })
        .collect()
}

/// Execute the `sloserve variants` command
pub async fn run(
    config: &SloServeConfig,
    only: Option<Application>,
    remote: bool,
    output: OutputFormat,
) -> anyhow::Result<()> {
    let mut rows = local_rows(config, only);

    if remote {
        let client = build_client(config)?;
        let statistic = config.selection.summary.statistic();
        let ceiling = config.remote.discovery_latency_ceiling();
        for application in Application::ALL {
            if only.is_some_and(|o| o != application) {
                continue;
            }
            let found = client
                .discover_candidates(0.0, ceiling, application, statistic)
                .await;
            rows.extend(found.into_iter().map(|remote| {
                let endpoint = remote.endpoint().to_string();
                let variant = Variant::Remote(remote);
                VariantRow {
                    application,
                    placement: Placement::Remote,
                    name: variant.name().to_string(),
                    accuracy: variant.accuracy(),
                    latency_ms: variant.latency().as_secs_f64() * 1000.0,
                    endpoint: Some(endpoint),
                }
            }));
        }
        client.shutdown().await;
    }

    if output == OutputFormat::Json {
        return print_json(&rows);
    }

    println!();
    if rows.is_empty() {
        println!("  {}", "No variants found.".yellow());
    }
    let mut current: Option<Application> = None;
    for row in &rows {
        if current != Some(row.application) {
            current = Some(row.application);
            println!("  {}", row.application.to_string().bold());
        }
        println!(
            "    {:<8} {:<24} acc {:.2}  {:>8.1} ms  {}",
            row.placement.to_string(),
            row.name.cyan(),
            row.accuracy,
            row.latency_ms,
            row.endpoint.as_deref().unwrap_or(""),
        );
    }
    println!();
    Ok(())
}
