//! CLI command implementations

pub mod config_cmd;
pub mod probe;
pub mod run;
pub mod submit;
pub mod variants;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use sloserve_foundation::{RemoteClient, Scheduler, SimulatedRuntime};
use sloserve_kernel::config::{ENV_PREFIX, LocalVariantConfig, PlacementMode, load_with_env};
use sloserve_kernel::{Application, Outcome, RequestReport, SloServeConfig};

use crate::cli::OutputFormat;

/// Load the configuration file with `SLOSERVE_*` overrides, or fall back to
/// [`demo_config`]. Validation is left to the caller.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<SloServeConfig> {
    match path {
        Some(path) => {
            let path_str = path
                .to_str()
                .with_context(|| format!("config path is not UTF-8: {}", path.display()))?;
            load_with_env(path_str, ENV_PREFIX)
                .with_context(|| format!("failed to load {}", path.display()))
        }
        None => Ok(demo_config()),
    }
}

/// Local-only configuration with simulated image and text variants.
pub fn demo_config() -> SloServeConfig {
    SloServeConfig::default()
        .with_placement(PlacementMode::LocalOnly)
        .with_application(
            Application::Image,
            vec![
                LocalVariantConfig::new("mobilenet_v2", 0.71, 40).with_dimensions(224),
                LocalVariantConfig::new("efficientnet_b0", 0.77, 90).with_dimensions(224),
                LocalVariantConfig::new("resnet50", 0.80, 180).with_dimensions(224),
            ],
        )
        .with_application(
            Application::Text,
            vec![
                LocalVariantConfig::new("distilbert", 0.79, 60),
                LocalVariantConfig::new("bert_base", 0.84, 150),
            ],
        )
}

/// HTTP remote client plus simulated-runtime scheduler for `config`.
pub fn build_scheduler(config: SloServeConfig) -> anyhow::Result<(Scheduler, Arc<SimulatedRuntime>)> {
    let runtime = Arc::new(SimulatedRuntime::from_config(&config));
    let scheduler = Scheduler::from_config(config, runtime.clone())
        .context("failed to build scheduler")?;
    Ok((scheduler, runtime))
}

pub fn build_client(config: &SloServeConfig) -> anyhow::Result<Arc<RemoteClient>> {
    let client = RemoteClient::from_config(config).context("failed to build remote client")?;
    Ok(Arc::new(client))
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// One line per request in text mode, one JSON object per line otherwise.
pub fn print_report(report: &RequestReport, output: OutputFormat) -> anyhow::Result<()> {
    if output == OutputFormat::Json {
        return print_json(report);
    }

    let status = match report.outcome {
        Outcome::Completed if report.completed_within_latency == Some(true) => "ok".green(),
        Outcome::Completed => "late".yellow(),
        Outcome::Abandoned => "abandoned".red(),
        Outcome::Pending => "pending".dimmed(),
    };
    let variant = report
        .variant_used
        .as_ref()
        .map_or_else(|| "-".to_string(), ToString::to_string);
    let response = report
        .response_time_s
        .map_or_else(|| "-".to_string(), |s| format!("{:.1} ms", s * 1000.0));
    println!(
        "  #{:<5} {:<10} {:<28} {:>10}  acc {:<5} tries {}",
        report.id,
        status,
        variant.cyan(),
        response,
        report
            .accuracy
            .map_or_else(|| "-".to_string(), |a| format!("{a:.2}")),
        report.variants_tried.len(),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_demo_config_is_valid() {
        let config = demo_config();
        config.validate().unwrap();
        assert_eq!(config.placement, PlacementMode::LocalOnly);
        assert_eq!(config.applications.len(), 2);
    }

    #[test]
    fn test_load_config_without_path_uses_demo() {
        assert_eq!(load_config(None).unwrap(), demo_config());
    }

    #[test]
    fn test_load_config_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "workers: 3\napplications:\n  image:\n    - name: tiny\n      accuracy: 0.5\n      latency_ms: 10"
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();

        assert_eq!(config.workers, 3);
        assert_eq!(config.applications[&Application::Image][0].name, "tiny");
    }

    #[test]
    fn test_sample_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/sloserve.yaml");
        let config = load_config(Some(&path)).unwrap();
        config.validate().unwrap();
        assert_eq!(config.placement, PlacementMode::Hybrid);
        assert_eq!(config.queue.capacity, Some(256));
    }

    #[test]
    fn test_load_config_reports_missing_file() {
        let err = load_config(Some(Path::new("/nonexistent/sloserve.yaml"))).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/sloserve.yaml"));
    }
}
