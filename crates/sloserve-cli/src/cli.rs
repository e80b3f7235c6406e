//! CLI command definitions using clap

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use sloserve_kernel::Application;

/// sloserve - SLO-aware edge/cloud inference scheduler
#[derive(Parser)]
#[command(name = "sloserve")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format
    #[arg(short = 'o', long, global = true, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Configuration file (YAML, TOML or JSON); a local-only demo
    /// configuration is used when absent
    #[arg(short = 'c', long, global = true, env = "SLOSERVE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output for automation
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Application argument accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ApplicationArg {
    Image,
    Text,
}

impl From<ApplicationArg> for Application {
    fn from(arg: ApplicationArg) -> Self {
        match arg {
            ApplicationArg::Image => Application::Image,
            ApplicationArg::Text => Application::Text,
        }
    }
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start a scheduler and replay a synthetic workload against it
    Run {
        /// Application the workload targets
        #[arg(short, long, value_enum, default_value_t = ApplicationArg::Image)]
        application: ApplicationArg,

        /// Number of requests to submit
        #[arg(short = 'n', long, default_value_t = 20)]
        requests: usize,

        /// Arrival rate in requests per second
        #[arg(short, long, default_value_t = 10.0)]
        rate: f64,

        /// Accuracy floor of every request
        #[arg(long, default_value_t = 0.5)]
        min_accuracy: f64,

        /// Latency SLO of every request in milliseconds
        #[arg(long, default_value_t = 500)]
        max_latency_ms: u64,

        /// Payload size in bytes
        #[arg(long, default_value_t = 50_000)]
        payload_bytes: usize,

        /// Profiling runs per local variant before the workload starts
        #[arg(long, default_value_t = 3)]
        profile: usize,

        /// Profiling runs per remote variant before the workload starts
        #[arg(long, default_value_t = 0)]
        profile_remote: usize,

        /// Pause after each remote variant's warm-up call, in milliseconds
        #[arg(long, default_value_t = 30_000)]
        remote_warm_up_ms: u64,
    },

    /// Submit a single request and print its report
    Submit {
        /// Image file to classify
        #[arg(short, long, conflicts_with = "field")]
        file: Option<PathBuf>,

        /// Text field as key=value (repeatable)
        #[arg(long, value_parser = parse_field)]
        field: Vec<(String, String)>,

        /// Accuracy floor
        #[arg(long, default_value_t = 0.0)]
        min_accuracy: f64,

        /// Latency SLO in milliseconds
        #[arg(long, default_value_t = 1_000)]
        max_latency_ms: u64,
    },

    /// Measure round-trip time and bandwidth to the remote proxy
    Probe {
        /// Probe rounds
        #[arg(short, long, default_value_t = 3)]
        rounds: u32,
    },

    /// List local variants and, optionally, discovered remote ones
    Variants {
        /// Only show this application
        #[arg(short, long, value_enum)]
        application: Option<ApplicationArg>,

        /// Also query the proxy for remote endpoints
        #[arg(long)]
        remote: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

/// Configuration subcommands
#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration as YAML
    Show,
    /// Validate the configuration
    Validate,
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_defaults() {
        let cli = Cli::try_parse_from(["sloserve", "run"]).unwrap();
        match cli.command {
            Commands::Run {
                application,
                requests,
                max_latency_ms,
                profile_remote,
                remote_warm_up_ms,
                ..
            } => {
                assert_eq!(application, ApplicationArg::Image);
                assert_eq!(requests, 20);
                assert_eq!(max_latency_ms, 500);
                assert_eq!(profile_remote, 0);
                assert_eq!(remote_warm_up_ms, 30_000);
            }
            _ => panic!("expected run"),
        }
        assert_eq!(cli.output, OutputFormat::Text);
    }

    #[test]
    fn test_parse_submit_fields() {
        let cli = Cli::try_parse_from([
            "sloserve",
            "-o",
            "json",
            "submit",
            "--field",
            "question=who?",
            "--field",
            "context=a=b",
        ])
        .unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::Submit { field, file, .. } => {
                assert!(file.is_none());
                assert_eq!(
                    field,
                    vec![
                        ("question".to_string(), "who?".to_string()),
                        ("context".to_string(), "a=b".to_string()),
                    ]
                );
            }
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn test_parse_field_rejects_missing_separator() {
        assert!(parse_field("novalue").is_err());
        assert!(parse_field("=value").is_err());
    }
}
