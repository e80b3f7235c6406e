//! sloserve CLI - run, probe and inspect the SLO-aware inference scheduler

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands, ConfigCommands};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let rt = tokio::runtime::Runtime::new()?;
    if let Err(err) = rt.block_on(run_command(cli)) {
        eprintln!("{} {err:#}", "error:".red().bold());
        std::process::exit(1);
    }
    Ok(())
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `-v`.
fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = commands::load_config(cli.config.as_deref())?;
    let output = cli.output;

    match cli.command {
        Commands::Run {
            application,
            requests,
            rate,
            min_accuracy,
            max_latency_ms,
            payload_bytes,
            profile,
            profile_remote,
            remote_warm_up_ms,
        } => {
            let workload = commands::run::Workload {
                application: application.into(),
                requests,
                rate,
                min_accuracy,
                max_latency_ms,
                payload_bytes,
                profile_runs: profile,
                remote_profile_runs: profile_remote,
                remote_warm_up: std::time::Duration::from_millis(remote_warm_up_ms),
            };
            commands::run::run(config, workload, output).await?;
        }

        Commands::Submit {
            file,
            field,
            min_accuracy,
            max_latency_ms,
        } => {
            commands::submit::run(
                config,
                file.as_deref(),
                field,
                min_accuracy,
                max_latency_ms,
                output,
            )
            .await?;
        }

        Commands::Probe { rounds } => {
            commands::probe::run(&config, rounds, output).await?;
        }

        Commands::Variants {
            application,
            remote,
        } => {
            commands::variants::run(&config, application.map(Into::into), remote, output).await?;
        }

        Commands::Config { action } => match action {
            ConfigCommands::Show => commands::config_cmd::run_show(&config)?,
            ConfigCommands::Validate => commands::config_cmd::run_validate(&config)?,
        },
    }

    Ok(())
}
