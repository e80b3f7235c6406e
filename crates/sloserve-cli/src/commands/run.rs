//! `sloserve run` command implementation
//!
//! Profiles the local (and optionally remote) variants, starts a scheduler
//! and replays a synthetic
//! workload at a fixed arrival rate, then prints per-request reports and an
//! SLO summary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use colored::Colorize;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;
use sloserve_foundation::SchedulerError;
use sloserve_kernel::config::PlacementMode;
use sloserve_kernel::{
    Application, Outcome, Placement, Request, RequestData, RequestReport, SloServeConfig,
};
use tokio::time::MissedTickBehavior;

use super::{build_scheduler, print_json, print_report};
use crate::cli::OutputFormat;

/// Shape of the synthetic workload.
#[derive(Debug, Clone)]
pub struct Workload {
    pub application: Application,
    pub requests: usize,
    /// Requests per second
    pub rate: f64,
    pub min_accuracy: f64,
    pub max_latency_ms: u64,
    pub payload_bytes: usize,
    pub profile_runs: usize,
    /// Measured runs per remote variant; zero skips remote profiling
    pub remote_profile_runs: usize,
    /// Pause after each remote variant's warm-up call
    pub remote_warm_up: Duration,
}

/// Execute the `sloserve run` command
pub async fn run(
    config: SloServeConfig,
    workload: Workload,
    output: OutputFormat,
) -> anyhow::Result<()> {
    anyhow::ensure!(
        workload.rate.is_finite() && workload.rate > 0.0,
        "rate must be a positive number, got {}",
        workload.rate
    );
    let period = Duration::try_from_secs_f64(1.0 / workload.rate)
        .context("invalid arrival rate")?
        .max(Duration::from_micros(1));

    let profile_remote =
        workload.remote_profile_runs > 0 && config.placement != PlacementMode::LocalOnly;
    let (scheduler, _runtime) = build_scheduler(config)?;
    let model = scheduler
        .model(workload.application)
        .with_context(|| format!("no model configured for '{}'", workload.application))?;

    if workload.profile_runs > 0 {
        if output == OutputFormat::Text {
            println!("{} local variants...", "Profiling".green().bold());
        }
        let sample = synthetic_payload(workload.application, workload.payload_bytes);
        model.profile_local_variants(&sample, workload.profile_runs).await;
    }
    if profile_remote {
        if output == OutputFormat::Text {
            println!("{} remote variants...", "Profiling".green().bold());
        }
        let sample = synthetic_payload(workload.application, workload.payload_bytes);
        model
            .profile_remote_variants(
                &sample,
                workload.remote_profile_runs,
                workload.remote_warm_up,
            )
            .await;
    }

    scheduler.start();
    if output == OutputFormat::Text {
        println!(
            "{} {} {} requests at {:.1} req/s (accuracy >= {}, latency <= {} ms)",
            "Submitting".green().bold(),
            workload.requests,
            workload.application,
            workload.rate,
            workload.min_accuracy,
            workload.max_latency_ms,
        );
    }

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut submitted = Vec::with_capacity(workload.requests);
    for _ in 0..workload.requests {
        ticker.tick().await;
        let request = Arc::new(Request::new(
            synthetic_payload(workload.application, workload.payload_bytes),
            workload.min_accuracy,
            Duration::from_millis(workload.max_latency_ms),
        ));
        match scheduler.add_request(Arc::clone(&request)) {
            Ok(()) => submitted.push(request),
            Err(err @ SchedulerError::QueueFull { .. }) => {
                tracing::warn!(request_id = request.id(), error = %err, "request dropped");
            }
            Err(err) => return Err(err.into()),
        }
    }

    let mut reports = Vec::with_capacity(submitted.len());
    for request in &submitted {
        request.wait().await;
        let report = request.report();
        print_report(&report, output)?;
        reports.push(report);
    }
    scheduler.shutdown().await;

    let summary = Summary::from_reports(workload.requests, &reports);
    match output {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Text => summary.print(),
    }
    Ok(())
}

/// Random payload of roughly `bytes` bytes for `application`.
pub fn synthetic_payload(application: Application, bytes: usize) -> RequestData {
    let mut rng = rand::thread_rng();
    match application {
        Application::Image => {
            let mut pixels = vec![0u8; bytes];
            rng.fill(&mut pixels[..]);
            RequestData::Image(pixels.into())
        }
        Application::Text => {
            let text: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(bytes)
                .map(char::from)
                .collect();
            RequestData::Text([("text".to_string(), text)].into_iter().collect())
        }
    }
}

/// Aggregate SLO attainment of a workload run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub offered: usize,
    pub submitted: usize,
    pub completed: usize,
    pub abandoned: usize,
    pub within_latency: usize,
    pub met_accuracy: usize,
    pub remote: usize,
    pub mean_response_ms: Option<f64>,
    pub max_response_ms: Option<f64>,
    pub mean_accuracy: Option<f64>,
}

impl Summary {
    pub fn from_reports(offered: usize, reports: &[RequestReport]) -> Self {
        let completed: Vec<&RequestReport> = reports
            .iter()
            .filter(|r| r.outcome == Outcome::Completed)
            .collect();
        let responses: Vec<f64> = completed
            .iter()
            .filter_map(|r| r.response_time_s.map(|s| s * 1000.0))
            .collect();
        let accuracies: Vec<f64> = completed.iter().filter_map(|r| r.accuracy).collect();

        Self {
            offered,
            submitted: reports.len(),
            completed: completed.len(),
            abandoned: reports
                .iter()
                .filter(|r| r.outcome == Outcome::Abandoned)
                .count(),
            within_latency: completed
                .iter()
                .filter(|r| r.completed_within_latency == Some(true))
                .count(),
            met_accuracy: completed
                .iter()
                .filter(|r| r.accuracy.is_some_and(|a| a >= r.min_accuracy))
                .count(),
            remote: completed
                .iter()
                .filter(|r| {
                    r.variant_used
                        .as_ref()
                        .is_some_and(|v| v.placement == Placement::Remote)
                })
                .count(),
            mean_response_ms: mean(&responses),
            max_response_ms: responses.iter().copied().reduce(f64::max),
            mean_accuracy: mean(&accuracies),
        }
    }

    fn print(&self) {
        let pct = |n: usize| {
            if self.completed == 0 {
                0.0
            } else {
                100.0 * n as f64 / self.completed as f64
            }
        };
        let ms = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.1} ms"));

        println!();
        println!("  {}", "Summary".bold());
        println!(
            "    Requests:  {} offered, {} submitted, {} completed, {} abandoned",
            self.offered,
            self.submitted,
            self.completed.to_string().green(),
            self.abandoned.to_string().red(),
        );
        println!(
            "    SLO:       {:.1}% within latency, {:.1}% met accuracy",
            pct(self.within_latency),
            pct(self.met_accuracy),
        );
        println!(
            "    Response:  mean {}, max {}",
            ms(self.mean_response_ms),
            ms(self.max_response_ms),
        );
        println!(
            "    Placement: {} remote of {} completed, mean accuracy {}",
            self.remote,
            self.completed,
            self.mean_accuracy
                .map_or_else(|| "-".to_string(), |a| format!("{a:.3}")),
        );
        println!();
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
