//! `sloserve submit` command implementation

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sloserve_kernel::{Request, RequestData, SloServeConfig};

use super::{build_scheduler, print_report};
use crate::cli::OutputFormat;

/// Execute the `sloserve submit` command
pub async fn run(
    config: SloServeConfig,
    file: Option<&Path>,
    fields: Vec<(String, String)>,
    min_accuracy: f64,
    max_latency_ms: u64,
    output: OutputFormat,
) -> anyhow::Result<()> {
    let payload = payload_from_args(file, fields)?;
    let (scheduler, _runtime) = build_scheduler(config)?;
    scheduler.start();

    let request = Arc::new(Request::new(
        payload,
        min_accuracy,
        Duration::from_millis(max_latency_ms),
    ));
    scheduler.submit(Arc::clone(&request)).await?;
    print_report(&request.report(), output)?;
    if let (OutputFormat::Text, Some(label)) = (output, request.output()) {
        println!("  output: {label}");
    }

    scheduler.shutdown().await;
    Ok(())
}

/// Image payload from `file`, or a text payload from `fields`.
pub fn payload_from_args(
    file: Option<&Path>,
    fields: Vec<(String, String)>,
) -> anyhow::Result<RequestData> {
    match file {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Ok(RequestData::Image(bytes.into()))
        }
        None => {
            anyhow::ensure!(
                !fields.is_empty(),
                "provide an image with --file or text with --field key=value"
            );
            Ok(RequestData::Text(fields.into_iter().collect::<BTreeMap<_, _>>()))
        }
    }
}
