//! Cloud-hosted variants.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sloserve_kernel::config::LatencyStatistic;
use sloserve_kernel::wire::EndpointDescriptor;
use sloserve_kernel::{Application, Placement, Request};
use tokio::time::Instant;

use super::VariantCore;
use crate::network::RemoteClient;

/// A model served by a remote endpoint, reached through the [`RemoteClient`].
///
/// After a failed call the variant is *cold* for `cold_window` and is not
/// offered by the selection policy.
pub struct RemoteVariant {
    pub(super) core: VariantCore,
    endpoint: String,
    kind: Application,
    client: Arc<RemoteClient>,
    cold_window: Duration,
    last_failure: Mutex<Option<Instant>>,
}

impl RemoteVariant {
    pub fn new(
        descriptor: &EndpointDescriptor,
        client: Arc<RemoteClient>,
        cold_window: Duration,
        statistic: LatencyStatistic,
    ) -> Self {
        Self {
            core: VariantCore::new(
                &descriptor.model_name,
                descriptor.accuracy,
                descriptor.dimensions,
                Placement::Remote,
                statistic,
                descriptor.latency(),
            ),
            endpoint: descriptor.endpoint_name.clone(),
            kind: descriptor.application,
            client,
            cold_window,
            last_failure: Mutex::new(None),
        }
    }

    /// Endpoint id the variant invokes.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn kind(&self) -> Application {
        self.kind
    }

    pub fn last_failure(&self) -> Option<Instant> {
        *self.last_failure.lock()
    }

    /// Within `cold_window` of the last failure.
    pub fn is_cold(&self) -> bool {
        self.last_failure
            .lock()
            .is_some_and(|at| at.elapsed() < self.cold_window)
    }

    pub fn mark_failure(&self) {
        *self.last_failure.lock() = Some(Instant::now());
    }

    pub(super) async fn execute(&self, request: &Request) -> Option<String> {
        let data = request.remote_data();
        let _permit = self.core.acquire().await?;
        let started = Instant::now();
        let result = self
            .client
            .dispatch(self.kind, self.core.name(), &self.endpoint, data)
            .await;
        match result {
            Ok(output) => {
                let elapsed = started.elapsed();
                self.core.record(elapsed);
                tracing::debug!(
                    request_id = request.id(),
                    variant = %self.core.name(),
                    endpoint = %self.endpoint,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "remote execution finished"
                );
                Some(output)
            }
            Err(err) => {
                self.mark_failure();
                tracing::warn!(
                    request_id = request.id(),
                    variant = %self.core.name(),
                    endpoint = %self.endpoint,
                    error = %err,
                    "remote execution failed, variant marked cold"
                );
                None
            }
        }
    }
}
