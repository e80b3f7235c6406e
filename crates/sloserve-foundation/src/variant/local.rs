//! On-device variants.

use std::sync::Arc;

use sloserve_kernel::config::{LatencyStatistic, LocalVariantConfig};
use sloserve_kernel::{LocalRuntime, Placement, Request};
use tokio::time::Instant;

use super::VariantCore;

/// A model executed by the on-device [`LocalRuntime`].
pub struct LocalVariant {
    pub(super) core: VariantCore,
    pub(super) runtime: Arc<dyn LocalRuntime>,
}

impl LocalVariant {
    pub fn new(
        config: &LocalVariantConfig,
        runtime: Arc<dyn LocalRuntime>,
        statistic: LatencyStatistic,
    ) -> Self {
        Self {
            core: VariantCore::new(
                &config.name,
                config.accuracy,
                config.dimensions,
                Placement::Local,
                statistic,
                config.latency(),
            ),
            runtime,
        }
    }

    pub(super) async fn execute(&self, request: &Request) -> Option<String> {
        let data = request.local_data();
        let _permit = self.core.acquire().await?;
        let started = Instant::now();
        match self.runtime.run(self.core.name(), data).await {
            Ok(output) => {
                let elapsed = started.elapsed();
                self.core.record(elapsed);
                tracing::debug!(
                    request_id = request.id(),
                    variant = %self.core.name(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "local execution finished"
                );
                Some(output)
            }
            Err(err) => {
                tracing::warn!(
                    request_id = request.id(),
                    variant = %self.core.name(),
                    error = %err,
                    "local execution failed"
                );
                None
            }
        }
    }
}
