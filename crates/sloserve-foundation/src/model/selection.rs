//! Variant selection (admission control).
//!
//! Given the remaining latency budget and the accuracy floor of a request,
//! pick the most accurate variant expected to finish in time:
//!
//! 1. No local variant fits the deadline: serve with the fastest local one.
//! 2. `best_local`: most accurate local variant meeting both SLO terms,
//!    otherwise the fastest local one.
//! 3. Local-only placement stops here. Proxy-selected placement, whose
//!    remote attempt already failed, serves with the fastest local variant.
//! 4. Estimate the transfer time of the request's remote payload.
//! 5. Fetch remote candidates, floored at `best_local`'s accuracy when
//!    baseline discovery is on.
//! 6. `budget = latency_buffer * (max_latency - discovery - resize_overhead)`.
//! 7. Keep candidates that meet the accuracy floor, are available and fit the
//!    budget (remote ones after paying the transfer time).
//! 8. Highest accuracy wins; nothing left means the fastest local variant.

use std::sync::Arc;
use std::time::Duration;

use sloserve_kernel::Request;
use sloserve_kernel::config::PlacementMode;
use tokio::time::Instant;

use super::Model;
use crate::error::{ModelError, ModelResult};
use crate::variant::Variant;

/// Most accurate variant; the first one wins ties.
fn most_accurate<'a, I>(variants: I) -> Option<&'a Arc<Variant>>
where
    I: IntoIterator<Item = &'a Arc<Variant>>,
{
    variants.into_iter().fold(None, |best, v| match best {
        Some(b) if b.accuracy() >= v.accuracy() => Some(b),
        _ => Some(v),
    })
}

/// Whether `variant` can run within `budget`, counting `transfer` for remote
/// variants.
fn fits(variant: &Variant, budget: Duration, transfer: Duration) -> bool {
    if !variant.is_available() {
        return false;
    }
    match variant {
        Variant::Local(_) => variant.latency() <= budget,
        Variant::Remote(_) => variant.latency().saturating_add(transfer) <= budget,
    }
}

impl Model {
    /// Usable share of the remaining deadline after discovery and input
    /// preparation.
    ///
    /// A latency buffer that yields no valid duration gives an empty budget.
    pub fn time_budget(&self, max_latency: Duration, discovery: Duration) -> Duration {
        let remaining = max_latency
            .saturating_sub(discovery)
            .saturating_sub(self.policy.resize_overhead);
        Duration::try_from_secs_f64(remaining.as_secs_f64() * self.policy.latency_buffer)
            .unwrap_or(Duration::ZERO)
    }

    /// Choose the variant that serves `request` within `max_latency`.
    #[tracing::instrument(
        skip_all,
        fields(request_id = request.id(), application = %self.application)
    )]
    pub async fn pick_variant(
        self: &Arc<Self>,
        min_accuracy: f64,
        max_latency: Duration,
        request: &Request,
    ) -> ModelResult<Arc<Variant>> {
        if self.policy.placement == PlacementMode::RemoteOnly {
            return self.pick_remote_only(min_accuracy, max_latency, request).await;
        }

        let fastest = self
            .fastest_local()
            .ok_or(ModelError::NoVariants(self.application))?;

        if !self.local.iter().any(|v| v.latency() <= max_latency) {
            tracing::warn!(
                max_latency_ms = max_latency.as_millis() as u64,
                fastest = %fastest.name(),
                "deadline unreachable, using fastest local variant"
            );
            return Ok(fastest);
        }

        let best_local = most_accurate(
            self.local
                .iter()
                .filter(|v| v.latency() <= max_latency && v.accuracy() >= min_accuracy),
        )
        .cloned()
        .unwrap_or_else(|| Arc::clone(&fastest));

        match self.policy.placement {
            PlacementMode::LocalOnly => return Ok(best_local),
            PlacementMode::ProxySelected => return Ok(fastest),
            PlacementMode::Hybrid | PlacementMode::RemoteOnly => {}
        }

        let transfer = self.client.estimate_network_time(request.size_bytes());
        request.set_network_estimate(transfer);

        let floor = if self.policy.baseline_discovery {
            best_local.accuracy()
        } else {
            0.0
        };
        let started = Instant::now();
        let remote = self.remote_candidates(floor, false).await;
        let budget = self.time_budget(max_latency, started.elapsed());

        let chosen = most_accurate(
            self.local
                .iter()
                .chain(remote.iter())
                .filter(|v| v.accuracy() >= min_accuracy && fits(v, budget, transfer)),
        )
        .cloned();

        match chosen {
            Some(variant) => {
                tracing::debug!(
                    variant = %variant.name(),
                    placement = %variant.placement(),
                    budget_ms = budget.as_millis() as u64,
                    transfer_ms = transfer.as_millis() as u64,
                    "variant selected"
                );
                Ok(variant)
            }
            None => {
                tracing::debug!(
                    fastest = %fastest.name(),
                    "no variant meets the SLO, using fastest local variant"
                );
                Ok(fastest)
            }
        }
    }

    async fn pick_remote_only(
        self: &Arc<Self>,
        min_accuracy: f64,
        max_latency: Duration,
        request: &Request,
    ) -> ModelResult<Arc<Variant>> {
        let transfer = self.client.estimate_network_time(request.size_bytes());
        request.set_network_estimate(transfer);

        let started = Instant::now();
        let remote = self.remote_candidates(0.0, true).await;
        let budget = self.time_budget(max_latency, started.elapsed());

        most_accurate(
            remote
                .iter()
                .filter(|v| v.accuracy() >= min_accuracy && fits(v, budget, transfer)),
        )
        .cloned()
        .or_else(|| self.fastest_remote())
        .or_else(|| self.fastest_local())
        .ok_or(ModelError::NoVariants(self.application))
    }
}
