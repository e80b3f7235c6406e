//! Request execution: selection, retries and speculative backups.

use std::sync::Arc;
use std::time::Duration;

use sloserve_kernel::config::{BackupPolicy, PlacementMode};
use sloserve_kernel::{Placement, Request, VariantRef};

use super::Model;
use crate::variant::Variant;

/// Margin applied to the backup's expected latency in proactive mode.
const PROACTIVE_BACKUP_FACTOR: f64 = 1.1;

/// `budget - 1.1 * latency`, never negative and never longer than `budget`.
fn proactive_delay(budget: Duration, latency: Duration) -> Duration {
    let reserved = Duration::try_from_secs_f64(latency.as_secs_f64() * PROACTIVE_BACKUP_FACTOR)
        .unwrap_or(Duration::MAX);
    budget.saturating_sub(reserved)
}

impl Model {
    /// Serve `request` until it completes, is abandoned or the model shuts
    /// down. Returns the variant that completed it.
    ///
    /// Every attempt re-selects a variant against the budget left since
    /// submission. Failed attempts back off for `retry_backoff` and retry,
    /// up to `max_attempts` when one is configured.
    ///
    /// With proxy-selected placement the proxy gets one attempt first; the
    /// retry loop then only serves the fastest local variant.
    #[tracing::instrument(
        skip_all,
        fields(request_id = request.id(), application = %self.application)
    )]
    pub async fn execute(self: &Arc<Self>, request: &Arc<Request>) -> Option<VariantRef> {
        let slo = request.slo();
        let submitted_at = request.submitted_at().unwrap_or_else(|| request.created_at());
        if self.policy.placement == PlacementMode::ProxySelected
            && !self.cancel.is_cancelled()
            && self.execute_proxy_selected(request).await
        {
            return request.variant_used();
        }
        let mut backup_started = false;
        let mut attempts: u32 = 0;

        loop {
            if request.is_complete() {
                return request.variant_used();
            }
            if self.cancel.is_cancelled() {
                request.abandon();
                return None;
            }

            let remaining = slo.max_latency.saturating_sub(submitted_at.elapsed());
            attempts += 1;
            match self.pick_variant(slo.min_accuracy, remaining, request).await {
                Ok(variant) => {
                    request.record_attempt(variant.identity());
                    if !backup_started && self.wants_backup(&variant) {
                        backup_started = true;
                        self.spawn_backup(Arc::clone(request), remaining);
                    }
                    if self.execute_with_variant(&variant, request).await {
                        return request.variant_used();
                    }
                    tracing::warn!(
                        variant = %variant.name(),
                        attempt = attempts,
                        "execution failed, retrying"
                    );
                }
                Err(err) => {
                    tracing::error!(error = %err, attempt = attempts, "variant selection failed");
                }
            }

            if self.policy.max_attempts.is_some_and(|max| attempts >= max) {
                if request.abandon() {
                    tracing::error!(attempts, "giving up on request");
                }
                return request.variant_used();
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    request.abandon();
                    return None;
                }
                _ = tokio::time::sleep(self.policy.retry_backoff) => {}
            }
        }
    }

    /// Hand the request to the proxy with a latency target of the budget left
    /// after the estimated upload. `true` when the request is complete
    /// afterwards.
    async fn execute_proxy_selected(&self, request: &Request) -> bool {
        let submitted_at = request.submitted_at().unwrap_or_else(|| request.created_at());
        let remaining = request.slo().max_latency.saturating_sub(submitted_at.elapsed());
        let transfer = self.client.estimate_network_time(request.size_bytes());
        request.set_network_estimate(transfer);
        let target = self
            .time_budget(remaining, Duration::ZERO)
            .saturating_sub(transfer);

        let result = tokio::select! {
            _ = self.cancel.cancelled() => return false,
            result = self.client.infer_with_slo(self.application, request.remote_data(), target) => result,
        };
        let selection = match result {
            Ok(selection) => selection,
            Err(err) => {
                tracing::warn!(error = %err, "proxy-selected inference failed, falling back to local");
                return request.is_complete();
            }
        };
        let used = VariantRef::new(
            selection.endpoint.model_name.as_str(),
            selection.endpoint.accuracy,
            Placement::Remote,
        );
        request.record_attempt(used.clone());
        if request.complete_with(used, selection.output) {
            tracing::info!(
                request_id = request.id(),
                variant = %selection.endpoint.model_name,
                endpoint = %selection.endpoint.endpoint_name,
                response_ms = request.response_time().map(|d| d.as_millis() as u64),
                within_slo = request.completed_within_latency(),
                "request completed by proxy-selected model"
            );
        }
        true
    }

    /// Run one attempt. `true` when the request is complete afterwards,
    /// whichever executor completed it.
    pub(crate) async fn execute_with_variant(&self, variant: &Variant, request: &Request) -> bool {
        if request.is_complete() {
            return true;
        }
        if let Err(err) = variant.load().await {
            tracing::warn!(variant = %variant.name(), error = %err, "variant failed to load");
            return false;
        }
        let Some(output) = variant.execute(request).await else {
            return request.is_complete();
        };
        if request.complete_with(variant.identity(), output) {
            tracing::info!(
                request_id = request.id(),
                variant = %variant.name(),
                placement = %variant.placement(),
                response_ms = request.response_time().map(|d| d.as_millis() as u64),
                within_slo = request.completed_within_latency(),
                "request completed"
            );
        }
        true
    }

    fn wants_backup(&self, primary: &Variant) -> bool {
        match self.policy.backup {
            BackupPolicy::Off => false,
            BackupPolicy::Remote => primary.is_remote(),
            BackupPolicy::Always => true,
        }
    }

    /// Delay before the backup starts.
    ///
    /// Proactive backups start early enough for the fastest local variant to
    /// finish within `budget` with a 10% margin; otherwise the backup waits
    /// out the budget.
    fn backup_delay(&self, budget: Duration, fastest: &Variant) -> Duration {
        if self.policy.proactive_backup {
            proactive_delay(budget, fastest.latency())
        } else {
            budget
        }
    }

    fn spawn_backup(self: &Arc<Self>, request: Arc<Request>, budget: Duration) {
        let Some(fastest) = self.fastest_local() else {
            return;
        };
        let delay = self.backup_delay(budget, &fastest);
        let model = Arc::clone(self);
        tracing::debug!(
            request_id = request.id(),
            backup = %fastest.name(),
            delay_ms = delay.as_millis() as u64,
            "speculative backup scheduled"
        );
        self.tasks.spawn(async move {
            tokio::select! {
                _ = model.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if request.is_complete() {
                return;
            }
            tracing::info!(
                request_id = request.id(),
                backup = %fastest.name(),
                "primary still running, starting backup"
            );
            request.record_attempt(fastest.identity());
            model.execute_with_variant(&fastest, &request).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proactive_delay_leaves_room_for_backup() {
        let delay = proactive_delay(Duration::from_millis(1_000), Duration::from_millis(50));
        assert!(delay.abs_diff(Duration::from_millis(945)) < Duration::from_micros(1));
    }

    #[test]
    fn test_proactive_delay_never_exceeds_budget() {
        for budget_ms in [0u64, 10, 60, 1_000, 60_000] {
            let budget = Duration::from_millis(budget_ms);
            assert!(proactive_delay(budget, Duration::from_millis(50)) <= budget);
        }
        assert_eq!(
            proactive_delay(Duration::from_millis(40), Duration::from_millis(50)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_proactive_delay_saturates_on_huge_values() {
        assert_eq!(proactive_delay(Duration::MAX, Duration::MAX), Duration::ZERO);
        assert_eq!(
            proactive_delay(Duration::MAX, Duration::ZERO),
            Duration::MAX
        );
    }
}
