//! Per-application model.
//!
//! A [`Model`] aggregates every way of serving one application: the
//! on-device variants fixed at startup and a cache of remote variants
//! discovered through the proxy. It owns the selection policy
//! ([`Model::pick_variant`]) and the execute/retry/backup loop
//! ([`Model::execute`]).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── Model ────────────────────────────┐
//! │  local variants (static)      remote cache (RwLock, TTL)      │
//! │            └──────────┬──────────────┘                        │
//! │                 pick_variant  ◀── NetworkEstimator            │
//! │                       │                                       │
//! │       execute ── retry/backoff ── speculative backup task     │
//! │                       │                                       │
//! │              Request::complete_with (once)                    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Background work (cache refreshes, backups) runs on the model's own
//! `TaskTracker` and stops when its `CancellationToken` fires.

mod execution;
mod selection;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use sloserve_kernel::config::{BackupPolicy, LatencyStatistic, PlacementMode, SloServeConfig};
use sloserve_kernel::{Application, LocalRuntime, Request, RequestData};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::network::RemoteClient;
use crate::variant::{LocalVariant, Variant};

/// Deadline given to the synthetic requests used for profiling.
const PROFILING_DEADLINE: Duration = Duration::from_secs(3600);

/// Selection and orchestration knobs of a [`Model`].
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPolicy {
    pub placement: PlacementMode,
    pub baseline_discovery: bool,
    pub latency_buffer: f64,
    pub resize_overhead: Duration,
    pub statistic: LatencyStatistic,
    pub backup: BackupPolicy,
    pub proactive_backup: bool,
    pub max_attempts: Option<u32>,
    pub retry_backoff: Duration,
    pub cache_ttl: Duration,
    pub discovery_ceiling: Duration,
}

impl ModelPolicy {
    pub fn from_config(config: &SloServeConfig) -> Self {
        let selection = &config.selection;
        Self {
            placement: config.placement,
            baseline_discovery: selection.baseline_discovery,
            latency_buffer: selection.latency_buffer,
            resize_overhead: selection.resize_overhead(),
            statistic: selection.summary.statistic(),
            backup: selection.backup,
            proactive_backup: selection.proactive_backup,
            max_attempts: selection.max_attempts,
            retry_backoff: selection.retry_backoff(),
            cache_ttl: config.remote.cache_ttl(),
            discovery_ceiling: config.remote.discovery_latency_ceiling(),
        }
    }
}

impl Default for ModelPolicy {
    fn default() -> Self {
        Self::from_config(&SloServeConfig::default())
    }
}

#[derive(Default)]
struct RemoteCache {
    variants: Vec<Arc<Variant>>,
    refreshed_at: Option<Instant>,
}

/// All variants serving one application, plus the policy choosing among them.
pub struct Model {
    application: Application,
    policy: ModelPolicy,
    local: Vec<Arc<Variant>>,
    remote: RwLock<RemoteCache>,
    client: Arc<RemoteClient>,
    refresh_in_flight: AtomicBool,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl Model {
    pub fn new(
        application: Application,
        local: Vec<Variant>,
        client: Arc<RemoteClient>,
        policy: ModelPolicy,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            application,
            policy,
            local: local.into_iter().map(Arc::new).collect(),
            remote: RwLock::new(RemoteCache::default()),
            client,
            refresh_in_flight: AtomicBool::new(false),
            tasks: TaskTracker::new(),
            cancel,
        })
    }

    /// Model for `application` with the on-device variants listed in `config`.
    pub fn from_config(
        application: Application,
        config: &SloServeConfig,
        runtime: Arc<dyn LocalRuntime>,
        client: Arc<RemoteClient>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let policy = ModelPolicy::from_config(config);
        let local = config
            .applications
            .get(&application)
            .into_iter()
            .flatten()
            .map(|v| Variant::Local(LocalVariant::new(v, Arc::clone(&runtime), policy.statistic)))
            .collect();
        Self::new(application, local, client, policy, cancel)
    }

    pub fn application(&self) -> Application {
        self.application
    }

    pub fn policy(&self) -> &ModelPolicy {
        &self.policy
    }

    pub fn client(&self) -> &Arc<RemoteClient> {
        &self.client
    }

    pub fn local_variants(&self) -> &[Arc<Variant>] {
        &self.local
    }

    /// Snapshot of the cached remote variants.
    pub fn remote_variants(&self) -> Vec<Arc<Variant>> {
        self.remote.read().variants.clone()
    }

    /// Local variant with the lowest summary latency (first one on ties).
    pub fn fastest_local(&self) -> Option<Arc<Variant>> {
        self.local.iter().min_by_key(|v| v.latency()).cloned()
    }

    fn fastest_remote(&self) -> Option<Arc<Variant>> {
        self.remote
            .read()
            .variants
            .iter()
            .min_by_key(|v| v.latency())
            .cloned()
    }

    // ------------------------------------------------------------------------
    // Remote cache
    // ------------------------------------------------------------------------

    fn cache_is_stale(&self) -> bool {
        match self.remote.read().refreshed_at {
            Some(at) => at.elapsed() > self.policy.cache_ttl,
            None => true,
        }
    }

    /// Re-run discovery and swap the cache.
    ///
    /// Variants already cached under the same endpoint id are kept, so their
    /// latency history and cold state survive the refresh.
    pub async fn refresh_remote_cache(&self) {
        let discovered = self
            .client
            .discover_candidates(
                0.0,
                self.policy.discovery_ceiling,
                self.application,
                self.policy.statistic,
            )
            .await;

        let mut cache = self.remote.write();
        let merged: Vec<Arc<Variant>> = discovered
            .into_iter()
            .map(|candidate| {
                cache
                    .variants
                    .iter()
                    .find(|existing| {
                        existing
                            .as_remote()
                            .is_some_and(|r| r.endpoint() == candidate.endpoint())
                    })
                    .cloned()
                    .unwrap_or_else(|| Arc::new(Variant::Remote(candidate)))
            })
            .collect();
        tracing::debug!(
            application = %self.application,
            count = merged.len(),
            "remote variant cache refreshed"
        );
        cache.variants = merged;
        cache.refreshed_at = Some(Instant::now());
    }

    fn spawn_cache_refresh(self: &Arc<Self>) {
        if self.refresh_in_flight.swap(true, Ordering::AcqRel) {
            return;
        }
        let model = Arc::clone(self);
        self.tasks.spawn(async move {
            tokio::select! {
                _ = model.cancel.cancelled() => {}
                _ = model.refresh_remote_cache() => {}
            }
            model.refresh_in_flight.store(false, Ordering::Release);
        });
    }

    /// Cached remote variants with accuracy of at least `floor`.
    ///
    /// A stale cache is refreshed in the background (this call returns the
    /// current contents), or in place when `force_refresh` is set.
    pub(crate) async fn remote_candidates(
        self: &Arc<Self>,
        floor: f64,
        force_refresh: bool,
    ) -> Vec<Arc<Variant>> {
        if force_refresh {
            self.refresh_remote_cache().await;
        } else if self.cache_is_stale() {
            self.spawn_cache_refresh();
        }
        self.remote
            .read()
            .variants
            .iter()
            .filter(|v| v.accuracy() >= floor)
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Load every local variant and run it `executions` times on `sample` to
    /// seed its latency history.
    pub async fn profile_local_variants(&self, sample: &RequestData, executions: usize) {
        for variant in &self.local {
            if let Err(err) = variant.load().await {
                tracing::warn!(variant = %variant.name(), error = %err, "profiling load failed");
                continue;
            }
            for _ in 0..executions {
                let request = Request::new(sample.clone(), 0.0, PROFILING_DEADLINE);
                variant.execute(&request).await;
            }
            tracing::info!(
                application = %self.application,
                variant = %variant.name(),
                latency_ms = variant.latency().as_millis() as u64,
                "profiled local variant"
            );
        }
    }

    /// Refresh the remote cache, then run every cached remote variant
    /// `executions` times on `sample` so selection works from measured
    /// latencies instead of advertised ones.
    ///
    /// Each variant first serves one warm-up call followed by `warm_up_pause`
    /// to let the endpoint scale up. A failed call leaves the variant cold
    /// and ends its profiling.
    pub async fn profile_remote_variants(
        &self,
        sample: &RequestData,
        executions: usize,
        warm_up_pause: Duration,
    ) {
        if sample.application() != self.application {
            tracing::warn!(
                application = %self.application,
                sample = %sample.application(),
                "profiling sample does not match the application"
            );
            return;
        }
        self.refresh_remote_cache().await;
        for variant in self.remote_variants() {
            if let Err(err) = variant.load().await {
                tracing::warn!(variant = %variant.name(), error = %err, "profiling load failed");
                continue;
            }
            for run in 0..=executions {
                let request = Request::new(sample.clone(), 0.0, PROFILING_DEADLINE);
                if variant.execute(&request).await.is_none() {
                    break;
                }
                if run == 0 && !warm_up_pause.is_zero() {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(warm_up_pause) => {}
                    }
                }
            }
            if let Err(err) = variant.unload().await {
                tracing::warn!(variant = %variant.name(), error = %err, "unload failed");
            }
            tracing::info!(
                application = %self.application,
                variant = %variant.name(),
                samples = variant.history().len(),
                latency_ms = variant.latency().as_millis() as u64,
                "profiled remote variant"
            );
        }
    }

    /// Stop background work and unload local variants.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        for variant in &self.local {
            if let Err(err) = variant.unload().await {
                tracing::warn!(variant = %variant.name(), error = %err, "unload failed");
            }
        }
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("application", &self.application)
            .field("local", &self.local)
            .field("remote", &self.remote.read().variants)
            .finish()
    }
}
