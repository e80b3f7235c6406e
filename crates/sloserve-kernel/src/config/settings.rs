//! Typed configuration of a sloserve deployment.
//!
//! Every section implements `Default`, and every struct is
//! `#[serde(default)]`, so a configuration file only needs the keys it
//! changes. Durations are written in milliseconds.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ConfigError, ConfigResult, ENV_PREFIX};
use crate::types::{Application, QueueOrdering};

// ============================================================================
// Enums
// ============================================================================

/// Which kinds of variants the selection policy may pick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementMode {
    /// On-device and remote variants compete
    #[default]
    Hybrid,
    /// Never consult the remote proxy
    LocalOnly,
    /// Only remote variants; on-device models are a last resort
    RemoteOnly,
    /// The proxy picks the remote model for a latency target; the fastest
    /// on-device variant serves when the proxy fails
    ProxySelected,
}

/// When a speculative on-device backup is raced against the primary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupPolicy {
    #[default]
    Off,
    /// Only when the primary variant is remote
    Remote,
    /// For every primary
    Always,
}

/// How remote variants reach their model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Invoke the cloud endpoint directly
    #[default]
    Direct,
    /// Go through the proxy's direct inference route
    Proxy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryMode {
    Mean,
    #[default]
    Percentile,
}

/// Statistic used to summarize a variant's latency history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LatencyStatistic {
    Mean,
    /// `sorted[floor(p * n)]`, `p` in `(0, 1)`
    Percentile(f64),
}

impl Default for LatencyStatistic {
    fn default() -> Self {
        Self::Percentile(0.9)
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Admission queue settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub ordering: QueueOrdering,
    /// Maximum number of queued requests; unbounded when absent
    pub capacity: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub mode: SummaryMode,
    pub percentile: f64,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            mode: SummaryMode::Percentile,
            percentile: 0.9,
        }
    }
}

impl SummaryConfig {
    pub fn statistic(&self) -> LatencyStatistic {
        match self.mode {
            SummaryMode::Mean => LatencyStatistic::Mean,
            SummaryMode::Percentile => LatencyStatistic::Percentile(self.percentile),
        }
    }
}

/// Variant selection and orchestration policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Only ask the proxy for remote variants at least as accurate as the
    /// best feasible on-device variant
    pub baseline_discovery: bool,
    /// Fraction of the remaining budget a candidate may consume
    pub latency_buffer: f64,
    /// Fixed input preparation overhead subtracted from the budget
    pub resize_overhead_ms: u64,
    pub summary: SummaryConfig,
    pub backup: BackupPolicy,
    /// Start the backup early enough for the fastest local variant to finish
    pub proactive_backup: bool,
    /// Abandon a request after this many failed attempts; unbounded when absent
    pub max_attempts: Option<u32>,
    pub retry_backoff_ms: u64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            baseline_discovery: true,
            latency_buffer: 0.8,
            resize_overhead_ms: 50,
            summary: SummaryConfig::default(),
            backup: BackupPolicy::Off,
            proactive_backup: false,
            max_attempts: None,
            retry_backoff_ms: 100,
        }
    }
}

impl SelectionConfig {
    pub fn resize_overhead(&self) -> Duration {
        Duration::from_millis(self.resize_overhead_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Network estimator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Weight of the previous estimate in the moving average
    pub ema_alpha: f64,
    pub refresh_interval_ms: u64,
    /// Age after which the RTT estimate is refreshed on use
    pub rtt_ttl_ms: u64,
    /// Size of the bandwidth probe payload
    pub probe_bytes: usize,
    /// Probe rounds run before the periodic refresh starts
    pub warmup_rounds: u32,
    pub initial_bandwidth_bps: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ema_alpha: 0.5,
            refresh_interval_ms: 10_000,
            rtt_ttl_ms: 10_000,
            probe_bytes: 100_000,
            warmup_rounds: 3,
            initial_bandwidth_bps: 1_000_000.0,
        }
    }
}

impl NetworkConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn rtt_ttl(&self) -> Duration {
        Duration::from_millis(self.rtt_ttl_ms)
    }
}

/// Remote proxy and endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub proxy_url: String,
    pub endpoint_url: String,
    /// Hard timeout of a single remote call
    pub timeout_ms: u64,
    /// How long a remote variant stays excluded after a failure
    pub cold_window_ms: u64,
    /// Age after which the remote candidate cache is refreshed
    pub cache_ttl_ms: u64,
    /// Latency ceiling sent with discovery queries
    pub discovery_latency_ceiling_ms: u64,
    /// Concurrent remote calls allowed across the client
    pub upload_concurrency: usize,
    pub dispatch: DispatchMode,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            proxy_url: "http://127.0.0.1:50051".to_string(),
            endpoint_url: "http://127.0.0.1:50051".to_string(),
            timeout_ms: 5_000,
            cold_window_ms: 10_000,
            cache_ttl_ms: 60_000,
            discovery_latency_ceiling_ms: 10_000,
            upload_concurrency: 2,
            dispatch: DispatchMode::Direct,
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cold_window(&self) -> Duration {
        Duration::from_millis(self.cold_window_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn discovery_latency_ceiling(&self) -> Duration {
        Duration::from_millis(self.discovery_latency_ceiling_ms)
    }
}

/// One on-device model variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalVariantConfig {
    pub name: String,
    pub accuracy: f64,
    #[serde(default)]
    pub dimensions: u32,
    /// Profiled latency used until the variant has run
    #[serde(default)]
    pub latency_ms: u64,
}

impl LocalVariantConfig {
    pub fn new(name: impl Into<String>, accuracy: f64, latency_ms: u64) -> Self {
        Self {
            name: name.into(),
            accuracy,
            dimensions: 0,
            latency_ms,
        }
    }

    pub fn with_dimensions(mut self, dimensions: u32) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

// ============================================================================
// Root
// ============================================================================

/// Complete configuration of a scheduler instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SloServeConfig {
    /// Number of queue workers
    pub workers: usize,
    pub placement: PlacementMode,
    pub queue: QueueConfig,
    pub selection: SelectionConfig,
    pub network: NetworkConfig,
    pub remote: RemoteConfig,
    /// On-device variants per application
    pub applications: BTreeMap<Application, Vec<LocalVariantConfig>>,
}

impl Default for SloServeConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            placement: PlacementMode::Hybrid,
            queue: QueueConfig::default(),
            selection: SelectionConfig::default(),
            network: NetworkConfig::default(),
            remote: RemoteConfig::default(),
            applications: BTreeMap::new(),
        }
    }
}

impl SloServeConfig {
    /// Load from a file, apply `SLOSERVE_*` overrides and validate.
    pub fn load(path: &str) -> ConfigResult<Self> {
        let config: Self = super::load_with_env(path, ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus `SLOSERVE_*` overrides, validated.
    pub fn from_env() -> ConfigResult<Self> {
        let config: Self = super::from_env(ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_application(
        mut self,
        application: Application,
        variants: Vec<LocalVariantConfig>,
    ) -> Self {
        self.applications.insert(application, variants);
        self
    }

    pub fn with_placement(mut self, placement: PlacementMode) -> Self {
        self.placement = placement;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_ordering(mut self, ordering: QueueOrdering) -> Self {
        self.queue.ordering = ordering;
        self
    }

    pub fn with_backup(mut self, backup: BackupPolicy) -> Self {
        self.selection.backup = backup;
        self
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.workers == 0 {
            return invalid("workers must be at least 1".into());
        }
        if !(0.0..1.0).contains(&self.network.ema_alpha) {
            return invalid(format!(
                "network.ema_alpha must be in [0, 1), got {}",
                self.network.ema_alpha
            ));
        }
        let bandwidth = self.network.initial_bandwidth_bps;
        if !(bandwidth > 0.0 && bandwidth.is_finite()) {
            return invalid("network.initial_bandwidth_bps must be positive".into());
        }
        let buffer = self.selection.latency_buffer;
        if !(buffer > 0.0 && buffer < 1.0) {
            return invalid(format!(
                "selection.latency_buffer must be in (0, 1), got {buffer}"
            ));
        }
        let p = self.selection.summary.percentile;
        if self.selection.summary.mode == SummaryMode::Percentile && !(p > 0.0 && p < 1.0) {
            return invalid(format!(
                "selection.summary.percentile must be in (0, 1), got {p}"
            ));
        }
        if self.selection.max_attempts == Some(0) {
            return invalid("selection.max_attempts must be at least 1".into());
        }
        if self.queue.capacity == Some(0) {
            return invalid("queue.capacity must be at least 1".into());
        }
        if self.remote.upload_concurrency == 0 {
            return invalid("remote.upload_concurrency must be at least 1".into());
        }
        if self.applications.is_empty() {
            return invalid("at least one application must be configured".into());
        }
        for (application, variants) in &self.applications {
            if variants.is_empty() && self.placement != PlacementMode::RemoteOnly {
                return invalid(format!(
                    "application '{application}' has no on-device variants"
                ));
            }
            for variant in variants {
                if !(0.0..=1.0).contains(&variant.accuracy) {
                    return invalid(format!(
                        "variant '{}' accuracy must be in [0, 1], got {}",
                        variant.name, variant.accuracy
                    ));
                }
            }
        }
        Ok(())
    }
}
