//! Simulated on-device runtime.
//!
//! [`SimulatedRuntime`] stands in for a real on-device inference engine: each
//! model sleeps for its configured latency and returns a deterministic
//! label. Models can be switched into a failing mode to exercise retries.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use sloserve_kernel::config::SloServeConfig;
use sloserve_kernel::{LocalRuntime, RequestData, RuntimeError, RuntimeResult};

#[derive(Debug, Clone, Default)]
struct ModelState {
    latency: Option<Duration>,
    failing: bool,
    loaded: bool,
    loads: usize,
    runs: usize,
}

/// Deterministic runtime that sleeps instead of computing.
#[derive(Debug)]
pub struct SimulatedRuntime {
    default_latency: Duration,
    models: RwLock<HashMap<String, ModelState>>,
}

impl SimulatedRuntime {
    pub fn new(default_latency: Duration) -> Self {
        Self {
            default_latency,
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Runtime whose models take their configured profile latency.
    pub fn from_config(config: &SloServeConfig) -> Self {
        let runtime = Self::new(Duration::from_millis(10));
        for variant in config.applications.values().flatten() {
            runtime.set_latency(&variant.name, variant.latency());
        }
        runtime
    }

    pub fn with_model(self, model: &str, latency: Duration) -> Self {
        self.set_latency(model, latency);
        self
    }

    pub fn set_latency(&self, model: &str, latency: Duration) {
        self.models.write().entry(model.to_string()).or_default().latency = Some(latency);
    }

    /// Make every subsequent run of `model` fail (or succeed again).
    pub fn set_failing(&self, model: &str, failing: bool) {
        self.models.write().entry(model.to_string()).or_default().failing = failing;
    }

    pub fn load_count(&self, model: &str) -> usize {
        self.models.read().get(model).map_or(0, |m| m.loads)
    }

    pub fn run_count(&self, model: &str) -> usize {
        self.models.read().get(model).map_or(0, |m| m.runs)
    }

    pub fn is_loaded(&self, model: &str) -> bool {
        self.models.read().get(model).is_some_and(|m| m.loaded)
    }
}

#[async_trait]
impl LocalRuntime for SimulatedRuntime {
    async fn load(&self, model: &str) -> RuntimeResult<()> {
        let mut models = self.models.write();
        let state = models.entry(model.to_string()).or_default();
        state.loaded = true;
        state.loads += 1;
        tracing::debug!(model, "simulated model loaded");
        Ok(())
    }

    async fn run(&self, model: &str, data: &RequestData) -> RuntimeResult<String> {
        let (latency, failing) = {
            let mut models = self.models.write();
            let state = models.entry(model.to_string()).or_default();
            state.runs += 1;
            (state.latency.unwrap_or(self.default_latency), state.failing)
        };
        tokio::time::sleep(latency).await;
        if failing {
            return Err(RuntimeError::InferenceFailed(format!(
                "simulated failure of {model}"
            )));
        }
        Ok((data.size_bytes() % 1000).to_string())
    }

    async fn unload(&self, model: &str) -> RuntimeResult<()> {
        if let Some(state) = self.models.write().get_mut(model) {
            state.loaded = false;
        }
        Ok(())
    }
}
