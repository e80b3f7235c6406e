//! Executable model variants.
//!
//! A [`Variant`] is one way of serving an application: an on-device model
//! ([`LocalVariant`]) or a cloud endpoint ([`RemoteVariant`]). Both share a
//! common core:
//!
//! ```text
//! ┌──────────────────────── VariantCore ────────────────────────┐
//! │ name / accuracy / dimensions      (static identity)        │
//! │ LatencyHistory                    (parking_lot::Mutex)     │
//! │ loaded flag                       (tokio::sync::Mutex)     │
//! │ capacity gate                     (Semaphore, 1 permit)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The lifecycle lock and the capacity gate are independent: loading never
//! blocks on an in-flight execution and vice versa.

mod latency;
mod local;
mod remote;

pub use latency::LatencyHistory;
pub use local::LocalVariant;
pub use remote::RemoteVariant;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sloserve_kernel::config::LatencyStatistic;
use sloserve_kernel::{Placement, Request, RuntimeResult, VariantRef};
use tokio::sync::{Semaphore, SemaphorePermit};

// ============================================================================
// Shared core
// ============================================================================

pub(crate) struct VariantCore {
    identity: VariantRef,
    dimensions: u32,
    history: Mutex<LatencyHistory>,
    loaded: tokio::sync::Mutex<bool>,
    gate: Semaphore,
}

impl VariantCore {
    pub(crate) fn new(
        name: &str,
        accuracy: f64,
        dimensions: u32,
        placement: Placement,
        statistic: LatencyStatistic,
        seed: Duration,
    ) -> Self {
        Self {
            identity: VariantRef::new(name, accuracy, placement),
            dimensions,
            history: Mutex::new(LatencyHistory::new(statistic, seed)),
            loaded: tokio::sync::Mutex::new(false),
            gate: Semaphore::new(1),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.identity.name
    }

    pub(crate) fn latency(&self) -> Duration {
        self.history.lock().summary()
    }

    pub(crate) fn record(&self, sample: Duration) {
        self.history.lock().record(sample);
    }

    /// Wait for the single execution slot.
    pub(crate) async fn acquire(&self) -> Option<SemaphorePermit<'_>> {
        self.gate.acquire().await.ok()
    }

    pub(crate) fn has_free_capacity(&self) -> bool {
        self.gate.available_permits() > 0
    }
}

// ============================================================================
// Variant
// ============================================================================

/// An executable model unit.
pub enum Variant {
    Local(LocalVariant),
    Remote(RemoteVariant),
}

impl Variant {
    fn core(&self) -> &VariantCore {
        match self {
            Self::Local(v) => &v.core,
            Self::Remote(v) => &v.core,
        }
    }

    pub fn name(&self) -> &str {
        self.core().name()
    }

    pub fn accuracy(&self) -> f64 {
        self.core().identity.accuracy
    }

    pub fn dimensions(&self) -> u32 {
        self.core().dimensions
    }

    pub fn placement(&self) -> Placement {
        self.core().identity.placement
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// Identity snapshot recorded on requests.
    pub fn identity(&self) -> VariantRef {
        self.core().identity.clone()
    }

    /// Summary latency (seed until the first successful run).
    pub fn latency(&self) -> Duration {
        self.core().latency()
    }

    /// Snapshot of the latency history.
    pub fn history(&self) -> LatencyHistory {
        self.core().history.lock().clone()
    }

    /// Whether the execution slot is free right now.
    ///
    /// Remote variants always report free capacity; they still serialize
    /// their own calls through the gate.
    pub fn has_free_capacity(&self) -> bool {
        match self {
            Self::Local(v) => v.core.has_free_capacity(),
            Self::Remote(_) => true,
        }
    }

    /// Usable right now: free capacity, and for remote variants not cold.
    pub fn is_available(&self) -> bool {
        match self {
            Self::Local(v) => v.core.has_free_capacity(),
            Self::Remote(v) => !v.is_cold(),
        }
    }

    pub fn is_cold(&self) -> bool {
        match self {
            Self::Local(_) => false,
            Self::Remote(v) => v.is_cold(),
        }
    }

    pub fn as_remote(&self) -> Option<&RemoteVariant> {
        match self {
            Self::Remote(v) => Some(v),
            Self::Local(_) => None,
        }
    }

    /// Load the variant. Concurrent callers collapse into a single load.
    pub async fn load(&self) -> RuntimeResult<()> {
        let core = self.core();
        let mut loaded = core.loaded.lock().await;
        if *loaded {
            return Ok(());
        }
        if let Self::Local(v) = self {
            v.runtime.load(core.name()).await?;
        }
        *loaded = true;
        tracing::debug!(variant = %core.name(), "variant loaded");
        Ok(())
    }

    /// Unload the variant. A no-op when not loaded.
    pub async fn unload(&self) -> RuntimeResult<()> {
        let core = self.core();
        let mut loaded = core.loaded.lock().await;
        if !*loaded {
            return Ok(());
        }
        if let Self::Local(v) = self {
            v.runtime.unload(core.name()).await?;
        }
        *loaded = false;
        tracing::debug!(variant = %core.name(), "variant unloaded");
        Ok(())
    }

    pub async fn is_loaded(&self) -> bool {
        *self.core().loaded.lock().await
    }

    /// Run the request through this variant.
    ///
    /// Returns `None` on any failure; only successful runs add a latency
    /// sample.
    pub async fn execute(&self, request: &Request) -> Option<String> {
        match self {
            Self::Local(v) => v.execute(request).await,
            Self::Remote(v) => v.execute(request).await,
        }
    }
}

impl std::fmt::Debug for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Variant")
            .field("name", &self.name())
            .field("placement", &self.placement())
            .field("accuracy", &self.accuracy())
            .field("latency", &self.latency())
            .finish()
    }
}
