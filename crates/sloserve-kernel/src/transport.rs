//! Transport and runtime traits
//!
//! This module defines the seams between the scheduler and the outside world:
//! - `ProxyTransport`: calls to the remote proxy (probes, inference, discovery)
//! - `EndpointInvoker`: invocations of individual cloud endpoints
//! - `LocalRuntime`: on-device model execution
//!
//! The foundation crate ships HTTP implementations of the first two and a
//! simulated runtime; tests substitute mocks.

use async_trait::async_trait;

use crate::error::{RuntimeResult, TransportResult};
use crate::payload::RequestData;
use crate::wire::{
    BandwidthProbe, DirectInferenceReply, DirectInferenceRequest, DiscoveryReply,
    DiscoveryRequest, InvocationBody, SloInferenceReply, SloInferenceRequest,
};

// ============================================================================
// Remote side
// ============================================================================

/// Client side of the remote proxy protocol.
#[async_trait]
pub trait ProxyTransport: Send + Sync {
    /// Send a probe and wait for the echo.
    async fn bandwidth_probe(&self, probe: &BandwidthProbe) -> TransportResult<BandwidthProbe>;

    /// Run one named model through the proxy.
    async fn infer(&self, request: &DirectInferenceRequest)
    -> TransportResult<DirectInferenceReply>;

    /// Let the proxy choose a model for the SLO and run it.
    async fn infer_slo(&self, request: &SloInferenceRequest) -> TransportResult<SloInferenceReply>;

    /// List remote endpoints meeting the given SLO.
    async fn discover(&self, request: &DiscoveryRequest) -> TransportResult<DiscoveryReply>;
}

/// Invokes a single cloud endpoint.
#[async_trait]
pub trait EndpointInvoker: Send + Sync {
    /// Post `body` to the endpoint and return the raw reply bytes.
    ///
    /// Parsing is left to the caller so that malformed replies are
    /// distinguishable from transport failures.
    async fn invoke(&self, endpoint: &str, body: &InvocationBody) -> TransportResult<Vec<u8>>;
}

// ============================================================================
// On-device side
// ============================================================================

/// On-device inference runtime.
///
/// Models are addressed by name. `load` and `unload` are called under the
/// variant's lifecycle lock, so implementations see at most one of them at
/// a time per model.
#[async_trait]
pub trait LocalRuntime: Send + Sync {
    async fn load(&self, model: &str) -> RuntimeResult<()>;

    /// Run the model and return its textual result.
    async fn run(&self, model: &str, data: &RequestData) -> RuntimeResult<String>;

    async fn unload(&self, model: &str) -> RuntimeResult<()>;
}
