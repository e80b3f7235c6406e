//! Mock remote side for `sloserve-foundation` integration tests.
//!
//! [`MockProxy`] implements [`ProxyTransport`] and [`MockInvoker`] implements
//! [`EndpointInvoker`]. Both sleep on the tokio clock, so tests running with
//! `start_paused = true` see exact, deterministic latencies.
//!
//! | Double | Knobs | Observability |
//! |--------|-------|---------------|
//! | `MockProxy` | advertised endpoints, probe/SLO-inference delay, failure | call counters, SLO targets |
//! | `MockInvoker` | per-endpoint [`EndpointBehavior`] | invoked endpoint log |

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use sloserve_kernel::wire::{
    BandwidthProbe, DirectInferenceReply, DirectInferenceRequest, DiscoveryReply,
    DiscoveryRequest, EndpointDescriptor, InvocationBody, ServerMetadata, SloInferenceReply,
    SloInferenceRequest,
};
use sloserve_kernel::{EndpointInvoker, ProxyTransport, TransportError, TransportResult};

// ─────────────────────────────────────────────────────────────────────────────
// Proxy
// ─────────────────────────────────────────────────────────────────────────────

/// Scripted proxy.
#[derive(Default)]
pub struct MockProxy {
    endpoints: Mutex<Vec<EndpointDescriptor>>,
    failing: AtomicBool,
    probe_delay: Mutex<Duration>,
    discovery_delay: Mutex<Duration>,
    processing_latency: Mutex<f64>,
    slo_delay: Mutex<Duration>,
    slo_targets: Mutex<Vec<f64>>,
    probe_calls: AtomicUsize,
    discover_calls: AtomicUsize,
    infer_calls: AtomicUsize,
}

impl MockProxy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(self, descriptor: EndpointDescriptor) -> Self {
        self.endpoints.lock().push(descriptor);
        self
    }

    pub fn with_probe_delay(self, delay: Duration) -> Self {
        *self.probe_delay.lock() = delay;
        self
    }

    /// Discovery takes `delay`, of which `processing` seconds are reported
    /// as server-side processing.
    pub fn with_discovery_delay(self, delay: Duration, processing: f64) -> Self {
        *self.discovery_delay.lock() = delay;
        *self.processing_latency.lock() = processing;
        self
    }

    /// Proxy-selected inference answers after `delay`.
    pub fn with_slo_delay(self, delay: Duration) -> Self {
        *self.slo_delay.lock() = delay;
        self
    }

    pub fn set_endpoints(&self, endpoints: Vec<EndpointDescriptor>) {
        *self.endpoints.lock() = endpoints;
    }

    /// Make every call fail with a connection error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn discover_calls(&self) -> usize {
        self.discover_calls.load(Ordering::SeqCst)
    }

    pub fn infer_calls(&self) -> usize {
        self.infer_calls.load(Ordering::SeqCst)
    }

    /// Latency targets (seconds) of proxy-selected inferences, in call order.
    pub fn slo_targets(&self) -> Vec<f64> {
        self.slo_targets.lock().clone()
    }

    /// Most accurate endpoint of `request`'s application meeting the latency
    /// target, otherwise the fastest one.
    fn select(&self, request: &SloInferenceRequest) -> Option<EndpointDescriptor> {
        let endpoints = self.endpoints.lock();
        let candidates: Vec<&EndpointDescriptor> = endpoints
            .iter()
            .filter(|d| d.application == request.application)
            .collect();
        candidates
            .iter()
            .filter(|d| d.latency <= request.slo_value)
            .max_by(|a, b| a.accuracy.total_cmp(&b.accuracy))
            .or_else(|| {
                candidates
                    .iter()
                    .min_by(|a, b| a.latency.total_cmp(&b.latency))
            })
            .map(|d| (*d).clone())
    }

    fn check(&self) -> TransportResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Connection {
                target: "mock-proxy".to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    fn metadata(&self) -> ServerMetadata {
        ServerMetadata {
            processing_latency: *self.processing_latency.lock(),
        }
    }
}

#[async_trait]
impl ProxyTransport for MockProxy {
    async fn bandwidth_probe(&self, probe: &BandwidthProbe) -> TransportResult<BandwidthProbe> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.probe_delay.lock();
        tokio::time::sleep(delay).await;
        self.check()?;
        Ok(probe.clone())
    }

    async fn infer(&self, request: &DirectInferenceRequest) -> TransportResult<DirectInferenceReply> {
        self.infer_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(DirectInferenceReply {
            metadata: self.metadata(),
            response: vec![json!(format!("{}:ok", request.model_name))],
        })
    }

    async fn infer_slo(&self, request: &SloInferenceRequest) -> TransportResult<SloInferenceReply> {
        self.slo_targets.lock().push(request.slo_value);
        let delay = *self.slo_delay.lock();
        tokio::time::sleep(delay).await;
        self.check()?;
        let endpoint = self.select(request).ok_or_else(|| TransportError::Status {
            target: "mock-proxy".to_string(),
            status: 404,
            message: "no endpoint for application".to_string(),
        })?;
        Ok(SloInferenceReply {
            metadata: self.metadata(),
            response: vec![json!(format!("{}:ok", endpoint.model_name))],
            endpoint,
        })
    }

    async fn discover(&self, _request: &DiscoveryRequest) -> TransportResult<DiscoveryReply> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.discovery_delay.lock();
        tokio::time::sleep(delay).await;
        self.check()?;
        Ok(DiscoveryReply {
            metadata: self.metadata(),
            endpoints: self.endpoints.lock().clone(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Endpoints
// ─────────────────────────────────────────────────────────────────────────────

/// How one mock endpoint answers.
#[derive(Debug, Clone)]
pub enum EndpointBehavior {
    /// Reply with one prediction row after `delay`.
    Respond { delay: Duration, scores: Vec<f64> },
    /// Never reply.
    Hang,
    /// Reply with HTTP 503.
    Fail,
    /// Reply with a body that is not a predictions document.
    Malformed,
}

/// Scripted cloud endpoints keyed by endpoint id.
#[derive(Default)]
pub struct MockInvoker {
    behaviors: Mutex<HashMap<String, EndpointBehavior>>,
    calls: Mutex<Vec<String>>,
}

impl MockInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, endpoint: &str, behavior: EndpointBehavior) -> Self {
        self.set(endpoint, behavior);
        self
    }

    pub fn set(&self, endpoint: &str, behavior: EndpointBehavior) {
        self.behaviors.lock().insert(endpoint.to_string(), behavior);
    }

    /// Endpoint ids in invocation order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, endpoint: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == endpoint).count()
    }
}

#[async_trait]
impl EndpointInvoker for MockInvoker {
    async fn invoke(&self, endpoint: &str, _body: &InvocationBody) -> TransportResult<Vec<u8>> {
        self.calls.lock().push(endpoint.to_string());
        let behavior = self
            .behaviors
            .lock()
            .get(endpoint)
            .cloned()
            .unwrap_or(EndpointBehavior::Fail);

        match behavior {
            EndpointBehavior::Respond { delay, scores } => {
                tokio::time::sleep(delay).await;
                Ok(serde_json::to_vec(&json!({ "predictions": [scores] })).unwrap())
            }
            EndpointBehavior::Hang => std::future::pending().await,
            EndpointBehavior::Fail => Err(TransportError::Status {
                target: endpoint.to_string(),
                status: 503,
                message: "service unavailable".to_string(),
            }),
            EndpointBehavior::Malformed => Ok(b"<html>bad gateway</html>".to_vec()),
        }
    }
}

pub fn respond(delay_ms: u64, scores: &[f64]) -> EndpointBehavior {
    EndpointBehavior::Respond {
        delay: Duration::from_millis(delay_ms),
        scores: scores.to_vec(),
    }
}
