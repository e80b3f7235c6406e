//! Remote client: network probes, endpoint discovery and timed remote calls.
//!
//! One [`RemoteClient`] is shared (as `Arc`) by every model and remote
//! variant of a scheduler. It owns the [`NetworkEstimator`] and a
//! client-wide upload gate bounding concurrent remote calls.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::Rng;
use rand::distributions::Alphanumeric;
use sloserve_kernel::config::{DispatchMode, LatencyStatistic, NetworkConfig, RemoteConfig};
use sloserve_kernel::wire::{
    BandwidthProbe, DirectInferenceRequest, DiscoveryRequest, EndpointDescriptor,
    InvocationBody, Predictions, SloInferenceRequest, SloKind, encoded_len,
};
use sloserve_kernel::{
    Application, EndpointInvoker, ProxyTransport, RequestData, SloServeConfig, TransportResult,
};
use tokio::sync::Semaphore;
use tokio::time::{Instant, timeout};
use tokio_util::task::TaskTracker;
use tracing::instrument;

use super::estimator::NetworkEstimator;
use super::http::{HttpEndpointInvoker, HttpProxyTransport};
use crate::error::{RemoteError, RemoteResult};
use crate::variant::RemoteVariant;

/// Client-side settings derived from [`RemoteConfig`] and [`NetworkConfig`].
#[derive(Debug, Clone)]
pub struct RemoteClientConfig {
    pub timeout: Duration,
    pub cold_window: Duration,
    pub upload_concurrency: usize,
    pub dispatch: DispatchMode,
    pub probe_bytes: usize,
}

impl RemoteClientConfig {
    pub fn from_sections(remote: &RemoteConfig, network: &NetworkConfig) -> Self {
        Self {
            timeout: remote.timeout(),
            cold_window: remote.cold_window(),
            upload_concurrency: remote.upload_concurrency.max(1),
            dispatch: remote.dispatch,
            probe_bytes: network.probe_bytes,
        }
    }
}

impl Default for RemoteClientConfig {
    fn default() -> Self {
        Self::from_sections(&RemoteConfig::default(), &NetworkConfig::default())
    }
}

/// Outcome of an inference where the proxy chose the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxySelection {
    /// Endpoint the proxy ran the request on
    pub endpoint: EndpointDescriptor,
    pub output: String,
}

/// Talks to the remote proxy and cloud endpoints.
pub struct RemoteClient {
    proxy: Arc<dyn ProxyTransport>,
    endpoints: Arc<dyn EndpointInvoker>,
    estimator: NetworkEstimator,
    config: RemoteClientConfig,
    uploads: Semaphore,
    rtt_refresh_in_flight: Arc<AtomicBool>,
    tasks: TaskTracker,
}

impl RemoteClient {
    pub fn new(
        proxy: Arc<dyn ProxyTransport>,
        endpoints: Arc<dyn EndpointInvoker>,
        estimator: NetworkEstimator,
        config: RemoteClientConfig,
    ) -> Self {
        Self {
            proxy,
            endpoints,
            estimator,
            uploads: Semaphore::new(config.upload_concurrency),
            config,
            rtt_refresh_in_flight: Arc::new(AtomicBool::new(false)),
            tasks: TaskTracker::new(),
        }
    }

    /// Client with custom transports and settings taken from `config`.
    pub fn with_transports(
        proxy: Arc<dyn ProxyTransport>,
        endpoints: Arc<dyn EndpointInvoker>,
        config: &SloServeConfig,
    ) -> Self {
        Self::new(
            proxy,
            endpoints,
            NetworkEstimator::from_config(&config.network),
            RemoteClientConfig::from_sections(&config.remote, &config.network),
        )
    }

    /// Client speaking HTTP to the configured proxy and endpoint base URLs.
    pub fn from_config(config: &SloServeConfig) -> TransportResult<Self> {
        let proxy = HttpProxyTransport::new(&config.remote.proxy_url)?;
        let endpoints = HttpEndpointInvoker::new(&config.remote.endpoint_url)?;
        Ok(Self::with_transports(
            Arc::new(proxy),
            Arc::new(endpoints),
            config,
        ))
    }

    pub fn estimator(&self) -> &NetworkEstimator {
        &self.estimator
    }

    pub fn config(&self) -> &RemoteClientConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Network estimation
    // ------------------------------------------------------------------------

    /// Estimated time to move `bytes` to the remote side.
    ///
    /// A stale RTT estimate triggers a background refresh; the current
    /// estimate is returned without waiting for it.
    pub fn estimate_network_time(self: &Arc<Self>, bytes: usize) -> Duration {
        if self.estimator.rtt_is_stale() {
            self.spawn_rtt_refresh();
        }
        self.estimator.transfer_time(bytes)
    }

    fn spawn_rtt_refresh(self: &Arc<Self>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if self.rtt_refresh_in_flight.swap(true, Ordering::AcqRel) {
            return;
        }
        let client = Arc::clone(self);
        self.tasks.spawn_on(
            async move {
                client.refresh_rtt().await;
                client.rtt_refresh_in_flight.store(false, Ordering::Release);
            },
            &handle,
        );
    }

    /// Send a probe of `num_bytes` synthetic characters and time the echo.
    ///
    /// `None` when the proxy is unreachable or does not answer in time.
    pub async fn measure_round_trip(&self, num_bytes: usize) -> Option<Duration> {
        let probe = BandwidthProbe {
            data: synthetic_payload(num_bytes),
        };
        let started = Instant::now();
        match timeout(self.config.timeout, self.proxy.bandwidth_probe(&probe)).await {
            Ok(Ok(_)) => Some(started.elapsed()),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, bytes = num_bytes, "network probe failed");
                None
            }
            Err(_) => {
                tracing::warn!(bytes = num_bytes, "network probe timed out");
                None
            }
        }
    }

    /// Measure an empty round trip and fold it into the RTT estimate.
    pub async fn refresh_rtt(&self) {
        if let Some(sample) = self.measure_round_trip(0).await {
            self.estimator.record_rtt(sample);
            tracing::trace!(rtt_ms = sample.as_millis() as u64, "rtt sample");
        }
    }

    /// Measure a `probe_bytes` round trip and fold it into the bandwidth
    /// estimate.
    pub async fn refresh_bandwidth(&self) {
        let bytes = self.config.probe_bytes;
        if let Some(sample) = self.measure_round_trip(bytes).await {
            self.estimator.record_transfer(sample.as_secs_f64(), bytes);
        }
    }

    /// Refresh both estimates.
    pub async fn probe(&self) {
        self.refresh_rtt().await;
        self.refresh_bandwidth().await;
        let state = self.estimator.state();
        tracing::debug!(
            rtt_s = state.rtt,
            bandwidth_bps = state.bandwidth,
            "network estimate refreshed"
        );
    }

    /// Run `rounds` probes back to back.
    pub async fn warm_up(&self, rounds: u32) {
        for _ in 0..rounds {
            self.probe().await;
        }
    }

    // ------------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------------

    /// Ask the proxy for remote variants of `application` meeting the SLO.
    ///
    /// Transport failures yield an empty list. The call's network time
    /// (wall time minus the proxy's processing time) feeds the bandwidth
    /// estimate.
    #[instrument(skip_all, fields(application = %application))]
    pub async fn discover_candidates(
        self: &Arc<Self>,
        min_accuracy: f64,
        max_latency: Duration,
        application: Application,
        statistic: LatencyStatistic,
    ) -> Vec<RemoteVariant> {
        let request = DiscoveryRequest {
            application,
            accuracy_slo: min_accuracy,
            latency_slo: max_latency.as_secs_f64(),
            data: String::new(),
        };
        let size = encoded_len(&request);

        let started = Instant::now();
        let reply = match timeout(self.config.timeout, self.proxy.discover(&request)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "remote discovery failed");
                return Vec::new();
            }
            Err(_) => {
                tracing::warn!("remote discovery timed out");
                return Vec::new();
            }
        };
        let network_time = started.elapsed().as_secs_f64() - reply.metadata.processing_latency;
        self.estimator.record_transfer(network_time, size);

        let candidates: Vec<RemoteVariant> = reply
            .endpoints
            .iter()
            .filter(|d| d.application == application)
            .map(|d| {
                RemoteVariant::new(d, Arc::clone(self), self.config.cold_window, statistic)
            })
            .collect();
        tracing::debug!(count = candidates.len(), "remote candidates discovered");
        candidates
    }

    // ------------------------------------------------------------------------
    // Invocation
    // ------------------------------------------------------------------------

    /// Run a remote variant's model on `data` using the configured dispatch.
    pub async fn dispatch(
        &self,
        kind: Application,
        model_name: &str,
        endpoint: &str,
        data: &RequestData,
    ) -> RemoteResult<String> {
        if data.application() != kind {
            return Err(RemoteError::PayloadMismatch {
                endpoint: endpoint.to_string(),
                expected: kind,
            });
        }
        match self.config.dispatch {
            DispatchMode::Direct => {
                let body = InvocationBody::for_data(data)
                    .map_err(|e| RemoteError::not_responding(endpoint, e))?;
                self.invoke(endpoint, &body).await
            }
            DispatchMode::Proxy => self.infer_via_proxy(kind, model_name, data).await,
        }
    }

    /// Invoke a cloud endpoint under the hard timeout.
    ///
    /// Returns the arg-max class index of the first prediction.
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn invoke(&self, endpoint: &str, body: &InvocationBody) -> RemoteResult<String> {
        let _upload = self.uploads.acquire().await.map_err(|_| RemoteError::Closed)?;

        let raw = match timeout(self.config.timeout, self.endpoints.invoke(endpoint, body)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(err)) => return Err(RemoteError::not_responding(endpoint, err)),
            Err(_) => {
                return Err(RemoteError::not_responding(
                    endpoint,
                    format!("no reply within {:?}", self.config.timeout),
                ));
            }
        };

        let predictions: Predictions = serde_json::from_slice(&raw)
            .map_err(|e| RemoteError::not_responding(endpoint, format!("malformed reply: {e}")))?;
        predictions
            .top_class()
            .map(|idx| idx.to_string())
            .ok_or_else(|| RemoteError::not_responding(endpoint, "reply has no predictions"))
    }

    /// Run one named model through the proxy's direct inference route.
    #[instrument(skip_all, fields(application = %application, model = %model_name))]
    pub async fn infer_via_proxy(
        &self,
        application: Application,
        model_name: &str,
        data: &RequestData,
    ) -> RemoteResult<String> {
        let request = DirectInferenceRequest {
            application,
            model_name: model_name.to_string(),
            data: data.to_base64(),
        };
        let size = encoded_len(&request);
        let _upload = self.uploads.acquire().await.map_err(|_| RemoteError::Closed)?;

        let started = Instant::now();
        let reply = match timeout(self.config.timeout, self.proxy.infer(&request)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => return Err(RemoteError::not_responding(model_name, err)),
            Err(_) => {
                return Err(RemoteError::not_responding(
                    model_name,
                    format!("no reply within {:?}", self.config.timeout),
                ));
            }
        };
        let network_time = started.elapsed().as_secs_f64() - reply.metadata.processing_latency;
        self.estimator.record_transfer(network_time, size);

        first_output(model_name, &reply.response)
    }

    /// Let the proxy pick and run a model expected to answer within
    /// `latency_target`.
    ///
    /// Shares the upload gate, the hard timeout and the bandwidth accounting
    /// of the other proxy calls.
    #[instrument(skip_all, fields(application = %application))]
    pub async fn infer_with_slo(
        &self,
        application: Application,
        data: &RequestData,
        latency_target: Duration,
    ) -> RemoteResult<ProxySelection> {
        const TARGET: &str = "proxy";
        if data.application() != application {
            return Err(RemoteError::PayloadMismatch {
                endpoint: TARGET.to_string(),
                expected: application,
            });
        }
        let request = SloInferenceRequest {
            application,
            data: data.to_base64(),
            slo_type: SloKind::Latency,
            slo_value: latency_target.as_secs_f64(),
        };
        let size = encoded_len(&request);
        let _upload = self.uploads.acquire().await.map_err(|_| RemoteError::Closed)?;

        let started = Instant::now();
        let reply = match timeout(self.config.timeout, self.proxy.infer_slo(&request)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => return Err(RemoteError::not_responding(TARGET, err)),
            Err(_) => {
                return Err(RemoteError::not_responding(
                    TARGET,
                    format!("no reply within {:?}", self.config.timeout),
                ));
            }
        };
        let network_time = started.elapsed().as_secs_f64() - reply.metadata.processing_latency;
        self.estimator.record_transfer(network_time, size);

        let output = first_output(&reply.endpoint.endpoint_name, &reply.response)?;
        tracing::debug!(
            model = %reply.endpoint.model_name,
            endpoint = %reply.endpoint.endpoint_name,
            target_ms = latency_target.as_millis() as u64,
            "proxy selected a model"
        );
        Ok(ProxySelection {
            endpoint: reply.endpoint,
            output,
        })
    }

    /// Wait for background RTT refreshes to finish.
    pub async fn shutdown(&self) {
        self.uploads.close();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

/// First response element as text; JSON strings are unquoted.
fn first_output(target: &str, response: &[serde_json::Value]) -> RemoteResult<String> {
    let first = response
        .first()
        .ok_or_else(|| RemoteError::not_responding(target, "empty response"))?;
    Ok(match first {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

fn synthetic_payload(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
