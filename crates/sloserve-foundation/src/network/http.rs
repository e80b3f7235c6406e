//! reqwest implementations of the proxy and endpoint transports.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sloserve_kernel::wire::{
    BandwidthProbe, DirectInferenceReply, DirectInferenceRequest, DiscoveryReply,
    DiscoveryRequest, InvocationBody, SloInferenceReply, SloInferenceRequest,
};
use sloserve_kernel::{EndpointInvoker, ProxyTransport, TransportError, TransportResult};
use tracing::debug;

/// Upper bound for any single HTTP exchange; callers apply tighter timeouts.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

fn build_client(target: &str) -> TransportResult<Client> {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| TransportError::Connection {
            target: target.to_string(),
            message: e.to_string(),
        })
}

fn map_send_error(url: &str, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            target: url.to_string(),
        }
    } else {
        TransportError::Connection {
            target: url.to_string(),
            message: err.to_string(),
        }
    }
}

/// POST `body` as JSON and return the raw reply bytes of a 2xx response.
async fn post_json<B: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    body: &B,
) -> TransportResult<Vec<u8>> {
    debug!(url = %url, "POST");
    let resp = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| map_send_error(url, e))?;

    let status = resp.status();
    let bytes = resp.bytes().await.map_err(|e| map_send_error(url, e))?;
    if !status.is_success() {
        return Err(TransportError::Status {
            target: url.to_string(),
            status: status.as_u16(),
            message: String::from_utf8_lossy(&bytes).to_string(),
        });
    }
    Ok(bytes.to_vec())
}

fn parse<T: DeserializeOwned>(url: &str, bytes: &[u8]) -> TransportResult<T> {
    serde_json::from_slice(bytes).map_err(|e| TransportError::Malformed {
        target: url.to_string(),
        message: e.to_string(),
    })
}

// ============================================================================
// Proxy
// ============================================================================

/// Speaks the proxy protocol over HTTP/JSON.
pub struct HttpProxyTransport {
    base_url: String,
    client: Client,
}

impl HttpProxyTransport {
    /// `base_url` such as `http://127.0.0.1:50051`; a trailing slash is ignored.
    pub fn new(base_url: impl Into<String>) -> TransportResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = build_client(&base_url)?;
        Ok(Self { base_url, client })
    }

    fn url(&self, route: &str) -> String {
        format!("{}/v1/{}", self.base_url, route)
    }

    async fn call<Req, Resp>(&self, route: &str, body: &Req) -> TransportResult<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let url = self.url(route);
        let bytes = post_json(&self.client, &url, body).await?;
        parse(&url, &bytes)
    }
}

#[async_trait]
impl ProxyTransport for HttpProxyTransport {
    async fn bandwidth_probe(&self, probe: &BandwidthProbe) -> TransportResult<BandwidthProbe> {
        // Only the round trip matters; the echo body is not inspected.
        let url = self.url("bandwidth");
        post_json(&self.client, &url, probe).await?;
        Ok(probe.clone())
    }

    async fn infer(
        &self,
        request: &DirectInferenceRequest,
    ) -> TransportResult<DirectInferenceReply> {
        self.call("infer", request).await
    }

    async fn infer_slo(&self, request: &SloInferenceRequest) -> TransportResult<SloInferenceReply> {
        self.call("infer_slo", request).await
    }

    async fn discover(&self, request: &DiscoveryRequest) -> TransportResult<DiscoveryReply> {
        self.call("endpoints", request).await
    }
}

// ============================================================================
// Endpoints
// ============================================================================

/// Invokes cloud endpoints at `{base_url}/endpoints/{id}/invocations`.
pub struct HttpEndpointInvoker {
    base_url: String,
    client: Client,
}

impl HttpEndpointInvoker {
    pub fn new(base_url: impl Into<String>) -> TransportResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = build_client(&base_url)?;
        Ok(Self { base_url, client })
    }

    pub fn invocation_url(&self, endpoint: &str) -> String {
        format!("{}/endpoints/{}/invocations", self.base_url, endpoint)
    }
}

#[async_trait]
impl EndpointInvoker for HttpEndpointInvoker {
    async fn invoke(&self, endpoint: &str, body: &InvocationBody) -> TransportResult<Vec<u8>> {
        let url = self.invocation_url(endpoint);
        post_json(&self.client, &url, body).await
    }
}
