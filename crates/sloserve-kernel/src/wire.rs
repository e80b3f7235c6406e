//! Wire contracts of the remote proxy and the cloud endpoints.
//!
//! # Proxy (HTTP/JSON)
//!
//! | Route | Request | Response |
//! |-------|---------|----------|
//! | `POST /v1/bandwidth` | [`BandwidthProbe`] | [`BandwidthProbe`] (echo) |
//! | `POST /v1/infer` | [`DirectInferenceRequest`] | [`DirectInferenceReply`] |
//! | `POST /v1/endpoints` | [`DiscoveryRequest`] | [`DiscoveryReply`] |
//! | `POST /v1/infer_slo` | [`SloInferenceRequest`] | [`SloInferenceReply`] |
//!
//! # Endpoint
//!
//! `POST {endpoint_base}/endpoints/{id}/invocations` with either
//! `{"instances": [[<base64 image>]]}` or `{"inputs": "<json field map>"}`;
//! the reply is [`Predictions`].

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::payload::RequestData;
use crate::types::Application;

/// Server-side timing attached to proxy replies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerMetadata {
    /// Seconds the proxy spent processing the call
    #[serde(default)]
    pub processing_latency: f64,
}

/// Synthetic payload used to measure RTT (empty) and bandwidth (N bytes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandwidthProbe {
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectInferenceRequest {
    pub application: Application,
    pub model_name: String,
    /// Base64 (URL-safe, unpadded) encoded payload
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectInferenceReply {
    #[serde(default)]
    pub metadata: ServerMetadata,
    #[serde(default)]
    pub response: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    pub application: Application,
    pub accuracy_slo: f64,
    /// Latency ceiling in seconds
    pub latency_slo: f64,
    #[serde(default)]
    pub data: String,
}

/// Which SLO term the proxy optimizes against in an [`SloInferenceRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SloKind {
    /// `slo_value` is an accuracy floor
    Accuracy,
    /// `slo_value` is a latency target in seconds
    Latency,
}

/// Inference where the proxy chooses the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SloInferenceRequest {
    pub application: Application,
    /// Base64 (URL-safe, unpadded) encoded payload
    pub data: String,
    pub slo_type: SloKind,
    pub slo_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SloInferenceReply {
    #[serde(default)]
    pub metadata: ServerMetadata,
    /// Endpoint the proxy ran the request on
    pub endpoint: EndpointDescriptor,
    #[serde(default)]
    pub response: Vec<serde_json::Value>,
}

/// One remote endpoint as advertised by the proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub model_name: String,
    pub endpoint_name: String,
    pub accuracy: f64,
    /// Advertised latency in seconds
    pub latency: f64,
    #[serde(default)]
    pub dimensions: u32,
    pub application: Application,
}

impl EndpointDescriptor {
    /// Advertised latency; negative or non-finite values read as zero.
    pub fn latency(&self) -> Duration {
        Duration::try_from_secs_f64(self.latency).unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryReply {
    #[serde(default)]
    pub metadata: ServerMetadata,
    #[serde(default)]
    pub endpoints: Vec<EndpointDescriptor>,
}

/// Body of an endpoint invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InvocationBody {
    /// `{"instances": [[<base64>]]}`
    Instances { instances: Vec<Vec<String>> },
    /// `{"inputs": "<json-encoded field map>"}`
    Inputs { inputs: String },
}

impl InvocationBody {
    /// Image invocation carrying one base64-encoded instance.
    pub fn image(bytes: &[u8]) -> Self {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
        Self::Instances {
            instances: vec![vec![encoded]],
        }
    }

    /// Text invocation carrying the JSON-encoded field map.
    pub fn text(fields: &BTreeMap<String, String>) -> Result<Self, serde_json::Error> {
        Ok(Self::Inputs {
            inputs: serde_json::to_string(fields)?,
        })
    }

    /// Body matching the payload kind.
    pub fn for_data(data: &RequestData) -> Result<Self, serde_json::Error> {
        match data {
            RequestData::Image(bytes) => Ok(Self::image(bytes)),
            RequestData::Text(fields) => Self::text(fields),
        }
    }
}

/// Endpoint reply: one score vector per instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
    pub predictions: Vec<Vec<f64>>,
}

impl Predictions {
    /// Index of the highest score of the first prediction.
    ///
    /// Ties resolve to the lowest index and non-finite scores are ignored.
    /// `None` when no finite score remains.
    pub fn top_class(&self) -> Option<usize> {
        let scores = self.predictions.first()?;
        let mut best: Option<(usize, f64)> = None;
        for (idx, &score) in scores.iter().enumerate() {
            if !score.is_finite() {
                continue;
            }
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((idx, score)),
            }
        }
        best.map(|(idx, _)| idx)
    }
}

/// Serialized size of a wire message, used for bandwidth accounting.
pub fn encoded_len<T: Serialize>(message: &T) -> usize {
    serde_json::to_vec(message).map(|v| v.len()).unwrap_or(0)
}
