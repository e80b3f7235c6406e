//! Network estimation and remote dispatch.
//!
//! - [`NetworkEstimator`]: RTT and bandwidth moving averages
//! - [`RemoteClient`]: probes, discovery, endpoint and proxy invocation
//! - [`HttpProxyTransport`] / [`HttpEndpointInvoker`]: reqwest transports

mod client;
mod estimator;
mod http;

pub use client::{ProxySelection, RemoteClient, RemoteClientConfig};
pub use estimator::{NetworkEstimator, NetworkState};
pub use http::{HttpEndpointInvoker, HttpProxyTransport};
