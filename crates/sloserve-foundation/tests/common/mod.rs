//! Common test utilities shared across all `sloserve-foundation` integration tests.
//!
//! This module is **not** a standalone test binary.  It is declared with
//! `mod common;` inside each integration test file that needs it.

#![allow(dead_code)]

pub mod mock_remote;

use std::sync::Arc;
use std::time::Duration;

use sloserve_foundation::{RemoteClient, SimulatedRuntime};
use sloserve_kernel::config::{LocalVariantConfig, PlacementMode};
use sloserve_kernel::wire::EndpointDescriptor;
use sloserve_kernel::{Application, EndpointInvoker, ProxyTransport, SloServeConfig};

use mock_remote::{MockInvoker, MockProxy};

/// Three on-device image variants: fast/inaccurate to slow/accurate.
pub fn image_variants() -> Vec<LocalVariantConfig> {
    vec![
        LocalVariantConfig::new("mobilenet", 0.4, 50),
        LocalVariantConfig::new("resnet18", 0.6, 100),
        LocalVariantConfig::new("resnet50", 0.8, 200),
    ]
}

/// Hybrid configuration serving images with [`image_variants`].
pub fn image_config() -> SloServeConfig {
    let mut config = SloServeConfig::default()
        .with_application(Application::Image, image_variants())
        .with_workers(1);
    config.remote.timeout_ms = 5_000;
    config.selection.retry_backoff_ms = 10;
    config
}

pub fn local_only_config() -> SloServeConfig {
    image_config().with_placement(PlacementMode::LocalOnly)
}

/// Remote endpoint advertised by the mock proxy.
pub fn descriptor(
    model: &str,
    endpoint: &str,
    accuracy: f64,
    latency_ms: u64,
    application: Application,
) -> EndpointDescriptor {
    EndpointDescriptor {
        model_name: model.to_string(),
        endpoint_name: endpoint.to_string(),
        accuracy,
        latency: latency_ms as f64 / 1000.0,
        dimensions: 224,
        application,
    }
}

/// Client wired to the given mocks, with settings from `config`.
pub fn client(
    proxy: &Arc<MockProxy>,
    invoker: &Arc<MockInvoker>,
    config: &SloServeConfig,
) -> Arc<RemoteClient> {
    let proxy: Arc<dyn ProxyTransport> = proxy.clone();
    let invoker: Arc<dyn EndpointInvoker> = invoker.clone();
    Arc::new(RemoteClient::with_transports(proxy, invoker, config))
}

/// Runtime whose models run at their configured profile latency.
pub fn runtime(config: &SloServeConfig) -> Arc<SimulatedRuntime> {
    Arc::new(SimulatedRuntime::from_config(config))
}

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Paused-clock timers fire on millisecond ticks and may round up by one.
#[track_caller]
pub fn assert_about(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual <= expected + ms(3),
        "expected about {expected:?}, got {actual:?}"
    );
}
