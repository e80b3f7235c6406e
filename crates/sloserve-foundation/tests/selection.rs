//! Variant selection against local profiles and a scripted remote side.
//!
//! The image variants from `common` are:
//!
//! | variant | accuracy | latency |
//! |---------|----------|---------|
//! | mobilenet | 0.4 | 50 ms |
//! | resnet18 | 0.6 | 100 ms |
//! | resnet50 | 0.8 | 200 ms |
//!
//! With the default policy the usable budget is
//! `0.8 * (max_latency - discovery - 50 ms)`.

mod common;

use std::sync::Arc;

use sloserve_foundation::{Model, ModelError, ModelPolicy};
use sloserve_kernel::config::PlacementMode;
use sloserve_kernel::{Application, Placement, Request, SloServeConfig};
use tokio_util::sync::CancellationToken;

use common::mock_remote::{MockInvoker, MockProxy};
use common::{client, descriptor, image_config, local_only_config, ms, runtime};

fn model(config: &SloServeConfig, proxy: &Arc<MockProxy>) -> Arc<Model> {
    let client = client(proxy, &Arc::new(MockInvoker::new()), config);
    Model::from_config(
        Application::Image,
        config,
        runtime(config),
        client,
        CancellationToken::new(),
    )
}

/// 1000-byte image request: 1 ms of transfer at the initial 1 MB/s.
fn request(min_accuracy: f64, max_latency_ms: u64) -> Request {
    Request::image(vec![0u8; 1000], min_accuracy, ms(max_latency_ms))
}

// ───── § 1 Local fallbacks ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn unreachable_deadline_uses_fastest_local() {
    let model = model(&image_config(), &Arc::new(MockProxy::new()));
    let r = request(0.0, 20);

    let chosen = model.pick_variant(0.0, ms(20), &r).await.unwrap();

    assert_eq!(chosen.name(), "mobilenet");
    // Returned before any network work.
    assert!(r.network_estimate().is_none());
}

#[tokio::test(start_paused = true)]
async fn unmeetable_accuracy_uses_fastest_local() {
    let model = model(&image_config(), &Arc::new(MockProxy::new()));
    let r = request(0.99, 1_000);

    let chosen = model.pick_variant(0.99, ms(1_000), &r).await.unwrap();
    assert_eq!(chosen.name(), "mobilenet");
}

#[tokio::test(start_paused = true)]
async fn local_only_picks_most_accurate_within_deadline() {
    let model = model(&local_only_config(), &Arc::new(MockProxy::new()));
    let r = request(0.0, 150);

    let chosen = model.pick_variant(0.0, ms(150), &r).await.unwrap();

    assert_eq!(chosen.name(), "resnet18");
    assert!(r.network_estimate().is_none());
}

#[tokio::test(start_paused = true)]
async fn hybrid_applies_buffer_and_overhead() {
    // budget = 0.8 * (150 - 50) = 80 ms: only mobilenet fits.
    let model = model(&image_config(), &Arc::new(MockProxy::new()));
    let r = request(0.0, 150);

    let chosen = model.pick_variant(0.0, ms(150), &r).await.unwrap();

    assert_eq!(chosen.name(), "mobilenet");
    let transfer = r.network_estimate().unwrap();
    assert!(transfer.abs_diff(ms(1)) < std::time::Duration::from_micros(1));
}

// ───── § 2 Remote candidates ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn more_accurate_remote_wins_when_it_fits() {
    let proxy = Arc::new(MockProxy::new().with_endpoint(descriptor(
        "vit",
        "ep-vit",
        0.9,
        80,
        Application::Image,
    )));
    let model = model(&image_config(), &proxy);
    model.refresh_remote_cache().await;
    let r = request(0.0, 1_000);

    let chosen = model.pick_variant(0.0, ms(1_000), &r).await.unwrap();

    assert_eq!(chosen.name(), "vit");
    assert_eq!(chosen.placement(), Placement::Remote);
}

#[tokio::test(start_paused = true)]
async fn cold_remote_is_not_offered() {
    let proxy = Arc::new(MockProxy::new().with_endpoint(descriptor(
        "vit",
        "ep-vit",
        0.9,
        80,
        Application::Image,
    )));
    let model = model(&image_config(), &proxy);
    model.refresh_remote_cache().await;
    model.remote_variants()[0].as_remote().unwrap().mark_failure();

    let r = request(0.0, 1_000);
    let chosen = model.pick_variant(0.0, ms(1_000), &r).await.unwrap();
    assert_eq!(chosen.name(), "resnet50");

    // The cold window passes and the endpoint is offered again.
    tokio::time::advance(image_config().remote.cold_window() + ms(1)).await;
    model.refresh_remote_cache().await;
    let chosen = model.pick_variant(0.0, ms(1_000), &r).await.unwrap();
    assert_eq!(chosen.name(), "vit");
}

#[tokio::test(start_paused = true)]
async fn transfer_time_counts_against_remote_budget() {
    // budget = 0.8 * (1000 - 50) = 760 ms; remote takes 700 ms plus transfer.
    let proxy = Arc::new(MockProxy::new().with_endpoint(descriptor(
        "vit",
        "ep-vit",
        0.9,
        700,
        Application::Image,
    )));
    let model = model(&image_config(), &proxy);
    model.refresh_remote_cache().await;

    let small = request(0.0, 1_000);
    let chosen = model.pick_variant(0.0, ms(1_000), &small).await.unwrap();
    assert_eq!(chosen.name(), "vit");

    // 100 kB at 1 MB/s adds 100 ms and pushes the remote past the budget.
    let large = Request::image(vec![0u8; 100_000], 0.0, ms(1_000));
    let chosen = model.pick_variant(0.0, ms(1_000), &large).await.unwrap();
    assert_eq!(chosen.name(), "resnet50");
}

#[tokio::test(start_paused = true)]
async fn baseline_discovery_floors_remote_accuracy() {
    // resnet50 meets 240 ms so it is the baseline (0.8), but the budget is
    // 0.8 * (240 - 50) = 152 ms, which it does not fit.
    let proxy = Arc::new(MockProxy::new().with_endpoint(descriptor(
        "squeezenet",
        "ep-squeeze",
        0.7,
        50,
        Application::Image,
    )));

    let with_floor = model(&image_config(), &proxy);
    with_floor.refresh_remote_cache().await;
    let r = request(0.0, 240);
    let chosen = with_floor.pick_variant(0.0, ms(240), &r).await.unwrap();
    assert_eq!(chosen.name(), "resnet18");

    let mut config = image_config();
    config.selection.baseline_discovery = false;
    let without_floor = model(&config, &proxy);
    without_floor.refresh_remote_cache().await;
    let chosen = without_floor.pick_variant(0.0, ms(240), &r).await.unwrap();
    assert_eq!(chosen.name(), "squeezenet");
}

#[tokio::test(start_paused = true)]
async fn stale_cache_is_refreshed_in_background() {
    let proxy = Arc::new(MockProxy::new().with_endpoint(descriptor(
        "vit",
        "ep-vit",
        0.9,
        80,
        Application::Image,
    )));
    let model = model(&image_config(), &proxy);
    let r = request(0.0, 1_000);

    // First pick sees an empty cache and only schedules discovery.
    let first = model.pick_variant(0.0, ms(1_000), &r).await.unwrap();
    assert_eq!(first.placement(), Placement::Local);

    tokio::time::sleep(ms(1)).await;
    assert_eq!(proxy.discover_calls(), 1);
    let second = model.pick_variant(0.0, ms(1_000), &r).await.unwrap();
    assert_eq!(second.name(), "vit");
}

#[tokio::test(start_paused = true)]
async fn refresh_keeps_known_endpoints() {
    let proxy = Arc::new(MockProxy::new().with_endpoint(descriptor(
        "vit",
        "ep-vit",
        0.9,
        80,
        Application::Image,
    )));
    let model = model(&image_config(), &proxy);

    model.refresh_remote_cache().await;
    let before = model.remote_variants();
    before[0].as_remote().unwrap().mark_failure();

    proxy.set_endpoints(vec![
        descriptor("vit", "ep-vit", 0.9, 80, Application::Image),
        descriptor("deit", "ep-deit", 0.85, 60, Application::Image),
    ]);
    model.refresh_remote_cache().await;
    let after = model.remote_variants();

    assert_eq!(after.len(), 2);
    assert!(Arc::ptr_eq(&before[0], &after[0]));
    assert!(after[0].is_cold());
    assert!(!after[1].is_cold());
}

// ───── § 3 Remote-only placement ─────────────────────────────────────────────

fn remote_only_config() -> SloServeConfig {
    SloServeConfig::default()
        .with_application(Application::Image, Vec::new())
        .with_placement(PlacementMode::RemoteOnly)
}

#[tokio::test(start_paused = true)]
async fn remote_only_picks_best_fitting_remote() {
    let proxy = Arc::new(
        MockProxy::new()
            .with_endpoint(descriptor("vit-l", "ep-l", 0.9, 900, Application::Image))
            .with_endpoint(descriptor("vit-s", "ep-s", 0.7, 300, Application::Image)),
    );
    let model = model(&remote_only_config(), &proxy);

    // budget = 0.8 * (2000 - 50) = 1560 ms: both fit.
    let r = request(0.0, 2_000);
    let chosen = model.pick_variant(0.0, ms(2_000), &r).await.unwrap();
    assert_eq!(chosen.name(), "vit-l");

    // budget = 0.8 * (500 - 50) = 360 ms: only the small one fits.
    let r = request(0.0, 500);
    let chosen = model.pick_variant(0.0, ms(500), &r).await.unwrap();
    assert_eq!(chosen.name(), "vit-s");
    assert!(proxy.discover_calls() >= 2);
}

#[tokio::test(start_paused = true)]
async fn remote_only_falls_back_to_fastest_remote() {
    let proxy = Arc::new(
        MockProxy::new()
            .with_endpoint(descriptor("vit-l", "ep-l", 0.9, 900, Application::Image))
            .with_endpoint(descriptor("vit-s", "ep-s", 0.7, 300, Application::Image)),
    );
    let model = model(&remote_only_config(), &proxy);

    let r = request(0.0, 200);
    let chosen = model.pick_variant(0.0, ms(200), &r).await.unwrap();
    assert_eq!(chosen.name(), "vit-s");
}

#[tokio::test(start_paused = true)]
async fn remote_only_without_endpoints_has_no_variant() {
    let model = model(&remote_only_config(), &Arc::new(MockProxy::new()));

    let r = request(0.0, 1_000);
    let err = model.pick_variant(0.0, ms(1_000), &r).await.unwrap_err();
    assert!(matches!(err, ModelError::NoVariants(Application::Image)));
}

// ───── § 4 Budget ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn time_budget_subtracts_discovery_and_overhead() {
    let model = model(&image_config(), &Arc::new(MockProxy::new()));

    let budget = model.time_budget(ms(1_000), ms(100));
    assert!(budget.abs_diff(ms(680)) < std::time::Duration::from_micros(1));

    assert_eq!(model.time_budget(ms(40), ms(0)), std::time::Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn unusable_latency_buffer_gives_empty_budget() {
    let config = image_config();
    let client = client(&Arc::new(MockProxy::new()), &Arc::new(MockInvoker::new()), &config);
    for latency_buffer in [f64::NAN, -1.0] {
        let policy = ModelPolicy {
            latency_buffer,
            ..ModelPolicy::default()
        };
        let model = Model::new(
            Application::Image,
            Vec::new(),
            Arc::clone(&client),
            policy,
            CancellationToken::new(),
        );
        assert_eq!(model.time_budget(ms(1_000), ms(0)), std::time::Duration::ZERO);
    }
}
