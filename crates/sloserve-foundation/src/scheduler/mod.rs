//! Request scheduler.
//!
//! The [`Scheduler`] owns one [`Model`] per configured application, a shared
//! admission queue and a fixed pool of workers that drain it.
//!
//! # Architecture
//!
//! ```text
//!  add_request ──▶ RequestQueue (FIFO | EDF) ──▶ worker 0..N
//!                                                   │
//!                          Model[request.application()].execute
//!
//!  network refresh task: warm-up probes, then probe every refresh_interval
//! ```
//!
//! Workers and the refresh task run on a `TaskTracker` and stop when the
//! scheduler's `CancellationToken` fires; models hold child tokens.

mod queue;

pub use queue::RequestQueue;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sloserve_kernel::config::PlacementMode;
use sloserve_kernel::{Application, LocalRuntime, Request, SloServeConfig, VariantRef};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{SchedulerError, SchedulerResult};
use crate::model::Model;
use crate::network::RemoteClient;

/// Queue, worker pool and per-application models.
pub struct Scheduler {
    config: SloServeConfig,
    models: Arc<HashMap<Application, Arc<Model>>>,
    client: Arc<RemoteClient>,
    queue: Arc<RequestQueue>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    started: AtomicBool,
}

impl Scheduler {
    /// Build a scheduler from a validated configuration.
    pub fn new(
        config: SloServeConfig,
        client: Arc<RemoteClient>,
        runtime: Arc<dyn LocalRuntime>,
    ) -> SchedulerResult<Self> {
        config.validate()?;
        let cancel = CancellationToken::new();
        let models = config
            .applications
            .keys()
            .map(|&application| {
                let model = Model::from_config(
                    application,
                    &config,
                    Arc::clone(&runtime),
                    Arc::clone(&client),
                    cancel.child_token(),
                );
                (application, model)
            })
            .collect();
        let queue = RequestQueue::new(config.queue.ordering, config.queue.capacity);

        Ok(Self {
            models: Arc::new(models),
            client,
            queue: Arc::new(queue),
            cancel,
            tasks: TaskTracker::new(),
            started: AtomicBool::new(false),
            config,
        })
    }

    /// Build a scheduler whose remote side speaks HTTP to the configured URLs.
    pub fn from_config(
        config: SloServeConfig,
        runtime: Arc<dyn LocalRuntime>,
    ) -> SchedulerResult<Self> {
        let client = Arc::new(RemoteClient::from_config(&config)?);
        Self::new(config, client, runtime)
    }

    pub fn config(&self) -> &SloServeConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<RemoteClient> {
        &self.client
    }

    pub fn model(&self, application: Application) -> Option<&Arc<Model>> {
        self.models.get(&application)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Spawn the workers and the network refresh task. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        for worker_id in 0..self.config.workers {
            self.tasks.spawn(run_worker(
                worker_id,
                Arc::clone(&self.queue),
                Arc::clone(&self.models),
                self.cancel.clone(),
            ));
        }
        if self.config.placement != PlacementMode::LocalOnly {
            self.tasks.spawn(run_network_refresh(
                Arc::clone(&self.client),
                self.config.network.warmup_rounds,
                self.config.network.refresh_interval(),
                self.cancel.clone(),
            ));
        }
        tracing::info!(
            workers = self.config.workers,
            ordering = %self.queue.ordering(),
            placement = ?self.config.placement,
            "scheduler started"
        );
    }

    /// Stamp the submission time and enqueue the request.
    pub fn add_request(&self, request: Arc<Request>) -> SchedulerResult<()> {
        if self.cancel.is_cancelled() {
            return Err(SchedulerError::ShutDown);
        }
        request.mark_submission();
        let id = request.id();
        self.queue.push(request)?;
        tracing::debug!(request_id = id, queued = self.queue.len(), "request queued");
        Ok(())
    }

    /// Enqueue the request and wait for it to finish.
    pub async fn submit(&self, request: Arc<Request>) -> SchedulerResult<Option<VariantRef>> {
        self.add_request(Arc::clone(&request))?;
        Ok(request.wait().await)
    }

    /// Stop workers and background tasks; queued requests are abandoned.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        for model in self.models.values() {
            model.shutdown().await;
        }
        self.client.shutdown().await;

        let leftover = self.queue.close();
        for request in &leftover {
            request.abandon();
        }
        tracing::info!(abandoned = leftover.len(), "scheduler shut down");
    }
}

async fn run_worker(
    worker_id: usize,
    queue: Arc<RequestQueue>,
    models: Arc<HashMap<Application, Arc<Model>>>,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = queue.pop() => request,
        };
        request.mark_execution();

        let Some(model) = models.get(&request.application()) else {
            tracing::error!(
                worker_id,
                request_id = request.id(),
                application = %request.application(),
                "no model for application, abandoning request"
            );
            request.abandon();
            continue;
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                request.abandon();
                break;
            }
            _ = model.execute(&request) => {}
        }
    }
    tracing::debug!(worker_id, "worker stopped");
}

async fn run_network_refresh(
    client: Arc<RemoteClient>,
    warmup_rounds: u32,
    period: std::time::Duration,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = client.warm_up(warmup_rounds) => {}
    }
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; warm-up already probed.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => client.probe().await,
        }
    }
}
