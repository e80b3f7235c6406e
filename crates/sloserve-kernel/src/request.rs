//! Inference requests and their completion protocol.
//!
//! A [`Request`] is shared as `Arc<Request>` between the caller, the
//! scheduler queue, a worker and any speculative backup task. All mutable
//! state sits behind small locks; completion goes through a single guard so
//! that exactly one of several racing executors wins.
//!
//! ```text
//!   created ──mark_submission──▶ queued ──mark_execution──▶ running
//!                                                              │
//!                              complete_with / abandon (once) ◀┘
//!                                          │
//!                                   wait() unblocks
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::payload::RequestData;
use crate::types::{Application, Placement, QueueOrdering};

/// Process-wide request id type.
pub type RequestId = u64;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(0);

/// Deadline used when `created_at + max_latency` overflows.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365);

// ============================================================================
// SLO and variant identity
// ============================================================================

/// Service-level objective attached to a request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slo {
    /// Inclusive lower bound on delivered accuracy
    pub min_accuracy: f64,
    /// Deadline relative to the request's creation time
    pub max_latency: Duration,
}

/// Identity of a variant as recorded on a request.
///
/// Requests keep this snapshot instead of the variant itself so that the
/// kernel does not depend on the execution machinery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantRef {
    pub name: Arc<str>,
    pub accuracy: f64,
    pub placement: Placement,
}

impl VariantRef {
    pub fn new(name: impl Into<Arc<str>>, accuracy: f64, placement: Placement) -> Self {
        Self {
            name: name.into(),
            accuracy,
            placement,
        }
    }
}

impl fmt::Display for VariantRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.placement)
    }
}

/// Terminal state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pending,
    Completed,
    Abandoned,
}

// ============================================================================
// Request
// ============================================================================

#[derive(Debug, Default)]
struct Timeline {
    submitted_at: Option<Instant>,
    started_at: Option<Instant>,
}

#[derive(Debug)]
struct Completion {
    outcome: Outcome,
    completed_at: Option<Instant>,
    variant_used: Option<VariantRef>,
    output: Option<String>,
}

/// A unit of inference work with an SLO and a one-shot completion signal.
pub struct Request {
    id: RequestId,
    payload: RequestData,
    size_bytes: usize,
    slo: Slo,
    created_at: Instant,
    timeline: Mutex<Timeline>,
    attempts: Mutex<Vec<VariantRef>>,
    network_estimate: Mutex<Option<Duration>>,
    completion: Mutex<Completion>,
    done: AtomicBool,
    signal: watch::Sender<bool>,
}

impl Request {
    /// Create a request for an arbitrary payload.
    pub fn new(payload: RequestData, min_accuracy: f64, max_latency: Duration) -> Self {
        let (signal, _) = watch::channel(false);
        let size_bytes = payload.size_bytes();
        Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            payload,
            size_bytes,
            slo: Slo {
                min_accuracy,
                max_latency,
            },
            created_at: Instant::now(),
            timeline: Mutex::new(Timeline::default()),
            attempts: Mutex::new(Vec::new()),
            network_estimate: Mutex::new(None),
            completion: Mutex::new(Completion {
                outcome: Outcome::Pending,
                completed_at: None,
                variant_used: None,
                output: None,
            }),
            done: AtomicBool::new(false),
            signal,
        }
    }

    /// Create an image classification request.
    pub fn image(bytes: impl Into<Bytes>, min_accuracy: f64, max_latency: Duration) -> Self {
        Self::new(RequestData::Image(bytes.into()), min_accuracy, max_latency)
    }

    /// Create a text request from named fields.
    pub fn text(
        fields: BTreeMap<String, String>,
        min_accuracy: f64,
        max_latency: Duration,
    ) -> Self {
        Self::new(RequestData::Text(fields), min_accuracy, max_latency)
    }

    /// Override the creation time, e.g. when replaying a trace.
    pub fn with_created_at(mut self, created_at: Instant) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn application(&self) -> Application {
        self.payload.application()
    }

    pub fn slo(&self) -> Slo {
        self.slo
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn submitted_at(&self) -> Option<Instant> {
        self.timeline.lock().submitted_at
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.timeline.lock().started_at
    }

    pub fn completed_at(&self) -> Option<Instant> {
        self.completion.lock().completed_at
    }

    /// Payload as consumed by the on-device runtime.
    pub fn local_data(&self) -> &RequestData {
        &self.payload
    }

    /// Payload as sent to remote endpoints.
    pub fn remote_data(&self) -> &RequestData {
        &self.payload
    }

    /// Size of the remote form, computed once at construction.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Absolute deadline (`created_at + max_latency`).
    pub fn deadline(&self) -> Instant {
        self.created_at
            .checked_add(self.slo.max_latency)
            .unwrap_or_else(|| self.created_at + FAR_FUTURE)
    }

    /// Priority key used by the admission queue; smaller dequeues first.
    pub fn queue_key(&self, ordering: QueueOrdering) -> Instant {
        match ordering {
            QueueOrdering::Fifo => self.created_at,
            QueueOrdering::Edf => self.deadline(),
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Record the time the request entered the queue. Later calls are ignored.
    pub fn mark_submission(&self) {
        let mut timeline = self.timeline.lock();
        if timeline.submitted_at.is_none() {
            timeline.submitted_at = Some(Instant::now());
        }
    }

    /// Record the time a worker picked the request up. Later calls are ignored.
    pub fn mark_execution(&self) {
        let mut timeline = self.timeline.lock();
        if timeline.started_at.is_none() {
            timeline.started_at = Some(Instant::now());
        }
    }

    /// Append a variant to the list of attempted variants.
    pub fn record_attempt(&self, variant: VariantRef) {
        self.attempts.lock().push(variant);
    }

    /// Record the estimated network transfer time for the remote form.
    pub fn set_network_estimate(&self, estimate: Duration) {
        *self.network_estimate.lock() = Some(estimate);
    }

    pub fn network_estimate(&self) -> Option<Duration> {
        *self.network_estimate.lock()
    }

    pub fn variants_tried(&self) -> Vec<VariantRef> {
        self.attempts.lock().clone()
    }

    /// Complete the request with the variant that produced `output`.
    ///
    /// Returns `false` without touching any state if the request already
    /// finished, so racing executors can call this unconditionally.
    pub fn complete_with(&self, variant: VariantRef, output: impl Into<String>) -> bool {
        {
            let mut completion = self.completion.lock();
            if completion.outcome != Outcome::Pending {
                return false;
            }
            completion.outcome = Outcome::Completed;
            completion.completed_at = Some(Instant::now());
            completion.variant_used = Some(variant);
            completion.output = Some(output.into());
            self.done.store(true, Ordering::Release);
        }
        self.signal.send_replace(true);
        true
    }

    /// Give up on the request. Waiters unblock with no variant.
    pub fn abandon(&self) -> bool {
        {
            let mut completion = self.completion.lock();
            if completion.outcome != Outcome::Pending {
                return false;
            }
            completion.outcome = Outcome::Abandoned;
            completion.completed_at = Some(Instant::now());
            self.done.store(true, Ordering::Release);
        }
        self.signal.send_replace(true);
        true
    }

    pub fn is_complete(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn outcome(&self) -> Outcome {
        self.completion.lock().outcome
    }

    pub fn variant_used(&self) -> Option<VariantRef> {
        self.completion.lock().variant_used.clone()
    }

    pub fn output(&self) -> Option<String> {
        self.completion.lock().output.clone()
    }

    /// Block until the request completes or is abandoned.
    pub async fn wait(&self) -> Option<VariantRef> {
        let mut rx = self.signal.subscribe();
        // The sender lives as long as `self`, so this cannot observe a close.
        let _ = rx.wait_for(|done| *done).await;
        self.variant_used()
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    ///
    /// The request keeps running when the timeout elapses.
    pub async fn wait_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<VariantRef>, tokio::time::error::Elapsed> {
        tokio::time::timeout(timeout, self.wait()).await
    }

    // ------------------------------------------------------------------------
    // Derived durations
    // ------------------------------------------------------------------------

    /// Completion time minus creation time.
    pub fn response_time(&self) -> Option<Duration> {
        Some(
            self.completed_at()?
                .saturating_duration_since(self.created_at),
        )
    }

    /// Execution start minus submission time.
    pub fn queue_time(&self) -> Option<Duration> {
        let timeline = self.timeline.lock();
        Some(
            timeline
                .started_at?
                .saturating_duration_since(timeline.submitted_at?),
        )
    }

    /// Completion time minus execution start.
    pub fn execution_time(&self) -> Option<Duration> {
        let started = self.started_at()?;
        Some(self.completed_at()?.saturating_duration_since(started))
    }

    /// Whether the request finished within its latency SLO, measured from
    /// creation. `None` while pending.
    pub fn completed_within_latency(&self) -> Option<bool> {
        let completed = self.completed_at()?;
        Some(completed.saturating_duration_since(self.created_at) <= self.slo.max_latency)
    }

    /// Serializable snapshot of the request.
    pub fn report(&self) -> RequestReport {
        let offset = |t: Option<Instant>| {
            t.map(|t| t.saturating_duration_since(self.created_at).as_secs_f64())
        };
        let secs = |d: Option<Duration>| d.map(|d| d.as_secs_f64());
        let (outcome, completed_at, variant_used, output) = {
            let c = self.completion.lock();
            (c.outcome, c.completed_at, c.variant_used.clone(), c.output.clone())
        };
        RequestReport {
            id: self.id,
            application: self.application(),
            size_bytes: self.size_bytes,
            min_accuracy: self.slo.min_accuracy,
            max_latency_s: self.slo.max_latency.as_secs_f64(),
            submitted_s: offset(self.submitted_at()),
            started_s: offset(self.started_at()),
            completed_s: offset(completed_at),
            response_time_s: secs(self.response_time()),
            queue_time_s: secs(self.queue_time()),
            execution_time_s: secs(self.execution_time()),
            accuracy: variant_used.as_ref().map(|v| v.accuracy),
            variant_used,
            variants_tried: self.variants_tried(),
            network_estimate_s: secs(self.network_estimate()),
            completed_within_latency: self.completed_within_latency(),
            outcome,
            output,
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("application", &self.application())
            .field("size_bytes", &self.size_bytes)
            .field("slo", &self.slo)
            .field("outcome", &self.outcome())
            .finish()
    }
}

/// Point-in-time view of a request; timestamps are seconds since creation.
#[derive(Debug, Clone, Serialize)]
pub struct RequestReport {
    pub id: RequestId,
    pub application: Application,
    pub size_bytes: usize,
    pub min_accuracy: f64,
    pub max_latency_s: f64,
    pub submitted_s: Option<f64>,
    pub started_s: Option<f64>,
    pub completed_s: Option<f64>,
    pub response_time_s: Option<f64>,
    pub queue_time_s: Option<f64>,
    pub execution_time_s: Option<f64>,
    pub variants_tried: Vec<VariantRef>,
    pub variant_used: Option<VariantRef>,
    pub accuracy: Option<f64>,
    pub network_estimate_s: Option<f64>,
    pub completed_within_latency: Option<bool>,
    pub outcome: Outcome,
    pub output: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::text_fields;

    fn local(name: &str, accuracy: f64) -> VariantRef {
        VariantRef::new(name, accuracy, Placement::Local)
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let a = Request::image(vec![1u8], 0.5, Duration::from_secs(1));
        let b = Request::image(vec![1u8], 0.5, Duration::from_secs(1));
        assert!(b.id() > a.id());
    }

    #[test]
    fn test_text_request_size_and_application() {
        let req = Request::text(
            text_fields([("query", "who"), ("context", "nobody")]),
            0.1,
            Duration::from_secs(1),
        );
        assert_eq!(req.application(), Application::Text);
        assert_eq!(req.size_bytes(), 9);
    }

    #[test]
    fn test_durations_are_none_before_timestamps() {
        let req = Request::image(vec![0u8; 4], 0.5, Duration::from_secs(1));
        assert!(req.response_time().is_none());
        assert!(req.queue_time().is_none());
        assert!(req.execution_time().is_none());
        assert!(req.completed_within_latency().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeline_durations() {
        let req = Request::image(vec![0u8; 4], 0.5, Duration::from_secs(1));
        req.mark_submission();
        tokio::time::advance(Duration::from_millis(100)).await;
        req.mark_execution();
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(req.complete_with(local("small", 0.6), "7"));

        assert_eq!(req.queue_time(), Some(Duration::from_millis(100)));
        assert_eq!(req.execution_time(), Some(Duration::from_millis(200)));
        assert_eq!(req.response_time(), Some(Duration::from_millis(300)));
        assert_eq!(req.completed_within_latency(), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_time_counts_from_creation() {
        let req = Request::image(vec![0u8; 4], 0.5, Duration::from_secs(1));
        tokio::time::advance(Duration::from_millis(300)).await;
        req.mark_submission();
        req.mark_execution();
        tokio::time::advance(Duration::from_millis(100)).await;
        req.complete_with(local("small", 0.6), "7");

        assert_eq!(req.response_time(), Some(Duration::from_millis(400)));
        assert_eq!(req.queue_time(), Some(Duration::ZERO));
        assert_eq!(req.execution_time(), Some(Duration::from_millis(100)));
        let report = req.report();
        assert_eq!(report.response_time_s, Some(0.4));
        assert_eq!(report.submitted_s, Some(0.3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_completion_is_reported() {
        let req = Request::image(vec![0u8; 4], 0.5, Duration::from_millis(50));
        req.mark_submission();
        tokio::time::advance(Duration::from_millis(80)).await;
        req.complete_with(local("small", 0.6), "1");
        assert_eq!(req.completed_within_latency(), Some(false));
    }

    #[test]
    fn test_complete_with_only_once() {
        let req = Request::image(vec![0u8; 4], 0.5, Duration::from_secs(1));
        assert!(req.complete_with(local("first", 0.6), "a"));
        assert!(!req.complete_with(local("second", 0.9), "b"));
        assert!(!req.abandon());
        assert_eq!(req.variant_used().unwrap().name.as_ref(), "first");
        assert_eq!(req.output().as_deref(), Some("a"));
        assert_eq!(req.outcome(), Outcome::Completed);
    }

    #[test]
    fn test_abandon_leaves_variant_empty() {
        let req = Request::image(vec![0u8; 4], 0.5, Duration::from_secs(1));
        assert!(req.abandon());
        assert!(req.is_complete());
        assert!(req.variant_used().is_none());
        assert!(!req.complete_with(local("late", 0.6), "x"));
        assert_eq!(req.report().outcome, Outcome::Abandoned);
    }

    #[tokio::test]
    async fn test_concurrent_completion_has_single_winner() {
        let req = Arc::new(Request::image(vec![0u8; 4], 0.5, Duration::from_secs(1)));
        let mut handles = Vec::new();
        for i in 0..16 {
            let req = Arc::clone(&req);
            handles.push(tokio::spawn(async move {
                req.complete_with(local(&format!("v{i}"), 0.5), i.to_string())
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        let winner = req.variant_used().unwrap();
        assert_eq!(
            req.output().unwrap(),
            winner.name.trim_start_matches('v').to_string()
        );
    }

    #[tokio::test]
    async fn test_multiple_waiters_unblock() {
        let req = Arc::new(Request::image(vec![0u8; 4], 0.5, Duration::from_secs(1)));
        let w1 = tokio::spawn({
            let req = Arc::clone(&req);
            async move { req.wait().await }
        });
        let w2 = tokio::spawn({
            let req = Arc::clone(&req);
            async move { req.wait().await }
        });
        tokio::task::yield_now().await;
        req.complete_with(local("m", 0.7), "3");
        assert_eq!(w1.await.unwrap().unwrap().name.as_ref(), "m");
        assert_eq!(w2.await.unwrap().unwrap().name.as_ref(), "m");
        // Waiting after completion returns immediately.
        assert!(req.wait().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_expires() {
        let req = Request::image(vec![0u8; 4], 0.5, Duration::from_secs(1));
        assert!(req.wait_timeout(Duration::from_millis(10)).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_keys() {
        let now = Instant::now();
        let req = Request::image(vec![0u8; 4], 0.5, Duration::from_millis(300)).with_created_at(now);
        assert_eq!(req.queue_key(QueueOrdering::Fifo), now);
        assert_eq!(
            req.queue_key(QueueOrdering::Edf),
            now + Duration::from_millis(300)
        );
    }

    #[test]
    fn test_report_serializes() {
        let req = Request::image(vec![0u8; 10], 0.5, Duration::from_secs(1));
        req.record_attempt(local("a", 0.5));
        req.set_network_estimate(Duration::from_millis(20));
        req.complete_with(local("a", 0.5), "2");
        let report = req.report();
        assert_eq!(report.variants_tried.len(), 1);
        assert_eq!(report.accuracy, Some(0.5));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "completed");
        assert_eq!(json["size_bytes"], 10);
        assert_eq!(json["variant_used"]["name"], "a");
        assert_eq!(json["variants_tried"][0]["placement"], "local");
    }
}
