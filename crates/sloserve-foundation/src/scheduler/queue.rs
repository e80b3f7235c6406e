//! Admission queue ordered by creation time (FIFO) or deadline (EDF).

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use sloserve_kernel::{QueueOrdering, Request};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{SchedulerError, SchedulerResult};

// Request wrapper; BinaryHeap is a max-heap, so the comparison is reversed
// to pop the smallest key first, then the earliest insertion.
struct QueuedRequest {
    key: Instant,
    seq: u64,
    request: Arc<Request>,
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.seq == other.seq
    }
}

impl Eq for QueuedRequest {}

impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct Pending {
    heap: BinaryHeap<QueuedRequest>,
    closed: bool,
}

/// Priority queue shared by the scheduler's workers.
///
/// The closed flag lives under the same lock as the heap, so a push either
/// lands before `close` drains it or fails with `ShutDown`.
pub struct RequestQueue {
    ordering: QueueOrdering,
    capacity: Option<usize>,
    pending: Mutex<Pending>,
    seq: AtomicU64,
    ready: Notify,
}

impl RequestQueue {
    pub fn new(ordering: QueueOrdering, capacity: Option<usize>) -> Self {
        Self {
            ordering,
            capacity,
            pending: Mutex::new(Pending::default()),
            seq: AtomicU64::new(0),
            ready: Notify::new(),
        }
    }

    pub fn ordering(&self) -> QueueOrdering {
        self.ordering
    }

    pub fn push(&self, request: Arc<Request>) -> SchedulerResult<()> {
        {
            let mut pending = self.pending.lock();
            if pending.closed {
                return Err(SchedulerError::ShutDown);
            }
            if let Some(capacity) = self.capacity {
                if pending.heap.len() >= capacity {
                    return Err(SchedulerError::QueueFull { capacity });
                }
            }
            pending.heap.push(QueuedRequest {
                key: request.queue_key(self.ordering),
                seq: self.seq.fetch_add(1, Ordering::Relaxed),
                request,
            });
        }
        self.ready.notify_one();
        Ok(())
    }

    pub fn try_pop(&self) -> Option<Arc<Request>> {
        self.pending.lock().heap.pop().map(|entry| entry.request)
    }

    /// Wait for the next request in priority order.
    pub async fn pop(&self) -> Arc<Request> {
        loop {
            if let Some(request) = self.try_pop() {
                return request;
            }
            self.ready.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().heap.is_empty()
    }

    /// Refuse further pushes and hand back everything still queued.
    pub fn close(&self) -> Vec<Arc<Request>> {
        let mut pending = self.pending.lock();
        pending.closed = true;
        let mut drained = Vec::with_capacity(pending.heap.len());
        while let Some(entry) = pending.heap.pop() {
            drained.push(entry.request);
        }
        drained
    }
}
