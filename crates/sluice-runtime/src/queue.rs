//! Admission queue
//!
//! Bounded FIFO between many concurrent producers and the single request
//! consumer. Producers never wait for space: an enqueue either succeeds or
//! hands the request straight back for the caller to reject.

use crate::request::{ExecutionRequest, ExecutionResponse};
use sluice_core::constants::QUEUE_CAPACITY_COUNT_MAX;
use sluice_core::{Error, HealthState};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Why a request was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The queue was at capacity
    Overloaded,
    /// The queue was disposed
    Disposed,
}

/// A request the queue refused, handed back to the caller
#[derive(Debug)]
pub struct Rejected {
    pub request: ExecutionRequest,
    pub reason: RejectReason,
    pub capacity: usize,
}

impl Rejected {
    /// Answer the caller with the matching rejection status
    pub fn finalize(self) -> bool {
        let response = match self.reason {
            RejectReason::Overloaded => ExecutionResponse::overloaded(),
            RejectReason::Disposed => ExecutionResponse::shutting_down(),
        };
        self.request.respond(response)
    }

    /// Error describing the rejection
    pub fn to_error(&self) -> Error {
        match self.reason {
            RejectReason::Overloaded => Error::AdmissionRejected {
                capacity: self.capacity,
            },
            RejectReason::Disposed => Error::disposed("admission queue"),
        }
    }
}

/// Receipt for an admitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admitted {
    /// Sequence number stamped on the request
    pub sequence: u64,
    /// Queue length right after the enqueue
    pub queue_len: usize,
}

#[derive(Debug)]
struct Inner {
    items: VecDeque<ExecutionRequest>,
    disposed: bool,
    next_sequence: u64,
    enqueued_count: u64,
    rejected_count: u64,
}

/// Bounded admission queue
///
/// Invariants:
/// - `0 <= len <= capacity` at all times
/// - dequeue order equals admission order, which equals sequence order
/// - reaching capacity marks the health state overloaded
#[derive(Debug)]
pub struct AdmissionQueue {
    inner: Mutex<Inner>,
    available: Notify,
    capacity: usize,
    health: Arc<HealthState>,
}

impl AdmissionQueue {
    /// Create a queue reporting saturation into `health`
    pub fn new(capacity: usize, health: Arc<HealthState>) -> Self {
        debug_assert!(capacity > 0, "queue capacity must be positive");
        debug_assert!(
            capacity <= QUEUE_CAPACITY_COUNT_MAX,
            "queue capacity exceeds QUEUE_CAPACITY_COUNT_MAX"
        );

        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.min(1024)),
                disposed: false,
                next_sequence: 1,
                enqueued_count: 0,
                rejected_count: 0,
            }),
            available: Notify::new(),
            capacity,
            health,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Try to admit a request
    ///
    /// Never waits for space. A rejected request comes back inside
    /// [`Rejected`]; the caller must answer it.
    pub fn enqueue(&self, mut request: ExecutionRequest) -> Result<Admitted, Rejected> {
        let mut inner = self.lock();

        if inner.disposed {
            inner.rejected_count = inner.rejected_count.wrapping_add(1);
            return Err(Rejected {
                request,
                reason: RejectReason::Disposed,
                capacity: self.capacity,
            });
        }

        if inner.items.len() >= self.capacity {
            inner.rejected_count = inner.rejected_count.wrapping_add(1);
            self.health.mark_overloaded();
            drop(inner);
            warn!(capacity = self.capacity, "Admission queue full, request rejected");
            return Err(Rejected {
                request,
                reason: RejectReason::Overloaded,
                capacity: self.capacity,
            });
        }

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.enqueued_count = inner.enqueued_count.wrapping_add(1);
        request.set_sequence(sequence);
        inner.items.push_back(request);

        let queue_len = inner.items.len();
        debug_assert!(queue_len <= self.capacity);
        if queue_len == self.capacity {
            // Report while still holding the lock so a concurrent dequeue
            // cannot recover before we mark
            self.health.mark_overloaded();
        }
        drop(inner);

        self.available.notify_one();
        debug!(sequence, queue_len, "Request admitted");

        Ok(Admitted {
            sequence,
            queue_len,
        })
    }

    /// Wait for the next request
    ///
    /// Returns `None` once the queue is disposed, even if items remain; those
    /// are collected with [`drain`](Self::drain).
    pub async fn dequeue(&self) -> Option<ExecutionRequest> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(next) = self.try_dequeue_inner()? {
                return Some(next);
            }

            notified.await;
        }
    }

    /// Take the head item without waiting
    pub fn try_dequeue(&self) -> Option<ExecutionRequest> {
        self.try_dequeue_inner().flatten()
    }

    // Outer `None` means disposed, inner `None` means empty
    fn try_dequeue_inner(&self) -> Option<Option<ExecutionRequest>> {
        let mut inner = self.lock();
        if inner.disposed {
            return None;
        }

        let next = inner.items.pop_front();
        if next.is_some() {
            debug_assert!(inner.items.len() < self.capacity);
            self.health.mark_recovered();
        }
        Some(next)
    }

    /// Close the queue and wake the consumer
    ///
    /// Queued requests stay in place until drained. Returns true only for the
    /// call that closed the queue.
    pub fn dispose(&self) -> bool {
        let first = {
            let mut inner = self.lock();
            !std::mem::replace(&mut inner.disposed, true)
        };
        if first {
            debug!("Admission queue disposed");
        }
        self.available.notify_waiters();
        first
    }

    /// Remove every queued request, in order
    pub fn drain(&self) -> Vec<ExecutionRequest> {
        self.lock().items.drain(..).collect()
    }

    /// Current number of queued requests
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Check if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued requests
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Check if the queue was disposed
    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    /// Total requests admitted
    pub fn enqueued_count(&self) -> u64 {
        self.lock().enqueued_count
    }

    /// Total requests rejected
    pub fn rejected_count(&self) -> u64 {
        self.lock().rejected_count
    }
}
