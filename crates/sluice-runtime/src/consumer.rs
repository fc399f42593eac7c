//! Request consumer
//!
//! The one worker that drains the admission queue and drives the backend.
//! It owns the backend while running, so at most one execution is ever in
//! flight.

use crate::queue::AdmissionQueue;
use crate::request::ExecutionResponse;
use futures::FutureExt;
use sluice_core::HealthState;
use sluice_sandbox::Backend;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Counters published by the consumer
#[derive(Debug, Default)]
pub struct ConsumerStats {
    executed: AtomicU64,
    faulted: AtomicU64,
    shutdown_rejected: AtomicU64,
}

impl ConsumerStats {
    /// Executions that produced a result
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    /// Executions that faulted or panicked
    pub fn faulted(&self) -> u64 {
        self.faulted.load(Ordering::Relaxed)
    }

    /// Queued requests answered with the shutdown status
    pub fn shutdown_rejected(&self) -> u64 {
        self.shutdown_rejected.load(Ordering::Relaxed)
    }
}

/// Single serializing point of execution
pub struct RequestConsumer {
    queue: Arc<AdmissionQueue>,
    health: Arc<HealthState>,
    /// Present until the worker starts, and again after it has been joined
    backend: Option<Box<dyn Backend>>,
    task: Option<JoinHandle<Box<dyn Backend>>>,
    stats: Arc<ConsumerStats>,
    disposed: bool,
}

impl RequestConsumer {
    /// Create a consumer for `queue` that drives `backend`
    pub fn new(
        queue: Arc<AdmissionQueue>,
        health: Arc<HealthState>,
        backend: Box<dyn Backend>,
    ) -> Self {
        Self {
            queue,
            health,
            backend: Some(backend),
            task: None,
            stats: Arc::new(ConsumerStats::default()),
            disposed: false,
        }
    }

    /// Backend access for initialization; `None` while the worker runs
    pub fn backend_mut(&mut self) -> Option<&mut (dyn Backend + 'static)> {
        if self.task.is_some() {
            return None;
        }
        self.backend.as_deref_mut()
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    /// Check if the worker loop is running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Start the worker loop
    ///
    /// Returns false if it was already started (or already disposed).
    pub fn start(&mut self) -> bool {
        if self.disposed {
            warn!("Request consumer already disposed");
            return false;
        }
        if self.task.is_some() {
            warn!("Request consumer already started");
            return false;
        }
        let Some(backend) = self.backend.take() else {
            warn!("Request consumer has no backend to drive");
            return false;
        };

        let queue = Arc::clone(&self.queue);
        let health = Arc::clone(&self.health);
        let stats = Arc::clone(&self.stats);

        self.task = Some(tokio::spawn(run(queue, health, backend, stats)));
        true
    }

    /// Stop the worker and answer everything still queued
    ///
    /// An execution in flight runs to completion first. Safe to call more
    /// than once.
    pub async fn dispose(&mut self) {
        self.disposed = true;
        self.queue.dispose();

        if let Some(task) = self.task.take() {
            match task.await {
                Ok(backend) => self.backend = Some(backend),
                Err(e) => error!(error = %e, "Request consumer task failed"),
            }
        }

        let remaining = self.queue.drain();
        let count = remaining.len();
        for request in remaining {
            let sequence = request.sequence();
            if !request.respond(ExecutionResponse::shutting_down()) {
                debug!(sequence, "Caller left before shutdown rejection");
            }
        }
        if count > 0 {
            self.stats
                .shutdown_rejected
                .fetch_add(count as u64, Ordering::Relaxed);
            info!(count, "Rejected queued requests during shutdown");
        }
    }
}

impl Drop for RequestConsumer {
    fn drop(&mut self) {
        // Can't await in drop, so abort a worker that was never disposed
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[instrument(skip_all, name = "request_consumer", level = "info")]
async fn run(
    queue: Arc<AdmissionQueue>,
    health: Arc<HealthState>,
    mut backend: Box<dyn Backend>,
    stats: Arc<ConsumerStats>,
) -> Box<dyn Backend> {
    info!(backend = backend.name(), "Request consumer started");

    while let Some(mut request) = queue.dequeue().await {
        let sequence = request.sequence();
        let parameters = request.take_parameters().unwrap_or_default();
        let start = Instant::now();

        let outcome = AssertUnwindSafe(backend.execute_backend(&parameters))
            .catch_unwind()
            .await;

        let response = match outcome {
            Ok(Ok(result)) => {
                stats.executed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    sequence,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Execution succeeded"
                );
                ExecutionResponse::success(result)
            }
            Ok(Err(e)) => {
                stats.faulted.fetch_add(1, Ordering::Relaxed);
                error!(sequence, error = %e, "Execution faulted");
                health.mark_crashed(e.to_string());
                ExecutionResponse::fault()
            }
            Err(panic) => {
                stats.faulted.fetch_add(1, Ordering::Relaxed);
                let reason = panic_reason(panic.as_ref());
                error!(sequence, reason = %reason, "Execution panicked");
                health.mark_crashed(reason);
                ExecutionResponse::fault()
            }
        };

        // Crashed is recorded before the caller sees the fault status
        if !request.respond(response) {
            debug!(sequence, "Caller left before the response was written");
        }
    }

    info!("Request consumer stopped");
    backend
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("backend panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("backend panicked: {}", s)
    } else {
        "backend panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{ExecutionRequest, ResponseStatus};
    use sluice_core::HealthStatus;
    use sluice_sandbox::{MockBackend, SandboxError};
    use std::time::Duration;

    fn setup(backend: MockBackend, capacity: usize) -> (RequestConsumer, Arc<AdmissionQueue>, Arc<HealthState>) {
        let health = Arc::new(HealthState::new());
        health.mark_ready();
        let queue = Arc::new(AdmissionQueue::new(capacity, Arc::clone(&health)));
        let consumer = RequestConsumer::new(Arc::clone(&queue), Arc::clone(&health), Box::new(backend));
        (consumer, queue, health)
    }

    #[tokio::test]
    async fn test_executes_request() {
        let (mut consumer, queue, health) = setup(MockBackend::new(), 4);
        assert!(consumer.start());
        assert!(!consumer.start());

        let (request, pending) = ExecutionRequest::new("{\"n\":1}");
        queue.enqueue(request).unwrap();

        let response = pending.wait().await;
        assert_eq!(response.status, ResponseStatus::Success);
        assert_eq!(response.body, "{\"n\":1}");
        assert!(health.is_healthy());

        consumer.dispose().await;
        assert_eq!(consumer.stats().executed(), 1);
    }

    #[tokio::test]
    async fn test_fault_marks_crashed_and_keeps_draining() {
        let backend = MockBackend::new().with_handler(|p| {
            if p == "boom" {
                Err(SandboxError::ExecutionFault {
                    reason: "null reference".into(),
                })
            } else {
                Ok(p.to_string())
            }
        });
        let (mut consumer, queue, health) = setup(backend, 4);
        consumer.start();

        let (bad, bad_rx) = ExecutionRequest::new("boom");
        queue.enqueue(bad).unwrap();
        let response = bad_rx.wait().await;
        assert_eq!(response.status, ResponseStatus::Fault);
        assert!(!response.body.contains("null reference"));
        assert_eq!(health.status(), HealthStatus::Crashed);

        let (good, good_rx) = ExecutionRequest::new("fine");
        queue.enqueue(good).unwrap();
        assert_eq!(good_rx.wait().await.status, ResponseStatus::Success);
        assert!(!health.is_healthy());

        consumer.dispose().await;
        assert_eq!(consumer.stats().faulted(), 1);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let backend = MockBackend::new().with_handler(|p| {
            if p == "panic" {
                panic!("backend blew up");
            }
            Ok("ok".to_string())
        });
        let (mut consumer, queue, health) = setup(backend, 4);
        consumer.start();

        let (bad, bad_rx) = ExecutionRequest::new("panic");
        queue.enqueue(bad).unwrap();
        assert_eq!(bad_rx.wait().await.status, ResponseStatus::Fault);
        assert!(health.crash_reason().unwrap().contains("backend blew up"));

        let (good, good_rx) = ExecutionRequest::new("after");
        queue.enqueue(good).unwrap();
        assert_eq!(good_rx.wait().await.status, ResponseStatus::Success);

        consumer.dispose().await;
    }

    #[tokio::test]
    async fn test_dispose_rejects_queued_requests() {
        let backend = MockBackend::new().with_delay(Duration::from_millis(100));
        let (mut consumer, queue, _health) = setup(backend, 8);
        consumer.start();

        let mut pending = Vec::new();
        for i in 0..4 {
            let (request, rx) = ExecutionRequest::new(format!("{}", i));
            queue.enqueue(request).unwrap();
            pending.push(rx);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        consumer.dispose().await;

        let mut statuses = Vec::new();
        for rx in pending {
            statuses.push(rx.wait().await.status);
        }
        // The first was in flight and ran to completion
        assert_eq!(statuses[0], ResponseStatus::Success);
        assert!(statuses[1..]
            .iter()
            .all(|s| *s == ResponseStatus::ShuttingDown));
        assert_eq!(consumer.stats().shutdown_rejected(), 3);

        consumer.dispose().await;
        assert!(!consumer.is_running());
    }

    #[tokio::test]
    async fn test_start_after_dispose_is_refused() {
        let (mut consumer, queue, _health) = setup(MockBackend::new(), 2);
        consumer.start();
        consumer.dispose().await;

        assert!(!consumer.start());
        assert!(!consumer.is_running());

        // A disposed queue still rejects, and no worker picks anything up
        let (request, rx) = ExecutionRequest::new("late");
        let rejected = queue.enqueue(request).unwrap_err();
        rejected.finalize();
        assert_eq!(rx.wait().await.status, ResponseStatus::ShuttingDown);
    }

    #[tokio::test]
    async fn test_dispose_before_start_refuses_start() {
        let (mut consumer, _queue, _health) = setup(MockBackend::new(), 2);
        consumer.dispose().await;
        assert!(!consumer.start());
    }

    #[tokio::test]
    async fn test_backend_access_only_before_start() {
        let (mut consumer, _queue, _health) = setup(MockBackend::new(), 1);
        assert!(consumer.backend_mut().is_some());
        consumer.start();
        assert!(consumer.backend_mut().is_none());
        consumer.dispose().await;
    }

    #[test]
    fn test_panic_reason_formats() {
        let payload: Box<dyn Any + Send> = Box::new("oops");
        assert_eq!(panic_reason(payload.as_ref()), "backend panicked: oops");
        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_reason(payload.as_ref()), "backend panicked");
    }
}
