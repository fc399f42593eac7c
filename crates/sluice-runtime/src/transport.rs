//! Transport seam
//!
//! The transport owns nothing in the core. It gets a [`Gateway`]: the
//! capability to admit requests and to read health.

use crate::consumer::ConsumerStats;
use crate::queue::{AdmissionQueue, Admitted, Rejected};
use crate::request::{ExecutionRequest, ExecutionResponse};
use async_trait::async_trait;
use sluice_core::{HealthState, HealthStatus, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Narrow handle the transport uses to reach the core
#[derive(Clone)]
pub struct Gateway {
    queue: Arc<AdmissionQueue>,
    health: Arc<HealthState>,
    stats: Arc<ConsumerStats>,
    started_at: Instant,
}

impl Gateway {
    pub(crate) fn new(
        queue: Arc<AdmissionQueue>,
        health: Arc<HealthState>,
        stats: Arc<ConsumerStats>,
    ) -> Self {
        Self {
            queue,
            health,
            stats,
            started_at: Instant::now(),
        }
    }

    /// Try to admit a request; a rejected request must be finalized by the caller
    pub fn enqueue(&self, request: ExecutionRequest) -> std::result::Result<Admitted, Rejected> {
        self.queue.enqueue(request)
    }

    /// Admit `parameters` and wait for the terminal response
    ///
    /// Rejections are answered immediately with their fixed status.
    pub async fn execute(&self, parameters: impl Into<String>) -> ExecutionResponse {
        let (request, pending) = ExecutionRequest::new(parameters);
        if let Err(rejected) = self.queue.enqueue(request) {
            rejected.finalize();
        }
        pending.wait().await
    }

    /// True only while healthy
    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy()
    }

    /// Current health status
    pub fn health_status(&self) -> HealthStatus {
        self.health.status()
    }

    /// First recorded crash reason
    pub fn crash_reason(&self) -> Option<String> {
        self.health.crash_reason().map(str::to_string)
    }

    /// Requests waiting in the queue
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Queue capacity
    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Total admitted and rejected requests
    pub fn admission_counts(&self) -> (u64, u64) {
        (self.queue.enqueued_count(), self.queue.rejected_count())
    }

    /// Consumer counters
    pub fn consumer_stats(&self) -> &ConsumerStats {
        &self.stats
    }

    /// Time since the core was assembled
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Inbound transport collaborator
///
/// Started last and stopped first by the orchestrator, so no request can
/// reach the queue without a consumer to drain it.
#[async_trait]
pub trait Transport: Send {
    /// Start accepting requests
    async fn start(&mut self, gateway: Gateway) -> Result<()>;

    /// Stop accepting requests; must be safe to call when never started
    async fn stop(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ResponseStatus;

    fn gateway(capacity: usize) -> Gateway {
        let health = Arc::new(HealthState::new());
        health.mark_ready();
        let queue = Arc::new(AdmissionQueue::new(capacity, Arc::clone(&health)));
        Gateway::new(queue, health, Arc::new(ConsumerStats::default()))
    }

    #[tokio::test]
    async fn test_execute_answers_rejection_immediately() {
        let gateway = gateway(1);
        let (held, _held_rx) = ExecutionRequest::new("first");
        gateway.enqueue(held).unwrap();

        let response = gateway.execute("second").await;
        assert_eq!(response.status, ResponseStatus::Overloaded);
        assert_eq!(gateway.admission_counts(), (1, 1));
        assert!(!gateway.is_healthy());
        assert_eq!(gateway.health_status(), HealthStatus::Overloaded);
    }

    #[test]
    fn test_gateway_reports_queue() {
        let gateway = gateway(5);
        assert_eq!(gateway.queue_len(), 0);
        assert_eq!(gateway.queue_capacity(), 5);
        assert!(gateway.crash_reason().is_none());
    }
}
