//! Orchestrator
//!
//! Composition root. Owns the health state, admission queue, initializer and
//! request consumer for the process lifetime and sequences their startup and
//! shutdown.

use crate::consumer::RequestConsumer;
use crate::initializer::Initializer;
use crate::queue::AdmissionQueue;
use crate::transport::{Gateway, Transport};
use sluice_core::{Error, Fetcher, HealthState, InitializationMode, Result, SluiceConfig};
use sluice_sandbox::Backend;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Failed,
    Stopped,
}

/// Lifecycle owner for one sluice process
pub struct Orchestrator {
    config: SluiceConfig,
    health: Arc<HealthState>,
    queue: Arc<AdmissionQueue>,
    initializer: Initializer,
    consumer: RequestConsumer,
    transport: Option<Box<dyn Transport>>,
    gateway: Gateway,
    lifecycle: Lifecycle,
}

impl Orchestrator {
    /// Assemble the core around `backend`, fetching through `fetcher`
    pub fn new(
        config: SluiceConfig,
        backend: Box<dyn Backend>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        config.validate()?;

        let health = Arc::new(HealthState::new());
        let queue = Arc::new(AdmissionQueue::new(
            config.queue.capacity,
            Arc::clone(&health),
        ));
        let consumer = RequestConsumer::new(Arc::clone(&queue), Arc::clone(&health), backend);
        let gateway = Gateway::new(Arc::clone(&queue), Arc::clone(&health), consumer.stats());

        Ok(Self {
            config,
            health,
            queue,
            initializer: Initializer::new(fetcher),
            consumer,
            transport: None,
            gateway,
            lifecycle: Lifecycle::Created,
        })
    }

    /// Attach the inbound transport started by [`start`](Self::start)
    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Admission and health capability handed to transports
    pub fn gateway(&self) -> Gateway {
        self.gateway.clone()
    }

    /// Shared health state
    pub fn health(&self) -> Arc<HealthState> {
        Arc::clone(&self.health)
    }

    /// Configuration in effect
    pub fn config(&self) -> &SluiceConfig {
        &self.config
    }

    /// Check if `start` completed and `stop` has not run
    pub fn is_running(&self) -> bool {
        self.lifecycle == Lifecycle::Running
    }

    /// Initialize, then start the consumer, then the transport
    ///
    /// An initialization failure aborts startup and is returned; the process
    /// must not serve without a valid backend.
    pub async fn start(&mut self) -> Result<()> {
        if self.lifecycle != Lifecycle::Created {
            return Err(Error::internal("orchestrator already started"));
        }

        self.health.initialize();

        if let Err(e) = self.initialize().await {
            error!(error = %e, "Sandbox initialization failed");
            self.lifecycle = Lifecycle::Failed;
            return Err(e);
        }

        self.health.mark_ready();
        self.consumer.start();

        if let Some(transport) = self.transport.as_mut() {
            if let Err(e) = transport.start(self.gateway.clone()).await {
                error!(error = %e, "Transport failed to start");
                self.lifecycle = Lifecycle::Failed;
                return Err(e);
            }
        }

        self.lifecycle = Lifecycle::Running;
        info!("Sandbox running");
        Ok(())
    }

    async fn initialize(&mut self) -> Result<()> {
        match self.config.initialization.mode() {
            InitializationMode::Dummy => self.initializer.dummy_initialization().await,
            InitializationMode::Recipe(url) => {
                let backend = self
                    .consumer
                    .backend_mut()
                    .ok_or_else(|| Error::internal("backend is already being driven"))?;
                self.initializer.initialize_sandbox(&url, backend).await
            }
            InitializationMode::Skip => {
                info!("Skipping startup sandbox initialization");
                Ok(())
            }
        }
    }

    /// Stop the transport, drain the consumer, release everything
    ///
    /// Idempotent, and safe after a failed start.
    pub async fn stop(&mut self) {
        if self.lifecycle == Lifecycle::Stopped {
            return;
        }
        info!("Stopping sandbox");

        if let Some(transport) = self.transport.as_mut() {
            if let Err(e) = transport.stop().await {
                warn!(error = %e, "Transport did not stop cleanly");
            }
        }

        self.health.mark_terminating();
        self.consumer.dispose().await;
        self.queue.dispose();
        self.initializer.dispose();
        self.health.dispose();

        self.lifecycle = Lifecycle::Stopped;
        info!("Bye");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ResponseStatus;
    use async_trait::async_trait;
    use sluice_core::{HealthStatus, MemoryFetcher};
    use sluice_sandbox::MockBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTransport {
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
        saw_healthy: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn start(&mut self, gateway: Gateway) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if gateway.is_healthy() {
                self.saw_healthy.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn dummy_config() -> SluiceConfig {
        let mut config = SluiceConfig::default();
        config.initialization.dummy = true;
        config
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let transport = CountingTransport::default();
        let (starts, stops, saw_healthy) = (
            transport.starts.clone(),
            transport.stops.clone(),
            transport.saw_healthy.clone(),
        );

        let mut orchestrator = Orchestrator::new(
            dummy_config(),
            Box::new(MockBackend::new()),
            Arc::new(MemoryFetcher::new()),
        )
        .unwrap()
        .with_transport(transport);

        assert!(!orchestrator.health().is_healthy());
        orchestrator.start().await.unwrap();
        assert!(orchestrator.is_running());
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(saw_healthy.load(Ordering::SeqCst), 1);

        let response = orchestrator.gateway().execute("{}").await;
        assert_eq!(response.status, ResponseStatus::Success);

        orchestrator.stop().await;
        orchestrator.stop().await;
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.health().status(), HealthStatus::Terminating);
        assert!(!orchestrator.health().is_healthy());
    }

    #[tokio::test]
    async fn test_failed_initialization_never_starts_transport() {
        let mut config = SluiceConfig::default();
        config.initialization.recipe_url = Some("https://cdn.test/missing.json".into());

        let transport = CountingTransport::default();
        let starts = transport.starts.clone();

        let mut orchestrator = Orchestrator::new(
            config,
            Box::new(MockBackend::new()),
            Arc::new(MemoryFetcher::new()),
        )
        .unwrap()
        .with_transport(transport);

        let err = orchestrator.start().await.unwrap_err();
        assert!(matches!(err, Error::InitializationFailed { .. }));
        assert_eq!(starts.load(Ordering::SeqCst), 0);
        assert_eq!(orchestrator.health().status(), HealthStatus::Initializing);

        orchestrator.stop().await;
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_skip_initialization_is_ready() {
        let mut orchestrator = Orchestrator::new(
            SluiceConfig::default(),
            Box::new(MockBackend::new()),
            Arc::new(MemoryFetcher::new()),
        )
        .unwrap();

        orchestrator.start().await.unwrap();
        assert!(orchestrator.health().is_healthy());
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let mut orchestrator = Orchestrator::new(
            dummy_config(),
            Box::new(MockBackend::new()),
            Arc::new(MemoryFetcher::new()),
        )
        .unwrap();

        orchestrator.start().await.unwrap();
        assert!(orchestrator.start().await.is_err());
        orchestrator.stop().await;
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = dummy_config();
        config.queue.capacity = 0;

        let result = Orchestrator::new(
            config,
            Box::new(MockBackend::new()),
            Arc::new(MemoryFetcher::new()),
        );
        assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
    }
}
