//! Mock backend for testing
//!
//! In-memory backend with deterministic, scripted behavior. A shared
//! [`MockBackendProbe`] stays with the test after the backend itself has been
//! handed to the consumer.

use crate::bundle::Bundle;
use crate::error::{SandboxError, SandboxResult};
use crate::traits::Backend;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Handler deciding the outcome of one execution
pub type MockHandler = Box<dyn FnMut(&str) -> SandboxResult<String> + Send>;

/// Observations recorded by a [`MockBackend`]
#[derive(Debug, Default)]
pub struct MockBackendProbe {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    executions: Mutex<Vec<String>>,
    installed: Mutex<Vec<Bundle>>,
}

impl MockBackendProbe {
    /// Executions currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous executions ever observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Parameters of every execution started, in order
    pub fn executions(&self) -> Vec<String> {
        self.executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of executions started
    pub fn execution_count(&self) -> usize {
        self.executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Bundles installed so far
    pub fn installed(&self) -> Vec<Bundle> {
        self.installed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn enter(&self) -> InFlightGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlightGuard { probe: self }
    }
}

/// Decrements the in-flight counter even if the handler panics
struct InFlightGuard<'a> {
    probe: &'a MockBackendProbe,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock backend
///
/// Echoes its parameters unless a handler is installed.
pub struct MockBackend {
    handler: MockHandler,
    delay: Option<Duration>,
    install_failure: Option<SandboxError>,
    probe: Arc<MockBackendProbe>,
}

impl MockBackend {
    /// Create an echoing mock backend
    pub fn new() -> Self {
        Self {
            handler: Box::new(|parameters| Ok(parameters.to_string())),
            delay: None,
            install_failure: None,
            probe: Arc::new(MockBackendProbe::default()),
        }
    }

    /// Decide each execution's outcome with `handler`
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&str) -> SandboxResult<String> + Send + 'static,
    {
        self.handler = Box::new(handler);
        self
    }

    /// Hold every execution for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every install with `error`
    pub fn with_install_failure(mut self, error: SandboxError) -> Self {
        self.install_failure = Some(error);
        self
    }

    /// Shared probe for inspecting behavior from outside
    pub fn probe(&self) -> Arc<MockBackendProbe> {
        Arc::clone(&self.probe)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn install(&mut self, bundle: Bundle) -> SandboxResult<()> {
        if let Some(error) = &self.install_failure {
            return Err(error.clone());
        }

        for file in &bundle.files {
            file.resolve_under(std::path::Path::new("/"))?;
        }

        self.probe
            .installed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(bundle);
        Ok(())
    }

    async fn execute_backend(&mut self, parameters: &str) -> SandboxResult<String> {
        let _guard = self.probe.enter();
        self.probe
            .executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(parameters.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        (self.handler)(parameters)
    }
}
