//! HTTP transport
//!
//! Binds a listener, serves the router, and shuts down gracefully when the
//! orchestrator stops it.

use crate::api::router;
use async_trait::async_trait;
use sluice_core::{Error, Result};
use sluice_runtime::{Gateway, Transport};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Time in-flight HTTP requests get to finish once stopping begins
pub const SHUTDOWN_GRACE_MS_DEFAULT: u64 = 10 * 1000;

/// Axum-based transport
pub struct HttpTransport {
    bind_address: String,
    shutdown_grace: Duration,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl HttpTransport {
    /// Create a transport that will listen on `bind_address`
    pub fn new(bind_address: impl Into<String>) -> Self {
        Self {
            bind_address: bind_address.into(),
            shutdown_grace: Duration::from_millis(SHUTDOWN_GRACE_MS_DEFAULT),
            local_addr: None,
            shutdown_tx: None,
            task: None,
        }
    }

    /// Set how long in-flight requests may take after stop begins
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Address actually bound, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn start(&mut self, gateway: Gateway) -> Result<()> {
        if self.task.is_some() {
            return Err(Error::internal("HTTP transport already started"));
        }

        let listener = TcpListener::bind(&self.bind_address)
            .await
            .map_err(|e| Error::internal(format!("failed to bind {}: {}", self.bind_address, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::internal(format!("failed to read local address: {}", e)))?;

        let app = router(gateway);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        self.task = Some(tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                error!(error = %e, "HTTP server failed");
            }
        }));
        self.shutdown_tx = Some(shutdown_tx);
        self.local_addr = Some(local_addr);

        info!(address = %local_addr, "HTTP transport listening");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_grace, &mut task).await {
                Ok(Ok(())) => info!("HTTP transport stopped"),
                Ok(Err(e)) => {
                    return Err(Error::internal(format!("HTTP server task failed: {}", e)));
                }
                Err(_) => {
                    warn!(
                        grace_ms = self.shutdown_grace.as_millis() as u64,
                        "In-flight requests outlived the shutdown grace, aborting"
                    );
                    task.abort();
                }
            }
        }
        Ok(())
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
