//! Execution request handle
//!
//! An [`ExecutionRequest`] carries the parameters of one inbound call and the
//! sink its terminal response is written to. The sink is written exactly
//! once on every path: executed, rejected, or dropped during shutdown.

use tokio::sync::oneshot;

/// Terminal status of one execution request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// Execution succeeded, body is the result
    Success,
    /// Queue was at capacity
    Overloaded,
    /// The backend faulted
    Fault,
    /// The server stopped before the request ran
    ShuttingDown,
}

impl ResponseStatus {
    /// HTTP status code the transport should use
    pub fn http_code(&self) -> u16 {
        match self {
            Self::Success => 200,
            Self::Overloaded => 503,
            Self::Fault => 500,
            Self::ShuttingDown => 503,
        }
    }
}

/// Fixed body for overload rejections
pub const OVERLOADED_BODY: &str = "503 - Sandbox is overloaded.\n";
/// Fixed body for execution faults; sandbox internals never leak
pub const FAULT_BODY: &str = "500 - Backend execution failed.\n";
/// Fixed body for shutdown rejections
pub const SHUTTING_DOWN_BODY: &str = "503 - Sandbox is shutting down.\n";

/// Terminal response for one execution request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResponse {
    pub status: ResponseStatus,
    pub body: String,
}

impl ExecutionResponse {
    /// Successful execution result
    pub fn success(body: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Success,
            body: body.into(),
        }
    }

    /// Rejected because the queue is full
    pub fn overloaded() -> Self {
        Self {
            status: ResponseStatus::Overloaded,
            body: OVERLOADED_BODY.to_string(),
        }
    }

    /// The backend faulted
    pub fn fault() -> Self {
        Self {
            status: ResponseStatus::Fault,
            body: FAULT_BODY.to_string(),
        }
    }

    /// Rejected during shutdown
    pub fn shutting_down() -> Self {
        Self {
            status: ResponseStatus::ShuttingDown,
            body: SHUTTING_DOWN_BODY.to_string(),
        }
    }

    /// Content type of the body
    pub fn content_type(&self) -> &'static str {
        match self.status {
            ResponseStatus::Success => "application/json",
            _ => "text/plain; charset=utf-8",
        }
    }
}

/// One inbound call waiting for execution
#[derive(Debug)]
pub struct ExecutionRequest {
    sequence: u64,
    parameters: Option<String>,
    reply: Option<oneshot::Sender<ExecutionResponse>>,
}

impl ExecutionRequest {
    /// Create a request and the receiving half of its response sink
    pub fn new(parameters: impl Into<String>) -> (Self, PendingResponse) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            sequence: 0,
            parameters: Some(parameters.into()),
            reply: Some(tx),
        };
        (request, PendingResponse { rx })
    }

    /// Arrival sequence number, assigned on admission (0 before)
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn set_sequence(&mut self, sequence: u64) {
        debug_assert!(sequence > 0);
        self.sequence = sequence;
    }

    /// Read the parameter body; yields `None` after the first call
    pub fn take_parameters(&mut self) -> Option<String> {
        self.parameters.take()
    }

    /// Whether the caller is still waiting for the response
    pub fn is_waiting(&self) -> bool {
        self.reply.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Write the terminal response and close the sink
    ///
    /// Returns false if the caller already went away.
    pub fn respond(mut self, response: ExecutionResponse) -> bool {
        match self.reply.take() {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }
}

impl Drop for ExecutionRequest {
    fn drop(&mut self) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(ExecutionResponse::shutting_down());
        }
    }
}

/// Receiving half of a request's response sink
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<ExecutionResponse>,
}

impl PendingResponse {
    /// Wait for the terminal response
    pub async fn wait(self) -> ExecutionResponse {
        self.rx
            .await
            .unwrap_or_else(|_| ExecutionResponse::shutting_down())
    }
}
