//! Fetch collaborator abstraction
//!
//! The initializer downloads its recipe and bundle through this trait so the
//! network can be swapped out:
//! - Production use with reqwest (in sluice-server)
//! - Tests with [`MemoryFetcher`]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

// =============================================================================
// HTTP Error
// =============================================================================

/// Fetch errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    /// Request timed out
    Timeout { timeout_ms: u64 },
    /// Connection failed
    ConnectionFailed { reason: String },
    /// Server answered with a non-success status
    Status { url: String, status: u16 },
    /// Request failed
    RequestFailed { reason: String },
    /// Response too large
    ResponseTooLarge { size: u64, max: u64 },
    /// Invalid URL
    InvalidUrl { url: String },
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpError::Timeout { timeout_ms } => {
                write!(f, "HTTP request timed out after {}ms", timeout_ms)
            }
            HttpError::ConnectionFailed { reason } => {
                write!(f, "HTTP connection failed: {}", reason)
            }
            HttpError::Status { url, status } => {
                write!(f, "HTTP {} from {}", status, url)
            }
            HttpError::RequestFailed { reason } => write!(f, "HTTP request failed: {}", reason),
            HttpError::ResponseTooLarge { size, max } => {
                write!(
                    f,
                    "HTTP response too large: {} bytes (max: {} bytes)",
                    size, max
                )
            }
            HttpError::InvalidUrl { url } => write!(f, "Invalid URL: {}", url),
        }
    }
}

impl std::error::Error for HttpError {}

/// Fetch result type
pub type HttpResult<T> = Result<T, HttpError>;

// =============================================================================
// Fetcher Trait
// =============================================================================

/// Opaque `fetch(url) -> bytes` capability
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download the resource at `url`, refusing bodies larger than `max_bytes`
    async fn fetch(&self, url: &str, max_bytes: usize) -> HttpResult<Bytes>;
}

// =============================================================================
// In-memory Fetcher
// =============================================================================

/// Fetcher serving canned responses from memory
///
/// Unknown URLs answer 404. Individual URLs can be made to fail with a
/// specific error to exercise initialization fault paths.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    routes: Mutex<HashMap<String, HttpResult<Bytes>>>,
    requests: Mutex<Vec<String>>,
}

impl MemoryFetcher {
    /// Create an empty fetcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` at `url`
    pub fn with_resource(self, url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.insert(url, Ok(body.into()));
        self
    }

    /// Fail every fetch of `url` with `error`
    pub fn with_failure(self, url: impl Into<String>, error: HttpError) -> Self {
        self.insert(url, Err(error));
        self
    }

    /// URLs fetched so far, in order
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn insert(&self, url: impl Into<String>, response: HttpResult<Bytes>) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), response);
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, url: &str, max_bytes: usize) -> HttpResult<Bytes> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.to_string());

        let response = self
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned();

        let body = response.unwrap_or_else(|| {
            Err(HttpError::Status {
                url: url.to_string(),
                status: 404,
            })
        })?;

        if body.len() > max_bytes {
            return Err(HttpError::ResponseTooLarge {
                size: body.len() as u64,
                max: max_bytes as u64,
            });
        }

        Ok(body)
    }
}
