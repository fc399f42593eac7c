//! Network fetcher backed by reqwest

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use sluice_core::constants::FETCH_TIMEOUT_MS_DEFAULT;
use sluice_core::{Fetcher, HttpError, HttpResult};
use std::time::Duration;
use tracing::debug;

/// Production fetcher using reqwest
pub struct ReqwestFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestFetcher {
    /// Create a fetcher with the default timeout
    pub fn new() -> HttpResult<Self> {
        Self::with_timeout(Duration::from_millis(FETCH_TIMEOUT_MS_DEFAULT))
    }

    /// Create with custom timeout
    pub fn with_timeout(timeout: Duration) -> HttpResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HttpError::RequestFailed {
                reason: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, timeout })
    }

    fn map_error(&self, e: reqwest::Error) -> HttpError {
        if e.is_timeout() {
            HttpError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else if e.is_connect() {
            HttpError::ConnectionFailed {
                reason: e.to_string(),
            }
        } else {
            HttpError::RequestFailed {
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, max_bytes: usize) -> HttpResult<Bytes> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(HttpError::InvalidUrl {
                url: url.to_string(),
            });
        }

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(length) = response.content_length() {
            if length > max_bytes as u64 {
                return Err(HttpError::ResponseTooLarge {
                    size: length,
                    max: max_bytes as u64,
                });
            }
        }

        // Content-Length may be absent or wrong, so enforce while streaming
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.map_error(e))? {
            if body.len() + chunk.len() > max_bytes {
                return Err(HttpError::ResponseTooLarge {
                    size: (body.len() + chunk.len()) as u64,
                    max: max_bytes as u64,
                });
            }
            body.extend_from_slice(&chunk);
        }

        debug!(url, bytes = body.len(), "Fetched resource");
        Ok(body.freeze())
    }
}
