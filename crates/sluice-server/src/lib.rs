//! Sluice Server
//!
//! HTTP transport for the sluice execution server.
//!
//! # Routes
//!
//! - `/` (any method): run one execution with the body as parameters
//! - `GET /health`: 200 while healthy, 503 with the state name otherwise
//! - `GET /status`: JSON snapshot of health and queue
//! - `GET /metrics`: Prometheus text gauges
//!
//! Anything else answers 404.

pub mod api;
pub mod fetch;
pub mod transport;

pub use api::router;
pub use fetch::ReqwestFetcher;
pub use transport::HttpTransport;
