//! Sluice Core
//!
//! Core types, errors, and constants for the sluice execution server.
//!
//! # Overview
//!
//! Sluice runs untrusted backend code inside a managed sandbox runtime. It
//! admits requests into a bounded queue, executes them strictly one at a time,
//! and reports its own health so an external supervisor can route around it
//! when it is saturated or broken.
//!
//! This crate holds the pieces every other crate leans on:
//! - the error taxonomy ([`Error`])
//! - explicit limits ([`constants`])
//! - configuration ([`SluiceConfig`])
//! - the process-wide health state machine ([`HealthState`])
//! - the fetch collaborator used during initialization ([`http::Fetcher`])
//! - tracing bootstrap ([`init_telemetry`])

pub mod config;
pub mod constants;
pub mod error;
pub mod health;
pub mod http;
pub mod telemetry;

pub use config::{InitializationMode, SluiceConfig};
pub use constants::*;
pub use error::{Error, Result};
pub use health::{HealthState, HealthStatus};
pub use http::{Fetcher, HttpError, HttpResult, MemoryFetcher};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
