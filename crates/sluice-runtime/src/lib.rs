//! Sluice Runtime
//!
//! Admission, serialized execution, and lifecycle sequencing.
//!
//! # Overview
//!
//! The runtime provides:
//! - A bounded FIFO admission queue that never blocks producers
//! - A single request consumer, the only caller of the backend
//! - A one-shot initializer that installs the backend bundle
//! - An orchestrator that sequences startup and shutdown
//!
//! The transport is kept out of this crate; it receives a [`Gateway`] to
//! admit requests and read health.

pub mod consumer;
pub mod initializer;
pub mod orchestrator;
pub mod queue;
pub mod request;
pub mod transport;

pub use consumer::{ConsumerStats, RequestConsumer};
pub use initializer::{Initializer, Recipe, RecipeFile};
pub use orchestrator::Orchestrator;
pub use queue::{AdmissionQueue, Admitted, RejectReason, Rejected};
pub use request::{ExecutionRequest, ExecutionResponse, PendingResponse, ResponseStatus};
pub use transport::{Gateway, Transport};
