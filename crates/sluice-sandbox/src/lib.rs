//! Sandbox execution collaborators for sluice
//!
//! A [`Backend`] encapsulates one backend runtime instance whose internal
//! state is not safe for concurrent invocation. Every method takes
//! `&mut self`, so whoever owns the backend is the only one who can drive it.
//!
//! # Backend Types
//!
//! - **ProcessBackend**: runs the installed entrypoint as an OS process per execution
//! - **MockBackend**: scripted in-memory backend for tests and dummy runs

mod bundle;
mod error;
mod mock;
mod process;
mod traits;

pub use bundle::{Bundle, BundleFile};
pub use error::{SandboxError, SandboxResult};
pub use mock::{MockBackend, MockBackendProbe, MockHandler};
pub use process::{ProcessBackend, ProcessBackendConfig};
pub use traits::Backend;
