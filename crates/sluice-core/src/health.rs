//! Process-wide health state
//!
//! Explicit state machine with clear transitions.
//!
//! ```text
//!                  mark_ready            mark_overloaded
//!   Initializing ─────────────► Healthy ◄───────────────► Overloaded
//!        │                         │       mark_recovered       │
//!        │        mark_crashed     ▼                            │
//!        └──────────────────────► Crashed ◄─────────────────────┘
//!
//!   mark_terminating: any state ─► Terminating
//! ```
//!
//! Crashed and Terminating are terminal: nothing leads back to Healthy or
//! Overloaded. Every transition is a single compare-and-swap, so readers and
//! writers never wait on each other.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::OnceLock;
use tracing::{debug, error, info, warn};

/// Health status of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HealthStatus {
    /// Backend runtime is being prepared; no traffic yet
    Initializing = 0,
    /// Accepting and executing work
    Healthy = 1,
    /// Queue is saturated; still draining internally
    Overloaded = 2,
    /// A backend fault left the runtime in an unknown state
    Crashed = 3,
    /// Shutdown in progress
    Terminating = 4,
}

impl HealthStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Initializing,
            1 => Self::Healthy,
            2 => Self::Overloaded,
            3 => Self::Crashed,
            _ => Self::Terminating,
        }
    }

    /// Returns a string representation of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Healthy => "healthy",
            Self::Overloaded => "overloaded",
            Self::Crashed => "crashed",
            Self::Terminating => "terminating",
        }
    }

    /// Check if no further transition to Healthy/Overloaded is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Crashed | Self::Terminating)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single source of truth for whether the process should accept work
///
/// Owned by the orchestrator; the queue and the consumer hold shared
/// references and drive transitions through the `mark_*` methods.
#[derive(Debug)]
pub struct HealthState {
    status: AtomicU8,
    crash_reason: OnceLock<String>,
    disposed: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state in `Initializing`
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(HealthStatus::Initializing as u8),
            crash_reason: OnceLock::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Current status
    pub fn status(&self) -> HealthStatus {
        HealthStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Reason recorded by the first effective `mark_crashed`
    pub fn crash_reason(&self) -> Option<&str> {
        self.crash_reason.get().map(String::as_str)
    }

    /// True only in `Healthy`
    ///
    /// Overloaded still drains internally but is reported unhealthy so
    /// external routing stops sending new traffic.
    pub fn is_healthy(&self) -> bool {
        !self.disposed.load(Ordering::Acquire) && self.status() == HealthStatus::Healthy
    }

    /// Enter `Initializing`; called once at process start
    ///
    /// Has no effect once a terminal state was reached.
    pub fn initialize(&self) {
        let mut current = self.status.load(Ordering::Acquire);
        loop {
            if HealthStatus::from_u8(current).is_terminal() {
                return;
            }
            match self.status.compare_exchange_weak(
                current,
                HealthStatus::Initializing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    debug!("Health state initializing");
                    return;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// `Initializing` → `Healthy`, after the initializer succeeded
    pub fn mark_ready(&self) -> bool {
        let changed = self.transition(HealthStatus::Initializing, HealthStatus::Healthy);
        if changed {
            info!("Sandbox ready, health state healthy");
        }
        changed
    }

    /// `Healthy` → `Overloaded`, driven by queue saturation
    pub fn mark_overloaded(&self) -> bool {
        let changed = self.transition(HealthStatus::Healthy, HealthStatus::Overloaded);
        if changed {
            warn!("Admission queue saturated, health state overloaded");
        }
        changed
    }

    /// `Overloaded` → `Healthy`, once the queue has room again
    pub fn mark_recovered(&self) -> bool {
        let changed = self.transition(HealthStatus::Overloaded, HealthStatus::Healthy);
        if changed {
            info!("Admission queue drained, health state healthy");
        }
        changed
    }

    /// Any non-terminal state → `Crashed`
    ///
    /// Idempotent: repeated calls, or calls after `Terminating`, are no-ops.
    pub fn mark_crashed(&self, reason: impl Into<String>) -> bool {
        let mut current = self.status.load(Ordering::Acquire);
        loop {
            if HealthStatus::from_u8(current).is_terminal() {
                return false;
            }
            match self.status.compare_exchange_weak(
                current,
                HealthStatus::Crashed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let reason = reason.into();
                    error!(reason = %reason, "Backend fault, health state crashed");
                    let _ = self.crash_reason.set(reason);
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Any state → `Terminating`
    pub fn mark_terminating(&self) -> bool {
        let previous = HealthStatus::from_u8(
            self.status
                .swap(HealthStatus::Terminating as u8, Ordering::AcqRel),
        );
        let changed = previous != HealthStatus::Terminating;
        if changed {
            info!(previous = %previous, "Health state terminating");
        }
        changed
    }

    /// Release the health state; later reads report unhealthy
    ///
    /// Returns true only for the call that performed the release.
    pub fn dispose(&self) -> bool {
        !self.disposed.swap(true, Ordering::AcqRel)
    }

    /// Check if `dispose` has run
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn transition(&self, from: HealthStatus, to: HealthStatus) -> bool {
        debug_assert!(!from.is_terminal(), "terminal states have no exits");
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_starts_initializing_and_unhealthy() {
        let health = HealthState::new();
        assert_eq!(health.status(), HealthStatus::Initializing);
        assert!(!health.is_healthy());
    }

    #[test]
    fn test_ready_only_from_initializing() {
        let health = HealthState::new();
        assert!(health.mark_ready());
        assert!(health.is_healthy());

        // second call is a no-op
        assert!(!health.mark_ready());
        assert_eq!(health.status(), HealthStatus::Healthy);
    }

    #[test]
    fn test_overload_oscillates() {
        let health = HealthState::new();
        health.mark_ready();

        for _ in 0..3 {
            assert!(health.mark_overloaded());
            assert!(!health.is_healthy());
            assert!(health.mark_recovered());
            assert!(health.is_healthy());
        }
    }

    #[test]
    fn test_overload_ignored_while_initializing() {
        let health = HealthState::new();
        assert!(!health.mark_overloaded());
        assert!(!health.mark_recovered());
        assert_eq!(health.status(), HealthStatus::Initializing);
    }

    #[test]
    fn test_crashed_is_terminal() {
        let health = HealthState::new();
        health.mark_ready();
        health.mark_overloaded();

        assert!(health.mark_crashed("segfault in backend"));
        assert_eq!(health.status(), HealthStatus::Crashed);

        assert!(!health.mark_recovered());
        assert!(!health.mark_ready());
        assert!(!health.mark_overloaded());
        assert!(!health.is_healthy());
        assert_eq!(health.status(), HealthStatus::Crashed);
    }

    #[test]
    fn test_crash_is_idempotent_and_keeps_first_reason() {
        let health = HealthState::new();
        health.mark_ready();

        assert!(health.mark_crashed("first"));
        assert!(!health.mark_crashed("second"));
        assert_eq!(health.crash_reason(), Some("first"));
    }

    #[test]
    fn test_initialize_does_not_leave_terminal_state() {
        let health = HealthState::new();
        health.mark_crashed("boom");
        health.initialize();
        assert_eq!(health.status(), HealthStatus::Crashed);
    }

    #[test]
    fn test_terminating_from_any_state() {
        let health = HealthState::new();
        health.mark_ready();
        health.mark_crashed("boom");

        assert!(health.mark_terminating());
        assert_eq!(health.status(), HealthStatus::Terminating);
        assert!(!health.mark_terminating());

        // no crash after terminating
        assert!(!health.mark_crashed("late"));
        assert!(!health.mark_recovered());
        assert_eq!(health.status(), HealthStatus::Terminating);
    }

    #[test]
    fn test_dispose_once() {
        let health = HealthState::new();
        health.mark_ready();

        assert!(health.dispose());
        assert!(!health.dispose());
        assert!(health.is_disposed());
        assert!(!health.is_healthy());
    }

    #[test]
    fn test_concurrent_crash_and_recover_never_resurrects() {
        let health = Arc::new(HealthState::new());
        health.mark_ready();

        let mut threads = Vec::new();
        for i in 0..8 {
            let health = health.clone();
            threads.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    if i == 0 {
                        health.mark_crashed("fault");
                    }
                    health.mark_overloaded();
                    health.mark_recovered();
                }
            }));
        }
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(health.status(), HealthStatus::Crashed);
        assert!(!health.is_healthy());
    }
}
