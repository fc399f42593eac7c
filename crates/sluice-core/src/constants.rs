//! Explicit limits for sluice
//!
//! All limits use big-endian naming (most significant first) and include
//! units in the name.

// =============================================================================
// Admission Limits
// =============================================================================

/// Default number of requests the admission queue buffers
pub const QUEUE_CAPACITY_COUNT_DEFAULT: usize = 20;

/// Maximum configurable admission queue capacity
pub const QUEUE_CAPACITY_COUNT_MAX: usize = 10_000;

/// Maximum size of an execution parameters body in bytes (10 MB)
pub const PARAMETERS_SIZE_BYTES_MAX: usize = 10 * 1024 * 1024;

// =============================================================================
// Execution Limits
// =============================================================================

/// Default timeout for a single backend execution in milliseconds (30 sec)
pub const EXECUTION_TIMEOUT_MS_DEFAULT: u64 = 30 * 1000;

/// Maximum timeout for a single backend execution in milliseconds (10 min)
pub const EXECUTION_TIMEOUT_MS_MAX: u64 = 10 * 60 * 1000;

/// Maximum size of an execution result in bytes (10 MB)
pub const RESULT_SIZE_BYTES_MAX: usize = 10 * 1024 * 1024;

// =============================================================================
// Initialization Limits
// =============================================================================

/// Maximum size of an initialization recipe document in bytes (1 MB)
pub const RECIPE_SIZE_BYTES_MAX: usize = 1024 * 1024;

/// Maximum number of files a recipe may install
pub const BUNDLE_FILES_COUNT_MAX: usize = 4096;

/// Maximum size of a single bundle file in bytes (256 MB)
pub const BUNDLE_FILE_SIZE_BYTES_MAX: usize = 256 * 1024 * 1024;

/// Maximum total size of all bundle files, held in memory until installed (512 MB)
pub const BUNDLE_SIZE_BYTES_MAX: usize = 512 * 1024 * 1024;

/// Default timeout for a single fetch during initialization (60 sec)
pub const FETCH_TIMEOUT_MS_DEFAULT: u64 = 60 * 1000;

// =============================================================================
// Server Defaults
// =============================================================================

/// Default bind address of the HTTP transport
pub const SERVER_BIND_ADDRESS_DEFAULT: &str = "0.0.0.0:8080";

// Compile-time assertions for constant validity
const _: () = {
    assert!(QUEUE_CAPACITY_COUNT_DEFAULT >= 1);
    assert!(QUEUE_CAPACITY_COUNT_DEFAULT <= QUEUE_CAPACITY_COUNT_MAX);
    assert!(EXECUTION_TIMEOUT_MS_DEFAULT <= EXECUTION_TIMEOUT_MS_MAX);
    assert!(RECIPE_SIZE_BYTES_MAX <= BUNDLE_FILE_SIZE_BYTES_MAX);
    assert!(BUNDLE_FILE_SIZE_BYTES_MAX <= BUNDLE_SIZE_BYTES_MAX);
};
