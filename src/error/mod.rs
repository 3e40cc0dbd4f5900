//! Error types for the debugging and tracing core.
//!
//! - [`ConfigError`]: Invalid options, raised once at construction or config load.
//! - [`ConditionError`]: Malformed or faulting gate conditions. Swallowed by the
//!   gate manager and logged.
//! - [`DiffError`]: Structurally invalid diffs handed to [`apply_diff`](crate::diff::apply_diff).
//!
//! Lookup misses (unknown gate or trace ids) are not errors; they surface as
//! `None` or `false`.

pub mod condition_error;
pub mod config_error;
pub mod diff_error;

pub use condition_error::ConditionError;
pub use config_error::ConfigError;
pub use diff_error::DiffError;

/// Convenience alias for construction and config-loading results.
pub type ConfigResult<T> = Result<T, ConfigError>;
/// Convenience alias for diff application results.
pub type DiffResult<T> = Result<T, DiffError>;
