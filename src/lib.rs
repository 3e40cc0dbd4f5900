//! # Timegate: Time-Travel Debugging Core
//!
//! `timegate` records and controls request execution inside a server pipeline
//! for after-the-fact inspection. It provides:
//!
//! - **Debug gates**: conditional checkpoints keyed by trace and stage that
//!   suspend an in-flight request until released or timed out.
//! - **Trace collection**: per-request stage trees with state snapshots,
//!   captured as the pipeline crosses its stage boundaries.
//! - **Snapshot diffs**: structural add/remove/replace diffs between two state
//!   snapshots, and their application back onto a snapshot.
//! - **Trace storage**: a bounded, expiring archive of finished traces with
//!   filtering, body truncation and a background sweep.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use timegate::{DebugRuntime, RequestDescriptor, ResponseDescriptor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let runtime = DebugRuntime::builder().sweeper(true).build().unwrap();
//!     runtime.begin_request(RequestDescriptor::new("GET", "/users/1"), "trace-1");
//!     runtime.enter_stage("trace-1", "handler", None, None).await;
//!     runtime.exit_stage("trace-1");
//!     let trace = runtime.finish_request("trace-1", Some(ResponseDescriptor::new(200)), None);
//!     println!("{:?}", trace.map(|t| t.status));
//! }
//! ```

pub mod api;
pub mod config;
pub mod core;
pub mod debug;
pub mod diff;
pub mod error;
pub mod trace;

pub use crate::api::{DebugRuntime, DebugRuntimeBuilder};
pub use crate::config::{
    CollectorConfig, ConfigFormat, DebugRuntimeConfig, GateManagerConfig, StorageConfig,
};
pub use crate::core::{
    EventBus, EventReceiver, FakeIdGenerator, FakeTimeProvider, GateEvent, IdGenerator,
    RealIdGenerator, RealTimeProvider, RuntimeContext, TimeProvider,
};
pub use crate::debug::{
    ComparisonOperator, ContextMap, DebugGateManager, Gate, GateCondition, GateOptions,
    GateOutcome, GateStatus,
};
pub use crate::diff::{apply_diff, compute_diff, diff_stages, diff_states, Diff, DiffOperation};
pub use crate::error::{ConditionError, ConfigError, ConfigResult, DiffError, DiffResult};
pub use crate::trace::{
    LocalContext, RequestDescriptor, RequestTrace, ResponseDescriptor, SnapshotToken,
    StorageStats, TraceCollector, TraceError, TraceFilter, TraceStage, TraceStatus, TraceStorage,
};
