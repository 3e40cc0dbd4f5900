//! Public API layer: the pipeline-facing entry point.
//!
//! [`DebugRuntime`] wires the gate manager, trace collector and trace storage
//! together so a request pipeline only has to call it at stage boundaries.

mod runtime;

pub use runtime::{DebugRuntime, DebugRuntimeBuilder};
