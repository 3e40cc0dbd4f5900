//! Request traces: the live collector and the expiring archive.

pub mod collector;
pub mod storage;
pub mod types;

pub use collector::TraceCollector;
pub use storage::{
    StorageStats, StoredTrace, TraceFilter, TraceStorage, MAX_BODY_CHARS, TRUNCATION_MARKER,
};
pub use types::{
    LocalContext, RequestDescriptor, RequestTrace, ResponseDescriptor, SnapshotToken, TraceError,
    TraceStage, TraceStatus,
};
