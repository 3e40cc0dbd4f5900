//! Structural snapshot diffing.
//!
//! - [`compute_diff`]: delta between two snapshots' state.
//! - [`apply_diff`]: replay a delta onto a copy of a snapshot.
//! - [`diff_stages`]: compare the snapshots of two stages in one trace.

pub mod engine;
pub mod path;
pub mod types;

pub use engine::{apply_diff, compute_diff, diff_stages, diff_states};
pub use types::{Diff, DiffOperation};
