//! Debug gates: conditional checkpoints that pause a request at a named stage.

pub mod condition;
pub mod gate;
pub mod types;

pub use condition::{ComparisonOperator, ContextMap, ContextPredicate, GateCondition};
pub use gate::DebugGateManager;
pub use types::{Gate, GateOptions, GateOutcome, GateStatus};
