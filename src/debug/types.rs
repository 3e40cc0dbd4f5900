use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::condition::GateCondition;

/// Lifecycle of a [`Gate`].
///
/// `Triggered` means at least one caller is currently held. Once the last
/// waiter leaves (release or timeout) the gate is `Released` and no longer
/// matches new checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Active,
    Triggered,
    Released,
}

/// A conditional checkpoint for one (trace, stage) pair.
#[derive(Debug, Clone)]
pub struct Gate {
    pub id: String,
    pub trace_id: String,
    pub stage: String,
    pub condition: Option<GateCondition>,
    /// Per-gate override of the manager's default timeout.
    pub timeout: Option<Duration>,
    pub status: GateStatus,
    pub created_at: i64,
    pub triggered_at: Option<i64>,
    pub released_at: Option<i64>,
    /// Number of checks that suspended on this gate.
    pub hit_count: u64,
    pub(crate) waiting: usize,
}

impl Gate {
    /// Callers currently suspended on this gate.
    pub fn waiting(&self) -> usize {
        self.waiting
    }

    pub fn is_open(&self) -> bool {
        self.status != GateStatus::Released
    }

    pub(crate) fn matches(&self, trace_id: &str, stage: &str) -> bool {
        self.is_open() && self.trace_id == trace_id && self.stage == stage
    }
}

#[derive(Debug, Clone, Default)]
pub struct GateOptions {
    pub condition: Option<GateCondition>,
    pub timeout: Option<Duration>,
}

impl GateOptions {
    pub fn condition(mut self, condition: GateCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// How a `check_gate` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateOutcome {
    /// No suspension: manager disabled, no open gate, or condition false.
    Passed,
    /// Suspended, then let go by `release_gate`, `remove_gate` or `clear`.
    Released,
    /// Suspended until the gate's timeout elapsed.
    TimedOut,
}

impl GateOutcome {
    pub fn was_suspended(&self) -> bool {
        !matches!(self, GateOutcome::Passed)
    }
}
