use thiserror::Error;

/// Failures while parsing or evaluating a gate condition.
///
/// These never escape [`DebugGateManager::check_gate`](crate::debug::DebugGateManager::check_gate);
/// the manager logs them and treats the condition as not holding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConditionError {
    #[error("Empty condition expression")]
    Empty,
    #[error("Unexpected token '{token}' at offset {offset}")]
    UnexpectedToken { token: String, offset: usize },
    #[error("Unexpected end of condition expression")]
    UnexpectedEnd,
    #[error("Unknown comparison operator: {0}")]
    UnknownOperator(String),
    #[error("Invalid literal: {0}")]
    InvalidLiteral(String),
    #[error("Unterminated string literal starting at offset {0}")]
    UnterminatedString(usize),
    #[error("Condition nests deeper than {0} levels")]
    TooDeep(usize),
    #[error("Condition predicate panicked")]
    PredicatePanicked,
}
