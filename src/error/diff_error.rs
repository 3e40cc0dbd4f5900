use thiserror::Error;

/// Structurally invalid input handed to the diff engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiffError {
    #[error("Invalid diff path: {0}")]
    InvalidPath(String),
    #[error("Diff path '{0}' is not rooted at 'state'")]
    OutsideState(String),
    #[error("Diff path '{path}' traverses a non-mapping value at '{at}'")]
    NotAMapping { path: String, at: String },
    #[error("Diff operation at '{0}' would replace the whole state with a non-mapping value")]
    InvalidRootValue(String),
}
