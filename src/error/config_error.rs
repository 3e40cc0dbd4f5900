//! Configuration errors raised while building managers or loading config text.

use thiserror::Error;

/// Invalid options detected at construction time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid gate timeout: {0}ms (must be greater than zero)")]
    InvalidTimeout(u64),
    #[error("Invalid capacity for {component}: {value} (must be greater than zero)")]
    InvalidCapacity { component: String, value: usize },
    #[error("Invalid TTL: {0}ms (must be greater than zero)")]
    InvalidTtl(u64),
    #[error("Invalid sweep interval: {0}ms (must be greater than zero)")]
    InvalidSweepInterval(u64),
    #[error("Config parse error: {0}")]
    ParseError(String),
    #[error("Config read error: {0}")]
    ReadError(String),
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        assert_eq!(
            ConfigError::InvalidTimeout(0).to_string(),
            "Invalid gate timeout: 0ms (must be greater than zero)"
        );
        assert_eq!(
            ConfigError::InvalidCapacity {
                component: "storage".into(),
                value: 0
            }
            .to_string(),
            "Invalid capacity for storage: 0 (must be greater than zero)"
        );
        assert_eq!(
            ConfigError::ParseError("bad".into()).to_string(),
            "Config parse error: bad"
        );
    }
}
