//! Error taxonomy for the engine.
//!
//! Filter and risk rejections are ordinary values (see `FilterRejection` and
//! `RiskRejection`); the types here cover conditions that stop a unit of work.

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config value {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("unsupported config schema version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("config parse error: {0}")]
    Parse(String),

    #[error("config store is closed")]
    StoreClosed,
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Failures that cost one symbol its decision for the current cycle.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("market data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("execution failed during {operation}: {reason}")]
    ExecutionFailed { operation: String, reason: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
}

impl EngineError {
    pub fn data_unavailable(symbol: &str, reason: impl std::fmt::Display) -> Self {
        EngineError::DataUnavailable {
            symbol: symbol.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn execution(operation: &str, reason: impl std::fmt::Display) -> Self {
        EngineError::ExecutionFailed {
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::DataUnavailable { .. } => "data_unavailable",
            EngineError::ExecutionFailed { .. } => "execution_failed",
            EngineError::Timeout { .. } => "timeout",
        }
    }
}
