//! Error types for MACULA.

use thiserror::Error;

/// Unified error type for all MACULA operations.
///
/// Provides structured, actionable error messages with context.
#[derive(Error, Debug)]
pub enum MaculaError {
    /// Protocol specification errors, tied to the offending field.
    ///
    /// These always fire at load time; a protocol that validates never
    /// produces one mid-simulation.
    #[error("Protocol error in '{field}': {message}")]
    Protocol { field: String, message: String },

    /// Run configuration errors (population size, horizon, engine choice).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sampling errors (degenerate distribution, zero-mass transition row).
    ///
    /// Fatal and never retried: a sampling failure indicates a configuration
    /// defect, not a transient condition.
    #[error("Sampling error: {0}")]
    Sampling(String),

    /// Simulation invariant violations (a patient re-entering NAIVE, a
    /// double-evaluated discontinuation). These indicate programming errors;
    /// the engine also asserts on them directly.
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// I/O errors (protocol reading, result writing).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML protocol parsing errors.
    #[error("Protocol parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// CSV output errors.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl MaculaError {
    /// Creates a protocol error for a named field.
    pub fn protocol(field: impl Into<String>, message: impl Into<String>) -> Self {
        MaculaError::Protocol {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a run-configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        MaculaError::Config(message.into())
    }

    /// Creates a sampling error.
    pub fn sampling(message: impl Into<String>) -> Self {
        MaculaError::Sampling(message.into())
    }

    /// Creates an invariant-violation error.
    pub fn invariant(message: impl Into<String>) -> Self {
        MaculaError::Invariant(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_names_field() {
        let err = MaculaError::protocol("disease_transitions.stable", "row sums to 0.97");
        let msg = err.to_string();
        assert!(msg.contains("disease_transitions.stable"));
        assert!(msg.contains("0.97"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: MaculaError = io.into();
        assert!(matches!(err, MaculaError::Io(_)));
    }
}
