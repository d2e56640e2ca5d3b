//! Error types for the training/eval/generation runtime.

use thiserror::Error;

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur while training, evaluating or generating from a model.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Core data-model error (vocabulary, tree, component graph).
    #[error("core error: {source}")]
    Core {
        #[from]
        /// Source core error
        source: lm_core::CoreError,
    },

    /// Dense/sparse math error (shape mismatch, bad sparse coordinate).
    #[error("math error: {source}")]
    Math {
        #[from]
        /// Source math error
        source: lm_math::MathError,
    },

    /// Persistence-layer error.
    #[error("storage error: {source}")]
    Storage {
        #[from]
        /// Source storage error
        source: lm_storage::StorageError,
    },

    /// Topology compilation error, surfaced when a driver builds a
    /// component graph from topology text.
    #[error("compiler error: {source}")]
    Compiler {
        #[from]
        /// Source compiler error
        source: lm_compiler::CompilerError,
    },

    /// Invalid runtime configuration (e.g. a `Gen`-mode component that
    /// reads future context, or a zero-sized worker pool).
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Reason for invalid configuration
        reason: String,
    },

    /// Raised in place of an in-flight operation's original error once the
    /// shared cancellation flag (§5) has been set, so the driver reports one
    /// coherent cause instead of a race of partial failures.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid parameter value (learning rate, momentum, mini-batch size...).
    #[error("invalid parameter {parameter}: {value} (expected {constraint})")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// A weight-update or forward/backward shape did not match its glue.
    #[error("dimension mismatch in {op}: expected {expected}, got {actual}")]
    DimMismatch {
        /// Operation the mismatch occurred in
        op: String,
        /// Expected shape description
        expected: String,
        /// Actual shape description
        actual: String,
    },

    /// A sparse update carried an out-of-range or malformed coordinate.
    #[error("invalid sparse update format: {reason}")]
    InvalidFormat {
        /// Reason the sparse format was rejected
        reason: String,
    },

    /// The input reader's background thread failed.
    #[error("reader error: {reason}")]
    ReaderError {
        /// Reason the reader failed
        reason: String,
    },

    /// Numerical computation produced a non-finite or out-of-range value.
    #[error("numerical error: {reason}")]
    NumericalInvariant {
        /// Reason for numerical error
        reason: String,
    },
}

impl RuntimeError {
    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration { reason: reason.into() }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(
        parameter: impl Into<String>,
        value: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.into(),
            constraint: constraint.into(),
        }
    }

    /// Create a dimension-mismatch error
    pub fn dim_mismatch(op: impl Into<String>, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::DimMismatch { op: op.into(), expected: expected.into(), actual: actual.into() }
    }

    /// Create an invalid sparse-format error
    pub fn invalid_format(reason: impl Into<String>) -> Self {
        Self::InvalidFormat { reason: reason.into() }
    }

    /// Create a reader error
    pub fn reader_error(reason: impl Into<String>) -> Self {
        Self::ReaderError { reason: reason.into() }
    }

    /// Create a numerical error
    pub fn numerical_invariant(reason: impl Into<String>) -> Self {
        Self::NumericalInvariant { reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_constructs_matching_variant() {
        let err = RuntimeError::invalid_config("gen mode component reads future context");
        assert!(matches!(err, RuntimeError::InvalidConfiguration { .. }));
    }

    #[test]
    fn invalid_parameter_display_includes_all_fields() {
        let err = RuntimeError::invalid_parameter("learning_rate", "-1.0", "> 0.0");
        let msg = format!("{err}");
        assert!(msg.contains("learning_rate"));
        assert!(msg.contains("-1.0"));
        assert!(msg.contains("> 0.0"));
    }
}
