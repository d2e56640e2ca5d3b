//! Error handling for the `lm` CLI.

use thiserror::Error;

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// CLI-specific errors. Every crate in the workspace surfaces through one
/// of these variants so `main` has a single place to format and exit on.
#[derive(Error, Debug)]
pub enum CliError {
    /// Vocabulary/tree/component-graph error.
    #[error("core error: {0}")]
    Core(#[from] lm_core::CoreError),

    /// Dense/sparse math error.
    #[error("math error: {0}")]
    Math(#[from] lm_math::MathError),

    /// Topology grammar error.
    #[error("topology error: {0}")]
    Ir(#[from] lm_ir::IrError),

    /// Topology lowering error.
    #[error("compiler error: {0}")]
    Compiler(#[from] lm_compiler::CompilerError),

    /// Persistence layer error.
    #[error("storage error: {0}")]
    Storage(#[from] lm_storage::StorageError),

    /// Training/eval/generation runtime error.
    #[error("runtime error: {0}")]
    Runtime(#[from] lm_runtime::RuntimeError),

    /// WFST conversion error.
    #[error("converter error: {0}")]
    Convert(#[from] lm_convert::ConvertError),

    /// Configuration error (missing/malformed config file).
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file deserialization error.
    #[error("config parse error: {0}")]
    Serde(#[from] toml::de::Error),

    /// Catch-all for errors outside the workspace's own crates.
    #[error("{0}")]
    Generic(#[from] anyhow::Error),

    /// The run was cancelled (e.g. Ctrl-C during training).
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid command arguments that clap's own parsing doesn't catch.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// A required file or resource was missing.
    #[error("missing resource: {0}")]
    MissingResource(String),
}

impl CliError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid-arguments error.
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::InvalidArgs(msg.into())
    }

    /// Create a missing-resource error.
    pub fn missing_resource(msg: impl Into<String>) -> Self {
        Self::MissingResource(msg.into())
    }
}
