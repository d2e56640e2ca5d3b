use thiserror::Error;

/// Errors raised while building or walking the vocabulary / tree /
/// component-graph data model.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    #[error(transparent)]
    DimMismatch(#[from] lm_math::MathError),

    #[error("unknown word id {0}")]
    UnknownId(u32),

    #[error("unknown word {0:?}")]
    UnknownWord(String),
}

impl CoreError {
    pub fn invalid_topology(msg: impl Into<String>) -> Self {
        Self::InvalidTopology(msg.into())
    }
}
