use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("selected probabilities sum to {sum} outside [0, 1] at state {state}")]
    NumericalInvariant { state: u32, sum: f32 },

    #[error("forward pass failed: {0}")]
    Forward(String),

    #[error("backoff chain for state {0} never reaches the wildcard root")]
    BackoffChainBroken(u32),
}

pub type Result<T> = std::result::Result<T, ConvertError>;
