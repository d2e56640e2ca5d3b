use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("checksum mismatch reading {what}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch { what: String, expected: u32, actual: u32 },

    #[error("unsupported file version {found} (supported range is {min}..={max})")]
    UnsupportedVersion { found: u32, min: u32, max: u32 },

    #[error(transparent)]
    Topology(#[from] lm_core::CoreError),

    #[error(transparent)]
    Numeric(#[from] lm_math::MathError),

    #[error("duplicate component {0:?} while merging models")]
    DuplicateComponent(String),
}

impl StorageError {
    pub fn invalid_format(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
