use thiserror::Error;

/// Errors raised by the numeric kernels.
#[derive(Error, Debug, PartialEq)]
pub enum MathError {
    /// Two operands were given incompatible shapes.
    #[error("dimension mismatch: {context} (lhs {lhs_rows}x{lhs_cols}, rhs {rhs_rows}x{rhs_cols})")]
    DimMismatch {
        context: String,
        lhs_rows: usize,
        lhs_cols: usize,
        rhs_rows: usize,
        rhs_cols: usize,
    },

    /// A sparse matrix was built from inconsistent index/value arrays.
    #[error("invalid sparse format: {0}")]
    InvalidSparseFormat(String),
}

impl MathError {
    pub fn dim_mismatch(
        context: impl Into<String>,
        lhs: (usize, usize),
        rhs: (usize, usize),
    ) -> Self {
        Self::DimMismatch {
            context: context.into(),
            lhs_rows: lhs.0,
            lhs_cols: lhs.1,
            rhs_rows: rhs.0,
            rhs_cols: rhs.1,
        }
    }

    pub fn invalid_sparse(msg: impl Into<String>) -> Self {
        Self::InvalidSparseFormat(msg.into())
    }
}
