use crate::error::MathError;
use crate::Result;

/// Row stride is always padded to a multiple of this many `f32` elements
/// (32 bytes) so each row starts on a vector-friendly boundary.
const ALIGN_ELEMS: usize = 8;

fn padded_stride(cols: usize) -> usize {
    if cols == 0 {
        return 0;
    }
    (cols + ALIGN_ELEMS - 1) / ALIGN_ELEMS * ALIGN_ELEMS
}

/// Whether an operand of [`gemm`] should be used as-is or transposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transpose {
    No,
    Yes,
}

/// A dense, row-major matrix with an aligned row stride.
///
/// Storage is `rows * stride` elements; the trailing `stride - cols`
/// elements of each row are padding and never observed through the public
/// API.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    stride: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// Builds a matrix of the given shape, all cells zeroed.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        let stride = padded_stride(cols);
        Self {
            rows,
            cols,
            stride,
            data: vec![0.0; rows * stride],
        }
    }

    /// Builds a matrix from row-major data with no padding; `data.len()`
    /// must equal `rows * cols`.
    pub fn from_rows(rows: usize, cols: usize, data: &[f32]) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(MathError::dim_mismatch(
                "Matrix::from_rows",
                (rows, cols),
                (data.len() / cols.max(1), cols),
            ));
        }
        let mut m = Matrix::zeros(rows, cols);
        for r in 0..rows {
            m.row_mut(r).copy_from_slice(&data[r * cols..(r + 1) * cols]);
        }
        Ok(m)
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Matrix::zeros(n, n);
        for i in 0..n {
            m.set(i, i, 1.0);
        }
        m
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, r: usize, c: usize) -> f32 {
        self.data[r * self.stride + c]
    }

    #[inline]
    pub fn set(&mut self, r: usize, c: usize, v: f32) {
        self.data[r * self.stride + c] = v;
    }

    #[inline]
    pub fn row(&self, r: usize) -> &[f32] {
        &self.data[r * self.stride..r * self.stride + self.cols]
    }

    #[inline]
    pub fn row_mut(&mut self, r: usize) -> &mut [f32] {
        let start = r * self.stride;
        &mut self.data[start..start + self.cols]
    }

    /// Dense contiguous copy in row-major order (padding stripped).
    pub fn to_dense_vec(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.rows * self.cols);
        for r in 0..self.rows {
            out.extend_from_slice(self.row(r));
        }
        out
    }

    /// Grows or shrinks in place, reallocating storage. `init` fills any
    /// newly exposed cell; when `None`, cells that already existed at the
    /// same (row, col) keep their value and new cells are zeroed.
    pub fn resize(&mut self, rows: usize, cols: usize, init: Option<f32>) {
        let stride = padded_stride(cols);
        let mut data = vec![init.unwrap_or(0.0); rows * stride];
        let copy_rows = rows.min(self.rows);
        let copy_cols = cols.min(self.cols);
        for r in 0..copy_rows {
            let src = &self.row(r)[..copy_cols];
            data[r * stride..r * stride + copy_cols].copy_from_slice(src);
        }
        self.rows = rows;
        self.cols = cols;
        self.stride = stride;
        self.data = data;
    }

    /// A read-only, non-owning view onto a contiguous row range.
    pub fn submatrix(&self, row_start: usize, row_count: usize) -> Result<MatrixView<'_>> {
        if row_start + row_count > self.rows {
            return Err(MathError::dim_mismatch(
                "Matrix::submatrix",
                (self.rows, self.cols),
                (row_start + row_count, self.cols),
            ));
        }
        Ok(MatrixView {
            cols: self.cols,
            stride: self.stride,
            data: &self.data[row_start * self.stride..(row_start + row_count) * self.stride],
        })
    }

    /// In-place sigmoid over every live cell.
    pub fn sigmoid_inplace(&mut self) {
        for r in 0..self.rows {
            for v in self.row_mut(r) {
                *v = 1.0 / (1.0 + (-*v).exp());
            }
        }
    }

    /// Row-wise softmax in place: subtracts the row max, clips to ±50
    /// before exponentiating, then normalizes by the row sum.
    pub fn softmax_rows_inplace(&mut self) {
        for r in 0..self.rows {
            let row = self.row_mut(r);
            let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0f32;
            for v in row.iter_mut() {
                let shifted = (*v - max).clamp(-50.0, 50.0);
                *v = shifted.exp();
                sum += *v;
            }
            if sum > 0.0 {
                for v in row.iter_mut() {
                    *v /= sum;
                }
            }
        }
    }

    pub fn add_scaled(&mut self, alpha: f32, other: &Matrix) -> Result<()> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err(MathError::dim_mismatch(
                "Matrix::add_scaled",
                (self.rows, self.cols),
                (other.rows, other.cols),
            ));
        }
        for r in 0..self.rows {
            let (dst, src) = (self.row_mut(r), other.row(r));
            for (d, s) in dst.iter_mut().zip(src) {
                *d += alpha * s;
            }
        }
        Ok(())
    }

    pub fn hadamard_inplace(&mut self, other: &Matrix) -> Result<()> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err(MathError::dim_mismatch(
                "Matrix::hadamard_inplace",
                (self.rows, self.cols),
                (other.rows, other.cols),
            ));
        }
        for r in 0..self.rows {
            let (dst, src) = (self.row_mut(r), other.row(r));
            for (d, s) in dst.iter_mut().zip(src) {
                *d *= s;
            }
        }
        Ok(())
    }

    pub fn scale_inplace(&mut self, alpha: f32) {
        for r in 0..self.rows {
            for v in self.row_mut(r) {
                *v *= alpha;
            }
        }
    }
}

/// A read-only, non-owning view over a contiguous row range of a [`Matrix`].
#[derive(Debug, Clone, Copy)]
pub struct MatrixView<'a> {
    cols: usize,
    stride: usize,
    data: &'a [f32],
}

impl<'a> MatrixView<'a> {
    pub fn rows(&self) -> usize {
        self.data.len() / self.stride.max(1)
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, r: usize) -> &[f32] {
        &self.data[r * self.stride..r * self.stride + self.cols]
    }
}

fn dims(trans: Transpose, rows: usize, cols: usize) -> (usize, usize) {
    match trans {
        Transpose::No => (rows, cols),
        Transpose::Yes => (cols, rows),
    }
}

/// `c ← alpha * op(a) * op(b) + beta * c`.
pub fn gemm(
    alpha: f32,
    a: &Matrix,
    trans_a: Transpose,
    b: &Matrix,
    trans_b: Transpose,
    beta: f32,
    c: &mut Matrix,
) -> Result<()> {
    let (a_rows, a_cols) = dims(trans_a, a.rows(), a.cols());
    let (b_rows, b_cols) = dims(trans_b, b.rows(), b.cols());
    if a_cols != b_rows {
        return Err(MathError::dim_mismatch("gemm: a * b", (a_rows, a_cols), (b_rows, b_cols)));
    }
    if c.rows() != a_rows || c.cols() != b_cols {
        return Err(MathError::dim_mismatch("gemm: output shape", (c.rows(), c.cols()), (a_rows, b_cols)));
    }

    let a_at = |i: usize, k: usize| match trans_a {
        Transpose::No => a.get(i, k),
        Transpose::Yes => a.get(k, i),
    };
    let b_at = |k: usize, j: usize| match trans_b {
        Transpose::No => b.get(k, j),
        Transpose::Yes => b.get(j, k),
    };

    for i in 0..a_rows {
        for j in 0..b_cols {
            let mut acc = 0.0f32;
            for k in 0..a_cols {
                acc += a_at(i, k) * b_at(k, j);
            }
            let prev = c.get(i, j);
            c.set(i, j, alpha * acc + beta * prev);
        }
    }
    Ok(())
}

/// `vec ← alpha * colsum(mat) + beta * vec`.
pub fn colsum_into(alpha: f32, mat: &Matrix, beta: f32, vec: &mut [f32]) -> Result<()> {
    if vec.len() != mat.cols() {
        return Err(MathError::dim_mismatch(
            "colsum_into",
            (1, vec.len()),
            (1, mat.cols()),
        ));
    }
    for (c, slot) in vec.iter_mut().enumerate() {
        let mut sum = 0.0f32;
        for r in 0..mat.rows() {
            sum += mat.get(r, c);
        }
        *slot = alpha * sum + beta * *slot;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_preserves_overlap() {
        let mut m = Matrix::from_rows(2, 2, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        m.resize(3, 3, Some(0.0));
        assert_eq!(m.get(0, 0), 1.0);
        assert_eq!(m.get(1, 1), 4.0);
        assert_eq!(m.get(2, 2), 0.0);
    }

    #[test]
    fn softmax_rows_sum_to_one_and_shift_invariant() {
        let mut a = Matrix::from_rows(1, 3, &[1.0, 2.0, 3.0]).unwrap();
        let mut b = Matrix::from_rows(1, 3, &[101.0, 102.0, 103.0]).unwrap();
        a.softmax_rows_inplace();
        b.softmax_rows_inplace();
        let sum_a: f32 = a.row(0).iter().sum();
        assert!((sum_a - 1.0).abs() < 1e-6);
        for (x, y) in a.row(0).iter().zip(b.row(0)) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn gemm_matches_hand_computation() {
        let a = Matrix::from_rows(2, 2, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let b = Matrix::from_rows(2, 2, &[5.0, 6.0, 7.0, 8.0]).unwrap();
        let mut c = Matrix::zeros(2, 2);
        gemm(1.0, &a, Transpose::No, &b, Transpose::No, 0.0, &mut c).unwrap();
        assert_eq!(c.to_dense_vec(), vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn gemm_dim_mismatch_errors() {
        let a = Matrix::zeros(2, 3);
        let b = Matrix::zeros(2, 2);
        let mut c = Matrix::zeros(2, 2);
        assert!(gemm(1.0, &a, Transpose::No, &b, Transpose::No, 0.0, &mut c).is_err());
    }

    #[test]
    fn submatrix_is_read_only_view() {
        let m = Matrix::from_rows(3, 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let v = m.submatrix(1, 2).unwrap();
        assert_eq!(v.row(0), &[3.0, 4.0]);
        assert_eq!(v.row(1), &[5.0, 6.0]);
    }
}
