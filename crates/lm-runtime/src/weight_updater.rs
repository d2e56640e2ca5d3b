//! Per-weight update paths (C5, §4.5): full/segment/part/one-shot, with
//! momentum, L2 and an optional periodically-synchronized shared copy.

use lm_core::weight::Weight;
use lm_math::{colsum_into, gemm, Coo, Csc, Matrix, Transpose};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::error::{Result, RuntimeError};

/// Learning-rate / regularization parameters shared by every update path.
#[derive(Debug, Clone, Copy)]
pub struct UpdateParams {
    /// Base learning rate η.
    pub learning_rate: f32,
    /// L2 penalty λ, applied every `l2_gap` steps.
    pub l2: f32,
    /// Momentum coefficient μ.
    pub momentum: f32,
    /// Apply L2 every this many steps (`1` = every step).
    pub l2_gap: u32,
    /// Replace the shared weight copy every this many steps (`0` disables it).
    pub sync_size: u32,
}

impl UpdateParams {
    /// Validates and builds a parameter set.
    pub fn new(learning_rate: f32, l2: f32, momentum: f32, l2_gap: u32, sync_size: u32) -> Result<Self> {
        if !(learning_rate > 0.0) {
            return Err(RuntimeError::invalid_parameter("learning_rate", learning_rate.to_string(), "> 0.0"));
        }
        if !(0.0..1.0).contains(&momentum) {
            return Err(RuntimeError::invalid_parameter("momentum", momentum.to_string(), "in [0.0, 1.0)"));
        }
        if l2 < 0.0 {
            return Err(RuntimeError::invalid_parameter("l2", l2.to_string(), ">= 0.0"));
        }
        Ok(Self { learning_rate, l2, momentum, l2_gap: l2_gap.max(1), sync_size })
    }

    fn eff_lr(&self) -> f32 {
        if self.momentum != 0.0 {
            self.learning_rate * (1.0 - self.momentum)
        } else {
            self.learning_rate
        }
    }
}

impl Default for UpdateParams {
    fn default() -> Self {
        Self { learning_rate: 0.1, l2: 0.0, momentum: 0.0, l2_gap: 1, sync_size: 0 }
    }
}

/// Owns one weight's storage and mutates it along its tagged update path.
///
/// Momentum and delta buffers are private to this updater; a `full`-tagged
/// weight may additionally be mirrored into a [`SharedWeight`] every
/// `sync_size` steps, for worker threads that read a synchronized copy.
pub struct WeightUpdater {
    pub weight: Weight,
    params: UpdateParams,
    momentum_buf: Option<Matrix>,
    steps: u32,
    shared: Option<Arc<SharedWeight>>,
}

/// A `parking_lot::RwLock`-guarded weight copy, periodically refreshed from
/// one worker's local updater so every worker's forward pass reads the same
/// (slightly stale) averaged weight.
pub struct SharedWeight {
    inner: RwLock<Matrix>,
}

impl SharedWeight {
    pub fn new(initial: Matrix) -> Arc<Self> {
        Arc::new(Self { inner: RwLock::new(initial) })
    }

    pub fn read(&self) -> Matrix {
        self.inner.read().clone()
    }

    fn replace(&self, m: &Matrix) {
        *self.inner.write() = m.clone();
    }
}

impl WeightUpdater {
    pub fn new(weight: Weight, params: UpdateParams) -> Self {
        let momentum_buf = (params.momentum != 0.0).then(|| Matrix::zeros(weight.matrix.rows(), weight.matrix.cols()));
        Self { weight, params, momentum_buf, steps: 0, shared: None }
    }

    /// Attaches a shared, lock-guarded mirror of this weight's storage.
    pub fn with_shared(mut self, shared: Arc<SharedWeight>) -> Self {
        self.shared = Some(shared);
        self
    }

    /// `full` path: dense batch of `(input, error)` rows, `err` is `[b, out]`,
    /// `input` is `[b, in_cols]`. `ΔW ← (η_eff/b)·errᵀ·in`.
    pub fn update_full(&mut self, err: &Matrix, input: &Matrix) -> Result<()> {
        let b = err.rows();
        if b == 0 || input.rows() != b {
            return Err(RuntimeError::dim_mismatch(
                "update_full",
                format!("err/input rows equal and nonzero, got err={b}"),
                format!("input={}", input.rows()),
            ));
        }
        let eff_lr = self.params.eff_lr();
        let mut delta = Matrix::zeros(self.weight.matrix.rows(), self.weight.matrix.cols());
        gemm(eff_lr / b as f32, err, Transpose::Yes, input, Transpose::No, 0.0, &mut delta)?;
        self.apply_delta(delta)?;

        if let Some(bias) = &mut self.weight.bias {
            colsum_into(eff_lr / b as f32, err, 1.0, bias)?;
        }
        self.after_step();
        Ok(())
    }

    /// `segment` path: `err` is the dense `[b, out_rows]` error matrix for
    /// one segment, `input` is `[b, in_cols]`, `index` maps rows (columns of
    /// the full weight's segment axis) to the examples that touch them; only
    /// examples present in `index` contribute, restricted to this segment's
    /// row range `[row_start, row_start + out_rows)`.
    pub fn update_segment(&mut self, row_start: usize, err: &Matrix, input: &Matrix, index: &Csc, segment: usize) -> Result<()> {
        let members: Vec<u32> = index.col(segment).map(|(r, _)| r).collect();
        if members.is_empty() {
            return Ok(());
        }
        let eff_lr = self.params.eff_lr();
        let cols = input.cols();
        let out_rows = err.cols();
        let mut gathered_err = Matrix::zeros(members.len(), out_rows);
        let mut gathered_in = Matrix::zeros(members.len(), cols);
        for (i, &r) in members.iter().enumerate() {
            gathered_err.row_mut(i).copy_from_slice(err.row(r as usize));
            gathered_in.row_mut(i).copy_from_slice(input.row(r as usize));
        }
        let mut delta = Matrix::zeros(out_rows, cols);
        gemm(eff_lr / members.len() as f32, &gathered_err, Transpose::Yes, &gathered_in, Transpose::No, 0.0, &mut delta)?;

        for r in 0..out_rows {
            let dst = self.weight.matrix.row_mut(row_start + r);
            for (d, s) in dst.iter_mut().zip(delta.row(r)) {
                *d += s;
            }
        }
        if let Some(bias) = &mut self.weight.bias {
            let mut colsum = vec![0.0; out_rows];
            colsum_into(eff_lr / members.len() as f32, &gathered_err, 0.0, &mut colsum)?;
            for (r, c) in colsum.into_iter().enumerate() {
                bias[row_start + r] += c;
            }
        }
        self.after_step();
        Ok(())
    }

    /// `part` path: a single example's contiguous hash band `[offset, offset
    /// + err.len())`, wrapping around the weight's row length. `err` is the
    /// per-output-unit error for the activated band.
    pub fn update_part(&mut self, offset: usize, err: &[f32]) -> Result<()> {
        if self.weight.matrix.rows() != 1 {
            return Err(RuntimeError::dim_mismatch("update_part", "1 row", format!("{}", self.weight.matrix.rows())));
        }
        let eff_lr = self.params.eff_lr();
        let cols = self.weight.matrix.cols();
        if cols == 0 {
            return Ok(());
        }
        let row = self.weight.matrix.row_mut(0);
        for (i, &e) in err.iter().enumerate() {
            let idx = (offset + i) % cols;
            row[idx] += eff_lr * e;
        }
        self.after_step();
        Ok(())
    }

    /// `one-shot` path: dense `err [b, cols]`; `entries` is `(row_in_batch,
    /// input_id, scale)`. Each entry adds `η_eff·scale·err_row − λ·W_row` to
    /// the weight row `input_id`.
    pub fn update_one_shot(&mut self, err: &Matrix, entries: &Coo) -> Result<()> {
        let eff_lr = self.params.eff_lr();
        let l2 = self.params.l2;
        for &(row_in_batch, input_id, scale) in entries.entries() {
            let err_row = err.row(row_in_batch as usize).to_vec();
            if input_id as usize >= self.weight.matrix.rows() {
                return Err(RuntimeError::invalid_format(format!(
                    "one-shot entry references row {input_id} outside weight with {} rows",
                    self.weight.matrix.rows()
                )));
            }
            let w_row = self.weight.matrix.row_mut(input_id as usize);
            for (w, e) in w_row.iter_mut().zip(err_row) {
                *w += eff_lr * scale * e - l2 * *w;
            }
        }
        self.after_step();
        Ok(())
    }

    fn apply_delta(&mut self, delta: Matrix) -> Result<()> {
        match &mut self.momentum_buf {
            Some(m) => {
                m.scale_inplace(self.params.momentum);
                m.add_scaled(1.0, &delta)?;
                self.weight.matrix.add_scaled(1.0, m)?;
            }
            None => {
                self.weight.matrix.add_scaled(1.0, &delta)?;
            }
        }
        Ok(())
    }

    fn after_step(&mut self) {
        self.steps += 1;
        if self.params.l2 > 0.0 && self.steps % self.params.l2_gap == 0 {
            self.weight.matrix.scale_inplace(1.0 - self.params.l2);
        }
        if let Some(shared) = &self.shared {
            if self.params.sync_size > 0 && self.steps % self.params.sync_size == 0 {
                shared.replace(&self.weight.matrix);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lm_core::weight::WeightTag;

    fn params(lr: f32) -> UpdateParams {
        UpdateParams::new(lr, 0.0, 0.0, 1, 0).unwrap()
    }

    #[test]
    fn full_update_reduces_error_direction() {
        let w = Weight::new(WeightTag::Full, Matrix::zeros(2, 2));
        let mut u = WeightUpdater::new(w, params(1.0));
        let err = Matrix::from_rows(1, 2, &[1.0, 0.0]).unwrap();
        let input = Matrix::from_rows(1, 2, &[1.0, 1.0]).unwrap();
        u.update_full(&err, &input).unwrap();
        assert_eq!(u.weight.matrix.get(0, 0), 1.0);
        assert_eq!(u.weight.matrix.get(0, 1), 1.0);
        assert_eq!(u.weight.matrix.get(1, 0), 0.0);
    }

    #[test]
    fn part_update_wraps_around_band() {
        let w = Weight::new(WeightTag::Part, Matrix::zeros(1, 4));
        let mut u = WeightUpdater::new(w, params(1.0));
        u.update_part(3, &[1.0, 1.0]).unwrap();
        assert_eq!(u.weight.matrix.row(0), &[1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn one_shot_update_touches_only_referenced_rows() {
        let w = Weight::new(WeightTag::OneShot, Matrix::zeros(3, 2));
        let mut u = WeightUpdater::new(w, params(1.0));
        let err = Matrix::from_rows(1, 2, &[1.0, 1.0]).unwrap();
        let mut coo = Coo::new(1, 3);
        coo.push(0, 1, 2.0).unwrap();
        u.update_one_shot(&err, &coo).unwrap();
        assert_eq!(u.weight.matrix.row(0), &[0.0, 0.0]);
        assert_eq!(u.weight.matrix.row(1), &[2.0, 2.0]);
    }

    #[test]
    fn momentum_accumulates_across_steps() {
        let w = Weight::new(WeightTag::Full, Matrix::zeros(1, 1));
        let mut u = WeightUpdater::new(w, UpdateParams::new(1.0, 0.0, 0.5, 1, 0).unwrap());
        let err = Matrix::from_rows(1, 1, &[1.0]).unwrap();
        let input = Matrix::from_rows(1, 1, &[1.0]).unwrap();
        u.update_full(&err, &input).unwrap();
        let after_one = u.weight.matrix.get(0, 0);
        u.update_full(&err, &input).unwrap();
        let after_two = u.weight.matrix.get(0, 0);
        assert!(after_two - after_one > 0.5, "momentum should accelerate later steps");
    }

    #[test]
    fn invalid_momentum_is_rejected() {
        assert!(UpdateParams::new(0.1, 0.0, 1.0, 1, 0).is_err());
    }
}
