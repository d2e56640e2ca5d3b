//! Per-component, per-worker forward/backward and BPTT ring buffers
//! (C7, §4.7).
//!
//! A worker thread owns one [`ComponentUpdater`] per component it is
//! responsible for. It steps the component's layers forward one position at
//! a time, and periodically unrolls a recurrent glue's ring buffer to
//! propagate error back through time.

use std::collections::{HashMap, HashSet, VecDeque};

use lm_core::component::{Component, GlueKind};
use lm_math::Matrix;

use crate::error::{Result, RuntimeError};
use crate::weight_updater::WeightUpdater;

/// One time step's pre-activation input and post-activation output for a
/// recurrent glue, kept so backward can unroll through time.
struct RingEntry {
    input: Vec<f32>,
    output: Vec<f32>,
}

/// Fixed-capacity history for one recurrence cycle: `bptt + bptt_delay − 1`
/// steps, per §3.
pub struct BpttRing {
    capacity: usize,
    buf: VecDeque<RingEntry>,
}

impl BpttRing {
    pub fn new(bptt_window: u32, bptt_delay: u32) -> Self {
        let capacity = (bptt_window + bptt_delay).saturating_sub(1).max(1) as usize;
        Self { capacity, buf: VecDeque::with_capacity(capacity) }
    }

    fn push(&mut self, input: Vec<f32>, output: Vec<f32>) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(RingEntry { input, output });
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }
}

/// Runs one component's layers forward/backward for a single worker thread.
pub struct ComponentUpdater<'c> {
    component: &'c Component,
    glue_updaters: HashMap<u32, WeightUpdater>,
    activations: HashMap<u32, Vec<f32>>,
    rings: HashMap<u32, BpttRing>,
    /// Word ids whose one-shot weight row was touched since the last flush,
    /// coalescing repeated writes to the same embedding row within a block.
    dirty_one_shot: HashMap<u32, HashSet<u32>>,
    /// Per-glue, per-id accumulated error for one-shot (embedding) glues,
    /// summed across every `backward` call since the last flush so a word
    /// hit twice in the same block gets one coalesced write, not two.
    pending_one_shot: HashMap<u32, HashMap<u32, Vec<f32>>>,
    /// Error clipping bound applied after every back-prop multiplication.
    er_cutoff: f32,
}

impl<'c> ComponentUpdater<'c> {
    pub fn new(component: &'c Component, glue_updaters: HashMap<u32, WeightUpdater>, er_cutoff: f32) -> Self {
        let rings = component
            .cycles
            .iter()
            .map(|cycle| {
                let glue_idx = cycle.recurrent_glue();
                let glue = &component.glues[glue_idx as usize];
                (glue_idx, BpttRing::new(glue.bptt_window, glue.bptt_delay))
            })
            .collect();
        Self {
            component,
            glue_updaters,
            activations: HashMap::new(),
            rings,
            dirty_one_shot: HashMap::new(),
            pending_one_shot: HashMap::new(),
            er_cutoff,
        }
    }

    /// Sets the input layer's activation for the current time position.
    pub fn set_input(&mut self, values: Vec<f32>) {
        self.activations.insert(self.component.input_layer, values);
    }

    pub fn output(&self) -> &[f32] {
        self.activations.get(&self.component.output_layer).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Reclaims the per-glue weight updaters, e.g. to persist their final
    /// weights after a training run finishes with this updater.
    pub fn into_glue_updaters(self) -> HashMap<u32, WeightUpdater> {
        self.glue_updaters
    }

    /// Forward-step contract (§4.7): propagate every layer's activation in
    /// topological order, pushing each recurrent glue's (input, output)
    /// pair into its ring.
    pub fn forward(&mut self) -> Result<()> {
        for &layer_idx in &self.component.topo_order.clone() {
            if layer_idx == self.component.input_layer {
                continue;
            }
            let size = self.component.layers[layer_idx as usize].size as usize;
            let mut acc = vec![0.0f32; size];
            let mut contributions = 0u32;
            for (gi, glue) in self.component.glues.iter().enumerate() {
                if glue.out_layer != layer_idx || glue.kind == GlueKind::Recurrence {
                    continue;
                }
                let input = self.activations.get(&glue.in_layer).cloned().unwrap_or_default();
                let out = self.glue_forward(gi as u32, &input, size)?;
                for (a, o) in acc.iter_mut().zip(out) {
                    *a += o;
                }
                contributions += 1;
            }
            for cycle in &self.component.cycles {
                let glue = &self.component.glues[cycle.recurrent_glue() as usize];
                if glue.out_layer != layer_idx {
                    continue;
                }
                let prev = self
                    .rings
                    .get(&cycle.recurrent_glue())
                    .and_then(|r| r.buf.back())
                    .map(|e| e.output.clone())
                    .unwrap_or_else(|| vec![0.0; size]);
                let input = self.activations.get(&glue.in_layer).cloned().unwrap_or_default();
                let out = self.glue_forward(cycle.recurrent_glue(), &prev, size)?;
                for (a, o) in acc.iter_mut().zip(out) {
                    *a += o;
                }
                if let Some(ring) = self.rings.get_mut(&cycle.recurrent_glue()) {
                    ring.push(input, acc.clone());
                }
                contributions += 1;
            }
            if contributions == 0 {
                return Err(RuntimeError::invalid_config(format!(
                    "layer {:?} has no incoming glue",
                    self.component.layers[layer_idx as usize].name
                )));
            }
            self.activations.insert(layer_idx, acc);
        }
        Ok(())
    }

    fn glue_forward(&self, glue_idx: u32, input: &[f32], out_size: usize) -> Result<Vec<f32>> {
        let glue = &self.component.glues[glue_idx as usize];
        let updater = self.glue_updaters.get(&glue_idx);
        match glue.kind {
            GlueKind::Dense | GlueKind::Recurrence => {
                let w = &updater.expect("dense/recurrence glue carries a weight").weight;
                let in_m = Matrix::from_rows(1, input.len().max(1), input)?;
                let mut out_m = Matrix::zeros(out_size, 1);
                lm_math::gemm(1.0, &w.matrix, lm_math::Transpose::No, &in_m, lm_math::Transpose::Yes, 0.0, &mut out_m)?;
                let mut out: Vec<f32> = (0..out_size).map(|i| out_m.get(i, 0)).collect();
                if let Some(bias) = &w.bias {
                    for (o, b) in out.iter_mut().zip(bias) {
                        *o += b;
                    }
                }
                Ok(out)
            }
            GlueKind::Embedding => {
                let w = &updater.expect("embedding glue carries a weight").weight;
                let id = input.first().copied().unwrap_or(0.0) as usize;
                if id >= w.matrix.rows() {
                    return Err(RuntimeError::invalid_format(format!("embedding id {id} out of range")));
                }
                Ok(w.matrix.row(id).to_vec())
            }
            GlueKind::Direct => {
                let w = &updater.expect("direct glue carries a weight").weight;
                let hash = input.first().copied().unwrap_or(0.0) as usize;
                let cols = w.matrix.cols().max(1);
                let row = w.matrix.row(0);
                Ok((0..out_size).map(|o| row[(hash + o) % cols]).collect())
            }
            GlueKind::Sum => Ok(input.iter().copied().chain(std::iter::repeat(0.0)).take(out_size).collect()),
            GlueKind::Avg => {
                let n = input.len().max(1) as f32;
                Ok(input.iter().map(|v| v / n).chain(std::iter::repeat(0.0)).take(out_size).collect())
            }
            GlueKind::Activation => Ok(input.iter().map(|v| 1.0 / (1.0 + (-v).exp())).take(out_size).collect()),
        }
    }

    /// Backward-step contract (§4.7): unrolls the glue's ring (for
    /// recurrent glues) or applies a one-step update directly (for
    /// feed-forward glues), clipping errors to ±`er_cutoff`. A recurrent
    /// glue's whole unroll is accumulated into a temporary per-step buffer
    /// and applied as one batched update at the end of the unroll; one-shot
    /// (embedding) writes are coalesced into `dirty_one_shot`/
    /// `pending_one_shot` and only actually applied by [`Self::flush_one_shot`]
    /// at the caller's block boundary.
    pub fn backward(&mut self, output_error: &[f32]) -> Result<()> {
        let clipped: Vec<f32> = output_error.iter().map(|e| e.clamp(-self.er_cutoff, self.er_cutoff)).collect();
        let output_layer = self.component.output_layer;
        for (gi, glue) in self.component.glues.iter().enumerate() {
            if glue.out_layer != output_layer || glue.kind == GlueKind::Recurrence {
                continue;
            }
            self.apply_glue_gradient(gi as u32, &clipped)?;
        }
        for cycle in &self.component.cycles {
            let gi = cycle.recurrent_glue();
            let steps: Vec<(Vec<f32>, Vec<f32>)> = self
                .rings
                .get(&gi)
                .map(|r| r.buf.iter().rev().map(|e| (e.input.clone(), e.output.clone())).collect())
                .unwrap_or_default();
            if steps.is_empty() {
                continue;
            }
            // Unroll the ring into one temporary (err, input) buffer per step
            // and apply it as a single batched update at the end of the
            // unroll, rather than writing the weight after every step.
            let mut err = clipped.clone();
            let mut err_rows = Vec::with_capacity(steps.len());
            let mut input_rows = Vec::with_capacity(steps.len());
            for (input, _output) in steps {
                err_rows.push(err.clone());
                input_rows.push(input);
                err = err.iter().map(|e| e.clamp(-self.er_cutoff, self.er_cutoff)).collect();
            }
            self.apply_glue_gradient_block(gi, &err_rows, &input_rows)?;
        }
        Ok(())
    }

    /// Applies the accumulated (err, input) pairs from one ring's full
    /// unroll as a single batched update, so the historical steps inside one
    /// `backward` call never observe each other's weight write. Only
    /// [`GlueKind::Dense`]/[`GlueKind::Recurrence`] can be a recurrent glue
    /// (`Component::build` rejects any other kind in a cycle), so those are
    /// the only kinds this needs to batch.
    fn apply_glue_gradient_block(&mut self, gi: u32, err_rows: &[Vec<f32>], input_rows: &[Vec<f32>]) -> Result<()> {
        let glue = self.component.glues[gi as usize].clone();
        let updater = match self.glue_updaters.get_mut(&gi) {
            Some(u) => u,
            None => return Ok(()),
        };
        match glue.kind {
            GlueKind::Dense | GlueKind::Recurrence => {
                let b = err_rows.len();
                let out_cols = err_rows[0].len();
                let in_cols = input_rows.iter().map(|v| v.len()).max().unwrap_or(0).max(1);
                let err_flat: Vec<f32> = err_rows.iter().flat_map(|r| r.iter().copied()).collect();
                let in_flat: Vec<f32> = input_rows
                    .iter()
                    .flat_map(|r| {
                        let mut padded = r.clone();
                        padded.resize(in_cols, 0.0);
                        padded
                    })
                    .collect();
                let err_m = Matrix::from_rows(b, out_cols, &err_flat)?;
                let in_m = Matrix::from_rows(b, in_cols, &in_flat)?;
                updater.update_full(&err_m, &in_m)?;
            }
            GlueKind::Embedding | GlueKind::Direct | GlueKind::Sum | GlueKind::Avg | GlueKind::Activation => {}
        }
        Ok(())
    }

    fn apply_glue_gradient(&mut self, gi: u32, err: &[f32]) -> Result<()> {
        let glue = self.component.glues[gi as usize].clone();
        let input = self.activations.get(&glue.in_layer).cloned().unwrap_or_default();
        self.apply_glue_gradient_with(gi, err, &input)
    }

    fn apply_glue_gradient_with(&mut self, gi: u32, err: &[f32], input: &[f32]) -> Result<()> {
        let glue = self.component.glues[gi as usize].clone();
        let updater = match self.glue_updaters.get_mut(&gi) {
            Some(u) => u,
            None => return Ok(()),
        };
        match glue.kind {
            GlueKind::Dense | GlueKind::Recurrence => {
                let err_m = Matrix::from_rows(1, err.len(), err)?;
                let in_m = Matrix::from_rows(1, input.len().max(1), input)?;
                updater.update_full(&err_m, &in_m)?;
            }
            GlueKind::Embedding => {
                let id = input.first().copied().unwrap_or(0.0) as u32;
                self.dirty_one_shot.entry(gi).or_default().insert(id);
                let acc = self
                    .pending_one_shot
                    .entry(gi)
                    .or_default()
                    .entry(id)
                    .or_insert_with(|| vec![0.0; err.len()]);
                for (a, e) in acc.iter_mut().zip(err) {
                    *a += *e;
                }
            }
            GlueKind::Direct => {
                let offset = input.first().copied().unwrap_or(0.0) as usize;
                updater.update_part(offset, err)?;
            }
            GlueKind::Sum | GlueKind::Avg | GlueKind::Activation => {}
        }
        Ok(())
    }

    /// Words whose embedding row was written since the updater was built;
    /// the caller flushes and clears these at block end.
    pub fn take_dirty_one_shot(&mut self) -> HashMap<u32, HashSet<u32>> {
        std::mem::take(&mut self.dirty_one_shot)
    }

    /// Block end: applies every embedding glue's coalesced per-word gradient
    /// accumulated since the last flush as a single `update_one_shot` call
    /// per glue, then clears the dirty set and pending accumulator. A word
    /// touched twice in the same block gets one write, not two.
    pub fn flush_one_shot(&mut self) -> Result<()> {
        for (gi, ids) in self.take_dirty_one_shot() {
            if ids.is_empty() {
                continue;
            }
            let Some(pending) = self.pending_one_shot.remove(&gi) else { continue };
            let Some(updater) = self.glue_updaters.get_mut(&gi) else { continue };
            let emb_rows = updater.weight.matrix.rows();
            let out_cols = updater.weight.matrix.cols();
            let mut entries = lm_math::Coo::new(ids.len(), emb_rows);
            let mut err_flat = Vec::with_capacity(ids.len() * out_cols);
            for (row, id) in ids.iter().enumerate() {
                let err = pending.get(id).cloned().unwrap_or_else(|| vec![0.0; out_cols]);
                entries.push(row as u32, *id, 1.0)?;
                err_flat.extend(err);
            }
            let err_m = Matrix::from_rows(ids.len(), out_cols, &err_flat)?;
            updater.update_one_shot(&err_m, &entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weight_updater::UpdateParams;
    use lm_core::component::{GlueSpec, LayerSpec};
    use lm_core::weight::{Weight, WeightTag};

    fn build_ffnn() -> Component {
        let layers = vec![
            LayerSpec { name: "in".into(), kind: "input".into(), size: 2 },
            LayerSpec { name: "out".into(), kind: "output".into(), size: 2 },
        ];
        let glues = vec![GlueSpec {
            name: "w".into(),
            kind: GlueKind::Dense,
            in_layer: "in".into(),
            out_layer: "out".into(),
            bptt_window: 0,
            bptt_delay: 0,
        }];
        Component::build("ffnn".into(), layers, glues).unwrap()
    }

    #[test]
    fn forward_dense_glue_matches_matrix_vector_product() {
        let c = build_ffnn();
        let w = Weight::new(WeightTag::Full, Matrix::from_rows(2, 2, &[1.0, 0.0, 0.0, 1.0]).unwrap());
        let mut updaters = HashMap::new();
        updaters.insert(0u32, WeightUpdater::new(w, UpdateParams::default()));
        let mut cu = ComponentUpdater::new(&c, updaters, 15.0);
        cu.set_input(vec![3.0, 4.0]);
        cu.forward().unwrap();
        assert_eq!(cu.output(), &[3.0, 4.0]);
    }

    #[test]
    fn backward_updates_dense_weight_toward_error() {
        let c = build_ffnn();
        let w = Weight::new(WeightTag::Full, Matrix::zeros(2, 2));
        let mut updaters = HashMap::new();
        updaters.insert(0u32, WeightUpdater::new(w, UpdateParams::new(1.0, 0.0, 0.0, 1, 0).unwrap()));
        let mut cu = ComponentUpdater::new(&c, updaters, 15.0);
        cu.set_input(vec![1.0, 0.0]);
        cu.forward().unwrap();
        cu.backward(&[1.0, 0.0]).unwrap();
        assert_eq!(cu.glue_updaters[&0].weight.matrix.get(0, 0), 1.0);
    }

    fn build_recurrent() -> Component {
        let layers = vec![
            LayerSpec { name: "in".into(), kind: "input".into(), size: 1 },
            LayerSpec { name: "h".into(), kind: "hidden".into(), size: 1 },
            LayerSpec { name: "out".into(), kind: "output".into(), size: 1 },
        ];
        let glues = vec![
            GlueSpec { name: "a".into(), kind: GlueKind::Dense, in_layer: "in".into(), out_layer: "h".into(), bptt_window: 0, bptt_delay: 0 },
            GlueSpec { name: "r".into(), kind: GlueKind::Recurrence, in_layer: "h".into(), out_layer: "h".into(), bptt_window: 2, bptt_delay: 1 },
            GlueSpec { name: "b".into(), kind: GlueKind::Dense, in_layer: "h".into(), out_layer: "out".into(), bptt_window: 0, bptt_delay: 0 },
        ];
        Component::build("rnn".into(), layers, glues).unwrap()
    }

    /// The ring holds two historical steps by the time `backward` runs; this
    /// asserts the recurrent glue's weight reflects one batched `(η_eff/b)`
    /// update over both steps, not two sequential `(η_eff/1)` writes.
    #[test]
    fn backward_batches_recurrent_ring_into_one_update() {
        let c = build_recurrent();
        let gi_a = c.glues.iter().position(|g| g.name == "a").unwrap() as u32;
        let gi_r = c.glues.iter().position(|g| g.name == "r").unwrap() as u32;
        let gi_b = c.glues.iter().position(|g| g.name == "b").unwrap() as u32;

        let params = UpdateParams::new(1.0, 0.0, 0.0, 1, 0).unwrap();
        let mut updaters = HashMap::new();
        updaters.insert(gi_a, WeightUpdater::new(Weight::new(WeightTag::Full, Matrix::from_rows(1, 1, &[1.0]).unwrap()), params));
        updaters.insert(gi_r, WeightUpdater::new(Weight::new(WeightTag::Full, Matrix::zeros(1, 1)), params));
        updaters.insert(gi_b, WeightUpdater::new(Weight::new(WeightTag::Full, Matrix::from_rows(1, 1, &[1.0]).unwrap()), params));

        let mut cu = ComponentUpdater::new(&c, updaters, 15.0);
        cu.set_input(vec![2.0]);
        cu.forward().unwrap();
        cu.set_input(vec![2.0]);
        cu.forward().unwrap();

        cu.backward(&[1.0]).unwrap();
        assert_eq!(cu.glue_updaters[&gi_r].weight.matrix.get(0, 0), 1.0);
    }

    #[test]
    fn flush_one_shot_coalesces_repeated_writes_to_the_same_id() {
        let layers = vec![
            LayerSpec { name: "in".into(), kind: "input".into(), size: 1 },
            LayerSpec { name: "out".into(), kind: "output".into(), size: 1 },
        ];
        let glues = vec![GlueSpec {
            name: "e".into(),
            kind: GlueKind::Embedding,
            in_layer: "in".into(),
            out_layer: "out".into(),
            bptt_window: 0,
            bptt_delay: 0,
        }];
        let c = Component::build("emb".into(), layers, glues).unwrap();
        let w = Weight::new(WeightTag::OneShot, Matrix::zeros(3, 1));
        let mut updaters = HashMap::new();
        updaters.insert(0u32, WeightUpdater::new(w, UpdateParams::new(1.0, 0.0, 0.0, 1, 0).unwrap()));
        let mut cu = ComponentUpdater::new(&c, updaters, 15.0);

        // Word id 1 gets hit twice in this block; flush must write it once
        // with the sum of both errors, not apply two separate writes.
        cu.set_input(vec![1.0]);
        cu.forward().unwrap();
        cu.backward(&[2.0]).unwrap();
        cu.set_input(vec![1.0]);
        cu.forward().unwrap();
        cu.backward(&[3.0]).unwrap();

        assert_eq!(cu.glue_updaters[&0].weight.matrix.get(1, 0), 0.0, "no write before flush");
        cu.flush_one_shot().unwrap();
        assert_eq!(cu.glue_updaters[&0].weight.matrix.get(1, 0), 5.0);
        assert_eq!(cu.glue_updaters[&0].weight.matrix.get(0, 0), 0.0);
        assert_eq!(cu.glue_updaters[&0].weight.matrix.get(2, 0), 0.0);
    }
}
