//! Per-tree-node activation/error bookkeeping and hierarchical-softmax
//! forward/backward/sampling (C6, §4.6).

use std::collections::HashMap;

use lm_core::tree::OutputTree;
use lm_math::Matrix;
use rand::Rng;

use crate::error::Result;

struct NodeBuffers {
    activations: Matrix,
    errors: Matrix,
    visits: u32,
}

/// One instance per mini-batch; [`Self::prepare`] resets it for a fresh
/// batch of targets.
pub struct OutputUpdater<'t> {
    tree: &'t OutputTree,
    nodes: HashMap<u32, NodeBuffers>,
    /// Per-target `(node, row, child_index)` triples along its root path,
    /// in the order `prepare` assigned batch rows.
    paths: Vec<Vec<(u32, u32, u32)>>,
}

impl<'t> OutputUpdater<'t> {
    pub fn new(tree: &'t OutputTree) -> Self {
        Self { tree, nodes: HashMap::new(), paths: Vec::new() }
    }

    /// Counts visits per node across every target's path and (re)sizes each
    /// node's activation/error matrices to `(visits, num_children)`.
    pub fn prepare(&mut self, targets: &[u32]) {
        let tree = self.tree;
        let mut children_of: HashMap<u32, usize> = HashMap::new();
        let mut visit_counts: HashMap<u32, u32> = HashMap::new();
        for &word in targets {
            tree.walk_path(word, |node, _next, range| {
                children_of.entry(node).or_insert((range.end - range.start) as usize);
                *visit_counts.entry(node).or_insert(0) += 1;
            });
        }

        self.nodes.clear();
        for (&node, &visits) in &visit_counts {
            let children = children_of[&node];
            self.nodes.insert(
                node,
                NodeBuffers {
                    activations: Matrix::zeros(visits as usize, children),
                    errors: Matrix::zeros(visits as usize, children),
                    visits: 0,
                },
            );
        }

        self.paths = Vec::with_capacity(targets.len());
        for &word in targets {
            let mut path = Vec::new();
            tree.walk_path(word, |node, next_child, _range| {
                let buf = self.nodes.get_mut(&node).expect("node sized in first pass");
                let row = buf.visits;
                buf.visits += 1;
                path.push((node, row, next_child as u32));
            });
            self.paths.push(path);
        }
    }

    /// The pre-softmax activation row a forward pass should fill in for
    /// `node`'s `row`-th visit this batch.
    pub fn activation_row_mut(&mut self, node: u32, row: u32) -> &mut [f32] {
        self.nodes.get_mut(&node).expect("prepare() was called with this node on a path").activations.row_mut(row as usize)
    }

    /// Forward: softmaxes every visited node's rows, then accumulates each
    /// target's path log-probability into `logps[i]`.
    pub fn activate(&mut self, logps: &mut [f32]) -> Result<()> {
        for buf in self.nodes.values_mut() {
            buf.activations.softmax_rows_inplace();
        }
        for (i, path) in self.paths.iter().enumerate() {
            let mut lp = 0.0f32;
            for &(node, row, col) in path {
                let buf = &self.nodes[&node];
                let p = buf.activations.get(row as usize, col as usize).max(1e-12);
                lp += p.ln();
            }
            logps[i] += lp;
        }
        Ok(())
    }

    /// Backward: every node's row starts at `-a` (softmax output negated),
    /// then the target column on each target's path is corrected to `1-a`.
    pub fn loss(&mut self) {
        for buf in self.nodes.values_mut() {
            for r in 0..buf.activations.rows() {
                let act = buf.activations.row(r).to_vec();
                let err = buf.errors.row_mut(r);
                for (e, a) in err.iter_mut().zip(act) {
                    *e = -a;
                }
            }
        }
        for path in &self.paths {
            for &(node, row, col) in path {
                let buf = self.nodes.get_mut(&node).unwrap();
                let a = buf.activations.get(row as usize, col as usize);
                buf.errors.set(row as usize, col as usize, 1.0 - a);
            }
        }
    }

    /// The error row a backward pass should read back for `node`'s
    /// `row`-th visit this batch.
    pub fn error_row(&self, node: u32, row: u32) -> &[f32] {
        self.nodes[&node].errors.row(row as usize)
    }

    /// Draws one word from a node's softmax over `scores` (raw, pre-softmax),
    /// rejecting draws that land on the UNK leaf or a subtree containing only
    /// UNK, and redrawing up to `max_attempts` times.
    pub fn sample<R: Rng + ?Sized>(&self, node: u32, scores: &[f32], rng: &mut R, max_attempts: u32) -> Option<u32> {
        let mut probs = scores.to_vec();
        let max = probs.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0f32;
        for p in probs.iter_mut() {
            *p = (*p - max).clamp(-50.0, 50.0).exp();
            sum += *p;
        }
        if sum > 0.0 {
            for p in probs.iter_mut() {
                *p /= sum;
            }
        }

        for _ in 0..max_attempts.max(1) {
            let u: f32 = rng.gen();
            let mut cumulative = 0.0f32;
            let mut chosen = probs.len().saturating_sub(1);
            for (idx, &p) in probs.iter().enumerate() {
                cumulative += p;
                if u <= cumulative {
                    chosen = idx;
                    break;
                }
            }
            let child = self.tree.child_at(node, chosen);
            if !self.tree.subtree_contains(child, lm_core::UNK) {
                return Some(child);
            }
        }
        None
    }
}
