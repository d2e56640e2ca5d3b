//! Shared glue between the CLI's subcommands and the library crates:
//! model load/save helpers and the `Updater` that wires
//! [`ComponentUpdater`]/[`OutputUpdater`] together for one component.
//!
//! This crate's training/eval/generation wiring targets one component and
//! [`lm_core::tree::TreeKind::Flat`] output trees: a sentence is scored one
//! word at a time, conditioned on the single previous word (the component's
//! single input layer carries that word's id), and the whole softmax lives
//! on the tree's root node. Class/Huffman trees are buildable by `lm-core`
//! and `lm-storage` round-trips them fine, but scoring a multi-node path
//! would need per-node output weight slices this CLI doesn't wire up yet.

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use lm_core::component::{Component, GlueKind};
use lm_core::tree::OutputTree;
use lm_core::weight::Weight;
use lm_runtime::component_updater::ComponentUpdater;
use lm_runtime::driver::{Mode, Updater};
use lm_runtime::output_updater::OutputUpdater;
use lm_runtime::weight_updater::{UpdateParams, WeightUpdater};
use lm_storage::{ComponentModel, Model};

use crate::error::{CliError, CliResult};

pub fn load_model(path: &Path) -> CliResult<Model> {
    let bytes = std::fs::read(path)?;
    Ok(lm_storage::load(&bytes)?)
}

pub fn save_model(model: &Model, path: &Path) -> CliResult<()> {
    save_model_encoded(model, path, lm_math::NumericFlags::PLAIN)
}

/// Like [`save_model`] but lets the caller pick a non-default on-disk
/// numeric encoding (`lm train --quantize`).
pub fn save_model_encoded(model: &Model, path: &Path, encoding: lm_math::NumericFlags) -> CliResult<()> {
    let bytes = lm_storage::save(model, &lm_storage::ModelFilter::all(path.to_string_lossy().into_owned()), encoding);
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Rejects any tree that isn't a flat (single internal root node) tree:
/// `train`/`eval`/`gen` all hardcode `(tree.root(), row 0)` output
/// addressing, which only holds for that shape (see the module doc above).
pub fn require_flat_tree(tree: &OutputTree, vocab_len: usize) -> CliResult<()> {
    if tree.num_nodes() as usize != vocab_len + 1 {
        return Err(CliError::invalid_args(
            "this command only supports flat output trees (one internal root node); re-run `lm init --tree-kind flat`",
        ));
    }
    Ok(())
}

/// The one component this CLI trains/evaluates/generates from. Multi-component
/// composition is out of scope for this thin front end.
pub fn primary_component<'a>(model: &'a Model) -> CliResult<(&'a str, &'a ComponentModel)> {
    model
        .components
        .iter()
        .next()
        .map(|(name, cm)| (name.as_str(), cm))
        .ok_or_else(|| CliError::missing_resource("model carries no components; run `init` first"))
}

/// Builds one [`WeightUpdater`] per weight-carrying glue, keyed by glue index.
pub fn build_glue_updaters(component: &Component, weights: &std::collections::BTreeMap<String, Weight>, params: UpdateParams) -> HashMap<u32, WeightUpdater> {
    let mut updaters = HashMap::new();
    for (gi, glue) in component.glues.iter().enumerate() {
        if glue.kind == GlueKind::Sum || glue.kind == GlueKind::Avg || glue.kind == GlueKind::Activation {
            continue;
        }
        if let Some(w) = weights.get(&glue.name) {
            updaters.insert(gi as u32, WeightUpdater::new(w.clone(), params));
        }
    }
    updaters
}

/// Reads every glue's current weight back out of a built [`ComponentUpdater`],
/// for re-assembly into a [`ComponentModel`] after training.
pub fn extract_weights(component: &Component, cu_weights: &HashMap<u32, WeightUpdater>) -> std::collections::BTreeMap<String, Weight> {
    let mut out = std::collections::BTreeMap::new();
    for (gi, updater) in cu_weights {
        let glue = &component.glues[*gi as usize];
        out.insert(glue.name.clone(), updater.weight.clone());
    }
    out
}

/// Feeds whole sentences through one component and its output tree, one word
/// at a time, conditioned on the previous word. `Mode::Train` backpropagates
/// after every word (a mini-batch size of one is a valid degenerate case of
/// the batched §4.5 update formulas); `Mode::Eval` only scores.
pub struct LmUpdater<'c, 't> {
    cu: ComponentUpdater<'c>,
    ou: OutputUpdater<'t>,
    tree: &'t OutputTree,
    pending: VecDeque<Vec<u32>>,
}

impl<'c, 't> LmUpdater<'c, 't> {
    pub fn new(cu: ComponentUpdater<'c>, tree: &'t OutputTree) -> Self {
        Self { cu, ou: OutputUpdater::new(tree), tree, pending: VecDeque::new() }
    }

    pub fn into_component_updater(self) -> ComponentUpdater<'c> {
        self.cu
    }
}

impl<'c, 't> Updater for LmUpdater<'c, 't> {
    fn feed(&mut self, words: &[Vec<u32>]) {
        self.pending.extend(words.iter().cloned());
    }

    fn steppable(&self) -> bool {
        !self.pending.is_empty()
    }

    fn step(&mut self, mode: Mode) -> lm_runtime::Result<(u64, u64, f64)> {
        let sentence = self.pending.pop_front().unwrap_or_default();
        let mut prev = lm_core::SENT_END;
        let mut logp = 0.0f64;

        for &word in &sentence {
            self.cu.set_input(vec![prev as f32]);
            self.cu.forward()?;
            let scores = self.cu.output().to_vec();

            self.ou.prepare(&[word]);
            self.ou.activation_row_mut(self.tree.root(), 0).copy_from_slice(&scores);
            let mut lp = [0.0f32];
            self.ou.activate(&mut lp)?;
            logp += lp[0] as f64;

            if mode == Mode::Train {
                self.ou.loss();
                let err = self.ou.error_row(self.tree.root(), 0).to_vec();
                self.cu.backward(&err)?;
            }
            prev = word;
        }

        if mode == Mode::Train {
            // One sentence is this updater's block: every embedding row
            // touched while scoring it gets one coalesced write here.
            self.cu.flush_one_shot()?;
        }

        Ok((sentence.len() as u64, 1, logp))
    }

    fn finalize(&mut self) -> lm_runtime::Result<(u64, u64, f64)> {
        Ok((0, 0, 0.0))
    }
}
