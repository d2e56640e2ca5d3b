//! `lm init <topology-file> <model-in> <model-out>`: compiles a topology
//! file into a validated component graph, builds the output tree, and gives
//! every weight-carrying glue a freshly initialized weight.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Args;
use lm_core::component::{Component, GlueKind};
use lm_core::tree::{OutputTree, TreeKind};
use lm_core::weight::{Weight, WeightTag};
use lm_math::Matrix;
use lm_storage::ComponentModel;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::error::{CliError, CliResult};

use super::support::{load_model, save_model};

/// Hash-band width for `direct` (max-ent-style) glues.
const DIRECT_HASH_SIZE: usize = 100_003;
/// Uniform random initialization range for dense/recurrence/embedding weights.
const INIT_SCALE: f32 = 0.1;

#[derive(Args, Debug)]
pub struct InitCommand {
    /// Topology text file (§4.4 grammar).
    pub topology_file: PathBuf,

    /// Model carrying at least a vocabulary (from `lm vocab`).
    pub model_in: PathBuf,

    /// Where to write the initial model.
    pub model_out: PathBuf,

    /// Output tree shape: `flat`, `class`, or `huffman`. Only `flat` trees are
    /// presently scorable by `train`/`eval`/`gen` (see `commands::support`);
    /// `class`/`huffman` models can be built and round-tripped through
    /// storage but training against them will fail until per-node output
    /// forwarding is wired up.
    #[arg(long, default_value = "flat")]
    pub tree_kind: String,

    /// Number of classes when `--tree-kind class` is selected.
    #[arg(long, default_value_t = 100)]
    pub num_classes: u32,

    /// Seed for random weight initialization.
    #[arg(long, default_value_t = 1)]
    pub random_seed: u64,
}

fn parse_tree_kind(s: &str, num_classes: u32) -> CliResult<TreeKind> {
    match s.to_ascii_lowercase().as_str() {
        "flat" => Ok(TreeKind::Flat),
        "class" => Ok(TreeKind::Class { num_classes }),
        "huffman" => Ok(TreeKind::Huffman),
        other => Err(CliError::invalid_args(format!(
            "unknown tree kind {other:?} (expected flat, class or huffman)"
        ))),
    }
}

fn fresh_weight(component: &Component, glue_idx: usize, vocab_len: usize, rng: &mut StdRng) -> Option<Weight> {
    let glue = &component.glues[glue_idx];
    let in_size = component.layers[glue.in_layer as usize].size as usize;
    let out_size = component.layers[glue.out_layer as usize].size as usize;
    match glue.kind {
        GlueKind::Dense | GlueKind::Recurrence => {
            let mut m = Matrix::zeros(out_size, in_size);
            for r in 0..out_size {
                for c in 0..in_size {
                    m.set(r, c, rng.gen_range(-INIT_SCALE..INIT_SCALE));
                }
            }
            Some(Weight::new(WeightTag::Full, m).with_bias(vec![0.0; out_size]))
        }
        GlueKind::Embedding => {
            let mut m = Matrix::zeros(vocab_len.max(1), out_size);
            for r in 0..m.rows() {
                for c in 0..out_size {
                    m.set(r, c, rng.gen_range(-INIT_SCALE..INIT_SCALE));
                }
            }
            Some(Weight::new(WeightTag::OneShot, m))
        }
        GlueKind::Direct => Some(Weight::new(WeightTag::Part, Matrix::zeros(1, DIRECT_HASH_SIZE))),
        GlueKind::Sum | GlueKind::Avg | GlueKind::Activation => None,
    }
}

impl InitCommand {
    pub async fn execute(self) -> CliResult<()> {
        let span = tracing::info_span!("init", topology = %self.topology_file.display());
        let _enter = span.enter();

        let mut model = load_model(&self.model_in)?;
        let vocab = model
            .vocab
            .clone()
            .ok_or_else(|| CliError::missing_resource("model-in carries no vocabulary; run `lm vocab` first"))?;

        let text = std::fs::read_to_string(&self.topology_file)?;
        let components = lm_compiler::compile_topology(&text)?;
        if components.is_empty() {
            return Err(CliError::invalid_args("topology file declares no components"));
        }
        if components.len() > 1 {
            info!(count = components.len(), "topology declares multiple components; this toolkit trains/scores only the first");
        }

        let tree_kind = parse_tree_kind(&self.tree_kind, self.num_classes)?;
        let tree = OutputTree::build(&vocab, tree_kind);
        let root_fanout = tree.num_children(tree.root());

        let mut rng = StdRng::seed_from_u64(self.random_seed);
        let mut built = BTreeMap::new();
        for component in components {
            let out_size = component.layers[component.output_layer as usize].size as usize;
            if out_size != root_fanout {
                return Err(CliError::invalid_args(format!(
                    "component {:?} output layer size {} does not match the output tree's root fan-out {}",
                    component.name, out_size, root_fanout
                )));
            }
            let mut weights = BTreeMap::new();
            for (gi, glue) in component.glues.iter().enumerate() {
                if let Some(w) = fresh_weight(&component, gi, vocab.len(), &mut rng) {
                    weights.insert(glue.name.clone(), w);
                }
            }
            let name = component.name.clone();
            built.insert(name, ComponentModel { graph: component, weights });
        }

        info!(components = built.len(), tree_kind = %self.tree_kind, "initialized model");
        model.tree = Some(tree);
        model.components = built;
        save_model(&model, &self.model_out)?;
        Ok(())
    }
}
