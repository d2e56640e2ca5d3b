//! `lm converter <model-in> <fst-out>`: expands a trained model into a
//! weighted FST text file (§4.11).

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Args;
use lm_convert::{ArcLabel, BloomFilter, ConvertConfig, ModelForward, SelectionMethod};
use lm_core::component::Component;
use lm_core::weight::Weight;
use lm_runtime::component_updater::ComponentUpdater;
use lm_runtime::weight_updater::{UpdateParams, WeightUpdater};
use tracing::info;

use crate::error::{CliError, CliResult};

use super::support::{load_model, primary_component, require_flat_tree};

#[derive(Args, Debug)]
pub struct ConverterCommand {
    /// Trained model (vocab, flat output tree, component weights).
    pub model_in: PathBuf,

    /// Where to write the text FST (`src dst ilabel olabel weight` per
    /// line, final states on their own `state` line; `<phi>` is written
    /// as word id `vocab_len + 1` per the wildcard back-off convention).
    pub fst_out: PathBuf,

    /// Maximum n-gram order to expand.
    #[arg(long, default_value_t = 3)]
    pub max_gram: u32,

    /// Optional bloom filter dump gating which n-grams are expanded.
    #[arg(long)]
    pub bloom_filter_file: Option<PathBuf>,

    /// `beam` or `majority`.
    #[arg(long, default_value = "beam")]
    pub word_selection_method: String,

    /// Beam width (nats) for `beam`, or cumulative-probability cutoff for
    /// `majority`.
    #[arg(long, default_value_t = 5.0)]
    pub threshold: f64,

    /// Worker thread count for the breadth-first expansion.
    #[arg(long, default_value_t = 1)]
    pub num_threads: usize,

    /// Optional path to dump `id\tword` symbol pairs covering the vocabulary
    /// plus the `<eps>`/`<phi>` reserved labels.
    #[arg(long)]
    pub word_syms_file: Option<PathBuf>,

    /// Optional path to dump `id\tstate` lines, one per FST state (states
    /// carry no name beyond their numeric id in this converter).
    #[arg(long)]
    pub state_syms_file: Option<PathBuf>,

    /// Optional path to list every state a `<phi>` back-off arc originates
    /// from, one id per line.
    #[arg(long)]
    pub wildcard_state_file: Option<PathBuf>,

    /// Write output labels as symbols (`word`/`<phi>`) instead of numeric
    /// ids in the text FST.
    #[arg(long)]
    pub print_syms: bool,
}

/// Adapts one component + its output tree's root-softmax scoring (the same
/// previous-word-as-context contract `commands::support::LmUpdater` uses)
/// to [`lm_convert::ModelForward`]. Each call builds a fresh, independent
/// [`ComponentUpdater`] from cloned weights so `predict`/`advance` are safe
/// to call concurrently from `lm_convert::convert`'s worker threads without
/// any shared mutable state.
struct CliModelForward<'a> {
    component: &'a Component,
    weights: &'a std::collections::BTreeMap<String, Weight>,
}

impl<'a> CliModelForward<'a> {
    fn forward_scores(&self, hidden: &[f32]) -> lm_convert::Result<Vec<f32>> {
        let mut glue_updaters = HashMap::new();
        let params = UpdateParams { learning_rate: 1.0, l2: 0.0, momentum: 0.0, l2_gap: 1, sync_size: 0 };
        for (gi, glue) in self.component.glues.iter().enumerate() {
            if let Some(w) = self.weights.get(&glue.name) {
                glue_updaters.insert(gi as u32, WeightUpdater::new(w.clone(), params));
            }
        }
        let mut cu = ComponentUpdater::new(self.component, glue_updaters, 50.0);
        cu.set_input(hidden.to_vec());
        cu.forward().map_err(|e| lm_convert::ConvertError::Forward(e.to_string()))?;
        Ok(cu.output().to_vec())
    }
}

impl<'a> ModelForward for CliModelForward<'a> {
    fn is_stateful(&self) -> bool {
        true
    }

    fn initial_state(&self) -> Vec<f32> {
        vec![lm_core::SENT_END as f32]
    }

    fn predict(&self, hidden: &[f32], candidates: &[u32]) -> lm_convert::Result<Vec<f32>> {
        let scores = self.forward_scores(hidden)?;
        let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let mut exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
        let sum: f32 = exps.iter().sum::<f32>().max(f32::MIN_POSITIVE);
        for e in exps.iter_mut() {
            *e /= sum;
        }
        Ok(candidates.iter().map(|&c| exps.get(c as usize).copied().unwrap_or(0.0)).collect())
    }

    fn advance(&self, _hidden: &[f32], word: u32) -> lm_convert::Result<Vec<f32>> {
        Ok(vec![word as f32])
    }
}

fn parse_selection_method(name: &str, threshold: f64) -> CliResult<SelectionMethod> {
    match name.to_ascii_lowercase().as_str() {
        "beam" => Ok(SelectionMethod::Beam { beam: threshold as f32 }),
        "majority" => Ok(SelectionMethod::Majority { threshold: threshold as f32 }),
        other => Err(CliError::invalid_args(format!("unknown word selection method {other:?} (expected beam or majority)"))),
    }
}

fn write_fst(path: &PathBuf, output: &lm_convert::ConvertOutput, vocab: &lm_core::vocab::Vocab, print_syms: bool) -> CliResult<()> {
    let phi_label = vocab.len() as u32 + 1;
    let mut text = String::new();
    for arc in &output.arcs {
        let olabel = match arc.label {
            ArcLabel::Word(w) => w,
            ArcLabel::Phi => phi_label,
        };
        if print_syms {
            let sym = match arc.label {
                ArcLabel::Word(w) => vocab.get_word(w).unwrap_or("<unk>").to_string(),
                ArcLabel::Phi => "<phi>".to_string(),
            };
            text.push_str(&format!("{}\t{}\t{sym}\t{sym}\t{:.6}\n", arc.from, arc.to, arc.weight));
        } else {
            text.push_str(&format!("{}\t{}\t{}\t{}\t{:.6}\n", arc.from, arc.to, olabel, olabel, arc.weight));
        }
    }
    text.push_str(&format!("{}\n", lm_convert::FINAL));
    std::fs::write(path, text)?;
    Ok(())
}

fn write_word_syms(path: &PathBuf, vocab: &lm_core::vocab::Vocab) -> CliResult<()> {
    let mut text = String::from("<eps>\t0\n");
    for id in 0..vocab.len() as u32 {
        if let Some(word) = vocab.get_word(id) {
            text.push_str(&format!("{word}\t{id}\n"));
        }
    }
    text.push_str(&format!("<phi>\t{}\n", vocab.len() as u32 + 1));
    std::fs::write(path, text)?;
    Ok(())
}

fn write_state_syms(path: &PathBuf, num_states: usize) -> CliResult<()> {
    let mut text = String::new();
    for id in 0..num_states {
        text.push_str(&format!("{id}\tstate{id}\n"));
    }
    std::fs::write(path, text)?;
    Ok(())
}

fn write_wildcard_states(path: &PathBuf, output: &lm_convert::ConvertOutput) -> CliResult<()> {
    let mut seen = std::collections::BTreeSet::new();
    for arc in &output.arcs {
        if matches!(arc.label, ArcLabel::Phi) {
            seen.insert(arc.from);
        }
    }
    let text = seen.into_iter().map(|id| id.to_string()).collect::<Vec<_>>().join("\n");
    std::fs::write(path, text)?;
    Ok(())
}

impl ConverterCommand {
    pub async fn execute(self) -> CliResult<()> {
        let span = tracing::info_span!("converter", model = %self.model_in.display());
        let _enter = span.enter();

        let model = load_model(&self.model_in)?;
        let vocab = model.vocab.clone().ok_or_else(|| CliError::missing_resource("model-in carries no vocabulary"))?;
        let tree = model.tree.clone().ok_or_else(|| CliError::missing_resource("model-in carries no output tree"))?;
        require_flat_tree(&tree, vocab.len())?;
        let (_name, component_model) = primary_component(&model)?;

        let bloom = match &self.bloom_filter_file {
            Some(_path) => {
                tracing::warn!("--bloom-filter-file is accepted but bloom filter dumps aren't a stored model artifact yet; expansion runs unfiltered");
                None
            }
            None => None::<BloomFilter>,
        };

        let method = parse_selection_method(&self.word_selection_method, self.threshold)?;
        let mut config = ConvertConfig::with_bloom_default(bloom.as_ref(), method, self.num_threads.max(1));
        config.max_gram = self.max_gram;

        let forward = CliModelForward { component: &component_model.graph, weights: &component_model.weights };
        let output = lm_convert::convert(&forward, vocab.len() as u32, bloom.as_ref(), &config)?;

        info!(arcs = output.arcs.len(), states = output.num_states, "converted model to FST");
        write_fst(&self.fst_out, &output, &vocab, self.print_syms)?;

        if let Some(path) = &self.word_syms_file {
            write_word_syms(path, &vocab)?;
        }
        if let Some(path) = &self.state_syms_file {
            write_state_syms(path, output.num_states)?;
        }
        if let Some(path) = &self.wildcard_state_file {
            write_wildcard_states(path, &output)?;
        }

        Ok(())
    }
}
