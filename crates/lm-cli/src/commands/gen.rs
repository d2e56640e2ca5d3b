//! `lm gen <model-in> <num-sents>`: samples sentences from a trained model
//! (§4.9's Gen mode).

use std::path::PathBuf;

use clap::Args;
use lm_runtime::component_updater::ComponentUpdater;
use lm_runtime::driver::{run_generate, validate_gen_mode};
use lm_runtime::output_updater::OutputUpdater;
use lm_runtime::weight_updater::{UpdateParams, WeightUpdater};
use rand::RngCore;
use tracing::info;

use crate::error::{CliError, CliResult};

use super::support::{load_model, primary_component, require_flat_tree};

#[derive(Args, Debug)]
pub struct GenCommand {
    /// Trained model (vocab, output tree, component weights).
    pub model_in: PathBuf,

    /// Number of sentences to generate.
    pub num_sents: u32,

    /// Random seed. Unset uses the process's own entropy source.
    #[arg(long)]
    pub random_seed: Option<u64>,

    /// Rejection-sampling attempts per word before falling back to
    /// whatever the last draw produced (passed through to
    /// [`lm_runtime::output_updater::OutputUpdater::sample`]).
    #[arg(long, default_value_t = 10)]
    pub max_attempts: u32,

    /// Hard cap on sentence length, guarding against a degenerate model
    /// that never samples `SENT_END`.
    #[arg(long, default_value_t = 200)]
    pub max_len: usize,

    /// One forced prefix per line, whitespace-tokenized; out-of-vocabulary
    /// tokens map to `UNK`. The Nth sentence is seeded with the Nth prefix
    /// (if any) before sampling continues freely.
    #[arg(long)]
    pub prefix_file: Option<PathBuf>,
}

impl GenCommand {
    pub async fn execute(self) -> CliResult<()> {
        let span = tracing::info_span!("gen", model = %self.model_in.display());
        let _enter = span.enter();

        let model = load_model(&self.model_in)?;
        let vocab = model.vocab.clone().ok_or_else(|| CliError::missing_resource("model-in carries no vocabulary"))?;
        let tree = model.tree.clone().ok_or_else(|| CliError::missing_resource("model-in carries no output tree"))?;
        let (_name, component_model) = primary_component(&model)?;
        let component = &component_model.graph;

        validate_gen_mode(std::slice::from_ref(component))?;
        require_flat_tree(&tree, vocab.len())?;

        let params = UpdateParams { learning_rate: 1.0, l2: 0.0, momentum: 0.0, l2_gap: 1, sync_size: 0 };
        let mut glue_updaters = std::collections::HashMap::new();
        for (gi, glue) in component.glues.iter().enumerate() {
            if let Some(w) = component_model.weights.get(&glue.name) {
                glue_updaters.insert(gi as u32, WeightUpdater::new(w.clone(), params));
            }
        }

        let mut cu = ComponentUpdater::new(component, glue_updaters, 50.0);
        let ou = OutputUpdater::new(&tree);
        let max_len = self.max_len;
        let max_attempts = self.max_attempts;
        let root = tree.root();

        let prefixes: Vec<Vec<u32>> = match &self.prefix_file {
            Some(path) => std::fs::read_to_string(path)?
                .lines()
                .map(|line| line.split_whitespace().map(|tok| vocab.get_id(tok).unwrap_or(lm_core::UNK)).collect())
                .collect(),
            None => Vec::new(),
        };

        let mut prev = lm_core::SENT_END;
        let mut len = 0usize;
        let mut sent_idx = 0usize;
        let mut pos = 0usize;
        let sentences = run_generate(self.num_sents, self.random_seed, |rng: &mut dyn RngCore| {
            if len >= max_len {
                len = 0;
                pos = 0;
                sent_idx += 1;
                prev = lm_core::SENT_END;
                return Ok(lm_core::SENT_END);
            }
            cu.set_input(vec![prev as f32]);
            cu.forward()?;
            let forced = prefixes.get(sent_idx).and_then(|p| p.get(pos)).copied();
            let word = match forced {
                Some(w) => w,
                None => {
                    let scores = cu.output();
                    let sampled = ou.sample(root, scores, rng, max_attempts).unwrap_or(lm_core::SENT_END);
                    tree.leaf_to_word(sampled).unwrap_or(sampled)
                }
            };
            pos += 1;
            if word == lm_core::SENT_END {
                len = 0;
                pos = 0;
                sent_idx += 1;
                prev = lm_core::SENT_END;
            } else {
                len += 1;
                prev = word;
            }
            Ok(word)
        })?;

        info!(sentences = sentences.len(), "generated sentences");
        for sentence in &sentences {
            let text = sentence.iter().map(|w| vocab.get_word(*w).unwrap_or("<unk>")).collect::<Vec<_>>().join(" ");
            println!("{text}");
        }

        Ok(())
    }
}
