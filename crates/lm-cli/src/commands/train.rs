//! `lm train <train-text> <model-in> <model-out>`: one epoch over a corpus,
//! updating the model's single component in place (§4.8, §4.9).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use lm_runtime::driver::{run_worker, Cancellation, Mode};
use lm_runtime::pool::PoolQueue;
use lm_runtime::reader::{spawn as spawn_reader, ReaderConfig};
use lm_runtime::weight_updater::UpdateParams;
use tracing::info;

use crate::error::{CliError, CliResult};

use super::support::{build_glue_updaters, extract_weights, load_model, primary_component, require_flat_tree, save_model_encoded, LmUpdater};

#[derive(Args, Debug)]
pub struct TrainCommand {
    /// Whitespace-tokenized training corpus, one sentence per line.
    pub train_text: PathBuf,

    /// Model carrying vocab, output tree, and an initialized component
    /// (from `lm init`).
    pub model_in: PathBuf,

    /// Where to write the trained model.
    pub model_out: PathBuf,

    /// Worker thread count. Accepted for forward compatibility but this
    /// toolkit's weight updater only supports one writer: training always
    /// runs single-threaded regardless of this value (see `commands::support`).
    #[arg(long, default_value_t = 1)]
    pub num_threads: u32,

    /// Sentences the reader pulls per pool.
    #[arg(long, default_value_t = 10_000)]
    pub epoch_size: usize,

    /// Shuffle each pool before handing it to the worker.
    #[arg(long)]
    pub shuffle: bool,

    /// Reader shuffle seed.
    #[arg(long, default_value_t = 1)]
    pub random_seed: u64,

    /// Parse and wire everything up but skip the actual weight update.
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long, default_value_t = 0.1)]
    pub learning_rate: f32,
    #[arg(long, default_value_t = 0.0)]
    pub l2: f32,
    #[arg(long, default_value_t = 0.0)]
    pub momentum: f32,
    #[arg(long, default_value_t = 1)]
    pub l2_gap: u32,
    #[arg(long, default_value_t = 0)]
    pub sync_size: u32,

    /// Accepted for CLI-surface parity with the reference trainer; this
    /// toolkit's `lm-storage` format is always binary (see DESIGN.md), so
    /// the flag has no effect.
    #[arg(long)]
    pub binary: bool,

    /// Optional path to write one `word_count total_logp` line per epoch.
    #[arg(long)]
    pub debug_file: Option<PathBuf>,

    /// Encode the saved weights short-quantized and zero-run-compressed
    /// instead of plain (§4.1/§4.10); trades a small numeric error for a
    /// smaller model file.
    #[arg(long)]
    pub quantize: bool,
}

impl TrainCommand {
    pub async fn execute(self) -> CliResult<()> {
        let span = tracing::info_span!("train", corpus = %self.train_text.display());
        let _enter = span.enter();

        if self.num_threads > 1 {
            tracing::warn!(requested = self.num_threads, "training runs single-threaded; WeightUpdater has no shared-weight pull mechanism");
        }

        let mut model = load_model(&self.model_in)?;
        let vocab = Arc::new(
            model.vocab.clone().ok_or_else(|| CliError::missing_resource("model-in carries no vocabulary"))?,
        );
        let tree = model.tree.clone().ok_or_else(|| CliError::missing_resource("model-in carries no output tree; run `lm init` first"))?;
        require_flat_tree(&tree, vocab.len())?;

        let (name, component_model) = primary_component(&model)?;
        let name = name.to_string();
        let component = component_model.graph.clone();
        let weights = component_model.weights.clone();

        let params = UpdateParams::new(self.learning_rate, self.l2, self.momentum, self.l2_gap, self.sync_size)?;
        let mut glue_updaters = build_glue_updaters(&component, &weights, params);

        let empty = Arc::new(PoolQueue::new(4));
        let full = Arc::new(PoolQueue::new(4));
        empty.seed_empty(4);

        let reader_config = ReaderConfig {
            path: self.train_text.clone(),
            epoch_size: self.epoch_size,
            shuffle: self.shuffle,
            mini_batch: 1,
            drop_empty_line: true,
            rand_seed: self.random_seed,
            num_workers: 1,
        };
        let reader_handle = spawn_reader(reader_config, vocab.clone(), empty.clone(), full.clone());

        let cu = lm_runtime::component_updater::ComponentUpdater::new(&component, std::mem::take(&mut glue_updaters), 50.0);
        let updater = LmUpdater::new(cu, &tree);
        let cancel = Cancellation::new();
        let (stats, updater) = run_worker(updater, Mode::Train, &full, &empty, &cancel)?;
        glue_updaters = updater.into_component_updater().into_glue_updaters();

        reader_handle.join().map_err(|_| CliError::config("reader thread panicked"))??;

        info!(words = stats.words, sents = stats.sents, entropy = stats.entropy(), perplexity = stats.perplexity(), "training epoch complete");

        if let Some(path) = &self.debug_file {
            std::fs::write(path, format!("{} {:.6}\n", stats.words, stats.logp))?;
        }

        if !self.dry_run {
            let trained_weights = extract_weights(&component, &glue_updaters);
            model.components.get_mut(&name).expect("primary component name still present").weights = trained_weights;
            let encoding = if self.quantize {
                lm_math::NumericFlags::SHORT_QUANTIZED.union(lm_math::NumericFlags::ZERO_COMPRESSED)
            } else {
                lm_math::NumericFlags::PLAIN
            };
            save_model_encoded(&model, &self.model_out, encoding)?;
        } else {
            info!("dry run: model not written");
        }

        Ok(())
    }
}
