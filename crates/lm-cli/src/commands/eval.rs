//! `lm eval <test-text> <model-in> [log-out]`: scores held-out text against
//! a trained model and reports entropy/perplexity (§4.9).

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Args;
use lm_core::tree::OutputTree;
use lm_runtime::component_updater::ComponentUpdater;
use lm_runtime::driver::{run_worker, Cancellation, Mode};
use lm_runtime::output_updater::OutputUpdater;
use lm_runtime::pool::PoolQueue;
use lm_runtime::reader::{spawn as spawn_reader, ReaderConfig};
use lm_runtime::weight_updater::UpdateParams;
use tracing::info;

use crate::error::{CliError, CliResult};

use super::support::{build_glue_updaters, load_model, primary_component, require_flat_tree};

#[derive(Args, Debug)]
pub struct EvalCommand {
    /// Whitespace-tokenized held-out corpus, one sentence per line.
    pub test_text: PathBuf,

    /// Trained model (vocab, output tree, component weights).
    pub model_in: PathBuf,

    /// Optional path to write one `sentence\tlogprob` line per input sentence.
    pub log_out: Option<PathBuf>,

    /// Base eval scores are reported in, applied on top of the natural-log
    /// accumulator (`entropy`/`perplexity` stay base-2/base-e per §4.9;
    /// this only affects `log_out`'s per-sentence column).
    #[arg(long)]
    pub out_log_base: Option<f64>,

    /// Reader pool size; eval mutates no shared state so pulling several
    /// pools at once ahead of a single scoring pass is safe.
    #[arg(long, default_value_t = 10_000)]
    pub epoch_size: usize,

    /// Also print each sentence's converted log-probability to stdout, not
    /// just to `log_out`.
    #[arg(long)]
    pub print_sent_prob: bool,
}

/// Scores one sentence at a time against a single component's single
/// Flat-tree root node, same contract as `support::LmUpdater`, but also
/// records each sentence's log-probability for `--log-out`.
struct EvalUpdater<'c, 't> {
    cu: ComponentUpdater<'c>,
    ou: OutputUpdater<'t>,
    tree: &'t OutputTree,
    pending: VecDeque<Vec<u32>>,
    sentence_logs: Arc<Mutex<Vec<(Vec<u32>, f64)>>>,
}

impl<'c, 't> lm_runtime::driver::Updater for EvalUpdater<'c, 't> {
    fn feed(&mut self, words: &[Vec<u32>]) {
        self.pending.extend(words.iter().cloned());
    }

    fn steppable(&self) -> bool {
        !self.pending.is_empty()
    }

    fn step(&mut self, _mode: Mode) -> lm_runtime::Result<(u64, u64, f64)> {
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
            prev = word;
        }

        self.sentence_logs.lock().expect("sentence log mutex poisoned").push((sentence.clone(), logp));
        Ok((sentence.len() as u64, 1, logp))
    }

    fn finalize(&mut self) -> lm_runtime::Result<(u64, u64, f64)> {
        Ok((0, 0, 0.0))
    }
}

impl EvalCommand {
    pub async fn execute(self) -> CliResult<()> {
        let span = tracing::info_span!("eval", corpus = %self.test_text.display());
        let _enter = span.enter();

        let model = load_model(&self.model_in)?;
        let vocab = Arc::new(model.vocab.clone().ok_or_else(|| CliError::missing_resource("model-in carries no vocabulary"))?);
        let tree = model.tree.clone().ok_or_else(|| CliError::missing_resource("model-in carries no output tree"))?;
        require_flat_tree(&tree, vocab.len())?;
        let (_name, component_model) = primary_component(&model)?;
        let component = component_model.graph.clone();

        // Eval never updates weights; a zero-learning-rate updater is just a
        // read-only wrapper to share `WeightUpdater`'s forward-pass math.
        let params = UpdateParams { learning_rate: 1.0, l2: 0.0, momentum: 0.0, l2_gap: 1, sync_size: 0 };
        let glue_updaters = build_glue_updaters(&component, &component_model.weights, params);

        let empty = Arc::new(PoolQueue::new(4));
        let full = Arc::new(PoolQueue::new(4));
        empty.seed_empty(4);

        let reader_config = ReaderConfig {
            path: self.test_text.clone(),
            epoch_size: self.epoch_size,
            shuffle: false,
            mini_batch: 1,
            drop_empty_line: true,
            rand_seed: 0,
            num_workers: 1,
        };
        let reader_handle = spawn_reader(reader_config, vocab.clone(), empty.clone(), full.clone());

        let sentence_logs = Arc::new(Mutex::new(Vec::new()));
        let cu = ComponentUpdater::new(&component, glue_updaters, 50.0);
        let updater = EvalUpdater { cu, ou: OutputUpdater::new(&tree), tree: &tree, pending: VecDeque::new(), sentence_logs: sentence_logs.clone() };

        let cancel = Cancellation::new();
        let (stats, _updater) = run_worker(updater, Mode::Eval, &full, &empty, &cancel)?;

        reader_handle.join().map_err(|_| CliError::config("reader thread panicked"))??;

        info!(words = stats.words, sents = stats.sents, entropy = stats.entropy(), perplexity = stats.perplexity(), "evaluation complete");
        println!("words={} sents={} entropy={:.6} perplexity={:.6}", stats.words, stats.sents, stats.entropy(), stats.perplexity());

        if self.log_out.is_some() || self.print_sent_prob {
            let base = self.out_log_base.unwrap_or(std::f64::consts::E);
            let logs = sentence_logs.lock().expect("sentence log mutex poisoned");
            let mut out = String::new();
            for (words, logp) in logs.iter() {
                let converted = logp / base.ln();
                let text = words.iter().map(|w| vocab.get_word(*w).unwrap_or("<unk>").to_string()).collect::<Vec<_>>().join(" ");
                out.push_str(&format!("{text}\t{converted:.6}\n"));
            }
            if self.print_sent_prob {
                print!("{out}");
            }
            if let Some(path) = &self.log_out {
                std::fs::write(path, out)?;
            }
        }

        Ok(())
    }
}
