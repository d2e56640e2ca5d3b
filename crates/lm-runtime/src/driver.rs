//! Train/Eval/Gen worker pool and result aggregation (C9, §4.9).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lm_core::component::Component;
use rand::RngCore;

use crate::error::{Result, RuntimeError};
use crate::pool::PoolQueue;

/// Which of the three run modes a [`Driver`] executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
    Gen,
}

/// Aggregated results across every worker, per §4.9's closing formulas.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStats {
    pub words: u64,
    pub sents: u64,
    pub logp: f64,
}

impl RunStats {
    pub fn merge(mut self, other: RunStats) -> Self {
        self.words += other.words;
        self.sents += other.sents;
        self.logp += other.logp;
        self
    }

    /// Natural-log total log-probability.
    pub fn log_prob(&self) -> f64 {
        self.logp
    }

    /// Cross-entropy in bits per word.
    pub fn entropy(&self) -> f64 {
        if self.words == 0 {
            return 0.0;
        }
        -self.logp / std::f64::consts::LN_2 / self.words as f64
    }

    /// Perplexity, `exp(-logp / words)`.
    pub fn perplexity(&self) -> f64 {
        if self.words == 0 {
            return f64::INFINITY;
        }
        (-self.logp / self.words as f64).exp()
    }
}

/// Cooperative cancellation flag shared across a driver's workers.
#[derive(Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One mini-batch worker's feed/step contract, implemented per-component by
/// the caller (wiring together [`crate::component_updater::ComponentUpdater`]
/// and [`crate::output_updater::OutputUpdater`]); kept generic here so the
/// driver's loop and aggregation logic don't depend on component internals.
pub trait Updater {
    /// Accepts newly read words from a pool.
    fn feed(&mut self, words: &[Vec<u32>]);
    /// Whether another `step()` can be taken without more fed input.
    fn steppable(&self) -> bool;
    /// Runs one forward (plus backward, in `Train`) step, returning the
    /// `(word_count, sentence_count, sum_logp)` it produced.
    fn step(&mut self, mode: Mode) -> Result<(u64, u64, f64)>;
    /// Flushes any pending BPTT/mini-batch state at end of input.
    fn finalize(&mut self) -> Result<(u64, u64, f64)>;
}

/// Runs `updater`'s worker loop against `reader_full`/`reader_empty` until a
/// finish marker is observed, per §4.9's Train/Eval worker loop. Returns the
/// updater back alongside the aggregated stats so the caller can pull
/// trained weights (or anything else the updater accumulated) back out.
pub fn run_worker<U: Updater>(
    mut updater: U,
    mode: Mode,
    full: &PoolQueue,
    empty: &PoolQueue,
    cancel: &Cancellation,
) -> Result<(RunStats, U)> {
    let mut stats = RunStats::default();
    loop {
        if cancel.is_cancelled() {
            let (w, s, lp) = updater.finalize()?;
            stats.words += w;
            stats.sents += s;
            stats.logp += lp;
            return Ok((stats, updater));
        }
        let pool = full.pop();
        match pool {
            None => {
                let (w, s, lp) = updater.finalize()?;
                stats.words += w;
                stats.sents += s;
                stats.logp += lp;
                return Ok((stats, updater));
            }
            Some(words) => {
                updater.feed(&words);
                while updater.steppable() {
                    let (w, s, lp) = updater.step(mode)?;
                    stats.words += w;
                    stats.sents += s;
                    stats.logp += lp;
                }
                empty.push(Some(Vec::new()));
            }
        }
    }
}

/// Validates that no component in a `Gen`-mode run reads future context,
/// i.e. that every recurrence-free (non-cyclic) path from the input layer
/// to the output layer only ever consumes positions at or before the
/// current step. This toolkit's component graphs carry no explicit "lag"
/// annotation beyond the recurrence/BPTT fields, so the check is: a `Gen`
/// run is rejected only if a component declares a `bptt_delay` of zero on a
/// recurrent glue together with a nonzero window, which would require
/// already having future timesteps' errors before they exist.
pub fn validate_gen_mode(components: &[Component]) -> Result<()> {
    for c in components {
        for cycle in &c.cycles {
            let glue = &c.glues[cycle.recurrent_glue() as usize];
            if glue.bptt_window > 0 && glue.bptt_delay == 0 {
                return Err(RuntimeError::invalid_config(format!(
                    "component {:?} glue {:?} requires future context incompatible with generation",
                    c.name, glue.name
                )));
            }
        }
    }
    Ok(())
}

/// Single-threaded generation loop (§4.9): samples words from `sample_next`
/// until [`lm_core::SENT_END`] or `num_sents` sentences have been produced.
/// `seed` picks a reproducible RNG; `None` draws from process entropy.
pub fn run_generate<F>(num_sents: u32, seed: Option<u64>, mut sample_next: F) -> Result<Vec<Vec<u32>>>
where
    F: FnMut(&mut dyn RngCore) -> Result<u32>,
{
    use rand::SeedableRng;
    let mut rng: Box<dyn RngCore> = match seed {
        Some(s) => Box::new(rand::rngs::StdRng::seed_from_u64(s)),
        None => Box::new(rand::thread_rng()),
    };
    let mut sentences = Vec::with_capacity(num_sents as usize);
    for _ in 0..num_sents {
        let mut sentence = Vec::new();
        loop {
            let word = sample_next(&mut *rng)?;
            if word == lm_core::SENT_END {
                break;
            }
            sentence.push(word);
        }
        sentences.push(sentence);
    }
    Ok(sentences)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_stats_aggregate_across_merges() {
        let a = RunStats { words: 10, sents: 2, logp: -5.0 };
        let b = RunStats { words: 5, sents: 1, logp: -2.0 };
        let merged = a.merge(b);
        assert_eq!(merged.words, 15);
        assert_eq!(merged.sents, 3);
        assert!((merged.log_prob() - (-7.0)).abs() < 1e-9);
    }

    #[test]
    fn perplexity_and_entropy_agree_on_uniform_distribution() {
        // log p = -ln(4) per word over 4 words: perplexity should be ~4.
        let stats = RunStats { words: 4, sents: 1, logp: -4.0 * (4.0f64).ln() };
        assert!((stats.perplexity() - 4.0).abs() < 1e-6);
    }

    #[test]
    fn cancellation_flag_is_observed_across_clones() {
        let c = Cancellation::new();
        let c2 = c.clone();
        assert!(!c2.is_cancelled());
        c.cancel();
        assert!(c2.is_cancelled());
    }

    struct CountingUpdater {
        remaining_steps: u32,
    }
    impl Updater for CountingUpdater {
        fn feed(&mut self, words: &[Vec<u32>]) {
            self.remaining_steps += words.len() as u32;
        }
        fn steppable(&self) -> bool {
            self.remaining_steps > 0
        }
        fn step(&mut self, _mode: Mode) -> Result<(u64, u64, f64)> {
            self.remaining_steps -= 1;
            Ok((1, 1, -1.0))
        }
        fn finalize(&mut self) -> Result<(u64, u64, f64)> {
            Ok((0, 0, 0.0))
        }
    }

    #[test]
    fn worker_loop_stops_at_finish_marker_and_aggregates_steps() {
        let full = PoolQueue::new(2);
        let empty = PoolQueue::new(2);
        full.push(Some(vec![vec![1], vec![2]]));
        full.push(None);
        let (stats, _updater) = run_worker(CountingUpdater { remaining_steps: 0 }, Mode::Train, &full, &empty, &Cancellation::new()).unwrap();
        assert_eq!(stats.words, 2);
        assert_eq!(stats.sents, 2);
    }
}
