//! Breadth-first, order-by-order WFST expansion (§4.11).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use parking_lot::Mutex;

use crate::bloom::BloomFilter;
use crate::cache::HiddenStateCache;
use crate::error::{ConvertError, Result};
use crate::select::{select_words, SelectionMethod};
use crate::state::{StateTable, FINAL, SENTENCE_START, WILDCARD};

/// The caller's neural model, abstracted down to the two operations FST
/// expansion needs: predicting next-word probabilities from a hidden state,
/// and advancing that hidden state by one consumed word. This is the
/// "generic glue abstraction" every component kind (RNN, max-ent, FFNN)
/// implements identically rather than through per-kind code paths.
pub trait ModelForward: Sync {
    /// Whether the model carries state across words; a stateless model
    /// still implements this trait (treating its "hidden state" as empty),
    /// but expansion may then fail to terminate.
    fn is_stateful(&self) -> bool;

    /// The hidden state a fresh context (wildcard root or `<s>`) starts from.
    fn initial_state(&self) -> Vec<f32>;

    /// `p(candidate | hidden)` for each of `candidates`, in order.
    fn predict(&self, hidden: &[f32], candidates: &[u32]) -> Result<Vec<f32>>;

    /// The hidden state reached after consuming `word` from `hidden`.
    fn advance(&self, hidden: &[f32], word: u32) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArcLabel {
    Word(u32),
    /// The back-off epsilon arc.
    Phi,
}

#[derive(Debug, Clone)]
pub struct FstArc {
    pub from: u32,
    pub to: u32,
    pub label: ArcLabel,
    /// `-ln(weight)`, so lower is more probable.
    pub weight: f32,
}

#[derive(Debug, Clone)]
pub struct ConvertConfig {
    pub max_gram: u32,
    pub method: SelectionMethod,
    pub num_threads: usize,
    pub cache_capacity: usize,
}

impl ConvertConfig {
    /// A config seeded from a bloom filter's stated order, when present.
    pub fn with_bloom_default(bloom: Option<&BloomFilter>, method: SelectionMethod, num_threads: usize) -> Self {
        let max_gram = bloom.map(|b| b.max_order).unwrap_or(3);
        Self { max_gram, method, num_threads, cache_capacity: 4096 }
    }
}

pub struct ConvertOutput {
    pub arcs: Vec<FstArc>,
    pub num_states: usize,
}

/// Runs the full breadth-first expansion and returns every emitted arc.
pub fn convert<M: ModelForward>(
    model: &M,
    vocab_len: u32,
    bloom: Option<&BloomFilter>,
    config: &ConvertConfig,
) -> Result<ConvertOutput> {
    if !model.is_stateful() {
        tracing::warn!("model has no persistent state; FST expansion may not terminate");
    }

    let states = StateTable::new();
    let cache = HiddenStateCache::new(config.cache_capacity);
    let arcs: Mutex<Vec<FstArc>> = Mutex::new(Vec::new());

    cache.insert(WILDCARD, model.initial_state());
    cache.insert(SENTENCE_START, model.initial_state());
    arcs.lock().push(FstArc {
        from: crate::state::INIT,
        to: SENTENCE_START,
        label: ArcLabel::Word(lm_core::SENT_END),
        weight: 0.0,
    });

    let mut frontier = vec![WILDCARD, SENTENCE_START];
    let mut order = 0u32;
    while !frontier.is_empty() && order < config.max_gram {
        order += 1;
        frontier = expand_order(model, &states, &cache, bloom, vocab_len, config, &frontier, &arcs)?;
    }

    Ok(ConvertOutput { arcs: arcs.into_inner(), num_states: states.len() })
}

fn expand_order<M: ModelForward>(
    model: &M,
    states: &StateTable,
    cache: &HiddenStateCache,
    bloom: Option<&BloomFilter>,
    vocab_len: u32,
    config: &ConvertConfig,
    frontier: &[u32],
    arcs: &Mutex<Vec<FstArc>>,
) -> Result<Vec<u32>> {
    let cursor = AtomicUsize::new(0);
    let next_states: Mutex<Vec<u32>> = Mutex::new(Vec::new());
    let failure: Mutex<Option<ConvertError>> = Mutex::new(None);

    thread::scope(|scope| {
        for _ in 0..config.num_threads.max(1) {
            scope.spawn(|| loop {
                if failure.lock().is_some() {
                    break;
                }
                let idx = cursor.fetch_add(1, Ordering::SeqCst);
                if idx >= frontier.len() {
                    break;
                }
                let state = frontier[idx];
                match expand_state(model, states, cache, bloom, vocab_len, config, state, arcs) {
                    Ok(children) => next_states.lock().extend(children),
                    Err(e) => {
                        *failure.lock() = Some(e);
                        break;
                    }
                }
            });
        }
    });

    if let Some(e) = failure.into_inner() {
        return Err(e);
    }
    Ok(next_states.into_inner())
}

#[allow(clippy::too_many_arguments)]
fn expand_state<M: ModelForward>(
    model: &M,
    states: &StateTable,
    cache: &HiddenStateCache,
    bloom: Option<&BloomFilter>,
    vocab_len: u32,
    config: &ConvertConfig,
    state: u32,
    arcs: &Mutex<Vec<FstArc>>,
) -> Result<Vec<u32>> {
    let hidden = cache.fetch(state).expect("queued state always has a cached hidden vector");
    let (root, history) = states.history(state);
    let order = states.order_of(state);

    let candidates: Vec<u32> = (0..vocab_len)
        .filter(|&w| w != lm_core::UNK)
        .filter(|&w| {
            if root == WILDCARD {
                return true;
            }
            match bloom {
                Some(bf) => {
                    let mut key = history.clone();
                    key.push(w);
                    bf.contains(&key)
                }
                None => true,
            }
        })
        .collect();

    let probs = model.predict(&hidden, &candidates)?;
    let paired: Vec<(u32, f32)> = candidates.into_iter().zip(probs).collect();
    let selected = select_words(paired, config.method);

    let sum_selected: f32 = selected.iter().map(|&(_, p)| p).sum();
    if !(0.0..=1.0).contains(&sum_selected) {
        cache.release(state);
        return Err(ConvertError::NumericalInvariant { state, sum: sum_selected });
    }

    let backoff_state = states.find_backoff(state).ok_or(ConvertError::BackoffChainBroken(state))?;
    let backoff_hidden = cache
        .fetch(backoff_state)
        .expect("back-off targets are always expanded in an earlier order");
    let selected_words: Vec<u32> = selected.iter().map(|&(w, _)| w).collect();
    let backoff_probs = model.predict(&backoff_hidden, &selected_words)?;
    let sum_backoff: f32 = backoff_probs.iter().sum();

    let num = 1.0 - sum_selected;
    let den = 1.0 - sum_backoff;
    if den <= 0.0 {
        cache.release(state);
        cache.release(backoff_state);
        return Err(ConvertError::NumericalInvariant { state, sum: den });
    }

    let mut local_arcs = Vec::with_capacity(selected.len() + 1);
    let mut children = Vec::new();
    let mut to_expand = Vec::new();
    for (w, p) in selected {
        if p <= 0.0 {
            continue;
        }
        let target = if w == lm_core::SENT_END {
            FINAL
        } else {
            let new_hidden = model.advance(&hidden, w)?;
            let child = states.alloc_child(state, w, order + 1);
            cache.insert(child, new_hidden);
            children.push((w, child));
            if order + 1 < config.max_gram {
                to_expand.push(child);
            }
            child
        };
        local_arcs.push(FstArc { from: state, to: target, label: ArcLabel::Word(w), weight: -p.ln() });
    }
    local_arcs.push(FstArc { from: state, to: backoff_state, label: ArcLabel::Phi, weight: -(num / den).ln() });

    children.sort_by_key(|&(w, _)| w);
    states.set_children(state, children);
    arcs.lock().extend(local_arcs);

    cache.release(state);
    cache.release(backoff_state);
    Ok(to_expand)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A tiny stateless uniform model over a fixed vocabulary, for exercising
    /// the expansion plumbing without a real neural forward pass.
    struct UniformModel {
        vocab_len: u32,
    }

    impl ModelForward for UniformModel {
        fn is_stateful(&self) -> bool {
            false
        }
        fn initial_state(&self) -> Vec<f32> {
            Vec::new()
        }
        fn predict(&self, _hidden: &[f32], candidates: &[u32]) -> Result<Vec<f32>> {
            let p = 1.0 / (self.vocab_len.max(1) as f32);
            Ok(vec![p; candidates.len()])
        }
        fn advance(&self, hidden: &[f32], _word: u32) -> Result<Vec<f32>> {
            Ok(hidden.to_vec())
        }
    }

    #[test]
    fn conversion_terminates_and_emits_init_edge() {
        let model = UniformModel { vocab_len: 4 };
        let config = ConvertConfig { max_gram: 2, method: SelectionMethod::Majority { threshold: 0.9 }, num_threads: 2, cache_capacity: 64 };
        let out = convert(&model, 4, None, &config).unwrap();
        assert!(out.arcs.iter().any(|a| a.from == crate::state::INIT && a.to == SENTENCE_START));
        assert!(out.num_states > 4);
    }
}
