//! Candidate selection methods (§4.11).

/// Which words survive at a state, given their probabilities.
#[derive(Debug, Clone, Copy)]
pub enum SelectionMethod {
    /// Keep every word whose log-probability is within `beam` of the top.
    Beam { beam: f32 },
    /// Sort by probability descending; keep the shortest prefix whose
    /// cumulative probability reaches `threshold`.
    Majority { threshold: f32 },
}

/// Selects from `candidates` (word id, probability) pairs, returning the
/// survivors sorted by ascending word id (the order children are stored in).
pub fn select_words(mut candidates: Vec<(u32, f32)>, method: SelectionMethod) -> Vec<(u32, f32)> {
    if candidates.is_empty() {
        return candidates;
    }
    let selected = match method {
        SelectionMethod::Beam { beam } => {
            let top = candidates.iter().map(|&(_, p)| p).fold(0.0f32, f32::max);
            let log_top = top.max(f32::MIN_POSITIVE).ln();
            candidates
                .into_iter()
                .filter(|&(_, p)| log_top - p.max(f32::MIN_POSITIVE).ln() <= beam)
                .collect()
        }
        SelectionMethod::Majority { threshold } => {
            candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
            let mut cumulative = 0.0f32;
            let mut kept = Vec::new();
            for pair in candidates {
                if cumulative >= threshold && !kept.is_empty() {
                    break;
                }
                cumulative += pair.1;
                kept.push(pair);
            }
            kept
        }
    };
    let mut selected = selected;
    selected.sort_by_key(|&(w, _)| w);
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beam_keeps_near_top_candidates() {
        let candidates = vec![(1, 0.5), (2, 0.49), (3, 0.001)];
        let kept = select_words(candidates, SelectionMethod::Beam { beam: 0.1 });
        assert_eq!(kept.iter().map(|&(w, _)| w).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn majority_stops_once_threshold_reached() {
        let candidates = vec![(1, 0.6), (2, 0.3), (3, 0.1)];
        let kept = select_words(candidates, SelectionMethod::Majority { threshold: 0.8 });
        assert_eq!(kept.iter().map(|&(w, _)| w).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn majority_always_keeps_at_least_one() {
        let candidates = vec![(1, 0.01), (2, 0.005)];
        let kept = select_words(candidates, SelectionMethod::Majority { threshold: 0.001 });
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].0, 1);
    }
}
