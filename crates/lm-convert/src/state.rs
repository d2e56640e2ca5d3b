//! FST state table (§3 "FST state", §4.11 reserved states).

use parking_lot::Mutex;

/// Accepts no input; the conversion's unique start state.
pub const INIT: u32 = 0;
/// Accepts `SENT_END`.
pub const FINAL: u32 = 1;
/// Root of the `<s>`-anchored n-gram subtree.
pub const SENTENCE_START: u32 = 2;
/// Root of the unanchored (any-history) subtree.
pub const WILDCARD: u32 = 3;

#[derive(Debug, Clone)]
struct StateEntry {
    word: u32,
    parent: u32,
    order: u32,
    /// `(first_child_word, target_state)` pairs, sorted by word id once set.
    children: Vec<(u32, u32)>,
}

/// All states are allocated under a single mutex so ids stay contiguous and
/// dense; once a worker holds an id, writes to that state's own entry (via
/// [`StateTable::set_children`]) need no further synchronization because no
/// other worker is ever handed the same id.
pub struct StateTable {
    states: Mutex<Vec<StateEntry>>,
}

impl StateTable {
    pub fn new() -> Self {
        let reserved = vec![
            StateEntry { word: u32::MAX, parent: INIT, order: 0, children: Vec::new() }, // INIT
            StateEntry { word: u32::MAX, parent: FINAL, order: 0, children: Vec::new() }, // FINAL
            StateEntry { word: u32::MAX, parent: SENTENCE_START, order: 0, children: Vec::new() }, // <s> root
            StateEntry { word: u32::MAX, parent: WILDCARD, order: 0, children: Vec::new() }, // wildcard root
        ];
        Self { states: Mutex::new(reserved) }
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn order_of(&self, state: u32) -> u32 {
        self.states.lock()[state as usize].order
    }

    /// Allocates a new child of `parent` reached by `word`, at `order`.
    pub fn alloc_child(&self, parent: u32, word: u32, order: u32) -> u32 {
        let mut g = self.states.lock();
        let id = g.len() as u32;
        g.push(StateEntry { word, parent, order, children: Vec::new() });
        id
    }

    /// Records the (already word-sorted) child list of an expanded state.
    pub fn set_children(&self, state: u32, children: Vec<(u32, u32)>) {
        self.states.lock()[state as usize].children = children;
    }

    /// Binary-searches `parent`'s recorded children for `word`.
    pub fn find_child(&self, parent: u32, word: u32) -> Option<u32> {
        let g = self.states.lock();
        g[parent as usize].children.binary_search_by_key(&word, |&(w, _)| w).ok().map(|i| g[parent as usize].children[i].1)
    }

    /// The root (`WILDCARD` or `SENTENCE_START`) a state's history is
    /// anchored to, plus the oldest-first sequence of words on the path
    /// from that root down to (and including) `state`.
    pub fn history(&self, state: u32) -> (u32, Vec<u32>) {
        let g = self.states.lock();
        let mut words = Vec::new();
        let mut cur = state;
        loop {
            if cur == WILDCARD || cur == SENTENCE_START {
                words.reverse();
                return (cur, words);
            }
            let entry = &g[cur as usize];
            words.push(entry.word);
            cur = entry.parent;
        }
    }

    /// Walks the child path for `words` starting at `root`; `None` if any
    /// step is missing.
    fn resolve_path(&self, root: u32, words: &[u32]) -> Option<u32> {
        let mut cur = root;
        for &w in words {
            cur = self.find_child(cur, w)?;
        }
        Some(cur)
    }

    /// Finds the back-off target for `state`: the state reached by the same
    /// root dropping the leftmost history word, recursing further if that
    /// shortened path was never expanded.
    pub fn find_backoff(&self, state: u32) -> Option<u32> {
        let (root, words) = self.history(state);
        self.find_backoff_from(root, &words)
    }

    fn find_backoff_from(&self, root: u32, words: &[u32]) -> Option<u32> {
        if words.is_empty() {
            return Some(root);
        }
        let shorter = &words[1..];
        self.resolve_path(root, shorter).or_else(|| self.find_backoff_from(root, shorter))
    }
}

impl Default for StateTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_ids_are_stable() {
        let t = StateTable::new();
        assert_eq!(t.len(), 4);
        assert_eq!(INIT, 0);
        assert_eq!(FINAL, 1);
        assert_eq!(SENTENCE_START, 2);
        assert_eq!(WILDCARD, 3);
    }

    #[test]
    fn history_accumulates_oldest_first() {
        let t = StateTable::new();
        let s1 = t.alloc_child(SENTENCE_START, 10, 1);
        let s2 = t.alloc_child(s1, 20, 2);
        let (root, words) = t.history(s2);
        assert_eq!(root, SENTENCE_START);
        assert_eq!(words, vec![10, 20]);
    }

    #[test]
    fn backoff_drops_leftmost_word_when_present() {
        let t = StateTable::new();
        let s1 = t.alloc_child(SENTENCE_START, 10, 1);
        t.set_children(SENTENCE_START, vec![(10, s1)]);
        let s2 = t.alloc_child(s1, 20, 2);
        let backoff = t.find_backoff(s2).unwrap();
        // dropping word 10 leaves just [20] from SENTENCE_START, unresolved,
        // so it recurses to the empty history, i.e. the root itself.
        assert_eq!(backoff, SENTENCE_START);
    }

    #[test]
    fn backoff_resolves_to_expanded_shorter_state() {
        let t = StateTable::new();
        let s1 = t.alloc_child(SENTENCE_START, 10, 1);
        t.set_children(SENTENCE_START, vec![(10, s1)]);
        let short = t.alloc_child(WILDCARD, 20, 1);
        t.set_children(WILDCARD, vec![(20, short)]);
        let s2 = t.alloc_child(s1, 20, 2);
        // history of s2 is anchored at SENTENCE_START, so dropping "10"
        // looks for a SENTENCE_START-anchored [20] state, which doesn't
        // exist; it recurses to SENTENCE_START itself, not the wildcard one.
        assert_eq!(t.find_backoff(s2), Some(SENTENCE_START));
    }
}
