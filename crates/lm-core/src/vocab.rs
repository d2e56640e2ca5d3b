//! Word⇄id bijection (C2).

use std::collections::HashMap;
use std::io::Read;

/// Reserved id for the sentence-end token.
pub const SENT_END: u32 = 0;
/// Reserved id for the unknown-word token.
pub const UNK: u32 = 1;

const SENT_END_STR: &str = "</s>";
const UNK_STR: &str = "<unk>";

/// A word↔id bijection with per-id frequency counts.
///
/// `SENT_END` is always id 0 and `UNK` is always id 1, even on an empty
/// vocabulary; [`Vocab::learn`] only ever appends after those two.
#[derive(Debug, Clone)]
pub struct Vocab {
    words: Vec<String>,
    counts: Vec<u64>,
    ids: HashMap<String, u32>,
}

impl Default for Vocab {
    fn default() -> Self {
        Self::new()
    }
}

impl Vocab {
    pub fn new() -> Self {
        let words = vec![SENT_END_STR.to_string(), UNK_STR.to_string()];
        let mut ids = HashMap::new();
        ids.insert(SENT_END_STR.to_string(), SENT_END);
        ids.insert(UNK_STR.to_string(), UNK);
        Self { words, counts: vec![0, 0], ids }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        false // SENT_END and UNK always exist.
    }

    pub fn get_id(&self, word: &str) -> Option<u32> {
        self.ids.get(word).copied()
    }

    pub fn get_word(&self, id: u32) -> Option<&str> {
        self.words.get(id as usize).map(String::as_str)
    }

    pub fn count(&self, id: u32) -> u64 {
        self.counts.get(id as usize).copied().unwrap_or(0)
    }

    /// Adds a token if unseen, bumping its count either way. Returns the
    /// token's id. Never assigns `SENT_END`/`UNK`'s reserved ids to a new
    /// word.
    fn add_or_bump(&mut self, word: &str) -> u32 {
        if let Some(&id) = self.ids.get(word) {
            self.counts[id as usize] += 1;
            return id;
        }
        let id = self.words.len() as u32;
        self.words.push(word.to_string());
        self.counts.push(1);
        self.ids.insert(word.to_string(), id);
        id
    }

    /// Streams whitespace-separated tokens from `reader`, learning new
    /// words and bumping counts. Stops after `max_words` tokens when
    /// `max_words > 0`. After reading, words (excluding SENT_END/UNK) are
    /// re-sorted by descending count and ids reassigned accordingly.
    pub fn learn<R: Read>(&mut self, reader: R, max_words: usize) -> std::io::Result<()> {
        let mut buf = String::new();
        let mut reader = reader;
        reader.read_to_string(&mut buf)?;

        let mut seen = 0usize;
        'outer: for line in buf.lines() {
            for tok in line.split_whitespace() {
                if max_words > 0 && seen >= max_words {
                    break 'outer;
                }
                self.add_or_bump(tok);
                seen += 1;
            }
        }
        self.resort_by_count();
        Ok(())
    }

    /// Rebuilds a vocabulary from already-ordered id→word/count arrays, as
    /// produced by loading a saved model. The caller is responsible for
    /// `words[0] == SENT_END`/`words[1] == UNK`; this is always true of
    /// data this crate itself wrote.
    pub fn from_parts(words: Vec<String>, counts: Vec<u64>) -> Self {
        let mut ids = HashMap::with_capacity(words.len());
        for (i, w) in words.iter().enumerate() {
            ids.insert(w.clone(), i as u32);
        }
        Self { words, counts, ids }
    }

    /// Re-sorts all words after id 1 by descending count, preserving
    /// SENT_END at 0 and UNK at 1, and rebuilds the id map.
    fn resort_by_count(&mut self) {
        let mut rest: Vec<(String, u64)> = self.words[2..]
            .iter()
            .cloned()
            .zip(self.counts[2..].iter().copied())
            .collect();
        rest.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut words = vec![SENT_END_STR.to_string(), UNK_STR.to_string()];
        let mut counts = vec![self.counts[0], self.counts[1]];
        let mut ids = HashMap::new();
        ids.insert(SENT_END_STR.to_string(), SENT_END);
        ids.insert(UNK_STR.to_string(), UNK);
        for (i, (word, count)) in rest.into_iter().enumerate() {
            let id = (i + 2) as u32;
            ids.insert(word.clone(), id);
            words.push(word);
            counts.push(count);
        }
        self.words = words;
        self.counts = counts;
        self.ids = ids;
    }
}

impl PartialEq for Vocab {
    fn eq(&self, other: &Self) -> bool {
        self.words.len() == other.words.len() && self.words == other.words
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn empty_input_yields_sent_end_and_unk_only() {
        let mut v = Vocab::new();
        v.learn(Cursor::new(""), 0).unwrap();
        assert_eq!(v.len(), 2);
        assert_eq!(v.get_id(SENT_END_STR), Some(SENT_END));
        assert_eq!(v.get_id(UNK_STR), Some(UNK));
    }

    #[test]
    fn scenario_three_lines_sorted_by_count() {
        let mut v = Vocab::new();
        v.learn(Cursor::new("a b c\na b\na\n"), 0).unwrap();
        assert_eq!(v.len(), 5);
        assert_eq!(v.get_id("a"), Some(2));
        assert_eq!(v.get_id("b"), Some(3));
        assert_eq!(v.get_id("c"), Some(4));
        assert_eq!(v.count(2), 3);
        assert_eq!(v.count(3), 2);
        assert_eq!(v.count(4), 1);
    }

    #[test]
    fn bijection_holds_for_every_id() {
        let mut v = Vocab::new();
        v.learn(Cursor::new("the quick brown fox the quick the"), 0).unwrap();
        for id in 0..v.len() as u32 {
            let word = v.get_word(id).unwrap().to_string();
            assert_eq!(v.get_id(&word), Some(id));
        }
    }

    #[test]
    fn max_words_stops_streaming() {
        let mut v = Vocab::new();
        v.learn(Cursor::new("a b c d e"), 2).unwrap();
        assert_eq!(v.len(), 4); // SENT_END, UNK, a, b
    }

    #[test]
    fn duplicate_add_is_not_an_error() {
        let mut v = Vocab::new();
        v.learn(Cursor::new("a a a"), 0).unwrap();
        assert_eq!(v.len(), 3);
        assert_eq!(v.count(2), 3);
    }
}
