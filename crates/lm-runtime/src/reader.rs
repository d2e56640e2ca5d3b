//! Corpus reader (C8, §4.8): a background thread that tokenizes sentences,
//! maps OOV words to UNK, optionally shuffles, and pushes finished word
//! pools onto a bounded queue for training/eval workers to consume.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use lm_core::vocab::Vocab;
use lm_core::{SENT_END, UNK};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::Result;
use crate::pool::PoolQueue;

/// Reader configuration (§4.8).
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub path: PathBuf,
    /// Sentences read per pull into a scratch pool.
    pub epoch_size: usize,
    pub shuffle: bool,
    pub mini_batch: usize,
    pub drop_empty_line: bool,
    pub rand_seed: u64,
    pub num_workers: usize,
}

/// Tokenizes and terminates one line with [`SENT_END`], mapping any token
/// absent from `vocab` to [`UNK`].
fn tokenize_line(line: &str, vocab: &Vocab) -> Vec<u32> {
    let mut words: Vec<u32> = line.split_whitespace().map(|tok| vocab.get_id(tok).unwrap_or(UNK)).collect();
    words.push(SENT_END);
    words
}

/// Spawns the background producer thread and returns its handle alongside
/// the full-pool queue consumers pull from.
pub fn spawn(config: ReaderConfig, vocab: Arc<Vocab>, empty: Arc<PoolQueue>, full: Arc<PoolQueue>) -> JoinHandle<Result<()>> {
    std::thread::spawn(move || run(config, vocab, empty, full))
}

fn run(config: ReaderConfig, vocab: Arc<Vocab>, empty: Arc<PoolQueue>, full: Arc<PoolQueue>) -> Result<()> {
    let file = File::open(&config.path).map_err(|e| crate::error::RuntimeError::reader_error(e.to_string()))?;
    let mut lines = BufReader::new(file).lines();
    let mut rng = StdRng::seed_from_u64(config.rand_seed);

    loop {
        let mut sentences = Vec::with_capacity(config.epoch_size);
        let mut eof = false;
        while sentences.len() < config.epoch_size {
            match lines.next() {
                Some(Ok(line)) => {
                    if config.drop_empty_line && line.trim().is_empty() {
                        continue;
                    }
                    sentences.push(tokenize_line(&line, &vocab));
                }
                Some(Err(e)) => return Err(crate::error::RuntimeError::reader_error(e.to_string())),
                None => {
                    eof = true;
                    break;
                }
            }
        }

        if !sentences.is_empty() {
            let pool = match empty.pop() {
                Some(_) => {
                    let mut ordered = sentences;
                    if config.shuffle {
                        ordered.shuffle(&mut rng);
                    }
                    ordered
                }
                None => Vec::new(),
            };
            full.push(Some(pool));
        }

        if eof {
            for _ in 0..config.num_workers.max(1) {
                full.push(None);
            }
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_vocab() -> Vocab {
        let mut v = Vocab::new();
        v.learn(std::io::Cursor::new("the cat sat"), 0).unwrap();
        v
    }

    #[test]
    fn oov_tokens_map_to_unk_and_lines_terminate_with_sent_end() {
        let v = sample_vocab();
        let words = tokenize_line("the dog sat", &v);
        assert_eq!(words.last(), Some(&SENT_END));
        assert!(words.contains(&UNK));
    }

    #[test]
    fn reader_thread_emits_finish_markers_at_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.txt");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "the cat sat").unwrap();
        writeln!(f, "the cat sat").unwrap();
        drop(f);

        let vocab = Arc::new(sample_vocab());
        let empty = Arc::new(PoolQueue::new(4));
        empty.seed_empty(4);
        let full = Arc::new(PoolQueue::new(4));
        let config = ReaderConfig {
            path,
            epoch_size: 1,
            shuffle: false,
            mini_batch: 1,
            drop_empty_line: true,
            rand_seed: 0,
            num_workers: 1,
        };
        let handle = spawn(config, vocab, empty, Arc::clone(&full));
        handle.join().unwrap().unwrap();

        let mut saw_finish = false;
        for _ in 0..3 {
            if full.pop().is_none() {
                saw_finish = true;
                break;
            }
        }
        assert!(saw_finish);
    }
}
