//! `lm vocab <train-text> <model-out>`: builds a word⇄id vocabulary from a
//! training corpus and writes a vocab-only model.

use std::fs::File;
use std::path::PathBuf;

use clap::Args;
use lm_core::vocab::Vocab;
use lm_storage::Model;
use tracing::info;

use crate::error::CliResult;

use super::support::save_model;

#[derive(Args, Debug)]
pub struct VocabCommand {
    /// Whitespace-tokenized training corpus, one sentence per line.
    pub train_text: PathBuf,

    /// Where to write the vocab-only model.
    pub model_out: PathBuf,

    /// Stop learning new words after this many tokens (`0` = unlimited).
    #[arg(long, default_value_t = 0)]
    pub max_words: usize,
}

impl VocabCommand {
    pub async fn execute(self) -> CliResult<()> {
        let span = tracing::info_span!("vocab", corpus = %self.train_text.display());
        let _enter = span.enter();

        let file = File::open(&self.train_text)?;
        let mut vocab = Vocab::new();
        vocab.learn(file, self.max_words)?;
        info!(words = vocab.len(), "learned vocabulary");

        let model = Model { vocab: Some(vocab), tree: None, components: Default::default() };
        save_model(&model, &self.model_out)?;
        Ok(())
    }
}
