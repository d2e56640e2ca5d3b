//! CLI command implementations for the `lm` toolkit.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use crate::error::CliResult;

pub mod converter;
pub mod eval;
pub mod gen;
pub mod init;
pub mod merge;
pub mod support;
pub mod train;
pub mod vocab;

/// A connectionist language-modeling toolkit: build a vocabulary, compile a
/// topology into a model, train it, evaluate perplexity, generate text,
/// merge model filters, and convert a trained model to a weighted FST.
#[derive(Parser, Debug)]
#[command(name = "lm", version, about = "Connectionist language-modeling toolkit")]
pub struct LmCli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path (defaults to `~/.config/lm-toolkit/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands (§6).
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a vocabulary from a training corpus.
    Vocab(vocab::VocabCommand),

    /// Compile a topology file into an initial, untrained model.
    Init(init::InitCommand),

    /// Train a model over a corpus.
    Train(train::TrainCommand),

    /// Evaluate a model's perplexity on held-out text.
    Eval(eval::EvalCommand),

    /// Generate sentences from a trained model.
    Gen(gen::GenCommand),

    /// Merge several (optionally filtered) models into one.
    Merge(merge::MergeCommand),

    /// Convert a trained model into a weighted finite-state transducer.
    Converter(converter::ConverterCommand),

    /// Print a shell completion script to stdout.
    Completions(CompletionsCommand),
}

/// `lm completions <shell>`: writes a `clap_complete`-generated completion
/// script for the requested shell to stdout, for the caller to source or
/// drop into their shell's completions directory.
#[derive(clap::Args, Debug)]
pub struct CompletionsCommand {
    /// Target shell (bash, zsh, fish, elvish, powershell).
    pub shell: Shell,
}

impl CompletionsCommand {
    fn execute(self) -> CliResult<()> {
        let mut cmd = LmCli::command();
        let name = cmd.get_name().to_string();
        clap_complete::generate(self.shell, &mut cmd, name, &mut std::io::stdout());
        Ok(())
    }
}

impl LmCli {
    /// Dispatches to the selected subcommand.
    pub async fn execute(self) -> CliResult<()> {
        match self.command {
            Commands::Vocab(cmd) => cmd.execute().await,
            Commands::Init(cmd) => cmd.execute().await,
            Commands::Train(cmd) => cmd.execute().await,
            Commands::Eval(cmd) => cmd.execute().await,
            Commands::Gen(cmd) => cmd.execute().await,
            Commands::Merge(cmd) => cmd.execute().await,
            Commands::Converter(cmd) => cmd.execute().await,
            Commands::Completions(cmd) => cmd.execute(),
        }
    }
}
