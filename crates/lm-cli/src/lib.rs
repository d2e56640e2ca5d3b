//! `lm` CLI crate.
//!
//! Purpose:
//! - A thin front end over the toolkit's library crates: build a vocabulary,
//!   compile a topology file into an initial model, train it over a corpus,
//!   evaluate perplexity, generate text, merge model filters, and convert a
//!   trained model to a weighted FST.
//! - Every subcommand is a small amount of glue — argument parsing and I/O —
//!   over `lm-core`/`lm-ir`/`lm-compiler`/`lm-storage`/`lm-runtime`/`lm-convert`;
//!   no modeling logic lives here.
//!
//! Public responsibilities (library view):
//! - Re-export the primary CLI entry ([`LmCli`](commands::LmCli)) so it can be
//!   invoked and tested in-process, without spawning the binary.
//!
//! Integration points:
//! - `lm_ir`/`lm_compiler`: topology text → validated component graph.
//! - `lm_storage`: model load/save/merge.
//! - `lm_runtime`: reader, driver, weight/output/component updaters.
//! - `lm_convert`: WFST conversion.
//!
//! Notes:
//! - The binary (`src/main.rs`) installs the `tracing` subscriber and calls
//!   [`LmCli::execute`](commands::LmCli::execute).

pub mod commands;
pub mod config;
pub mod error;

pub use commands::LmCli;
