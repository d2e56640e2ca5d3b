//! Training/eval/generation runtime (C5-C9).
//!
//! This crate owns everything that mutates a model's weights or drives a
//! corpus through it: per-weight update paths, the hierarchical-softmax
//! output layer, per-component forward/backward with BPTT, the background
//! corpus reader, and the Train/Eval/Gen worker pool that ties them
//! together.

#![warn(clippy::all)]

pub mod component_updater;
pub mod driver;
pub mod error;
pub mod output_updater;
pub mod pool;
pub mod reader;
pub mod weight_updater;

pub use component_updater::{BpttRing, ComponentUpdater};
pub use driver::{run_generate, run_worker, Cancellation, Mode, RunStats, Updater};
pub use error::{Result, RuntimeError};
pub use output_updater::OutputUpdater;
pub use pool::{Pool, PoolQueue};
pub use reader::{spawn as spawn_reader, ReaderConfig};
pub use weight_updater::{SharedWeight, UpdateParams, WeightUpdater};
