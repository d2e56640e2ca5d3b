//! Breadth-first WFST expansion from a trained language model (§4.11):
//! bloom-filter-gated candidate pruning, a hidden-state cache, and phi
//! back-off arcs, built order by order so back-off targets are always
//! already expanded.

mod bloom;
mod cache;
mod convert;
mod error;
mod select;
mod state;

pub use bloom::BloomFilter;
pub use convert::{convert, ArcLabel, ConvertConfig, ConvertOutput, FstArc, ModelForward};
pub use error::ConvertError;
pub use select::SelectionMethod;
pub use state::{FINAL, INIT, SENTENCE_START, WILDCARD};

pub type Result<T> = std::result::Result<T, ConvertError>;
