//! Vocabulary, output-tree and component-graph data model.
//!
//! These three types form the read-mostly backbone shared by every other
//! crate in the workspace: a trained model's weights live in `lm-runtime`,
//! its wire format lives in `lm-storage`, but the shapes they all agree on
//! — word ids, tree paths, layer/glue topology — live here.

pub mod component;
mod error;
pub mod tree;
pub mod vocab;
pub mod weight;

pub use error::CoreError;
pub use tree::{OutputTree, TreeKind};
pub use vocab::{Vocab, SENT_END, UNK};
pub use weight::{Weight, WeightTag};

pub type Result<T> = std::result::Result<T, CoreError>;
