//! Binary wire format, model container and model-filter selection grammar
//! for persisted language models (§4.10).

mod error;
pub mod filter;
pub mod magic;
pub mod model;
pub mod wire;

pub use error::StorageError;
pub use filter::ModelFilter;
pub use model::{load, merge, save, ComponentModel, Model};

pub type Result<T> = std::result::Result<T, StorageError>;
