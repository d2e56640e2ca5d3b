//! `lm merge <filter>... <model-out>`: merges several (optionally filtered)
//! models into one (§4.10).

use std::path::PathBuf;

use clap::Args;
use lm_storage::{Model, ModelFilter};
use tracing::info;

use crate::error::{CliError, CliResult};

use super::support::save_model;

#[derive(Args, Debug)]
pub struct MergeCommand {
    /// One or more `[mdl,<selectors>:]<filename>` filter strings, applied
    /// to each input model before the union. Selectors: `v` (vocab),
    /// `o` (output tree), `c<name>` (one named component), `-` negates.
    #[arg(required = true, num_args = 1..)]
    pub inputs: Vec<String>,

    /// Where to write the merged model.
    pub model_out: PathBuf,
}

/// Trims `model` down to what `filter` selects, so [`lm_storage::merge`]'s
/// plain union sees only the fields/components this input contributes.
fn apply_filter(mut model: Model, filter: &ModelFilter) -> Model {
    if !filter.vocab {
        model.vocab = None;
    }
    if !filter.output {
        model.tree = None;
    }
    let keep: Vec<String> = filter.select_components(model.components.keys().map(String::as_str)).into_iter().map(String::from).collect();
    let mut components = std::collections::BTreeMap::new();
    for name in keep {
        if let Some(cm) = model.components.remove(&name) {
            components.insert(name, cm);
        }
    }
    model.components = components;
    model
}

impl MergeCommand {
    pub async fn execute(self) -> CliResult<()> {
        let span = tracing::info_span!("merge", inputs = self.inputs.len());
        let _enter = span.enter();

        let mut models = Vec::with_capacity(self.inputs.len());
        for arg in &self.inputs {
            let filter = ModelFilter::parse(arg);
            let bytes = std::fs::read(&filter.filename)
                .map_err(|e| CliError::Io(std::io::Error::new(e.kind(), format!("{}: {e}", filter.filename))))?;
            let model = lm_storage::load(&bytes)?;
            models.push(apply_filter(model, &filter));
        }

        let merged = lm_storage::merge(models)?;
        let component_names: Vec<&str> = merged.components.keys().map(String::as_str).collect();
        info!(
            has_vocab = merged.vocab.is_some(),
            has_tree = merged.tree.is_some(),
            components = ?component_names,
            "merged models"
        );

        save_model(&merged, &self.model_out)?;
        Ok(())
    }
}
