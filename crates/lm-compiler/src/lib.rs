//! Lowers parsed topology text ([`lm_ir::TopologyFile`]) into a validated
//! `Vec<lm_core::component::Component>`.
//!
//! This crate is the verify→lower pipeline for the component graph: it
//! resolves glue-kind strings, rejects unknown ones before handing the rest
//! to [`lm_core::component::Component::build`] for the structural checks
//! (§4.4), and carries no numeric or runtime state of its own.

use lm_core::component::{Component, GlueKind, GlueSpec, LayerSpec};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompilerError {
    #[error(transparent)]
    Parse(#[from] lm_ir::IrError),

    #[error(transparent)]
    Topology(#[from] lm_core::CoreError),

    #[error("component {component:?} glue {glue:?} has unknown type {kind:?}")]
    UnknownGlueKind { component: String, glue: String, kind: String },
}

pub type Result<T> = std::result::Result<T, CompilerError>;

/// Parses `text` and lowers every `<component>` section into a validated
/// [`Component`].
pub fn compile_topology(text: &str) -> Result<Vec<Component>> {
    let file = lm_ir::parse(text)?;
    lower(&file)
}

/// Lowers an already-parsed topology file.
pub fn lower(file: &lm_ir::TopologyFile) -> Result<Vec<Component>> {
    let mut components = Vec::with_capacity(file.components.len());
    for comp_text in &file.components {
        let _span = tracing::info_span!("lower_component", name = %comp_text.name).entered();

        let layers: Vec<LayerSpec> = comp_text
            .layers
            .iter()
            .map(|l| LayerSpec { name: l.name.clone(), kind: l.kind.clone(), size: l.size })
            .collect();

        let mut glues = Vec::with_capacity(comp_text.glues.len());
        for g in &comp_text.glues {
            let kind = GlueKind::parse(&g.kind).ok_or_else(|| CompilerError::UnknownGlueKind {
                component: comp_text.name.clone(),
                glue: g.name.clone(),
                kind: g.kind.clone(),
            })?;
            glues.push(GlueSpec {
                name: g.name.clone(),
                kind,
                in_layer: g.in_layer.clone(),
                out_layer: g.out_layer.clone(),
                bptt_window: g.bptt_window,
                bptt_delay: g.bptt_delay,
            });
        }

        components.push(Component::build(comp_text.name.clone(), layers, glues)?);
    }
    Ok(components)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FFNN: &str = "<component name=ffnn>\nlayer name=in type=input size=3\nlayer name=out type=output size=2\nglue name=w type=dense in=in out=out\n</component>\n";

    #[test]
    fn compiles_a_simple_feedforward_topology() {
        let components = compile_topology(FFNN).unwrap();
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].name, "ffnn");
    }

    #[test]
    fn unknown_glue_type_is_rejected() {
        let text = "<component name=x>\nlayer name=in type=input size=1\nlayer name=out type=output size=1\nglue name=g type=bogus in=in out=out\n</component>\n";
        assert!(matches!(compile_topology(text), Err(CompilerError::UnknownGlueKind { .. })));
    }

    #[test]
    fn invalid_topology_propagates_from_lm_core() {
        let text = "<component name=x>\nlayer name=in type=input size=1\nglue name=g type=dense in=in out=missing\n</component>\n";
        assert!(matches!(compile_topology(text), Err(CompilerError::Topology(_))));
    }
}
