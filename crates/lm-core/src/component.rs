//! Component graph (C4): named layers + typed glues, DAG with optional
//! recurrence cycles.

use crate::error::CoreError;
use crate::Result;
use std::collections::{HashMap, HashSet, VecDeque};

/// The kind of connection a [`Glue`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlueKind {
    /// A dense weight matrix between two layers.
    Dense,
    /// A one-shot embedding lookup (row-per-input-id weight).
    Embedding,
    /// A max-ent-style hashed direct connection.
    Direct,
    /// Sums incoming activations.
    Sum,
    /// Averages incoming activations.
    Avg,
    /// Applies an activation function with no weights.
    Activation,
    /// Marks the feedback edge of a recurrence cycle.
    Recurrence,
}

impl GlueKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dense" => Some(Self::Dense),
            "embedding" => Some(Self::Embedding),
            "direct" => Some(Self::Direct),
            "sum" => Some(Self::Sum),
            "avg" | "average" => Some(Self::Avg),
            "activation" => Some(Self::Activation),
            "recurrence" | "recurrent" => Some(Self::Recurrence),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dense => "dense",
            Self::Embedding => "embedding",
            Self::Direct => "direct",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Activation => "activation",
            Self::Recurrence => "recurrence",
        }
    }
}

/// A typed, sized vector node.
#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    pub kind: String,
    pub size: u32,
}

/// A typed, parameterized directed edge between two layers.
#[derive(Debug, Clone)]
pub struct Glue {
    pub name: String,
    pub kind: GlueKind,
    pub in_layer: u32,
    pub out_layer: u32,
    /// BPTT unroll window, meaningful only for [`GlueKind::Recurrence`].
    pub bptt_window: u32,
    /// BPTT error hand-off delay, meaningful only for [`GlueKind::Recurrence`].
    pub bptt_delay: u32,
}

/// A recurrence cycle: an ordered list of glue ids with the designated
/// recurrent glue first.
#[derive(Debug, Clone)]
pub struct GlueCycle {
    pub glues: Vec<u32>,
}

impl GlueCycle {
    pub fn recurrent_glue(&self) -> u32 {
        self.glues[0]
    }
}

/// Unvalidated input to [`Component::build`]: a layer or glue as parsed
/// from topology text, before names have been resolved to indices.
#[derive(Debug, Clone)]
pub struct LayerSpec {
    pub name: String,
    pub kind: String,
    pub size: u32,
}

#[derive(Debug, Clone)]
pub struct GlueSpec {
    pub name: String,
    pub kind: GlueKind,
    pub in_layer: String,
    pub out_layer: String,
    pub bptt_window: u32,
    pub bptt_delay: u32,
}

/// A named, ordered DAG of layers connected by glues.
#[derive(Debug, Clone)]
pub struct Component {
    pub name: String,
    pub layers: Vec<Layer>,
    pub glues: Vec<Glue>,
    pub input_layer: u32,
    pub output_layer: u32,
    pub cycles: Vec<GlueCycle>,
    /// Non-cyclic layers in topological order.
    pub topo_order: Vec<u32>,
}

impl Component {
    /// Validates and builds a component from its parsed layer/glue specs.
    ///
    /// See §4.4: missing layer reference, duplicate names, or a cycle
    /// without a declared recurrent glue are all [`CoreError::InvalidTopology`].
    pub fn build(name: String, layer_specs: Vec<LayerSpec>, glue_specs: Vec<GlueSpec>) -> Result<Self> {
        let mut name_to_idx: HashMap<String, u32> = HashMap::new();
        let mut layers = Vec::with_capacity(layer_specs.len());
        for spec in layer_specs {
            if name_to_idx.contains_key(&spec.name) {
                return Err(CoreError::invalid_topology(format!(
                    "duplicate layer name {:?} in component {:?}",
                    spec.name, name
                )));
            }
            let idx = layers.len() as u32;
            name_to_idx.insert(spec.name.clone(), idx);
            layers.push(Layer { name: spec.name, kind: spec.kind, size: spec.size });
        }

        let mut glue_names: HashSet<String> = HashSet::new();
        let mut glues = Vec::with_capacity(glue_specs.len());
        for spec in glue_specs {
            if !glue_names.insert(spec.name.clone()) {
                return Err(CoreError::invalid_topology(format!(
                    "duplicate glue name {:?} in component {:?}",
                    spec.name, name
                )));
            }
            let in_layer = *name_to_idx.get(&spec.in_layer).ok_or_else(|| {
                CoreError::invalid_topology(format!(
                    "glue {:?} references unknown input layer {:?}",
                    spec.name, spec.in_layer
                ))
            })?;
            let out_layer = *name_to_idx.get(&spec.out_layer).ok_or_else(|| {
                CoreError::invalid_topology(format!(
                    "glue {:?} references unknown output layer {:?}",
                    spec.name, spec.out_layer
                ))
            })?;
            glues.push(Glue {
                name: spec.name,
                kind: spec.kind,
                in_layer,
                out_layer,
                bptt_window: spec.bptt_window,
                bptt_delay: spec.bptt_delay,
            });
        }

        let input_layers: Vec<u32> = layers
            .iter()
            .enumerate()
            .filter(|(_, l)| l.kind.eq_ignore_ascii_case("input"))
            .map(|(i, _)| i as u32)
            .collect();
        let output_layers: Vec<u32> = layers
            .iter()
            .enumerate()
            .filter(|(_, l)| l.kind.eq_ignore_ascii_case("output"))
            .map(|(i, _)| i as u32)
            .collect();
        if input_layers.len() != 1 {
            return Err(CoreError::invalid_topology(format!(
                "component {:?} must have exactly one input layer, found {}",
                name,
                input_layers.len()
            )));
        }
        if output_layers.len() != 1 {
            return Err(CoreError::invalid_topology(format!(
                "component {:?} must have exactly one output layer, found {}",
                name,
                output_layers.len()
            )));
        }
        let input_layer = input_layers[0];
        let output_layer = output_layers[0];

        for g in &glues {
            if g.out_layer == input_layer {
                return Err(CoreError::invalid_topology(format!(
                    "input layer {:?} cannot be a glue output (glue {:?})",
                    layers[input_layer as usize].name, g.name
                )));
            }
            if g.in_layer == output_layer {
                return Err(CoreError::invalid_topology(format!(
                    "output layer {:?} cannot be a glue input (glue {:?})",
                    layers[output_layer as usize].name, g.name
                )));
            }
        }

        // Acyclic subgraph excludes recurrence-marked glues; anything that
        // still cycles without one is an undeclared cycle.
        let acyclic_edges: Vec<(u32, u32, u32)> = glues
            .iter()
            .enumerate()
            .filter(|(_, g)| g.kind != GlueKind::Recurrence)
            .map(|(gi, g)| (g.in_layer, g.out_layer, gi as u32))
            .collect();
        let topo_order = topo_sort(layers.len() as u32, &acyclic_edges).ok_or_else(|| {
            CoreError::invalid_topology(format!(
                "component {:?} has a cycle with no declared recurrent glue",
                name
            ))
        })?;

        let cycles = glues
            .iter()
            .enumerate()
            .filter(|(_, g)| g.kind == GlueKind::Recurrence)
            .map(|(gi, _)| GlueCycle { glues: vec![gi as u32] })
            .collect();

        Ok(Component { name, layers, glues, input_layer, output_layer, cycles, topo_order })
    }
}

/// Kahn's algorithm; returns `None` if the graph (restricted to `edges`)
/// has a cycle.
fn topo_sort(num_nodes: u32, edges: &[(u32, u32, u32)]) -> Option<Vec<u32>> {
    let mut indegree = vec![0u32; num_nodes as usize];
    let mut adj: Vec<Vec<u32>> = vec![Vec::new(); num_nodes as usize];
    for &(from, to, _) in edges {
        adj[from as usize].push(to);
        indegree[to as usize] += 1;
    }
    let mut queue: VecDeque<u32> = (0..num_nodes).filter(|&n| indegree[n as usize] == 0).collect();
    let mut order = Vec::with_capacity(num_nodes as usize);
    while let Some(n) = queue.pop_front() {
        order.push(n);
        for &next in &adj[n as usize] {
            indegree[next as usize] -= 1;
            if indegree[next as usize] == 0 {
                queue.push_back(next);
            }
        }
    }
    if order.len() == num_nodes as usize {
        Some(order)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(name: &str, kind: &str, size: u32) -> LayerSpec {
        LayerSpec { name: name.to_string(), kind: kind.to_string(), size }
    }

    fn glue(name: &str, kind: GlueKind, in_l: &str, out_l: &str) -> GlueSpec {
        GlueSpec {
            name: name.to_string(),
            kind,
            in_layer: in_l.to_string(),
            out_layer: out_l.to_string(),
            bptt_window: 0,
            bptt_delay: 0,
        }
    }

    #[test]
    fn simple_feedforward_builds() {
        let layers = vec![layer("in", "input", 3), layer("out", "output", 2)];
        let glues = vec![glue("w", GlueKind::Dense, "in", "out")];
        let c = Component::build("ffnn".into(), layers, glues).unwrap();
        assert_eq!(c.input_layer, 0);
        assert_eq!(c.output_layer, 1);
        assert!(c.cycles.is_empty());
        assert_eq!(c.topo_order, vec![0, 1]);
    }

    #[test]
    fn missing_layer_reference_is_invalid_topology() {
        let layers = vec![layer("in", "input", 3), layer("out", "output", 2)];
        let glues = vec![glue("w", GlueKind::Dense, "in", "missing")];
        assert!(Component::build("x".into(), layers, glues).is_err());
    }

    #[test]
    fn duplicate_layer_names_are_invalid_topology() {
        let layers = vec![layer("in", "input", 3), layer("in", "hidden", 2)];
        assert!(Component::build("x".into(), layers, vec![]).is_err());
    }

    #[test]
    fn cycle_without_recurrent_glue_is_invalid_topology() {
        let layers = vec![
            layer("in", "input", 3),
            layer("h", "hidden", 3),
            layer("out", "output", 2),
        ];
        let glues = vec![
            glue("a", GlueKind::Dense, "in", "h"),
            glue("b", GlueKind::Dense, "h", "out"),
            glue("c", GlueKind::Dense, "out", "h"), // cycle h -> out -> h, no recurrence marker
        ];
        assert!(Component::build("x".into(), layers, glues).is_err());
    }

    #[test]
    fn cycle_with_recurrent_glue_is_accepted() {
        let layers = vec![
            layer("in", "input", 3),
            layer("h", "hidden", 3),
            layer("out", "output", 2),
        ];
        let glues = vec![
            glue("a", GlueKind::Dense, "in", "h"),
            glue("b", GlueKind::Dense, "h", "out"),
            glue("r", GlueKind::Recurrence, "h", "h"),
        ];
        let c = Component::build("rnn".into(), layers, glues).unwrap();
        assert_eq!(c.cycles.len(), 1);
        assert_eq!(c.cycles[0].recurrent_glue(), 2);
    }

    #[test]
    fn input_layer_cannot_be_a_glue_output() {
        let layers = vec![layer("in", "input", 3), layer("out", "output", 2)];
        let glues = vec![glue("w", GlueKind::Dense, "out", "in")];
        assert!(Component::build("x".into(), layers, glues).is_err());
    }
}
