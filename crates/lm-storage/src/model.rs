//! The `Model`/`ComponentModel` container: ties vocabulary, output tree and
//! per-component graphs + weights together under the binary wire format,
//! honoring the model-filter grammar for partial save/load/merge (§4.10).

use std::collections::BTreeMap;

use lm_core::component::{Component, GlueKind, GlueSpec, LayerSpec};
use lm_core::tree::OutputTree;
use lm_core::vocab::Vocab;
use lm_core::weight::{Weight, WeightTag};
use lm_math::{Matrix, NumericFlags};

use crate::error::{Result, StorageError};
use crate::filter::ModelFilter;
use crate::magic;
use crate::wire::{flags_byte, flags_from_byte, Reader, Writer};

/// A trained component: its graph plus one weight per glue that carries one
/// (named by the glue's own name).
#[derive(Debug, Clone)]
pub struct ComponentModel {
    pub graph: Component,
    pub weights: BTreeMap<String, Weight>,
}

/// A full (or partial, per [`ModelFilter`]) model: vocabulary, output tree
/// and named components. Absent pieces are `None`/empty after a filtered
/// load rather than populated with placeholder data.
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub vocab: Option<Vocab>,
    pub tree: Option<OutputTree>,
    pub components: BTreeMap<String, ComponentModel>,
}

const FLAG_VOCAB: u8 = 0b01;
const FLAG_OUTPUT: u8 = 0b10;

fn expect_magic(r: &mut Reader, expected: [u8; 4], what: &str) -> Result<()> {
    let found = r.magic()?;
    if found != expected {
        return Err(StorageError::invalid_format(format!(
            "expected {what} magic {expected:?}, found {found:?}"
        )));
    }
    Ok(())
}

fn write_vocab_block(out: &mut Vec<u8>, vocab: &Vocab) {
    let mut w = Writer::new();
    w.u32(vocab.len() as u32);
    for id in 0..vocab.len() as u32 {
        w.string(vocab.get_word(id).unwrap());
        w.u64(vocab.count(id));
    }
    crate::wire::write_block(out, magic::VOCAB, &w.buf);
}

fn read_vocab_block(r: &mut Reader) -> Result<Vocab> {
    expect_magic(r, magic::VOCAB, "vocab")?;
    let body = r.block_body("vocab")?;
    let mut br = Reader::new(body);
    let n = br.u32()?;
    let mut words = Vec::with_capacity(n as usize);
    let mut counts = Vec::with_capacity(n as usize);
    for _ in 0..n {
        words.push(br.string()?);
        counts.push(br.u64()?);
    }
    Ok(Vocab::from_parts(words, counts))
}

fn write_output_block(out: &mut Vec<u8>, tree: &OutputTree) {
    let mut w = Writer::new();
    w.u32(tree.root());
    w.u32(tree.num_nodes());
    for node in 0..tree.num_nodes() {
        let (is_leaf, a, b) = tree.node_repr(node);
        w.buf.push(is_leaf as u8);
        w.u32(a);
        w.u32(b);
    }
    let children = tree.children_flat();
    w.u32(children.len() as u32);
    for &c in children {
        w.u32(c);
    }
    crate::wire::write_block(out, magic::OUTPUT, &w.buf);
}

fn read_output_block(r: &mut Reader) -> Result<OutputTree> {
    expect_magic(r, magic::OUTPUT, "output")?;
    let body = r.block_body("output")?;
    let mut br = Reader::new(body);
    let root = br.u32()?;
    let num_nodes = br.u32()?;
    let mut reprs = Vec::with_capacity(num_nodes as usize);
    for _ in 0..num_nodes {
        let is_leaf = br.u8()? != 0;
        let a = br.u32()?;
        let b = br.u32()?;
        reprs.push((is_leaf, a, b));
    }
    let num_children = br.u32()?;
    let mut children = Vec::with_capacity(num_children as usize);
    for _ in 0..num_children {
        children.push(br.u32()?);
    }
    Ok(OutputTree::from_parts(reprs, children, root))
}

/// Writes one weight's tag, shape, matrix and optional bias under `encoding`
/// (§4.1/§4.10's per-blob `{plain, short-quantized, zeros-compressed, both}`
/// bitfield). The flags byte precedes each numeric payload so `read_weight`
/// never has to be told out of band which codec produced it.
fn write_weight(w: &mut Writer, weight: &Weight, encoding: NumericFlags) {
    w.string(weight.tag.as_str());
    w.u32(weight.matrix.rows() as u32);
    w.u32(weight.matrix.cols() as u32);
    w.buf.push(flags_byte(encoding));
    w.f32_slice_flagged(encoding, &weight.matrix.to_dense_vec());
    match &weight.bias {
        Some(bias) => {
            w.buf.push(1);
            w.buf.push(flags_byte(encoding));
            w.f32_slice_flagged(encoding, bias);
        }
        None => w.buf.push(0),
    }
}

fn read_weight(r: &mut Reader) -> Result<Weight> {
    let tag_str = r.string()?;
    let tag = WeightTag::parse(&tag_str)
        .ok_or_else(|| StorageError::invalid_format(format!("unknown weight tag {tag_str:?}")))?;
    let rows = r.u32()? as usize;
    let cols = r.u32()? as usize;
    let matrix_flags = flags_from_byte(r.u8()?);
    let dense = r.f32_slice_flagged(matrix_flags)?;
    let matrix = Matrix::from_rows(rows, cols, &dense)?;
    let has_bias = r.u8()? != 0;
    let bias = if has_bias {
        let bias_flags = flags_from_byte(r.u8()?);
        Some(r.f32_slice_flagged(bias_flags)?)
    } else {
        None
    };
    let mut weight = Weight::new(tag, matrix);
    if let Some(b) = bias {
        weight = weight.with_bias(b);
    }
    Ok(weight)
}

fn write_component_block(out: &mut Vec<u8>, name: &str, model: &ComponentModel, encoding: NumericFlags) {
    let mut w = Writer::new();
    w.string(name);
    w.u32(model.graph.layers.len() as u32);
    for layer in &model.graph.layers {
        w.string(&layer.name);
        w.string(&layer.kind);
        w.u32(layer.size);
    }
    w.u32(model.graph.glues.len() as u32);
    for glue in &model.graph.glues {
        w.string(&glue.name);
        w.string(glue.kind.as_str());
        w.string(&model.graph.layers[glue.in_layer as usize].name);
        w.string(&model.graph.layers[glue.out_layer as usize].name);
        w.u32(glue.bptt_window);
        w.u32(glue.bptt_delay);
    }
    w.u32(model.weights.len() as u32);
    for (glue_name, weight) in &model.weights {
        w.string(glue_name);
        write_weight(&mut w, weight, encoding);
    }
    crate::wire::write_block(out, magic::COMPONENT, &w.buf);
}

fn read_component_block(r: &mut Reader) -> Result<(String, ComponentModel)> {
    expect_magic(r, magic::COMPONENT, "component")?;
    let body = r.block_body("component")?;
    let mut br = Reader::new(body);
    let name = br.string()?;

    let num_layers = br.u32()?;
    let mut layer_specs = Vec::with_capacity(num_layers as usize);
    for _ in 0..num_layers {
        let lname = br.string()?;
        let kind = br.string()?;
        let size = br.u32()?;
        layer_specs.push(LayerSpec { name: lname, kind, size });
    }

    let num_glues = br.u32()?;
    let mut glue_specs = Vec::with_capacity(num_glues as usize);
    for _ in 0..num_glues {
        let gname = br.string()?;
        let kind_str = br.string()?;
        let in_layer = br.string()?;
        let out_layer = br.string()?;
        let bptt_window = br.u32()?;
        let bptt_delay = br.u32()?;
        let kind = GlueKind::parse(&kind_str)
            .ok_or_else(|| StorageError::invalid_format(format!("unknown glue kind {kind_str:?}")))?;
        glue_specs.push(GlueSpec { name: gname, kind, in_layer, out_layer, bptt_window, bptt_delay });
    }

    let graph = Component::build(name.clone(), layer_specs, glue_specs)?;

    let num_weights = br.u32()?;
    let mut weights = BTreeMap::new();
    for _ in 0..num_weights {
        let glue_name = br.string()?;
        weights.insert(glue_name, read_weight(&mut br)?);
    }

    Ok((name, ComponentModel { graph, weights }))
}

/// Serializes `model` restricted to `filter`'s selection, encoding every
/// weight blob under `encoding`. Use [`NumericFlags::PLAIN`] for the bit-exact
/// round trip; the quantized/zero-run modes trade exactness for a smaller
/// file per §4.1/§4.10.
pub fn save(model: &Model, filter: &ModelFilter, encoding: NumericFlags) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&magic::FILE_HEADER);
    out.extend_from_slice(&magic::FILE_VERSION.to_le_bytes());

    let mut flags = 0u8;
    if filter.vocab && model.vocab.is_some() {
        flags |= FLAG_VOCAB;
    }
    if filter.output && model.tree.is_some() {
        flags |= FLAG_OUTPUT;
    }
    out.push(flags);

    if flags & FLAG_VOCAB != 0 {
        write_vocab_block(&mut out, model.vocab.as_ref().unwrap());
    }
    if flags & FLAG_OUTPUT != 0 {
        write_output_block(&mut out, model.tree.as_ref().unwrap());
    }

    let selected = filter.select_components(model.components.keys().map(String::as_str));
    out.extend_from_slice(&(selected.len() as u32).to_le_bytes());
    for name in selected {
        write_component_block(&mut out, name, &model.components[name], encoding);
    }
    out
}

/// Deserializes a model previously produced by [`save`]; fields absent from
/// the file stay `None`/empty rather than being synthesized.
pub fn load(bytes: &[u8]) -> Result<Model> {
    let mut r = Reader::new(bytes);
    expect_magic(&mut r, magic::FILE_HEADER, "file header")?;
    let version = r.u32()?;
    if version < magic::MIN_FILE_VERSION || version > magic::FILE_VERSION {
        return Err(StorageError::UnsupportedVersion {
            found: version,
            min: magic::MIN_FILE_VERSION,
            max: magic::FILE_VERSION,
        });
    }
    let flags = r.u8()?;

    let vocab = if flags & FLAG_VOCAB != 0 { Some(read_vocab_block(&mut r)?) } else { None };
    let tree = if flags & FLAG_OUTPUT != 0 { Some(read_output_block(&mut r)?) } else { None };

    let num_components = r.u32()?;
    let mut components = BTreeMap::new();
    for _ in 0..num_components {
        let (name, comp) = read_component_block(&mut r)?;
        components.insert(name, comp);
    }

    Ok(Model { vocab, tree, components })
}

/// Combines several models, keeping the first model's vocab/tree and the
/// union of all components. Fails if two inputs name the same component.
pub fn merge(models: Vec<Model>) -> Result<Model> {
    let mut iter = models.into_iter();
    let mut merged = iter.next().unwrap_or_default();
    for next in iter {
        if merged.vocab.is_none() {
            merged.vocab = next.vocab;
        }
        if merged.tree.is_none() {
            merged.tree = next.tree;
        }
        for (name, comp) in next.components {
            if merged.components.contains_key(&name) {
                return Err(StorageError::DuplicateComponent(name));
            }
            merged.components.insert(name, comp);
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lm_core::component::GlueKind as GK;
    use std::io::Cursor;

    fn sample_component(name: &str) -> ComponentModel {
        let layers = vec![
            LayerSpec { name: "in".into(), kind: "input".into(), size: 2 },
            LayerSpec { name: "out".into(), kind: "output".into(), size: 2 },
        ];
        let glues = vec![GlueSpec {
            name: "w".into(),
            kind: GK::Dense,
            in_layer: "in".into(),
            out_layer: "out".into(),
            bptt_window: 0,
            bptt_delay: 0,
        }];
        let graph = Component::build(name.to_string(), layers, glues).unwrap();
        let mut weights = BTreeMap::new();
        weights.insert(
            "w".to_string(),
            Weight::new(WeightTag::Full, Matrix::from_rows(2, 2, &[1.0, 2.0, 3.0, 4.0]).unwrap()),
        );
        ComponentModel { graph, weights }
    }

    fn sample_model() -> Model {
        let mut vocab = Vocab::new();
        vocab.learn(Cursor::new("a b c"), 0).unwrap();
        let tree = OutputTree::build(&vocab, lm_core::TreeKind::Flat);
        let mut components = BTreeMap::new();
        components.insert("rnn".to_string(), sample_component("rnn"));
        Model { vocab: Some(vocab), tree: Some(tree), components }
    }

    #[test]
    fn full_round_trip() {
        let model = sample_model();
        let bytes = save(&model, &ModelFilter::all("x"), NumericFlags::PLAIN);
        let loaded = load(&bytes).unwrap();
        assert_eq!(loaded.vocab.unwrap(), model.vocab.unwrap());
        assert_eq!(loaded.tree.unwrap().num_leaves(), model.tree.unwrap().num_leaves());
        assert_eq!(loaded.components.len(), 1);
        let w = &loaded.components["rnn"].weights["w"];
        assert_eq!(w.matrix.to_dense_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn short_quantized_round_trip_is_within_quantization_error() {
        let model = sample_model();
        let bytes = save(&model, &ModelFilter::all("x"), NumericFlags::SHORT_QUANTIZED);
        let loaded = load(&bytes).unwrap();
        let original = &model.components["rnn"].weights["w"].matrix.to_dense_vec();
        let (_, scale) = lm_math::quantize_short(original);
        let back = loaded.components["rnn"].weights["w"].matrix.to_dense_vec();
        for (a, b) in original.iter().zip(&back) {
            assert!((a - b).abs() <= scale + 1e-6);
        }
    }

    #[test]
    fn component_only_filter_omits_vocab_and_tree() {
        let model = sample_model();
        let filter = ModelFilter::parse("mdl,c<rnn>:x");
        let bytes = save(&model, &filter, NumericFlags::PLAIN);
        let loaded = load(&bytes).unwrap();
        assert!(loaded.vocab.is_none());
        assert!(loaded.tree.is_none());
        assert_eq!(loaded.components.len(), 1);
    }

    #[test]
    fn merge_combines_disjoint_components() {
        let mut a = sample_model();
        let mut b = Model::default();
        b.components.insert("maxent".to_string(), sample_component("maxent"));
        let merged = merge(vec![a.clone(), b]).unwrap();
        assert_eq!(merged.components.len(), 2);
        assert!(merged.vocab.is_some());

        a.components.insert("rnn2".to_string(), sample_component("rnn"));
        let dup = merge(vec![sample_model(), a]);
        assert!(matches!(dup, Err(StorageError::DuplicateComponent(_))));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut bytes = save(&sample_model(), &ModelFilter::all("x"), NumericFlags::PLAIN);
        bytes[4..8].copy_from_slice(&999u32.to_le_bytes());
        assert!(matches!(load(&bytes), Err(StorageError::UnsupportedVersion { .. })));
    }
}
