//! Textual grammar for component-graph topology files (§4.4).
//!
//! A topology file is a sequence of `<component name=…>` … `</component>`
//! sections. Inside a section, `property`, `layer` and `glue` lines carry
//! whitespace-separated `key=value` attributes. Tags are case-insensitive;
//! `#` starts a line or trailing comment. This module only knows the text
//! grammar — turning a parsed [`TopologyFile`] into a validated component
//! graph is `lm-compiler`'s job.

use std::fmt;
use thiserror::Error;

/// A parse failure, with the 1-based source line it occurred on.
#[derive(Error, Debug, PartialEq)]
#[error("topology parse error at line {line}: {message}")]
pub struct IrError {
    pub line: usize,
    pub message: String,
}

impl IrError {
    fn at(line: usize, message: impl Into<String>) -> Self {
        Self { line, message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, IrError>;

/// One `key=value` attribute from a property/layer/glue line.
pub type Attr = (String, String);

#[derive(Debug, Clone, PartialEq)]
pub struct LayerLine {
    pub name: String,
    pub kind: String,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlueLine {
    pub name: String,
    pub kind: String,
    pub in_layer: String,
    pub out_layer: String,
    pub bptt_window: u32,
    pub bptt_delay: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ComponentText {
    pub name: String,
    pub properties: Vec<Attr>,
    pub layers: Vec<LayerLine>,
    pub glues: Vec<GlueLine>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TopologyFile {
    pub components: Vec<ComponentText>,
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn parse_attrs(line_no: usize, rest: &str) -> Result<Vec<Attr>> {
    rest.split_whitespace()
        .map(|tok| {
            let mut parts = tok.splitn(2, '=');
            let key = parts.next().unwrap_or_default();
            let value = parts.next().ok_or_else(|| {
                IrError::at(line_no, format!("expected key=value, got {:?}", tok))
            })?;
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

fn attr(attrs: &[Attr], key: &str) -> Option<String> {
    attrs.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v.clone())
}

fn require_attr(line_no: usize, attrs: &[Attr], key: &str, tag: &str) -> Result<String> {
    attr(attrs, key).ok_or_else(|| {
        IrError::at(line_no, format!("{} line missing required attribute {:?}", tag, key))
    })
}

fn parse_u32_attr(line_no: usize, attrs: &[Attr], key: &str, default: u32) -> Result<u32> {
    match attr(attrs, key) {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| IrError::at(line_no, format!("attribute {:?} is not an integer: {:?}", key, v))),
    }
}

/// Parses a full topology file.
pub fn parse(text: &str) -> Result<TopologyFile> {
    let mut components = Vec::new();
    let mut current: Option<ComponentText> = None;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let lower = line.to_ascii_lowercase();
        if lower.starts_with("<component") {
            if current.is_some() {
                return Err(IrError::at(line_no, "nested <component> without closing </component>"));
            }
            let inner = line
                .trim_start_matches(|c: char| c != ' ' && c != '>')
                .trim_end_matches('>')
                .trim();
            let attrs = parse_attrs(line_no, inner)?;
            let name = require_attr(line_no, &attrs, "name", "<component>")?;
            current = Some(ComponentText { name, ..Default::default() });
            continue;
        }
        if lower.starts_with("</component") {
            let comp = current
                .take()
                .ok_or_else(|| IrError::at(line_no, "</component> with no matching <component>"))?;
            components.push(comp);
            continue;
        }

        let comp = current
            .as_mut()
            .ok_or_else(|| IrError::at(line_no, "statement outside of <component>...</component>"))?;

        let mut parts = line.splitn(2, char::is_whitespace);
        let tag = parts.next().unwrap_or_default().to_ascii_lowercase();
        let rest = parts.next().unwrap_or_default();
        let attrs = parse_attrs(line_no, rest)?;

        match tag.as_str() {
            "property" => {
                let (key, value) = attrs
                    .into_iter()
                    .next()
                    .ok_or_else(|| IrError::at(line_no, "property line missing a key=value pair"))?;
                comp.properties.push((key, value));
            }
            "layer" => {
                let name = require_attr(line_no, &attrs, "name", "layer")?;
                let kind = require_attr(line_no, &attrs, "type", "layer")?;
                let size = parse_u32_attr(line_no, &attrs, "size", 0)?;
                comp.layers.push(LayerLine { name, kind, size });
            }
            "glue" => {
                let name = require_attr(line_no, &attrs, "name", "glue")?;
                let kind = require_attr(line_no, &attrs, "type", "glue")?;
                let in_layer = require_attr(line_no, &attrs, "in", "glue")?;
                let out_layer = require_attr(line_no, &attrs, "out", "glue")?;
                let bptt_window = parse_u32_attr(line_no, &attrs, "window", 0)?;
                let bptt_delay = parse_u32_attr(line_no, &attrs, "delay", 0)?;
                comp.glues.push(GlueLine { name, kind, in_layer, out_layer, bptt_window, bptt_delay });
            }
            other => return Err(IrError::at(line_no, format!("unknown statement {:?}", other))),
        }
    }

    if current.is_some() {
        return Err(IrError::at(text.lines().count() + 1, "unterminated <component> section"));
    }

    Ok(TopologyFile { components })
}

/// Prints a topology file back to text in canonical form.
pub fn print(file: &TopologyFile) -> String {
    let mut out = String::new();
    for comp in &file.components {
        out.push_str(&format!("<component name={}>\n", comp.name));
        for (k, v) in &comp.properties {
            out.push_str(&format!("property {}={}\n", k, v));
        }
        for layer in &comp.layers {
            out.push_str(&format!(
                "layer name={} type={} size={}\n",
                layer.name, layer.kind, layer.size
            ));
        }
        for glue in &comp.glues {
            out.push_str(&format!(
                "glue name={} type={} in={} out={} window={} delay={}\n",
                glue.name, glue.kind, glue.in_layer, glue.out_layer, glue.bptt_window, glue.bptt_delay
            ));
        }
        out.push_str("</component>\n");
    }
    out
}

impl fmt::Display for TopologyFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&print(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# a simple feed-forward component
<COMPONENT name=ffnn>
property num_threads=4
layer name=in type=input size=3
layer name=h type=hidden size=4
layer name=out type=output size=2
glue name=w1 type=dense in=in out=h
glue name=w2 type=dense in=h out=out
</component>
"#;

    #[test]
    fn parses_sample_topology() {
        let file = parse(SAMPLE).unwrap();
        assert_eq!(file.components.len(), 1);
        let comp = &file.components[0];
        assert_eq!(comp.name, "ffnn");
        assert_eq!(comp.layers.len(), 3);
        assert_eq!(comp.glues.len(), 2);
        assert_eq!(comp.glues[0].kind, "dense");
    }

    #[test]
    fn round_trips_through_print_then_parse() {
        let file = parse(SAMPLE).unwrap();
        let text = print(&file);
        let file2 = parse(&text).unwrap();
        assert_eq!(file, file2);
    }

    #[test]
    fn recurrent_glue_carries_bptt_options() {
        let text = "<component name=rnn>\nlayer name=in type=input size=2\nlayer name=out type=output size=2\nglue name=r type=recurrence in=in out=in window=5 delay=2\n</component>\n";
        let file = parse(text).unwrap();
        let glue = &file.components[0].glues[0];
        assert_eq!(glue.bptt_window, 5);
        assert_eq!(glue.bptt_delay, 2);
    }

    #[test]
    fn missing_layer_reference_is_a_parse_level_non_issue() {
        // lm-ir only parses text; dangling references are lm-compiler's job.
        let text = "<component name=x>\nglue name=g type=dense in=missing out=missing2\n</component>\n";
        assert!(parse(text).is_ok());
    }

    #[test]
    fn unterminated_component_is_an_error() {
        let text = "<component name=x>\nlayer name=a type=input size=1\n";
        assert!(parse(text).is_err());
    }

    #[test]
    fn unknown_statement_is_an_error() {
        let text = "<component name=x>\nbogus name=a\n</component>\n";
        assert!(parse(text).is_err());
    }
}
