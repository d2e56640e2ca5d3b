//! Model filter grammar (§4.10): selects a subset of {vocab, output,
//! named components} for partial save/load and merge.

/// A parsed model filter selector.
///
/// `components` is always the *literal* list of `c<name>` tokens found;
/// whether it means "include only these" or "exclude these" is carried by
/// `negated`. Callers resolve the final component set against a model's
/// actual component names via [`ModelFilter::select_components`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFilter {
    pub vocab: bool,
    pub output: bool,
    pub components: Vec<String>,
    pub negated: bool,
    pub filename: String,
}

impl ModelFilter {
    /// The `ALL` filter: absent prefix, or a fallback for invalid selectors.
    pub fn all(filename: impl Into<String>) -> Self {
        Self { vocab: true, output: true, components: Vec::new(), negated: true, filename: filename.into() }
    }

    /// Parses a filter string of the form `[mdl,<selectors>:]<filename>`.
    /// Invalid selector syntax is never fatal: it falls back to `ALL` with
    /// the original string used verbatim as the filename.
    pub fn parse(s: &str) -> Self {
        let Some(rest) = s.strip_prefix("mdl,") else {
            return Self::all(s);
        };
        let Some(idx) = rest.find(':') else {
            return Self::all(s);
        };
        let (selectors, filename) = (&rest[..idx], &rest[idx + 1..]);
        Self::parse_selectors(selectors, filename).unwrap_or_else(|| Self::all(s))
    }

    fn parse_selectors(selectors: &str, filename: &str) -> Option<Self> {
        let (negated, body) = match selectors.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, selectors),
        };
        if body.is_empty() {
            return None;
        }
        let mut vocab = false;
        let mut output = false;
        let mut components = Vec::new();
        for raw_tok in body.split(',') {
            let tok = raw_tok.trim();
            if tok.eq_ignore_ascii_case("v") {
                vocab = true;
            } else if tok.eq_ignore_ascii_case("o") {
                output = true;
            } else if let Some(name) = tok.strip_prefix("c<").and_then(|s| s.strip_suffix('>')) {
                components.push(name.to_string());
            } else {
                return None;
            }
        }
        if negated {
            vocab = !vocab;
            output = !output;
        }
        Some(Self { vocab, output, components, negated, filename: filename.to_string() })
    }

    /// Resolves the literal component list/negation against a model's
    /// actual component names, returning the names to include.
    pub fn select_components<'a, I>(&self, available: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        available
            .into_iter()
            .filter(|name| {
                let listed = self.components.iter().any(|c| c == name);
                if self.negated {
                    !listed
                } else {
                    listed
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_filename_is_all() {
        let f = ModelFilter::parse("foo.bin");
        assert!(f.vocab && f.output);
        assert_eq!(f.filename, "foo.bin");
        assert_eq!(f.select_components(["a", "b"]), vec!["a", "b"]);
    }

    #[test]
    fn negated_component_selector_keeps_vocab_and_output() {
        let f = ModelFilter::parse("mdl,-c<rnn>:foo.bin");
        assert_eq!(f.filename, "foo.bin");
        assert!(f.vocab);
        assert!(f.output);
        assert!(f.negated);
        assert_eq!(f.components, vec!["rnn".to_string()]);
        assert_eq!(f.select_components(["rnn", "maxent"]), vec!["maxent"]);
    }

    #[test]
    fn positive_vocab_only_selector() {
        let f = ModelFilter::parse("mdl,v:");
        assert!(f.vocab);
        assert!(!f.output);
        assert!(f.components.is_empty());
        assert_eq!(f.filename, "");
    }

    #[test]
    fn invalid_selector_falls_back_to_all_with_original_string() {
        let f = ModelFilter::parse("mdl,zz:foo.bin");
        assert!(f.vocab && f.output);
        assert_eq!(f.filename, "mdl,zz:foo.bin");
    }

    #[test]
    fn filter_idempotence_on_vocab_only() {
        let f1 = ModelFilter::parse("mdl,v:");
        let f2 = ModelFilter::parse("mdl,v:");
        assert_eq!(f1, f2);
    }
}
