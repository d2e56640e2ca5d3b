//! The weight value type (§3 "Weight (W)"): shared between the persistence
//! layer, which reads and writes it, and the runtime layer, which mutates
//! it during training.

use lm_math::Matrix;

/// Which update path a weight's shape demands (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightTag {
    /// Every example updates every cell (dense layer weight).
    Full,
    /// A contiguous hash-based 1-D region; updates wrap around.
    Part,
    /// Rows grouped into disjoint contiguous segments.
    Segment,
    /// Rows indexed by input id (embedding lookup).
    OneShot,
}

impl WeightTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Part => "part",
            Self::Segment => "segment",
            Self::OneShot => "one-shot",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(Self::Full),
            "part" => Some(Self::Part),
            "segment" => Some(Self::Segment),
            "one-shot" | "oneshot" => Some(Self::OneShot),
            _ => None,
        }
    }
}

/// A dense matrix with an optional bias vector, tagged with its allowed
/// update path.
#[derive(Debug, Clone)]
pub struct Weight {
    pub tag: WeightTag,
    pub matrix: Matrix,
    pub bias: Option<Vec<f32>>,
}

impl Weight {
    pub fn new(tag: WeightTag, matrix: Matrix) -> Self {
        Self { tag, matrix, bias: None }
    }

    pub fn with_bias(mut self, bias: Vec<f32>) -> Self {
        self.bias = Some(bias);
        self
    }
}
