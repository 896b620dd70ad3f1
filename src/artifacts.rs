//! Conversion output: the emitted graphs with their recorded metadata and
//! extension points.

use alloc::string::String;
use alloc::vec::Vec;

use crate::config::Configuration;
use crate::graph::{Graph, NodeId, TensorId};
use crate::steps::Combine;
use crate::vocab::TokenId;

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// The source format a pipeline was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
pub enum Source {
    /// Declarative fast-tokenizer JSON.
    Tokenizers,
    /// Binary SentencePiece model.
    SentencePiece,
    /// Plain-text rank table.
    Tiktoken,
    /// Assembled directly without a source description.
    Custom,
}
impl Default for Source {
    fn default() -> Self {
        Self::Custom
    }
}

/// Ids of designated special tokens, where the source declares them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
pub struct SpecialIds {
    pub unk: Option<TokenId>,
    pub bos: Option<TokenId>,
    pub eos: Option<TokenId>,
    pub pad: Option<TokenId>,
}

/// Provenance and configuration recorded alongside the emitted graphs.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
pub struct Metadata {
    /// The full configuration the conversion ran with.
    pub configuration: Configuration,
    /// Crate version that produced the artifact.
    pub version:       String,
    pub source:        Source,
    pub specials:      SpecialIds,
    /// The combine template emitted into the tokenizer graph.
    pub single:        Option<Combine>,
    /// The paired-input variant of the template, kept for later widening.
    pub pair:          Option<Combine>,
}

/// A constant input slot a transformation may re-derive at runtime.
///
/// `value` is the magnitude of the constant as emitted; rewriting multiplies
/// it by a state cell so the position can be toggled between `value` and zero
/// without recompilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
pub struct TogglePoint {
    pub node:  NodeId,
    /// Input index on `node`.
    pub slot:  usize,
    pub value: i32,
}

/// The truncation parameters as emitted, for re-derivation during widening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
pub struct TruncationPoint {
    /// The per-row cap, already reduced by the single template's added tokens.
    pub max_length: i32,
    pub right:      bool,
}

/// Typed handles into the emitted graphs, recorded at emission time.
///
/// Transformations consume these instead of searching the graphs for nodes by
/// name or shape.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
pub struct ExtensionPoints {
    /// The tokenizer string parameter, when the graph has exactly one.
    pub input:        Option<TensorId>,
    /// The string unpack node fed by `input`.
    pub unpack:       Option<NodeId>,
    /// The combine-segments node of the tokenizer.
    pub combine:      Option<NodeId>,
    /// The first tokenized sequence triple, before truncation.
    pub sequence:     Option<[TensorId; 3]>,
    pub truncation:   Option<TruncationPoint>,
    /// Gated ends inputs of literal token groups on the combine node.
    pub special_ends: Vec<TogglePoint>,
    /// The skip-list slice bound in the detokenizer.
    pub skip:         Option<TogglePoint>,
}

/// The emitted graphs plus everything recorded about their construction.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
pub struct Artifacts {
    pub tokenizer:   Graph,
    pub detokenizer: Option<Graph>,
    pub metadata:    Metadata,
    pub points:      ExtensionPoints,
}
