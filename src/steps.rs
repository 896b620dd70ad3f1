//! Pipeline steps: the typed description of a tokenizer as an ordered list of
//! operations, each knowing how to render itself as graph nodes.
//!
//! Steps are grouped into five closed families, applied in pipeline order:
//! [`Normalization`], [`Split`] pre-tokenization, the tokenization [`Model`],
//! post-tokenization assembly ([`Truncation`], [`Combine`], [`Padding`]) and
//! [`Decoding`]. A step carries only the configuration needed to reproduce its
//! nodes; shared state like the vocabulary lives on the pipeline and is passed
//! in explicitly at render time.

use alloc::string::String;

use crate::charsmap::CharsMapError;
use crate::config::ConfigurationError;
use crate::graph::GraphError;
use crate::transform::TransformError;

pub mod decoding;
pub mod model;
pub mod normalization;
pub mod processing;
pub mod split;

pub use decoding::Decoding;
pub use model::{Model, ModelContext};
pub use normalization::Normalization;
pub use processing::{Combine, CombineOutput, Padding, PaddedOutput, TemplateElement, Truncation};
pub use split::{PreTokenization, Split};

/// Errors encountered when constructing or rendering pipeline steps.
#[non_exhaustive]
#[derive(Debug)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum BuildError {
    /// A step references a token missing from the vocabulary.
    #[cfg_attr(feature = "std", error("token {0:?} is not in the vocabulary"))]
    MissingToken(String),
    /// The source declares a construct without an equivalent rendering.
    #[cfg_attr(feature = "std", error("unsupported construct: {0}"))]
    UnsupportedConstruct(String),
    /// A split step with an out-of-range split limit.
    #[cfg_attr(feature = "std", error("max splits must be positive or -1, got {0}"))]
    InvalidMaxSplits(i32),
    /// Two parallel lists that must pair up element-wise have different lengths.
    #[cfg_attr(feature = "std", error("mismatched list lengths: {0} != {1}"))]
    LengthMismatch(usize, usize),
    /// A detokenizer was requested from a pipeline without a vocabulary decoder.
    #[cfg_attr(feature = "std", error("the pipeline has no vocabulary decoder to build a detokenizer from"))]
    MissingDecoder,
    /// The pipeline was finalized without a tokenization model step.
    #[cfg_attr(feature = "std", error("the pipeline has no tokenization model step"))]
    MissingModel,
    /// Structural error in ragged tensor wiring.
    #[cfg_attr(feature = "std", error("{0}"))]
    Graph(GraphError),
    /// Invalid conversion configuration.
    #[cfg_attr(feature = "std", error("{0}"))]
    Configuration(ConfigurationError),
    /// Invalid or conflicting precompiled character map.
    #[cfg_attr(feature = "std", error("{0}"))]
    CharsMap(CharsMapError),
    /// A post-build graph transformation failed.
    #[cfg_attr(feature = "std", error("{0}"))]
    Transform(TransformError),
}
impl From<GraphError> for BuildError {
    fn from(e: GraphError) -> Self {
        Self::Graph(e)
    }
}
impl From<ConfigurationError> for BuildError {
    fn from(e: ConfigurationError) -> Self {
        Self::Configuration(e)
    }
}
impl From<CharsMapError> for BuildError {
    fn from(e: CharsMapError) -> Self {
        Self::CharsMap(e)
    }
}
impl From<TransformError> for BuildError {
    fn from(e: TransformError) -> Self {
        Self::Transform(e)
    }
}
