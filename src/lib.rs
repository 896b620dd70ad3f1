//! **Tokenizer to computation graph converter.**
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use ragtoken::{convert_file, Configuration};
//! let artifacts = convert_file("tokenizer.json", Configuration::default())?;
//!
//! assert!(artifacts.tokenizer.count_ops("RaggedToDense") > 0);
//! std::fs::write("tokenizer.graphs", artifacts.to_vec())?;
//! # Ok(())
//! # }
//! ```
//!
//! # Overview
//!
//! Ragtoken converts trained tokenizers into tokenizer and detokenizer computation
//! graphs over ragged tensors, with support for BPE, Unigram and WordPiece
//! tokenization. The graphs describe every step of the tokenizer as data-flow
//! nodes and are intended for execution by an external runtime; this crate only
//! emits and transforms the descriptions.
//!
//! Ragtoken reads many existing tokenizer formats,
//! including [SentencePiece](https://github.com/google/sentencepiece), [HuggingFace Tokenizers](https://github.com/huggingface/tokenizers) and [OpenAI Tiktoken](https://github.com/openai/tiktoken).
//! See [`convert`] for information about the supported formats and conversion utilities.
//!
//! Conversion fills a [`PipelineBuilder`] with typed steps and renders it into
//! [`Artifacts`]: the tokenizer graph, the optional detokenizer graph, and the
//! metadata and extension points recorded during emission. Pipelines can also be
//! assembled directly for tokenizers without a source description. See
//! [`transform`] for the transformations rewriting already rendered graphs.
//!
//! # Cargo features
//!
//! ### Default features
//!
//! - `std`: Enables standard library features, including reading and writing artifacts from and to files.
//! - `serialization`: Enables `serde` implementations and methods for serialization and deserialization of artifacts.
//! - `convert`: Enables conversion utilities for common tokenizer data formats. When disabled, individual converters can be enabled using the following features:
//!   - `convert-tokenizers`: Enables conversion from HuggingFace Tokenizers tokenizer definitions.
//!   - `convert-sentencepiece`: Enables conversion from SentencePiece tokenizer definitions.
//!   - `convert-tiktoken`: Enables conversion from tiktoken tokenizer definitions.
//!   - `convert-detect`: Enables detection of the data format during conversion.
//! - `regex-perf`: Enables additional regex performance optimizations during pattern validation. Can be disabled to reduce binary size.
//!
//! ### Optional features
//!
//! - `regex-unicode`: Enables support for additional regex unicode patterns including script and segmentation extensions.
//!   Disabled by default since the majority of models don't make use of these patterns.

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docsrs, feature(doc_auto_cfg, doc_cfg_hide))]
#![cfg_attr(docsrs, doc(cfg_hide(doc)))]

extern crate alloc;

mod artifacts;
mod charsmap;
mod config;
mod graph;
mod pipeline;
mod steps;
mod vocab;

#[cfg(feature = "serialization")]
mod serialization;

pub mod convert;
pub mod regex;
pub mod transform;

pub use crate::artifacts::*;
pub use crate::charsmap::*;
pub use crate::config::*;
pub use crate::graph::*;
pub use crate::pipeline::*;
pub use crate::steps::{
    BuildError, Combine, CombineOutput, Decoding, Model, ModelContext, Normalization, Padding,
    PaddedOutput, PreTokenization, Split, TemplateElement, Truncation,
};
pub use crate::vocab::*;

#[cfg(feature = "serialization")]
pub use crate::serialization::*;

#[cfg(feature = "convert-detect")]
pub use crate::convert::convert_slice;
#[cfg(all(feature = "std", feature = "convert-detect"))]
pub use crate::convert::{convert_file, convert_reader};
