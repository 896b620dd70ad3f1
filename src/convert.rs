//! Parsers for the supported tokenizer data formats.
//!
//! Each parser reads one format and fills a [`Pipeline`](crate::Pipeline) with
//! the equivalent steps; [`convert_slice`] probes the formats in order and
//! renders the graphs in one call.

use alloc::string::String;

use crate::steps::BuildError;

#[cfg(feature = "convert-tokenizers")]
mod tokenizers;
#[cfg(feature = "convert-tokenizers")]
pub use tokenizers::*;

#[cfg(feature = "convert-sentencepiece")]
mod sentencepiece;
#[cfg(feature = "convert-sentencepiece")]
pub use sentencepiece::*;

#[cfg(feature = "convert-tiktoken")]
mod tiktoken;
#[cfg(feature = "convert-tiktoken")]
pub use tiktoken::*;

#[cfg(feature = "convert-detect")]
use alloc::format;
#[cfg(feature = "convert-detect")]
use alloc::string::ToString;
#[cfg(feature = "convert-detect")]
use alloc::vec::Vec;

#[cfg(feature = "convert-detect")]
use crate::artifacts::Artifacts;
#[cfg(feature = "convert-detect")]
use crate::config::Configuration;

/// Errors encountered when a conversion fails.
#[non_exhaustive]
#[derive(Debug)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum ConvertError {
    /// The data is not in this parser's format. Detection moves on to the next parser.
    #[cfg_attr(feature = "std", error("unrecognized data: {0}"))]
    FormatMismatch(String),
    /// The data is in the expected format but invalid. See the error message for more information.
    #[cfg_attr(feature = "std", error("invalid data: {0}"))]
    InvalidData(String),
    /// A string contains invalid utf-8.
    #[cfg_attr(feature = "std", error("invalid utf-8: {0}"))]
    InvalidUtf8(String),
    /// A string contains invalid base64.
    #[cfg_attr(feature = "std", error("invalid base64: {0}"))]
    InvalidBase64(String),
    /// A string contains an invalid number.
    #[cfg_attr(feature = "std", error("invalid number: {0}"))]
    InvalidNumber(String),
    /// The description declares a step, model or post-processor outside the supported set.
    #[cfg_attr(feature = "std", error("unsupported construct: {0}"))]
    UnsupportedConstruct(String),
    /// The parsed pipeline failed to finalize or render.
    #[cfg_attr(feature = "std", error("{0}"))]
    Build(BuildError),
    /// Reading the data failed.
    #[cfg(feature = "std")]
    #[error("{0}")]
    IOError(#[from] std::io::Error),
}
impl From<BuildError> for ConvertError {
    fn from(e: BuildError) -> Self {
        Self::Build(e)
    }
}

/// Converts tokenizer data in any supported format into rendered graphs.
///
/// The format is probed in order: serialized artifacts, the tokenizers JSON
/// description, a SentencePiece model, a tiktoken rank table. A parser that
/// does not recognize the data passes detection to the next one; every error
/// past detection is returned as-is. With
/// [`use_sentencepiece_backend`](Configuration::use_sentencepiece_backend) set,
/// the SentencePiece parser is probed before the JSON description.
#[cfg(feature = "convert-detect")]
pub fn convert_slice(
    data: impl AsRef<[u8]>, configuration: Configuration,
) -> Result<Artifacts, ConvertError> {
    let data = data.as_ref();
    if crate::serialization::is_serialized(data) {
        return Artifacts::from_slice(data).map_err(|e| {
            ConvertError::InvalidData(format!("failed to decode serialized artifacts: {:?}", e))
        });
    }

    type Probe = fn(&[u8], Configuration) -> Result<Artifacts, ConvertError>;
    #[cfg(feature = "convert-tokenizers")]
    fn probe_tokenizers(data: &[u8], configuration: Configuration) -> Result<Artifacts, ConvertError> {
        Ok(convert_tokenizers(data, configuration)?.build()?)
    }
    #[cfg(feature = "convert-sentencepiece")]
    fn probe_sentencepiece(
        data: &[u8], configuration: Configuration,
    ) -> Result<Artifacts, ConvertError> {
        Ok(convert_sentencepiece(data, configuration)?.build()?)
    }
    #[cfg(feature = "convert-tiktoken")]
    fn probe_tiktoken(data: &[u8], configuration: Configuration) -> Result<Artifacts, ConvertError> {
        Ok(convert_tiktoken(data, configuration)?.build()?)
    }

    let mut probes = Vec::<Probe>::new();
    #[cfg(feature = "convert-sentencepiece")]
    if configuration.use_sentencepiece_backend {
        probes.push(probe_sentencepiece);
    }
    #[cfg(feature = "convert-tokenizers")]
    probes.push(probe_tokenizers);
    #[cfg(feature = "convert-sentencepiece")]
    if !configuration.use_sentencepiece_backend {
        probes.push(probe_sentencepiece);
    }
    #[cfg(feature = "convert-tiktoken")]
    probes.push(probe_tiktoken);

    for probe in probes {
        match probe(data, configuration.clone()) {
            Err(ConvertError::FormatMismatch(mismatch)) => {
                log::debug!("detection continues: {}", mismatch);
            }
            result => return result,
        }
    }
    Err(ConvertError::FormatMismatch(
        "data does not match any supported tokenizer format".to_string(),
    ))
}

/// Converts tokenizer data read from a reader. See [`convert_slice`] for more details.
#[cfg(all(feature = "std", feature = "convert-detect"))]
pub fn convert_reader<R: std::io::Read>(
    reader: &mut R, configuration: Configuration,
) -> Result<Artifacts, ConvertError> {
    let mut data = Vec::with_capacity(1024);
    reader.read_to_end(&mut data)?;
    convert_slice(&data, configuration)
}

/// Converts a tokenizer data file. See [`convert_slice`] for more details.
#[cfg(all(feature = "std", feature = "convert-detect"))]
pub fn convert_file(
    path: impl AsRef<std::path::Path>, configuration: Configuration,
) -> Result<Artifacts, ConvertError> {
    let mut file = std::fs::File::open(path)?;
    convert_reader(&mut file, configuration)
}
