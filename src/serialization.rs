//! Serialization and deserialization of conversion artifacts.
//!
//! Artifacts round-trip through a small framed encoding: a magic prefix,
//! a format version, and the postcard encoding of [`Artifacts`]. The frame
//! exists so stored files can be told apart from tokenizer source data
//! during conversion without attempting a full decode.

#[cfg(feature = "std")]
use std::fs::File;
#[cfg(feature = "std")]
use std::io::{Read, Result as IOResult, Write};

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::artifacts::Artifacts;

const MAGIC: &[u8] = b"ragtoken";
const VERSION: &[u8] = &[0, 1];

/// Errors encountered when deserializing artifacts.
#[non_exhaustive]
#[derive(Debug)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum DeserializationError {
    /// The data is invalid. See the error message for more information.
    #[cfg_attr(feature = "std", error("{0}"))]
    InvalidData(String),
    /// Reading the data failed.
    #[cfg(feature = "std")]
    #[error("{0}")]
    IOError(#[from] std::io::Error),
}

/// Whether the data starts with the serialized artifacts frame.
///
/// A matching prefix claims the data for deserialization. Version and payload
/// are validated afterwards, so truncated or outdated frames surface as
/// deserialization errors instead of falling through to the source parsers.
pub(crate) fn is_serialized(data: &[u8]) -> bool {
    data.len() >= MAGIC.len() && &data[..MAGIC.len()] == MAGIC
}

impl Artifacts {
    /// Deserializes artifacts from a reader.
    ///
    /// Accepts the framed encoding written by [`Artifacts::to_writer`]. Data in
    /// one of the tokenizer source formats is instead converted with
    /// `convert_reader` when the `convert-detect` feature is enabled.
    #[cfg(feature = "std")]
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self, DeserializationError> {
        let data = {
            let mut data = Vec::new();
            reader.read_to_end(&mut data)?;
            data
        };
        Self::from_slice(&data)
    }

    /// Deserializes artifacts from a file. See [`Artifacts::from_reader`] for more details.
    #[cfg(feature = "std")]
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, DeserializationError> {
        let mut file = File::open(path)?;
        Self::from_reader(&mut file)
    }

    /// Deserializes artifacts from bytes.
    ///
    /// Accepts the framed encoding written by [`Artifacts::to_vec`]. Data in
    /// one of the tokenizer source formats is instead converted with
    /// `convert_slice` when the `convert-detect` feature is enabled.
    pub fn from_slice(slice: &[u8]) -> Result<Self, DeserializationError> {
        if slice.len() < MAGIC.len() + VERSION.len() {
            return Err(DeserializationError::InvalidData("invalid size".to_string()));
        }
        if &slice[..MAGIC.len()] != MAGIC {
            return Err(DeserializationError::InvalidData("invalid magic".to_string()));
        }
        if &slice[MAGIC.len()..MAGIC.len() + VERSION.len()] != VERSION {
            return Err(DeserializationError::InvalidData("invalid version".to_string()));
        }
        let artifacts = postcard::from_bytes(&slice[MAGIC.len() + VERSION.len()..])
            .map_err(|e| DeserializationError::InvalidData(e.to_string()))?;
        Ok(artifacts)
    }

    /// Serializes the artifacts to a writer.
    #[cfg(feature = "std")]
    pub fn to_writer<W: Write>(&self, writer: &mut W) -> IOResult<()> {
        writer.write_all(MAGIC)?;
        writer.write_all(VERSION)?;
        let data = postcard::to_allocvec(self).unwrap();
        writer.write_all(&data)?;
        Ok(())
    }

    /// Serializes the artifacts to a file.
    #[cfg(feature = "std")]
    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> IOResult<()> {
        let mut file = File::create(path)?;
        self.to_writer(&mut file)
    }

    /// Serializes the artifacts to bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        let data = postcard::to_allocvec(self).unwrap();
        let mut vec = Vec::with_capacity(MAGIC.len() + VERSION.len() + data.len());
        vec.extend_from_slice(MAGIC);
        vec.extend_from_slice(VERSION);
        vec.extend_from_slice(&data);
        vec
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::String;
    use alloc::vec::Vec;

    use crate::artifacts::{Artifacts, ExtensionPoints, Metadata, Source, SpecialIds};
    use crate::config::Configuration;
    use crate::graph::Graph;

    use super::*;

    fn artifacts() -> Artifacts {
        Artifacts {
            tokenizer:   Graph {
                name:    String::from("tokenizer"),
                nodes:   Vec::new(),
                tensors: Vec::new(),
                inputs:  Vec::new(),
                outputs: Vec::new(),
            },
            detokenizer: None,
            metadata:    Metadata {
                configuration: Configuration::default(),
                version:       String::from(env!("CARGO_PKG_VERSION")),
                source:        Source::Custom,
                specials:      SpecialIds::default(),
                single:        None,
                pair:          None,
            },
            points:      ExtensionPoints::default(),
        }
    }

    #[test]
    fn test_round_trip() {
        let artifacts = artifacts();
        let data = artifacts.to_vec();
        assert!(data.starts_with(MAGIC));
        assert!(is_serialized(&data));
        let restored = Artifacts::from_slice(&data).unwrap();
        assert_eq!(restored, artifacts);
    }

    #[test]
    fn test_rejects_framing_errors() {
        let result = Artifacts::from_slice(b"ragtok");
        assert!(matches!(result, Err(DeserializationError::InvalidData(e)) if e == "invalid size"));

        let result = Artifacts::from_slice(b"not an artifacts frame at all");
        assert!(matches!(result, Err(DeserializationError::InvalidData(e)) if e == "invalid magic"));

        let mut data = artifacts().to_vec();
        data[MAGIC.len()] = 9;
        let result = Artifacts::from_slice(&data);
        assert!(matches!(result, Err(DeserializationError::InvalidData(e)) if e == "invalid version"));
    }

    #[test]
    fn test_rejects_source_data() {
        assert!(!is_serialized(b"{\"model\": {\"type\": \"BPE\"}}"));
        assert!(!is_serialized(b""));
    }
}
