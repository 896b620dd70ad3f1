//! Precompiled character-map normalization data.
//! Based on the SentencePiece DoubleArray serialization.

use alloc::format;
use alloc::vec::Vec;
use core::fmt::Debug;

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

use crate::graph::UnicodeForm;

/// Error validating or fusing character-map normalization data.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum CharsMapError {
    /// The data is shorter than its trie section header declares.
    #[cfg_attr(
        feature = "std",
        error("charsmap data truncated: have {0} bytes, trie section declares {1}")
    )]
    Truncated(usize, usize),
    /// The trie section length is not a multiple of four bytes.
    #[cfg_attr(feature = "std", error("charsmap trie section length {0} is not a multiple of 4"))]
    Misaligned(usize),
    /// Two different precompiled maps cannot be fused into one step.
    #[cfg_attr(feature = "std", error("cannot fuse two different precompiled charsmaps"))]
    DataConflict,
    /// Two different Unicode forms cannot be fused into one step.
    #[cfg_attr(feature = "std", error("cannot fuse normalization forms {0:?} and {1:?}"))]
    FormConflict(UnicodeForm, UnicodeForm),
}

/// Character-map normalization with SentencePiece-style flags.
///
/// The precompiled blob is a little-endian trie byte length, the trie units, and the
/// shared normalized-string section. It is validated here and carried opaquely into
/// the graph as constant data; the runtime interprets it.
#[derive(Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
pub struct CharsMap {
    data: Vec<u8>,
    /// Whether a leading whitespace is inserted before matching.
    pub add_dummy_prefix:         bool,
    /// Whether runs of whitespace collapse to a single space.
    pub remove_extra_whitespaces: bool,
    /// Whether whitespace is replaced with the meta symbol `▁`.
    pub escape_whitespaces:       bool,
    /// Whether case folding applies before the mapping.
    pub case_fold:                bool,
    /// Whether NMT-style control-character cleanup applies.
    pub nmt:                      bool,
    /// Unicode form applied alongside the mapping.
    pub form:                     Option<UnicodeForm>,
}

impl CharsMap {
    /// Validates and wraps a precompiled blob. Flags start out unset.
    pub fn from_precompiled(data: Vec<u8>) -> Result<Self, CharsMapError> {
        if data.len() < 4 {
            return Err(CharsMapError::Truncated(data.len(), 4));
        }
        let size = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + size {
            return Err(CharsMapError::Truncated(data.len(), 4 + size));
        }
        if size % 4 != 0 {
            return Err(CharsMapError::Misaligned(size));
        }
        Ok(Self {
            data,
            ..Self::default()
        })
    }

    /// The raw precompiled blob, empty for flag-only maps.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns whether the map neither remaps characters nor sets any flag.
    pub fn is_identity(&self) -> bool {
        self.data.is_empty()
            && !self.add_dummy_prefix
            && !self.remove_extra_whitespaces
            && !self.escape_whitespaces
            && !self.case_fold
            && !self.nmt
            && self.form.is_none()
    }

    /// Fuses two adjacent maps into one.
    ///
    /// Boolean flags combine by or. At most one side may carry a precompiled blob or a
    /// Unicode form; different blobs or different forms conflict.
    pub fn merge(&self, other: &Self) -> Result<Self, CharsMapError> {
        if !self.data.is_empty() && !other.data.is_empty() && self.data != other.data {
            return Err(CharsMapError::DataConflict);
        }
        let form = match (self.form, other.form) {
            (Some(first), Some(second)) if first != second => {
                return Err(CharsMapError::FormConflict(first, second));
            }
            (first, second) => first.or(second),
        };
        Ok(Self {
            data: if self.data.is_empty() {
                other.data.clone()
            } else {
                self.data.clone()
            },
            add_dummy_prefix: self.add_dummy_prefix || other.add_dummy_prefix,
            remove_extra_whitespaces: self.remove_extra_whitespaces || other.remove_extra_whitespaces,
            escape_whitespaces: self.escape_whitespaces || other.escape_whitespaces,
            case_fold: self.case_fold || other.case_fold,
            nmt: self.nmt || other.nmt,
            form,
        })
    }
}

impl Debug for CharsMap {
    #[inline(never)]
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CharsMap")
            .field("data", &format!("Vec({})", self.data.len()))
            .field("add_dummy_prefix", &self.add_dummy_prefix)
            .field("remove_extra_whitespaces", &self.remove_extra_whitespaces)
            .field("escape_whitespaces", &self.escape_whitespaces)
            .field("case_fold", &self.case_fold)
            .field("nmt", &self.nmt)
            .field("form", &self.form)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(trie_words: usize, tail: &[u8]) -> Vec<u8> {
        let mut data = Vec::from((trie_words as u32 * 4).to_le_bytes());
        data.extend(core::iter::repeat_n(0_u8, trie_words * 4));
        data.extend_from_slice(tail);
        data
    }

    #[test]
    fn test_precompiled_framing() {
        let map = CharsMap::from_precompiled(blob(2, b"norm\0")).unwrap();
        assert_eq!(map.data().len(), 4 + 8 + 5);
        assert!(!map.is_identity());
    }

    #[test]
    fn test_precompiled_truncated() {
        assert_eq!(CharsMap::from_precompiled(Vec::from(*b"\x01\x02")), Err(CharsMapError::Truncated(2, 4)));
        let mut data = blob(4, b"");
        data.truncate(10);
        assert_eq!(CharsMap::from_precompiled(data), Err(CharsMapError::Truncated(10, 20)));
    }

    #[test]
    fn test_precompiled_misaligned() {
        let mut data = Vec::from(6_u32.to_le_bytes());
        data.extend_from_slice(&[0; 6]);
        assert_eq!(CharsMap::from_precompiled(data), Err(CharsMapError::Misaligned(6)));
    }

    #[test]
    fn test_merge_ors_flags_and_keeps_blob() {
        let mut with_blob = CharsMap::from_precompiled(blob(1, b"x")).unwrap();
        with_blob.escape_whitespaces = true;
        let flags = CharsMap {
            add_dummy_prefix: true,
            form: Some(UnicodeForm::Nfkc),
            ..CharsMap::default()
        };
        let merged = with_blob.merge(&flags).unwrap();
        assert_eq!(merged.data(), with_blob.data());
        assert!(merged.add_dummy_prefix);
        assert!(merged.escape_whitespaces);
        assert_eq!(merged.form, Some(UnicodeForm::Nfkc));
        let swapped = flags.merge(&with_blob).unwrap();
        assert_eq!(swapped, merged);
    }

    #[test]
    fn test_merge_conflicts() {
        let first = CharsMap::from_precompiled(blob(1, b"a")).unwrap();
        let second = CharsMap::from_precompiled(blob(1, b"b")).unwrap();
        assert_eq!(first.merge(&second), Err(CharsMapError::DataConflict));
        let nfc = CharsMap {
            form: Some(UnicodeForm::Nfc),
            ..CharsMap::default()
        };
        let nfkc = CharsMap {
            form: Some(UnicodeForm::Nfkc),
            ..CharsMap::default()
        };
        assert_eq!(nfc.merge(&nfkc), Err(CharsMapError::FormConflict(UnicodeForm::Nfc, UnicodeForm::Nfkc)));
    }
}
