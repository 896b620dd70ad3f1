//! Pre-tokenization steps: regex splitting and byte-level remapping.

use alloc::string::String;
use alloc::vec::Vec;

use crate::graph::{split_ragged, ElementType, GraphBuilder, GraphError, Op, SplitBehavior, TensorId};
use crate::regex::quote_meta;

use super::BuildError;

/// The byte to printable-character table used by byte-level tokenizers.
///
/// Printable bytes map to themselves; the rest map to consecutive scalars
/// from `U+0100` so every byte survives string processing.
fn byte_level_chars() -> &'static [char; 256] {
    use alloc::boxed::Box;
    use once_cell::race::OnceBox;
    static TABLE: OnceBox<[char; 256]> = OnceBox::new();
    TABLE.get_or_init(|| {
        let mut table = ['\0'; 256];
        let mut shifted = 0;
        for byte in 0 .. 256 {
            table[byte as usize] = if matches!(byte, 0x21 ..= 0x7e | 0xa1 ..= 0xac | 0xae ..= 0xff) {
                char::from_u32(byte).unwrap()
            } else {
                shifted += 1;
                char::from_u32(0x100 + shifted - 1).unwrap()
            };
        }
        Box::new(table)
    })
}

/// Remaps raw bytes to their byte-level printable representation.
pub(crate) fn remap_byte_level(bytes: &[u8]) -> Vec<u8> {
    let table = byte_level_chars();
    let mut out = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        out.push(table[byte as usize]);
    }
    out.into_bytes()
}

/// A pre-tokenization step, rendered over a nested ragged string group.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Deserialize, serde::Serialize))]
pub enum PreTokenization {
    /// Regex split of each piece into finer pieces.
    Split(Split),
    /// Byte to printable-character remapping for byte-level tokenization.
    ByteRemap,
}

impl PreTokenization {
    /// Renders this step over a `[outer_begins, outer_ends, begins, ends, bytes]` group.
    pub fn render(&self, builder: &mut GraphBuilder, group: &[TensorId]) -> Result<[TensorId; 5], BuildError> {
        match self {
            Self::Split(split) => split.render(builder, group),
            Self::ByteRemap => {
                let (outer, _) = split_ragged(group)?;
                if outer.len() != 2 {
                    return Err(GraphError::UnexpectedNesting(group.len()).into());
                }
                let outputs = builder.apply(Op::BytesToChars, group, &[
                    ElementType::I32,
                    ElementType::I32,
                    ElementType::I32,
                    ElementType::I32,
                    ElementType::U8,
                ]);
                Ok([outputs[0], outputs[1], outputs[2], outputs[3], outputs[4]])
            }
        }
    }
}

/// A regex split with its behavior on matches.
///
/// `protected` strings are matched verbatim and never divided; the list is
/// populated during pipeline finalization from the added tokens.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Deserialize, serde::Serialize))]
pub struct Split {
    pub pattern:    String,
    pub behavior:   SplitBehavior,
    pub invert:     bool,
    pub max_splits: i32,
    pub protected:  Vec<String>,
}

impl Split {
    pub fn new(pattern: impl Into<String>, behavior: SplitBehavior, invert: bool) -> Self {
        Self {
            pattern: pattern.into(),
            behavior,
            invert,
            max_splits: -1,
            protected: Vec::new(),
        }
    }

    /// A split stopping after at most `max_splits` divisions per piece.
    /// `-1` leaves the count unlimited.
    pub fn with_limit(
        pattern: impl Into<String>,
        behavior: SplitBehavior,
        invert: bool,
        max_splits: i32,
    ) -> Result<Self, BuildError> {
        if max_splits < -1 {
            return Err(BuildError::InvalidMaxSplits(max_splits));
        }
        let mut split = Self::new(pattern, behavior, invert);
        split.max_splits = max_splits;
        Ok(split)
    }

    /// Whitespace removal as used by BERT-style tokenizers.
    pub fn bert_whitespace() -> Self {
        Self::new(r"\s+", SplitBehavior::Remove, false)
    }

    /// Punctuation and CJK isolation as used by BERT-style tokenizers,
    /// matching the TensorFlow Text reference ranges.
    pub fn bert_keep_delimiters() -> Self {
        Self::new(
            [
                r"[!-/]",
                r"[:-@]",
                r"[\[-`]",
                r"[{-~]",
                r"[\p{P}]",
                r"[\x{4E00}-\x{9FFF}]",
                r"[\x{3400}-\x{4DBF}]",
                r"[\x{20000}-\x{2A6DF}]",
                r"[\x{2A700}-\x{2B73F}]",
                r"[\x{2B740}-\x{2B81F}]",
                r"[\x{2B820}-\x{2CEAF}]",
                r"[\x{F900}-\x{FAFF}]",
                r"[\x{2F800}-\x{2FA1F}]",
            ]
            .join("|"),
            SplitBehavior::Isolate,
            false,
        )
    }

    /// The two-step BERT pre-tokenization.
    pub fn bert() -> Vec<Self> {
        Vec::from([Self::bert_whitespace(), Self::bert_keep_delimiters()])
    }

    /// Word splitting like `str.split`, keeping words and punctuation runs.
    pub fn whitespace() -> Self {
        Self::new(r"\w+|[^\w\s]+", SplitBehavior::Remove, true)
    }

    /// Metaspace-marked word boundaries, merging the marker into the next piece.
    pub fn metaspace(marker: &str) -> Self {
        Self::new(marker, SplitBehavior::MergeWithNext, false)
    }

    /// The GPT-2 byte-level contraction splitter.
    pub fn byte_level() -> Self {
        Self::new(
            r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+",
            SplitBehavior::Isolate,
            false,
        )
    }

    /// Digit isolation, one piece per digit or one piece per digit run.
    pub fn digits(individual: bool) -> Self {
        let behavior = if individual {
            SplitBehavior::Isolate
        } else {
            SplitBehavior::Contiguous
        };
        Self::new(r"\p{Nd}|\p{Nl}|\p{No}", behavior, false)
    }

    pub fn punctuation() -> Self {
        Self::new(r"\p{P}", SplitBehavior::Isolate, false)
    }

    /// Isolates verbatim token strings, meta-escaping every pattern character.
    pub fn special_tokens(tokens: &[String]) -> Self {
        let pattern = tokens.iter().map(|token| quote_meta(token)).collect::<Vec<_>>().join("|");
        Self::new(pattern, SplitBehavior::Isolate, false)
    }

    /// Renders this split over a `[outer_begins, outer_ends, begins, ends, bytes]` group.
    pub fn render(&self, builder: &mut GraphBuilder, group: &[TensorId]) -> Result<[TensorId; 5], BuildError> {
        let (outer, _) = split_ragged(group)?;
        if outer.len() != 2 {
            return Err(GraphError::UnexpectedNesting(group.len()).into());
        }
        let mut inputs = Vec::from(group);
        inputs.push(builder.string_constant(self.pattern.as_bytes()));
        if !self.protected.is_empty() {
            let items = self.protected.iter().map(|token| Vec::from(token.as_bytes())).collect::<Vec<_>>();
            inputs.extend(builder.ragged_string_constant(&items));
        }
        let outputs = builder.apply(
            Op::RegexSplit {
                behavior:   self.behavior,
                invert:     self.invert,
                max_splits: self.max_splits,
            },
            &inputs,
            &[
                ElementType::I32,
                ElementType::I32,
                ElementType::I32,
                ElementType::I32,
                ElementType::U8,
            ],
        );
        Ok([outputs[0], outputs[1], outputs[2], outputs[3], outputs[4]])
    }
}

/// Fuses adjacent splits with identical behavior, inversion and no split limit
/// by or-joining their patterns left to right, and drops a plain whitespace
/// split adjacent to a metaspace split that already divides on the marker.
/// Running the pass twice yields the same list.
pub fn fuse(steps: Vec<PreTokenization>) -> Vec<PreTokenization> {
    let mut fused: Vec<PreTokenization> = Vec::with_capacity(steps.len());
    for step in steps {
        match (fused.last_mut(), step) {
            (Some(PreTokenization::Split(prev)), PreTokenization::Split(next))
                if prev.pattern == Split::bert_whitespace().pattern
                    && prev.behavior == SplitBehavior::Remove
                    && !prev.invert
                    && next.behavior == SplitBehavior::MergeWithNext =>
            {
                *prev = next;
            }
            (Some(PreTokenization::Split(prev)), PreTokenization::Split(next))
                if prev.behavior == next.behavior
                    && prev.invert == next.invert
                    && prev.max_splits == -1
                    && next.max_splits == -1
                    && prev.protected.is_empty()
                    && next.protected.is_empty() =>
            {
                prev.pattern.push('|');
                prev.pattern.push_str(&next.pattern);
            }
            (_, step) => fused.push(step),
        }
    }
    fused
}
