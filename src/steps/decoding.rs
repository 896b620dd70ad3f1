//! Decoding steps: token ids back to text.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::graph::{split_ragged, ConstantData, ElementType, GraphBuilder, GraphError, Op, TensorId};

use super::BuildError;

/// One step of the detokenizer chain.
///
/// The chain begins with [`Decoding::VocabDecode`], which expands ids into a
/// nested ragged string batch; later steps operate on the innermost triple and
/// pass any outer dimensions through unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Deserialize, serde::Serialize))]
pub enum Decoding {
    /// Looks token ids up in the decode vocabulary.
    ///
    /// Ids in `skip_tokens` decode to empty strings when `skip` is set. The
    /// list enters the graph in full behind a slice whose bound is `len` or
    /// `0`, so the same graph serves both behaviors by varying the bound.
    VocabDecode { skip_tokens: Vec<i32>, skip: bool },
    /// Regex search and replace over decoded strings.
    Replace { pairs: Vec<(String, String)> },
    /// Collapses the inner ragged dimension, joining per-token strings into
    /// one string per row.
    Fuse,
    /// Expands `<0xNN>` byte tokens into raw bytes.
    ByteFallback,
    /// Inverse byte-level remapping, joining per-token characters back into
    /// raw bytes per row.
    CharsToBytes,
    /// UTF-8 validation of the decoded bytes.
    Utf8Validate { replace: bool },
}

impl Decoding {
    pub fn replace(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self::Replace {
            pairs: Vec::from([(pattern.into(), replacement.into())]),
        }
    }

    /// Removes the word-boundary space the decode vocabulary prepends to the
    /// first word of a row.
    pub fn strip_forward_space() -> Self {
        Self::replace("^ ", "")
    }

    /// Removes a literal prefix from the start of a row.
    pub fn strip_left(content: &str) -> Self {
        Self::replace(format!("^{content}"), "")
    }

    /// Rewrites end-of-word suffixes into word-separating spaces.
    pub fn replace_end_of_word_suffix(suffix: &str) -> Self {
        Self::replace(suffix, " ")
    }

    /// Removes the trailing space left by the end-of-word suffix of the last
    /// word in a row.
    pub fn rstrip_space() -> Self {
        Self::replace(" $", "")
    }

    /// Removes continuation markers from subword tokens.
    pub fn remove_subword_prefix(prefix: &str) -> Self {
        Self::replace(prefix, "")
    }

    /// Rewrites SentencePiece space markers back into spaces.
    pub fn replace_metaspace() -> Self {
        Self::replace("▁", " ")
    }

    /// Removes the spaces tokenization inserts before punctuation and
    /// contraction suffixes.
    pub fn clean_up_tokenization_spaces() -> Self {
        Self::replace(r" ([\.\?\!,])| ('[ms])| (') | ('[rv]e)| (n't)", r"\1")
    }

    /// Renders the step, threading the tensor list of the decode chain.
    ///
    /// `vocab_group` is the decode vocabulary as a ragged string constant;
    /// only [`Decoding::VocabDecode`] consumes it.
    pub fn render(
        &self,
        builder: &mut GraphBuilder,
        inputs: &[TensorId],
        vocab_group: [TensorId; 3],
    ) -> Result<Vec<TensorId>, BuildError> {
        match self {
            Self::VocabDecode { skip_tokens, skip } => {
                let mut decoder_inputs = Vec::from(inputs);
                decoder_inputs.extend(vocab_group);
                let ids = builder.constant(ConstantData::I32(skip_tokens.clone()));
                let start = builder.constant(ConstantData::I32(Vec::from([0])));
                let bound = if *skip { skip_tokens.len() as i32 } else { 0 };
                let stop = builder.constant(ConstantData::I32(Vec::from([bound])));
                let step = builder.constant(ConstantData::I32(Vec::from([1])));
                let skip_ids = builder.apply1(Op::Slice, &[ids, start, stop, step], ElementType::I32);
                decoder_inputs.push(skip_ids);
                Ok(builder.apply(Op::VocabDecoder, &decoder_inputs, &[
                    ElementType::I32,
                    ElementType::I32,
                    ElementType::I32,
                    ElementType::I32,
                    ElementType::U8,
                ]))
            }
            Self::Replace { pairs } => {
                let (outer, [begins, ends, data]) = split_ragged(inputs)?;
                let mut replace_inputs = Vec::from([begins, ends, data]);
                for (pattern, replacement) in pairs {
                    replace_inputs.push(builder.string_constant(pattern.as_bytes()));
                    replace_inputs.push(builder.string_constant(replacement.as_bytes()));
                }
                let replaced = builder.apply(Op::RegexNormalization { global: true }, &replace_inputs, &[
                    ElementType::I32,
                    ElementType::I32,
                    ElementType::U8,
                ]);
                Ok(outer.iter().copied().chain(replaced).collect())
            }
            Self::Fuse => {
                let (outer, [begins, ends, data]) = split_ragged(inputs)?;
                if outer.is_empty() {
                    return Err(GraphError::UnexpectedNesting(inputs.len()).into());
                }
                let fused = builder.apply(
                    Op::FuseRagged,
                    &[outer[0], outer[1], begins, ends],
                    &[ElementType::I32, ElementType::I32],
                );
                Ok(Vec::from([fused[0], fused[1], data]))
            }
            Self::ByteFallback => {
                let (outer, [begins, ends, data]) = split_ragged(inputs)?;
                let expanded = builder.apply(Op::ByteFallback, &[begins, ends, data], &[
                    ElementType::I32,
                    ElementType::I32,
                    ElementType::U8,
                ]);
                Ok(outer.iter().copied().chain(expanded).collect())
            }
            Self::CharsToBytes => {
                let (outer, _) = split_ragged(inputs)?;
                if outer.is_empty() {
                    return Err(GraphError::UnexpectedNesting(inputs.len()).into());
                }
                Ok(builder.apply(Op::CharsToBytes, inputs, &[
                    ElementType::I32,
                    ElementType::I32,
                    ElementType::U8,
                ]))
            }
            Self::Utf8Validate { replace } => {
                let (outer, [begins, ends, data]) = split_ragged(inputs)?;
                let validated = builder.apply(
                    Op::Utf8Validate {
                        replace_mode: *replace,
                    },
                    &[begins, ends, data],
                    &[ElementType::I32, ElementType::I32, ElementType::U8],
                );
                Ok(outer.iter().copied().chain(validated).collect())
            }
        }
    }
}

/// Merges consecutive replacement steps into single multi-pattern nodes.
pub fn fuse(steps: Vec<Decoding>) -> Vec<Decoding> {
    let mut fused: Vec<Decoding> = Vec::with_capacity(steps.len());
    for step in steps {
        match (fused.last_mut(), step) {
            (Some(Decoding::Replace { pairs }), Decoding::Replace { pairs: next }) => {
                pairs.extend(next);
            }
            (_, step) => fused.push(step),
        }
    }
    fused
}
