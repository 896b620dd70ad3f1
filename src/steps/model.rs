//! Tokenization model steps: mapping pre-tokenized pieces to token ids.

use alloc::string::String;
use alloc::vec::Vec;

use crate::graph::{split_ragged, ConstantData, ElementType, GraphBuilder, GraphError, Op, TensorId};
use crate::vocab::{Merges, Scores, TokenBytes, TokenId, Vocab};

use super::BuildError;

/// Merge-cache entries reserved regardless of vocabulary size.
pub const MIN_CACHE_CAPACITY: u32 = 20_000;
/// Merge-cache entries per vocabulary entry above the floor.
pub const VOCAB_CACHE_PROPORTION: f32 = 0.2;

/// The merge-cache capacity for a BPE model: the configured value when given,
/// else a share of the vocabulary size, floored at [`MIN_CACHE_CAPACITY`].
pub fn bpe_cache_capacity(configured: Option<u32>, vocab_size: usize) -> u32 {
    let derived = configured.unwrap_or((vocab_size as f32 * VOCAB_CACHE_PROPORTION) as u32);
    derived.max(MIN_CACHE_CAPACITY)
}

/// Shared pipeline state handed to the model render.
#[derive(Debug)]
pub struct ModelContext<'a> {
    /// The finalized vocabulary.
    pub vocab:       &'a Vocab,
    /// The vocabulary rendered once as a ragged string constant triple.
    pub vocab_group: [TensorId; 3],
    /// Added tokens as `(content, id)`, in declaration order, unremapped.
    pub added:       &'a [(TokenBytes, TokenId)],
    /// Whether the pipeline remaps bytes to printable characters.
    pub byte_level:  bool,
}

/// A tokenization model step.
///
/// Renders over a `[outer_begins, outer_ends, begins, ends, bytes]` group and
/// produces the ragged `[begins, ends, ids]` triple for assembly.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Deserialize, serde::Serialize))]
pub enum Model {
    /// Greedy longest-prefix matching with a continuation prefix.
    WordPiece {
        unk_token:          String,
        suffix_indicator:   String,
        max_bytes_per_word: u32,
    },
    /// Ranked pairwise merges.
    Bpe {
        merges:           Merges,
        unk_token:        String,
        fuse_unk:         bool,
        suffix_indicator: String,
        end_suffix:       String,
        byte_fallback:    bool,
        cache_capacity:   u32,
    },
    /// Optimal segmentation over scored pieces.
    Unigram {
        scores:        Scores,
        unk_token_id:  TokenId,
        byte_fallback: bool,
    },
    /// Exact-match lookup with a default id for misses.
    WordLevel { default_id: i32 },
    /// Exact-match lookup over dense gap-filled indices.
    Trie,
}

impl Model {
    /// Renders this model over a nested ragged string group.
    pub fn render(
        &self,
        builder: &mut GraphBuilder,
        group: &[TensorId],
        context: &ModelContext,
    ) -> Result<[TensorId; 3], BuildError> {
        let (outer, inner) = split_ragged(group)?;
        if outer.len() != 2 {
            return Err(GraphError::UnexpectedNesting(group.len()).into());
        }
        let ragged = [ElementType::I32, ElementType::I32, ElementType::I32];
        let outputs = match self {
            Self::WordPiece {
                unk_token,
                suffix_indicator,
                max_bytes_per_word,
            } => {
                let unk_id = context
                    .vocab
                    .id_of(unk_token.as_bytes())
                    .ok_or_else(|| BuildError::MissingToken(unk_token.clone()))?;
                let mut inputs = Vec::from(group);
                inputs.extend(context.vocab_group);
                inputs.push(builder.scalar_i32(unk_id as i32));
                builder.apply(
                    Op::WordpieceTokenizer {
                        suffix_indicator:   suffix_indicator.clone(),
                        max_bytes_per_word: *max_bytes_per_word,
                    },
                    &inputs,
                    &ragged,
                )
            }
            Self::Bpe {
                merges,
                unk_token,
                fuse_unk,
                suffix_indicator,
                end_suffix,
                byte_fallback,
                cache_capacity,
            } => {
                let mut inputs = Vec::from(group);
                inputs.extend(context.vocab_group);
                let left = merges.iter().map(|(left, _)| left.clone()).collect::<Vec<_>>();
                let right = merges.iter().map(|(_, right)| right.clone()).collect::<Vec<_>>();
                inputs.extend(builder.ragged_string_constant(&left));
                inputs.extend(builder.ragged_string_constant(&right));
                if !context.added.is_empty() {
                    let contents = context.added.iter().map(|(content, _)| content.clone()).collect::<Vec<_>>();
                    let mut special = builder.ragged_string_constant(&contents);
                    if context.byte_level {
                        let widened = builder.add_ragged_dimension(special);
                        let remapped = builder.apply(Op::BytesToChars, &widened, &[
                            ElementType::I32,
                            ElementType::I32,
                            ElementType::I32,
                            ElementType::I32,
                            ElementType::U8,
                        ]);
                        special = [remapped[2], remapped[3], remapped[4]];
                    }
                    inputs.extend(special);
                    let ids = context.added.iter().map(|(_, id)| *id as i32).collect::<Vec<_>>();
                    inputs.push(builder.constant(ConstantData::I32(ids)));
                }
                builder.apply(
                    Op::BpeTokenizer {
                        unk_token:        unk_token.clone(),
                        fuse_unk:         *fuse_unk,
                        suffix_indicator: suffix_indicator.clone(),
                        end_suffix:       end_suffix.clone(),
                        byte_fallback:    *byte_fallback,
                        cache_capacity:   *cache_capacity,
                    },
                    &inputs,
                    &ragged,
                )
            }
            Self::Unigram {
                scores,
                unk_token_id,
                byte_fallback,
            } => {
                if scores.len() != context.vocab.len() {
                    return Err(BuildError::LengthMismatch(scores.len(), context.vocab.len()));
                }
                let mut inputs = Vec::from(group);
                inputs.extend(context.vocab_group);
                inputs.push(builder.constant(ConstantData::F32(scores.clone())));
                builder.apply(
                    Op::UnigramTokenizer {
                        unk_token_id:  *unk_token_id as i32,
                        byte_fallback: *byte_fallback,
                    },
                    &inputs,
                    &ragged,
                )
            }
            Self::WordLevel { default_id } => {
                let values = (0 .. context.vocab.len() as i32).collect::<Vec<_>>();
                let values = builder.constant(ConstantData::I32(values));
                let default = builder.scalar_i32(*default_id);
                let inputs = [
                    inner[0],
                    inner[1],
                    inner[2],
                    context.vocab_group[0],
                    context.vocab_group[1],
                    context.vocab_group[2],
                    values,
                    default,
                ];
                let ids = builder.apply1(Op::VocabEncoder, &inputs, ElementType::I32);
                return Ok([outer[0], outer[1], ids]);
            }
            Self::Trie => {
                let indices = (0 .. context.vocab.len() as i32).collect::<Vec<_>>();
                let mut inputs = Vec::from(group);
                inputs.extend(context.vocab_group);
                inputs.push(builder.constant(ConstantData::I32(indices)));
                builder.apply(Op::TrieTokenizer, &inputs, &ragged)
            }
        };
        Ok([outputs[0], outputs[1], outputs[2]])
    }
}
