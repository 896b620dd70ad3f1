//! Post-tokenization steps: truncation, segment assembly and padding.

use alloc::string::String;
use alloc::vec::Vec;

use crate::config::Side;
use crate::graph::{
    split_ragged, ConstantData, ElementType, GraphBuilder, GraphError, NodeId, Op, TensorId,
};
use crate::vocab::{TokenId, Vocab};

use super::BuildError;

/// Truncates ragged token rows to a length budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Deserialize, serde::Serialize))]
pub struct Truncation {
    /// The per-row length cap, with room for added tokens already subtracted.
    pub max_length: i32,
    pub side:       Side,
}

impl Truncation {
    /// A truncation to `max_length` minus the tokens the combine template adds.
    pub fn budgeted(max_length: i32, side: Side, added_tokens: usize) -> Self {
        let added = added_tokens as i32;
        Self {
            max_length: i32::min(max_length.saturating_sub(added), i32::MAX - added),
            side,
        }
    }

    /// Renders over exactly one ragged `[begins, ends, ids]` triple.
    ///
    /// The effective length is `min(ends - begins, max_length)`; the right side
    /// keeps `[begins, begins + len)`, the left side `[ends - len, ends)`.
    pub fn render(&self, builder: &mut GraphBuilder, group: &[TensorId]) -> Result<[TensorId; 3], BuildError> {
        let (outer, [begins, ends, data]) = split_ragged(group)?;
        if !outer.is_empty() {
            return Err(GraphError::UnexpectedNesting(group.len()).into());
        }
        let lengths = builder.apply1(Op::Subtract, &[ends, begins], ElementType::I32);
        let cap = builder.scalar_i32(self.max_length);
        let lengths = builder.apply1(Op::Minimum, &[lengths, cap], ElementType::I32);
        Ok(match self.side {
            Side::Right => {
                let new_ends = builder.apply1(Op::Add, &[begins, lengths], ElementType::I32);
                [begins, new_ends, data]
            }
            Side::Left => {
                let new_begins = builder.apply1(Op::Subtract, &[ends, lengths], ElementType::I32);
                [new_begins, ends, data]
            }
        })
    }
}

/// One element of a combine template.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Deserialize, serde::Serialize))]
pub enum TemplateElement {
    /// A literal token inserted around or between sequences.
    Token {
        content: String,
        /// The vocabulary id, resolved during pipeline finalization.
        id:      Option<TokenId>,
        segment: i32,
        /// Unset when special-token insertion is disabled; the element still
        /// occupies its template slot with a zero-length span.
        enabled: bool,
    },
    /// One tokenized input sequence.
    Sequence { segment: i32 },
}

impl TemplateElement {
    pub fn token(content: impl Into<String>, segment: i32, enabled: bool) -> Self {
        Self::Token {
            content: content.into(),
            id: None,
            segment,
            enabled,
        }
    }
}

/// The rendered combine node with the handles transformations rewires later.
#[derive(Debug, Clone, PartialEq)]
pub struct CombineOutput {
    /// Ragged token ids.
    pub ids:      [TensorId; 3],
    /// Ragged segment ids, parallel to `ids`.
    pub segments: [TensorId; 3],
    pub node:     NodeId,
    /// `(input slot, token count)` for each literal group's gated ends input.
    pub gates:    Vec<(usize, i32)>,
}

/// One input group of a combine template: a tokenized sequence slot or a run
/// of consecutive literal tokens sharing a segment id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TemplateGroup {
    Sequence { segment: i32 },
    Tokens {
        tokens:  Vec<(String, Option<TokenId>)>,
        segment: i32,
        enabled: bool,
    },
}

/// Interleaves tokenized sequences with literal special tokens per a template.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Deserialize, serde::Serialize))]
pub struct Combine {
    pub template: Vec<TemplateElement>,
}

impl Combine {
    pub fn new(template: Vec<TemplateElement>) -> Self {
        Self { template }
    }

    /// The number of sequence slots the template expects.
    pub fn sequence_count(&self) -> usize {
        self.template
            .iter()
            .filter(|element| matches!(element, TemplateElement::Sequence { .. }))
            .count()
    }

    /// The number of literal tokens inserted when special tokens are enabled.
    pub fn added_count(&self) -> usize {
        self.template
            .iter()
            .filter(|element| matches!(element, TemplateElement::Token { enabled: true, .. }))
            .count()
    }

    /// Resolves unresolved literal token ids against the vocabulary.
    ///
    /// `remap` adjusts the looked-up text first, byte-level pipelines pass the
    /// byte-to-char table here.
    pub fn resolve(&mut self, vocab: &Vocab, remap: impl Fn(&str) -> Vec<u8>) {
        for element in self.template.iter_mut() {
            if let TemplateElement::Token { content, id, .. } = element {
                if id.is_none() {
                    *id = vocab.id_of(&remap(content));
                }
            }
        }
    }

    /// The template as combine input groups: consecutive literal tokens
    /// sharing a segment id collapse into one group, each sequence is its own.
    pub(crate) fn groups(&self) -> Vec<TemplateGroup> {
        let mut groups = Vec::new();
        let mut index = 0;
        while index < self.template.len() {
            match &self.template[index] {
                TemplateElement::Sequence { segment } => {
                    groups.push(TemplateGroup::Sequence { segment: *segment });
                    index += 1;
                }
                TemplateElement::Token { segment, enabled, .. } => {
                    let run_segment = *segment;
                    let run_enabled = *enabled;
                    let mut tokens = Vec::new();
                    while let Some(TemplateElement::Token {
                        content,
                        id,
                        segment,
                        ..
                    }) = self.template.get(index)
                    {
                        if *segment != run_segment {
                            break;
                        }
                        tokens.push((content.clone(), *id));
                        index += 1;
                    }
                    groups.push(TemplateGroup::Tokens {
                        tokens,
                        segment: run_segment,
                        enabled: run_enabled,
                    });
                }
            }
        }
        groups
    }

    /// Renders the combine node over the tokenized sequences.
    ///
    /// Disabled literal groups keep their `ends` select so insertion can be
    /// re-enabled downstream.
    pub fn render(
        &self,
        builder: &mut GraphBuilder,
        sequences: &[[TensorId; 3]],
    ) -> Result<CombineOutput, BuildError> {
        let expected = self.sequence_count();
        if expected != sequences.len() {
            return Err(GraphError::SequenceMismatch(expected, sequences.len()).into());
        }

        let mut inputs = Vec::new();
        let mut segment_ids = Vec::new();
        let mut gates = Vec::new();
        let mut sequence_iter = sequences.iter();
        for group in self.groups() {
            match group {
                TemplateGroup::Sequence { segment } => {
                    let triple = sequence_iter.next().ok_or(GraphError::SequenceMismatch(expected, 0))?;
                    inputs.extend(*triple);
                    segment_ids.push(segment);
                }
                TemplateGroup::Tokens { tokens, segment, enabled } => {
                    let ids = tokens
                        .into_iter()
                        .map(|(content, id)| id.map(|id| id as i32).ok_or(BuildError::MissingToken(content)))
                        .collect::<Result<Vec<_>, _>>()?;
                    let count = ids.len() as i32;
                    inputs.push(builder.scalar_i32(0));
                    let flag = builder.scalar_bool(enabled);
                    let count_const = builder.scalar_i32(count);
                    let zero = builder.scalar_i32(0);
                    let ends = builder.apply1(Op::Select, &[flag, count_const, zero], ElementType::I32);
                    gates.push((inputs.len(), count));
                    inputs.push(ends);
                    inputs.push(builder.constant(ConstantData::I32(ids)));
                    segment_ids.push(segment);
                }
            }
        }
        inputs.push(builder.constant(ConstantData::I32(segment_ids)));

        let node = builder.next_node();
        let outputs = builder.apply(Op::CombineSegments, &inputs, &[
            ElementType::I32,
            ElementType::I32,
            ElementType::I32,
            ElementType::I32,
            ElementType::I32,
            ElementType::I32,
        ]);
        Ok(CombineOutput {
            ids: [outputs[0], outputs[1], outputs[2]],
            segments: [outputs[3], outputs[4], outputs[5]],
            node,
            gates,
        })
    }
}

/// The dense tensors produced by padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaddedOutput {
    pub ids:      TensorId,
    pub segments: Option<TensorId>,
    pub mask:     TensorId,
}

/// Pads ragged token rows into a dense rectangle with an attention mask.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Deserialize, serde::Serialize))]
pub struct Padding {
    pub token:      Option<String>,
    pub token_id:   Option<TokenId>,
    /// Parsed from the source but not applied; segment rows pad with the same
    /// id as token rows.
    pub segment_id: Option<i32>,
    pub side:       Side,
    /// Fixed row length, `-1` when the batch maximum decides.
    pub max_length: i32,
    pub pad_to_max: bool,
}

impl Default for Padding {
    fn default() -> Self {
        Self {
            token:      None,
            token_id:   None,
            segment_id: None,
            side:       Side::Right,
            max_length: -1,
            pad_to_max: false,
        }
    }
}

impl Padding {
    /// Renders over whole ragged triples: token ids first, segment ids after
    /// when present. The mask derives from the first triple only.
    pub fn render(&self, builder: &mut GraphBuilder, inputs: &[TensorId]) -> Result<PaddedOutput, BuildError> {
        if inputs.len() % 3 != 0 || inputs.is_empty() {
            return Err(GraphError::InvalidGroupList(inputs.len()).into());
        }

        let target = if self.pad_to_max && self.max_length >= 0 {
            builder.scalar_i32(self.max_length)
        } else {
            let lengths = builder.apply1(Op::Subtract, &[inputs[1], inputs[0]], ElementType::I32);
            let axes = builder.scalar_i32(0);
            builder.apply1(Op::ReduceMax, &[lengths, axes], ElementType::I32)
        };
        let fill = builder.scalar_i32(self.token_id.map(|id| id as i32).unwrap_or(0));

        let mut dense = Vec::new();
        let mut mask = None;
        for triple in inputs.chunks(3).take(2) {
            let outputs = builder.apply(
                Op::RaggedToDense {
                    pad_right:      self.side == Side::Right,
                    pad_max_length: self.pad_to_max,
                },
                &[triple[0], triple[1], triple[2], target, fill],
                &[ElementType::I32, ElementType::Bool],
            );
            dense.push(outputs[0]);
            if mask.is_none() {
                mask = Some(builder.apply1(
                    Op::Convert {
                        to: ElementType::I32,
                    },
                    &[outputs[1]],
                    ElementType::I32,
                ));
            }
        }

        Ok(PaddedOutput {
            ids:      dense[0],
            segments: dense.get(1).copied(),
            mask:     mask.unwrap_or(dense[0]),
        })
    }
}
