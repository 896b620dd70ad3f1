//! The pipeline: an ordered description of a whole tokenizer and its
//! rendering into tokenizer and detokenizer graphs.
//!
//! Construction is two-phase. A format parser fills a [`PipelineBuilder`] with
//! steps and shared state, then [`PipelineBuilder::finalize`] resolves every
//! cross-step dependency against the frozen vocabulary and returns an
//! immutable [`Pipeline`]. [`Pipeline::build`] renders the graphs and returns
//! them as [`Artifacts`] together with the extension points later
//! transformations rewire.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use bstr::ByteSlice;
use hashbrown::HashSet;

use crate::artifacts::{
    Artifacts, ExtensionPoints, Metadata, Source, SpecialIds, TogglePoint, TruncationPoint,
};
use crate::config::{Configuration, Side};
use crate::graph::{split_ragged, ElementType, Graph, GraphBuilder, GraphError, Op, Shape, TensorId};
use crate::steps::model::ModelContext;
use crate::steps::split::remap_byte_level;
use crate::steps::{
    decoding, normalization, split, BuildError, Combine, Decoding, Model, Normalization, Padding,
    PreTokenization, Split, Truncation,
};
use crate::transform;
use crate::vocab::{AddedToken, TokenBytes, TokenId, Vocab};

/// Name of the emitted tokenizer graph.
pub const TOKENIZER_NAME: &str = "tokenizer";
/// Name of the emitted detokenizer graph.
pub const DETOKENIZER_NAME: &str = "detokenizer";

/// Whitespace characters consumed by right-stripping added tokens.
const SPACE_SYMBOLS: [&str; 6] = [" ", "\t", "\n", "\r", "\x0b", "\x0c"];

/// Whitespace-suffixed copies of a token, one and two symbols deep, matching
/// inputs where surrounding whitespace was absorbed into the token.
fn space_variants(content: &str) -> Vec<String> {
    let mut variants = Vec::with_capacity(SPACE_SYMBOLS.len() * (SPACE_SYMBOLS.len() + 1));
    for first in SPACE_SYMBOLS {
        let one = format!("{content}{first}");
        variants.push(one.clone());
        for second in SPACE_SYMBOLS {
            variants.push(format!("{one}{second}"));
        }
    }
    variants
}

/// The text a token takes inside the vocabulary: byte-level pipelines store
/// tokens in their printable remapping.
fn effective_text(content: &[u8], byte_level: bool) -> TokenBytes {
    if byte_level {
        remap_byte_level(content)
    } else {
        Vec::from(content)
    }
}

/// How vocabulary entries are rewritten for the decode vocabulary.
///
/// The tokenizer and the detokenizer carry separate vocabulary constants; the
/// decode copy bakes word boundaries into the entries so the decode chain only
/// concatenates and cleans up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DecodeRewrite {
    /// Entries decode to their exact bytes.
    #[default]
    Verbatim,
    /// Word-initial entries gain a leading space; entries starting with the
    /// continuation prefix keep it for the decode chain to strip.
    WordBoundary { subword_prefix: String },
    /// Metaspace markers decode to spaces.
    Metaspace,
    /// Listed entries decode with surrounding spaces.
    Spaced { tokens: Vec<TokenBytes> },
}

/// Mutable parse state for a pipeline under construction.
///
/// Parsers push steps in source order and set shared state as they encounter
/// it; nothing is validated or resolved until [`PipelineBuilder::finalize`].
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    pub configuration:    Configuration,
    pub normalization:    Vec<Normalization>,
    pub pre_tokenization: Vec<PreTokenization>,
    pub model:            Option<Model>,
    pub truncation:       Option<Truncation>,
    pub combine:          Option<Combine>,
    pub pair_combine:     Option<Combine>,
    pub padding:          Option<Padding>,
    pub decoding:         Vec<Decoding>,
    pub vocab:            Vocab,
    pub added_tokens:     Vec<AddedToken>,
    pub decode_rewrite:   DecodeRewrite,
    pub specials:         SpecialIds,
    pub source:           Source,
}

impl PipelineBuilder {
    pub fn new(configuration: Configuration) -> Self {
        Self {
            configuration,
            ..Self::default()
        }
    }

    pub fn push_normalization(&mut self, step: Normalization) {
        self.normalization.push(step);
    }

    pub fn push_pre_tokenization(&mut self, step: PreTokenization) {
        self.pre_tokenization.push(step);
    }

    pub fn push_decoding(&mut self, step: Decoding) {
        self.decoding.push(step);
    }

    pub fn add_token(&mut self, token: AddedToken) {
        self.added_tokens.push(token);
    }

    /// Resolves every deferred dependency and freezes the pipeline.
    ///
    /// In order: the configuration is validated; added tokens get their ids
    /// resolved, with unknown tokens appended to the vocabulary; each added
    /// token is placed at its declared id, extending the vocabulary with empty
    /// placeholders but never displacing a different token; unigram scores are
    /// extended for newly inserted entries; adjacent compatible steps are
    /// fused; added tokens are registered as protected literals with every
    /// split step and a dedicated special-token splitter is inserted ahead of
    /// pre-tokenization; combine templates and the padding token resolve their
    /// ids.
    pub fn finalize(mut self) -> Result<Pipeline, BuildError> {
        self.configuration.validate()?;
        let mut model = self.model.ok_or(BuildError::MissingModel)?;
        let byte_level = self
            .pre_tokenization
            .iter()
            .any(|step| matches!(step, PreTokenization::ByteRemap));

        let mut injected: Vec<(TokenBytes, TokenId)> = Vec::new();
        for token in self.added_tokens.iter_mut() {
            if token.id.is_some() {
                continue;
            }
            let text = effective_text(&token.content, byte_level);
            token.id = Some(match self.vocab.id_of(&text) {
                Some(id) => id,
                None => {
                    let id = self.vocab.insert(text.clone());
                    injected.push((text, id));
                    id
                }
            });
        }

        let mut ordered = self.added_tokens;
        ordered.sort_by(|a, b| (a.id, &a.content).cmp(&(b.id, &b.content)));

        for token in &ordered {
            let Some(id) = token.id else { continue };
            let text = effective_text(&token.content, byte_level);
            if self.vocab.id_of(&text).is_some() {
                continue;
            }
            match self.vocab.token(id) {
                Some(existing) if !existing.is_empty() => {
                    log::warn!(
                        "added token {:?} declares id {} already holding a different token, keeping the original",
                        token.content.as_bstr(),
                        id
                    );
                }
                _ => {
                    injected.push((text.clone(), id));
                    self.vocab.set(id, text);
                }
            }
        }

        if let Model::Unigram { scores, .. } = &mut model {
            if !injected.is_empty() {
                let max_score = scores.iter().copied().fold(f32::MIN, f32::max);
                for (text, id) in &injected {
                    let at = *id as usize;
                    if at >= scores.len() {
                        scores.resize(at + 1, 0.0);
                    }
                    scores[at] = max_score * text.len() as f32 - 0.1;
                }
                if scores.len() < self.vocab.len() {
                    scores.resize(self.vocab.len(), 0.0);
                }
            }
        }

        let mut added = Vec::new();
        let mut protected = Vec::new();
        let mut seen: HashSet<TokenBytes> = HashSet::new();
        for token in &ordered {
            let Some(id) = token.id else { continue };
            if !seen.insert(token.content.clone()) {
                continue;
            }
            let text = String::from_utf8_lossy(&token.content).into_owned();
            added.push((token.content.clone(), id));
            protected.push(text.clone());
            if token.rstrip {
                for variant in space_variants(&text) {
                    let bytes = Vec::from(variant.as_bytes());
                    if seen.insert(bytes.clone()) {
                        added.push((bytes, id));
                        protected.push(variant);
                    }
                }
            }
        }
        // longer literals first so the splitter alternation prefers them
        protected.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| b.cmp(a)));
        protected.dedup();

        self.normalization = normalization::fuse(self.normalization)?;
        self.pre_tokenization = split::fuse(self.pre_tokenization);
        for step in self.pre_tokenization.iter_mut() {
            if let PreTokenization::Split(split) = step {
                split.protected = protected.clone();
            }
        }
        if !protected.is_empty() && self.configuration.handle_special_tokens_with_re != Some(false) {
            self.pre_tokenization.insert(0, PreTokenization::Split(Split::special_tokens(&protected)));
        }
        self.decoding = decoding::fuse(self.decoding);

        let remap = |text: &str| effective_text(text.as_bytes(), byte_level);
        if let Some(combine) = self.combine.as_mut() {
            combine.resolve(&self.vocab, remap);
        }
        if let Some(pair) = self.pair_combine.as_mut() {
            pair.resolve(&self.vocab, remap);
        }

        let mut padding = self.padding.unwrap_or_default();
        if padding.token_id.is_none() {
            if let Some(token) = padding.token.clone() {
                let text = effective_text(token.as_bytes(), byte_level);
                padding.token_id = Some(self.vocab.id_of(&text).ok_or(BuildError::MissingToken(token))?);
            }
        }
        let mut specials = self.specials;
        if specials.pad.is_none() {
            specials.pad = padding.token_id;
        }

        Ok(Pipeline {
            configuration: self.configuration,
            normalization: self.normalization,
            pre_tokenization: self.pre_tokenization,
            model,
            truncation: self.truncation,
            combine: self.combine,
            pair_combine: self.pair_combine,
            padding,
            decoding: self.decoding,
            vocab: self.vocab,
            added,
            decode_rewrite: self.decode_rewrite,
            specials,
            source: self.source,
            byte_level,
        })
    }
}

/// A finalized tokenizer description, ready for graph emission.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    configuration:    Configuration,
    normalization:    Vec<Normalization>,
    pre_tokenization: Vec<PreTokenization>,
    model:            Model,
    truncation:       Option<Truncation>,
    combine:          Option<Combine>,
    pair_combine:     Option<Combine>,
    padding:          Padding,
    decoding:         Vec<Decoding>,
    vocab:            Vocab,
    added:            Vec<(TokenBytes, TokenId)>,
    decode_rewrite:   DecodeRewrite,
    specials:         SpecialIds,
    source:           Source,
    byte_level:       bool,
}

impl Pipeline {
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    /// Added tokens as `(content, id)`, variants included.
    pub fn added(&self) -> &[(TokenBytes, TokenId)] {
        &self.added
    }

    pub fn normalization(&self) -> &[Normalization] {
        &self.normalization
    }

    pub fn pre_tokenization(&self) -> &[PreTokenization] {
        &self.pre_tokenization
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn truncation(&self) -> Option<&Truncation> {
        self.truncation.as_ref()
    }

    pub fn combine(&self) -> Option<&Combine> {
        self.combine.as_ref()
    }

    pub fn pair_combine(&self) -> Option<&Combine> {
        self.pair_combine.as_ref()
    }

    pub fn padding(&self) -> &Padding {
        &self.padding
    }

    pub fn decoding(&self) -> &[Decoding] {
        &self.decoding
    }

    pub fn specials(&self) -> &SpecialIds {
        &self.specials
    }

    /// Renders the pipeline into graphs.
    ///
    /// The tokenizer is emitted with a single string input; a paired-input
    /// configuration widens it afterwards through the recorded extension
    /// points. Boundary tensors are emitted as `i32` and converted last when
    /// the configuration asks for a different width.
    pub fn build(&self) -> Result<Artifacts, BuildError> {
        let mut points = ExtensionPoints::default();
        let tokenizer = self.build_tokenizer(&mut points)?;
        let detokenizer = if self.configuration.with_detokenizer {
            Some(self.build_detokenizer(&mut points)?)
        } else {
            None
        };
        let metadata = Metadata {
            configuration: self.configuration.clone(),
            version:       String::from(env!("CARGO_PKG_VERSION")),
            source:        self.source,
            specials:      self.specials,
            single:        self.combine.clone(),
            pair:          self.pair_combine.clone(),
        };
        let mut artifacts = Artifacts {
            tokenizer,
            detokenizer,
            metadata,
            points,
        };
        if self.configuration.number_of_inputs == 2 {
            transform::widen_to_pair(&mut artifacts)?;
        }
        transform::change_outputs_type(&mut artifacts.tokenizer, self.configuration.tokenizer_output_type);
        if let Some(detokenizer) = artifacts.detokenizer.as_mut() {
            transform::change_inputs_type(detokenizer, self.configuration.detokenizer_input_type);
        }
        Ok(artifacts)
    }

    fn build_tokenizer(&self, points: &mut ExtensionPoints) -> Result<Graph, BuildError> {
        let mut builder = GraphBuilder::new(TOKENIZER_NAME);
        let input = builder.parameter(ElementType::Str, Shape::from([-1]));
        points.input = Some(input);
        points.unpack = Some(builder.next_node());
        let unpacked = builder.apply(Op::StringUnpack, &[input], &[
            ElementType::I32,
            ElementType::I32,
            ElementType::U8,
        ]);

        let mut flat = [unpacked[0], unpacked[1], unpacked[2]];
        for step in &self.normalization {
            flat = step.render(&mut builder, flat);
        }
        let mut group = Vec::from(builder.add_ragged_dimension(flat));
        for step in &self.pre_tokenization {
            group = Vec::from(step.render(&mut builder, &group)?);
        }

        let vocab_group = builder.ragged_string_constant(self.vocab.tokens());
        let context = ModelContext {
            vocab: &self.vocab,
            vocab_group,
            added: &self.added,
            byte_level: self.byte_level,
        };
        let mut sequence = self.model.render(&mut builder, &group, &context)?;
        points.sequence = Some(sequence);

        if let Some(truncation) = &self.truncation {
            sequence = truncation.render(&mut builder, &sequence)?;
            points.truncation = Some(TruncationPoint {
                max_length: truncation.max_length,
                right:      truncation.side == Side::Right,
            });
        }

        let (ids, segments) = match &self.combine {
            Some(combine) => {
                let output = combine.render(&mut builder, &[sequence])?;
                points.combine = Some(output.node);
                for (slot, count) in output.gates {
                    points.special_ends.push(TogglePoint {
                        node:  output.node,
                        slot,
                        value: count,
                    });
                }
                (output.ids, Some(output.segments))
            }
            None => (sequence, None),
        };

        let mut padded_inputs = Vec::from(ids);
        if let Some(segments) = segments {
            padded_inputs.extend(segments);
        }
        let padded = self.padding.render(&mut builder, &padded_inputs)?;
        builder.output(padded.ids, "input_ids");
        if let Some(segments) = padded.segments {
            builder.output(segments, "token_type_ids");
        }
        if self.configuration.add_attention_mask {
            builder.output(padded.mask, "attention_mask");
        }
        Ok(builder.finish())
    }

    fn build_detokenizer(&self, points: &mut ExtensionPoints) -> Result<Graph, BuildError> {
        if !self.decoding.iter().any(|step| matches!(step, Decoding::VocabDecode { .. })) {
            return Err(BuildError::MissingDecoder);
        }
        let mut builder = GraphBuilder::new(DETOKENIZER_NAME);
        let ids = builder.parameter(ElementType::I32, Shape::from([-1, -1]));
        let vocab_group = builder.ragged_string_constant(&self.decode_tokens());

        let mut chain: Vec<TensorId> = Vec::from([ids]);
        for step in &self.decoding {
            chain = step.render(&mut builder, &chain, vocab_group)?;
            if let Decoding::VocabDecode { skip_tokens, .. } = step {
                let graph = builder.graph();
                let decoder = graph.tensor(chain[0]).producer;
                let bound = graph.node(decoder).inputs[4];
                points.skip = Some(TogglePoint {
                    node:  graph.tensor(bound).producer,
                    slot:  2,
                    value: skip_tokens.len() as i32,
                });
            }
        }

        let (outer, flat) = split_ragged(&chain)?;
        if !outer.is_empty() {
            return Err(GraphError::UnexpectedNesting(chain.len()).into());
        }
        let packed = builder.apply1(Op::StringPack, &flat, ElementType::Str);
        builder.output(packed, "string_output");
        Ok(builder.finish())
    }

    /// The decode vocabulary: every entry rewritten per the decode policy,
    /// with added tokens and placeholders kept verbatim.
    fn decode_tokens(&self) -> Vec<TokenBytes> {
        let added_ids = self.added.iter().map(|(_, id)| *id).collect::<HashSet<_>>();
        self.vocab
            .tokens()
            .iter()
            .enumerate()
            .map(|(id, token)| {
                match &self.decode_rewrite {
                    // spacing targets special entries, so it precedes the
                    // verbatim rule for added tokens
                    DecodeRewrite::Spaced { tokens } if tokens.iter().any(|entry| entry == token) => {
                        let mut out = Vec::with_capacity(token.len() + 2);
                        out.push(b' ');
                        out.extend_from_slice(token);
                        out.push(b' ');
                        out
                    }
                    _ if token.is_empty() || added_ids.contains(&(id as TokenId)) => token.clone(),
                    DecodeRewrite::Verbatim | DecodeRewrite::Spaced { .. } => token.clone(),
                    DecodeRewrite::WordBoundary { subword_prefix } => {
                        if !subword_prefix.is_empty() && token.starts_with(subword_prefix.as_bytes()) {
                            token.clone()
                        } else {
                            let mut out = Vec::with_capacity(token.len() + 1);
                            out.push(b' ');
                            out.extend_from_slice(token);
                            out
                        }
                    }
                    DecodeRewrite::Metaspace => token.replace("\u{2581}".as_bytes(), b" "),
                }
            })
            .collect()
    }
}
