//! Conversion for the tokenizers JSON description, as produced by the
//! HuggingFace `tokenizers` library and shipped as `tokenizer.json`.
//!
//! The description is parsed into a [`PipelineBuilder`] in five passes over
//! the top-level sections: added tokens, normalizers, pre-tokenizers, the
//! tokenization model, and post-processing with decoding. Step types outside
//! the supported set fail the conversion, except decoder steps, which are
//! skipped with a warning to keep the encode side of partially supported
//! descriptions usable.

#[cfg(feature = "std")]
use std::fs::File;
#[cfg(feature = "std")]
use std::io::Read;
#[cfg(feature = "std")]
use std::path::Path;

use alloc::collections::VecDeque;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use hashbrown::HashMap;

use crate::artifacts::Source;
use crate::charsmap::CharsMap;
use crate::config::{Configuration, Side, Utf8Mode};
use crate::convert::ConvertError;
use crate::graph::{SplitBehavior, UnicodeForm};
use crate::pipeline::{DecodeRewrite, Pipeline, PipelineBuilder};
use crate::regex::quote_meta;
use crate::steps::model::bpe_cache_capacity;
use crate::steps::{
    BuildError, Combine, Decoding, Model, Normalization, Padding, PreTokenization, Split,
    TemplateElement, Truncation,
};
use crate::vocab::{AddedToken, Merges, Scores, TokenId, Vocab};

mod hf {
    //! Serde mirror of the tokenizers JSON description.

    use alloc::string::{String, ToString};
    use alloc::vec::Vec;

    use base64::{alphabet, engine, Engine};
    use hashbrown::HashMap;
    use serde::{Deserialize, Deserializer};

    static BASE64: engine::GeneralPurpose =
        engine::GeneralPurpose::new(&alphabet::STANDARD, engine::general_purpose::PAD);

    fn from_base64<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>, {
        let encoded: String = Deserialize::deserialize(deserializer)?;
        BASE64.decode(&encoded).map_err(|e| serde::de::Error::custom(e.to_string()))
    }

    fn default_true() -> bool {
        true
    }

    fn default_split() -> SplitDelimiterBehavior {
        SplitDelimiterBehavior::Isolated
    }

    fn default_right() -> TruncationDirection {
        TruncationDirection::Right
    }

    fn default_prepend_scheme() -> PrependScheme {
        PrependScheme::Always
    }

    #[derive(Deserialize, Debug, Clone, PartialEq)]
    pub enum Pattern {
        String(String),
        Regex(String),
    }

    #[derive(Deserialize, Debug, Clone, PartialEq)]
    #[serde(tag = "type")]
    #[allow(clippy::upper_case_acronyms)]
    pub enum Normalizer {
        BertNormalizer {
            #[serde(default = "default_true")]
            clean_text:           bool,
            #[serde(default = "default_true")]
            handle_chinese_chars: bool,
            strip_accents:        Option<bool>,
            #[serde(default = "default_true")]
            lowercase:            bool,
        },
        Strip {
            strip_left:  bool,
            strip_right: bool,
        },
        StripAccents,
        NFC,
        NFD,
        NFKC,
        NFKD,
        Sequence {
            normalizers: Vec<Normalizer>,
        },
        Lowercase,
        Precompiled {
            #[serde(deserialize_with = "from_base64")]
            precompiled_charsmap: Vec<u8>,
        },
        Replace {
            pattern: Pattern,
            content: String,
        },
        Prepend {
            prepend: String,
        },
        #[serde(other)]
        Unsupported,
    }

    #[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
    #[serde(rename_all = "snake_case")]
    pub enum PrependScheme {
        First,
        Never,
        Always,
    }

    #[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SplitDelimiterBehavior {
        Removed,
        Isolated,
        MergedWithPrevious,
        MergedWithNext,
        Contiguous,
    }

    #[derive(Deserialize, Debug, Clone, PartialEq)]
    #[serde(tag = "type")]
    pub enum PreTokenizer {
        BertPreTokenizer,
        ByteLevel {
            add_prefix_space: bool,
            #[serde(default = "default_true")]
            use_regex:        bool,
        },
        Metaspace {
            replacement:      char,
            #[serde(default = "default_prepend_scheme")]
            prepend_scheme:   PrependScheme,
            add_prefix_space: Option<bool>,
            #[serde(default = "default_true")]
            split:            bool,
        },
        Whitespace,
        WhitespaceSplit,
        Sequence {
            pretokenizers: Vec<PreTokenizer>,
        },
        Split {
            pattern:  Option<Pattern>,
            #[serde(default = "default_split")]
            behavior: SplitDelimiterBehavior,
            #[serde(default)]
            invert:   bool,
        },
        Punctuation {
            #[serde(default = "default_split")]
            behavior: SplitDelimiterBehavior,
        },
        Digits {
            individual_digits: bool,
        },
        #[serde(other)]
        Unsupported,
    }

    #[derive(Deserialize, Debug, Clone, PartialEq)]
    #[serde(untagged)]
    pub enum Merge {
        Joined(String),
        Pair(String, String),
    }

    #[derive(Deserialize, Debug, Clone, PartialEq)]
    #[allow(clippy::upper_case_acronyms)]
    pub struct BPE {
        pub dropout:                   Option<f64>,
        pub unk_token:                 Option<String>,
        pub continuing_subword_prefix: Option<String>,
        pub end_of_word_suffix:        Option<String>,
        pub fuse_unk:                  Option<bool>,
        pub byte_fallback:             Option<bool>,
        pub vocab:                     HashMap<String, u32>,
        pub merges:                    Vec<Merge>,
    }

    #[derive(Deserialize, Debug, Clone, PartialEq)]
    pub struct Unigram {
        pub unk_id:        Option<u64>,
        pub vocab:         Vec<(String, f64)>,
        pub byte_fallback: Option<bool>,
    }

    #[derive(Deserialize, Debug, Clone, PartialEq)]
    pub struct WordPiece {
        pub unk_token:                 String,
        pub continuing_subword_prefix: String,
        pub max_input_chars_per_word:  Option<u32>,
        pub vocab:                     HashMap<String, u32>,
    }

    #[derive(Deserialize, Debug, Clone, PartialEq)]
    pub struct WordLevel {
        pub unk_token: String,
        pub vocab:     HashMap<String, u32>,
    }

    #[derive(Deserialize, Debug, Clone, PartialEq)]
    #[serde(tag = "type")]
    #[allow(clippy::upper_case_acronyms)]
    pub enum Model {
        BPE(BPE),
        Unigram(Unigram),
        WordPiece(WordPiece),
        WordLevel(WordLevel),
        #[serde(other)]
        Unsupported,
    }

    #[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
    pub enum TemplateSequence {
        A,
        B,
    }

    #[derive(Deserialize, Debug, Clone, PartialEq)]
    pub enum TemplatePiece {
        Sequence { id: TemplateSequence, type_id: u32 },
        SpecialToken { id: String, type_id: u32 },
    }

    #[derive(Deserialize, Debug, Clone, PartialEq)]
    #[serde(tag = "type")]
    pub enum PostProcessor {
        RobertaProcessing {
            sep: (String, u32),
            cls: (String, u32),
        },
        BertProcessing {
            sep: (String, u32),
            cls: (String, u32),
        },
        ByteLevel {},
        TemplateProcessing {
            single: Vec<TemplatePiece>,
            pair:   Option<Vec<TemplatePiece>>,
        },
        Sequence {
            processors: Vec<PostProcessor>,
        },
        #[serde(other)]
        Unsupported,
    }

    #[derive(Deserialize, Debug, Clone, PartialEq)]
    #[serde(tag = "type")]
    #[allow(clippy::upper_case_acronyms)]
    pub enum Decoder {
        BPEDecoder {
            suffix: String,
        },
        ByteLevel {},
        WordPiece {
            prefix:  String,
            cleanup: bool,
        },
        Metaspace {
            replacement:      char,
            #[serde(default = "default_prepend_scheme")]
            prepend_scheme:   PrependScheme,
            add_prefix_space: Option<bool>,
        },
        CTC {
            pad_token:            String,
            word_delimiter_token: String,
            cleanup:              bool,
        },
        Sequence {
            decoders: Vec<Decoder>,
        },
        Replace {
            pattern: Pattern,
            content: String,
        },
        Fuse,
        Strip {
            content: char,
            start:   u64,
            stop:    u64,
        },
        ByteFallback,
        #[serde(other)]
        Unsupported,
    }

    #[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
    pub enum TruncationDirection {
        Left,
        Right,
    }

    #[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
    pub enum TruncationStrategy {
        LongestFirst,
        OnlyFirst,
        OnlySecond,
    }

    #[derive(Deserialize, Debug, Clone, PartialEq)]
    pub struct TruncationParams {
        #[serde(default = "default_right")]
        pub direction:  TruncationDirection,
        pub max_length: usize,
        pub strategy:   Option<TruncationStrategy>,
        pub stride:     Option<usize>,
    }

    #[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
    pub enum PaddingDirection {
        Left,
        Right,
    }

    #[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
    pub enum PaddingStrategy {
        BatchLongest,
        Fixed(usize),
    }

    #[derive(Deserialize, Debug, Clone, PartialEq)]
    pub struct PaddingParams {
        pub strategy:           PaddingStrategy,
        pub direction:          PaddingDirection,
        pub pad_to_multiple_of: Option<usize>,
        pub pad_id:             u32,
        pub pad_type_id:        u32,
        pub pad_token:          String,
    }

    #[derive(Deserialize, Debug, Clone, PartialEq)]
    pub struct AddedToken {
        pub id:          u32,
        pub content:     String,
        #[serde(default)]
        pub single_word: bool,
        #[serde(default)]
        pub lstrip:      bool,
        #[serde(default)]
        pub rstrip:      bool,
        #[serde(default)]
        pub normalized:  bool,
        #[serde(default)]
        pub special:     bool,
    }

    #[derive(Deserialize, Debug, Clone, PartialEq)]
    pub struct Tokenizer {
        pub added_tokens:   Option<Vec<AddedToken>>,
        pub normalizer:     Option<Normalizer>,
        pub pre_tokenizer:  Option<PreTokenizer>,
        pub model:          Model,
        pub post_processor: Option<PostProcessor>,
        pub decoder:        Option<Decoder>,
        pub truncation:     Option<TruncationParams>,
        pub padding:        Option<PaddingParams>,
    }
}

/// Converts a tokenizers JSON description into a tokenizer pipeline.
///
/// Data that is not JSON, or is JSON without a tokenizer model, reports
/// [`ConvertError::FormatMismatch`] so format detection can move on. Past that
/// point the data counts as claimed and every error is final.
pub fn convert_tokenizers(
    data: impl AsRef<[u8]>, configuration: Configuration,
) -> Result<Pipeline, ConvertError> {
    let description = serde_json::from_slice::<serde_json::Value>(data.as_ref())
        .map_err(|e| ConvertError::FormatMismatch(format!("not a tokenizers description: {}", e)))?;
    if description.get("model").is_none() {
        return Err(ConvertError::FormatMismatch(
            "json data without a tokenizer model".to_string(),
        ));
    }
    let description = serde_json::from_value::<hf::Tokenizer>(description)
        .map_err(|e| ConvertError::InvalidData(format!("malformed tokenizers description: {}", e)))?;
    convert_description(description, configuration)
}

/// Converts a tokenizers JSON description read from `reader`.
#[cfg(feature = "std")]
pub fn convert_tokenizers_reader(
    reader: &mut impl Read, configuration: Configuration,
) -> Result<Pipeline, ConvertError> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    convert_tokenizers(data, configuration)
}

/// Converts the tokenizers JSON description at `path`, usually `tokenizer.json`.
#[cfg(feature = "std")]
pub fn convert_tokenizers_file(
    path: impl AsRef<Path>, configuration: Configuration,
) -> Result<Pipeline, ConvertError> {
    let mut file = File::open(path)?;
    convert_tokenizers_reader(&mut file, configuration)
}

fn convert_description(
    description: hf::Tokenizer, configuration: Configuration,
) -> Result<Pipeline, ConvertError> {
    let hf::Tokenizer {
        added_tokens,
        normalizer,
        pre_tokenizer,
        model,
        post_processor,
        decoder,
        truncation: truncation_params,
        padding: padding_params,
    } = description;

    let mut builder = PipelineBuilder::new(configuration);
    builder.source = Source::Tokenizers;

    // Added tokens

    let mut skip_tokens = added_tokens
        .iter()
        .flatten()
        .filter(|token| token.special)
        .map(|token| token.id as i32)
        .collect::<Vec<_>>();
    skip_tokens.sort_unstable();
    for token in added_tokens.into_iter().flatten() {
        builder.add_token(AddedToken {
            content:     token.content.into_bytes(),
            id:          Some(token.id),
            special:     token.special,
            lstrip:      token.lstrip,
            rstrip:      token.rstrip,
            normalized:  token.normalized,
            single_word: token.single_word,
        });
    }

    // Normalizers

    let mut normalizers = VecDeque::from_iter(normalizer);
    while let Some(normalizer) = normalizers.pop_front() {
        match normalizer {
            hf::Normalizer::Sequence { normalizers: steps } => {
                for step in steps.into_iter().rev() {
                    normalizers.push_front(step);
                }
            }
            hf::Normalizer::NFC => {
                builder.push_normalization(Normalization::Unicode(UnicodeForm::Nfc));
            }
            hf::Normalizer::NFD => {
                builder.push_normalization(Normalization::Unicode(UnicodeForm::Nfd));
            }
            hf::Normalizer::NFKC => {
                builder.push_normalization(Normalization::Unicode(UnicodeForm::Nfkc));
            }
            hf::Normalizer::NFKD => {
                builder.push_normalization(Normalization::Unicode(UnicodeForm::Nfkd));
            }
            hf::Normalizer::Lowercase => {
                builder.push_normalization(Normalization::CaseFold { utf8: true });
            }
            hf::Normalizer::StripAccents => {
                builder.push_normalization(Normalization::strip_accents());
            }
            hf::Normalizer::BertNormalizer {
                clean_text,
                strip_accents,
                lowercase,
                ..
            } => {
                if clean_text {
                    builder.push_normalization(Normalization::del_control_chars());
                }
                if strip_accents.unwrap_or(false) || lowercase {
                    builder.push_normalization(Normalization::Unicode(UnicodeForm::Nfd));
                    builder.push_normalization(Normalization::strip_accents());
                }
                if lowercase {
                    builder.push_normalization(Normalization::CaseFold { utf8: true });
                }
            }
            hf::Normalizer::Strip { strip_left, strip_right } => {
                if strip_left {
                    builder.push_normalization(Normalization::replace(r"^\s+", ""));
                }
                if strip_right {
                    builder.push_normalization(Normalization::replace(r"\s+$", ""));
                }
            }
            hf::Normalizer::Prepend { prepend } => {
                builder.push_normalization(Normalization::Prepend { prefix: prepend });
            }
            hf::Normalizer::Precompiled { precompiled_charsmap } => {
                let charsmap =
                    CharsMap::from_precompiled(precompiled_charsmap).map_err(BuildError::CharsMap)?;
                builder.push_normalization(Normalization::CharsMap(charsmap));
            }
            hf::Normalizer::Replace { pattern, content } => {
                let pattern = match pattern {
                    hf::Pattern::String(literal) => quote_meta(&literal),
                    hf::Pattern::Regex(regex) => regex,
                };
                builder.push_normalization(Normalization::replace(pattern, content));
            }
            hf::Normalizer::Unsupported => {
                return Err(ConvertError::UnsupportedConstruct(
                    "normalizer type outside the supported set".to_string(),
                ));
            }
        }
    }

    // Pre-tokenizers

    let mut pre_tokenizers = VecDeque::from_iter(pre_tokenizer);
    while let Some(pre_tokenizer) = pre_tokenizers.pop_front() {
        match pre_tokenizer {
            hf::PreTokenizer::Sequence { pretokenizers } => {
                for step in pretokenizers.into_iter().rev() {
                    pre_tokenizers.push_front(step);
                }
            }
            hf::PreTokenizer::BertPreTokenizer => {
                for split in Split::bert() {
                    builder.push_pre_tokenization(PreTokenization::Split(split));
                }
            }
            hf::PreTokenizer::Whitespace => {
                builder.push_pre_tokenization(PreTokenization::Split(Split::whitespace()));
            }
            hf::PreTokenizer::WhitespaceSplit => {
                builder.push_pre_tokenization(PreTokenization::Split(Split::bert_whitespace()));
            }
            hf::PreTokenizer::ByteLevel { add_prefix_space, use_regex } => {
                if builder.configuration.add_prefix_space.unwrap_or(add_prefix_space) {
                    builder.push_normalization(Normalization::add_prefix_space_to_not_space());
                }
                if use_regex {
                    builder.push_pre_tokenization(PreTokenization::Split(Split::byte_level()));
                }
                builder.push_pre_tokenization(PreTokenization::ByteRemap);
            }
            hf::PreTokenizer::Metaspace {
                replacement,
                prepend_scheme,
                add_prefix_space,
                split,
            } => {
                let marker = replacement.to_string();
                let prefix = match builder.configuration.add_prefix_space {
                    Some(enabled) => enabled,
                    None => add_prefix_space.unwrap_or(true),
                };
                builder.push_normalization(Normalization::replace_spaces_metaspace(&marker));
                if prefix && prepend_scheme != hf::PrependScheme::Never {
                    builder.push_normalization(Normalization::prepend_with_check(&marker, &marker));
                }
                if split {
                    builder.push_pre_tokenization(PreTokenization::Split(Split::metaspace(&marker)));
                }
            }
            hf::PreTokenizer::Split { pattern, behavior, invert } => {
                let pattern = match pattern {
                    Some(hf::Pattern::String(literal)) => quote_meta(&literal),
                    Some(hf::Pattern::Regex(regex)) => regex,
                    None => String::new(),
                };
                // an empty pattern splits into characters
                let split = if pattern.is_empty() {
                    Split::new(".", SplitBehavior::Isolate, false)
                } else {
                    Split::new(pattern, split_behavior(behavior), invert)
                };
                builder.push_pre_tokenization(PreTokenization::Split(split));
            }
            hf::PreTokenizer::Punctuation { behavior } => {
                let mut split = Split::punctuation();
                split.behavior = split_behavior(behavior);
                builder.push_pre_tokenization(PreTokenization::Split(split));
            }
            hf::PreTokenizer::Digits { individual_digits } => {
                builder.push_pre_tokenization(PreTokenization::Split(Split::digits(individual_digits)));
            }
            hf::PreTokenizer::Unsupported => {
                return Err(ConvertError::UnsupportedConstruct(
                    "pre-tokenizer type outside the supported set".to_string(),
                ));
            }
        }
    }

    // Model

    let mut strip_spaces = false;
    let mut end_suffix: Option<String> = None;
    let mut subword_prefix: Option<String> = None;
    match model {
        hf::Model::WordPiece(model) => {
            let vocab = sorted_vocab(model.vocab);
            builder.specials.unk = vocab.id_of(model.unk_token.as_bytes());
            let prefix = model.continuing_subword_prefix;
            builder.model = Some(Model::WordPiece {
                unk_token:          model.unk_token,
                suffix_indicator:   prefix.clone(),
                max_bytes_per_word: model.max_input_chars_per_word.unwrap_or(100),
            });
            builder.decode_rewrite = DecodeRewrite::WordBoundary {
                subword_prefix: prefix.clone(),
            };
            builder.vocab = vocab;
            subword_prefix = Some(prefix);
            strip_spaces = true;
        }
        hf::Model::BPE(model) => {
            if model.continuing_subword_prefix.as_deref().is_some_and(|prefix| !prefix.is_empty()) {
                return Err(ConvertError::UnsupportedConstruct(
                    "BPE model with a continuing subword prefix".to_string(),
                ));
            }
            if model.dropout.is_some_and(|dropout| dropout > 0.0) {
                log::warn!("BPE dropout is ignored, merges apply deterministically");
            }
            let vocab = sorted_vocab(model.vocab);
            let merges = model
                .merges
                .into_iter()
                .map(|merge| match merge {
                    hf::Merge::Joined(joined) => joined
                        .split_once(' ')
                        .map(|(left, right)| {
                            (Vec::from(left.as_bytes()), Vec::from(right.as_bytes()))
                        })
                        .ok_or_else(|| {
                            ConvertError::InvalidData(format!("malformed BPE merge entry: {}", joined))
                        }),
                    hf::Merge::Pair(left, right) => Ok((left.into_bytes(), right.into_bytes())),
                })
                .collect::<Result<Merges, _>>()?;
            let unk_token = model.unk_token.unwrap_or_default();
            if !unk_token.is_empty() {
                builder.specials.unk = vocab.id_of(unk_token.as_bytes());
            }
            end_suffix = model.end_of_word_suffix.filter(|suffix| !suffix.is_empty());
            builder.model = Some(Model::Bpe {
                merges,
                unk_token,
                fuse_unk: model.fuse_unk.unwrap_or(false),
                suffix_indicator: String::new(),
                end_suffix: end_suffix.clone().unwrap_or_default(),
                byte_fallback: model.byte_fallback.unwrap_or(false),
                cache_capacity: bpe_cache_capacity(None, vocab.len()),
            });
            builder.vocab = vocab;
        }
        hf::Model::Unigram(model) => {
            let mut vocab = Vocab::with_capacity(model.vocab.len());
            let mut scores = Scores::with_capacity(model.vocab.len());
            for (index, (token, score)) in model.vocab.into_iter().enumerate() {
                vocab.set(index as TokenId, token.into_bytes());
                scores.push(score as f32);
            }
            builder.specials.unk = model.unk_id.map(|id| id as TokenId);
            builder.model = Some(Model::Unigram {
                scores,
                unk_token_id: builder.specials.unk.unwrap_or(0),
                byte_fallback: model.byte_fallback.unwrap_or(false),
            });
            builder.vocab = vocab;
            builder.decode_rewrite = DecodeRewrite::Metaspace;
            strip_spaces = true;
        }
        hf::Model::WordLevel(model) => {
            let vocab = sorted_vocab(model.vocab);
            builder.specials.unk = vocab.id_of(model.unk_token.as_bytes());
            let default_id = builder.specials.unk.map(|id| id as i32).unwrap_or(-1);
            builder.model = Some(Model::WordLevel { default_id });
            builder.decode_rewrite = DecodeRewrite::WordBoundary {
                subword_prefix: String::new(),
            };
            builder.vocab = vocab;
            strip_spaces = true;
        }
        hf::Model::Unsupported => {
            return Err(ConvertError::UnsupportedConstruct(
                "tokenizer model type outside the supported set".to_string(),
            ));
        }
    }

    // Post-processing

    let mut combine = None;
    let mut pair_combine = None;
    match post_processor {
        None | Some(hf::PostProcessor::ByteLevel {}) => {}
        Some(post_processor) => {
            if let Some((single, pair)) = combine_templates(post_processor, &builder.configuration)? {
                combine = Some(single);
                pair_combine = pair;
            }
        }
    }

    let added_count = combine.as_ref().map_or(0, |combine| combine.added_count());
    let max_length = builder.configuration.max_length.or_else(|| {
        truncation_params
            .as_ref()
            .map(|params| u32::try_from(params.max_length).unwrap_or(u32::MAX))
    });
    if let Some(max_length) = max_length {
        let side = match truncation_params.as_ref().map(|params| params.direction) {
            Some(hf::TruncationDirection::Left) => Side::Left,
            _ => Side::Right,
        };
        builder.truncation = Some(Truncation::budgeted(
            max_length.min(i32::MAX as u32) as i32,
            side,
            added_count,
        ));
    }
    builder.combine = combine;
    builder.pair_combine = pair_combine;

    if let Some(params) = padding_params {
        if params.pad_to_multiple_of.is_some_and(|multiple| multiple > 1) {
            log::warn!("padding to a multiple of a length is ignored");
        }
        let fixed = match params.strategy {
            hf::PaddingStrategy::Fixed(length) => Some(length),
            hf::PaddingStrategy::BatchLongest => None,
        };
        let max_length = builder
            .configuration
            .max_length
            .map(|length| length as usize)
            .or(fixed)
            .map_or(-1, |length| length.min(i32::MAX as usize) as i32);
        builder.padding = Some(Padding {
            token:      Some(params.pad_token),
            token_id:   Some(params.pad_id),
            segment_id: Some(params.pad_type_id as i32),
            side:       match params.direction {
                hf::PaddingDirection::Left => Side::Left,
                hf::PaddingDirection::Right => Side::Right,
            },
            max_length,
            pad_to_max: builder.configuration.use_max_padding,
        });
    } else if builder.configuration.use_max_padding || builder.configuration.max_length.is_some() {
        builder.padding = Some(Padding {
            max_length: builder
                .configuration
                .max_length
                .map_or(-1, |length| length.min(i32::MAX as u32) as i32),
            pad_to_max: builder.configuration.use_max_padding,
            ..Padding::default()
        });
    }

    // Decoding

    builder.push_decoding(Decoding::VocabDecode {
        skip_tokens,
        skip: builder.configuration.skip_special_tokens,
    });
    match decoder {
        Some(hf::Decoder::Sequence { decoders }) => {
            for step in decoders {
                match step {
                    hf::Decoder::Replace { pattern, content } => match pattern {
                        hf::Pattern::String(literal) => {
                            builder.push_decoding(Decoding::replace(literal, content));
                        }
                        hf::Pattern::Regex(_) => {
                            return Err(ConvertError::UnsupportedConstruct(
                                "Replace decoder with a regex pattern".to_string(),
                            ));
                        }
                    },
                    hf::Decoder::Fuse => {
                        builder.push_decoding(Decoding::Fuse);
                    }
                    hf::Decoder::Strip { content, .. } => {
                        builder.push_decoding(Decoding::strip_left(&content.to_string()));
                    }
                    hf::Decoder::ByteFallback => {
                        builder.push_decoding(Decoding::ByteFallback);
                    }
                    skipped => {
                        log::warn!("skipping unsupported decoder step {:?}", skipped);
                    }
                }
            }
        }
        Some(hf::Decoder::ByteLevel {}) => {
            builder.push_decoding(Decoding::CharsToBytes);
        }
        _ => {
            builder.push_decoding(Decoding::Fuse);
        }
    }
    if strip_spaces {
        builder.push_decoding(Decoding::strip_forward_space());
    }
    if let Some(mode) = builder.configuration.utf8_replace_mode {
        if mode != Utf8Mode::Disable {
            builder.push_decoding(Decoding::Utf8Validate {
                replace: mode == Utf8Mode::Replace,
            });
        }
    }
    if let Some(suffix) = end_suffix {
        builder.push_decoding(Decoding::replace_end_of_word_suffix(&suffix));
        builder.push_decoding(Decoding::rstrip_space());
    }
    if let Some(prefix) = subword_prefix.filter(|prefix| !prefix.is_empty()) {
        builder.push_decoding(Decoding::remove_subword_prefix(&prefix));
    }
    if builder.configuration.clean_up_tokenization_spaces.unwrap_or(false) {
        builder.push_decoding(Decoding::clean_up_tokenization_spaces());
    }

    Ok(builder.finalize()?)
}

fn sorted_vocab(vocab: HashMap<String, u32>) -> Vocab {
    Vocab::from_pairs(vocab.into_iter().map(|(token, id)| (token.into_bytes(), id)))
}

fn split_behavior(behavior: hf::SplitDelimiterBehavior) -> SplitBehavior {
    match behavior {
        hf::SplitDelimiterBehavior::Removed => SplitBehavior::Remove,
        hf::SplitDelimiterBehavior::Isolated => SplitBehavior::Isolate,
        hf::SplitDelimiterBehavior::MergedWithPrevious => SplitBehavior::MergeWithPrevious,
        hf::SplitDelimiterBehavior::MergedWithNext => SplitBehavior::MergeWithNext,
        hf::SplitDelimiterBehavior::Contiguous => SplitBehavior::Contiguous,
    }
}

fn template_elements(pieces: Vec<hf::TemplatePiece>, enabled: bool) -> Vec<TemplateElement> {
    pieces
        .into_iter()
        .map(|piece| match piece {
            hf::TemplatePiece::Sequence { type_id, .. } => TemplateElement::Sequence {
                segment: type_id as i32,
            },
            hf::TemplatePiece::SpecialToken { id, type_id } => {
                TemplateElement::token(id, type_id as i32, enabled)
            }
        })
        .collect()
}

fn token_element(content: String, id: u32, segment: i32, enabled: bool) -> TemplateElement {
    TemplateElement::Token {
        content,
        id: Some(id),
        segment,
        enabled,
    }
}

/// Maps a post-processor onto single and pair combine templates.
///
/// `Ok(None)` means the processor adds no tokens, as with byte-level
/// post-processing. A `Sequence` contributes its first template-bearing
/// processor.
fn combine_templates(
    post_processor: hf::PostProcessor, configuration: &Configuration,
) -> Result<Option<(Combine, Option<Combine>)>, ConvertError> {
    let enabled = configuration.add_special_tokens;
    match post_processor {
        hf::PostProcessor::TemplateProcessing { single, pair } => {
            let single = Combine::new(template_elements(single, enabled));
            let pair = pair.map(|pieces| Combine::new(template_elements(pieces, enabled)));
            Ok(Some((single, pair)))
        }
        hf::PostProcessor::BertProcessing { sep, cls } => {
            let single = Combine::new(Vec::from([
                token_element(cls.0.clone(), cls.1, 0, enabled),
                TemplateElement::Sequence { segment: 0 },
                token_element(sep.0.clone(), sep.1, 0, enabled),
            ]));
            let pair = Combine::new(Vec::from([
                token_element(cls.0, cls.1, 0, enabled),
                TemplateElement::Sequence { segment: 0 },
                token_element(sep.0.clone(), sep.1, 0, enabled),
                TemplateElement::Sequence { segment: 1 },
                token_element(sep.0, sep.1, 1, enabled),
            ]));
            Ok(Some((single, Some(pair))))
        }
        hf::PostProcessor::RobertaProcessing { sep, cls } => {
            if configuration.number_of_inputs == 2 {
                return Err(ConvertError::UnsupportedConstruct(
                    "RobertaProcessing post-processor with paired inputs".to_string(),
                ));
            }
            let single = Combine::new(Vec::from([
                token_element(cls.0, cls.1, 0, enabled),
                TemplateElement::Sequence { segment: 0 },
                token_element(sep.0, sep.1, 0, enabled),
            ]));
            Ok(Some((single, None)))
        }
        hf::PostProcessor::Sequence { processors } => {
            let mut byte_level = false;
            for processor in processors {
                match processor {
                    hf::PostProcessor::ByteLevel {} => byte_level = true,
                    hf::PostProcessor::Sequence { .. } | hf::PostProcessor::Unsupported => {}
                    template => return combine_templates(template, configuration),
                }
            }
            if byte_level {
                Ok(None)
            } else {
                Err(ConvertError::UnsupportedConstruct(
                    "post-processor sequence without a known combine template".to_string(),
                ))
            }
        }
        hf::PostProcessor::ByteLevel {} => Ok(None),
        hf::PostProcessor::Unsupported => Err(ConvertError::UnsupportedConstruct(
            "post-processor type outside the supported set".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn converted(description: &serde_json::Value, configuration: Configuration) -> Pipeline {
        convert_tokenizers(description.to_string(), configuration).unwrap()
    }

    fn added_token(id: u32, content: &str) -> serde_json::Value {
        json!({
            "id": id,
            "content": content,
            "single_word": false,
            "lstrip": false,
            "rstrip": false,
            "normalized": false,
            "special": true,
        })
    }

    fn bert_description() -> serde_json::Value {
        json!({
            "version": "1.0",
            "added_tokens": [
                added_token(0, "[PAD]"),
                added_token(1, "[UNK]"),
                added_token(2, "[CLS]"),
                added_token(3, "[SEP]"),
            ],
            "normalizer": {
                "type": "BertNormalizer",
                "clean_text": true,
                "handle_chinese_chars": true,
                "strip_accents": null,
                "lowercase": true,
            },
            "pre_tokenizer": { "type": "BertPreTokenizer" },
            "model": {
                "type": "WordPiece",
                "unk_token": "[UNK]",
                "continuing_subword_prefix": "##",
                "max_input_chars_per_word": 100,
                "vocab": {
                    "[PAD]": 0, "[UNK]": 1, "[CLS]": 2, "[SEP]": 3,
                    "he": 4, "##llo": 5, "hello": 6,
                },
            },
            "post_processor": {
                "type": "TemplateProcessing",
                "single": [
                    { "SpecialToken": { "id": "[CLS]", "type_id": 0 } },
                    { "Sequence": { "id": "A", "type_id": 0 } },
                    { "SpecialToken": { "id": "[SEP]", "type_id": 0 } },
                ],
                "pair": [
                    { "SpecialToken": { "id": "[CLS]", "type_id": 0 } },
                    { "Sequence": { "id": "A", "type_id": 0 } },
                    { "SpecialToken": { "id": "[SEP]", "type_id": 0 } },
                    { "Sequence": { "id": "B", "type_id": 1 } },
                    { "SpecialToken": { "id": "[SEP]", "type_id": 1 } },
                ],
                "special_tokens": {
                    "[CLS]": { "id": "[CLS]", "ids": [2], "tokens": ["[CLS]"] },
                    "[SEP]": { "id": "[SEP]", "ids": [3], "tokens": ["[SEP]"] },
                },
            },
            "decoder": { "type": "WordPiece", "prefix": "##", "cleanup": true },
        })
    }

    #[test]
    fn test_wordpiece_description() {
        let mut configuration = Configuration::default();
        configuration.with_detokenizer = true;
        let pipeline = converted(&bert_description(), configuration);

        assert!(matches!(pipeline.model(), Model::WordPiece { .. }));
        assert_eq!(pipeline.vocab().len(), 7);
        assert_eq!(pipeline.specials().unk, Some(1));
        assert_eq!(pipeline.normalization(), Vec::from([
            Normalization::del_control_chars(),
            Normalization::Unicode(UnicodeForm::Nfd),
            Normalization::strip_accents(),
            Normalization::CaseFold { utf8: true },
        ]));
        // special-token splitter in front of the two bert splits
        assert_eq!(pipeline.pre_tokenization().len(), 3);
        assert!(matches!(
            &pipeline.pre_tokenization()[0],
            PreTokenization::Split(split) if split.behavior == SplitBehavior::Isolate
        ));

        let combine = pipeline.combine().unwrap();
        assert_eq!(combine.added_count(), 2);
        assert_eq!(combine.template[0], TemplateElement::Token {
            content: "[CLS]".to_string(),
            id:      Some(2),
            segment: 0,
            enabled: true,
        });
        assert_eq!(pipeline.pair_combine().unwrap().added_count(), 3);

        assert_eq!(pipeline.decoding(), Vec::from([
            Decoding::VocabDecode {
                skip_tokens: Vec::from([0, 1, 2, 3]),
                skip:        true,
            },
            Decoding::Fuse,
            Decoding::Replace {
                pairs: Vec::from([
                    ("^ ".to_string(), String::new()),
                    ("##".to_string(), String::new()),
                ]),
            },
        ]));

        let artifacts = pipeline.build().unwrap();
        assert_eq!(artifacts.tokenizer.count_ops("WordpieceTokenizer"), 1);
        assert_eq!(artifacts.tokenizer.count_ops("CombineSegments"), 1);
        let detokenizer = artifacts.detokenizer.unwrap();
        assert_eq!(detokenizer.count_ops("VocabDecoder"), 1);
        assert!(artifacts.metadata.pair.is_some());
    }

    #[test]
    fn test_byte_level_bpe_description() {
        let description = json!({
            "added_tokens": [added_token(6, "<|endoftext|>")],
            "normalizer": null,
            "pre_tokenizer": {
                "type": "ByteLevel",
                "add_prefix_space": false,
                "trim_offsets": true,
                "use_regex": true,
            },
            "model": {
                "type": "BPE",
                "dropout": null,
                "unk_token": null,
                "continuing_subword_prefix": null,
                "end_of_word_suffix": null,
                "fuse_unk": false,
                "byte_fallback": false,
                "vocab": {
                    "a": 0, "b": 1, "c": 2, "ab": 3, "abc": 4,
                    "\u{0120}": 5, "<|endoftext|>": 6,
                },
                "merges": ["a b", ["ab", "c"]],
            },
            "post_processor": null,
            "decoder": { "type": "ByteLevel", "add_prefix_space": true, "trim_offsets": true },
        });
        let mut configuration = Configuration::default();
        configuration.with_detokenizer = true;
        let pipeline = converted(&description, configuration);

        assert!(pipeline.normalization().is_empty());
        assert_eq!(pipeline.pre_tokenization().len(), 3);
        assert!(matches!(pipeline.pre_tokenization()[2], PreTokenization::ByteRemap));
        match pipeline.model() {
            Model::Bpe { merges, byte_fallback, .. } => {
                assert_eq!(merges, &Vec::from([
                    (Vec::from(*b"a"), Vec::from(*b"b")),
                    (Vec::from(*b"ab"), Vec::from(*b"c")),
                ]));
                assert!(!*byte_fallback);
            }
            other => panic!("unexpected model {other:?}"),
        }
        assert!(pipeline.combine().is_none());
        assert_eq!(pipeline.decoding(), Vec::from([
            Decoding::VocabDecode {
                skip_tokens: Vec::from([6]),
                skip:        true,
            },
            Decoding::CharsToBytes,
        ]));

        let artifacts = pipeline.build().unwrap();
        assert_eq!(artifacts.tokenizer.count_ops("BPETokenizer"), 1);
        assert_eq!(artifacts.detokenizer.unwrap().count_ops("CharsToBytes"), 1);
    }

    #[test]
    fn test_unigram_metaspace_description() {
        let description = json!({
            "added_tokens": [
                added_token(0, "<unk>"),
                added_token(1, "<s>"),
                added_token(2, "</s>"),
            ],
            "normalizer": {
                "type": "Sequence",
                "normalizers": [
                    { "type": "Prepend", "prepend": "\u{2581}" },
                    { "type": "Replace", "pattern": { "String": " " }, "content": "\u{2581}" },
                ],
            },
            "pre_tokenizer": null,
            "model": {
                "type": "Unigram",
                "unk_id": 0,
                "vocab": [
                    ["<unk>", 0.0], ["<s>", 0.0], ["</s>", 0.0],
                    ["\u{2581}hello", -5.0], ["\u{2581}", -2.0],
                ],
                "byte_fallback": true,
            },
            "post_processor": {
                "type": "TemplateProcessing",
                "single": [
                    { "SpecialToken": { "id": "<s>", "type_id": 0 } },
                    { "Sequence": { "id": "A", "type_id": 0 } },
                ],
                "pair": [
                    { "SpecialToken": { "id": "<s>", "type_id": 0 } },
                    { "Sequence": { "id": "A", "type_id": 0 } },
                    { "Sequence": { "id": "B", "type_id": 1 } },
                ],
            },
            "decoder": {
                "type": "Sequence",
                "decoders": [
                    { "type": "Replace", "pattern": { "String": "\u{2581}" }, "content": " " },
                    { "type": "ByteFallback" },
                    { "type": "Fuse" },
                    { "type": "Strip", "content": " ", "start": 1, "stop": 0 },
                ],
            },
        });
        let mut configuration = Configuration::default();
        configuration.with_detokenizer = true;
        let pipeline = converted(&description, configuration);

        assert_eq!(pipeline.normalization(), Vec::from([
            Normalization::Prepend {
                prefix: "\u{2581}".to_string(),
            },
            Normalization::replace(" ", "\u{2581}"),
        ]));
        match pipeline.model() {
            Model::Unigram { scores, unk_token_id, byte_fallback } => {
                assert_eq!(scores.len(), 5);
                assert_eq!(*unk_token_id, 0);
                assert!(*byte_fallback);
            }
            other => panic!("unexpected model {other:?}"),
        }
        assert_eq!(pipeline.specials().unk, Some(0));
        assert_eq!(pipeline.combine().unwrap().added_count(), 1);

        // the Strip decoder and the word-boundary strip fuse into one step
        assert_eq!(pipeline.decoding(), Vec::from([
            Decoding::VocabDecode {
                skip_tokens: Vec::from([0, 1, 2]),
                skip:        true,
            },
            Decoding::replace("\u{2581}", " "),
            Decoding::ByteFallback,
            Decoding::Fuse,
            Decoding::Replace {
                pairs: Vec::from([
                    ("^ ".to_string(), String::new()),
                    ("^ ".to_string(), String::new()),
                ]),
            },
        ]));

        let artifacts = pipeline.build().unwrap();
        assert_eq!(artifacts.tokenizer.count_ops("UnigramTokenizer"), 1);
        assert_eq!(artifacts.detokenizer.unwrap().count_ops("ByteFallback"), 1);
    }

    #[test]
    fn test_wordlevel_whitespace_description() {
        let description = json!({
            "normalizer": { "type": "Strip", "strip_left": true, "strip_right": true },
            "pre_tokenizer": { "type": "Whitespace" },
            "model": {
                "type": "WordLevel",
                "unk_token": "<unk>",
                "vocab": { "<unk>": 0, "hello": 1, "world": 2 },
            },
        });
        let pipeline = converted(&description, Configuration::default());

        assert_eq!(pipeline.normalization(), Vec::from([Normalization::Replace {
            pairs:  Vec::from([
                (r"^\s+".to_string(), String::new()),
                (r"\s+$".to_string(), String::new()),
            ]),
            global: true,
        }]));
        assert_eq!(pipeline.pre_tokenization().len(), 1);
        assert!(matches!(pipeline.model(), Model::WordLevel { default_id: 0 }));
        assert_eq!(pipeline.specials().unk, Some(0));
        assert!(pipeline.combine().is_none());
        assert_eq!(pipeline.decoding().len(), 3);
        assert_eq!(pipeline.decoding()[2], Decoding::strip_forward_space());
    }

    #[test]
    fn test_bert_processing_templates() {
        let description = json!({
            "model": {
                "type": "WordLevel",
                "unk_token": "[UNK]",
                "vocab": { "[UNK]": 0, "[CLS]": 1, "[SEP]": 2 },
            },
            "post_processor": {
                "type": "BertProcessing",
                "sep": ["[SEP]", 2],
                "cls": ["[CLS]", 1],
            },
        });
        let pipeline = converted(&description, Configuration::default());

        let combine = pipeline.combine().unwrap();
        assert_eq!(combine.added_count(), 2);
        assert_eq!(combine.template[0], TemplateElement::Token {
            content: "[CLS]".to_string(),
            id:      Some(1),
            segment: 0,
            enabled: true,
        });
        let pair = pipeline.pair_combine().unwrap();
        assert_eq!(pair.added_count(), 3);
        assert_eq!(pair.template[4], TemplateElement::Token {
            content: "[SEP]".to_string(),
            id:      Some(2),
            segment: 1,
            enabled: true,
        });
    }

    #[test]
    fn test_truncation_and_padding_overrides() {
        let description = json!({
            "model": {
                "type": "WordLevel",
                "unk_token": "[UNK]",
                "vocab": { "[UNK]": 0, "[CLS]": 1, "[SEP]": 2 },
            },
            "post_processor": {
                "type": "TemplateProcessing",
                "single": [
                    { "SpecialToken": { "id": "[CLS]", "type_id": 0 } },
                    { "Sequence": { "id": "A", "type_id": 0 } },
                    { "SpecialToken": { "id": "[SEP]", "type_id": 0 } },
                ],
                "pair": null,
            },
            "truncation": {
                "direction": "Left",
                "max_length": 512,
                "strategy": "LongestFirst",
                "stride": 0,
            },
            "padding": {
                "strategy": { "Fixed": 128 },
                "direction": "Right",
                "pad_to_multiple_of": null,
                "pad_id": 0,
                "pad_type_id": 0,
                "pad_token": "[PAD]",
            },
        });

        let pipeline = converted(&description, Configuration::default());
        assert_eq!(pipeline.truncation(), Some(&Truncation {
            max_length: 510,
            side:       Side::Left,
        }));
        assert_eq!(pipeline.padding().max_length, 128);
        assert_eq!(pipeline.padding().token_id, Some(0));
        assert!(!pipeline.padding().pad_to_max);

        let mut configuration = Configuration::default();
        configuration.max_length = Some(8);
        configuration.use_max_padding = true;
        let pipeline = converted(&description, configuration);
        assert_eq!(pipeline.truncation(), Some(&Truncation {
            max_length: 6,
            side:       Side::Left,
        }));
        assert_eq!(pipeline.padding().max_length, 8);
        assert!(pipeline.padding().pad_to_max);
    }

    #[test]
    fn test_metaspace_prefix_override() {
        let description = json!({
            "pre_tokenizer": {
                "type": "Metaspace",
                "replacement": "\u{2581}",
                "prepend_scheme": "always",
                "split": true,
            },
            "model": {
                "type": "Unigram",
                "unk_id": 0,
                "vocab": [["<unk>", 0.0], ["\u{2581}a", -1.0]],
            },
        });

        let pipeline = converted(&description, Configuration::default());
        match &pipeline.normalization()[0] {
            Normalization::Replace { pairs, .. } => {
                assert_eq!(pairs.len(), 2);
                assert_eq!(pairs[0], (" ".to_string(), "\u{2581}".to_string()));
            }
            other => panic!("unexpected step {other:?}"),
        }
        assert_eq!(pipeline.pre_tokenization().len(), 1);

        let mut configuration = Configuration::default();
        configuration.add_prefix_space = Some(false);
        let pipeline = converted(&description, configuration);
        match &pipeline.normalization()[0] {
            Normalization::Replace { pairs, .. } => assert_eq!(pairs.len(), 1),
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn test_decoder_steps_skipped() {
        let description = json!({
            "model": {
                "type": "BPE",
                "vocab": { "a": 0 },
                "merges": [],
            },
            "decoder": {
                "type": "Sequence",
                "decoders": [
                    { "type": "BPEDecoder", "suffix": "</w>" },
                    { "type": "Fuse" },
                ],
            },
        });
        let pipeline = converted(&description, Configuration::default());
        assert_eq!(pipeline.decoding(), Vec::from([
            Decoding::VocabDecode {
                skip_tokens: Vec::new(),
                skip:        true,
            },
            Decoding::Fuse,
        ]));
    }

    #[test]
    fn test_unsupported_types_rejected() {
        let base = json!({ "model": { "type": "WordLevel", "unk_token": "x", "vocab": { "x": 0 } } });

        let mut description = base.clone();
        description["normalizer"] = json!({ "type": "Nmt" });
        let result = convert_tokenizers(description.to_string(), Configuration::default());
        assert!(matches!(result, Err(ConvertError::UnsupportedConstruct(_))));

        let mut description = base.clone();
        description["pre_tokenizer"] = json!({ "type": "CharDelimiterSplit", "delimiter": ";" });
        let result = convert_tokenizers(description.to_string(), Configuration::default());
        assert!(matches!(result, Err(ConvertError::UnsupportedConstruct(_))));

        let mut description = base;
        description["post_processor"] = json!({ "type": "Rotary" });
        let result = convert_tokenizers(description.to_string(), Configuration::default());
        assert!(matches!(result, Err(ConvertError::UnsupportedConstruct(_))));
    }

    #[test]
    fn test_mismatch_and_invalid_data() {
        let result = convert_tokenizers(b"-----", Configuration::default());
        assert!(matches!(result, Err(ConvertError::FormatMismatch(_))));

        let result = convert_tokenizers(json!({ "foo": 1 }).to_string(), Configuration::default());
        assert!(matches!(result, Err(ConvertError::FormatMismatch(_))));

        let description = json!({
            "model": { "type": "BPE", "vocab": { "a": 0 }, "merges": ["ab"] },
        });
        let result = convert_tokenizers(description.to_string(), Configuration::default());
        assert!(matches!(result, Err(ConvertError::InvalidData(_))));
    }
}
