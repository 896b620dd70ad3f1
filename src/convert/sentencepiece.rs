//! Conversion for binary SentencePiece models.
//!
//! The model is parsed into its piece list and trainer and normalizer
//! settings, optionally re-aligned to a reference vocabulary, and emitted
//! through the standard step taxonomy: a character-map normalization carrying
//! the SentencePiece whitespace flags, a Unigram or BPE model over the
//! verbatim piece texts, and a decode chain that reverses the whitespace
//! escaping. Control pieces double as added tokens on the way in and as the
//! skip list on the way out, so one description serves both the keeping and
//! the skipping view of the special tokens.

#[cfg(feature = "std")]
use std::fs::File;
#[cfg(feature = "std")]
use std::io::Read;
#[cfg(feature = "std")]
use std::path::Path;

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use hashbrown::{HashMap, HashSet};
use sentencepiece_model::{ModelType, SentencePieceModel, Type};

use crate::artifacts::{Source, SpecialIds};
use crate::charsmap::CharsMap;
use crate::config::{Configuration, Side, Utf8Mode};
use crate::convert::ConvertError;
use crate::graph::UnicodeForm;
use crate::pipeline::{DecodeRewrite, Pipeline, PipelineBuilder};
use crate::steps::model::bpe_cache_capacity;
use crate::steps::{BuildError, Decoding, Model, Normalization, Padding, Truncation};
use crate::vocab::{AddedToken, Merges, Scores, TokenId, Vocab};

/// A vocabulary piece while the model is being reshaped.
#[derive(Debug, Clone)]
struct Piece {
    text:  String,
    score: f32,
    kind:  Type,
}

/// The identity pieces declared by the trainer section, used to classify
/// synthesized entries and to resolve the special ids.
struct TrainerPieces {
    unk: String,
    bos: String,
    eos: String,
    pad: String,
}

/// Byte pieces spell a single byte as `<0xAA>`.
fn is_byte_text(text: &str) -> bool {
    text.len() == 6 && text.starts_with("<0x") && text.ends_with('>')
}

/// Converts a SentencePiece model into a tokenizer pipeline.
///
/// Data that does not decode as a SentencePiece model reports
/// [`ConvertError::FormatMismatch`] so detection can move on; malformed pieces
/// inside a decodable model report [`ConvertError::InvalidData`].
///
/// The piece list is taken as the canonical vocabulary. To convert a model
/// that accompanies a source tokenizer with its own vocabulary, use
/// [`convert_sentencepiece_with_vocab`].
pub fn convert_sentencepiece(
    data: impl AsRef<[u8]>, configuration: Configuration,
) -> Result<Pipeline, ConvertError> {
    convert_model(data.as_ref(), None, Vec::new(), configuration)
}

/// Converts a SentencePiece model against the vocabulary of its source
/// tokenizer. See [`convert_sentencepiece`] for more details.
///
/// The piece list is re-aligned to `reference` by id: ids whose piece
/// disagrees are synthesized with a type matching their shape and rescored
/// below the surrounding pieces so they cannot displace original pieces
/// during segmentation. `added` tokens are placed at their declared ids on
/// top of the aligned list.
pub fn convert_sentencepiece_with_vocab(
    data: impl AsRef<[u8]>, reference: Vocab, added: Vec<AddedToken>, configuration: Configuration,
) -> Result<Pipeline, ConvertError> {
    convert_model(data.as_ref(), Some(reference), added, configuration)
}

/// Converts a SentencePiece model read from a reader. See
/// [`convert_sentencepiece`] for more details.
#[cfg(feature = "std")]
pub fn convert_sentencepiece_reader<R: Read>(
    reader: &mut R, configuration: Configuration,
) -> Result<Pipeline, ConvertError> {
    let mut data = Vec::with_capacity(1024);
    reader.read_to_end(&mut data)?;
    convert_sentencepiece(data, configuration)
}

/// Converts a SentencePiece model read from a file. See
/// [`convert_sentencepiece`] for more details.
#[cfg(feature = "std")]
pub fn convert_sentencepiece_file(
    path: impl AsRef<Path>, configuration: Configuration,
) -> Result<Pipeline, ConvertError> {
    let mut file = File::open(path)?;
    convert_sentencepiece_reader(&mut file, configuration)
}

fn convert_model(
    data: &[u8], reference: Option<Vocab>, added: Vec<AddedToken>, configuration: Configuration,
) -> Result<Pipeline, ConvertError> {
    let model = SentencePieceModel::from_slice(data).map_err(|e| {
        ConvertError::FormatMismatch(format!("not a sentencepiece model: {:?}", e))
    })?;
    if model.pieces.is_empty() {
        return Err(ConvertError::FormatMismatch(
            "sentencepiece model without pieces".to_string(),
        ));
    }

    let mut pieces = parse_pieces(&model)?;

    let names = match model.trainer() {
        Some(trainer) => TrainerPieces {
            unk: trainer.unk_piece().to_string(),
            bos: trainer.bos_piece().to_string(),
            eos: trainer.eos_piece().to_string(),
            pad: trainer.pad_piece().to_string(),
        },
        None => TrainerPieces {
            unk: String::from("<unk>"),
            bos: String::from("<s>"),
            eos: String::from("</s>"),
            pad: String::from("<pad>"),
        },
    };
    let model_type = model.trainer().map(|trainer| trainer.model_type()).unwrap_or(ModelType::Unigram);
    let trainer_byte_fallback = model.trainer().is_some_and(|trainer| trainer.byte_fallback());

    if let Some(reference) = &reference {
        align_pieces(&mut pieces, reference, &added, &names);
    }
    place_added(&mut pieces, &added);

    let mut builder = PipelineBuilder::new(configuration);
    builder.source = Source::SentencePiece;
    builder.decode_rewrite = DecodeRewrite::Metaspace;

    // Normalization

    let mut charsmap = match model.normalizer() {
        Some(normalizer) if !normalizer.precompiled_charsmap().is_empty() => {
            CharsMap::from_precompiled(Vec::from(normalizer.precompiled_charsmap()))
                .map_err(BuildError::CharsMap)?
        }
        _ => CharsMap::default(),
    };
    if let Some(normalizer) = model.normalizer() {
        // the precompiled table already encodes the named rules; the rule
        // flags only stand in when it is absent
        if charsmap.data().is_empty() {
            let name = normalizer.name();
            if name.contains("nfkc") {
                charsmap.form = Some(UnicodeForm::Nfkc);
            }
            charsmap.nmt = name.starts_with("nmt_");
            charsmap.case_fold = name.ends_with("_cf");
        }
        charsmap.add_dummy_prefix = normalizer.add_dummy_prefix();
        charsmap.remove_extra_whitespaces = normalizer.remove_extra_whitespaces();
        charsmap.escape_whitespaces = normalizer.escape_whitespaces();
    } else {
        charsmap.add_dummy_prefix = true;
        charsmap.escape_whitespaces = true;
    }
    if let Some(prefix) = builder.configuration.add_prefix_space {
        charsmap.add_dummy_prefix = prefix;
    }
    let strip_prefix = charsmap.add_dummy_prefix;
    builder.push_normalization(Normalization::CharsMap(charsmap));

    // Vocabulary and added tokens

    builder.vocab = pieces.iter().map(|piece| piece.text.clone().into_bytes()).collect::<Vocab>();

    let flags = added
        .iter()
        .filter_map(|token| token.id.map(|id| (id, token)))
        .collect::<HashMap<TokenId, &AddedToken>>();
    for (index, piece) in pieces.iter().enumerate() {
        let special = match piece.kind {
            Type::Control => true,
            Type::UserDefined => false,
            _ => continue,
        };
        let id = index as TokenId;
        let mut token = AddedToken::new(piece.text.clone().into_bytes()).with_id(id);
        token.special = special;
        if let Some(original) = flags.get(&id) {
            token.lstrip = original.lstrip;
            token.rstrip = original.rstrip;
            token.normalized = original.normalized;
            token.single_word = original.single_word;
        }
        builder.add_token(token);
    }
    for token in &added {
        if token.id.is_none() {
            builder.add_token(token.clone());
        }
    }

    let control = |text: &str| {
        pieces
            .iter()
            .position(|piece| piece.kind == Type::Control && piece.text == text)
            .map(|at| at as TokenId)
    };
    let specials = SpecialIds {
        unk: pieces.iter().position(|piece| piece.kind == Type::Unknown).map(|at| at as TokenId),
        bos: control(&names.bos),
        eos: control(&names.eos),
        pad: control(&names.pad),
    };
    builder.specials = specials;

    // Model

    let has_bytes = pieces.iter().any(|piece| piece.kind == Type::Byte);
    let byte_fallback = trainer_byte_fallback && has_bytes;
    let unk_token = specials
        .unk
        .and_then(|id| pieces.get(id as usize))
        .map(|piece| piece.text.clone())
        .unwrap_or_default();
    builder.model = Some(match model_type {
        ModelType::Unigram => Model::Unigram {
            scores: pieces.iter().map(|piece| piece.score).collect::<Scores>(),
            unk_token_id: specials.unk.unwrap_or(0),
            byte_fallback,
        },
        ModelType::Bpe => Model::Bpe {
            merges: derive_merges(&pieces),
            unk_token,
            fuse_unk: true,
            suffix_indicator: String::new(),
            end_suffix: String::new(),
            byte_fallback,
            cache_capacity: bpe_cache_capacity(None, pieces.len()),
        },
        other => {
            return Err(ConvertError::UnsupportedConstruct(format!(
                "sentencepiece model type {:?}",
                other
            )));
        }
    });

    // Assembly

    if let Some(max_length) = builder.configuration.max_length {
        builder.truncation = Some(Truncation {
            max_length: max_length.min(i32::MAX as u32) as i32,
            side:       Side::Right,
        });
    }
    builder.padding = Some(Padding {
        token:      builder.specials.pad.and_then(|id| pieces.get(id as usize)).map(|piece| piece.text.clone()),
        token_id:   builder.specials.pad,
        segment_id: None,
        side:       Side::Right,
        max_length: builder
            .configuration
            .max_length
            .map_or(-1, |length| length.min(i32::MAX as u32) as i32),
        pad_to_max: builder.configuration.use_max_padding,
    });

    // Decoding

    let skip_tokens = pieces
        .iter()
        .enumerate()
        .filter(|(_, piece)| piece.kind == Type::Control)
        .map(|(index, _)| index as i32)
        .collect::<Vec<_>>();
    builder.push_decoding(Decoding::VocabDecode {
        skip_tokens,
        skip: builder.configuration.skip_special_tokens,
    });
    if has_bytes {
        builder.push_decoding(Decoding::ByteFallback);
    }
    builder.push_decoding(Decoding::Fuse);
    if strip_prefix && !builder.configuration.streaming_detokenizer {
        builder.push_decoding(Decoding::strip_forward_space());
    }
    if builder.configuration.clean_up_tokenization_spaces.unwrap_or(false) {
        builder.push_decoding(Decoding::clean_up_tokenization_spaces());
    }
    if let Some(mode) = builder.configuration.utf8_replace_mode {
        if mode != Utf8Mode::Disable {
            builder.push_decoding(Decoding::Utf8Validate {
                replace: mode == Utf8Mode::Replace,
            });
        }
    }

    Ok(builder.finalize()?)
}

fn parse_pieces(model: &SentencePieceModel) -> Result<Vec<Piece>, ConvertError> {
    let mut pieces = Vec::with_capacity(model.pieces.len());
    for (index, piece) in model.pieces.iter().enumerate() {
        let text = piece
            .piece
            .as_ref()
            .ok_or_else(|| ConvertError::InvalidData(format!("piece {} has no text", index)))?;
        let kind = piece.r#type();
        if kind == Type::Byte {
            if !is_byte_text(text) {
                return Err(ConvertError::InvalidData(format!(
                    "byte piece {:?} is not a single-byte escape",
                    text
                )));
            }
            u8::from_str_radix(&text[3 .. 5], 16)
                .map_err(|e| ConvertError::InvalidNumber(format!("{:?}", e)))?;
        }
        pieces.push(Piece {
            text: text.clone(),
            score: piece.score(),
            kind,
        });
    }
    Ok(pieces)
}

/// Reorders the piece list to a reference vocabulary.
///
/// Ids whose piece already matches keep it, text matches elsewhere in the
/// list are moved, and everything else is synthesized: typed by shape and
/// rescored stepwise below its predecessor by the mean gap between the
/// negative scores, preserving segmentation tie-breaking among the original
/// pieces.
fn align_pieces(pieces: &mut Vec<Piece>, reference: &Vocab, added: &[AddedToken], names: &TrainerPieces) {
    if reference.is_empty() {
        return;
    }
    let aligned = pieces.len() == reference.len()
        && pieces
            .iter()
            .zip(reference.tokens())
            .all(|(piece, token)| piece.text.as_bytes() == token.as_slice());
    if aligned {
        return;
    }

    let negatives = pieces
        .iter()
        .map(|piece| piece.score)
        .filter(|&score| score < 0.0)
        .collect::<Vec<_>>();
    // the mean of consecutive differences telescopes to the endpoints
    let delta = if negatives.len() > 1 {
        ((negatives[negatives.len() - 1] - negatives[0]) / (negatives.len() - 1) as f32).abs()
    } else {
        0.0
    };
    let ceiling = negatives.iter().copied().fold(f32::MIN, f32::max);

    let declared = added
        .iter()
        .filter_map(|token| token.id.map(|id| (id, token.content.as_slice())))
        .collect::<HashMap<TokenId, &[u8]>>();
    let mut existing = HashMap::<&str, usize>::new();
    for (index, piece) in pieces.iter().enumerate() {
        existing.insert(piece.text.as_str(), index);
    }

    let mut result: Vec<Piece> = Vec::with_capacity(reference.len());
    for index in 0 .. reference.len() {
        let id = index as TokenId;
        let text = match declared.get(&id) {
            Some(content) => String::from_utf8_lossy(content).into_owned(),
            None => match reference.token(id) {
                Some(token) if !token.is_empty() => String::from_utf8_lossy(token).into_owned(),
                _ => format!("<new_token_{}>", index),
            },
        };
        // some sources spell single-byte pieces as the raw character
        let text = if text == "\t" && pieces.get(index).is_some_and(|piece| piece.text == "<0x09>") {
            String::from("<0x09>")
        } else {
            text
        };

        if let Some(&at) = existing.get(text.as_str()) {
            result.push(pieces[at].clone());
            continue;
        }
        let mut piece = match result.last() {
            Some(previous) => previous.clone(),
            None => {
                let mut seed = pieces[pieces.len() - 1].clone();
                seed.score = ceiling;
                seed
            }
        };
        piece.text = text;
        if piece.text == names.unk {
            piece.kind = Type::Unknown;
        } else if piece.text == names.pad || piece.text == names.bos || piece.text == names.eos {
            piece.kind = Type::Control;
        } else if is_byte_text(&piece.text) {
            piece.kind = Type::Byte;
        } else if declared.contains_key(&id) {
            piece.kind = Type::UserDefined;
            piece.score = 0.0;
        } else {
            piece.kind = Type::Normal;
            piece.score -= delta;
        }
        result.push(piece);
    }
    drop(existing);
    *pieces = result;
}

/// Places declared added tokens into the piece list.
///
/// A slot already holding the token is relabeled in place; gaps up to a
/// declared id fill with unused placeholder pieces; a slot holding a regular
/// piece is replaced, while unknown and control slots are kept with a
/// warning.
fn place_added(pieces: &mut Vec<Piece>, added: &[AddedToken]) {
    let mut ordered = added.iter().filter(|token| token.id.is_some()).collect::<Vec<_>>();
    ordered.sort_by_key(|token| token.id);
    for token in ordered {
        let Some(id) = token.id else { continue };
        let at = id as usize;
        let text = String::from_utf8_lossy(&token.content).into_owned();
        let kind = if token.special {
            Type::Control
        } else {
            Type::UserDefined
        };
        while pieces.len() < at {
            pieces.push(Piece {
                text:  format!("<empty_{}>", pieces.len()),
                score: 0.0,
                kind:  Type::Unused,
            });
        }
        if at == pieces.len() {
            pieces.push(Piece {
                text,
                score: 0.0,
                kind,
            });
        } else if pieces[at].text == text {
            pieces[at].kind = kind;
        } else if matches!(pieces[at].kind, Type::Normal | Type::Unused) {
            pieces[at] = Piece {
                text,
                score: 0.0,
                kind,
            };
        } else {
            log::warn!(
                "added token {:?} declares id {} already holding {:?}, keeping the original",
                text,
                id,
                pieces[at].text
            );
        }
    }
}

/// Derives BPE merge rules from the piece list.
///
/// Every split of a piece into two smaller pieces is a merge candidate;
/// candidates rank by the score of the piece they produce, best first, the
/// order the merges originally applied in.
fn derive_merges(pieces: &[Piece]) -> Merges {
    let index = pieces
        .iter()
        .filter(|piece| piece.kind == Type::Normal)
        .map(|piece| piece.text.as_str())
        .collect::<HashSet<_>>();
    let mut candidates = Vec::new();
    for (at, piece) in pieces.iter().enumerate() {
        if piece.kind != Type::Normal {
            continue;
        }
        let text = piece.text.as_str();
        for (split, _) in text.char_indices().skip(1) {
            let (left, right) = text.split_at(split);
            if index.contains(left) && index.contains(right) {
                candidates.push((piece.score, at, left, right));
            }
        }
    }
    candidates.sort_by(|(score_a, at_a, ..), (score_b, at_b, ..)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(core::cmp::Ordering::Equal)
            .then(at_a.cmp(at_b))
    });
    candidates
        .into_iter()
        .map(|(_, _, left, right)| (Vec::from(left.as_bytes()), Vec::from(right.as_bytes())))
        .collect()
}
