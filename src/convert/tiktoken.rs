//! Conversion for tiktoken rank tables.
//!
//! The table supplies only a byte-string to rank mapping. Merge rules are
//! re-derived by replaying the byte-pair algorithm for every multi-byte entry
//! against the ranks below its own; entries whose replay does not reduce to
//! two parts cannot be expressed as a merge rule and become exact-match added
//! tokens instead. The emitted model works on raw bytes, so the pipeline needs
//! neither byte remapping nor a byte fallback.

#[cfg(feature = "std")]
use std::fs::File;
#[cfg(feature = "std")]
use std::io::Read;
#[cfg(feature = "std")]
use std::path::Path;

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cmp::Ordering;

use base64::{alphabet, engine, Engine};
use bstr::ByteSlice;
use hashbrown::HashMap;
use orx_priority_queue::{DaryHeapOfIndices, PriorityQueue, PriorityQueueDecKey};

use crate::artifacts::Source;
use crate::config::{Configuration, Side, Utf8Mode};
use crate::convert::ConvertError;
use crate::graph::{SplitBehavior, UnicodeForm};
use crate::pipeline::{DecodeRewrite, Pipeline, PipelineBuilder};
use crate::steps::model::bpe_cache_capacity;
use crate::steps::{Decoding, Model, Normalization, Padding, PreTokenization, Split, Truncation};
use crate::vocab::{AddedToken, Merges, TokenBytes, TokenId, Vocab};

static BASE64: engine::GeneralPurpose =
    engine::GeneralPurpose::new(&alphabet::STANDARD, engine::general_purpose::PAD);

/// The contraction split pattern used by `cl100k_base` and later encodings.
const CL100K_PATTERN: &str = r"(?i:'s|'t|'re|'ve|'m|'ll|'d)|[^\r\n\p{L}\p{N}]?\p{L}+|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+(?!\S)|\s+";
/// The split pattern used by the GPT-2 family of encodings.
const P50K_PATTERN: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

/// Converts a tiktoken rank table into a tokenizer pipeline.
///
/// The table is composed of lines of the form `<token> <rank>`, where
/// `<token>` is a base64-encoded byte sequence and `<rank>` is a decimal
/// number. Data whose first line does not match reports
/// [`ConvertError::FormatMismatch`] so detection can move on; malformed later
/// lines report the matching data error.
///
/// Rank tables carry no special tokens and no split pattern. This function
/// chooses both based on the number of entries, following the defaults of the
/// tiktoken encodings; use [`convert_tiktoken_with_specials`] to supply them
/// explicitly.
pub fn convert_tiktoken(
    data: impl AsRef<[u8]>, configuration: Configuration,
) -> Result<Pipeline, ConvertError> {
    convert_ranks(data.as_ref(), None, configuration)
}

/// Converts a tiktoken rank table with an explicit split pattern and special
/// tokens. See [`convert_tiktoken`] for more details.
pub fn convert_tiktoken_with_specials(
    data: impl AsRef<[u8]>, pattern: impl Into<String>, specials: Vec<AddedToken>,
    configuration: Configuration,
) -> Result<Pipeline, ConvertError> {
    convert_ranks(data.as_ref(), Some((pattern.into(), specials)), configuration)
}

/// Converts a tiktoken rank table read from a reader. See
/// [`convert_tiktoken`] for more details.
#[cfg(feature = "std")]
pub fn convert_tiktoken_reader<R: Read>(
    reader: &mut R, configuration: Configuration,
) -> Result<Pipeline, ConvertError> {
    let mut data = Vec::with_capacity(1024);
    reader.read_to_end(&mut data)?;
    convert_tiktoken(data, configuration)
}

/// Converts a tiktoken rank table read from a file. See [`convert_tiktoken`]
/// for more details.
#[cfg(feature = "std")]
pub fn convert_tiktoken_file(
    path: impl AsRef<Path>, configuration: Configuration,
) -> Result<Pipeline, ConvertError> {
    let mut file = File::open(path)?;
    convert_tiktoken_reader(&mut file, configuration)
}

fn convert_ranks(
    data: &[u8], overrides: Option<(String, Vec<AddedToken>)>, configuration: Configuration,
) -> Result<Pipeline, ConvertError> {
    let lines = data
        .split(|u| *u == b'\n')
        .map(|line| line.trim_with(|u| u == '\r'))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>();
    if lines.is_empty() {
        return Err(ConvertError::FormatMismatch("empty rank table".to_string()));
    }

    let mut pairs = Vec::with_capacity(lines.len());
    for (index, line) in lines.into_iter().enumerate() {
        match parse_rank_line(line, index) {
            Ok(pair) => pairs.push(pair),
            Err(e) if index == 0 => {
                return Err(ConvertError::FormatMismatch(format!("not a rank table: {}", e)));
            }
            Err(e) => return Err(e),
        }
    }

    let (pattern, specials) = match overrides {
        Some((pattern, specials)) => (pattern, specials),
        None if pairs.len() >= 100000 => (
            String::from(CL100K_PATTERN),
            Vec::from([
                AddedToken::new(*b"<|endoftext|>").with_id(100257).special(),
                AddedToken::new(*b"<|fim_prefix|>").with_id(100258).special(),
                AddedToken::new(*b"<|fim_middle|>").with_id(100259).special(),
                AddedToken::new(*b"<|fim_suffix|>").with_id(100260).special(),
                AddedToken::new(*b"<|endofprompt|>").with_id(100276).special(),
                AddedToken::new(*b"<|im_start|>").with_id(100264).special(),
                AddedToken::new(*b"<|im_end|>").with_id(100265).special(),
            ]),
        ),
        None => (
            String::from(P50K_PATTERN),
            Vec::from([
                AddedToken::new(*b"<|endoftext|>").with_id(50256).special(),
                AddedToken::new(*b"<|fim_prefix|>").with_id(50281).special(),
                AddedToken::new(*b"<|fim_middle|>").with_id(50282).special(),
                AddedToken::new(*b"<|fim_suffix|>").with_id(50283).special(),
            ]),
        ),
    };

    // ranks below an entry's own replay its merge history; entries that do
    // not reduce to two parts become exact-match tokens
    let ranks = pairs
        .iter()
        .map(|(token, rank)| (token.as_slice(), *rank))
        .collect::<HashMap<_, _>>();
    let mut merges = Merges::new();
    let mut exact_tokens = Vec::new();
    for (token, rank) in &pairs {
        if token.len() < 2 {
            continue;
        }
        let parts = byte_pair_parts(&ranks, token, *rank);
        if parts.len() == 2 {
            merges.push((Vec::from(parts[0]), Vec::from(parts[1])));
        } else {
            exact_tokens.push(AddedToken::new(token.clone()).with_id(*rank));
        }
    }
    drop(ranks);

    let mut builder = PipelineBuilder::new(configuration);
    builder.source = Source::Tiktoken;
    builder.vocab = Vocab::from_pairs(pairs);

    builder.push_normalization(Normalization::Unicode(UnicodeForm::Nfc));
    builder.pre_tokenization.push(PreTokenization::Split(Split::new(
        pattern,
        SplitBehavior::Contiguous,
        false,
    )));
    builder.model = Some(Model::Bpe {
        merges,
        unk_token: String::new(),
        fuse_unk: false,
        suffix_indicator: String::new(),
        end_suffix: String::new(),
        byte_fallback: false,
        cache_capacity: bpe_cache_capacity(None, builder.vocab.len()),
    });

    builder.specials.eos = specials
        .iter()
        .find(|token| token.content == b"<|endoftext|>")
        .and_then(|token| token.id);
    let mut skip_tokens = specials
        .iter()
        .filter_map(|token| token.id.map(|id| id as i32))
        .collect::<Vec<_>>();
    skip_tokens.sort_unstable();
    // (chat)GLM surrounds this token with spaces when decoding
    let sop = TokenBytes::from(*b"<sop>");
    if builder.vocab.id_of(&sop).is_some() || specials.iter().any(|token| token.content == sop) {
        builder.decode_rewrite = DecodeRewrite::Spaced {
            tokens: Vec::from([sop]),
        };
    }
    for token in specials {
        builder.add_token(token);
    }
    for token in exact_tokens {
        builder.add_token(token);
    }

    if let Some(max_length) = builder.configuration.max_length {
        builder.truncation = Some(Truncation {
            max_length: max_length.min(i32::MAX as u32) as i32,
            side:       Side::Right,
        });
    }
    builder.padding = Some(Padding {
        token:      None,
        token_id:   None,
        segment_id: None,
        side:       Side::Right,
        max_length: builder
            .configuration
            .max_length
            .map_or(-1, |length| length.min(i32::MAX as u32) as i32),
        pad_to_max: builder.configuration.use_max_padding,
    });

    builder.push_decoding(Decoding::VocabDecode {
        skip_tokens,
        skip: builder.configuration.skip_special_tokens,
    });
    builder.push_decoding(Decoding::Fuse);
    if let Some(mode) = builder.configuration.utf8_replace_mode {
        if mode != Utf8Mode::Disable {
            builder.push_decoding(Decoding::Utf8Validate {
                replace: mode == Utf8Mode::Replace,
            });
        }
    }
    if builder.configuration.clean_up_tokenization_spaces.unwrap_or(false) {
        builder.push_decoding(Decoding::clean_up_tokenization_spaces());
    }

    Ok(builder.finalize()?)
}

fn parse_rank_line(line: &[u8], index: usize) -> Result<(TokenBytes, TokenId), ConvertError> {
    let split = memchr::memchr(b' ', line)
        .ok_or_else(|| ConvertError::InvalidData(format!("wrong format in line {}", index)))?;
    let (encoded, number) = (&line[.. split], &line[split + 1 ..]);
    let token = BASE64
        .decode(encoded)
        .map_err(|e| ConvertError::InvalidBase64(format!("invalid base64 in line {}: {}", index, e)))?;
    let rank = number
        .as_bstr()
        .to_str()
        .map_err(|e| ConvertError::InvalidUtf8(format!("invalid utf-8 in line {}: {}", index, e)))?
        .parse::<TokenId>()
        .map_err(|e| ConvertError::InvalidNumber(format!("invalid number in line {}: {}", index, e)))?;
    Ok((token, rank))
}

/// A byte range of the token while merges replay, linked to its neighbors.
///
/// `rank` holds the admissible rank of this part merged with its successor,
/// or the sentinel when no such merge applies.
#[derive(Debug, Clone, Copy)]
struct LinkedPart {
    start: u32,
    width: u32,
    prior: u32,
    after: u32,
    rank:  TokenId,
}
impl PartialEq for LinkedPart {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.start == other.start
    }
}
impl Eq for LinkedPart {}
impl PartialOrd for LinkedPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for LinkedPart {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.rank, self.start).cmp(&(other.rank, other.start))
    }
}

type PartHeap = DaryHeapOfIndices<u32, LinkedPart, 4>;

/// Replays the byte-pair merge sequence for a token, restricted to ranks
/// below `max_rank`.
///
/// Parts start as single bytes chained through an indexed heap; the pair
/// whose concatenation holds the lowest admissible rank merges first, ties
/// to the left, until no pair qualifies.
fn byte_pair_parts<'a>(
    ranks: &HashMap<&[u8], TokenId>, token: &'a [u8], max_rank: TokenId,
) -> Vec<&'a [u8]> {
    let rank_below = |range: core::ops::Range<usize>| {
        ranks.get(&token[range]).copied().filter(|&rank| rank < max_rank).unwrap_or(TokenId::MAX)
    };
    let last = token.len() as u32 - 1;
    let mut heap = PartHeap::with_index_bound(token.len());
    for at in 0 ..= last {
        heap.push(at, LinkedPart {
            start: at,
            width: 1,
            prior: if at == 0 { u32::MAX } else { at - 1 },
            after: if at == last { u32::MAX } else { at + 1 },
            rank:  if at == last {
                TokenId::MAX
            } else {
                rank_below(at as usize .. at as usize + 2)
            },
        });
    }
    while heap.len() > 1 {
        let &(at, mut part) = heap.peek().unwrap();
        if part.rank == TokenId::MAX {
            break;
        }
        let merged = heap.remove(&part.after);
        part.width += merged.width;
        part.after = merged.after;
        if part.after != u32::MAX {
            let mut next = heap.key_of(&part.after).unwrap();
            part.rank = rank_below(part.start as usize .. (next.start + next.width) as usize);
            next.prior = at;
            heap.update_key(&part.after, next);
        } else {
            part.rank = TokenId::MAX;
        }
        if part.prior != u32::MAX {
            let mut prior = heap.key_of(&part.prior).unwrap();
            prior.rank = rank_below(prior.start as usize .. (part.start + part.width) as usize);
            heap.update_key(&part.prior, prior);
        }
        heap.update_key(&at, part);
    }
    let mut parts = Vec::with_capacity(heap.len());
    let mut at = 0;
    while at != u32::MAX {
        let part = heap.key_of(&at).unwrap();
        parts.push(&token[part.start as usize .. (part.start + part.width) as usize]);
        at = part.after;
    }
    parts
}
