use alloc::vec::Vec;
use core::fmt::{Debug, Display};

use bstr::ByteSlice;
use derive_more::{Deref, Index};
use hashbrown::HashMap;

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// Numeric identifier of a token.
pub type TokenId = u32;
/// Byte sequence of a token.
pub type TokenBytes = Vec<u8>;
/// Score of a token.
pub type TokenScore = f32;
/// List of token scores.
pub type Scores = Vec<TokenScore>;
/// List of byte-pair merges.
pub type Merges = Vec<(TokenBytes, TokenBytes)>;

/// A dense id-indexed vocabulary with reverse token lookup.
///
/// Tokens are raw byte strings and ids index into the token list directly. Ids absent
/// from the source data are backed by empty placeholder entries to keep positions aligned.
#[derive(Clone, Default, Deref, Index)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialization", serde(from = "Vec<TokenBytes>", into = "Vec<TokenBytes>"))]
pub struct Vocab {
    #[deref]
    #[index]
    tokens: Vec<TokenBytes>,
    index:  HashMap<TokenBytes, TokenId>,
}

impl Vocab {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tokens: Vec::with_capacity(capacity),
            index:  HashMap::with_capacity(capacity),
        }
    }

    /// Builds a dense vocabulary from `(token, id)` pairs in any order.
    ///
    /// Gaps in the id range become empty entries. Duplicate tokens keep the lowest id
    /// for reverse lookup.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (TokenBytes, TokenId)>) -> Self {
        let mut pairs = pairs.into_iter().collect::<Vec<_>>();
        pairs.sort_by_key(|&(_, id)| id);
        let mut vocab = Self::with_capacity(pairs.len());
        for (token, id) in pairs {
            vocab.set(id, token);
        }
        vocab
    }

    /// Appends a token with the next free id, or returns its existing id.
    pub fn insert(&mut self, token: TokenBytes) -> TokenId {
        if let Some(&id) = self.index.get(&token) {
            return id;
        }
        let id = self.tokens.len() as TokenId;
        self.index.insert(token.clone(), id);
        self.tokens.push(token);
        id
    }

    /// Places a token at a fixed id, extending with placeholders as needed.
    pub fn set(&mut self, id: TokenId, token: TokenBytes) {
        let at = id as usize;
        if at >= self.tokens.len() {
            self.tokens.resize(at + 1, TokenBytes::new());
        }
        self.index.entry(token.clone()).or_insert(id);
        self.tokens[at] = token;
    }

    #[inline(always)]
    pub fn id_of(&self, token: &[u8]) -> Option<TokenId> {
        self.index.get(token).copied()
    }

    #[inline(always)]
    pub fn token(&self, id: TokenId) -> Option<&[u8]> {
        self.tokens.get(id as usize).map(Vec::as_slice)
    }

    pub fn tokens(&self) -> &[TokenBytes] {
        &self.tokens
    }

    /// Rewrites every token in place and rebuilds the reverse lookup.
    pub fn remap(&mut self, mut f: impl FnMut(&[u8]) -> TokenBytes) {
        for token in self.tokens.iter_mut() {
            *token = f(token);
        }
        self.index = self
            .tokens
            .iter()
            .enumerate()
            .map(|(id, token)| (token.clone(), id as TokenId))
            .rev()
            .collect();
    }
}

impl Debug for Vocab {
    #[inline(never)]
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Vocab").field("tokens", &self.tokens.len()).finish()
    }
}

impl PartialEq for Vocab {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        self.tokens == other.tokens
    }
}
impl Eq for Vocab {}

impl From<Vec<TokenBytes>> for Vocab {
    fn from(tokens: Vec<TokenBytes>) -> Self {
        let index = tokens
            .iter()
            .enumerate()
            .map(|(id, token)| (token.clone(), id as TokenId))
            .rev()
            .collect();
        Self { tokens, index }
    }
}

impl From<Vocab> for Vec<TokenBytes> {
    #[inline(always)]
    fn from(vocab: Vocab) -> Self {
        vocab.tokens
    }
}

impl FromIterator<TokenBytes> for Vocab {
    fn from_iter<I: IntoIterator<Item = TokenBytes>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

/// A token added on top of the model vocabulary.
///
/// Added tokens are split out of the raw input ahead of tokenization and mapped directly
/// to their id. Missing ids are resolved against the vocabulary when the pipeline is built.
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
pub struct AddedToken {
    /// The token bytes matched in the input.
    pub content:     TokenBytes,
    /// The token id, when already known.
    pub id:          Option<TokenId>,
    /// Whether the token is a control token rather than a regular addition.
    pub special:     bool,
    /// Whether whitespace to the left is consumed by the match.
    pub lstrip:      bool,
    /// Whether whitespace to the right is consumed by the match.
    pub rstrip:      bool,
    /// Whether the token is matched after normalization instead of before.
    pub normalized:  bool,
    /// Whether the match must not sit inside a word.
    pub single_word: bool,
}

impl AddedToken {
    pub fn new(content: impl Into<TokenBytes>) -> Self {
        Self {
            content:     content.into(),
            id:          None,
            special:     false,
            lstrip:      false,
            rstrip:      false,
            normalized:  false,
            single_word: false,
        }
    }

    pub fn with_id(mut self, id: TokenId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn special(mut self) -> Self {
        self.special = true;
        self
    }
}

impl Display for AddedToken {
    #[inline(never)]
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_tuple("AddedToken")
            .field(&self.content.as_bstr())
            .field(&self.id)
            .field(&self.special)
            .finish()
    }
}
impl Debug for AddedToken {
    #[inline(never)]
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("AddedToken")
            .field("content", &self.content.as_bstr())
            .field("id", &self.id)
            .field("special", &self.special)
            .field("lstrip", &self.lstrip)
            .field("rstrip", &self.rstrip)
            .field("normalized", &self.normalized)
            .field("single_word", &self.single_word)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pairs_fills_gaps() {
        let vocab = Vocab::from_pairs([
            (Vec::from(*b"c"), 3),
            (Vec::from(*b"a"), 0),
            (Vec::from(*b"b"), 1),
        ]);
        assert_eq!(vocab.len(), 4);
        assert_eq!(vocab.token(0), Some(b"a".as_slice()));
        assert_eq!(vocab.token(2), Some(b"".as_slice()));
        assert_eq!(vocab.token(3), Some(b"c".as_slice()));
        assert_eq!(vocab.id_of(b"b"), Some(1));
        assert_eq!(vocab.id_of(b"z"), None);
    }

    #[test]
    fn test_insert_reuses_existing() {
        let mut vocab = Vocab::new();
        assert_eq!(vocab.insert(Vec::from(*b"x")), 0);
        assert_eq!(vocab.insert(Vec::from(*b"y")), 1);
        assert_eq!(vocab.insert(Vec::from(*b"x")), 0);
        assert_eq!(vocab.len(), 2);
    }

    #[test]
    fn test_duplicate_tokens_keep_lowest_id() {
        let vocab = Vocab::from_pairs([(Vec::from(*b"a"), 0), (Vec::from(*b"a"), 2)]);
        assert_eq!(vocab.id_of(b"a"), Some(0));
        assert_eq!(vocab.token(2), Some(b"a".as_slice()));
    }

    #[test]
    fn test_remap_rebuilds_index() {
        let mut vocab = Vocab::from_pairs([(Vec::from(*b"a"), 0), (Vec::from(*b"b"), 1)]);
        vocab.remap(|token| {
            let mut out = Vec::from(*b"_");
            out.extend_from_slice(token);
            out
        });
        assert_eq!(vocab.token(1), Some(b"_b".as_slice()));
        assert_eq!(vocab.id_of(b"_a"), Some(0));
        assert_eq!(vocab.id_of(b"a"), None);
    }
}
