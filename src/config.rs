//! Configuration for the conversion.

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// Integer width of tensors at the graph boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
pub enum OutputType {
    /// 32-bit signed integers.
    I32,
    /// 64-bit signed integers.
    I64,
}
impl Default for OutputType {
    fn default() -> Self {
        Self::I64
    }
}

/// Handling of invalid UTF-8 in decoded output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
pub enum Utf8Mode {
    /// Pass decoded bytes through unvalidated.
    Disable,
    /// Drop invalid byte sequences.
    Ignore,
    /// Replace invalid byte sequences with `U+FFFD`.
    Replace,
}

/// Side of a sequence that truncation or padding applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
pub enum Side {
    Left,
    Right,
}
impl Default for Side {
    fn default() -> Self {
        Self::Right
    }
}

/// Errors returned when the configuration fails to validate.
#[non_exhaustive]
#[derive(Debug)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum ConfigurationError {
    /// The number of tokenizer inputs is not one or two.
    #[cfg_attr(feature = "std", error("number of inputs must be 1 or 2, got {0}"))]
    InvalidInputCount(usize),
}

/// Configuration for the conversion.
///
/// Every flag is recorded in the emitted artifact metadata alongside the graphs.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(Deserialize, Serialize))]
pub struct Configuration {
    /// Whether to also build the inverse detokenizer graph.
    pub with_detokenizer:             bool,
    /// Whether added special tokens are inserted around tokenized sequences.
    pub add_special_tokens:           bool,
    /// Whether special tokens are dropped from decoded output.
    pub skip_special_tokens:          bool,
    /// Whether decoded output is cleaned of tokenization artifacts around punctuation.
    /// Unset follows the source tokenizer.
    pub clean_up_tokenization_spaces: Option<bool>,
    /// Integer width of the tokenizer outputs.
    pub tokenizer_output_type:        OutputType,
    /// Integer width of the detokenizer input.
    pub detokenizer_input_type:       OutputType,
    /// Whether the detokenizer keeps inter-token spacing for incremental decoding.
    pub streaming_detokenizer:        bool,
    /// Maximum sequence length override. Unset follows the source tokenizer.
    pub max_length:                   Option<u32>,
    /// Whether padding always extends to the maximum length instead of the batch maximum.
    pub use_max_padding:              bool,
    /// Whether special tokens are split out with a generated pattern instead of
    /// the model's own handling. Unset lets the parser decide.
    pub handle_special_tokens_with_re: Option<bool>,
    /// Whether a referenced SentencePiece model takes precedence over the
    /// declarative description during detection.
    pub use_sentencepiece_backend:    bool,
    /// Validation of decoded UTF-8 output. Unset emits no validation.
    pub utf8_replace_mode:            Option<Utf8Mode>,
    /// Number of tokenizer string inputs. Two builds a paired-input tokenizer.
    pub number_of_inputs:             usize,
    /// Whether a space is prepended before splitting. Unset follows the source tokenizer.
    pub add_prefix_space:             Option<bool>,
    /// Whether the tokenizer outputs an attention mask.
    pub add_attention_mask:           bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            with_detokenizer:              false,
            add_special_tokens:            true,
            skip_special_tokens:           true,
            clean_up_tokenization_spaces:  None,
            tokenizer_output_type:         OutputType::I64,
            detokenizer_input_type:        OutputType::I64,
            streaming_detokenizer:         false,
            max_length:                    None,
            use_max_padding:               false,
            handle_special_tokens_with_re: None,
            use_sentencepiece_backend:     false,
            utf8_replace_mode:             None,
            number_of_inputs:              1,
            add_prefix_space:              None,
            add_attention_mask:            true,
        }
    }
}

impl Configuration {
    /// Validates the configuration.
    ///
    /// Returns an error if the configuration is invalid.
    #[inline(never)]
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(1..=2).contains(&self.number_of_inputs) {
            return Err(ConfigurationError::InvalidInputCount(self.number_of_inputs));
        }
        Ok(())
    }
}
