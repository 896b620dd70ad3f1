//! Normalization steps: string-to-string transforms applied before pre-tokenization.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::charsmap::{CharsMap, CharsMapError};
use crate::graph::{ElementType, GraphBuilder, Op, TensorId, UnicodeForm};
use crate::regex::has_lookaround;

/// A normalization step, rendered over a flat `[begins, ends, bytes]` string triple.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Deserialize, serde::Serialize))]
pub enum Normalization {
    /// Unicode normalization to a canonical form.
    Unicode(UnicodeForm),
    /// Case folding. Byte-level when `utf8` is unset.
    CaseFold { utf8: bool },
    /// Regex search and replace over one or more pattern/replacement pairs.
    Replace {
        pairs:  Vec<(String, String)>,
        global: bool,
    },
    /// Precompiled character-map normalization emulating SentencePiece.
    CharsMap(CharsMap),
    /// Literal prefix prepended to non-empty strings.
    Prepend { prefix: String },
}

impl Normalization {
    /// A single-pair regex replacement with global matching.
    ///
    /// Lookahead and lookbehind constructs are unsupported by the runtime regex
    /// engine; patterns carrying them are accepted with a warning and render
    /// with best-effort semantics.
    pub fn replace(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        let pattern = pattern.into();
        if has_lookaround(&pattern) {
            log::warn!(
                "normalization pattern {:?} contains lookaround, output might differ from the source tokenizer",
                pattern
            );
        }
        Self::Replace {
            pairs:  Vec::from([(pattern, replacement.into())]),
            global: true,
        }
    }

    /// Removes combining accent marks, to run after decomposition.
    pub fn strip_accents() -> Self {
        Self::replace(r"\p{Mn}", "")
    }

    /// Removes control characters other than `\n`, `\t` and `\r`.
    pub fn del_control_chars() -> Self {
        Self::replace(r"([\x00-\x08\x0B\x0C\x0E-\x1F\x7F-\x9F])", "")
    }

    /// Inserts a leading space before the first non-whitespace character.
    pub fn add_prefix_space() -> Self {
        Self::replace(r"^(\S)", r" \1")
    }

    /// Inserts a leading space unless one is already present.
    pub fn add_prefix_space_to_not_space() -> Self {
        Self::replace(r"^([^ ])", r" \1")
    }

    /// Replaces every space with the metaspace marker.
    pub fn replace_spaces_metaspace(replacement: &str) -> Self {
        Self::replace(" ", replacement)
    }

    /// Prepends a literal prefix unless the string starts with `check`.
    pub fn prepend_with_check(prefix: &str, check: &str) -> Self {
        Self::replace(format!("(^)([^{}])", check), format!("{}\\2", prefix))
    }

    /// Renders this step over a flat string triple.
    pub fn render(&self, builder: &mut GraphBuilder, group: [TensorId; 3]) -> [TensorId; 3] {
        let string = [ElementType::I32, ElementType::I32, ElementType::U8];
        let outputs = match self {
            Self::Unicode(form) => builder.apply(Op::NormalizeUnicode { form: *form }, &group, &string),
            Self::CaseFold { utf8 } => builder.apply(Op::CaseFold { utf8: *utf8 }, &group, &string),
            Self::Replace { pairs, global } => {
                let mut inputs = Vec::from(group);
                for (pattern, replacement) in pairs {
                    inputs.push(builder.string_constant(pattern.as_bytes()));
                    inputs.push(builder.string_constant(replacement.as_bytes()));
                }
                builder.apply(Op::RegexNormalization { global: *global }, &inputs, &string)
            }
            Self::CharsMap(map) => {
                let blob = builder.string_constant(map.data());
                let inputs = [group[0], group[1], group[2], blob];
                builder.apply(
                    Op::CharsMapNormalization {
                        add_dummy_prefix:          map.add_dummy_prefix,
                        remove_extra_whitespaces:  map.remove_extra_whitespaces,
                        escape_whitespaces:        map.escape_whitespaces,
                        case_fold:                 map.case_fold,
                        nmt:                       map.nmt,
                        form:                      map.form,
                    },
                    &inputs,
                    &string,
                )
            }
            Self::Prepend { prefix } => {
                let pattern = builder.string_constant(b"(^)(.+)");
                let replacement = builder.string_constant(format!("{}\\2", prefix).as_bytes());
                let inputs = [group[0], group[1], group[2], pattern, replacement];
                builder.apply(Op::RegexNormalization { global: true }, &inputs, &string)
            }
        };
        [outputs[0], outputs[1], outputs[2]]
    }
}

/// Fuses adjacent same-variant steps into single nodes.
///
/// Regex replacements with the same global flag concatenate their pairs in
/// order; character maps merge their flags over a shared blob. Running the
/// pass twice yields the same list.
pub fn fuse(steps: Vec<Normalization>) -> Result<Vec<Normalization>, CharsMapError> {
    let mut fused: Vec<Normalization> = Vec::with_capacity(steps.len());
    for step in steps {
        match (fused.last_mut(), step) {
            (
                Some(Normalization::Replace { pairs, global }),
                Normalization::Replace {
                    pairs: next,
                    global: next_global,
                },
            ) if *global == next_global => {
                pairs.extend(next);
            }
            (Some(Normalization::CharsMap(map)), Normalization::CharsMap(next)) => {
                *map = map.merge(&next)?;
            }
            (_, step) => fused.push(step),
        }
    }
    Ok(fused)
}
