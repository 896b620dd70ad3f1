//! Helpers for regex patterns carried into split and normalization nodes.
//!
//! Patterns are stored in graphs as constant data and compiled by the graph runtime.
//! The runtime's primary engine covers the syntax accepted by [`regex_syntax`]; patterns
//! beyond that, notably lookaround, fall back to a slower engine or are filtered out
//! depending on the step.

use alloc::string::String;
use alloc::vec::Vec;

use fancy_regex::Regex;

/// Returns whether a pattern uses lookahead or lookbehind.
#[inline]
pub fn has_lookaround(pattern: &str) -> bool {
    ["(?=", "(?!", "(?<=", "(?<!"].iter().any(|marker| pattern.contains(marker))
}

/// Returns whether a pattern stays within the primary engine's syntax.
#[inline]
pub fn is_engine_supported(pattern: &str) -> bool {
    regex_syntax::Parser::new().parse(pattern).is_ok()
}

/// Compiles a pattern with the fallback engine to check it is well-formed at all.
pub fn validate(pattern: &str) -> Result<(), fancy_regex::Error> {
    Regex::new(pattern).map(drop)
}

/// Escapes every non-alphanumeric character with a backslash.
///
/// More aggressive than minimal regex escaping, matching the quoting applied to
/// token strings before they are embedded in split patterns.
pub fn quote_meta(unquoted: &str) -> String {
    let mut quoted = String::with_capacity(unquoted.len() * 2);
    for char in unquoted.chars() {
        if !char.is_alphanumeric() && char != '_' {
            quoted.push('\\');
        }
        quoted.push(char);
    }
    quoted
}

/// Splits a pattern into its top-level alternation branches.
///
/// Branch boundaries are `|` at parenthesis depth zero outside character classes.
/// Empty branches are skipped.
fn alternation_branches(pattern: &str) -> Vec<&str> {
    let mut branches = Vec::new();
    let mut start = 0;
    let mut depth = 0_usize;
    let mut in_class = false;
    let mut escaped = false;
    for (at, char) in pattern.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match char {
            '\\' => escaped = true,
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '(' if !in_class => depth += 1,
            ')' if !in_class => depth = depth.saturating_sub(1),
            '|' if !in_class && depth == 0 => {
                if at > start {
                    branches.push(&pattern[start..at]);
                }
                start = at + 1;
            }
            _ => {}
        }
    }
    if pattern.len() > start {
        branches.push(&pattern[start..]);
    }
    branches
}

/// Drops top-level alternation branches the primary engine cannot compile.
///
/// Returns the remaining branches rejoined with `|`, which is empty when every
/// branch was dropped. Each dropped branch is logged.
pub fn filter_engine_supported(pattern: &str) -> String {
    if is_engine_supported(pattern) {
        return pattern.into();
    }
    let mut kept = Vec::new();
    for branch in alternation_branches(pattern) {
        if is_engine_supported(branch) {
            kept.push(branch);
        } else {
            log::warn!("pattern branch `{branch}` is not supported by the split engine and is filtered out");
        }
    }
    kept.join("|")
}
