//! Wildcard address patterns and their specificity ordering.
//!
//! A pattern is a dot-separated token string. `*` matches exactly one token,
//! `#` matches zero or more tokens, and the catch-all pattern is `#` on its
//! own. Patterns are validated and compiled once at registration time.

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

/// Matches exactly one token between dots.
pub const SINGLE_WORD_WILDCARD: &str = "*";

/// Matches zero or more tokens.
pub const ANY_WORDS_WILDCARD: &str = "#";

/// A pattern rejected at registration time.
///
/// Patterns must be non-empty, every token must be non-empty, and a wildcard
/// token must stand alone (no `foo*` or `a#b` tokens).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid match pattern '{0}'")]
pub struct InvalidPattern(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    AnyWord,
    AnyWords,
}

/// A compiled wildcard pattern.
#[derive(Debug, Clone)]
pub struct Match {
    text: String,
    tokens: Vec<Token>,
    has_any_words: bool,
    has_single_word: bool,
}

impl Match {
    /// Validate and compile `pattern`.
    pub fn compile(pattern: &str) -> Result<Match, InvalidPattern> {
        Self::verify(pattern)?;

        let tokens = pattern
            .split('.')
            .map(|tok| match tok {
                SINGLE_WORD_WILDCARD => Token::AnyWord,
                ANY_WORDS_WILDCARD => Token::AnyWords,
                literal => Token::Literal(literal.to_string()),
            })
            .collect::<Vec<_>>();

        Ok(Match {
            text: pattern.to_string(),
            has_any_words: tokens.contains(&Token::AnyWords),
            has_single_word: tokens.contains(&Token::AnyWord),
            tokens,
        })
    }

    /// Check `pattern` without building a `Match`.
    pub fn verify(pattern: &str) -> Result<(), InvalidPattern> {
        if pattern.is_empty() {
            return Err(InvalidPattern(pattern.to_string()));
        }
        for tok in pattern.split('.') {
            let standalone_wildcard =
                tok == SINGLE_WORD_WILDCARD || tok == ANY_WORDS_WILDCARD;
            let mixed_wildcard =
                !standalone_wildcard && (tok.contains('*') || tok.contains('#'));
            if tok.is_empty() || mixed_wildcard {
                return Err(InvalidPattern(pattern.to_string()));
            }
        }
        Ok(())
    }

    /// The pattern text as registered.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether `key` is matched by this pattern.
    pub fn matches(&self, key: &str) -> bool {
        let key_tokens: Vec<&str> = key.split('.').collect();
        match_tokens(&self.tokens, &key_tokens)
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn match_tokens(pattern: &[Token], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((Token::AnyWords, rest)) => {
            (0..=key.len()).any(|skip| match_tokens(rest, &key[skip..]))
        }
        Some((token, rest)) => match key.split_first() {
            None => false,
            Some((head, tail)) => {
                let head_ok = match token {
                    Token::Literal(lit) => lit == head,
                    Token::AnyWord => !head.is_empty(),
                    Token::AnyWords => unreachable!(),
                };
                head_ok && match_tokens(rest, tail)
            }
        },
    }
}

/// Order two patterns by specificity: `Less` means `left` is MORE specific,
/// so an ascending sort yields the most specific pattern first.
///
/// Rules, applied in order:
/// 1. a pattern containing `#` is less specific than one without;
/// 2. between two `#` patterns the longer text is more specific;
/// 3. a pattern containing `*` is less specific than one without;
/// 4. between two `*` patterns, the first token position where exactly one
///    side is `*` decides: the non-wildcard side is more specific. The scan
///    stops at that position, even when it is the first one;
/// 5. otherwise the longer text is more specific.
pub fn compare_specificity(left: &Match, right: &Match) -> Ordering {
    match (left.has_any_words, right.has_any_words) {
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        (true, true) => return right.text.len().cmp(&left.text.len()),
        (false, false) => {}
    }

    match (left.has_single_word, right.has_single_word) {
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        (true, true) => {
            for (l, r) in left.tokens.iter().zip(right.tokens.iter()) {
                match (l == &Token::AnyWord, r == &Token::AnyWord) {
                    (true, false) => return Ordering::Greater,
                    (false, true) => return Ordering::Less,
                    _ => {}
                }
            }
        }
        (false, false) => {}
    }

    right.text.len().cmp(&left.text.len())
}
