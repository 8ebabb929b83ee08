//! Token substitution for build file templates.
//!
//! Templates are plain text containing bare uppercase tokens such as
//! `LIBRARY_VERSION`. Rendering replaces every occurrence of each bound token
//! with its value in a single left-to-right pass:
//!
//! - matching is literal and case-sensitive
//! - replacements never overlap, and substituted values are not rescanned
//! - when two tokens start at the same position the longer one wins
//! - all text outside token positions is copied byte for byte
//!
//! A value that itself contains a token is emitted as-is; templates should
//! not rely on that.
//!
//! # Example
//!
//! ```
//! use imgmatrix_lib::template::{Bindings, render};
//!
//! let bindings = Bindings::new()
//!   .bind("LIBRARY_VERSION", "10.1")
//!   .bind("CHANNEL_VERSION", "2020-05-01");
//!
//! let out = render("FROM nvidia/cuda:LIBRARY_VERSION-devel\nRUN echo CHANNEL_VERSION", &bindings);
//! assert_eq!(out, "FROM nvidia/cuda:10.1-devel\nRUN echo 2020-05-01");
//! ```

use std::collections::BTreeMap;

/// A slice of parsed template text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
  /// Text copied through unchanged.
  Literal(&'a str),

  /// A token occurrence to be replaced.
  Token(&'a str),
}

/// Token to value mapping used for one render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
  values: BTreeMap<String, String>,
}

impl Bindings {
  pub fn new() -> Self {
    Self::default()
  }

  /// Bind `token` to `value`. Empty tokens are ignored since they would match everywhere.
  pub fn bind(mut self, token: impl Into<String>, value: impl Into<String>) -> Self {
    let token = token.into();
    if !token.is_empty() {
      self.values.insert(token, value.into());
    }
    self
  }

  pub fn get(&self, token: &str) -> Option<&str> {
    self.values.get(token).map(String::as_str)
  }

  pub fn tokens(&self) -> impl Iterator<Item = &str> {
    self.values.keys().map(String::as_str)
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }
}

/// Split `input` into literal text and occurrences of the given tokens.
///
/// Each token's next match is cached and only searched again once the cursor
/// has moved past it, so every token is scanned over the input once.
pub fn parse<'a>(input: &'a str, tokens: &[&str]) -> Vec<Segment<'a>> {
  let tokens: Vec<&str> = tokens.iter().copied().filter(|t| !t.is_empty()).collect();
  let mut next_match: Vec<Option<usize>> = tokens.iter().map(|t| input.find(t)).collect();
  let mut segments = Vec::new();
  let mut cursor = 0;

  while cursor < input.len() {
    for (token, slot) in tokens.iter().zip(next_match.iter_mut()) {
      if matches!(*slot, Some(pos) if pos < cursor) {
        *slot = input[cursor..].find(token).map(|pos| cursor + pos);
      }
    }

    let next = tokens
      .iter()
      .zip(&next_match)
      .filter_map(|(token, slot)| slot.map(|pos| (pos, token.len())))
      .min_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let Some((pos, len)) = next else {
      segments.push(Segment::Literal(&input[cursor..]));
      break;
    };

    if pos > cursor {
      segments.push(Segment::Literal(&input[cursor..pos]));
    }
    segments.push(Segment::Token(&input[pos..pos + len]));
    cursor = pos + len;
  }

  segments
}

/// Join parsed segments, replacing each token with its bound value.
///
/// Tokens without a binding are emitted unchanged.
pub fn substitute_segments(segments: &[Segment<'_>], bindings: &Bindings) -> String {
  let mut result = String::new();

  for segment in segments {
    match segment {
      Segment::Literal(s) => result.push_str(s),
      Segment::Token(t) => result.push_str(bindings.get(t).unwrap_or(*t)),
    }
  }

  result
}

/// Render `template` by substituting every bound token.
pub fn render(template: &str, bindings: &Bindings) -> String {
  let tokens: Vec<&str> = bindings.tokens().collect();
  substitute_segments(&parse(template, &tokens), bindings)
}

/// Count occurrences of bound tokens left in `text`.
pub fn count_tokens(text: &str, bindings: &Bindings) -> usize {
  let tokens: Vec<&str> = bindings.tokens().collect();
  parse(text, &tokens)
    .iter()
    .filter(|s| matches!(s, Segment::Token(_)))
    .count()
}
