//! Tag decoding: whitespace tokens + BIO tags → character spans.
//!
//! Everything here is a pure function over its inputs. The service runs the
//! stages in this order:
//!
//! ```text
//! text ──tokenize──▶ [Token] ──backend──▶ [tag] ──clean_bio──▶ [tag]
//!                                                     │
//!                        ┌────────────────────────────┴───────────┐
//!                        ▼                                        ▼
//!              decode_tokens (default)                  decode_spans
//!          one entity per tagged token           B-/I- runs merged into spans
//! ```
//!
//! The two decoders disagree on multi-word entities: for `["B-TYPE", "I-TYPE"]`
//! `decode_tokens` returns two entities, `decode_spans` returns one covering
//! both words. [`DecodeMode`] selects between them.

use serde::Deserialize;

use super::types::{Entity, Token, OUTSIDE_TAG};

const BEGIN_PREFIX: &str = "B-";
const INSIDE_PREFIX: &str = "I-";

/// How cleaned tags are turned into entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeMode {
    /// One entity per tagged token, tag kept verbatim. The API response format.
    #[default]
    Tokens,
    /// Merge each `B-` run with its `I-` continuations into one span.
    Spans,
}

/// Split `text` on whitespace and record each word's character offsets.
///
/// Offsets are counted in chars. The scan only moves forward, so a word that
/// repeats maps to its successive occurrences rather than the first one.
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current: Option<(usize, String)> = None;
    let mut position = 0;

    for ch in text.chars() {
        if ch.is_whitespace() {
            if let Some((start, word)) = current.take() {
                tokens.push(Token::new(word, start, position));
            }
        } else {
            match current.as_mut() {
                Some((_, word)) => word.push(ch),
                None => current = Some((position, ch.to_string())),
            }
        }
        position += 1;
    }

    if let Some((start, word)) = current {
        tokens.push(Token::new(word, start, position));
    }

    tokens
}

/// Rewrite orphan continuation tags.
///
/// An `I-<L>` whose predecessor (after cleaning) does not end with `<L>` has
/// nothing to continue and becomes `B-<L>`. Afterwards every span starts with
/// a `B-` tag. The first tag is checked against `O`.
pub fn clean_bio<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::with_capacity(tags.len());

    for tag in tags {
        let tag = tag.as_ref();
        let prev = cleaned.last().map(String::as_str).unwrap_or(OUTSIDE_TAG);

        let tag = match tag.strip_prefix(INSIDE_PREFIX) {
            Some(label) if !prev.ends_with(label) => format!("{BEGIN_PREFIX}{label}"),
            _ => tag.to_string(),
        };
        cleaned.push(tag);
    }

    cleaned
}

/// Single-token decoding: every tag other than `O` or the empty string becomes
/// one entity over its token.
pub fn decode_tokens<S: AsRef<str>>(tokens: &[Token], tags: &[S]) -> Vec<Entity> {
    debug_assert_eq!(tokens.len(), tags.len(), "one tag per token");

    tokens
        .iter()
        .zip(tags)
        .filter_map(|(token, tag)| {
            let tag = tag.as_ref();
            if tag.is_empty() || tag == OUTSIDE_TAG {
                None
            } else {
                Some(Entity::new(token.start, token.end, tag))
            }
        })
        .collect()
}

/// BIO-merging decoding over tags that went through [`clean_bio`].
///
/// An `I-` tag with no open entity is dropped; `clean_bio` guarantees that
/// cannot happen for its output.
pub fn decode_spans<S: AsRef<str>>(tokens: &[Token], cleaned_tags: &[S]) -> Vec<Entity> {
    debug_assert_eq!(tokens.len(), cleaned_tags.len(), "one tag per token");

    let mut entities = Vec::new();
    let mut open: Option<Entity> = None;

    for (token, tag) in tokens.iter().zip(cleaned_tags) {
        let tag = tag.as_ref();

        if tag.starts_with(BEGIN_PREFIX) {
            if let Some(entity) = open.take() {
                entities.push(entity);
            }
            open = Some(Entity::new(token.start, token.end, tag));
        } else if tag.starts_with(INSIDE_PREFIX) {
            if let Some(entity) = open.as_mut() {
                entity.end_index = token.end;
                entity.entity = tag.to_string();
            }
        } else if tag == OUTSIDE_TAG {
            if let Some(entity) = open.take() {
                entities.push(entity);
            }
        }
    }

    if let Some(entity) = open {
        entities.push(entity);
    }

    entities
}

/// Clean `tags` and decode them with the selected mode.
pub fn decode<S: AsRef<str>>(mode: DecodeMode, tokens: &[Token], tags: &[S]) -> Vec<Entity> {
    let cleaned = clean_bio(tags);
    match mode {
        DecodeMode::Tokens => decode_tokens(tokens, &cleaned),
        DecodeMode::Spans => decode_spans(tokens, &cleaned),
    }
}
