//! Parsers for profile tokens.
//!
//! Two grammars live here. The strict grammar is what queries must satisfy:
//! `REF POS ALT` site expressions over the IUPAC alphabets, `del:START:LEN`
//! deletions, and the protein forms of both behind a `SYMBOL:` prefix checked
//! against the annotation. The replay grammar is looser. Stored profiles may
//! contain shapes the strict grammar rejects (most notably the anchorless
//! `0...` insertion in front of the first base), so sequence restoration
//! parses tokens by splitting on the single digit run instead.

use std::collections::HashSet;

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::digit1;
use nom::error::ErrorKind;
use nom::{IResult, Parser};

use crate::error::VarbankError;
use crate::Result;

use super::token::ProfileToken;

/// Nucleotide letters a strict token may use, IUPAC ambiguity codes included.
const NUC_LETTERS: &str = "ACGTRYSWKMBDHVN";

/// Amino acid letters a strict token may use: the one-letter residues with
/// ambiguity codes, the class codes, stop `*` and truncation `~`.
const AA_LETTERS: &str = "ARNDCQEGHILKMFPSTWYVUOBZJX\u{3a6}\u{3a9}\u{3a8}\u{3c0}\u{3b6}+-*~";

#[inline]
fn is_nuc_letter(c: char) -> bool {
    NUC_LETTERS.contains(c)
}

#[inline]
fn is_aa_letter(c: char) -> bool {
    AA_LETTERS.contains(c)
}

/// Parse a decimal position.
fn number(input: &str) -> IResult<&str, i64> {
    let (rest, digits) = digit1(input)?;
    match digits.parse::<i64>() {
        Ok(value) => Ok((rest, value)),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(
            input,
            ErrorKind::Digit,
        ))),
    }
}

/// Parse a single letter satisfying `pred`.
fn letter(input: &str, pred: fn(char) -> bool) -> IResult<&str, char> {
    match input.chars().next() {
        Some(c) if pred(c) => Ok((&input[c.len_utf8()..], c)),
        _ => Err(nom::Err::Error(nom::error::Error::new(
            input,
            ErrorKind::OneOf,
        ))),
    }
}

/// Parse the `del:START:LEN` body shared by both deletion forms.
fn deletion_body(input: &str) -> IResult<&str, (i64, i64)> {
    let (input, _) = tag("del:").parse(input)?;
    let (input, start) = number(input)?;
    let (input, _) = tag(":").parse(input)?;
    let (input, length) = number(input)?;
    Ok((input, (start, length)))
}

fn nt_deletion(input: &str) -> IResult<&str, ProfileToken> {
    let (input, (position, length)) = deletion_body(input)?;
    Ok((input, ProfileToken::NtDeletion { position, length }))
}

fn nt_substitution(input: &str) -> IResult<&str, ProfileToken> {
    let (input, reference) = letter(input, is_nuc_letter)?;
    let (input, position) = number(input)?;
    let (input, alternate) = take_while1(is_nuc_letter).parse(input)?;
    Ok((
        input,
        ProfileToken::NtSubstitution {
            reference,
            position,
            alternate: alternate.to_string(),
        },
    ))
}

fn aa_deletion(input: &str) -> IResult<&str, ProfileToken> {
    let (input, (position, length)) = deletion_body(input)?;
    Ok((
        input,
        ProfileToken::AaDeletion {
            symbol: String::new(),
            position,
            length,
        },
    ))
}

fn aa_substitution(input: &str) -> IResult<&str, ProfileToken> {
    let (input, reference) = letter(input, is_aa_letter)?;
    let (input, position) = number(input)?;
    let (input, alternate) = take_while1(is_aa_letter).parse(input)?;
    Ok((
        input,
        ProfileToken::AaSubstitution {
            symbol: String::new(),
            reference,
            position,
            alternate: alternate.to_string(),
        },
    ))
}

/// Parse a protein token: a known symbol, a colon, then a deletion or
/// substitution body.
fn aa_token<'a>(input: &'a str, symbols: &HashSet<String>) -> IResult<&'a str, ProfileToken> {
    let (input, symbol) = take_while1(|c| c != ':').parse(input)?;
    if !symbols.contains(symbol) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            ErrorKind::Verify,
        )));
    }
    let (input, _) = tag(":").parse(input)?;
    let (input, mut token) = alt((aa_deletion, aa_substitution)).parse(input)?;
    match &mut token {
        ProfileToken::AaDeletion { symbol: s, .. } | ProfileToken::AaSubstitution { symbol: s, .. } => {
            *s = symbol.to_string();
        }
        _ => unreachable!(),
    }
    Ok((input, token))
}

fn token<'a>(input: &'a str, symbols: &HashSet<String>) -> IResult<&'a str, ProfileToken> {
    if let Ok(parsed) = nt_deletion(input) {
        return Ok(parsed);
    }
    if let Ok(parsed) = nt_substitution(input) {
        return Ok(parsed);
    }
    aa_token(input, symbols)
}

/// Parse one query token against the strict grammar. `symbols` holds the
/// gene symbols of the annotated reference; any other protein prefix is
/// rejected.
pub fn parse_token(input: &str, symbols: &HashSet<String>) -> Result<ProfileToken> {
    match token(input, symbols) {
        Ok(("", parsed)) => Ok(parsed),
        _ => Err(VarbankError::InvalidProfile {
            tokens: vec![input.to_string()],
        }),
    }
}

/// One replay instruction recovered from a stored nucleotide profile token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOp {
    /// Clear the reference positions `start..end` (0-based, half-open).
    Clear { start: i64, end: i64 },
    /// Put `alternate` at the 0-based `position`. Position -1 places an
    /// insertion in front of the first base.
    Set {
        position: i64,
        reference: String,
        alternate: String,
    },
}

/// Parse a stored profile token into its replay instruction.
pub fn parse_replay_token(input: &str) -> Result<ReplayOp> {
    let invalid = || VarbankError::InvalidProfile {
        tokens: vec![input.to_string()],
    };
    if let Some(body) = input.strip_prefix("del:") {
        let (start, length) = body.split_once(':').ok_or_else(invalid)?;
        let start: i64 = start.parse().map_err(|_| invalid())?;
        let length: i64 = length.parse().map_err(|_| invalid())?;
        return Ok(ReplayOp::Clear {
            start: start - 1,
            end: start - 1 + length,
        });
    }
    let digits_start = input
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let digits_end = input[digits_start..]
        .find(|c: char| !c.is_ascii_digit())
        .map(|offset| digits_start + offset)
        .unwrap_or(input.len());
    let alternate = &input[digits_end..];
    if alternate.contains(|c: char| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let position: i64 = input[digits_start..digits_end]
        .parse()
        .map_err(|_| invalid())?;
    Ok(ReplayOp::Set {
        position: position - 1,
        reference: input[..digits_start].to_string(),
        alternate: alternate.to_string(),
    })
}

/// Whether a stored token has the shape of a deletion, with or without a
/// protein prefix.
pub fn is_deletion_shape(token: &str) -> bool {
    let body = if let Some(body) = token.strip_prefix("del:") {
        body
    } else {
        match token
            .split_once(':')
            .and_then(|(_, rest)| rest.strip_prefix("del:"))
        {
            Some(body) => body,
            None => return false,
        }
    };
    matches!(
        body.split_once(':'),
        Some((start, length))
            if !start.is_empty()
                && !length.is_empty()
                && start.bytes().all(|b| b.is_ascii_digit())
                && length.bytes().all(|b| b.is_ascii_digit())
    )
}
