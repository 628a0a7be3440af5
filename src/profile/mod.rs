//! Variant profiles: the space-separated token strings that describe a
//! genome's differences from the reference.
//!
//! A nucleotide profile lists substitutions (`C3267T`), insertions carrying
//! their anchor base (`G100GAT`, or `0TT` in front of the first base) and
//! merged deletions (`del:11288:9`, 1-based start plus length). Amino acid
//! profiles use the same shapes behind a gene symbol prefix (`S:N501Y`,
//! `S:del:68:3`). Profiles are the unit of storage and matching; they can be
//! replayed against the reference to restore the original sequence.
//!
//! ```
//! use varbank::extractor::Variant;
//! use varbank::profile::compile_profile;
//!
//! // nine adjacent single-base deletions collapse into one token
//! let dels: Vec<Variant> = (11287i64..11296)
//!     .map(|pos| Variant::nucleotide("A", "", pos, Some(pos + 1)))
//!     .collect();
//! assert_eq!(compile_profile(&dels), "del:11288:9");
//! ```

mod iupac;
mod parser;
mod token;

pub use iupac::{
    ambiguous_letters, code_table, explicit_letters, filter_ambiguous, pinpoint_mutation, CodeTable,
};
pub use parser::{is_deletion_shape, parse_replay_token, parse_token, ReplayOp};
pub use token::{ProfileToken, TokenKind};

use crate::annotation::{AnnotationModel, Strand};
use crate::error::VarbankError;
use crate::extractor::Variant;
use crate::Result;

/// Render one variant as its profile token.
///
/// Deletions become `del:START:LEN` with a 1-based start; everything else is
/// `REF POS ALT` with a 1-based position. Protein variants get their symbol
/// prefix. An insertion in front of the first base has no reference letter
/// and renders with position 0.
pub fn format_variant(var: &Variant) -> String {
    let prefix = match &var.symbol {
        Some(symbol) => format!("{}:", symbol),
        None => String::new(),
    };
    match var.end {
        Some(end) => format!("{}del:{}:{}", prefix, var.start + 1, end - var.start),
        None => format!(
            "{}{}{}{}",
            prefix,
            var.reference,
            var.start + 1,
            var.alternate
        ),
    }
}

/// Compile variant records into a profile string.
///
/// Variants are ordered by locus, symbol and start; adjacent deletions on the
/// same locus are merged into one token; duplicate tokens are dropped. The
/// result is deterministic for a given variant set.
pub fn compile_profile(vars: &[Variant]) -> String {
    if vars.is_empty() {
        return String::new();
    }
    let mut vars: Vec<Variant> = vars.to_vec();
    let mut profile: Vec<String> = Vec::new();
    if vars.len() > 1 {
        vars.sort_by(|a, b| {
            (&a.locus, &a.symbol, a.start).cmp(&(&b.locus, &b.symbol, b.start))
        });
        for l in 0..vars.len() - 1 {
            let this = vars[l].clone();
            if !this.alternate.is_empty() {
                push_unique(&mut profile, format_variant(&this));
            } else if merges_into_next(&this, &vars[l + 1]) {
                let next_start = vars[l + 1].start;
                let joined_ref = format!("{}{}", this.reference, vars[l + 1].reference);
                vars[l + 1] = Variant {
                    symbol: this.symbol,
                    locus: this.locus,
                    start: this.start,
                    end: Some(next_start + 1),
                    reference: joined_ref,
                    alternate: String::new(),
                };
            } else {
                push_unique(&mut profile, format_variant(&close_deletion(this)));
            }
        }
    }
    let last = close_deletion(vars[vars.len() - 1].clone());
    push_unique(&mut profile, format_variant(&last));
    profile.join(" ")
}

/// Both are deletions, directly adjacent, on the same locus.
fn merges_into_next(this: &Variant, next: &Variant) -> bool {
    next.alternate.is_empty()
        && this.start + this.reference.len() as i64 == next.start
        && this.symbol == next.symbol
        && this.locus == next.locus
}

/// Fill in the end coordinate of a deletion that has none yet.
fn close_deletion(mut var: Variant) -> Variant {
    if var.alternate.is_empty() && var.end.is_none() {
        var.end = Some(var.start + var.reference.len() as i64);
    }
    var
}

fn push_unique(profile: &mut Vec<String>, token: String) {
    if !profile.contains(&token) {
        profile.push(token);
    }
}

/// Scan a nucleotide profile for tokens that shift the reading frame of an
/// annotated CDS: deletions whose overlap with a CDS is not a multiple of
/// three, and in-CDS insertions adding a non-multiple of three.
pub fn frameshift_tokens(
    dna_profile: &str,
    annotation: &AnnotationModel,
) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    for token in dna_profile.split(' ').filter(|t| !t.is_empty()) {
        match parse_replay_token(token)? {
            ReplayOp::Clear { start, end } => {
                for cds in annotation.cds() {
                    if cds.strand() == Strand::Minus {
                        return Err(VarbankError::annotation(format!(
                            "frameshift scan does not support minus strand CDS {}",
                            cds.symbol()
                        )));
                    }
                    let overlap = end.min(cds.end()) - start.max(cds.start());
                    if overlap > 0 && overlap % 3 != 0 {
                        tokens.push(token.to_string());
                        break;
                    }
                }
            }
            ReplayOp::Set {
                position,
                reference,
                alternate,
            } => {
                if position >= 0
                    && annotation.is_within_cds(position, None)
                    && alternate.len() > reference.len()
                    && (alternate.len() - reference.len()) % 3 != 0
                {
                    tokens.push(token.to_string());
                }
            }
        }
    }
    Ok(tokens)
}
