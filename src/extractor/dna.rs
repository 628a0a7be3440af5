//! Nucleotide-level variant calling from a gapped alignment.

use crate::error::VarbankError;
use crate::Result;

use super::Variant;

/// Walk an aligned reference (`target`) and sample (`query`) and report every
/// nucleotide difference.
///
/// Both strings must have equal length and use `-` for gaps. A gap run in the
/// target is an insertion; it is reported together with the preceding
/// reference base as anchor, so the alternate allele always starts with that
/// base. A gap run before the first reference base has no anchor and is
/// reported with `start == -1`. Gaps in the query become single-base deletion
/// records; adjacent ones are merged later during profile compilation.
pub fn nucleotide_diffs(target: &str, query: &str) -> Result<Vec<Variant>> {
    if target.len() != query.len() {
        return Err(VarbankError::alignment(format!(
            "aligned sequences differ in length ({} vs {})",
            target.len(),
            query.len()
        )));
    }
    let t = target.as_bytes();
    let q = query.as_bytes();
    let n = t.len();
    let mut vars = Vec::new();

    let mut i = 0;
    if n > 0 && t[0] == b'-' {
        while i < n && t[i] == b'-' {
            i += 1;
        }
        let alt = residues(&q[..i]);
        if !alt.is_empty() {
            vars.push(Variant::nucleotide("", alt, -1, None));
        }
    }

    // 0-based reference position of the current target base
    let mut ref_pos: i64 = -1;
    while i < n {
        if t[i] == b'-' {
            // gap runs are consumed together with their anchor below
            i += 1;
            continue;
        }
        ref_pos += 1;
        if i + 1 < n && t[i + 1] == b'-' {
            let mut j = i + 1;
            while j < n && t[j] == b'-' {
                j += 1;
            }
            // anchor base plus inserted residues; a mismatching anchor is
            // folded into the alternate allele
            vars.push(Variant::nucleotide(
                (t[i] as char).to_string(),
                residues(&q[i..j]),
                ref_pos,
                None,
            ));
            i = j;
            continue;
        }
        if t[i] != q[i] {
            if q[i] == b'-' {
                vars.push(Variant::nucleotide(
                    (t[i] as char).to_string(),
                    "",
                    ref_pos,
                    Some(ref_pos + 1),
                ));
            } else {
                vars.push(Variant::nucleotide(
                    (t[i] as char).to_string(),
                    (q[i] as char).to_string(),
                    ref_pos,
                    None,
                ));
            }
        }
        i += 1;
    }
    Ok(vars)
}

fn residues(aligned: &[u8]) -> String {
    aligned
        .iter()
        .filter(|&&c| c != b'-')
        .map(|&c| c as char)
        .collect()
}
