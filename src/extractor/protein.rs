//! Amino acid variant calling per annotated CDS.

use crate::annotation::{AnnotationModel, Cds, Strand};
use crate::error::VarbankError;
use crate::sequence::reverse_complement;
use crate::Result;

use super::Variant;

/// Call amino acid variants for every CDS of the annotation.
///
/// The exon ranges of each CDS are projected into alignment space and the
/// projected slices concatenated; minus-strand CDS are reverse-complemented
/// so the scan always runs 5' to 3' in coding orientation. The target slice
/// is then read codon by codon, each codon taking along the insertion
/// columns opened after any of its bases. A gap in the query part of a codon
/// is reported as deletion of the reference residue; otherwise both codons
/// are translated and compared, with in-codon insertions surfacing as
/// multi-residue alternate alleles.
pub fn amino_acid_diffs(
    target: &str,
    query: &str,
    annotation: &AnnotationModel,
) -> Result<Vec<Variant>> {
    if target.len() != query.len() {
        return Err(VarbankError::alignment(format!(
            "aligned sequences differ in length ({} vs {})",
            target.len(),
            query.len()
        )));
    }
    // alignment column of each reference base
    let map: Vec<usize> = target
        .bytes()
        .enumerate()
        .filter(|&(_, c)| c != b'-')
        .map(|(col, _)| col)
        .collect();

    let mut vars = Vec::new();
    for cds in annotation.cds() {
        let mut t_cds = String::new();
        let mut q_cds = String::new();
        for &(s, e) in cds.ranges() {
            let (s, e) = (s as usize, e as usize);
            if e > map.len() {
                return Err(VarbankError::alignment(format!(
                    "aligned reference is shorter than annotated CDS {} ({} < {})",
                    cds.locus(),
                    map.len(),
                    e
                )));
            }
            let col_start = map[s];
            // the projected end reaches through insertion columns opened
            // after the last exon base
            let col_end = map.get(e).copied().unwrap_or(target.len());
            t_cds.push_str(&target[col_start..col_end]);
            q_cds.push_str(&query[col_start..col_end]);
        }
        if cds.strand() == Strand::Minus {
            t_cds = reverse_complement(&t_cds);
            q_cds = reverse_complement(&q_cds);
        }
        scan_codons(t_cds.as_bytes(), q_cds.as_bytes(), cds, &mut vars);
    }
    Ok(vars)
}

fn scan_codons(t_cds: &[u8], q_cds: &[u8], cds: &Cds, out: &mut Vec<Variant>) {
    let table = cds.translation_table();
    let n = t_cds.len();
    let mut col = 0;
    let mut prot_pos: i64 = 0;
    while col < n {
        let token_start = col;
        let mut bases = 0;
        while col < n && bases < 3 {
            if t_cds[col] != b'-' {
                bases += 1;
                col += 1;
                while col < n && t_cds[col] == b'-' {
                    col += 1;
                }
            } else {
                col += 1;
            }
        }
        if bases < 3 {
            break;
        }
        let t_token = &t_cds[token_start..col];
        let q_token = &q_cds[token_start..col];
        let t_codon: String = t_token
            .iter()
            .filter(|&&c| c != b'-')
            .map(|&c| c as char)
            .collect();
        let taa = table.translate(&t_codon);
        if q_token.contains(&b'-') {
            out.push(Variant::protein(
                cds.symbol(),
                cds.locus(),
                taa,
                "",
                prot_pos,
                Some(prot_pos + 1),
            ));
        } else {
            let q_codon: String = q_token.iter().map(|&c| c as char).collect();
            let qaa = table.translate(&q_codon);
            if !qaa.is_empty() && qaa != taa {
                out.push(Variant::protein(
                    cds.symbol(),
                    cds.locus(),
                    taa,
                    qaa,
                    prot_pos,
                    None,
                ));
            }
        }
        prot_pos += 1;
    }
}
