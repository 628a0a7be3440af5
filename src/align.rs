//! Pairwise alignment against the reference genome.
//!
//! Alignment is delegated to an external EMBOSS `stretcher` binary through
//! the [`Aligner`] trait; everything downstream (variant extraction, the
//! import pipeline) only sees the [`Alignment`] pair. The trait makes no
//! promise about gap placement. Before extraction the import pipeline runs
//! [`left_align_gaps`], which pushes every gap as far left as the flanking
//! context allows, so that equivalent alignments always produce identical
//! variant profiles.
//!
//! ```
//! use varbank::align::left_align_gaps;
//!
//! let (query, target) = left_align_gaps("ATT--G", "ATTTTG");
//! assert_eq!(query, "A--TTG");
//! assert_eq!(target, "ATTTTG");
//! ```

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::VarbankError;
use crate::fasta::read_fasta;
use crate::Result;

/// Stretcher gap penalties for viral genome pairs.
const GAP_OPEN: &str = "16";
const GAP_EXTEND: &str = "4";

/// How often a running aligner is checked against its deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// An aligned query/target pair. Both strings have equal length; `-` marks
/// a gap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alignment {
    pub query: String,
    pub target: String,
}

/// Produces a pairwise global alignment from sequences on disk, writing the
/// raw tool output to `out_file`.
pub trait Aligner: Send + Sync {
    /// Align the query against the target. `accession` only feeds error
    /// reporting; `timeout` bounds the external run.
    fn align(
        &self,
        accession: &str,
        query_file: &Path,
        target_file: &Path,
        out_file: &Path,
        timeout: Option<Duration>,
    ) -> Result<Alignment>;
}

/// EMBOSS `stretcher` wrapper.
#[derive(Debug, Clone)]
pub struct StretcherAligner {
    binary: PathBuf,
}

impl StretcherAligner {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        StretcherAligner {
            binary: binary.into(),
        }
    }
}

impl Default for StretcherAligner {
    fn default() -> Self {
        StretcherAligner::new("stretcher")
    }
}

impl Aligner for StretcherAligner {
    fn align(
        &self,
        accession: &str,
        query_file: &Path,
        target_file: &Path,
        out_file: &Path,
        timeout: Option<Duration>,
    ) -> Result<Alignment> {
        let mut command = Command::new(&self.binary);
        command
            .arg("-asequence")
            .arg(query_file)
            .arg("-bsequence")
            .arg(target_file)
            .args(["-gapopen", GAP_OPEN, "-gapextend", GAP_EXTEND])
            .arg("-outfile")
            .arg(out_file)
            .args(["-aformat", "fasta", "-auto"])
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let mut child = command.spawn().map_err(|e| VarbankError::AlignerFailed {
            msg: format!("could not run '{}': {}", self.binary.display(), e),
        })?;

        let status = match timeout {
            Some(limit) => {
                let deadline = Instant::now() + limit;
                loop {
                    if let Some(status) = child.try_wait()? {
                        break status;
                    }
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(VarbankError::Timeout {
                            accession: accession.to_string(),
                            seconds: limit.as_secs(),
                        });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
            None => child.wait()?,
        };

        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            return Err(VarbankError::AlignerFailed {
                msg: format!(
                    "'{}' exited with {} ({})",
                    self.binary.display(),
                    status,
                    stderr.trim()
                ),
            });
        }

        read_alignment_output(out_file)
    }
}

/// Read the aligned pair back from a fasta-format aligner output file.
/// Stretcher emits the query record first, then the target, in lowercase.
fn read_alignment_output(path: &Path) -> Result<Alignment> {
    let records = read_fasta(path)?;
    if records.len() != 2 {
        return Err(VarbankError::AlignerFailed {
            msg: format!(
                "aligner output {} contained {} records, expected 2",
                path.display(),
                records.len()
            ),
        });
    }
    Ok(Alignment {
        query: records[0].sequence.to_uppercase(),
        target: records[1].sequence.to_uppercase(),
    })
}

/// Shift every gap run as far left as its context allows, first in the
/// query, then in the target against the updated query. A gap that reaches
/// the final alignment column stays put.
pub fn left_align_gaps(query: &str, target: &str) -> (String, String) {
    let mut query = query.as_bytes().to_vec();
    let mut target = target.as_bytes().to_vec();
    shift_gaps(&mut query, &target);
    let frozen = query.clone();
    shift_gaps(&mut target, &frozen);
    (
        String::from_utf8_lossy(&query).into_owned(),
        String::from_utf8_lossy(&target).into_owned(),
    )
}

fn shift_gaps(moving: &mut [u8], other: &[u8]) {
    let last = moving.len().saturating_sub(1);
    for (run_start, run_end) in gap_runs(moving) {
        // a gap shifts left while the base hopping over it matches the
        // other sequence at the landing column
        let mut s = run_start as i64 - 1;
        let mut e = run_end as i64 - 1;
        while s >= 0 && (e as usize) < last && moving[s as usize] == other[e as usize] {
            moving[e as usize] = moving[s as usize];
            moving[s as usize] = b'-';
            s -= 1;
            e -= 1;
        }
    }
}

/// Gap runs as `(start, end)` half-open byte ranges.
fn gap_runs(seq: &[u8]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut i = 0;
    while i < seq.len() {
        if seq[i] == b'-' {
            let start = i;
            while i < seq.len() && seq[i] == b'-' {
                i += 1;
            }
            runs.push((start, i));
        } else {
            i += 1;
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_gap_runs() {
        assert_eq!(gap_runs(b"AC--G-T"), vec![(2, 4), (5, 6)]);
        assert_eq!(gap_runs(b"ACGT"), vec![]);
        assert_eq!(gap_runs(b"--AC"), vec![(0, 2)]);
    }

    #[test]
    fn test_left_align_shifts_through_repeat() {
        let (q, t) = left_align_gaps("ATT--G", "ATTTTG");
        assert_eq!(q, "A--TTG");
        assert_eq!(t, "ATTTTG");
    }

    #[test]
    fn test_left_align_stops_at_mismatch() {
        let (q, t) = left_align_gaps("AC-GT", "ACGGT");
        assert_eq!(q, "AC-GT");
        assert_eq!(t, "ACGGT");
    }

    #[test]
    fn test_left_align_terminal_gap_stays() {
        let (q, t) = left_align_gaps("ATT--", "ATTTT");
        assert_eq!(q, "ATT--");
        assert_eq!(t, "ATTTT");
    }

    #[test]
    fn test_left_align_target_gaps_shift_too() {
        let (q, t) = left_align_gaps("ATTTTG", "ATT--G");
        assert_eq!(q, "ATTTTG");
        assert_eq!(t, "A--TTG");
    }

    #[test]
    fn test_left_align_no_gaps() {
        let (q, t) = left_align_gaps("ACGT", "AGGT");
        assert_eq!(q, "ACGT");
        assert_eq!(t, "AGGT");
    }

    #[test]
    fn test_read_alignment_output_uppercases_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pair.algn");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, ">sample1").unwrap();
        writeln!(f, "acg-t").unwrap();
        writeln!(f, ">reference").unwrap();
        writeln!(f, "acggt").unwrap();
        drop(f);

        let alignment = read_alignment_output(&path).unwrap();
        assert_eq!(alignment.query, "ACG-T");
        assert_eq!(alignment.target, "ACGGT");
    }

    #[test]
    fn test_read_alignment_output_rejects_wrong_record_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("single.algn");
        std::fs::write(&path, ">only\nacgt\n").unwrap();
        let err = read_alignment_output(&path).unwrap_err();
        assert!(err.to_string().contains("expected 2"));
    }

    #[test]
    fn test_missing_binary_reports_aligner_failure() {
        let dir = tempfile::tempdir().unwrap();
        let q = dir.path().join("q.fasta");
        let t = dir.path().join("t.fasta");
        let o = dir.path().join("o.algn");
        std::fs::write(&q, ">q\nACGT\n").unwrap();
        std::fs::write(&t, ">t\nACGT\n").unwrap();

        let aligner = StretcherAligner::new("/nonexistent/stretcher-binary");
        let err = aligner.align("acc1", &q, &t, &o, None).unwrap_err();
        assert!(matches!(err, VarbankError::AlignerFailed { .. }));
    }
}
