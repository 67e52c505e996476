//! Text format for HMMs.
//!
//! ```text
//! TRANSITION_MATRIX:
//!   0.9 0.1
//!   0.2 0.8
//! EQUILIBRIUM_FREQUENCIES:
//!   0.6666666666666666 0.3333333333333333
//! BEGIN_TRANSITIONS:
//!   1 0
//! END_TRANSITIONS:
//!   1 1
//! ```
//!
//! Each tag is followed by whitespace-separated numbers: `n * n` for the
//! transition matrix, `n` for the others. Only the transition matrix is
//! required.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use phylohmm_core::{PhyloHmmError, Result};

use crate::hmm::{check_sum, Hmm};

pub const TRANSITION_MATRIX_TAG: &str = "TRANSITION_MATRIX:";
pub const EQ_FREQS_TAG: &str = "EQUILIBRIUM_FREQUENCIES:";
pub const BEGIN_TRANSITIONS_TAG: &str = "BEGIN_TRANSITIONS:";
pub const END_TRANSITIONS_TAG: &str = "END_TRANSITIONS:";

fn write_row<W: Write>(out: &mut W, values: &[f64]) -> Result<()> {
    let row: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    writeln!(out, "  {}", row.join(" "))?;
    Ok(())
}

/// Write `hmm` in the text format. Numbers are written in their shortest
/// exact form.
pub fn write_hmm<W: Write>(hmm: &Hmm, out: &mut W) -> Result<()> {
    let n = hmm.nstates();
    writeln!(out, "{TRANSITION_MATRIX_TAG}")?;
    for row in hmm.transitions().chunks(n) {
        write_row(out, row)?;
    }
    writeln!(out, "{EQ_FREQS_TAG}")?;
    write_row(out, hmm.eq_freqs())?;
    writeln!(out, "{BEGIN_TRANSITIONS_TAG}")?;
    write_row(out, hmm.begin_transitions())?;
    if let Some(end) = hmm.end_transitions() {
        writeln!(out, "{END_TRANSITIONS_TAG}")?;
        write_row(out, end)?;
    }
    Ok(())
}

/// Write an HMM to a file.
pub fn write_hmm_file(hmm: &Hmm, path: impl AsRef<Path>) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write_hmm(hmm, &mut out)?;
    out.flush()?;
    Ok(())
}

/// Read an HMM.
///
/// # Errors
///
/// [`PhyloHmmError::Parse`] for unknown tags, malformed numbers, a
/// missing or non-square transition matrix, a vector of the wrong length,
/// or a transition row that does not sum to 1 within 1e-6.
pub fn read_hmm<R: BufRead>(reader: R) -> Result<Hmm> {
    let mut sections: Vec<(String, Vec<f64>)> = Vec::new();
    for line in reader.lines() {
        let line = line?;
        for tok in line.split_whitespace() {
            if tok.ends_with(':') {
                match tok {
                    TRANSITION_MATRIX_TAG | EQ_FREQS_TAG | BEGIN_TRANSITIONS_TAG
                    | END_TRANSITIONS_TAG => sections.push((tok.to_string(), Vec::new())),
                    _ => return Err(PhyloHmmError::Parse(format!("unrecognized tag '{tok}'"))),
                }
                continue;
            }
            let value: f64 = tok
                .parse()
                .map_err(|_| PhyloHmmError::Parse(format!("bad number '{tok}' in HMM file")))?;
            let (_, values) = sections.last_mut().ok_or_else(|| {
                PhyloHmmError::Parse(format!("number '{tok}' before any HMM section tag"))
            })?;
            values.push(value);
        }
    }

    let mut take = |tag: &str| {
        sections
            .iter()
            .position(|(t, _)| t == tag)
            .map(|i| sections.swap_remove(i).1)
    };
    let trans = take(TRANSITION_MATRIX_TAG)
        .ok_or_else(|| PhyloHmmError::Parse(format!("HMM file has no {TRANSITION_MATRIX_TAG}")))?;
    let eq = take(EQ_FREQS_TAG);
    let begin = take(BEGIN_TRANSITIONS_TAG);
    let end = take(END_TRANSITIONS_TAG);

    let n = (trans.len() as f64).sqrt().round() as usize;
    if n == 0 || n * n != trans.len() {
        return Err(PhyloHmmError::Parse(format!(
            "transition matrix has {} entries, not a square count",
            trans.len()
        )));
    }
    for (tag, v) in [(EQ_FREQS_TAG, &eq), (BEGIN_TRANSITIONS_TAG, &begin), (END_TRANSITIONS_TAG, &end)] {
        if let Some(v) = v {
            if v.len() != n {
                return Err(PhyloHmmError::Parse(format!(
                    "{tag} has {} entries, expected {n}",
                    v.len()
                )));
            }
        }
    }
    for (i, row) in trans.chunks(n).enumerate() {
        check_sum(&format!("transition row {i}"), row)
            .map_err(|e| PhyloHmmError::Parse(e.to_string()))?;
    }
    Hmm::new(n, trans, eq, begin, end)
}

/// Read an HMM from a file.
pub fn read_hmm_file(path: impl AsRef<Path>) -> Result<Hmm> {
    read_hmm(BufReader::new(File::open(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_through_file() {
        let hmm = Hmm::new(
            3,
            vec![0.7, 0.2, 0.1, 0.3, 0.6, 0.1, 0.5, 0.0, 0.5],
            None,
            Some(vec![0.2, 0.3, 0.5]),
            Some(vec![0.1, 0.0, 1.0]),
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.hmm");
        write_hmm_file(&hmm, &path).unwrap();
        let back = read_hmm_file(&path).unwrap();
        assert_eq!(back, hmm);
    }

    #[test]
    fn minimal_file_and_layout() {
        let text = "TRANSITION_MATRIX:\n 0.9 0.1\n 0.2 0.8\nBEGIN_TRANSITIONS: 1 0\n";
        let hmm = read_hmm(text.as_bytes()).unwrap();
        assert_eq!(hmm.nstates(), 2);
        assert_eq!(hmm.begin_transitions(), &[1.0, 0.0]);
        assert!(hmm.end_transitions().is_none());

        let mut buf = Vec::new();
        write_hmm(&hmm, &mut buf).unwrap();
        let written = String::from_utf8(buf).unwrap();
        assert!(written.starts_with("TRANSITION_MATRIX:\n  0.9 0.1\n  0.2 0.8\n"));
        assert!(written.contains("BEGIN_TRANSITIONS:\n  1 0\n"));
        assert!(!written.contains(END_TRANSITIONS_TAG));
    }

    #[test]
    fn malformed_files_are_rejected() {
        let bad = [
            "BEGIN_TRANSITIONS: 1\n",
            "TRANSITION_MATRIX: 0.5 0.5 0.5\n",
            "TRANSITION_MATRIX: 0.5 0.4 0.5 0.5\n",
            "TRANSITION_MATRIX: 1\nEND_TRANSITIONS: 1 1\n",
            "TRANSITION_MATRIX: 1 x\n",
            "0.5 TRANSITION_MATRIX: 1\n",
            "EMISSIONS: 1\n",
        ];
        for text in bad {
            assert!(
                matches!(read_hmm(text.as_bytes()), Err(PhyloHmmError::Parse(_))),
                "accepted {text:?}"
            );
        }
    }
}
