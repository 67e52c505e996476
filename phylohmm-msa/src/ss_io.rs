//! Text format for sufficient statistics.
//!
//! ```text
//! NSEQS = 2
//! LENGTH = 6
//! TUPLE_SIZE = 1
//! NTUPLES = 3
//! NAMES = human,mouse
//! ALPHABET = ACGT
//! NCATS = -1
//!
//! 0	AA	3
//! 1	AC	2
//! 2	GT	1
//!
//! TUPLE_IDX_ORDER:
//! 0
//! 1
//! ...
//! ```
//!
//! Header lines may come in any order; the header ends at the first line
//! that is not `KEY = VALUE`. Counts are real-valued and written in their
//! shortest exact form, so weighted counts survive a round trip. Tuple lines carry the index, the
//! tuple with one space between columns, the count and, when `NCATS > 0`,
//! `NCATS + 1` category counts. An ignored order slot is written as `-1`.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use phylohmm_core::{PhyloHmmError, Result};

use crate::alignment::Alignment;
use crate::alphabet::Alphabet;
use crate::suff_stats::{char_index, tuple_to_string_pretty, SufficientStats};

/// Write the statistics of `msa`, with the order vector when
/// `show_order` is set and the statistics are ordered.
///
/// # Errors
///
/// Returns an error if the alignment has no statistics or writing fails.
pub fn write_ss<W: Write>(msa: &Alignment, out: &mut W, show_order: bool) -> Result<()> {
    let ss = msa
        .ss
        .as_ref()
        .ok_or_else(|| PhyloHmmError::Precondition("alignment has no statistics".into()))?;
    let nseqs = msa.nseqs();

    writeln!(out, "NSEQS = {nseqs}")?;
    writeln!(out, "LENGTH = {}", msa.length)?;
    writeln!(out, "TUPLE_SIZE = {}", ss.tuple_size)?;
    writeln!(out, "NTUPLES = {}", ss.ntuples())?;
    writeln!(out, "NAMES = {}", msa.names.join(","))?;
    writeln!(out, "ALPHABET = {}", msa.alphabet)?;
    if msa.idx_offset != 0 {
        writeln!(out, "IDX_OFFSET = {}", msa.idx_offset)?;
    }
    let ncats = msa.ncats.map_or(-1, |n| n as i64);
    writeln!(out, "NCATS = {ncats}\n")?;

    for i in 0..ss.ntuples() {
        write!(
            out,
            "{}\t{}\t{}",
            i,
            tuple_to_string_pretty(&ss.col_tuples[i], nseqs),
            ss.counts[i]
        )?;
        if let (true, Some(cc)) = (ncats > 0, ss.cat_counts.as_ref()) {
            for row in cc {
                write!(out, "\t{}", row[i])?;
            }
        }
        writeln!(out)?;
    }

    if let (true, Some(order)) = (show_order, ss.tuple_idx.as_ref()) {
        writeln!(out, "\nTUPLE_IDX_ORDER:")?;
        for slot in order.iter().take(msa.length) {
            match slot {
                Some(t) => writeln!(out, "{t}")?,
                None => writeln!(out, "-1")?,
            }
        }
    }
    Ok(())
}

/// Write statistics to a file.
pub fn write_ss_file(msa: &Alignment, path: impl AsRef<Path>, show_order: bool) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write_ss(msa, &mut out, show_order)?;
    out.flush()?;
    Ok(())
}

#[derive(Default)]
struct Header {
    nseqs: Option<usize>,
    length: Option<usize>,
    tuple_size: Option<usize>,
    ntuples: Option<usize>,
    names: Option<Vec<String>>,
    alphabet: Option<Alphabet>,
    ncats: Option<i64>,
    idx_offset: i64,
}

impl Header {
    fn complete(&self) -> bool {
        self.nseqs.is_some_and(|n| n > 0)
            && self.length.is_some()
            && self.tuple_size.is_some_and(|t| t > 0)
            && self.ntuples.is_some_and(|n| n > 0)
            && self.names.is_some()
            && self.alphabet.is_some()
            && self.ncats.is_some()
    }

    fn apply(&mut self, line: &str) -> Result<()> {
        let unrecognized = || {
            PhyloHmmError::Parse(format!(
                "unrecognized line in sufficient statistics header: '{line}'"
            ))
        };
        let (key, value) = line.split_once('=').ok_or_else(unrecognized)?;
        let value = value.trim();
        match key.trim() {
            "NSEQS" => self.nseqs = Some(parse_num(value, line)?),
            "LENGTH" => self.length = Some(parse_num(value, line)?),
            "TUPLE_SIZE" => self.tuple_size = Some(parse_num(value, line)?),
            "NTUPLES" => self.ntuples = Some(parse_num(value, line)?),
            "NCATS" => self.ncats = Some(parse_num::<i64>(value, line)?.max(-1)),
            "IDX_OFFSET" => self.idx_offset = parse_num::<i64>(value, line)?.max(-1),
            "ALPHABET" => {
                self.alphabet = Some(
                    Alphabet::new(value).map_err(|e| PhyloHmmError::Parse(e.to_string()))?,
                )
            }
            "NAMES" => {
                self.names = Some(
                    value
                        .split([',', ' '])
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect(),
                )
            }
            _ => return Err(unrecognized()),
        }
        Ok(())
    }
}

fn parse_num<T: std::str::FromStr>(value: &str, line: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| PhyloHmmError::Parse(format!("bad number in line '{line}'")))
}

/// Read an alignment represented by its sufficient statistics.
///
/// # Errors
///
/// [`PhyloHmmError::Parse`] for an unrecognized or incomplete header, a
/// tuple index out of range, a column whose length differs from `NSEQS`,
/// a bad count, or a short or malformed `TUPLE_IDX_ORDER` list.
pub fn read_ss<R: BufRead>(reader: R) -> Result<Alignment> {
    let mut header = Header::default();
    let mut msa: Option<Alignment> = None;
    let mut defined: Vec<bool> = Vec::new();
    let mut lines = reader.lines();

    while let Some(line) = lines.next() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if msa.is_none() {
            // the header runs until the first line that is not `KEY = VALUE`
            if line.contains('=') || !header.complete() {
                header.apply(line)?;
                continue;
            }
            let built = build_empty(&mut header)?;
            defined = vec![false; built.ss.as_ref().map_or(0, |s| s.ntuples())];
            msa = Some(built);
        }
        let Some(aln) = msa.as_mut() else { continue };

        if line.starts_with("TUPLE_IDX_ORDER:") {
            read_order(aln, &mut lines)?;
        } else {
            read_tuple_line(aln, line, &mut defined)?;
        }
    }

    let msa = msa.ok_or_else(|| {
        PhyloHmmError::Parse("sufficient statistics header is missing required fields".into())
    })?;
    if let Some(i) = defined.iter().position(|&d| !d) {
        return Err(PhyloHmmError::Parse(format!("no line for tuple {i}")));
    }
    Ok(msa)
}

/// Read statistics from a file.
pub fn read_ss_file(path: impl AsRef<Path>) -> Result<Alignment> {
    read_ss(BufReader::new(File::open(path)?))
}

fn build_empty(header: &mut Header) -> Result<Alignment> {
    let nseqs = header.nseqs.unwrap_or(0);
    let names = header.names.take().unwrap_or_default();
    if names.len() != nseqs {
        return Err(PhyloHmmError::Parse(format!(
            "NAMES lists {} sequences but NSEQS = {}",
            names.len(),
            nseqs
        )));
    }
    let length = header.length.unwrap_or(0);
    let tuple_size = header.tuple_size.unwrap_or(1);
    let ntuples = header.ntuples.unwrap_or(0);
    let ncats = header.ncats.unwrap_or(-1);
    let alphabet = header.alphabet.take().unwrap_or_default();

    let mut msa = Alignment::empty(names, alphabet, length);
    msa.ncats = (ncats >= 0).then_some(ncats as usize);
    msa.idx_offset = header.idx_offset;
    let cats = (ncats > 0).then_some(ncats as usize);
    let mut ss = SufficientStats::new(tuple_size, ntuples, length, cats, false);
    for _ in 0..ntuples {
        ss.push_tuple(vec![b'-'; nseqs * tuple_size]);
    }
    msa.ss = Some(ss);
    Ok(msa)
}

fn read_tuple_line(msa: &mut Alignment, line: &str, defined: &mut [bool]) -> Result<()> {
    let nseqs = msa.nseqs();
    let ncats = msa.ncats.unwrap_or(0);
    let ss = msa
        .ss
        .as_mut()
        .ok_or_else(|| PhyloHmmError::Parse("tuple line before header".into()))?;
    let t = ss.tuple_size;
    let fields: Vec<&str> = line.split_whitespace().collect();
    let expected = 2 + t + if ncats > 0 && ss.cat_counts.is_some() { ncats + 1 } else { 0 };
    if fields.len() < expected {
        return Err(PhyloHmmError::Parse(format!(
            "tuple line has {} fields, expected {}: '{line}'",
            fields.len(),
            expected
        )));
    }

    let idx: usize = fields[0]
        .parse()
        .ok()
        .filter(|&i| i < ss.ntuples())
        .ok_or_else(|| {
            PhyloHmmError::Parse(format!("tuple line has index out of bounds: '{line}'"))
        })?;

    for k in 0..t {
        let col = fields[1 + k].as_bytes();
        if col.len() != nseqs {
            return Err(PhyloHmmError::Parse(format!(
                "length of column tuple does not match NSEQS: '{line}'"
            )));
        }
        let offset = k as i64 - (t as i64 - 1);
        for (j, &c) in col.iter().enumerate() {
            ss.col_tuples[idx][char_index(nseqs, t, j, offset)] = c;
        }
    }

    ss.counts[idx] = parse_num(fields[1 + t], line)?;
    if let Some(cc) = ss.cat_counts.as_mut() {
        for (c, row) in cc.iter_mut().enumerate() {
            row[idx] = parse_num(fields[2 + t + c], line)?;
        }
    }
    defined[idx] = true;
    Ok(())
}

fn read_order<I>(msa: &mut Alignment, lines: &mut I) -> Result<()>
where
    I: Iterator<Item = std::io::Result<String>>,
{
    let length = msa.length;
    let ss = msa
        .ss
        .as_mut()
        .ok_or_else(|| PhyloHmmError::Parse("order list before header".into()))?;
    let ntuples = ss.ntuples() as i64;
    let mut order = Vec::with_capacity(length);
    while order.len() < length {
        let Some(line) = lines.next() else { break };
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let v: i64 = line.parse().map_err(|_| {
            PhyloHmmError::Parse(format!("bad integer in TUPLE_IDX_ORDER list: '{line}'"))
        })?;
        order.push(match v {
            -1 => None,
            v if (0..ntuples).contains(&v) => Some(v as usize),
            _ => {
                return Err(PhyloHmmError::Parse(format!(
                    "TUPLE_IDX_ORDER entry {v} outside 0..{ntuples}"
                )))
            }
        });
    }
    if order.len() < length {
        return Err(PhyloHmmError::Parse(
            "too few numbers in TUPLE_IDX_ORDER list".into(),
        ));
    }
    ss.tuple_idx = Some(order);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn written(msa: &Alignment, order: bool) -> String {
        let mut buf = Vec::new();
        write_ss(msa, &mut buf, order).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn write_layout() {
        let mut msa =
            Alignment::from_strs(&["s1", "s2"], &["AAAGAA", "ACATCA"], Alphabet::dna()).unwrap();
        msa.build_suff_stats(1, true).unwrap();
        let text = written(&msa, true);
        let expect = "NSEQS = 2\nLENGTH = 6\nTUPLE_SIZE = 1\nNTUPLES = 3\nNAMES = s1,s2\n\
                      ALPHABET = ACGT\nNCATS = -1\n\n0\tAA\t3\n1\tAC\t2\n2\tGT\t1\n\
                      \nTUPLE_IDX_ORDER:\n0\n1\n0\n2\n1\n0\n";
        assert_eq!(text, expect);
    }

    #[test]
    fn round_trip_with_categories_and_order() {
        let mut msa = Alignment::from_strs(&["a", "b", "c"], &["ACGTAC", "ACGTTC", "AG-TAC"], Alphabet::dna())
            .unwrap()
            .with_categories(vec![0, 1, 2, 0, 1, 2], 2)
            .unwrap();
        msa.build_suff_stats(2, true).unwrap();
        msa.seqs = None;
        msa.categories = None;
        msa.idx_offset = 100;
        let text = written(&msa, true);
        let back = read_ss(text.as_bytes()).unwrap();
        assert_eq!(back.ss, msa.ss);
        assert_eq!(back.names, msa.names);
        assert_eq!(back.ncats, Some(2));
        assert_eq!(back.idx_offset, 100);
        assert_eq!(written(&back, true), text);
    }

    #[test]
    fn round_trip_through_file() {
        let mut msa = Alignment::from_strs(&["x", "y"], &["ACGT", "AGGT"], Alphabet::dna()).unwrap();
        msa.build_suff_stats(1, false).unwrap();
        let file = NamedTempFile::new().unwrap();
        write_ss_file(&msa, file.path(), false).unwrap();
        let back = read_ss_file(file.path()).unwrap();
        assert_eq!(back.ss.as_ref().unwrap().counts, msa.ss.as_ref().unwrap().counts);
        assert!(back.ss.as_ref().unwrap().tuple_idx.is_none());
    }

    #[test]
    fn ignored_slots_survive() {
        let mut msa = Alignment::from_strs(&["a"], &["ACGT"], Alphabet::dna())
            .unwrap()
            .with_categories(vec![0, 1, 0, 1], 1)
            .unwrap();
        let opts = crate::suff_stats::SsOptions {
            cats_to_do: Some(vec![1]),
            ..Default::default()
        };
        msa.collect_suff_stats(None, &opts, None).unwrap();
        let text = written(&msa, true);
        assert!(text.contains("TUPLE_IDX_ORDER:\n-1\n0\n-1\n1\n"));
        let back = read_ss(text.as_bytes()).unwrap();
        assert_eq!(back.ss.unwrap().tuple_idx, msa.ss.unwrap().tuple_idx);
    }

    #[test]
    fn weighted_counts_round_trip() {
        let mut msa = Alignment::from_strs(&["a", "b"], &["AACA", "AAGA"], Alphabet::dna())
            .unwrap()
            .with_categories(vec![0, 1, 1, 0], 1)
            .unwrap();
        msa.build_suff_stats(1, false).unwrap();
        {
            let ss = msa.ss.as_mut().unwrap();
            ss.counts[0] = 2.5;
            ss.cat_counts.as_mut().unwrap()[1][0] = 0.75;
        }
        let text = written(&msa, false);
        assert!(text.contains("0\tAA\t2.5\t"));
        assert!(text.contains("1\tCG\t1\t"));
        let back = read_ss(text.as_bytes()).unwrap();
        assert_eq!(back.ss, msa.ss);
        assert_eq!(written(&back, false), text);
    }

    #[test]
    fn header_keys_after_ncats() {
        let text = "NSEQS = 2\nNCATS = -1\nLENGTH = 2\nTUPLE_SIZE = 1\nNTUPLES = 1\n\
                    NAMES = a,b\nALPHABET = ACGT\nIDX_OFFSET = 5\n\n0\tAA\t2\n";
        let msa = read_ss(text.as_bytes()).unwrap();
        assert_eq!(msa.idx_offset, 5);
        assert_eq!(msa.ss.unwrap().counts, vec![2.0]);
    }

    const HEADER: &str = "NSEQS = 2\nLENGTH = 2\nTUPLE_SIZE = 1\nNTUPLES = 1\nNAMES = a,b\nALPHABET = ACGT\nNCATS = -1\n\n";

    #[test]
    fn unknown_header_line() {
        let text = "NSEQS = 2\nBOGUS = 1\n";
        assert!(matches!(read_ss(text.as_bytes()), Err(PhyloHmmError::Parse(_))));
    }

    #[test]
    fn missing_header() {
        let text = "NSEQS = 2\nLENGTH = 2\n";
        assert!(matches!(read_ss(text.as_bytes()), Err(PhyloHmmError::Parse(_))));
    }

    #[test]
    fn tuple_index_out_of_range() {
        let text = format!("{HEADER}1\tAA\t2\n");
        assert!(matches!(read_ss(text.as_bytes()), Err(PhyloHmmError::Parse(_))));
    }

    #[test]
    fn row_length_mismatch() {
        let text = format!("{HEADER}0\tAAA\t2\n");
        assert!(matches!(read_ss(text.as_bytes()), Err(PhyloHmmError::Parse(_))));
    }

    #[test]
    fn truncated_order() {
        let text = format!("{HEADER}0\tAA\t2\n\nTUPLE_IDX_ORDER:\n0\n");
        assert!(matches!(read_ss(text.as_bytes()), Err(PhyloHmmError::Parse(_))));
        let text = format!("{HEADER}0\tAA\t2\n\nTUPLE_IDX_ORDER:\n0\nx\n");
        assert!(matches!(read_ss(text.as_bytes()), Err(PhyloHmmError::Parse(_))));
    }

    #[test]
    fn ncats_below_minus_one_clamps() {
        let text = HEADER.replace("NCATS = -1", "NCATS = -7") + "0\tAA\t2\n";
        let msa = read_ss(text.as_bytes()).unwrap();
        assert_eq!(msa.ncats, None);
    }
}
