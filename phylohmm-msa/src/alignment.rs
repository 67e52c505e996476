//! Multiple sequence alignments.
//!
//! An [`Alignment`] carries sequence names, an alphabet, and either explicit
//! sequences, sufficient statistics (see [`crate::suff_stats`]), or both.
//! Column categories, when present, label every position with a value in
//! `0..=ncats`.

use phylohmm_core::{PhyloHmmError, Result, Summarizable};

use crate::alphabet::{Alphabet, GAP_CHAR};
use crate::suff_stats::SufficientStats;

/// A multiple sequence alignment.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Alignment {
    pub names: Vec<String>,
    pub alphabet: Alphabet,
    /// Explicit rows, all of `length` uppercase bytes.
    pub seqs: Option<Vec<Vec<u8>>>,
    pub length: usize,
    /// Number of non-background categories; labels range over `0..=ncats`.
    pub ncats: Option<usize>,
    pub categories: Option<Vec<usize>>,
    /// Coordinate offset of column 0 in some reference frame.
    pub idx_offset: i64,
    pub ss: Option<SufficientStats>,
}

impl Alignment {
    /// Build an alignment from named rows. Rows are uppercased.
    ///
    /// # Errors
    ///
    /// Returns an error if names and rows disagree in number, the alignment
    /// has no rows, or rows differ in length.
    pub fn new(names: Vec<String>, seqs: Vec<Vec<u8>>, alphabet: Alphabet) -> Result<Self> {
        if seqs.is_empty() {
            return Err(PhyloHmmError::InvalidInput(
                "alignment needs at least one sequence".into(),
            ));
        }
        if names.len() != seqs.len() {
            return Err(PhyloHmmError::DimensionMismatch(format!(
                "{} names for {} sequences",
                names.len(),
                seqs.len()
            )));
        }
        let length = seqs[0].len();
        if let Some((i, s)) = seqs.iter().enumerate().find(|(_, s)| s.len() != length) {
            return Err(PhyloHmmError::DimensionMismatch(format!(
                "sequence '{}' has length {}, expected {}",
                names[i],
                s.len(),
                length
            )));
        }
        let seqs = seqs
            .into_iter()
            .map(|s| s.to_ascii_uppercase())
            .collect();
        Ok(Self {
            names,
            alphabet,
            seqs: Some(seqs),
            length,
            ncats: None,
            categories: None,
            idx_offset: 0,
            ss: None,
        })
    }

    /// Convenience constructor from string rows.
    pub fn from_strs(names: &[&str], seqs: &[&str], alphabet: Alphabet) -> Result<Self> {
        Self::new(
            names.iter().map(|s| s.to_string()).collect(),
            seqs.iter().map(|s| s.as_bytes().to_vec()).collect(),
            alphabet,
        )
    }

    /// An alignment with names only, to be filled through sufficient
    /// statistics.
    pub fn empty(names: Vec<String>, alphabet: Alphabet, length: usize) -> Self {
        Self {
            names,
            alphabet,
            seqs: None,
            length,
            ncats: None,
            categories: None,
            idx_offset: 0,
            ss: None,
        }
    }

    /// Attach per-column category labels.
    ///
    /// # Errors
    ///
    /// Returns an error if the label vector length differs from the
    /// alignment length or a label exceeds `ncats`.
    pub fn with_categories(mut self, categories: Vec<usize>, ncats: usize) -> Result<Self> {
        if categories.len() != self.length {
            return Err(PhyloHmmError::DimensionMismatch(format!(
                "{} category labels for alignment of length {}",
                categories.len(),
                self.length
            )));
        }
        if let Some(&bad) = categories.iter().find(|&&c| c > ncats) {
            return Err(PhyloHmmError::InvalidInput(format!(
                "category {bad} exceeds ncats {ncats}"
            )));
        }
        self.categories = Some(categories);
        self.ncats = Some(ncats);
        Ok(self)
    }

    /// Number of rows.
    pub fn nseqs(&self) -> usize {
        self.names.len()
    }

    /// Index of the row named `name`.
    pub fn seq_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Character of row `seq` at column `pos`, from explicit rows when
    /// present, otherwise from the rightmost column of the ordered tuple at
    /// `pos`. Ignored order slots read as gaps.
    ///
    /// # Errors
    ///
    /// Returns an error when the position is out of range or neither rows
    /// nor ordered sufficient statistics are available.
    pub fn get_char(&self, seq: usize, pos: usize) -> Result<u8> {
        if seq >= self.nseqs() || pos >= self.length {
            return Err(PhyloHmmError::InvalidInput(format!(
                "position ({seq}, {pos}) outside alignment of {} x {}",
                self.nseqs(),
                self.length
            )));
        }
        if let Some(seqs) = &self.seqs {
            return Ok(seqs[seq][pos]);
        }
        let ss = self.ss.as_ref().ok_or_else(|| {
            PhyloHmmError::Precondition("alignment has neither sequences nor statistics".into())
        })?;
        let order = ss.tuple_idx.as_ref().ok_or_else(|| {
            PhyloHmmError::Precondition("character lookup needs ordered statistics".into())
        })?;
        Ok(match order[pos] {
            Some(t) => ss.col_char(t, seq, 0, self.nseqs()),
            None => GAP_CHAR,
        })
    }

    /// The column at `pos` as one byte per row.
    pub fn column(&self, pos: usize) -> Option<Vec<u8>> {
        let seqs = self.seqs.as_ref()?;
        if pos >= self.length {
            return None;
        }
        Some(seqs.iter().map(|s| s[pos]).collect())
    }
}

impl Summarizable for Alignment {
    fn summary(&self) -> String {
        let mut s = format!(
            "Alignment: {} sequences, {} columns, alphabet {}",
            self.nseqs(),
            self.length,
            self.alphabet
        );
        if let Some(ss) = &self.ss {
            s.push_str(&format!(
                ", {} distinct {}-tuples",
                ss.ntuples(),
                ss.tuple_size
            ));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_uppercases_and_validates() {
        let msa = Alignment::from_strs(&["a", "b"], &["acgt", "AC-T"], Alphabet::dna()).unwrap();
        assert_eq!(msa.nseqs(), 2);
        assert_eq!(msa.length, 4);
        assert_eq!(msa.column(0).unwrap(), b"AA".to_vec());
        assert_eq!(msa.get_char(1, 2).unwrap(), GAP_CHAR);
        assert!(msa.get_char(2, 0).is_err());
    }

    #[test]
    fn new_rejects_ragged_rows() {
        let err = Alignment::from_strs(&["a", "b"], &["ACGT", "ACG"], Alphabet::dna());
        assert!(matches!(err, Err(PhyloHmmError::DimensionMismatch(_))));
        let err = Alignment::from_strs(&["a"], &["ACGT", "ACGT"], Alphabet::dna());
        assert!(err.is_err());
    }

    #[test]
    fn categories_are_checked() {
        let msa = Alignment::from_strs(&["a"], &["ACG"], Alphabet::dna()).unwrap();
        assert!(msa.clone().with_categories(vec![0, 1], 1).is_err());
        assert!(msa.clone().with_categories(vec![0, 1, 3], 2).is_err());
        let msa = msa.with_categories(vec![0, 1, 2], 2).unwrap();
        assert_eq!(msa.ncats, Some(2));
    }

    #[test]
    fn summary_mentions_shape() {
        let msa = Alignment::from_strs(&["a", "b"], &["AC", "AG"], Alphabet::dna()).unwrap();
        assert!(msa.summary().contains("2 sequences, 2 columns"));
    }
}
