//! Pooling many alignments into one set of sufficient statistics.

use std::collections::HashMap;
use std::path::Path;

use tracing::info;

use phylohmm_core::{PhyloHmmError, Result};

use crate::alignment::Alignment;
use crate::alphabet::{Alphabet, GAP_CHAR};
use crate::fasta::read_fasta_alignment;
use crate::ss_io::read_ss_file;
use crate::suff_stats::{SsOptions, TupleHash};

/// Union of several alignments over the same rows, with a mapping from
/// each source's tuple indices to the pooled ones.
#[derive(Debug, Clone)]
pub struct PooledAlignment {
    pub pooled: Alignment,
    pub sources: Vec<Alignment>,
    /// Length of each source alignment.
    pub lens: Vec<usize>,
    /// `tuple_idx_map[src][j]`: pooled index of tuple `j` of source `src`.
    pub tuple_idx_map: Vec<Vec<usize>>,
}

impl PooledAlignment {
    /// Pool `sources`, which must share row count and order. Names and
    /// alphabet come from the first source. Sources without statistics
    /// get ordered statistics of size `tuple_size` first.
    ///
    /// # Errors
    ///
    /// Returns an error if no sources are given or they disagree in row
    /// count, tuple size, or category count.
    pub fn new(
        mut sources: Vec<Alignment>,
        tuple_size: usize,
        cats_to_do: Option<Vec<usize>>,
    ) -> Result<Self> {
        let rep = sources.first().ok_or_else(|| {
            PhyloHmmError::InvalidInput("pooling needs at least one alignment".into())
        })?;
        let mut pooled = Alignment::empty(rep.names.clone(), rep.alphabet.clone(), 0);
        pooled.ncats = rep.ncats;
        let nseqs = rep.nseqs();

        let mut hash = TupleHash::new();
        let mut lens = Vec::with_capacity(sources.len());
        let mut tuple_idx_map = Vec::with_capacity(sources.len());
        let pool_opts = SsOptions {
            tuple_size,
            store_order: false,
            cats_to_do: cats_to_do.clone(),
            idx_offset: None,
        };
        for (i, src) in sources.iter_mut().enumerate() {
            if src.nseqs() != nseqs {
                return Err(PhyloHmmError::DimensionMismatch(format!(
                    "alignment {} has {} sequences, expected {}",
                    i,
                    src.nseqs(),
                    nseqs
                )));
            }
            if src.ss.is_none() {
                let opts = SsOptions {
                    tuple_size,
                    store_order: true,
                    cats_to_do: cats_to_do.clone(),
                    idx_offset: None,
                };
                src.collect_suff_stats(None, &opts, None)?;
            }
            pooled.collect_suff_stats(Some(&*src), &pool_opts, Some(&mut hash))?;
            lens.push(src.length);

            let src_ss = src.ss.as_ref().ok_or_else(|| {
                PhyloHmmError::Precondition("source statistics missing after build".into())
            })?;
            let map = src_ss
                .col_tuples
                .iter()
                .map(|t| {
                    hash.get(t).copied().ok_or_else(|| {
                        PhyloHmmError::Precondition("source tuple missing from pooled table".into())
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            tuple_idx_map.push(map);
        }
        if let Some(ss) = pooled.ss.as_mut() {
            ss.compact();
        }

        Ok(Self {
            pooled,
            sources,
            lens,
            tuple_idx_map,
        })
    }
}

/// File formats accepted by [`aggregate_from_files`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AlignmentFormat {
    Fasta,
    SuffStats,
}

/// Build unordered statistics over many alignment files.
///
/// `seqnames` fixes the row order of the result: rows of each source are
/// permuted to it and rows a source lacks are filled with gaps. Sources
/// given as sufficient statistics must already list exactly these names
/// in this order. When `cycle_size` is set, column `p` of every source is
/// labelled with category `(p mod cycle_size) + 1`.
///
/// # Errors
///
/// Returns an error if a file cannot be read, a source names a sequence
/// not in `seqnames`, tuple sizes differ, or sources disagree in their
/// number of categories.
pub fn aggregate_from_files<P: AsRef<Path>>(
    paths: &[P],
    format: AlignmentFormat,
    seqnames: &[String],
    alphabet: &Alphabet,
    tuple_size: usize,
    cats_to_do: Option<Vec<usize>>,
    cycle_size: Option<usize>,
) -> Result<Alignment> {
    let nseqs = seqnames.len();
    let name_index: HashMap<&str, usize> = seqnames
        .iter()
        .enumerate()
        .map(|(i, n)| (n.as_str(), i))
        .collect();

    let mut aggregate = Alignment::empty(seqnames.to_vec(), alphabet.clone(), 0);
    aggregate.ncats = Some(cycle_size.filter(|&c| c > 0).unwrap_or(0));
    let mut hash = TupleHash::new();
    let opts = SsOptions {
        tuple_size,
        store_order: false,
        cats_to_do,
        idx_offset: None,
    };

    for (i, path) in paths.iter().enumerate() {
        let path = path.as_ref();
        info!(path = %path.display(), "reading alignment");
        let mut source = match format {
            AlignmentFormat::Fasta => read_fasta_alignment(path, alphabet)?,
            AlignmentFormat::SuffStats => read_ss_file(path)?,
        };

        if let (None, Some(ss)) = (&source.seqs, &source.ss) {
            if ss.tuple_size != tuple_size {
                return Err(PhyloHmmError::DimensionMismatch(format!(
                    "tuple size of '{}' ({}) does not match requested tuple size ({})",
                    path.display(),
                    ss.tuple_size,
                    tuple_size
                )));
            }
        }

        if let Some(cycle) = cycle_size.filter(|&c| c > 0) {
            source.categories = Some((0..source.length).map(|j| j % cycle + 1).collect());
            source.ncats = Some(cycle);
        }

        if source.ncats != aggregate.ncats {
            if i == 0 {
                aggregate.ncats = source.ncats;
            } else {
                return Err(PhyloHmmError::DimensionMismatch(
                    "input alignments have different numbers of categories".into(),
                ));
            }
        }

        match source.seqs.take() {
            None => {
                if source.names != seqnames {
                    return Err(PhyloHmmError::DimensionMismatch(format!(
                        "sequences of '{}' must match the aggregate in number and order",
                        path.display()
                    )));
                }
            }
            Some(seqs) => {
                let mut rows: Vec<Option<Vec<u8>>> = vec![None; nseqs];
                for (name, seq) in source.names.iter().zip(seqs) {
                    let idx = name_index.get(name.as_str()).ok_or_else(|| {
                        PhyloHmmError::DimensionMismatch(format!(
                            "no match for sequence name '{}' in file '{}'",
                            name,
                            path.display()
                        ))
                    })?;
                    rows[*idx] = Some(seq);
                }
                let len = source.length;
                source.seqs = Some(
                    rows.into_iter()
                        .map(|r| r.unwrap_or_else(|| vec![GAP_CHAR; len]))
                        .collect(),
                );
                source.names = seqnames.to_vec();
            }
        }

        aggregate.collect_suff_stats(Some(&source), &opts, Some(&mut hash))?;
    }

    if let Some(ss) = aggregate.ss.as_mut() {
        ss.compact();
    }
    Ok(aggregate)
}
