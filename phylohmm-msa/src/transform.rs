//! Structural edits of ordered sufficient statistics: column/row subsets,
//! reverse complement, and row reordering.

use std::collections::HashMap;

use tracing::warn;

use phylohmm_core::{PhyloHmmError, Result};

use crate::alignment::Alignment;
use crate::alphabet::{complement, GAP_CHAR};
use crate::suff_stats::{char_index, SufficientStats};

impl Alignment {
    /// Sub-alignment of columns `start..end` restricted to the rows in
    /// `include`, built from ordered statistics only.
    ///
    /// Tuples keep their first-seen order. When `include` drops rows, two
    /// distinct tuples may project onto the same content; they are left as
    /// separate entries and a warning is emitted.
    ///
    /// # Errors
    ///
    /// Requires ordered statistics, a valid column range, and valid row
    /// indices.
    pub fn sub_alignment(
        &self,
        new_names: Vec<String>,
        include: &[usize],
        start: usize,
        end: usize,
    ) -> Result<Alignment> {
        let ss = self
            .ss
            .as_ref()
            .filter(|ss| ss.is_ordered())
            .ok_or_else(|| {
                PhyloHmmError::Precondition("sub-alignment requires ordered statistics".into())
            })?;
        let order = ss.tuple_idx.as_deref().unwrap_or(&[]);
        if start > end || end > self.length {
            return Err(PhyloHmmError::InvalidInput(format!(
                "column range {start}..{end} outside alignment of length {}",
                self.length
            )));
        }
        if new_names.len() != include.len() {
            return Err(PhyloHmmError::DimensionMismatch(format!(
                "{} names for {} included rows",
                new_names.len(),
                include.len()
            )));
        }
        if let Some(&bad) = include.iter().find(|&&s| s >= self.nseqs()) {
            return Err(PhyloHmmError::InvalidInput(format!(
                "row {bad} outside alignment of {} rows",
                self.nseqs()
            )));
        }

        let do_cats = self.ncats.is_some() && self.categories.is_some();
        let len = end - start;

        let mut full_to_sub: Vec<Option<usize>> = vec![None; ss.ntuples()];
        let mut seen = vec![false; ss.ntuples()];
        let mut sub_ntuples = 0;
        for t in order[start..end].iter().flatten() {
            if !seen[*t] {
                seen[*t] = true;
                sub_ntuples += 1;
            }
        }

        let nsub = include.len();
        let tsize = ss.tuple_size;
        let mut sub_ss = SufficientStats::new(
            tsize,
            sub_ntuples,
            len,
            if do_cats { self.ncats } else { None },
            true,
        );
        for (tupidx, &present) in seen.iter().enumerate() {
            if !present {
                continue;
            }
            let mut tuple = vec![GAP_CHAR; nsub * tsize];
            for k in 0..tsize {
                let offset = k as i64 - (tsize as i64 - 1);
                for (i, &seqidx) in include.iter().enumerate() {
                    tuple[char_index(nsub, tsize, i, offset)] =
                        ss.col_char(tupidx, seqidx, offset, self.nseqs());
                }
            }
            full_to_sub[tupidx] = Some(sub_ss.push_tuple(tuple));
        }

        if include.len() != self.nseqs() {
            warn!(
                rows = include.len(),
                source_rows = self.nseqs(),
                "tuples may not be unique in sub-alignment"
            );
        }

        let mut sub_cats = do_cats.then(|| vec![0; len]);
        for i in 0..len {
            let slot = order[i + start].and_then(|t| full_to_sub[t]);
            if let Some(sub_order) = sub_ss.tuple_idx.as_mut() {
                sub_order[i] = slot;
            }
            let Some(t) = slot else { continue };
            sub_ss.counts[t] += 1.0;
            if let (Some(sc), Some(cats)) = (sub_cats.as_mut(), &self.categories) {
                let cat = cats[i + start];
                sc[i] = cat;
                if let Some(cc) = sub_ss.cat_counts.as_mut() {
                    cc[cat][t] += 1.0;
                }
            }
        }

        let mut sub = Alignment::empty(new_names, self.alphabet.clone(), len);
        if do_cats {
            sub.ncats = self.ncats;
            sub.categories = sub_cats;
        }
        sub.ss = Some(sub_ss);
        Ok(sub)
    }

    /// Rewrite ordered statistics so they describe the reverse complement
    /// of the alignment.
    ///
    /// The first `T-1` positions of the original cannot be complemented in
    /// place; their counts are released and the leading `T-1` tuples of the
    /// reversed alignment are synthesized from the original's last tuple.
    /// Synthesized tuples reuse an existing entry with the same content when
    /// there is one. Tuples left with a zero count are removed.
    ///
    /// Category counts are recomputed when category labels are present.
    /// Without labels they cannot be adjusted and are left as they were
    /// (a warning is emitted).
    ///
    /// # Errors
    ///
    /// Requires ordered statistics and an alignment at least one tuple long.
    pub fn reverse_compl_suff_stats(&mut self) -> Result<()> {
        let nseqs = self.nseqs();
        let length = self.length;
        let ss = self
            .ss
            .as_mut()
            .filter(|ss| ss.is_ordered())
            .ok_or_else(|| {
                PhyloHmmError::Precondition(
                    "reverse complement requires ordered statistics".into(),
                )
            })?;
        let t = ss.tuple_size;
        if length < t {
            return Err(PhyloHmmError::Precondition(format!(
                "alignment of length {length} is shorter than tuple size {t}"
            )));
        }
        if self.categories.is_none() && ss.cat_counts.is_some() {
            warn!("category counts cannot be adjusted without category labels and will be approximate");
        }
        let do_cats = self.categories.is_some() && ss.cat_counts.is_some();

        let mut order = ss.tuple_idx.take().unwrap_or_default();

        // leading positions cannot be complemented; release them
        let mut overwrites: Vec<usize> = Vec::new();
        for slot in order.iter_mut().take(t - 1) {
            if let Some(idx) = slot.take() {
                ss.counts[idx] -= 1.0;
                if ss.counts[idx] <= 0.0 {
                    ss.counts[idx] = 0.0;
                    overwrites.push(idx);
                }
            }
        }

        let midpt = t.div_ceil(2);
        for tuple in ss.col_tuples.iter_mut() {
            for j in 0..nseqs {
                for k in 0..midpt {
                    let offset1 = k as i64 - (t as i64 - 1);
                    let offset2 = -(k as i64);
                    let i1 = char_index(nseqs, t, j, offset1);
                    let i2 = char_index(nseqs, t, j, offset2);
                    let c1 = complement(tuple[i1]);
                    let c2 = complement(tuple[i2]);
                    tuple[i1] = c2;
                    if offset1 != offset2 {
                        tuple[i2] = c1;
                    }
                }
            }
        }

        order[t - 1..length].reverse();
        if let Some(cats) = self.categories.as_mut() {
            cats[..length].reverse();
        }

        if let Some(first) = order[t - 1] {
            let first_tuple = ss.col_tuples[first].clone();
            let mut by_content: HashMap<Vec<u8>, usize> = ss
                .col_tuples
                .iter()
                .enumerate()
                .filter(|(i, _)| ss.counts[*i] > 0.0)
                .map(|(i, tup)| (tup.clone(), i))
                .collect();
            for (i, slot) in order.iter_mut().enumerate().take(t - 1) {
                let mut new_tuple = vec![GAP_CHAR; nseqs * t];
                let i = i as i64;
                for offset2 in -i..=0 {
                    let offset1 = offset2 + i - (t as i64 - 1);
                    for j in 0..nseqs {
                        new_tuple[char_index(nseqs, t, j, offset2)] =
                            first_tuple[char_index(nseqs, t, j, offset1)];
                    }
                }
                let idx = match by_content.get(&new_tuple) {
                    Some(&idx) => idx,
                    None => {
                        let idx = match overwrites.pop() {
                            Some(idx) if ss.counts[idx] == 0.0 => {
                                ss.col_tuples[idx] = new_tuple.clone();
                                idx
                            }
                            _ => ss.push_tuple(new_tuple.clone()),
                        };
                        by_content.insert(new_tuple, idx);
                        idx
                    }
                };
                ss.counts[idx] += 1.0;
                *slot = Some(idx);
            }
        }

        ss.tuple_idx = Some(order);
        ss.remove_empty_tuples();
        if do_cats {
            self.update_categories()?;
        }
        Ok(())
    }

    /// Reorder (and possibly expand) the rows. `new_to_old[j]` names the
    /// old row placed at new position `j`, or `None` for an all-gap row.
    /// Applies to explicit rows and to statistics alike.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_names` does not match `new_to_old` in length
    /// or an old row index is out of range.
    pub fn reorder_rows(&mut self, new_to_old: &[Option<usize>], new_names: Vec<String>) -> Result<()> {
        let old_n = self.nseqs();
        if new_names.len() != new_to_old.len() {
            return Err(PhyloHmmError::DimensionMismatch(format!(
                "{} names for {} rows",
                new_names.len(),
                new_to_old.len()
            )));
        }
        if let Some(bad) = new_to_old.iter().flatten().find(|&&o| o >= old_n) {
            return Err(PhyloHmmError::InvalidInput(format!(
                "row {bad} outside alignment of {old_n} rows"
            )));
        }
        if let Some(seqs) = self.seqs.as_mut() {
            let len = self.length;
            *seqs = new_to_old
                .iter()
                .map(|o| match o {
                    Some(old) => seqs[*old].clone(),
                    None => vec![GAP_CHAR; len],
                })
                .collect();
        }
        if let Some(ss) = self.ss.as_mut() {
            ss.reorder_rows(old_n, new_to_old);
        }
        self.names = new_names;
        Ok(())
    }
}

impl SufficientStats {
    /// Rewrite every tuple for a new row order; see
    /// [`Alignment::reorder_rows`].
    pub fn reorder_rows(&mut self, old_nseqs: usize, new_to_old: &[Option<usize>]) {
        let ts = self.tuple_size;
        let new_n = new_to_old.len();
        for tuple in self.col_tuples.iter_mut() {
            let mut out = vec![GAP_CHAR; new_n * ts];
            for k in 0..ts {
                for (j, old) in new_to_old.iter().enumerate() {
                    if let Some(old) = old {
                        out[new_n * k + j] = tuple[old_nseqs * k + old];
                    }
                }
            }
            *tuple = out;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::Alphabet;
    use std::collections::BTreeMap;

    fn dna(names: &[&str], seqs: &[&str]) -> Alignment {
        Alignment::from_strs(names, seqs, Alphabet::dna()).unwrap()
    }

    fn rev_comp_rows(seqs: &[&str]) -> Vec<String> {
        seqs.iter()
            .map(|s| s.bytes().rev().map(|c| complement(c) as char).collect())
            .collect()
    }

    /// Tuple content at every position.
    fn contents(msa: &Alignment) -> Vec<Option<Vec<u8>>> {
        let ss = msa.ss.as_ref().unwrap();
        ss.tuple_idx.as_ref().unwrap()[..msa.length]
            .iter()
            .map(|t| t.map(|i| ss.col_tuples[i].clone()))
            .collect()
    }

    fn content_counts(msa: &Alignment) -> BTreeMap<Vec<u8>, f64> {
        let ss = msa.ss.as_ref().unwrap();
        let mut m = BTreeMap::new();
        for (t, &c) in ss.col_tuples.iter().zip(&ss.counts) {
            *m.entry(t.clone()).or_insert(0.0) += c;
        }
        m
    }

    #[test]
    fn sub_alignment_columns() {
        let mut msa = dna(&["a", "b", "c"], &["ACGTAC", "ACGTTC", "AGGTAC"]);
        msa.build_suff_stats(1, true).unwrap();
        let sub = msa
            .sub_alignment(vec!["a".into(), "c".into()], &[0, 2], 1, 5)
            .unwrap();
        assert_eq!(sub.length, 4);
        let ss = sub.ss.as_ref().unwrap();
        assert_eq!(ss.total_count(), 4.0);
        let cols: Vec<Vec<u8>> = contents(&sub).into_iter().map(|c| c.unwrap()).collect();
        assert_eq!(cols, vec![b"CG".to_vec(), b"GG".to_vec(), b"TT".to_vec(), b"AA".to_vec()]);
    }

    #[test]
    fn sub_alignment_requires_order() {
        let mut msa = dna(&["a"], &["ACGT"]);
        msa.build_suff_stats(1, false).unwrap();
        let err = msa.sub_alignment(vec!["a".into()], &[0], 0, 2);
        assert!(matches!(err, Err(PhyloHmmError::Precondition(_))));
    }

    #[test]
    fn sub_alignment_keeps_categories() {
        let mut msa = dna(&["a", "b"], &["ACGT", "ACGA"])
            .with_categories(vec![1, 0, 1, 2], 2)
            .unwrap();
        msa.build_suff_stats(1, true).unwrap();
        let sub = msa
            .sub_alignment(vec!["a".into(), "b".into()], &[0, 1], 2, 4)
            .unwrap();
        assert_eq!(sub.categories.as_ref().unwrap(), &vec![1, 2]);
        let cc = sub.ss.as_ref().unwrap().cat_counts.as_ref().unwrap();
        assert_eq!(cc[1].iter().sum::<f64>(), 1.0);
        assert_eq!(cc[2].iter().sum::<f64>(), 1.0);
    }

    #[test]
    fn reverse_compl_matches_explicit_reverse_complement() {
        let rows = ["ACGTTGCA", "AACCGGTT"];
        for t in 1..=3 {
            let mut msa = dna(&["a", "b"], &rows);
            msa.build_suff_stats(t, true).unwrap();
            msa.reverse_compl_suff_stats().unwrap();

            let rc = rev_comp_rows(&rows);
            let rc: Vec<&str> = rc.iter().map(|s| s.as_str()).collect();
            let mut expect = dna(&["a", "b"], &rc);
            expect.build_suff_stats(t, true).unwrap();

            assert_eq!(contents(&msa), contents(&expect), "tuple size {t}");
            assert_eq!(content_counts(&msa), content_counts(&expect), "tuple size {t}");
        }
    }

    #[test]
    fn reverse_compl_twice_is_identity() {
        let mut msa = dna(&["a", "b", "c"], &["ACGGTCA", "ACTGTAA", "GCGGTCT"]);
        msa.build_suff_stats(3, true).unwrap();
        let before = contents(&msa);
        let before_counts = content_counts(&msa);
        msa.reverse_compl_suff_stats().unwrap();
        msa.reverse_compl_suff_stats().unwrap();
        assert_eq!(contents(&msa), before);
        assert_eq!(content_counts(&msa), before_counts);
    }

    #[test]
    fn reverse_compl_updates_category_counts() {
        let mut msa = dna(&["a"], &["ACGTA"])
            .with_categories(vec![0, 0, 1, 1, 2], 2)
            .unwrap();
        msa.build_suff_stats(2, true).unwrap();
        msa.reverse_compl_suff_stats().unwrap();
        assert_eq!(msa.categories.as_ref().unwrap(), &vec![2, 1, 1, 0, 0]);
        let ss = msa.ss.as_ref().unwrap();
        let cc = ss.cat_counts.as_ref().unwrap();
        for i in 0..ss.ntuples() {
            assert_eq!(cc.iter().map(|row| row[i]).sum::<f64>(), ss.counts[i]);
        }
    }

    #[test]
    fn reverse_compl_requires_order() {
        let mut msa = dna(&["a"], &["ACGT"]);
        msa.build_suff_stats(1, false).unwrap();
        assert!(msa.reverse_compl_suff_stats().is_err());
    }

    #[test]
    fn reorder_rows_with_gap_row() {
        let mut msa = dna(&["a", "b"], &["AC", "GT"]);
        msa.build_suff_stats(2, true).unwrap();
        msa.reorder_rows(
            &[Some(1), None, Some(0)],
            vec!["b".into(), "x".into(), "a".into()],
        )
        .unwrap();
        assert_eq!(msa.nseqs(), 3);
        assert_eq!(msa.seqs.as_ref().unwrap()[1], b"--".to_vec());
        let ss = msa.ss.as_ref().unwrap();
        assert_eq!(ss.col_tuples[0], b"---G-A".to_vec());
        assert_eq!(ss.col_tuples[1], b"G-AT-C".to_vec());
    }
}
