//! Sufficient statistics of an alignment: deduplicated column tuples.
//!
//! A column tuple of size `T` at position `p` is the concatenation of the
//! columns `p-T+1 ..= p`, one byte per sequence, laid out offset by offset:
//! `[offset -(T-1): seq 0..N][offset -(T-2): seq 0..N]...[offset 0: seq 0..N]`.
//! Columns before position 0 are padded with [`GAP_CHAR`].
//!
//! Every likelihood computation consumes an alignment through these tuples,
//! weighting each distinct tuple by its count instead of visiting every
//! column.

use std::collections::HashMap;

use phylohmm_core::prob::int_pow;
use phylohmm_core::{PhyloHmmError, Result, Summarizable};

use crate::alignment::Alignment;
use crate::alphabet::GAP_CHAR;

/// Cap on the initial number of tuple slots reserved for a fresh build.
pub const MAX_NTUPLE_ALLOC: usize = 100_000;

/// Running tuple table shared across several builds when pooling.
pub type TupleHash = HashMap<Vec<u8>, usize>;

/// Deduplicated column tuples with counts and optional order.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SufficientStats {
    pub tuple_size: usize,
    /// Serialized tuple strings, unique by byte equality.
    pub col_tuples: Vec<Vec<u8>>,
    pub counts: Vec<f64>,
    /// `cat_counts[c][i]`: occurrences of tuple `i` in category `c`.
    pub cat_counts: Option<Vec<Vec<f64>>>,
    /// Tuple index at each alignment position; `None` marks an ignored slot.
    pub tuple_idx: Option<Vec<Option<usize>>>,
    alloc_ntuples: usize,
    alloc_len: usize,
}

/// Options for [`Alignment::collect_suff_stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SsOptions {
    pub tuple_size: usize,
    pub store_order: bool,
    /// Only columns in these categories contribute.
    pub cats_to_do: Option<Vec<usize>>,
    /// Splice the source's order into a pre-sized order vector at this
    /// offset. Growth of the tuple table is refused in this mode.
    pub idx_offset: Option<usize>,
}

impl Default for SsOptions {
    fn default() -> Self {
        Self {
            tuple_size: 1,
            store_order: true,
            cats_to_do: None,
            idx_offset: None,
        }
    }
}

impl SsOptions {
    pub fn new(tuple_size: usize, store_order: bool) -> Self {
        Self {
            tuple_size,
            store_order,
            ..Self::default()
        }
    }
}

impl SufficientStats {
    /// An empty object with room for `alloc_ntuples` tuples and, when
    /// `store_order`, an order vector of `alloc_len` ignored slots.
    pub fn new(
        tuple_size: usize,
        alloc_ntuples: usize,
        alloc_len: usize,
        ncats: Option<usize>,
        store_order: bool,
    ) -> Self {
        Self {
            tuple_size,
            col_tuples: Vec::with_capacity(alloc_ntuples),
            counts: Vec::with_capacity(alloc_ntuples),
            cat_counts: ncats.map(|n| vec![Vec::with_capacity(alloc_ntuples); n + 1]),
            tuple_idx: store_order.then(|| vec![None; alloc_len]),
            alloc_ntuples,
            alloc_len,
        }
    }

    /// Number of distinct tuples.
    pub fn ntuples(&self) -> usize {
        self.col_tuples.len()
    }

    /// Tuple slots reserved (always at least `ntuples`).
    pub fn alloc_ntuples(&self) -> usize {
        self.alloc_ntuples
    }

    /// Length of the order vector reserved.
    pub fn alloc_len(&self) -> usize {
        self.alloc_len
    }

    /// Whether the order of columns is stored.
    pub fn is_ordered(&self) -> bool {
        self.tuple_idx.is_some()
    }

    /// Sum of all tuple counts.
    pub fn total_count(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// Character of sequence `seq` at column `offset` (`0` is the last
    /// column of the tuple, `-1` the one before) in tuple `tuple`.
    pub fn col_char(&self, tuple: usize, seq: usize, offset: i64, nseqs: usize) -> u8 {
        self.col_tuples[tuple][char_index(nseqs, self.tuple_size, seq, offset)]
    }

    /// The characters of one sequence across the tuple, oldest first.
    pub fn tuple_of_chars(&self, tuple: usize, seq: usize, nseqs: usize) -> Vec<u8> {
        let t = self.tuple_size;
        (0..t)
            .map(|k| self.col_tuples[tuple][nseqs * k + seq])
            .collect()
    }

    /// Ensure room for `max_ntuples` tuples and an order vector of `len`.
    /// Storage only grows, and tuple storage at least doubles.
    pub fn realloc(&mut self, max_ntuples: usize, len: usize) {
        if let Some(order) = self.tuple_idx.as_mut() {
            if len > self.alloc_len {
                self.alloc_len = (self.alloc_len * 2).max(len);
                order.resize(self.alloc_len, None);
            }
        }
        if max_ntuples > self.alloc_ntuples {
            let new_alloc = max_ntuples.max(self.alloc_ntuples * 2);
            let extra = new_alloc - self.col_tuples.len();
            self.col_tuples.reserve(extra);
            self.counts.reserve(extra);
            if let Some(cc) = self.cat_counts.as_mut() {
                for row in cc.iter_mut() {
                    row.reserve(extra);
                }
            }
            self.alloc_ntuples = new_alloc;
        }
    }

    /// Shrink tuple storage to `ntuples`.
    pub fn compact(&mut self) {
        self.col_tuples.shrink_to_fit();
        self.counts.shrink_to_fit();
        if let Some(cc) = self.cat_counts.as_mut() {
            for row in cc.iter_mut() {
                row.shrink_to_fit();
            }
        }
        self.alloc_ntuples = self.ntuples();
    }

    /// Append a new tuple with zero counts, returning its index.
    pub(crate) fn push_tuple(&mut self, key: Vec<u8>) -> usize {
        let idx = self.col_tuples.len();
        self.col_tuples.push(key);
        self.counts.push(0.0);
        if let Some(cc) = self.cat_counts.as_mut() {
            for row in cc.iter_mut() {
                row.push(0.0);
            }
        }
        idx
    }

    /// Index table over the current tuples.
    pub fn tuple_hash(&self) -> TupleHash {
        self.col_tuples
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect()
    }

    /// Drop tuples whose count is zero, renumbering the rest in order and
    /// rewriting the order vector.
    pub(crate) fn remove_empty_tuples(&mut self) {
        let n = self.ntuples();
        let mut remap = vec![None; n];
        let mut next = 0;
        for (i, slot) in remap.iter_mut().enumerate() {
            if self.counts[i] > 0.0 {
                *slot = Some(next);
                next += 1;
            }
        }
        if next == n {
            return;
        }
        let mask: Vec<bool> = remap.iter().map(|r| r.is_some()).collect();
        retain_mask(&mut self.col_tuples, &mask);
        retain_mask(&mut self.counts, &mask);
        if let Some(cc) = self.cat_counts.as_mut() {
            for row in cc.iter_mut() {
                retain_mask(row, &mask);
            }
        }
        if let Some(order) = self.tuple_idx.as_mut() {
            for slot in order.iter_mut() {
                *slot = slot.and_then(|t| remap[t]);
            }
        }
        self.compact();
    }
}

impl Summarizable for SufficientStats {
    fn summary(&self) -> String {
        format!(
            "SufficientStats: {} distinct {}-tuples, total count {}, {}",
            self.ntuples(),
            self.tuple_size,
            self.total_count(),
            if self.is_ordered() { "ordered" } else { "unordered" }
        )
    }
}

fn retain_mask<T>(v: &mut Vec<T>, mask: &[bool]) {
    let mut i = 0;
    v.retain(|_| {
        let keep = mask[i];
        i += 1;
        keep
    });
}

/// Offset of `(seq, offset)` within a serialized tuple.
pub fn char_index(nseqs: usize, tuple_size: usize, seq: usize, offset: i64) -> usize {
    let col = tuple_size as i64 - 1 + offset;
    nseqs * col as usize + seq
}

/// Serialize the tuple of size `tuple_size` ending at column `pos`.
pub fn col_to_tuple(seqs: &[Vec<u8>], pos: usize, tuple_size: usize) -> Vec<u8> {
    let nseqs = seqs.len();
    let mut key = vec![GAP_CHAR; nseqs * tuple_size];
    for k in 0..tuple_size {
        // column k of the tuple sits at alignment position pos - (T-1) + k
        let back = tuple_size - 1 - k;
        if pos < back {
            continue;
        }
        for (j, s) in seqs.iter().enumerate() {
            key[nseqs * k + j] = s[pos - back];
        }
    }
    key
}

/// Printable tuple: one group of `nseqs` characters per column, groups
/// separated by single spaces.
pub fn tuple_to_string_pretty(tuple: &[u8], nseqs: usize) -> String {
    tuple
        .chunks(nseqs.max(1))
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

impl Alignment {
    /// Build or extend the sufficient statistics of this alignment.
    ///
    /// Without a `source`, tuples are collected from this alignment's own
    /// rows, which must be present, into a fresh object. With a `source`,
    /// its columns (or its own statistics) are added to this alignment's
    /// statistics and `length` grows by the source length, unless
    /// `opts.idx_offset` is set, in which case the source order is spliced
    /// into the pre-sized order vector at that offset.
    ///
    /// A shared `hash` defers compaction, for repeated pooling calls.
    ///
    /// # Errors
    ///
    /// - [`PhyloHmmError::Precondition`] when required rows, statistics, or
    ///   order are missing.
    /// - [`PhyloHmmError::DimensionMismatch`] when sequence counts, tuple
    ///   sizes, or category counts disagree.
    /// - [`PhyloHmmError::Capacity`] when the tuple table would have to grow
    ///   while splicing at an offset.
    pub fn collect_suff_stats(
        &mut self,
        source: Option<&Alignment>,
        opts: &SsOptions,
        hash: Option<&mut TupleHash>,
    ) -> Result<()> {
        let mut slot = self.ss.take();
        let result = self.fill_suff_stats(&mut slot, source, opts, hash);
        self.ss = slot;
        self.length = result?;
        Ok(())
    }

    /// Ordered (or unordered) statistics of this alignment's own rows.
    pub fn build_suff_stats(&mut self, tuple_size: usize, store_order: bool) -> Result<()> {
        self.collect_suff_stats(None, &SsOptions::new(tuple_size, store_order), None)
    }

    fn fill_suff_stats(
        &self,
        slot: &mut Option<SufficientStats>,
        source: Option<&Alignment>,
        opts: &SsOptions,
        hash: Option<&mut TupleHash>,
    ) -> Result<usize> {
        let t = opts.tuple_size;
        if t == 0 {
            return Err(PhyloHmmError::InvalidInput("tuple size must be at least 1".into()));
        }
        let nseqs = self.nseqs();

        match source {
            None => {
                if self.seqs.is_none() || self.length == 0 || slot.is_some() {
                    return Err(PhyloHmmError::Precondition(
                        "building statistics in place needs sequences and no existing statistics"
                            .into(),
                    ));
                }
            }
            Some(src) => {
                if src.nseqs() != nseqs {
                    return Err(PhyloHmmError::DimensionMismatch(format!(
                        "source alignment has {} sequences, target has {}",
                        src.nseqs(),
                        nseqs
                    )));
                }
                if let (Some(a), Some(b)) = (self.ncats, src.ncats) {
                    if a != b {
                        return Err(PhyloHmmError::DimensionMismatch(format!(
                            "source alignment has {b} categories, target has {a}"
                        )));
                    }
                }
                if src.seqs.is_none() {
                    let ss = src.ss.as_ref().ok_or_else(|| {
                        PhyloHmmError::Precondition(
                            "source alignment has neither sequences nor statistics".into(),
                        )
                    })?;
                    if ss.tuple_size != t {
                        return Err(PhyloHmmError::DimensionMismatch(format!(
                            "source tuple size {} differs from requested {}",
                            ss.tuple_size, t
                        )));
                    }
                    if opts.store_order && !ss.is_ordered() {
                        return Err(PhyloHmmError::Precondition(
                            "ordered statistics requested from an unordered source".into(),
                        ));
                    }
                }
            }
        }
        if opts.idx_offset.is_some() && !(opts.store_order && source.is_some()) {
            return Err(PhyloHmmError::Precondition(
                "an index offset requires stored order and a source alignment".into(),
            ));
        }

        let do_cats = self.ncats.is_some();
        let do_cat_number: Option<Vec<bool>> = match (&opts.cats_to_do, self.ncats) {
            (Some(cats), Some(ncats)) => {
                let mut flags = vec![false; ncats + 1];
                for &c in cats {
                    if c > ncats {
                        return Err(PhyloHmmError::InvalidInput(format!(
                            "category {c} exceeds ncats {ncats}"
                        )));
                    }
                    flags[c] = true;
                }
                Some(flags)
            }
            _ => None,
        };

        let state_space = int_pow(self.alphabet.size() + 2, nseqs * t);
        let source_ntuples = source.and_then(|s| s.ss.as_ref()).map(|ss| ss.ntuples());

        let (new_length, order_base, max_tuples) = match slot.as_mut() {
            None => {
                let upper_bound = match source {
                    Some(src) => source_ntuples.unwrap_or(src.length),
                    None => self.length,
                };
                // an offset build cannot grow later, so it reserves the full bound
                let upper_bound = match opts.idx_offset {
                    Some(_) => upper_bound,
                    None => upper_bound.min(MAX_NTUPLE_ALLOC),
                };
                let max_tuples = state_space.min(upper_bound).max(1);
                let length = source.map_or(self.length, |s| s.length);
                *slot = Some(SufficientStats::new(
                    t,
                    max_tuples,
                    length + opts.idx_offset.unwrap_or(0),
                    self.ncats,
                    opts.store_order,
                ));
                (length, opts.idx_offset.unwrap_or(0), max_tuples)
            }
            Some(ss) => {
                let src = source.ok_or_else(|| {
                    PhyloHmmError::Precondition(
                        "alignment already has statistics; a source alignment is required".into(),
                    )
                })?;
                if ss.tuple_size != t {
                    return Err(PhyloHmmError::DimensionMismatch(format!(
                        "existing tuple size {} differs from requested {}",
                        ss.tuple_size, t
                    )));
                }
                if opts.store_order && !ss.is_ordered() {
                    return Err(PhyloHmmError::Precondition(
                        "cannot store order in unordered statistics".into(),
                    ));
                }
                match opts.idx_offset {
                    None => {
                        let new_length = self.length + src.length;
                        let upper_bound = ss.ntuples() + source_ntuples.unwrap_or(src.length);
                        let max_tuples = state_space.min(upper_bound);
                        ss.realloc(max_tuples, new_length);
                        (new_length, self.length, max_tuples)
                    }
                    Some(offset) => {
                        if opts.store_order && offset + src.length > ss.alloc_len() {
                            return Err(PhyloHmmError::Capacity(format!(
                                "order vector of length {} cannot hold {} columns at offset {}",
                                ss.alloc_len(),
                                src.length,
                                offset
                            )));
                        }
                        (self.length, offset, ss.alloc_ntuples())
                    }
                }
            }
        };
        let main_ss = slot.as_mut().ok_or_else(|| {
            PhyloHmmError::Precondition("statistics were not initialized".into())
        })?;

        let compact = hash.is_none();
        let mut local_hash;
        let tuple_hash: &mut TupleHash = match hash {
            Some(h) => h,
            None => {
                local_hash = TupleHash::with_capacity(max_tuples / 3);
                for (i, tup) in main_ss.col_tuples.iter().enumerate() {
                    local_hash.insert(tup.clone(), i);
                }
                &mut local_hash
            }
        };
        let no_growth = opts.idx_offset.is_some();

        let source_ss = source.and_then(|s| s.ss.as_ref());
        match (source, source_ss) {
            (Some(_), Some(sss)) if !opts.store_order && sss.tuple_size == t => {
                for i in 0..sss.ntuples() {
                    let idx = lookup_or_insert(main_ss, tuple_hash, &sss.col_tuples[i], no_growth)?;
                    main_ss.counts[idx] += sss.counts[i];
                    if let (true, Some(src_cc), Some(cc)) =
                        (do_cats, sss.cat_counts.as_ref(), main_ss.cat_counts.as_mut())
                    {
                        for (row, src_row) in cc.iter_mut().zip(src_cc.iter()) {
                            row[idx] += src_row[i];
                        }
                    }
                }
            }
            _ => {
                let smsa = source.unwrap_or(self);
                if do_cat_number.is_some() && smsa.categories.is_none() {
                    return Err(PhyloHmmError::Precondition(
                        "category filter given but the alignment has no categories".into(),
                    ));
                }
                for i in 0..smsa.length {
                    let pos = i + order_base;
                    if let (Some(flags), Some(cats)) = (&do_cat_number, &smsa.categories) {
                        if !flags.get(cats[i]).copied().unwrap_or(false) {
                            set_order(main_ss, pos, None);
                            continue;
                        }
                    }

                    let key = match (&smsa.seqs, &smsa.ss) {
                        (Some(seqs), _) => col_to_tuple(seqs, i, t),
                        (None, Some(sss)) => {
                            let order = sss.tuple_idx.as_ref().ok_or_else(|| {
                                PhyloHmmError::Precondition(
                                    "column-wise build needs ordered source statistics".into(),
                                )
                            })?;
                            match order.get(i).copied().flatten() {
                                Some(ti) => sss.col_tuples[ti].clone(),
                                None => {
                                    set_order(main_ss, pos, None);
                                    continue;
                                }
                            }
                        }
                        (None, None) => {
                            return Err(PhyloHmmError::Precondition(
                                "alignment has neither sequences nor statistics".into(),
                            ))
                        }
                    };

                    let idx = lookup_or_insert(main_ss, tuple_hash, &key, no_growth)?;
                    main_ss.counts[idx] += 1.0;
                    if let (true, Some(cats)) = (do_cats, &smsa.categories) {
                        let cat = cats[i];
                        let cc = main_ss.cat_counts.as_mut().ok_or_else(|| {
                            PhyloHmmError::Precondition("category counts not allocated".into())
                        })?;
                        if cat >= cc.len() {
                            return Err(PhyloHmmError::InvalidInput(format!(
                                "category {} at column {} exceeds ncats {}",
                                cat,
                                i,
                                cc.len() - 1
                            )));
                        }
                        cc[cat][idx] += 1.0;
                    }
                    if opts.store_order {
                        set_order(main_ss, pos, Some(idx));
                    }
                }
            }
        }

        if compact {
            main_ss.compact();
        }
        Ok(new_length)
    }

    /// Recompute category counts from the category labels and the order
    /// vector.
    ///
    /// # Errors
    ///
    /// Requires `ncats`, category labels, and ordered statistics.
    pub fn update_categories(&mut self) -> Result<()> {
        let ncats = self.ncats.ok_or_else(|| {
            PhyloHmmError::Precondition("updating category counts needs ncats".into())
        })?;
        let cats = self.categories.as_ref().ok_or_else(|| {
            PhyloHmmError::Precondition("updating category counts needs category labels".into())
        })?;
        let ss = self.ss.as_mut().ok_or_else(|| {
            PhyloHmmError::Precondition("alignment has no statistics".into())
        })?;
        let order = ss.tuple_idx.as_ref().ok_or_else(|| {
            PhyloHmmError::Precondition("updating category counts needs ordered statistics".into())
        })?;
        let mut cc = vec![vec![0.0; ss.col_tuples.len()]; ncats + 1];
        for (p, &cat) in cats.iter().enumerate().take(self.length) {
            if cat > ncats {
                return Err(PhyloHmmError::InvalidInput(format!(
                    "category {cat} at column {p} exceeds ncats {ncats}"
                )));
            }
            if let Some(t) = order[p] {
                cc[cat][t] += 1.0;
            }
        }
        ss.cat_counts = Some(cc);
        Ok(())
    }

    /// Reconstruct explicit rows from the statistics, using the rightmost
    /// column of each tuple. Ordered statistics follow the order vector;
    /// unordered ones emit each tuple `counts[i]` times. Category labels
    /// cannot be recovered.
    ///
    /// # Errors
    ///
    /// Requires statistics and no existing rows or category labels.
    pub fn reconstruct_seqs(&mut self) -> Result<()> {
        if self.seqs.is_some() || self.categories.is_some() {
            return Err(PhyloHmmError::Precondition(
                "reconstruction needs an alignment without rows or category labels".into(),
            ));
        }
        let ss = self.ss.as_ref().ok_or_else(|| {
            PhyloHmmError::Precondition("alignment has no statistics".into())
        })?;
        let nseqs = self.nseqs();
        let mut seqs = vec![Vec::with_capacity(self.length); nseqs];
        match &ss.tuple_idx {
            None => {
                for i in 0..ss.ntuples() {
                    let n = ss.counts[i].round().max(0.0) as usize;
                    for _ in 0..n {
                        for (k, row) in seqs.iter_mut().enumerate() {
                            row.push(ss.col_char(i, k, 0, nseqs));
                        }
                    }
                }
            }
            Some(order) => {
                for slot in order.iter().take(self.length) {
                    for (k, row) in seqs.iter_mut().enumerate() {
                        row.push(match slot {
                            Some(t) => ss.col_char(*t, k, 0, nseqs),
                            None => GAP_CHAR,
                        });
                    }
                }
            }
        }
        if seqs.first().map_or(0, |s| s.len()) != self.length {
            return Err(PhyloHmmError::DimensionMismatch(format!(
                "statistics describe {} columns but alignment length is {}",
                seqs.first().map_or(0, |s| s.len()),
                self.length
            )));
        }
        self.seqs = Some(seqs);
        Ok(())
    }

    /// An alignment over the same rows with statistics of a different
    /// tuple size. Category labels are shifted left by `col_offset`; the
    /// vacated tail is labelled 0. Rows are reconstructed first when only
    /// statistics are available.
    pub fn alt_tuple_size(
        &mut self,
        new_tuple_size: usize,
        store_order: bool,
        col_offset: usize,
    ) -> Result<Alignment> {
        if self.seqs.is_none() {
            self.reconstruct_seqs()?;
        }
        let seqs = self.seqs.clone().ok_or_else(|| {
            PhyloHmmError::Precondition("alignment has no sequences".into())
        })?;
        let mut alt = Alignment::new(self.names.clone(), seqs, self.alphabet.clone())?;
        alt.ncats = self.ncats;
        alt.idx_offset = self.idx_offset;
        if let Some(cats) = &self.categories {
            let mut shifted = vec![0; self.length];
            for (i, c) in shifted.iter_mut().enumerate() {
                if let Some(&v) = cats.get(i + col_offset) {
                    *c = v;
                }
            }
            alt.categories = Some(shifted);
        }
        alt.build_suff_stats(new_tuple_size, store_order)?;
        Ok(alt)
    }

    /// Frequencies of the `A^tuple_size` tuple states observed along rows,
    /// weighted by tuple counts (restricted to category `cat` when given).
    /// Tuples containing gaps or missing data are skipped. Falls back to the
    /// uniform distribution when nothing is observed.
    ///
    /// # Errors
    ///
    /// Requires statistics whose tuple size is at least `tuple_size`.
    pub fn tuple_freqs(&self, tuple_size: usize, cat: Option<usize>) -> Result<Vec<f64>> {
        let ss = self.ss.as_ref().ok_or_else(|| {
            PhyloHmmError::Precondition("alignment has no statistics".into())
        })?;
        if tuple_size == 0 || tuple_size > ss.tuple_size {
            return Err(PhyloHmmError::DimensionMismatch(format!(
                "cannot count {}-tuples in statistics of tuple size {}",
                tuple_size, ss.tuple_size
            )));
        }
        let a = self.alphabet.size();
        let nstates = int_pow(a, tuple_size);
        let nseqs = self.nseqs();
        let weights: &[f64] = match cat {
            Some(c) => ss
                .cat_counts
                .as_ref()
                .and_then(|cc| cc.get(c))
                .ok_or_else(|| {
                    PhyloHmmError::Precondition(format!("no counts for category {c}"))
                })?,
            None => &ss.counts,
        };
        let mut freqs = vec![0.0; nstates];
        for (i, &w) in weights.iter().enumerate() {
            if w == 0.0 {
                continue;
            }
            'seq: for j in 0..nseqs {
                let mut state = 0;
                for k in 0..tuple_size {
                    let offset = -((tuple_size - 1 - k) as i64);
                    match self.alphabet.index_of(ss.col_char(i, j, offset, nseqs)) {
                        Some(d) => state = state * a + d,
                        None => continue 'seq,
                    }
                }
                freqs[state] += w;
            }
        }
        let total: f64 = freqs.iter().sum();
        if total > 0.0 {
            freqs.iter_mut().for_each(|f| *f /= total);
        } else {
            freqs.iter_mut().for_each(|f| *f = 1.0 / nstates as f64);
        }
        Ok(freqs)
    }
}

fn lookup_or_insert(
    ss: &mut SufficientStats,
    hash: &mut TupleHash,
    key: &[u8],
    no_growth: bool,
) -> Result<usize> {
    if let Some(&idx) = hash.get(key) {
        return Ok(idx);
    }
    if ss.ntuples() + 1 > ss.alloc_ntuples {
        if no_growth {
            return Err(PhyloHmmError::Capacity(format!(
                "tuple table of {} slots is full and cannot grow at an index offset",
                ss.alloc_ntuples
            )));
        }
        let needed = ss.ntuples() + 1;
        let len = ss.alloc_len;
        ss.realloc(needed, len);
    }
    let idx = ss.push_tuple(key.to_vec());
    hash.insert(key.to_vec(), idx);
    Ok(idx)
}

fn set_order(ss: &mut SufficientStats, pos: usize, value: Option<usize>) {
    if let Some(order) = ss.tuple_idx.as_mut() {
        if pos >= order.len() {
            order.resize(pos + 1, None);
            ss.alloc_len = order.len();
        }
        order[pos] = value;
    }
}
