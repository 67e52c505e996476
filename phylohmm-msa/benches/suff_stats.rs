use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use phylohmm_msa::{Alignment, Alphabet};

fn random_alignment(nseqs: usize, len: usize) -> Alignment {
    let bases = [b'A', b'C', b'G', b'T'];
    let mut state: u64 = 42;
    let mut seqs = Vec::with_capacity(nseqs);
    for _ in 0..nseqs {
        let mut seq = Vec::with_capacity(len);
        for _ in 0..len {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            seq.push(bases[((state >> 33) % 4) as usize]);
        }
        seqs.push(seq);
    }
    let names = (0..nseqs).map(|i| format!("seq_{}", i)).collect();
    Alignment::new(names, seqs, Alphabet::dna()).unwrap()
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("suff_stats_build");
    for &tuple_size in &[1usize, 2, 3] {
        let msa = random_alignment(8, 100_000);
        group.bench_with_input(BenchmarkId::new("ordered", tuple_size), &tuple_size, |b, &t| {
            b.iter(|| {
                let mut m = msa.clone();
                m.build_suff_stats(black_box(t), true).unwrap();
                m
            })
        });
    }
    group.finish();
}

fn bench_reverse_compl(c: &mut Criterion) {
    let mut msa = random_alignment(8, 100_000);
    msa.build_suff_stats(2, true).unwrap();
    msa.seqs = None;
    c.bench_function("reverse_compl_suff_stats", |b| {
        b.iter(|| {
            let mut m = msa.clone();
            m.reverse_compl_suff_stats().unwrap();
            m
        })
    });
}

criterion_group!(benches, bench_build, bench_reverse_compl);
criterion_main!(benches);
