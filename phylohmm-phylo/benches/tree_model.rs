use criterion::{black_box, criterion_group, criterion_main, Criterion};
use phylohmm_msa::{Alignment, Alphabet};
use phylohmm_phylo::{
    compute_posteriors, em_gradient, log_likelihood, GradientMode, SubstModel, Tree, TreeModel,
};

const NEWICK: &str = "(((a:0.1,b:0.12):0.05,(c:0.2,d:0.08):0.03):0.1,((e:0.15,f:0.11):0.07,(g:0.3,h:0.02):0.04):0.1);";

fn random_alignment(len: usize) -> Alignment {
    let bases = [b'A', b'C', b'G', b'T'];
    let names: Vec<String> = "abcdefgh".chars().map(String::from).collect();
    let mut state: u64 = 7;
    let mut ancestor = Vec::with_capacity(len);
    for _ in 0..len {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        ancestor.push(bases[((state >> 33) % 4) as usize]);
    }
    // mutate about one base in eight per row so columns stay correlated
    let seqs = names
        .iter()
        .map(|_| {
            ancestor
                .iter()
                .map(|&b| {
                    state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                    if (state >> 33) % 8 == 0 {
                        bases[((state >> 40) % 4) as usize]
                    } else {
                        b
                    }
                })
                .collect()
        })
        .collect();
    Alignment::new(names, seqs, Alphabet::dna()).unwrap()
}

fn model(nratecats: usize) -> TreeModel {
    let tree = Tree::from_newick(NEWICK).unwrap();
    let mut tm = TreeModel::new(
        tree,
        Alphabet::dna(),
        SubstModel::Rev,
        vec![0.3, 0.2, 0.2, 0.3],
        nratecats,
        0.7,
    )
    .unwrap();
    tm.set_rate_params(&[1.0, 3.0, 0.8, 1.2, 3.5, 1.0]).unwrap();
    tm
}

fn bench_likelihood(c: &mut Criterion) {
    let mut msa = random_alignment(50_000);
    msa.build_suff_stats(1, false).unwrap();
    let tm = model(4);
    c.bench_function("log_likelihood_rev_gamma4", |b| {
        b.iter(|| log_likelihood(black_box(&tm), &msa, None).unwrap())
    });
    c.bench_function("posteriors_rev_gamma4", |b| {
        b.iter(|| compute_posteriors(black_box(&tm), &msa, None).unwrap())
    });
}

fn bench_gradient(c: &mut Criterion) {
    let mut msa = random_alignment(20_000);
    msa.build_suff_stats(1, false).unwrap();
    let tm = model(1);
    let (_, post) = compute_posteriors(&tm, &msa, None).unwrap();
    let mut group = c.benchmark_group("em_gradient");
    group.bench_function("approximate", |b| {
        b.iter(|| em_gradient(black_box(&tm), &post, GradientMode::Approximate).unwrap())
    });
    group.bench_function("exact", |b| {
        b.iter(|| em_gradient(black_box(&tm), &post, GradientMode::Exact).unwrap())
    });
    group.finish();
}

fn bench_transition_matrices(c: &mut Criterion) {
    let mut tm = model(4);
    c.bench_function("update_transition_matrices", |b| {
        b.iter(|| tm.update_transition_matrices().unwrap())
    });
}

criterion_group!(benches, bench_likelihood, bench_gradient, bench_transition_matrices);
criterion_main!(benches);
