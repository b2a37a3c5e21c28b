use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use kindred::io::DenseGenotypes;
use kindred::types::{ALLELE_A, ALLELE_C, diploid};
use kindred::{KinshipConfig, compute_kinship};
use rand::{Rng, SeedableRng, rngs::StdRng};

fn random_genotypes(num_taxa: usize, num_sites: usize) -> DenseGenotypes {
    let mut rng = StdRng::seed_from_u64(0x5EED + num_taxa as u64);
    let taxa = (0..num_taxa).map(|i| format!("taxon{i}")).collect();
    let mut calls = Vec::with_capacity(num_taxa * num_sites);
    for _ in 0..num_taxa * num_sites {
        calls.push(diploid(
            if rng.gen_bool(0.7) { ALLELE_A } else { ALLELE_C },
            if rng.gen_bool(0.7) { ALLELE_A } else { ALLELE_C },
        ));
    }
    DenseGenotypes::from_calls(taxa, calls).unwrap()
}

fn benchmark_kinship(c: &mut Criterion) {
    let num_sites = 2000;
    let sizes = [50_usize, 100, 200];
    let sources: Vec<_> = sizes
        .iter()
        .map(|&size| (size, random_genotypes(size, num_sites)))
        .collect();

    let mut group = c.benchmark_group("centered_ibs");
    for (size, genotypes) in sources.iter() {
        let pair_sites = (*size * (*size + 1) / 2 * num_sites) as u64;
        group.throughput(Throughput::Elements(pair_sites));

        group.bench_with_input(BenchmarkId::new("compute", size), genotypes, |b, input| {
            b.iter(|| {
                let matrix =
                    compute_kinship(black_box(input), &KinshipConfig::default(), None).unwrap();
                black_box(matrix);
            });
        });
    }
    group.finish();
}

criterion_group!(centered_ibs, benchmark_kinship);
criterion_main!(centered_ibs);
