// ========================================================================================
//                      The fork-join site-range pipeline
// ========================================================================================
//
// Orchestrates the whole computation: recursively halves the site range into
// independent work units, runs the block builder and pairwise kernel
// sequentially inside each leaf, and merges the per-unit accumulators on the
// way back up. Units share nothing mutable except a relaxed progress counter;
// the final join is the only suspension point, and there is no cancellation:
// once started, the computation runs to completion.

use crate::block::{self, PSEUDO_SITES_PER_BLOCK};
use crate::kernel::{self, ANSWER_TABLE_LEN};
use crate::matrix::KinshipMatrix;
use crate::types::{GenotypeSource, KinshipConfig, KinshipError, ProgressFn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// Site ranges below this length are never split, whatever the parallelism
/// hint says; smaller units cannot amortize the per-block answer-table
/// expansion.
const MIN_SITES_PER_UNIT: usize = 1000;

/// Computes the Endelman centered-IBS kinship matrix over every pair of taxa
/// in `genotypes`. Missing calls are ignored. See Endelman & Jannink (2012),
/// equation 13.
///
/// `progress`, when given, receives best-effort percentages in `0..=100` as
/// work units retire sites.
pub fn compute_kinship<G: GenotypeSource>(
    genotypes: &G,
    config: &KinshipConfig,
    progress: Option<&ProgressFn>,
) -> Result<KinshipMatrix, KinshipError> {
    config.validate()?;

    let num_taxa = genotypes.number_of_taxa();
    let num_sites = genotypes.number_of_sites();
    if num_taxa == 0 || num_sites == 0 {
        return Err(KinshipError::EmptyGenotypes);
    }

    let work_units = config.work_units.max(1);
    log_time_estimate(num_taxa, num_sites, work_units);
    let started = Instant::now();

    let sites_processed = AtomicUsize::new(0);
    let context = ComputeContext {
        genotypes,
        num_taxa,
        num_sites,
        max_alleles: config.max_alleles,
        min_sites_per_unit: (num_sites / work_units).max(MIN_SITES_PER_UNIT),
        sites_processed: &sites_processed,
        progress,
    };

    let accumulator = reduce_range(
        &context,
        SiteRange {
            start: 0,
            fence: num_sites,
        },
    )
    .ok_or(KinshipError::EmptyGenotypes)?;

    let elapsed_minutes = started.elapsed().as_secs() / 60;
    if elapsed_minutes < 60 {
        log::info!("compute_kinship: actual time: {elapsed_minutes} minutes");
    } else {
        log::info!(
            "compute_kinship: actual time: {} hours {} minutes",
            elapsed_minutes / 60,
            elapsed_minutes % 60
        );
    }

    Ok(KinshipMatrix::from_accumulator(
        genotypes.taxa().to_vec(),
        &accumulator.distances,
        accumulator.sum_pi,
    ))
}

/// Coarse operator-facing estimate, derived from the O(N^2 * S) pair-site
/// count and an assumed per-core comparison throughput. A log line, never a
/// scheduling input.
fn log_time_estimate(num_taxa: usize, num_sites: usize, work_units: usize) {
    let pair_sites =
        num_taxa as f64 * (num_taxa as f64 + 1.0) / 2.0 * num_sites as f64 / work_units as f64;
    let estimated_minutes = (pair_sites / 85_000_000_000.0).round() as u64;
    if estimated_minutes < 60 {
        log::info!("compute_kinship: estimated time: {estimated_minutes} minutes");
    } else {
        log::info!(
            "compute_kinship: estimated time: {} hours {} minutes",
            estimated_minutes / 60,
            estimated_minutes % 60
        );
    }
}

/// A half-open range of site indices.
#[derive(Debug, Clone, Copy)]
struct SiteRange {
    start: usize,
    fence: usize,
}

impl SiteRange {
    #[inline]
    fn len(&self) -> usize {
        self.fence - self.start
    }
}

/// Everything a work unit needs, shared read-only across the fork-join tree.
struct ComputeContext<'a, G: GenotypeSource> {
    genotypes: &'a G,
    num_taxa: usize,
    num_sites: usize,
    max_alleles: usize,
    min_sites_per_unit: usize,
    /// Relaxed diagnostic counter; lost updates only blur the progress bar.
    sites_processed: &'a AtomicUsize,
    progress: Option<&'a ProgressFn>,
}

/// Accumulated state owned by exactly one work unit until merged.
struct PartialAccumulator {
    /// Upper triangle, flattened row-major over `t1 <= t2`;
    /// length `num_taxa * (num_taxa + 1) / 2`.
    distances: Vec<f32>,
    sum_pi: f64,
}

impl PartialAccumulator {
    fn new(num_taxa: usize) -> Self {
        Self {
            distances: vec![0.0; num_taxa * (num_taxa + 1) / 2],
            sum_pi: 0.0,
        }
    }

    /// Elementwise add: associative and commutative, so the reduction is
    /// deterministic up to float rounding regardless of split points.
    fn merge(&mut self, other: &PartialAccumulator) {
        debug_assert_eq!(self.distances.len(), other.distances.len());
        for (mine, theirs) in self.distances.iter_mut().zip(&other.distances) {
            *mine += theirs;
        }
        self.sum_pi += other.sum_pi;
    }
}

/// Recursively splits `range` at the midpoint until units drop to the split
/// floor, processes leaves, and merges sibling results. `None` means the
/// range held no work at all.
fn reduce_range<G: GenotypeSource>(
    context: &ComputeContext<'_, G>,
    range: SiteRange,
) -> Option<PartialAccumulator> {
    if range.len() == 0 {
        return None;
    }
    if range.len() > context.min_sites_per_unit {
        let mid = range.start + range.len() / 2;
        let (left, right) = rayon::join(
            || {
                reduce_range(
                    context,
                    SiteRange {
                        start: range.start,
                        fence: mid,
                    },
                )
            },
            || {
                reduce_range(
                    context,
                    SiteRange {
                        start: mid,
                        fence: range.fence,
                    },
                )
            },
        );
        return match (left, right) {
            (Some(mut a), Some(b)) => {
                a.merge(&b);
                Some(a)
            }
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        };
    }
    Some(process_range(context, range))
}

/// Runs the block/kernel pipeline sequentially over one leaf range.
fn process_range<G: GenotypeSource>(
    context: &ComputeContext<'_, G>,
    range: SiteRange,
) -> PartialAccumulator {
    let mut accumulator = PartialAccumulator::new(context.num_taxa);

    // Answer tables are the unit's scratch space, allocated once and
    // overwritten for every block trio.
    let mut answers1 = vec![0.0f32; ANSWER_TABLE_LEN];
    let mut answers2 = vec![0.0f32; ANSWER_TABLE_LEN];
    let mut answers3 = vec![0.0f32; ANSWER_TABLE_LEN];

    let reporting_chunk = (range.len() / 10).max(100);
    let mut site = range.start;
    while site < range.fence {
        let chunk_fence = (site + reporting_chunk).min(range.fence);
        let chunk_start = site;

        while site < chunk_fence {
            // Three blocks per iteration. Blocks are bounded by the range
            // fence, not the reporting chunk, so a trio may overrun the
            // chunk; the progress count below accounts for the overrun.
            let block1 = block::build_block(context.genotypes, site, range.fence, context.max_alleles);
            site += block1.sites_consumed;
            let block2 = block::build_block(context.genotypes, site, range.fence, context.max_alleles);
            site += block2.sites_consumed;
            let block3 = block::build_block(context.genotypes, site, range.fence, context.max_alleles);
            site += block3.sites_consumed;

            accumulator.sum_pi += block1.sum_pi + block2.sum_pi + block3.sum_pi;

            kernel::expand_answers(&block1.terms, &mut answers1);
            kernel::expand_answers(&block2.terms, &mut answers2);
            kernel::expand_answers(&block3.terms, &mut answers3);

            kernel::accumulate_pairs(
                context.num_taxa,
                [&block1.codes, &block2.codes, &block3.codes],
                [&answers1, &answers2, &answers3],
                &mut accumulator.distances,
            );
        }

        let processed = context
            .sites_processed
            .fetch_add(site - chunk_start, Ordering::Relaxed)
            + (site - chunk_start);
        if let Some(report) = context.progress {
            let percent = (processed as f64 / context.num_sites as f64 * 100.0) as u64;
            report(percent.min(100) as u8);
        }
    }

    accumulator
}

/// Compile-time guard: the answer table must cover every packed code five
/// 3-bit fields can express.
const _: () = assert!(ANSWER_TABLE_LEN == 1 << (PSEUDO_SITES_PER_BLOCK * 3));

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::DenseGenotypes;
    use crate::types::{ALLELE_A, ALLELE_C, diploid};
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn random_genotypes(num_taxa: usize, num_sites: usize, seed: u64) -> DenseGenotypes {
        let mut rng = StdRng::seed_from_u64(seed);
        let taxa = (0..num_taxa).map(|i| format!("taxon{i}")).collect();
        let mut calls = Vec::with_capacity(num_taxa * num_sites);
        for _ in 0..num_sites {
            for _ in 0..num_taxa {
                // Mostly biallelic with occasional missing data.
                let byte = if rng.gen_bool(0.05) {
                    crate::types::UNKNOWN_GENOTYPE
                } else {
                    diploid(
                        if rng.gen_bool(0.7) { ALLELE_A } else { ALLELE_C },
                        if rng.gen_bool(0.7) { ALLELE_A } else { ALLELE_C },
                    )
                };
                calls.push(byte);
            }
        }
        DenseGenotypes::from_calls(taxa, calls).unwrap()
    }

    fn context<'a>(
        genotypes: &'a DenseGenotypes,
        counter: &'a AtomicUsize,
    ) -> ComputeContext<'a, DenseGenotypes> {
        ComputeContext {
            genotypes,
            num_taxa: genotypes.number_of_taxa(),
            num_sites: genotypes.number_of_sites(),
            max_alleles: 6,
            min_sites_per_unit: MIN_SITES_PER_UNIT,
            sites_processed: counter,
            progress: None,
        }
    }

    #[test]
    fn split_points_do_not_change_the_result() {
        let genotypes = random_genotypes(7, 400, 0x51BB);
        let counter = AtomicUsize::new(0);
        let context = context(&genotypes, &counter);

        let whole = process_range(&context, SiteRange { start: 0, fence: 400 });

        for split in [1, 73, 200, 399] {
            let mut left = process_range(&context, SiteRange { start: 0, fence: split });
            let right = process_range(&context, SiteRange { start: split, fence: 400 });
            left.merge(&right);

            assert_abs_diff_eq!(left.sum_pi, whole.sum_pi, epsilon = 1e-9);
            for (merged, reference) in left.distances.iter().zip(&whole.distances) {
                assert_abs_diff_eq!(merged, reference, epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn empty_source_is_an_explicit_error() {
        let genotypes = DenseGenotypes::from_calls(vec!["only".to_string()], vec![]).unwrap();
        let result = compute_kinship(&genotypes, &KinshipConfig::default(), None);
        assert!(matches!(result, Err(KinshipError::EmptyGenotypes)));
    }

    #[test]
    fn invalid_max_alleles_fails_before_computing() {
        let genotypes = random_genotypes(3, 10, 7);
        for bad in [1, 7] {
            let config = KinshipConfig {
                max_alleles: bad,
                ..KinshipConfig::default()
            };
            assert!(matches!(
                compute_kinship(&genotypes, &config, None),
                Err(KinshipError::InvalidMaxAlleles(_))
            ));
        }
    }

    #[test]
    fn progress_reaches_one_hundred() {
        let genotypes = random_genotypes(4, 250, 0xCAFE);
        let last_seen = std::sync::Arc::new(std::sync::Mutex::new(0u8));
        let report = {
            let last_seen = last_seen.clone();
            move |percent: u8| {
                *last_seen.lock().unwrap() = percent;
            }
        };
        compute_kinship(&genotypes, &KinshipConfig::default(), Some(&report)).unwrap();
        assert_eq!(*last_seen.lock().unwrap(), 100);
    }
}
