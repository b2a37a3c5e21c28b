// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that are
// used in one file.

use thiserror::Error;

/// Haploid allele codes. Each nibble of a genotype byte holds one of these.
pub const ALLELE_A: u8 = 0;
pub const ALLELE_C: u8 = 1;
pub const ALLELE_G: u8 = 2;
pub const ALLELE_T: u8 = 3;
pub const ALLELE_INSERTION: u8 = 4;
pub const ALLELE_DELETION: u8 = 5;
pub const ALLELE_N: u8 = 6;
/// A missing haploid allele. Dominates every comparison it takes part in.
pub const UNKNOWN_ALLELE: u8 = 7;

/// The fully-missing diploid call: both nibbles are [`UNKNOWN_ALLELE`].
pub const UNKNOWN_GENOTYPE: u8 = 0x77;

/// Packs two haploid allele codes into one diploid genotype byte.
/// The first allele lands in bits 4..6, the second in bits 0..2.
#[inline(always)]
pub const fn diploid(a1: u8, a2: u8) -> u8 {
    ((a1 & 0x7) << 4) | (a2 & 0x7)
}

/// The read-only view of genotype data the kinship engine consumes.
///
/// The engine never mutates the source and walks it from many rayon workers
/// at once, hence the `Sync` bound. One byte per taxon per site; nibble
/// encoding per the `ALLELE_*` constants above.
pub trait GenotypeSource: Sync {
    /// Taxa names, in the ordering every site's genotype row follows. The
    /// resulting kinship matrix carries this exact ordering.
    fn taxa(&self) -> &[String];

    fn number_of_taxa(&self) -> usize;

    fn number_of_sites(&self) -> usize;

    /// The diploid genotype byte of every taxon at `site`.
    /// The returned slice has length `number_of_taxa()`.
    fn genotypes_all_taxa(&self, site: usize) -> &[u8];

    /// `(allele, occurrence count)` pairs for `site`, sorted by descending
    /// count. Ties must be broken deterministically so that the major allele
    /// of a site is stable across runs.
    fn allele_frequency_ranks(&self, site: usize) -> Vec<(u8, u64)>;
}

/// Best-effort progress callback. Receives a percentage in `0..=100`; updates
/// come from a relaxed counter shared across work units, so percentages are
/// monotone only approximately.
pub type ProgressFn = dyn Fn(u8) + Sync;

/// Configuration fixed at computation start. Neither field is consulted again
/// once the site range has been split.
#[derive(Debug, Clone)]
pub struct KinshipConfig {
    /// How many of a site's most frequent alleles to evaluate. Each allele
    /// beyond the first becomes its own pseudo-site. Valid range `2..=6`.
    pub max_alleles: usize,
    /// Target number of parallel work units. Only a hint: it sets the floor
    /// below which site ranges are not split further.
    pub work_units: usize,
}

impl Default for KinshipConfig {
    fn default() -> Self {
        Self {
            max_alleles: 6,
            work_units: num_cpus::get(),
        }
    }
}

impl KinshipConfig {
    pub fn validate(&self) -> Result<(), KinshipError> {
        if !(2..=6).contains(&self.max_alleles) {
            return Err(KinshipError::InvalidMaxAlleles(self.max_alleles));
        }
        Ok(())
    }
}

/// Failures of the kinship computation itself. All are raised synchronously
/// and before or during the single fork-join pass; nothing is retried.
#[derive(Error, Debug)]
pub enum KinshipError {
    #[error("max alleles to evaluate must be between 2 and 6 inclusive, got {0}")]
    InvalidMaxAlleles(usize),
    #[error("genotype source has no sites or no taxa; there is no kinship to compute")]
    EmptyGenotypes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diploid_packs_nibbles() {
        assert_eq!(diploid(ALLELE_A, ALLELE_C), 0x01);
        assert_eq!(diploid(ALLELE_T, ALLELE_T), 0x33);
        assert_eq!(diploid(UNKNOWN_ALLELE, UNKNOWN_ALLELE), UNKNOWN_GENOTYPE);
    }

    #[test]
    fn config_bounds_are_closed() {
        for bad in [0, 1, 7, 100] {
            let config = KinshipConfig {
                max_alleles: bad,
                ..KinshipConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(KinshipError::InvalidMaxAlleles(_))
            ));
        }
        for good in [2, 6] {
            let config = KinshipConfig {
                max_alleles: good,
                ..KinshipConfig::default()
            };
            assert!(config.validate().is_ok());
        }
    }
}
