// ========================================================================================
//                              The site block builder
// ========================================================================================
//
// A block bundles up to five pseudo-sites, i.e. (site, allele-rank) pairs, so the
// pairwise kernel can fold a taxon's five 3-bit dosage codes into one 15-bit
// key and resolve a whole block against another taxon with a single table
// lookup. This module turns a run of physical sites into that packed form:
// a 40-slot table of precomputed term products plus one packed code per taxon.

use crate::counts::count_code;
use crate::types::{GenotypeSource, UNKNOWN_ALLELE};

/// Pseudo-sites per block: five 3-bit fields fit a 15-bit lookup key.
pub const PSEUDO_SITES_PER_BLOCK: usize = 5;

/// Term-product slots: 8 per pseudo-site, of which 6 are populated
/// (combination codes 1..=6), and slots 0 and 7 stay zero.
pub const TERM_TABLE_LEN: usize = PSEUDO_SITES_PER_BLOCK * 8;

/// Packed code of a taxon with nothing comparable in the block: all five
/// 3-bit fields hold 7. Freshly built blocks start every taxon here and only
/// comparable pseudo-sites overwrite their field.
pub const BLOCK_INCOMPARABLE: u16 = 0x7FFF;

/// Bit shift of pseudo-site `p`'s 3-bit field within a packed code.
/// Pseudo-site 0 sits in the highest field (bits 12..14).
#[inline(always)]
pub const fn field_shift(pseudo_site: usize) -> u32 {
    ((PSEUDO_SITES_PER_BLOCK - 1 - pseudo_site) * 3) as u32
}

/// One built block, plus how far the site cursor moved to build it.
pub struct SiteBlock {
    /// Precomputed `term[d1] * term[d2]` products, keyed by
    /// `(pseudo_site << 3) | (code(d1) | code(d2))`.
    pub terms: [f32; TERM_TABLE_LEN],
    /// One packed 15-bit dosage code per taxon.
    pub codes: Vec<u16>,
    /// Physical sites consumed. A site expanding to several pseudo-sites
    /// still advances the cursor by one.
    pub sites_consumed: usize,
    /// Sum of `freq * (1 - freq)` over the block's comparable pseudo-sites.
    pub sum_pi: f64,
}

/// Builds one block starting at `start_site`, never reading at or past
/// `fence`.
///
/// Sites are consumed in order; each contributes up to `max_alleles - 1`
/// pseudo-sites (its top frequency ranks; the least frequent allele is
/// redundant, its deviations being determined by the others). A site whose
/// ranks would overflow the remaining slots is deferred whole to the next
/// block. A rank whose allele is Unknown consumes its slot but contributes
/// nothing: no terms, no `sum_pi`, and every taxon's field stays 7.
pub fn build_block<G: GenotypeSource + ?Sized>(
    genotypes: &G,
    start_site: usize,
    fence: usize,
    max_alleles: usize,
) -> SiteBlock {
    let num_taxa = genotypes.number_of_taxa();
    let mut terms = [0.0f32; TERM_TABLE_LEN];
    let mut codes = vec![BLOCK_INCOMPARABLE; num_taxa];
    let mut sum_pi = 0.0f64;

    let mut pseudo_site = 0usize;
    let mut site = start_site;
    while pseudo_site < PSEUDO_SITES_PER_BLOCK && site < fence {
        let ranks = genotypes.allele_frequency_ranks(site);
        let ranks_to_evaluate = ranks.len().saturating_sub(1).min(max_alleles - 1);
        if pseudo_site + ranks_to_evaluate > PSEUDO_SITES_PER_BLOCK {
            // Defer the whole site rather than splitting its ranks across blocks.
            break;
        }

        let total_allele_count: u64 = ranks.iter().map(|&(_, count)| count).sum();
        let calls = genotypes.genotypes_all_taxa(site);

        for &(allele, count) in &ranks[..ranks_to_evaluate] {
            if allele != UNKNOWN_ALLELE {
                let freq = count as f64 / total_allele_count as f64;
                sum_pi += freq * (1.0 - freq);

                // term[d] = d - 2 * freq, the centered dosage deviation.
                let freq_times_2 = (freq * 2.0) as f32;
                let term = [
                    0.0 - freq_times_2,
                    1.0 - freq_times_2,
                    2.0 - freq_times_2,
                ];

                // The six products, slotted by OR of the two one-hot dosage
                // codes: (0,0)->1, (0,1)->3, (0,2)->5, (1,1)->2, (1,2)->6,
                // (2,2)->4.
                let base = pseudo_site << 3;
                terms[base | 1] = term[0] * term[0];
                terms[base | 3] = term[0] * term[1];
                terms[base | 5] = term[0] * term[2];
                terms[base | 2] = term[1] * term[1];
                terms[base | 6] = term[1] * term[2];
                terms[base | 4] = term[2] * term[2];

                let shift = field_shift(pseudo_site);
                let clear = !(0x7u16 << shift) & BLOCK_INCOMPARABLE;
                for (code, &genotype) in codes.iter_mut().zip(calls) {
                    let dosage = count_code(allele, genotype) as u16;
                    *code = (*code & clear) | (dosage << shift);
                }
            }
            pseudo_site += 1;
        }

        site += 1;
    }

    SiteBlock {
        terms,
        codes,
        sites_consumed: site - start_site,
        sum_pi,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::DenseGenotypes;
    use crate::types::{ALLELE_A, ALLELE_C, ALLELE_G, ALLELE_T, diploid};
    use approx::assert_abs_diff_eq;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("taxon{i}")).collect()
    }

    #[test]
    fn biallelic_site_terms_and_codes() {
        // AA, AC, CC: freq(A) = 0.5, terms [-1, 0, 1].
        let genotypes = DenseGenotypes::from_calls(
            names(3),
            vec![
                diploid(ALLELE_A, ALLELE_A),
                diploid(ALLELE_A, ALLELE_C),
                diploid(ALLELE_C, ALLELE_C),
            ],
        )
        .unwrap();

        let block = build_block(&genotypes, 0, 1, 2);
        assert_eq!(block.sites_consumed, 1);
        assert_abs_diff_eq!(block.sum_pi, 0.25);

        // Pseudo-site 0 slots: (0,0)=1, (0,1)=0, (0,2)=-1, (1,1)=0, (1,2)=0, (2,2)=1
        assert_abs_diff_eq!(block.terms[1], 1.0);
        assert_abs_diff_eq!(block.terms[3], 0.0);
        assert_abs_diff_eq!(block.terms[5], -1.0);
        assert_abs_diff_eq!(block.terms[2], 0.0);
        assert_abs_diff_eq!(block.terms[6], 0.0);
        assert_abs_diff_eq!(block.terms[4], 1.0);

        // Dosage codes land in the top field; the other four fields stay 7.
        let shift = field_shift(0);
        assert_eq!(block.codes[0], (4 << shift) | 0x0FFF);
        assert_eq!(block.codes[1], (2 << shift) | 0x0FFF);
        assert_eq!(block.codes[2], (1 << shift) | 0x0FFF);
    }

    #[test]
    fn overflowing_site_is_deferred() {
        // Site 0 is biallelic (1 pseudo-site); site 1 carries all six allele
        // states. With max_alleles = 6 site 1 wants 5 pseudo-sites, which no
        // longer fit, so the block holds only site 0.
        let site0 = vec![
            diploid(ALLELE_A, ALLELE_A),
            diploid(ALLELE_A, ALLELE_C),
            diploid(ALLELE_C, ALLELE_C),
        ];
        let site1 = vec![
            diploid(ALLELE_A, ALLELE_C),
            diploid(ALLELE_G, ALLELE_T),
            diploid(crate::types::ALLELE_INSERTION, crate::types::ALLELE_DELETION),
        ];
        let calls: Vec<u8> = site0.into_iter().chain(site1).collect();
        let genotypes = DenseGenotypes::from_calls(names(3), calls).unwrap();

        let block = build_block(&genotypes, 0, 2, 6);
        assert_eq!(block.sites_consumed, 1);
        assert_abs_diff_eq!(block.sum_pi, 0.25);

        // The deferred site fills the next block with its five ranks.
        let next = build_block(&genotypes, 1, 2, 6);
        assert_eq!(next.sites_consumed, 1);
        // Six alleles, one each: every evaluated freq is 1/6.
        assert_abs_diff_eq!(next.sum_pi, 5.0 * (1.0 / 6.0) * (5.0 / 6.0), epsilon = 1e-12);
    }

    #[test]
    fn empty_range_builds_inert_block() {
        let genotypes = DenseGenotypes::from_calls(names(2), vec![]).unwrap();
        let block = build_block(&genotypes, 0, 0, 2);
        assert_eq!(block.sites_consumed, 0);
        assert_eq!(block.sum_pi, 0.0);
        assert!(block.codes.iter().all(|&c| c == BLOCK_INCOMPARABLE));
        assert!(block.terms.iter().all(|&t| t == 0.0));
    }
}
