// ========================================================================================
//                     The kernel: pairwise lookup accumulation
// ========================================================================================
//
// This module contains the innermost loop of the engine. For each trio of site
// blocks it first expands the 40-slot term tables into dense answer tables
// covering every possible 15-bit code, then walks all unordered taxon pairs
// doing three table lookups per pair. The lookup key is the bitwise OR of the
// two taxa's packed codes: dosage codes are one-hot per 3-bit field, so the OR
// of two valid codes identifies the pair of dosages uniquely, and the
// incomparable code 7 absorbs anything ORed into it, landing on a slot that is
// zero by construction.

use crate::block::{BLOCK_INCOMPARABLE, TERM_TABLE_LEN};

/// One entry per possible packed dosage code: `2^15`.
pub const ANSWER_TABLE_LEN: usize = 1 << 15;

/// Blocks processed per kernel invocation. The all-incomparable row skip in
/// [`accumulate_pairs`] is only sound across exactly this many blocks at once.
pub const BLOCKS_PER_ITERATION: usize = 3;

/// Expands a block's term table into the full answer table:
/// `answers[code]` is the sum over the five 3-bit fields of `code` of the
/// term product each field selects.
pub fn expand_answers(terms: &[f32; TERM_TABLE_LEN], answers: &mut [f32]) {
    debug_assert_eq!(answers.len(), ANSWER_TABLE_LEN);
    for (code, answer) in answers.iter_mut().enumerate() {
        *answer = terms[(code >> 12) & 0x7]
            + terms[((code >> 9) & 0x7) | 0x8]
            + terms[((code >> 6) & 0x7) | 0x10]
            + terms[((code >> 3) & 0x7) | 0x18]
            + terms[(code & 0x7) | 0x20];
    }
}

/// Adds three blocks' worth of pairwise contributions into the triangular
/// `distances` accumulator (flattened row-major over `t1 <= t2`).
///
/// A taxon whose packed code is [`BLOCK_INCOMPARABLE`] in all three blocks
/// contributes zero to every pair it takes part in, so its whole inner row is
/// skipped by advancing the triangular index directly.
pub fn accumulate_pairs(
    num_taxa: usize,
    codes: [&[u16]; BLOCKS_PER_ITERATION],
    answers: [&[f32]; BLOCKS_PER_ITERATION],
    distances: &mut [f32],
) {
    let [codes1, codes2, codes3] = codes;
    let [answers1, answers2, answers3] = answers;

    let mut index = 0usize;
    for t1 in 0..num_taxa {
        let c1 = codes1[t1];
        let c2 = codes2[t1];
        let c3 = codes3[t1];
        if c1 == BLOCK_INCOMPARABLE && c2 == BLOCK_INCOMPARABLE && c3 == BLOCK_INCOMPARABLE {
            index += num_taxa - t1;
            continue;
        }
        for t2 in t1..num_taxa {
            distances[index] += answers1[(c1 | codes1[t2]) as usize]
                + answers2[(c2 | codes2[t2]) as usize]
                + answers3[(c3 | codes3[t2]) as usize];
            index += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::field_shift;
    use approx::assert_abs_diff_eq;

    fn arbitrary_terms(seed: u64) -> [f32; TERM_TABLE_LEN] {
        use rand::{Rng, SeedableRng, rngs::StdRng};
        let mut rng = StdRng::seed_from_u64(seed);
        let mut terms = [0.0f32; TERM_TABLE_LEN];
        for pseudo_site in 0..5 {
            for combo in 1..=6 {
                terms[(pseudo_site << 3) | combo] = rng.gen_range(-2.0..2.0);
            }
        }
        terms
    }

    #[test]
    fn expansion_matches_field_decomposition() {
        let terms = arbitrary_terms(0x5EED);
        let mut answers = vec![0.0f32; ANSWER_TABLE_LEN];
        expand_answers(&terms, &mut answers);

        for code in [0usize, 1, 0x7FFF, 0x2491, 0x4A52, 0x1234] {
            let mut expected = 0.0f32;
            for pseudo_site in 0..5 {
                let field = (code >> field_shift(pseudo_site)) & 0x7;
                expected += terms[(pseudo_site << 3) | field];
            }
            assert_abs_diff_eq!(answers[code], expected);
        }
    }

    #[test]
    fn incomparable_codes_resolve_to_zero() {
        let terms = arbitrary_terms(0xFACE);
        let mut answers = vec![0.0f32; ANSWER_TABLE_LEN];
        expand_answers(&terms, &mut answers);
        // Slots 0 and 7 of every pseudo-site are never written, so the
        // all-incomparable code must sum to exactly zero.
        assert_eq!(answers[BLOCK_INCOMPARABLE as usize], 0.0);
    }

    #[test]
    fn row_skip_is_equivalent_to_computing_the_row() {
        let terms = arbitrary_terms(0xBEEF);
        let mut answers = vec![0.0f32; ANSWER_TABLE_LEN];
        expand_answers(&terms, &mut answers);

        // Taxon 1 is fully incomparable across all three blocks.
        let codes = vec![0x4924u16, BLOCK_INCOMPARABLE, 0x2492u16];
        let num_taxa = 3;
        let mut with_skip = vec![0.0f32; num_taxa * (num_taxa + 1) / 2];
        accumulate_pairs(
            num_taxa,
            [&codes, &codes, &codes],
            [&answers, &answers, &answers],
            &mut with_skip,
        );

        // Manual per-pair lookups, no skip.
        let mut direct = vec![0.0f32; with_skip.len()];
        let mut index = 0;
        for t1 in 0..num_taxa {
            for t2 in t1..num_taxa {
                direct[index] += 3.0 * answers[(codes[t1] | codes[t2]) as usize];
                index += 1;
            }
        }

        for (a, b) in with_skip.iter().zip(&direct) {
            assert_abs_diff_eq!(a, b);
        }
    }
}
