// ========================================================================================
//                        Precalculated allele-count codes
// ========================================================================================
//
// A 512-entry table mapping (major allele, diploid genotype) to a one-hot
// dosage code, indexed by `(major << 6) | (allele1 << 3) | allele2`. The codes
// are deliberately one-hot within 3 bits so that ORing two taxa's codes yields
// a unique combination key for the pairwise kernel:
//
//   0b100 (4)  two copies of the major allele
//   0b010 (2)  one copy
//   0b001 (1)  zero copies
//   0b111 (7)  incomparable: major allele unknown, or the call fully missing
//
// 7 ORed with anything stays 7, which steers pairwise lookups into answer-table
// slots that are zero by construction.

use crate::types::UNKNOWN_ALLELE;

pub const DOSAGE_HOM_MAJOR: u8 = 4;
pub const DOSAGE_HET: u8 = 2;
pub const DOSAGE_HOM_MINOR: u8 = 1;
pub const DOSAGE_INCOMPARABLE: u8 = 7;

pub static ALLELE_COUNT_CODES: [u8; 512] = build_table();

const fn build_table() -> [u8; 512] {
    let mut table = [0u8; 512];
    let mut major = 0u8;
    while major < 8 {
        let mut a1 = 0u8;
        while a1 < 8 {
            let mut a2 = 0u8;
            while a2 < 8 {
                let index = ((major as usize) << 6) | ((a1 as usize) << 3) | a2 as usize;
                table[index] = if major == UNKNOWN_ALLELE
                    || (a1 == UNKNOWN_ALLELE && a2 == UNKNOWN_ALLELE)
                {
                    DOSAGE_INCOMPARABLE
                } else if a1 == major && a2 == major {
                    DOSAGE_HOM_MAJOR
                } else if a1 == major || a2 == major {
                    DOSAGE_HET
                } else {
                    DOSAGE_HOM_MINOR
                };
                a2 += 1;
            }
            a1 += 1;
        }
        major += 1;
    }
    table
}

/// Dosage code for one taxon's genotype byte against a site's major allele.
/// `(genotype & 0x70) >> 1` places the high nibble at bits 3..5 and
/// `genotype & 0x7` the low nibble at bits 0..2, matching the table layout.
#[inline(always)]
pub fn count_code(major_allele: u8, genotype: u8) -> u8 {
    let index = (((major_allele & 0x7) as usize) << 6)
        | (((genotype & 0x70) as usize) >> 1)
        | ((genotype & 0x7) as usize);
    ALLELE_COUNT_CODES[index]
}
