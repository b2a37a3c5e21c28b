// ========================================================================================
//                      Minimal genotype and matrix plumbing
// ========================================================================================
//
// The engine consumes genotypes through the `GenotypeSource` trait and emits
// `KinshipMatrix` values; this module supplies the smallest useful endpoints
// for both so the binary and the tests have something real to run against.
// It is plumbing, not a storage engine.
//
// Genotype text format: a header line of tab-separated taxa names, then one
// line per site with one diploid call per taxon. A call is one or two allele
// characters, optionally '/'-separated: `AA`, `A/C`, `T` (homozygous
// shorthand), `NN`. Characters outside {A,C,G,T,+,-} read as Unknown.
//
// Matrix text format: optional `##matrix_type=` and `##sumpk=` header lines,
// a line holding the taxa count, then one `name\tv1\tv2...` row per taxon of
// the full square matrix.

use crate::matrix::{KinshipMatrix, MATRIX_TYPE_CENTERED_IBS, triangular_len};
use crate::types::{
    ALLELE_A, ALLELE_C, ALLELE_G, ALLELE_T, ALLELE_DELETION, ALLELE_INSERTION, GenotypeSource,
    UNKNOWN_ALLELE, diploid,
};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Failures while reading genotype or matrix text files. All carry enough
/// position information to point at the offending line.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("genotype file has no header line of taxa names")]
    MissingHeader,
    #[error("line {line}: expected {expected} genotype calls, found {found}")]
    CallCount {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: cannot parse genotype call {call:?}")]
    BadCall { line: usize, call: String },
    #[error("line {line}: cannot parse {what}: {text:?}")]
    BadField {
        line: usize,
        what: &'static str,
        text: String,
    },
    #[error("matrix row count disagrees with declared taxa count {expected}")]
    RowCount { expected: usize },
    #[error("call byte count {found} is not a multiple of the taxa count {taxa}")]
    RaggedCalls { found: usize, taxa: usize },
}

// ========================================================================================
//                            Dense in-memory genotypes
// ========================================================================================

/// Site-major dense genotype storage: `calls[site * num_taxa + taxon]`.
pub struct DenseGenotypes {
    taxa: Vec<String>,
    calls: Vec<u8>,
    num_sites: usize,
}

impl DenseGenotypes {
    /// Wraps a site-major call buffer. The buffer length must be a multiple
    /// of the taxa count.
    pub fn from_calls(taxa: Vec<String>, calls: Vec<u8>) -> Result<Self, LoadError> {
        let num_taxa = taxa.len();
        if num_taxa == 0 && !calls.is_empty() {
            return Err(LoadError::RaggedCalls {
                found: calls.len(),
                taxa: 0,
            });
        }
        if num_taxa > 0 && calls.len() % num_taxa != 0 {
            return Err(LoadError::RaggedCalls {
                found: calls.len(),
                taxa: num_taxa,
            });
        }
        let num_sites = if num_taxa == 0 { 0 } else { calls.len() / num_taxa };
        Ok(Self {
            taxa,
            calls,
            num_sites,
        })
    }

    /// Keeps only the half-open site range `[start, fence)`. Used to compute
    /// kinship over site subsets that the matrix algebra later recombines.
    pub fn site_subset(&self, start: usize, fence: usize) -> DenseGenotypes {
        let num_taxa = self.taxa.len();
        DenseGenotypes {
            taxa: self.taxa.clone(),
            calls: self.calls[start * num_taxa..fence * num_taxa].to_vec(),
            num_sites: fence - start,
        }
    }
}

impl GenotypeSource for DenseGenotypes {
    fn taxa(&self) -> &[String] {
        &self.taxa
    }

    fn number_of_taxa(&self) -> usize {
        self.taxa.len()
    }

    fn number_of_sites(&self) -> usize {
        self.num_sites
    }

    fn genotypes_all_taxa(&self, site: usize) -> &[u8] {
        let num_taxa = self.taxa.len();
        &self.calls[site * num_taxa..(site + 1) * num_taxa]
    }

    fn allele_frequency_ranks(&self, site: usize) -> Vec<(u8, u64)> {
        let mut counts = [0u64; 8];
        for &genotype in self.genotypes_all_taxa(site) {
            counts[((genotype >> 4) & 0x7) as usize] += 1;
            counts[(genotype & 0x7) as usize] += 1;
        }
        counts[UNKNOWN_ALLELE as usize] = 0;

        let mut ranks: Vec<(u8, u64)> = counts
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count > 0)
            .map(|(allele, &count)| (allele as u8, count))
            .collect();
        // Descending count; ascending allele code breaks ties so the major
        // allele of a site is stable across runs.
        ranks.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranks
    }
}

// ========================================================================================
//                               Genotype text reader
// ========================================================================================

fn allele_code(c: char) -> u8 {
    match c.to_ascii_uppercase() {
        'A' => ALLELE_A,
        'C' => ALLELE_C,
        'G' => ALLELE_G,
        'T' => ALLELE_T,
        '+' => ALLELE_INSERTION,
        '-' => ALLELE_DELETION,
        _ => UNKNOWN_ALLELE,
    }
}

fn parse_call(text: &str, line: usize) -> Result<u8, LoadError> {
    let chars: Vec<char> = text.chars().filter(|&c| c != '/').collect();
    match chars.as_slice() {
        [single] => Ok(diploid(allele_code(*single), allele_code(*single))),
        [first, second] => Ok(diploid(allele_code(*first), allele_code(*second))),
        _ => Err(LoadError::BadCall {
            line,
            call: text.to_string(),
        }),
    }
}

/// Reads the genotype text format described at the top of this module.
pub fn load_genotypes(path: &Path) -> Result<DenseGenotypes, LoadError> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();

    let header = lines.next().ok_or(LoadError::MissingHeader)??;
    let taxa: Vec<String> = header
        .split('\t')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    if taxa.is_empty() {
        return Err(LoadError::MissingHeader);
    }

    let mut calls = Vec::new();
    for (offset, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let line_number = offset + 2;
        let fields: Vec<&str> = line.split('\t').filter(|s| !s.is_empty()).collect();
        if fields.len() != taxa.len() {
            return Err(LoadError::CallCount {
                line: line_number,
                expected: taxa.len(),
                found: fields.len(),
            });
        }
        for field in fields {
            calls.push(parse_call(field, line_number)?);
        }
    }

    DenseGenotypes::from_calls(taxa, calls)
}

// ========================================================================================
//                          Kinship matrix reader / writer
// ========================================================================================

/// Writes `matrix` as annotated square text.
pub fn write_matrix(path: &Path, matrix: &KinshipMatrix) -> Result<(), LoadError> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "##matrix_type={}", matrix.matrix_type())?;
    if let Some(sumpk) = matrix.sumpk() {
        writeln!(writer, "##sumpk={sumpk}")?;
    }
    writeln!(writer, "{}", matrix.number_of_taxa())?;
    for t1 in 0..matrix.number_of_taxa() {
        write!(writer, "{}", matrix.taxa()[t1])?;
        for t2 in 0..matrix.number_of_taxa() {
            write!(writer, "\t{}", matrix.get(t1, t2))?;
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a matrix written by [`write_matrix`]. A file without a `##sumpk`
/// header yields a matrix the algebra will reject, by design.
pub fn load_matrix(path: &Path) -> Result<KinshipMatrix, LoadError> {
    let reader = BufReader::new(File::open(path)?);
    let mut matrix_type = MATRIX_TYPE_CENTERED_IBS.to_string();
    let mut sumpk = None;
    let mut declared_taxa: Option<usize> = None;

    let mut taxa = Vec::new();
    let mut values = Vec::new();

    for (offset, line) in reader.lines().enumerate() {
        let line = line?;
        let line_number = offset + 1;
        if line.trim().is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("##") {
            if let Some(value) = rest.strip_prefix("matrix_type=") {
                matrix_type = value.trim().to_string();
            } else if let Some(value) = rest.strip_prefix("sumpk=") {
                sumpk = Some(value.trim().parse::<f64>().map_err(|_| {
                    LoadError::BadField {
                        line: line_number,
                        what: "sumpk annotation",
                        text: value.to_string(),
                    }
                })?);
            }
            continue;
        }
        if declared_taxa.is_none() {
            declared_taxa = Some(line.trim().parse::<usize>().map_err(|_| {
                LoadError::BadField {
                    line: line_number,
                    what: "taxa count",
                    text: line.trim().to_string(),
                }
            })?);
            continue;
        }

        let num_taxa = declared_taxa.unwrap_or(0);
        let mut fields = line.split('\t');
        let name = fields.next().unwrap_or("").to_string();
        let row: Vec<f64> = fields
            .map(|f| {
                f.parse::<f64>().map_err(|_| LoadError::BadField {
                    line: line_number,
                    what: "matrix value",
                    text: f.to_string(),
                })
            })
            .collect::<Result<_, _>>()?;
        if row.len() != num_taxa {
            return Err(LoadError::CallCount {
                line: line_number,
                expected: num_taxa,
                found: row.len(),
            });
        }
        // Keep only the upper-triangle part of this row.
        let t1 = taxa.len();
        if t1 >= num_taxa {
            return Err(LoadError::RowCount { expected: num_taxa });
        }
        values.extend_from_slice(&row[t1..]);
        taxa.push(name);
    }

    let num_taxa = declared_taxa.ok_or(LoadError::MissingHeader)?;
    if taxa.len() != num_taxa || values.len() != triangular_len(num_taxa) {
        return Err(LoadError::RowCount { expected: num_taxa });
    }

    KinshipMatrix::from_parts(taxa, values, matrix_type, sumpk)
        .map_err(|_| LoadError::RowCount { expected: num_taxa })
}
