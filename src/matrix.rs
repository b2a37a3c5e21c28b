// ========================================================================================
//                    Kinship matrix assembly and algebra
// ========================================================================================
//
// The final product of the pipeline: a symmetric taxa-by-taxa matrix stored as
// its upper triangle, annotated with the matrix type and the normalization
// constant `sumpk`. Keeping `sumpk` on the matrix is what makes the algebra
// possible: matrices computed over disjoint site subsets can later be
// recombined (or a subset's contribution removed) as a weighted linear
// combination, without revisiting any genotype.

use thiserror::Error;

/// The only matrix type this crate produces or combines.
pub const MATRIX_TYPE_CENTERED_IBS: &str = "Centered_IBS";

/// Length of the flattened upper triangle for `num_taxa` taxa.
#[inline]
pub const fn triangular_len(num_taxa: usize) -> usize {
    num_taxa * (num_taxa + 1) / 2
}

/// Flat index of `(t1, t2)` with `t1 <= t2` in the row-major upper triangle.
#[inline]
pub const fn triangular_index(num_taxa: usize, t1: usize, t2: usize) -> usize {
    t1 * num_taxa - t1 * (t1 + 1) / 2 + t2
}

/// A symmetric matrix of centered-IBS relatedness coefficients.
#[derive(Debug, Clone)]
pub struct KinshipMatrix {
    taxa: Vec<String>,
    /// Upper triangle, row-major over `t1 <= t2`.
    values: Vec<f64>,
    matrix_type: String,
    /// `2 * total sum of freq * (1 - freq)` over every evaluated pseudo-site.
    /// `None` for matrices read from files written before the annotation
    /// existed; such matrices cannot take part in the algebra.
    sumpk: Option<f64>,
}

impl KinshipMatrix {
    /// Normalizes a pipeline accumulator into final kinship values.
    pub(crate) fn from_accumulator(taxa: Vec<String>, distances: &[f32], sum_pi: f64) -> Self {
        debug_assert_eq!(distances.len(), triangular_len(taxa.len()));
        let sumpk = sum_pi * 2.0;
        let values = distances.iter().map(|&d| d as f64 / sumpk).collect();
        Self {
            taxa,
            values,
            matrix_type: MATRIX_TYPE_CENTERED_IBS.to_string(),
            sumpk: Some(sumpk),
        }
    }

    /// Rebuilds a matrix from stored parts, e.g. when reading a file.
    pub fn from_parts(
        taxa: Vec<String>,
        values: Vec<f64>,
        matrix_type: String,
        sumpk: Option<f64>,
    ) -> Result<Self, CombineError> {
        if values.len() != triangular_len(taxa.len()) {
            return Err(CombineError::TriangleLength {
                expected: triangular_len(taxa.len()),
                found: values.len(),
            });
        }
        Ok(Self {
            taxa,
            values,
            matrix_type,
            sumpk,
        })
    }

    pub fn number_of_taxa(&self) -> usize {
        self.taxa.len()
    }

    pub fn taxa(&self) -> &[String] {
        &self.taxa
    }

    pub fn matrix_type(&self) -> &str {
        &self.matrix_type
    }

    pub fn sumpk(&self) -> Option<f64> {
        self.sumpk
    }

    /// Relatedness of `(t1, t2)` in either order.
    #[inline]
    pub fn get(&self, t1: usize, t2: usize) -> f64 {
        let (low, high) = if t1 <= t2 { (t1, t2) } else { (t2, t1) };
        self.values[triangular_index(self.taxa.len(), low, high)]
    }

    /// Reconstructs the kinship matrix over the union of the inputs' site
    /// sets, provided those sets are disjoint. Each input is weighted by its
    /// own `sumpk`.
    pub fn combine_add(matrices: &[KinshipMatrix]) -> Result<KinshipMatrix, CombineError> {
        let first = matrices.first().ok_or(CombineError::NoMatrices)?;
        let weights = validate_inputs(first.taxa(), matrices, "matrix")?;

        let result_sumpk: f64 = weights.iter().sum();
        let values = (0..triangular_len(first.number_of_taxa()))
            .map(|index| {
                let weighted: f64 = matrices
                    .iter()
                    .zip(&weights)
                    .map(|(m, w)| m.values[index] * w)
                    .sum();
                weighted / result_sumpk
            })
            .collect();

        Ok(KinshipMatrix {
            taxa: first.taxa.clone(),
            values,
            matrix_type: MATRIX_TYPE_CENTERED_IBS.to_string(),
            sumpk: Some(result_sumpk),
        })
    }

    /// Recovers the kinship matrix over the complement site set: `superset`
    /// minus the (disjoint) site sets the `subsets` matrices were computed
    /// over.
    pub fn combine_subtract(
        subsets: &[KinshipMatrix],
        superset: &KinshipMatrix,
    ) -> Result<KinshipMatrix, CombineError> {
        let super_sumpk = validate_inputs(
            superset.taxa(),
            std::slice::from_ref(superset),
            "superset matrix",
        )?[0];
        let subset_weights = validate_inputs(superset.taxa(), subsets, "subset matrix")?;

        let result_sumpk = super_sumpk - subset_weights.iter().sum::<f64>();
        let values = (0..triangular_len(superset.number_of_taxa()))
            .map(|index| {
                let removed: f64 = subsets
                    .iter()
                    .zip(&subset_weights)
                    .map(|(m, w)| m.values[index] * w)
                    .sum();
                (superset.values[index] * super_sumpk - removed) / result_sumpk
            })
            .collect();

        Ok(KinshipMatrix {
            taxa: superset.taxa.clone(),
            values,
            matrix_type: MATRIX_TYPE_CENTERED_IBS.to_string(),
            sumpk: Some(result_sumpk),
        })
    }
}

/// Checks every precondition of the algebra for `matrices` against the
/// reference taxa ordering, returning each input's `sumpk` weight.
fn validate_inputs(
    reference_taxa: &[String],
    matrices: &[KinshipMatrix],
    label: &str,
) -> Result<Vec<f64>, CombineError> {
    let mut weights = Vec::with_capacity(matrices.len());
    for (index, matrix) in matrices.iter().enumerate() {
        if matrix.matrix_type() != MATRIX_TYPE_CENTERED_IBS {
            return Err(CombineError::MatrixType {
                label: format!("{label} {index}"),
                found: matrix.matrix_type().to_string(),
            });
        }
        if matrix.number_of_taxa() != reference_taxa.len() {
            return Err(CombineError::TaxaCount {
                label: format!("{label} {index}"),
                found: matrix.number_of_taxa(),
                expected: reference_taxa.len(),
            });
        }
        for (position, (expected, found)) in
            reference_taxa.iter().zip(matrix.taxa()).enumerate()
        {
            if expected != found {
                return Err(CombineError::TaxonMismatch {
                    label: format!("{label} {index}"),
                    position,
                    found: found.clone(),
                    expected: expected.clone(),
                });
            }
        }
        weights.push(matrix.sumpk().ok_or_else(|| CombineError::MissingSumpk {
            label: format!("{label} {index}"),
        })?);
    }
    Ok(weights)
}

/// Precondition failures of the matrix algebra, each naming the offending
/// input. Raised before any arithmetic happens.
#[derive(Error, Debug)]
pub enum CombineError {
    #[error("no matrices given to combine")]
    NoMatrices,
    #[error("upper triangle must hold {expected} values, found {found}")]
    TriangleLength { expected: usize, found: usize },
    #[error("{label} has matrix type {found:?}; combining requires \"Centered_IBS\"")]
    MatrixType { label: String, found: String },
    #[error("{label} carries no sumpk annotation; it predates the annotation and cannot be combined")]
    MissingSumpk { label: String },
    #[error("{label} has {found} taxa, expected {expected}")]
    TaxaCount {
        label: String,
        found: usize,
        expected: usize,
    },
    #[error("{label} taxon {position} is {found:?}, expected {expected:?}")]
    TaxonMismatch {
        label: String,
        position: usize,
        found: String,
        expected: String,
    },
}
