use serde::{Deserialize, Serialize};

use pcad_core::{PcadError, Result};

/// Maximum number of Jacobi sweeps before giving up on convergence.
const MAX_SWEEPS: usize = 100;

/// Off-diagonal mass (relative to the total) below which the matrix is
/// treated as diagonal.
const CONVERGENCE_TOLERANCE: f64 = 1e-24;

/// A fitted principal component basis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaFit {
    /// Principal components, one unit vector of length `dim` per component,
    /// ordered by descending variance.
    pub components: Vec<Vec<f64>>,
    /// Fraction of total variance captured by each component.
    pub explained_variance: Vec<f64>,
    /// Column means of the training rows.
    pub mean: Vec<f64>,
    /// Subtract `mean` before projecting and add it back after reconstructing.
    pub center: bool,
}

impl PcaFit {
    /// Number of retained components.
    pub fn k(&self) -> usize {
        self.components.len()
    }

    /// Input dimensionality.
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Project a vector onto the retained components.
    pub fn project(&self, x: &[f64]) -> Vec<f64> {
        self.components
            .iter()
            .map(|pc| {
                pc.iter()
                    .zip(x.iter())
                    .zip(self.mean.iter())
                    .map(|((p, xi), m)| p * if self.center { xi - m } else { *xi })
                    .sum()
            })
            .collect()
    }

    /// Map a projection back into input space.
    pub fn reconstruct(&self, projection: &[f64]) -> Vec<f64> {
        let mut out = if self.center {
            self.mean.clone()
        } else {
            vec![0.0; self.dim()]
        };
        for (pc, y) in self.components.iter().zip(projection.iter()) {
            for (o, p) in out.iter_mut().zip(pc.iter()) {
                *o += y * p;
            }
        }
        out
    }
}

/// Fit PCA on dense rows, keeping the top `k` components.
///
/// Components are eigenvectors of the sample covariance matrix (divisor
/// `max(n - 1, 1)`). Each component is sign-normalized so its entry of
/// largest magnitude is positive.
pub fn fit_pca(rows: &[Vec<f64>], k: usize, center: bool) -> Result<PcaFit> {
    if rows.is_empty() {
        return Err(PcadError::EmptyTrainingSet);
    }
    let dim = rows[0].len();
    if dim == 0 {
        return Err(PcadError::invalid_param("input_col", "vectors must not be empty"));
    }
    if k == 0 {
        return Err(PcadError::invalid_param("k", "must be at least 1"));
    }
    if k > dim {
        return Err(PcadError::invalid_param(
            "k",
            format!("{} exceeds the input dimension {}", k, dim),
        ));
    }
    if let Some((row, r)) = rows.iter().enumerate().find(|(_, r)| r.len() != dim) {
        return Err(PcadError::DimensionMismatch {
            row,
            expected: dim,
            found: r.len(),
        });
    }
    if let Some(row) = rows.iter().position(|r| r.iter().any(|v| !v.is_finite())) {
        return Err(PcadError::NonFinite { row });
    }

    let mean = column_means(rows, dim);
    let cov = covariance(rows, &mean);
    let (eigenvalues, eigenvectors) = symmetric_eigen(cov);

    let mut order: Vec<usize> = (0..dim).collect();
    order.sort_by(|&a, &b| eigenvalues[b].total_cmp(&eigenvalues[a]));

    let total: f64 = eigenvalues.iter().map(|v| v.max(0.0)).sum();
    let mut components = Vec::with_capacity(k);
    let mut explained_variance = Vec::with_capacity(k);

    for &idx in order.iter().take(k) {
        let mut pc: Vec<f64> = (0..dim).map(|row| eigenvectors[row][idx]).collect();
        normalize_sign(&mut pc);
        components.push(pc);
        explained_variance.push(if total > 0.0 {
            eigenvalues[idx].max(0.0) / total
        } else {
            0.0
        });
    }

    Ok(PcaFit {
        components,
        explained_variance,
        mean,
        center,
    })
}

/// Sum of squared differences between two vectors.
#[inline]
pub fn squared_error(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

// ── Internal helpers ─────────────────────────────────────────

fn column_means(rows: &[Vec<f64>], dim: usize) -> Vec<f64> {
    let mut means = vec![0.0; dim];
    for row in rows {
        for (m, x) in means.iter_mut().zip(row.iter()) {
            *m += x;
        }
    }
    let n = rows.len() as f64;
    for m in &mut means {
        *m /= n;
    }
    means
}

fn covariance(rows: &[Vec<f64>], mean: &[f64]) -> Vec<Vec<f64>> {
    let dim = mean.len();
    let mut cov = vec![vec![0.0; dim]; dim];

    for row in rows {
        let centered: Vec<f64> = row.iter().zip(mean.iter()).map(|(x, m)| x - m).collect();
        for i in 0..dim {
            for j in i..dim {
                cov[i][j] += centered[i] * centered[j];
            }
        }
    }

    let denom = (rows.len().saturating_sub(1)).max(1) as f64;
    for i in 0..dim {
        for j in i..dim {
            cov[i][j] /= denom;
            cov[j][i] = cov[i][j];
        }
    }
    cov
}

/// Cyclic Jacobi eigen-decomposition of a symmetric matrix.
///
/// Returns (eigenvalues, eigenvectors) where eigenvector `j` is column `j`
/// of the returned matrix.
fn symmetric_eigen(mut a: Vec<Vec<f64>>) -> (Vec<f64>, Vec<Vec<f64>>) {
    let n = a.len();
    let mut v: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    for _ in 0..MAX_SWEEPS {
        let mut off = 0.0;
        let mut total = 0.0;
        for (i, row) in a.iter().enumerate() {
            for (j, x) in row.iter().enumerate() {
                total += x * x;
                if i != j {
                    off += x * x;
                }
            }
        }
        if off <= CONVERGENCE_TOLERANCE * total.max(f64::MIN_POSITIVE) {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[p][q];
                if apq == 0.0 {
                    continue;
                }

                let theta = (a[q][q] - a[p][p]) / (2.0 * apq);
                let t = if theta.abs() > 1e150 {
                    0.5 / theta
                } else {
                    let sign = if theta >= 0.0 { 1.0 } else { -1.0 };
                    sign / (theta.abs() + (theta * theta + 1.0).sqrt())
                };
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for row in a.iter_mut() {
                    let (akp, akq) = (row[p], row[q]);
                    row[p] = c * akp - s * akq;
                    row[q] = s * akp + c * akq;
                }
                for k in 0..n {
                    let (apk, aqk) = (a[p][k], a[q][k]);
                    a[p][k] = c * apk - s * aqk;
                    a[q][k] = s * apk + c * aqk;
                }
                for row in v.iter_mut() {
                    let (vkp, vkq) = (row[p], row[q]);
                    row[p] = c * vkp - s * vkq;
                    row[q] = s * vkp + c * vkq;
                }
            }
        }
    }

    let eigenvalues = (0..n).map(|i| a[i][i]).collect();
    (eigenvalues, v)
}

/// Flip a vector so its entry of largest magnitude is positive.
fn normalize_sign(v: &mut [f64]) {
    let pivot = v
        .iter()
        .copied()
        .fold(0.0_f64, |best, x| if x.abs() > best.abs() { x } else { best });
    if pivot < 0.0 {
        for x in v.iter_mut() {
            *x = -*x;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }

    /// Points spread along the diagonal y = x with a little orthogonal noise.
    fn diagonal_points() -> Vec<Vec<f64>> {
        (0..20)
            .map(|i| {
                let t = i as f64;
                let jitter = if i % 2 == 0 { 0.01 } else { -0.01 };
                vec![t + jitter, t - jitter]
            })
            .collect()
    }

    #[test]
    fn eigen_of_diagonal_matrix() {
        let (values, vectors) = symmetric_eigen(vec![vec![3.0, 0.0], vec![0.0, 1.0]]);
        assert_close(values[0], 3.0);
        assert_close(values[1], 1.0);
        assert_close(vectors[0][0], 1.0);
        assert_close(vectors[1][1], 1.0);
    }

    #[test]
    fn eigen_of_coupled_matrix() {
        // [[2, 1], [1, 2]] has eigenvalues 3 and 1.
        let (mut values, _) = symmetric_eigen(vec![vec![2.0, 1.0], vec![1.0, 2.0]]);
        values.sort_by(|a, b| b.total_cmp(a));
        assert_close(values[0], 3.0);
        assert_close(values[1], 1.0);
    }

    #[test]
    fn first_component_follows_the_diagonal() {
        let fit = fit_pca(&diagonal_points(), 1, false).unwrap();
        let pc = &fit.components[0];
        let inv_sqrt2 = 1.0 / 2.0_f64.sqrt();

        assert!((pc[0] - inv_sqrt2).abs() < 1e-3, "pc = {:?}", pc);
        assert!((pc[1] - inv_sqrt2).abs() < 1e-3, "pc = {:?}", pc);
        assert!(fit.explained_variance[0] > 0.99);
    }

    #[test]
    fn components_are_orthonormal() {
        let rows = vec![
            vec![2.0, 0.0, 1.0],
            vec![0.0, 1.0, 3.0],
            vec![1.0, 4.0, 0.0],
            vec![5.0, 2.0, 2.0],
            vec![3.0, 3.0, 1.0],
        ];
        let fit = fit_pca(&rows, 3, true).unwrap();

        for i in 0..3 {
            for j in 0..3 {
                let dot: f64 = fit.components[i]
                    .iter()
                    .zip(fit.components[j].iter())
                    .map(|(a, b)| a * b)
                    .sum();
                assert!((dot - if i == j { 1.0 } else { 0.0 }).abs() < 1e-9);
            }
        }
        let total: f64 = fit.explained_variance.iter().sum();
        assert_close(total, 1.0);
        assert!(fit.explained_variance.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn full_rank_reconstruction_is_exact() {
        let rows = vec![vec![1.0, 2.0], vec![3.0, 1.0], vec![0.0, 5.0]];
        for center in [false, true] {
            let fit = fit_pca(&rows, 2, center).unwrap();
            for row in &rows {
                let back = fit.reconstruct(&fit.project(row));
                assert!(squared_error(row, &back) < 1e-18);
            }
        }
    }

    #[test]
    fn off_axis_point_has_larger_error() {
        let fit = fit_pca(&diagonal_points(), 1, false).unwrap();
        let on_line = vec![5.0, 5.0];
        let off_line = vec![5.0, -5.0];

        let e_on = squared_error(&on_line, &fit.reconstruct(&fit.project(&on_line)));
        let e_off = squared_error(&off_line, &fit.reconstruct(&fit.project(&off_line)));
        assert!(e_on < 1e-3);
        assert!(e_off > 40.0);
    }

    #[test]
    fn sign_is_deterministic() {
        let mut v = vec![0.2, -0.9, 0.1];
        normalize_sign(&mut v);
        assert_eq!(v, vec![-0.2, 0.9, -0.1]);
    }

    #[test]
    fn single_row_fits_without_dividing_by_zero() {
        let fit = fit_pca(&[vec![1.0, 2.0]], 1, false).unwrap();
        assert_eq!(fit.k(), 1);
        assert_eq!(fit.explained_variance, vec![0.0]);
    }

    #[test]
    fn rejects_bad_k_and_ragged_rows() {
        let rows = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        assert!(matches!(fit_pca(&rows, 0, false), Err(PcadError::InvalidParam { .. })));
        assert!(matches!(fit_pca(&rows, 3, false), Err(PcadError::InvalidParam { .. })));
        assert!(matches!(fit_pca(&[], 1, false), Err(PcadError::EmptyTrainingSet)));

        let ragged = vec![vec![1.0, 2.0], vec![3.0]];
        assert!(matches!(
            fit_pca(&ragged, 1, false),
            Err(PcadError::DimensionMismatch { row: 1, .. })
        ));
    }

    #[test]
    fn rejects_non_finite_training_rows() {
        let rows = vec![vec![1.0, 1.0], vec![2.0, f64::NAN], vec![3.0, 3.0]];
        assert!(matches!(
            fit_pca(&rows, 1, false),
            Err(PcadError::NonFinite { row: 1 })
        ));

        let rows = vec![vec![1.0, 1.0], vec![2.0, 2.0], vec![f64::INFINITY, 0.0]];
        assert!(matches!(
            fit_pca(&rows, 1, true),
            Err(PcadError::NonFinite { row: 2 })
        ));
    }
}
