use crate::errors::{invalid, EngineResult};

const SYMMETRY_TOLERANCE: f64 = 1e-12;

/// Lower-triangular Cholesky factor of a flavor correlation matrix.
///
/// Multiplying a vector of independent standard normals by L yields normals
/// with the requested correlation. Built once at market initialization.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationFactor {
    n: usize,
    /// Row-major n x n, upper triangle zero
    lower: Vec<f64>,
}

impl CorrelationFactor {
    /// `matrix` is row-major n x n. Must be symmetric, unit-diagonal,
    /// entries in [-1, 1], and positive definite.
    pub fn from_matrix(matrix: &[f64], n: usize) -> EngineResult<Self> {
        if n == 0 || matrix.len() != n * n {
            return Err(invalid(format!(
                "correlation matrix needs {} entries for {n} flavors, got {}",
                n * n,
                matrix.len()
            )));
        }

        for i in 0..n {
            if (matrix[i * n + i] - 1.0).abs() > SYMMETRY_TOLERANCE {
                return Err(invalid(format!("correlation diagonal [{i}] must be 1")));
            }
            for j in 0..n {
                let v = matrix[i * n + j];
                if !v.is_finite() || !(-1.0..=1.0).contains(&v) {
                    return Err(invalid(format!("correlation [{i},{j}]={v} outside [-1, 1]")));
                }
                if (v - matrix[j * n + i]).abs() > SYMMETRY_TOLERANCE {
                    return Err(invalid(format!("correlation matrix not symmetric at [{i},{j}]")));
                }
            }
        }

        let mut lower = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..=i {
                let mut sum = matrix[i * n + j];
                for k in 0..j {
                    sum -= lower[i * n + k] * lower[j * n + k];
                }
                if i == j {
                    if sum <= 0.0 {
                        return Err(invalid("correlation matrix is not positive definite"));
                    }
                    lower[i * n + i] = sum.sqrt();
                } else {
                    lower[i * n + j] = sum / lower[j * n + j];
                }
            }
        }

        Ok(Self { n, lower })
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.n
    }

    /// Correlate independent shocks in place.
    pub fn correlate(&self, shocks: &mut [f64]) {
        debug_assert_eq!(shocks.len(), self.n);
        // Walk rows bottom-up so each row only reads not-yet-overwritten inputs
        for i in (0..self.n).rev() {
            let row = &self.lower[i * self.n..i * self.n + i + 1];
            let mixed: f64 = row.iter().zip(shocks.iter()).map(|(l, z)| l * z).sum();
            shocks[i] = mixed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_noop() {
        let f = CorrelationFactor::from_matrix(&[1.0, 0.0, 0.0, 1.0], 2).unwrap();
        let mut z = [0.7, -1.3];
        f.correlate(&mut z);
        assert_eq!(z, [0.7, -1.3]);
    }

    #[test]
    fn test_two_by_two_factor() {
        let rho: f64 = 0.6;
        let f = CorrelationFactor::from_matrix(&[1.0, rho, rho, 1.0], 2).unwrap();
        let mut z = [1.0, 1.0];
        f.correlate(&mut z);
        assert!((z[0] - 1.0).abs() < 1e-15);
        assert!((z[1] - (rho + (1.0 - rho * rho).sqrt())).abs() < 1e-15);
    }

    #[test]
    fn test_rejects_bad_matrices() {
        // asymmetric
        assert!(CorrelationFactor::from_matrix(&[1.0, 0.5, 0.2, 1.0], 2).is_err());
        // off diagonal
        assert!(CorrelationFactor::from_matrix(&[2.0, 0.0, 0.0, 1.0], 2).is_err());
        // out of range
        assert!(CorrelationFactor::from_matrix(&[1.0, 1.5, 1.5, 1.0], 2).is_err());
        // wrong size
        assert!(CorrelationFactor::from_matrix(&[1.0, 0.0, 0.0], 2).is_err());
        // not positive definite
        let m = [1.0, 0.9, -0.9, 0.9, 1.0, 0.9, -0.9, 0.9, 1.0];
        assert!(CorrelationFactor::from_matrix(&m, 3).is_err());
    }
}
