//! Linear Kalman filter over fixed-size arrays.
//!
//! `N` is the state dimension and `M` the measurement dimension. All
//! matrices are row-major `[[f32; cols]; rows]` owned by the filter, so
//! each instance is fully independent.

use thiserror::Error;

pub type Matrix<const R: usize, const C: usize> = [[f32; C]; R];

/// Pivots smaller than this are treated as zero during inversion.
const SINGULAR_PIVOT: f32 = 1e-12;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KalmanError {
    #[error("innovation covariance is singular")]
    SingularInnovation,
}

#[derive(Debug, Clone)]
pub struct KalmanFilter<const N: usize, const M: usize> {
    /// Posterior state estimate `x`.
    pub state: [f32; N],
    /// Posterior error covariance `P`.
    pub covariance: Matrix<N, N>,
    /// State transition `F`.
    pub transition: Matrix<N, N>,
    /// Measurement model `H`.
    pub measurement: Matrix<M, N>,
    /// Process noise `Q`.
    pub process_noise: Matrix<N, N>,
    /// Measurement noise `R`.
    pub measurement_noise: Matrix<M, M>,
}

impl<const N: usize, const M: usize> KalmanFilter<N, M> {
    /// Filter with zero state, identity `P`, `F`, `Q`, `R` and a zero `H`.
    pub fn new() -> Self {
        Self {
            state: [0.0; N],
            covariance: identity(),
            transition: identity(),
            measurement: [[0.0; N]; M],
            process_noise: identity(),
            measurement_noise: identity(),
        }
    }

    /// Time update: `x = F x`, `P = F P Fᵀ + Q`.
    pub fn predict(&mut self) -> &[f32; N] {
        self.state = mat_vec(&self.transition, &self.state);
        let fp = mat_mul(&self.transition, &self.covariance);
        self.covariance = add(&mat_mul(&fp, &transpose(&self.transition)), &self.process_noise);
        &self.state
    }

    /// Measurement update with observation `z`.
    ///
    /// `K = P Hᵀ (H P Hᵀ + R)⁻¹`, `x = x + K (z - H x)`, `P = P - K H P`.
    pub fn correct(&mut self, z: &[f32; M]) -> Result<&[f32; N], KalmanError> {
        let ht = transpose(&self.measurement);
        let pht = mat_mul(&self.covariance, &ht);
        let innovation_cov = add(&mat_mul(&self.measurement, &pht), &self.measurement_noise);
        let inv = invert(&innovation_cov).ok_or(KalmanError::SingularInnovation)?;
        let gain = mat_mul(&pht, &inv);

        let predicted = mat_vec(&self.measurement, &self.state);
        let mut residual = [0.0f32; M];
        for i in 0..M {
            residual[i] = z[i] - predicted[i];
        }
        let delta = mat_vec(&gain, &residual);
        for (x, d) in self.state.iter_mut().zip(delta) {
            *x += d;
        }

        let hp = mat_mul(&self.measurement, &self.covariance);
        self.covariance = sub(&self.covariance, &mat_mul(&gain, &hp));
        Ok(&self.state)
    }
}

impl<const N: usize, const M: usize> Default for KalmanFilter<N, M> {
    fn default() -> Self {
        Self::new()
    }
}

pub fn identity<const N: usize>() -> Matrix<N, N> {
    diagonal(1.0)
}

pub fn diagonal<const N: usize>(value: f32) -> Matrix<N, N> {
    let mut m = [[0.0; N]; N];
    for (i, row) in m.iter_mut().enumerate() {
        row[i] = value;
    }
    m
}

pub fn transpose<const R: usize, const C: usize>(a: &Matrix<R, C>) -> Matrix<C, R> {
    let mut t = [[0.0; R]; C];
    for i in 0..R {
        for j in 0..C {
            t[j][i] = a[i][j];
        }
    }
    t
}

pub fn mat_mul<const R: usize, const K: usize, const C: usize>(
    a: &Matrix<R, K>,
    b: &Matrix<K, C>,
) -> Matrix<R, C> {
    let mut out = [[0.0; C]; R];
    for i in 0..R {
        for j in 0..C {
            let mut acc = 0.0;
            for k in 0..K {
                acc += a[i][k] * b[k][j];
            }
            out[i][j] = acc;
        }
    }
    out
}

pub fn mat_vec<const R: usize, const C: usize>(a: &Matrix<R, C>, v: &[f32; C]) -> [f32; R] {
    let mut out = [0.0; R];
    for (o, row) in out.iter_mut().zip(a) {
        *o = row.iter().zip(v).map(|(x, y)| x * y).sum();
    }
    out
}

fn add<const R: usize, const C: usize>(a: &Matrix<R, C>, b: &Matrix<R, C>) -> Matrix<R, C> {
    let mut out = *a;
    for (row, brow) in out.iter_mut().zip(b) {
        for (x, y) in row.iter_mut().zip(brow) {
            *x += y;
        }
    }
    out
}

fn sub<const R: usize, const C: usize>(a: &Matrix<R, C>, b: &Matrix<R, C>) -> Matrix<R, C> {
    let mut out = *a;
    for (row, brow) in out.iter_mut().zip(b) {
        for (x, y) in row.iter_mut().zip(brow) {
            *x -= y;
        }
    }
    out
}

/// Gauss-Jordan inversion with partial pivoting. `None` if singular.
#[allow(clippy::needless_range_loop)]
pub fn invert<const N: usize>(a: &Matrix<N, N>) -> Option<Matrix<N, N>> {
    let mut m = *a;
    let mut inv: Matrix<N, N> = identity();

    for col in 0..N {
        let mut pivot_row = col;
        let mut pivot_val = m[col][col].abs();
        for row in (col + 1)..N {
            if m[row][col].abs() > pivot_val {
                pivot_val = m[row][col].abs();
                pivot_row = row;
            }
        }
        if pivot_val < SINGULAR_PIVOT {
            return None;
        }
        m.swap(col, pivot_row);
        inv.swap(col, pivot_row);

        let pivot = m[col][col];
        for j in 0..N {
            m[col][j] /= pivot;
            inv[col][j] /= pivot;
        }

        for row in 0..N {
            if row == col {
                continue;
            }
            let factor = m[row][col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..N {
                m[row][j] -= factor * m[col][j];
                inv[row][j] -= factor * inv[col][j];
            }
        }
    }

    Some(inv)
}
