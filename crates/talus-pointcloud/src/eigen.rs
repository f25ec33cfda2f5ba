//! Symmetric 3x3 eigendecomposition.
//!
//! PCA frames for normal estimation come from the eigendecomposition of
//! small covariance matrices. The classic two-stage approach is used:
//! Householder reduction to tridiagonal form followed by the implicit-shift
//! QL algorithm. Both stages run in f64 internally; covariance matrices of
//! near-coplanar neighbourhoods are badly conditioned in f32.

use glam::{Mat3, Vec3};
use thiserror::Error;

const N: usize = 3;
const MAX_QL_ITERATIONS: usize = 50;

/// Eigendecomposition failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EigenError {
    /// QL iteration did not converge within the iteration cap.
    #[error("eigenvalue iteration exceeded {MAX_QL_ITERATIONS} steps")]
    NotConverged,
}

/// Decomposes a symmetric 3x3 matrix into eigenvalues and eigenvectors.
///
/// Returns `(basis, eigenvalues)` with eigenvalues sorted descending and
/// the basis holding the matching unit eigenvectors as its *rows*, so
/// `basis * v` expresses `v` in the eigenbasis. For a positional covariance
/// matrix the third row (smallest eigenvalue) is the surface normal axis
/// and `basis.transpose()` maps back to world space.
///
/// Only the symmetric part of `m` is read.
pub fn eigen_symmetric(m: Mat3) -> Result<(Mat3, Vec3), EigenError> {
    let cols = m.to_cols_array_2d();
    // v[row][col], symmetrized.
    let mut v = [[0.0f64; N]; N];
    for (r, row) in v.iter_mut().enumerate() {
        for (c, value) in row.iter_mut().enumerate() {
            *value = 0.5 * (cols[c][r] as f64 + cols[r][c] as f64);
        }
    }

    let mut d = [0.0f64; N];
    let mut e = [0.0f64; N];
    tred2(&mut v, &mut d, &mut e);
    tql2(&mut v, &mut d, &mut e)?;

    // Ascending from QL; emit descending.
    let order = [2, 1, 0];
    let eigenvalues = Vec3::new(d[order[0]] as f32, d[order[1]] as f32, d[order[2]] as f32);

    // Row i of the basis is the eigenvector for the i-th largest eigenvalue;
    // eigenvectors sit in the columns of v.
    let row = |j: usize| Vec3::new(v[0][j] as f32, v[1][j] as f32, v[2][j] as f32);
    let basis = Mat3::from_cols(row(order[0]), row(order[1]), row(order[2])).transpose();

    Ok((basis, eigenvalues))
}

/// Householder reduction of a real symmetric matrix to tridiagonal form.
///
/// On exit `d` holds the diagonal, `e` the subdiagonal, and `v` the
/// accumulated orthogonal transformation.
fn tred2(v: &mut [[f64; N]; N], d: &mut [f64; N], e: &mut [f64; N]) {
    for (j, dj) in d.iter_mut().enumerate() {
        *dj = v[N - 1][j];
    }

    for i in (1..N).rev() {
        let mut scale = 0.0;
        let mut h = 0.0;
        for dk in d.iter().take(i) {
            scale += dk.abs();
        }

        if scale == 0.0 {
            e[i] = d[i - 1];
            for j in 0..i {
                d[j] = v[i - 1][j];
                v[i][j] = 0.0;
                v[j][i] = 0.0;
            }
        } else {
            for k in 0..i {
                d[k] /= scale;
                h += d[k] * d[k];
            }

            let f = d[i - 1];
            let mut g = h.sqrt();
            if f > 0.0 {
                g = -g;
            }
            e[i] = scale * g;
            h -= f * g;
            d[i - 1] = f - g;
            e[..i].fill(0.0);

            for j in 0..i {
                let f = d[j];
                v[j][i] = f;
                let mut g = e[j] + v[j][j] * f;
                for k in (j + 1)..i {
                    g += v[k][j] * d[k];
                    e[k] += v[k][j] * f;
                }
                e[j] = g;
            }

            let mut f = 0.0;
            for j in 0..i {
                e[j] /= h;
                f += e[j] * d[j];
            }
            let hh = f / (h + h);
            for j in 0..i {
                e[j] -= hh * d[j];
            }

            for j in 0..i {
                let f = d[j];
                let g = e[j];
                for k in j..i {
                    v[k][j] -= f * e[k] + g * d[k];
                }
                d[j] = v[i - 1][j];
                v[i][j] = 0.0;
            }
        }

        d[i] = h;
    }

    // Accumulate transformations.
    for i in 0..N - 1 {
        v[N - 1][i] = v[i][i];
        v[i][i] = 1.0;
        let h = d[i + 1];
        if h != 0.0 {
            for k in 0..=i {
                d[k] = v[k][i + 1] / h;
            }
            for j in 0..=i {
                let mut g = 0.0;
                for k in 0..=i {
                    g += v[k][i + 1] * v[k][j];
                }
                for k in 0..=i {
                    v[k][j] -= g * d[k];
                }
            }
        }
        for k in 0..=i {
            v[k][i + 1] = 0.0;
        }
    }

    for (j, dj) in d.iter_mut().enumerate() {
        *dj = v[N - 1][j];
        v[N - 1][j] = 0.0;
    }
    v[N - 1][N - 1] = 1.0;
    e[0] = 0.0;
}

/// Implicit-shift QL iteration on a symmetric tridiagonal matrix.
///
/// On exit `d` holds eigenvalues in ascending order and the columns of `v`
/// the corresponding eigenvectors.
fn tql2(v: &mut [[f64; N]; N], d: &mut [f64; N], e: &mut [f64; N]) -> Result<(), EigenError> {
    for i in 1..N {
        e[i - 1] = e[i];
    }
    e[N - 1] = 0.0;

    let mut f = 0.0f64;
    let mut tst1 = 0.0f64;
    let eps = f64::EPSILON;

    for l in 0..N {
        tst1 = tst1.max(d[l].abs() + e[l].abs());

        let mut m = l;
        while m < N && e[m].abs() > eps * tst1 {
            m += 1;
        }

        if m > l {
            let mut iter = 0;
            loop {
                iter += 1;
                if iter > MAX_QL_ITERATIONS {
                    return Err(EigenError::NotConverged);
                }

                // Implicit shift.
                let g = d[l];
                let mut p = (d[l + 1] - g) / (2.0 * e[l]);
                let mut r = p.hypot(1.0);
                if p < 0.0 {
                    r = -r;
                }
                d[l] = e[l] / (p + r);
                d[l + 1] = e[l] * (p + r);
                let dl1 = d[l + 1];
                let mut h = g - d[l];
                for di in d.iter_mut().take(N).skip(l + 2) {
                    *di -= h;
                }
                f += h;

                // QL sweep.
                p = d[m];
                let mut c = 1.0f64;
                let mut c2 = c;
                let mut c3 = c;
                let el1 = e[l + 1];
                let mut s = 0.0f64;
                let mut s2 = 0.0f64;

                for i in (l..m).rev() {
                    c3 = c2;
                    c2 = c;
                    s2 = s;
                    let g = c * e[i];
                    h = c * p;
                    r = p.hypot(e[i]);
                    e[i + 1] = s * r;
                    s = e[i] / r;
                    c = p / r;
                    p = c * d[i] - s * g;
                    d[i + 1] = h + s * (c * g + s * d[i]);

                    for row in v.iter_mut() {
                        let h = row[i + 1];
                        row[i + 1] = s * row[i] + c * h;
                        row[i] = c * row[i] - s * h;
                    }
                }

                p = -s * s2 * c3 * el1 * e[l] / dl1;
                e[l] = s * p;
                d[l] = c * p;

                if e[l].abs() <= eps * tst1 {
                    break;
                }
            }
        }

        d[l] += f;
        e[l] = 0.0;
    }

    // Sort eigenvalues ascending, carrying eigenvector columns along.
    for i in 0..N - 1 {
        let mut k = i;
        for j in i + 1..N {
            if d[j] < d[k] {
                k = j;
            }
        }
        if k != i {
            d.swap(i, k);
            for row in v.iter_mut() {
                row.swap(i, k);
            }
        }
    }

    Ok(())
}
