//! Elementary dense kernels over row-major buffers.

use numr::error::{Error, Result};
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// `m × n` identity-shaped matrix (ones on the main diagonal).
pub fn eye(m: usize, n: usize) -> Vec<f64> {
    let mut data = vec![0.0; m * n];
    for i in 0..m.min(n) {
        data[i * n + i] = 1.0;
    }
    data
}

/// `m × n` matrix filled with ones.
pub fn ones(m: usize, n: usize) -> Vec<f64> {
    vec![1.0; m * n]
}

/// Dense product `C = A·B` with `A: m×k`, `B: k×n`.
pub fn mat_mul(a: &[f64], b: &[f64], m: usize, k: usize, n: usize) -> Vec<f64> {
    let mut c = vec![0.0; m * n];
    for i in 0..m {
        for l in 0..k {
            let ail = a[i * k + l];
            if ail == 0.0 {
                continue;
            }
            for j in 0..n {
                c[i * n + j] += ail * b[l * n + j];
            }
        }
    }
    c
}

/// Matrix-vector product `A·x` with `A: m×n`.
pub fn mat_vec(a: &[f64], x: &[f64], m: usize, n: usize) -> Vec<f64> {
    let mut y = vec![0.0; m];
    for i in 0..m {
        let mut acc = 0.0;
        for j in 0..n {
            acc += a[i * n + j] * x[j];
        }
        y[i] = acc;
    }
    y
}

/// Transpose of an `m × n` matrix.
pub fn transpose(a: &[f64], m: usize, n: usize) -> Vec<f64> {
    let mut t = vec![0.0; m * n];
    for i in 0..m {
        for j in 0..n {
            t[j * m + i] = a[i * n + j];
        }
    }
    t
}

/// Induced 1-norm (maximum absolute column sum) of an `n × n` matrix.
pub fn one_norm(a: &[f64], n: usize) -> f64 {
    let mut best = 0.0_f64;
    for j in 0..n {
        let mut col = 0.0;
        for i in 0..n {
            col += a[i * n + j].abs();
        }
        best = best.max(col);
    }
    best
}

/// Frobenius norm of a buffer.
pub fn frobenius_norm(a: &[f64]) -> f64 {
    a.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Solve `A·X = B` for possibly many right-hand sides.
///
/// Gaussian elimination with partial pivoting; `a` is `n × n`, `b` is
/// `n × nrhs`, both row-major. Errors on a numerically singular pivot.
pub fn solve(a: &[f64], b: &[f64], n: usize, nrhs: usize) -> Result<Vec<f64>> {
    let mut lu = a.to_vec();
    let mut x = b.to_vec();

    for col in 0..n {
        // Partial pivot
        let mut pivot_row = col;
        let mut pivot_val = lu[col * n + col].abs();
        for row in col + 1..n {
            let v = lu[row * n + col].abs();
            if v > pivot_val {
                pivot_val = v;
                pivot_row = row;
            }
        }
        if pivot_val < f64::EPSILON * one_norm(a, n).max(1.0) {
            return Err(Error::InvalidArgument {
                arg: "a",
                reason: format!("matrix is singular at column {}", col),
            });
        }
        if pivot_row != col {
            for j in 0..n {
                lu.swap(col * n + j, pivot_row * n + j);
            }
            for j in 0..nrhs {
                x.swap(col * nrhs + j, pivot_row * nrhs + j);
            }
        }

        let pivot = lu[col * n + col];
        for row in col + 1..n {
            let factor = lu[row * n + col] / pivot;
            if factor == 0.0 {
                continue;
            }
            for j in col..n {
                lu[row * n + j] -= factor * lu[col * n + j];
            }
            for j in 0..nrhs {
                x[row * nrhs + j] -= factor * x[col * nrhs + j];
            }
        }
    }

    // Back substitution
    for col in (0..n).rev() {
        let pivot = lu[col * n + col];
        for j in 0..nrhs {
            let mut acc = x[col * nrhs + j];
            for l in col + 1..n {
                acc -= lu[col * n + l] * x[l * nrhs + j];
            }
            x[col * nrhs + j] = acc / pivot;
        }
    }

    Ok(x)
}

/// Inverse of an `n × n` matrix.
pub fn inverse(a: &[f64], n: usize) -> Result<Vec<f64>> {
    solve(a, &eye(n, n), n, n)
}

/// Determinant of an `n × n` matrix via pivoted LU.
pub fn determinant(a: &[f64], n: usize) -> f64 {
    let mut lu = a.to_vec();
    let mut det = 1.0;

    for col in 0..n {
        let mut pivot_row = col;
        let mut pivot_val = lu[col * n + col].abs();
        for row in col + 1..n {
            let v = lu[row * n + col].abs();
            if v > pivot_val {
                pivot_val = v;
                pivot_row = row;
            }
        }
        if pivot_val == 0.0 {
            return 0.0;
        }
        if pivot_row != col {
            for j in 0..n {
                lu.swap(col * n + j, pivot_row * n + j);
            }
            det = -det;
        }
        let pivot = lu[col * n + col];
        det *= pivot;
        for row in col + 1..n {
            let factor = lu[row * n + col] / pivot;
            for j in col..n {
                lu[row * n + j] -= factor * lu[col * n + j];
            }
        }
    }

    det
}

/// Cholesky factor of a symmetric positive-definite matrix.
///
/// Returns the lower-triangular `L` with `L·Lᵀ = A`, or an error when a
/// non-positive pivot shows the matrix is not positive definite.
pub fn cholesky(a: &[f64], n: usize) -> Result<Vec<f64>> {
    let mut l = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..=i {
            let mut acc = a[i * n + j];
            for k in 0..j {
                acc -= l[i * n + k] * l[j * n + k];
            }
            if i == j {
                if acc <= 0.0 {
                    return Err(Error::InvalidArgument {
                        arg: "a",
                        reason: format!("matrix is not positive definite (pivot {} at {})", acc, i),
                    });
                }
                l[i * n + i] = acc.sqrt();
            } else {
                l[i * n + j] = acc / l[j * n + j];
            }
        }
    }
    Ok(l)
}

/// Solve the complex system `A·X = B` with split real/imaginary storage.
///
/// All four buffers are row-major; `a` is `n × n`, `b` is `n × nrhs`.
/// Pivoting is by modulus.
pub fn solve_complex(
    a_re: &[f64],
    a_im: &[f64],
    b_re: &[f64],
    b_im: &[f64],
    n: usize,
    nrhs: usize,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let mut lr = a_re.to_vec();
    let mut li = a_im.to_vec();
    let mut xr = b_re.to_vec();
    let mut xi = b_im.to_vec();

    let modulus = |re: f64, im: f64| re.hypot(im);

    for col in 0..n {
        let mut pivot_row = col;
        let mut pivot_val = modulus(lr[col * n + col], li[col * n + col]);
        for row in col + 1..n {
            let v = modulus(lr[row * n + col], li[row * n + col]);
            if v > pivot_val {
                pivot_val = v;
                pivot_row = row;
            }
        }
        if pivot_val == 0.0 {
            return Err(Error::InvalidArgument {
                arg: "a",
                reason: format!("complex matrix is singular at column {}", col),
            });
        }
        if pivot_row != col {
            for j in 0..n {
                lr.swap(col * n + j, pivot_row * n + j);
                li.swap(col * n + j, pivot_row * n + j);
            }
            for j in 0..nrhs {
                xr.swap(col * nrhs + j, pivot_row * nrhs + j);
                xi.swap(col * nrhs + j, pivot_row * nrhs + j);
            }
        }

        let (pr, pi) = (lr[col * n + col], li[col * n + col]);
        for row in col + 1..n {
            let (fr, fi) = cdiv(lr[row * n + col], li[row * n + col], pr, pi);
            if fr == 0.0 && fi == 0.0 {
                continue;
            }
            for j in col..n {
                let (cr, ci) = (lr[col * n + j], li[col * n + j]);
                lr[row * n + j] -= fr * cr - fi * ci;
                li[row * n + j] -= fr * ci + fi * cr;
            }
            for j in 0..nrhs {
                let (cr, ci) = (xr[col * nrhs + j], xi[col * nrhs + j]);
                xr[row * nrhs + j] -= fr * cr - fi * ci;
                xi[row * nrhs + j] -= fr * ci + fi * cr;
            }
        }
    }

    for col in (0..n).rev() {
        let (pr, pi) = (lr[col * n + col], li[col * n + col]);
        for j in 0..nrhs {
            let mut ar = xr[col * nrhs + j];
            let mut ai = xi[col * nrhs + j];
            for l in col + 1..n {
                let (cr, ci) = (lr[col * n + l], li[col * n + l]);
                let (sr, si) = (xr[l * nrhs + j], xi[l * nrhs + j]);
                ar -= cr * sr - ci * si;
                ai -= cr * si + ci * sr;
            }
            let (qr, qi) = cdiv(ar, ai, pr, pi);
            xr[col * nrhs + j] = qr;
            xi[col * nrhs + j] = qi;
        }
    }

    Ok((xr, xi))
}

/// Complex division `(ar + i·ai) / (br + i·bi)` guarded against overflow.
pub(crate) fn cdiv(ar: f64, ai: f64, br: f64, bi: f64) -> (f64, f64) {
    if br.abs() > bi.abs() {
        let r = bi / br;
        let d = br + r * bi;
        ((ar + r * ai) / d, (ai - r * ar) / d)
    } else {
        let r = br / bi;
        let d = bi + r * br;
        ((r * ar + ai) / d, (r * ai - ar) / d)
    }
}

/// Stable argsort of a slice, ascending.
///
/// Returns the permutation `p` such that `values[p[0]] <= values[p[1]] <= …`,
/// with ties kept in input order.
pub fn stable_argsort(values: &[f64]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..values.len()).collect();
    indices.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(std::cmp::Ordering::Equal));
    indices
}

/// Permutation matrix `P` for a permutation vector, so that `P·A` reorders
/// the rows of `A` into `A[p[0]], A[p[1]], …`.
pub fn permutation_matrix(p: &[usize]) -> Vec<f64> {
    let n = p.len();
    let mut m = vec![0.0; n * n];
    for (row, &src) in p.iter().enumerate() {
        m[row * n + src] = 1.0;
    }
    m
}

/// Check a tensor for NaN or infinite entries.
pub fn has_non_finite<R: Runtime>(t: &Tensor<R>) -> bool {
    let data: Vec<f64> = t.to_vec();
    data.iter().any(|x| !x.is_finite())
}
