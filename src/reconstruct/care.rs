//! Continuous algebraic Riccati equation solvers.
//!
//! Solves `0 = Aᵀ·X + X·A − X·R·X + Q` for symmetric positive-definite `X`.
//!
//! The primary method factorises the Hamiltonian pencil: the stable invariant
//! subspace of
//!
//! ```text
//! H = [[ A, −R ],
//!      [−Q, −Aᵀ]]
//! ```
//!
//! spanned by the eigenvectors of the `N` smallest-real-part eigenvalues,
//! partitioned into `U₁` (top rows) and `U₂` (bottom rows), gives
//! `X = U₂·U₁⁻¹`. A Newton iteration and a plain gradient recursion are
//! available as fallbacks for pencils whose eigenproblem is badly behaved.

use numr::runtime::cpu::CpuRuntime;
use numr::tensor::Tensor;

use crate::linalg;

use super::{ReconstructError, ReconstructResult};

/// Which CARE algorithm to run.
#[derive(Debug, Clone)]
pub enum CareMethod {
    /// Hamiltonian eigendecomposition (the default).
    MatrixFactorization,
    /// Newton iteration: each step solves the Fréchet-derivative equation
    /// `(A−RX)ᵀΔ + Δ(A−RX) = −residual` as a dense Kronecker system.
    Newton { tolerance: f64, max_iterations: usize },
    /// Gradient descent on the Riccati residual with a fixed step length.
    Recursion {
        step_length: f64,
        tolerance: f64,
        max_iterations: usize,
    },
}

impl Default for CareMethod {
    fn default() -> Self {
        Self::MatrixFactorization
    }
}

/// Solve `0 = Aᵀ·X + X·A − X·R·X + Q`.
///
/// All three matrices are N×N; `R` and `Q` symmetric. The result is
/// symmetrised and verified positive-definite; anything else is fatal.
pub fn care(
    a: &Tensor<CpuRuntime>,
    r: &Tensor<CpuRuntime>,
    q: &Tensor<CpuRuntime>,
    method: &CareMethod,
) -> ReconstructResult<Tensor<CpuRuntime>> {
    let n = a.shape()[0];
    for (name, m) in [("a", a), ("r", r), ("q", q)] {
        let shape = m.shape();
        if shape.len() != 2 || shape[0] != n || shape[1] != n {
            return Err(ReconstructError::ShapeMismatch {
                expected: n,
                found: shape[0],
                context: format!("care: matrix {}", name),
            });
        }
    }

    let a_data: Vec<f64> = a.to_vec();
    let r_data: Vec<f64> = r.to_vec();
    let q_data: Vec<f64> = q.to_vec();

    let x = match method {
        CareMethod::MatrixFactorization => matrix_factorization(&a_data, &r_data, &q_data, n)?,
        CareMethod::Newton {
            tolerance,
            max_iterations,
        } => newton(&a_data, &r_data, &q_data, n, *tolerance, *max_iterations)?,
        CareMethod::Recursion {
            step_length,
            tolerance,
            max_iterations,
        } => recursion(
            &a_data,
            &r_data,
            &q_data,
            n,
            *step_length,
            *tolerance,
            *max_iterations,
        )?,
    };

    let x = positive_definite_branch(x, n)?;
    Ok(Tensor::<CpuRuntime>::from_slice(&x, &[n, n], a.device()))
}

/// Riccati residual `Aᵀ·X + X·A − X·R·X + Q`.
fn residual(a: &[f64], r: &[f64], q: &[f64], x: &[f64], n: usize) -> Vec<f64> {
    let at = linalg::transpose(a, n, n);
    let atx = linalg::mat_mul(&at, x, n, n, n);
    let xa = linalg::mat_mul(x, a, n, n, n);
    let rx = linalg::mat_mul(r, x, n, n, n);
    let xrx = linalg::mat_mul(x, &rx, n, n, n);
    (0..n * n)
        .map(|i| atx[i] + xa[i] - xrx[i] + q[i])
        .collect()
}

/// The Hamiltonian matrix-factorisation method.
fn matrix_factorization(
    a: &[f64],
    r: &[f64],
    q: &[f64],
    n: usize,
) -> ReconstructResult<Vec<f64>> {
    let order = 2 * n;

    // H = [[A, -R], [-Q, -Aᵀ]]
    let mut h = vec![0.0; order * order];
    for i in 0..n {
        for j in 0..n {
            h[i * order + j] = a[i * n + j];
            h[i * order + n + j] = -r[i * n + j];
            h[(n + i) * order + j] = -q[i * n + j];
            h[(n + i) * order + n + j] = -a[j * n + i];
        }
    }

    let eigen = linalg::eig(&h, order).map_err(|err| ReconstructError::NumericalError {
        message: format!("care: Hamiltonian eigendecomposition failed: {}", err),
    })?;

    // Stable invariant subspace: eigenvectors of the n smallest real parts.
    let perm = linalg::stable_argsort(&eigen.values_re);
    let mut u1_re = vec![0.0; n * n];
    let mut u1_im = vec![0.0; n * n];
    let mut u2_re = vec![0.0; n * n];
    let mut u2_im = vec![0.0; n * n];
    for (col, &which) in perm.iter().take(n).enumerate() {
        let (v_re, v_im) =
            linalg::eigenvector(&h, order, eigen.values_re[which], eigen.values_im[which])
                .map_err(|err| ReconstructError::NumericalError {
                    message: format!("care: eigenvector extraction failed: {}", err),
                })?;
        for row in 0..n {
            u1_re[row * n + col] = v_re[row];
            u1_im[row * n + col] = v_im[row];
            u2_re[row * n + col] = v_re[n + row];
            u2_im[row * n + col] = v_im[n + row];
        }
    }

    // X = U₂·U₁⁻¹, i.e. Xᵀ solves U₁ᵀ·Xᵀ = U₂ᵀ.
    let u1t_re = linalg::transpose(&u1_re, n, n);
    let u1t_im = linalg::transpose(&u1_im, n, n);
    let u2t_re = linalg::transpose(&u2_re, n, n);
    let u2t_im = linalg::transpose(&u2_im, n, n);
    let (xt_re, _xt_im) = linalg::solve_complex(&u1t_re, &u1t_im, &u2t_re, &u2t_im, n, n)
        .map_err(|err| ReconstructError::NumericalError {
            message: format!("care: singular U1 block: {}", err),
        })?;
    let x = linalg::transpose(&xt_re, n, n);

    // The eigenvector scaling is arbitrary up to sign.
    let x = if linalg::determinant(&x, n) < 0.0 {
        x.iter().map(|v| -v).collect()
    } else {
        x
    };
    Ok(x)
}

/// Newton iteration from the identity seed.
fn newton(
    a: &[f64],
    r: &[f64],
    q: &[f64],
    n: usize,
    tolerance: f64,
    max_iterations: usize,
) -> ReconstructResult<Vec<f64>> {
    let mut x = linalg::eye(n, n);

    for iteration in 0..max_iterations {
        let res = residual(a, r, q, &x, n);

        // Closed-loop dynamics A_c = A − R·X.
        let rx = linalg::mat_mul(r, &x, n, n, n);
        let ac: Vec<f64> = (0..n * n).map(|i| a[i] - rx[i]).collect();
        let act = linalg::transpose(&ac, n, n);

        // Solve A_cᵀ·Δ + Δ·A_c = −res as (A_cᵀ⊗I + I⊗A_cᵀ)·vec(Δ) = −vec(res)
        // with row-major vectorisation.
        let nn = n * n;
        let mut system = vec![0.0; nn * nn];
        for i in 0..n {
            for j in 0..n {
                let row = i * n + j;
                for l in 0..n {
                    // (A_cᵀ·Δ)[i][j] couples to Δ[l][j]
                    system[row * nn + l * n + j] += act[i * n + l];
                    // (Δ·A_c)[i][j] couples to Δ[i][l]
                    system[row * nn + i * n + l] += ac[l * n + j];
                }
            }
        }
        let rhs: Vec<f64> = res.iter().map(|v| -v).collect();
        let delta = linalg::solve(&system, &rhs, nn, 1).map_err(|err| {
            ReconstructError::NumericalError {
                message: format!("care newton: singular Fréchet system: {}", err),
            }
        })?;

        // Symmetrised, damped update: back off while the residual grows.
        let res_norm = linalg::frobenius_norm(&res);
        let mut step = 1.0;
        let mut candidate = x.clone();
        for _ in 0..40 {
            for i in 0..n {
                for j in 0..n {
                    candidate[i * n + j] = x[i * n + j]
                        + step * 0.5 * (delta[i * n + j] + delta[j * n + i]);
                }
            }
            let next_norm = linalg::frobenius_norm(&residual(a, r, q, &candidate, n));
            if next_norm.is_finite() && (next_norm < res_norm || step < 1e-8) {
                break;
            }
            step *= 0.5;
        }
        x = candidate;

        if step * linalg::frobenius_norm(&delta) < tolerance {
            return Ok(x);
        }

        if iteration + 1 == max_iterations {
            let res = residual(a, r, q, &x, n);
            return Err(ReconstructError::NonConvergence {
                iterations: max_iterations,
                residual: linalg::frobenius_norm(&res),
                context: "care newton".to_string(),
            });
        }
    }

    Err(ReconstructError::NonConvergence {
        iterations: 0,
        residual: f64::INFINITY,
        context: "care newton: zero iteration budget".to_string(),
    })
}

/// Gradient descent on the residual, the last-resort method.
fn recursion(
    a: &[f64],
    r: &[f64],
    q: &[f64],
    n: usize,
    step_length: f64,
    tolerance: f64,
    max_iterations: usize,
) -> ReconstructResult<Vec<f64>> {
    let mut x = linalg::eye(n, n);
    let mut best = f64::INFINITY;

    for _ in 0..max_iterations {
        let res = residual(a, r, q, &x, n);
        let norm = linalg::frobenius_norm(&res);
        if norm < tolerance {
            return Ok(x);
        }
        best = best.min(norm);
        for i in 0..n {
            for j in 0..n {
                // Keep the iterate symmetric as it descends.
                x[i * n + j] += step_length * 0.5 * (res[i * n + j] + res[j * n + i]);
            }
        }
    }

    Err(ReconstructError::NonConvergence {
        iterations: max_iterations,
        residual: best,
        context: "care recursion".to_string(),
    })
}

/// Symmetrise and pick the positive-definite branch, or fail.
fn positive_definite_branch(x: Vec<f64>, n: usize) -> ReconstructResult<Vec<f64>> {
    let mut sym = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..n {
            sym[i * n + j] = 0.5 * (x[i * n + j] + x[j * n + i]);
        }
    }
    if sym.iter().any(|v| !v.is_finite()) {
        return Err(ReconstructError::NumericalError {
            message: "care: non-finite entries in the solution".to_string(),
        });
    }
    if linalg::cholesky(&sym, n).is_ok() {
        return Ok(sym);
    }
    let negated: Vec<f64> = sym.iter().map(|v| -v).collect();
    if linalg::cholesky(&negated, n).is_ok() {
        return Ok(negated);
    }
    Err(ReconstructError::NotPositiveDefinite {
        context: "care".to_string(),
    })
}
