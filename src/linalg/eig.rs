//! Eigendecomposition of real non-symmetric matrices.
//!
//! Eigenvalues come from the classic two-stage dense path: reduction to upper
//! Hessenberg form by stabilised elementary eliminations, then Francis
//! double-shift QR sweeps with deflation. Complex conjugate pairs are stored
//! split, one value per slot, imaginary parts carrying opposite signs.
//!
//! Eigenvectors are recovered one value at a time by shifted inverse
//! iteration on the original matrix, which keeps the QR stage free of
//! transformation bookkeeping. This assumes the spectrum is simple, which
//! holds for the Hamiltonian pencils this crate feeds in.

use numr::error::{Error, Result};

use super::dense::{one_norm, solve_complex};

/// Maximum QR sweeps per eigenvalue before giving up.
const MAX_SWEEPS: usize = 60;

/// Eigenvalues of a real matrix, split into real and imaginary parts.
///
/// Conjugate pairs occupy adjacent slots with imaginary parts of opposite
/// sign.
#[derive(Debug, Clone)]
pub struct Eigen {
    pub values_re: Vec<f64>,
    pub values_im: Vec<f64>,
}

/// Eigenvalues of an `n × n` row-major matrix.
pub fn eig(a: &[f64], n: usize) -> Result<Eigen> {
    if a.len() != n * n {
        return Err(Error::InvalidArgument {
            arg: "a",
            reason: format!("expected {} entries for an {n}×{n} matrix, got {}", n * n, a.len()),
        });
    }
    if n == 0 {
        return Ok(Eigen {
            values_re: Vec::new(),
            values_im: Vec::new(),
        });
    }

    let mut h = a.to_vec();
    hessenberg(&mut h, n);
    francis_qr(&mut h, n)
}

/// Reduce to upper Hessenberg form by pivoted elementary similarity
/// transformations. Entries below the first subdiagonal become garbage the
/// QR stage never reads; they are zeroed for hygiene.
fn hessenberg(a: &mut [f64], n: usize) {
    for m in 1..n.saturating_sub(1) {
        // Pivot: largest magnitude in column m-1 at or below row m.
        let mut x = 0.0_f64;
        let mut pivot = m;
        for j in m..n {
            if a[j * n + m - 1].abs() > x.abs() {
                x = a[j * n + m - 1];
                pivot = j;
            }
        }
        if pivot != m {
            for j in m - 1..n {
                a.swap(pivot * n + j, m * n + j);
            }
            for i in 0..n {
                a.swap(i * n + pivot, i * n + m);
            }
        }
        if x != 0.0 {
            for i in m + 1..n {
                let mut y = a[i * n + m - 1];
                if y != 0.0 {
                    y /= x;
                    a[i * n + m - 1] = y;
                    for j in m..n {
                        a[i * n + j] -= y * a[m * n + j];
                    }
                    for j in 0..n {
                        a[j * n + m] += y * a[j * n + i];
                    }
                }
            }
        }
    }
    for i in 2..n {
        for j in 0..i - 1 {
            a[i * n + j] = 0.0;
        }
    }
}

fn sign_of(a: f64, b: f64) -> f64 {
    if b >= 0.0 {
        a.abs()
    } else {
        -a.abs()
    }
}

/// Francis double-shift QR on an upper Hessenberg matrix.
fn francis_qr(a: &mut [f64], n: usize) -> Result<Eigen> {
    let at = |a: &[f64], i: usize, j: usize| a[i * n + j];

    let mut wr = vec![0.0; n];
    let mut wi = vec![0.0; n];

    let mut anorm = 0.0;
    for i in 0..n {
        for j in i.saturating_sub(1)..n {
            anorm += at(a, i, j).abs();
        }
    }
    if anorm == 0.0 {
        return Ok(Eigen {
            values_re: wr,
            values_im: wi,
        });
    }

    let eps = f64::EPSILON;
    let mut t_shift = 0.0;
    let mut nn = n as isize - 1;

    while nn >= 0 {
        let mut its = 0;
        loop {
            let nnu = nn as usize;

            // Look for a single small subdiagonal element.
            let mut l = 0usize;
            for ll in (1..=nnu).rev() {
                let mut s = at(a, ll - 1, ll - 1).abs() + at(a, ll, ll).abs();
                if s == 0.0 {
                    s = anorm;
                }
                if at(a, ll, ll - 1).abs() <= eps * s {
                    a[ll * n + ll - 1] = 0.0;
                    l = ll;
                    break;
                }
            }

            let mut x = at(a, nnu, nnu);
            if l == nnu {
                // One root found.
                wr[nnu] = x + t_shift;
                wi[nnu] = 0.0;
                nn -= 1;
                break;
            }

            let y = at(a, nnu - 1, nnu - 1);
            let mut w = at(a, nnu, nnu - 1) * at(a, nnu - 1, nnu);
            if l == nnu - 1 {
                // Two roots found: real pair or complex conjugates.
                let p = 0.5 * (y - x);
                let q = p * p + w;
                let mut z = q.abs().sqrt();
                x += t_shift;
                if q >= 0.0 {
                    z = p + sign_of(z, p);
                    wr[nnu - 1] = x + z;
                    wr[nnu] = wr[nnu - 1];
                    if z != 0.0 {
                        wr[nnu] = x - w / z;
                    }
                    wi[nnu - 1] = 0.0;
                    wi[nnu] = 0.0;
                } else {
                    wr[nnu - 1] = x + p;
                    wr[nnu] = x + p;
                    wi[nnu] = z;
                    wi[nnu - 1] = -z;
                }
                nn -= 2;
                break;
            }

            if its == MAX_SWEEPS {
                return Err(Error::InvalidArgument {
                    arg: "a",
                    reason: format!(
                        "QR iteration did not converge within {} sweeps at block {}",
                        MAX_SWEEPS, nnu
                    ),
                });
            }
            if its == 10 || its == 20 {
                // Exceptional shift to break symmetry-induced cycling.
                t_shift += x;
                for i in 0..=nnu {
                    a[i * n + i] -= x;
                }
                let s = at(a, nnu, nnu - 1).abs() + at(a, nnu - 1, nnu - 2).abs();
                x = 0.75 * s;
                w = -0.4375 * s * s;
            }
            its += 1;
            let y = if its == 11 || its == 21 { x } else { y };

            // Form the first column of (H−σ₁)(H−σ₂) and look for two
            // consecutive small subdiagonals to start the sweep from.
            let mut m = nnu - 2;
            let mut p = 0.0;
            let mut q = 0.0;
            let mut r = 0.0;
            loop {
                let z = at(a, m, m);
                let rr = x - z;
                let ss = y - z;
                p = (rr * ss - w) / at(a, m + 1, m) + at(a, m, m + 1);
                q = at(a, m + 1, m + 1) - z - rr - ss;
                r = at(a, m + 2, m + 1);
                let scale = p.abs() + q.abs() + r.abs();
                p /= scale;
                q /= scale;
                r /= scale;
                if m == l {
                    break;
                }
                let u = at(a, m, m - 1).abs() * (q.abs() + r.abs());
                let v = p.abs() * (at(a, m - 1, m - 1).abs() + z.abs() + at(a, m + 1, m + 1).abs());
                if u <= eps * v {
                    break;
                }
                m -= 1;
            }

            for i in m + 2..=nnu {
                a[i * n + i - 2] = 0.0;
                if i != m + 2 {
                    a[i * n + i - 3] = 0.0;
                }
            }

            // Double QR sweep over rows l..nn.
            for k in m..nnu {
                if k != m {
                    p = at(a, k, k - 1);
                    q = at(a, k + 1, k - 1);
                    r = if k != nnu - 1 { at(a, k + 2, k - 1) } else { 0.0 };
                    let scale = p.abs() + q.abs() + r.abs();
                    if scale != 0.0 {
                        p /= scale;
                        q /= scale;
                        r /= scale;
                        x = scale;
                    } else {
                        x = 0.0;
                    }
                }
                let s = sign_of((p * p + q * q + r * r).sqrt(), p);
                if s == 0.0 {
                    continue;
                }
                if k == m {
                    if l != m {
                        a[k * n + k - 1] = -at(a, k, k - 1);
                    }
                } else {
                    a[k * n + k - 1] = -s * x;
                }
                p += s;
                x = p / s;
                let yy = q / s;
                let z = r / s;
                q /= p;
                r /= p;

                // Row modification.
                for j in k..=nnu {
                    let mut pp = at(a, k, j) + q * at(a, k + 1, j);
                    if k != nnu - 1 {
                        pp += r * at(a, k + 2, j);
                        a[(k + 2) * n + j] -= pp * z;
                    }
                    a[(k + 1) * n + j] -= pp * yy;
                    a[k * n + j] -= pp * x;
                }

                // Column modification.
                let mmin = nnu.min(k + 3);
                for i in l..=mmin {
                    let mut pp = x * at(a, i, k) + yy * at(a, i, k + 1);
                    if k != nnu - 1 {
                        pp += z * at(a, i, k + 2);
                        a[i * n + k + 2] -= pp * r;
                    }
                    a[i * n + k + 1] -= pp * q;
                    a[i * n + k] -= pp;
                }
            }
        }
    }

    Ok(Eigen {
        values_re: wr,
        values_im: wi,
    })
}

/// Eigenvector of `a` for the (simple) eigenvalue `λ = re + i·im`.
///
/// Shifted inverse iteration: solve `(A − (λ+ε)I)·w = v`, renormalise, and
/// repeat a few times. The tiny `ε` keeps the shifted matrix invertible; with
/// partial pivoting the solution still collapses onto the eigendirection.
/// Returns the vector split into real and imaginary parts, scaled to unit
/// infinity norm.
pub fn eigenvector(a: &[f64], n: usize, re: f64, im: f64) -> Result<(Vec<f64>, Vec<f64>)> {
    let norm = one_norm(a, n).max(1.0);

    for &eps_scale in &[1e-12, 1e-10, 1e-7] {
        let eps = eps_scale * norm;
        let mut m_re = a.to_vec();
        let mut m_im = vec![0.0; n * n];
        for i in 0..n {
            m_re[i * n + i] -= re + eps;
            m_im[i * n + i] = -im;
        }

        // Deterministic start vector with no accidental structure.
        let mut v_re: Vec<f64> = (0..n).map(|i| 1.0 / (i as f64 + 2.0)).collect();
        let mut v_im = vec![0.0; n];

        let mut ok = true;
        for _ in 0..3 {
            let (w_re, w_im) = match solve_complex(&m_re, &m_im, &v_re, &v_im, n, 1) {
                Ok(sol) => sol,
                Err(_) => {
                    ok = false;
                    break;
                }
            };
            let mut max = 0.0_f64;
            for i in 0..n {
                max = max.max(w_re[i].hypot(w_im[i]));
            }
            if max == 0.0 || !max.is_finite() {
                ok = false;
                break;
            }
            v_re = w_re.iter().map(|x| x / max).collect();
            v_im = w_im.iter().map(|x| x / max).collect();
        }
        if ok {
            return Ok((v_re, v_im));
        }
    }

    Err(Error::InvalidArgument {
        arg: "a",
        reason: format!("inverse iteration failed for eigenvalue {} + {}i", re, im),
    })
}
