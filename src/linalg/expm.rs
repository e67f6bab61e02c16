//! Matrix exponential via Padé approximation with scaling and squaring.

use numr::error::Result;

use super::dense::{eye, mat_mul, one_norm, solve};

// Order thresholds for the [m/m] Padé approximant (Higham's values).
const THETA_3: f64 = 1.495585217958292e-2;
const THETA_5: f64 = 2.539398330063230e-1;
const THETA_7: f64 = 9.504178996162932e-1;
const THETA_9: f64 = 2.097847961257068;
const THETA_13: f64 = 5.371920351148152;

const B_3: [f64; 4] = [120.0, 60.0, 12.0, 1.0];
const B_5: [f64; 6] = [30240.0, 15120.0, 3360.0, 420.0, 30.0, 1.0];
const B_7: [f64; 8] = [
    17297280.0, 8648640.0, 1995840.0, 277200.0, 25200.0, 1512.0, 56.0, 1.0,
];
const B_9: [f64; 10] = [
    17643225600.0,
    8821612800.0,
    2075673600.0,
    302702400.0,
    30270240.0,
    2162160.0,
    110880.0,
    3960.0,
    90.0,
    1.0,
];
const B_13: [f64; 14] = [
    64764752532480000.0,
    32382376266240000.0,
    7771770303897600.0,
    1187353796428800.0,
    129060195264000.0,
    10559470521600.0,
    670442572800.0,
    33522128640.0,
    1323241920.0,
    40840800.0,
    960960.0,
    16380.0,
    182.0,
    1.0,
];

/// Matrix exponential `exp(A)` of an `n × n` row-major matrix.
///
/// Scaling-and-squaring with a degree-matched [m/m] Padé approximant. The
/// degree is chosen from the 1-norm of `A`; above the degree-13 threshold the
/// matrix is scaled down by a power of two and the result squared back up.
pub fn expm(a: &[f64], n: usize) -> Result<Vec<f64>> {
    if n == 0 {
        return Ok(Vec::new());
    }

    let norm = one_norm(a, n);

    if norm <= THETA_9 {
        let coeffs: &[f64] = if norm <= THETA_3 {
            &B_3
        } else if norm <= THETA_5 {
            &B_5
        } else if norm <= THETA_7 {
            &B_7
        } else {
            &B_9
        };
        return pade(a, n, coeffs);
    }

    // Scale A down until its norm is below the degree-13 threshold.
    let s = ((norm / THETA_13).log2().ceil()).max(0.0) as u32;
    let scale = (2.0_f64).powi(s as i32);
    let scaled: Vec<f64> = a.iter().map(|x| x / scale).collect();

    let mut result = pade(&scaled, n, &B_13)?;
    for _ in 0..s {
        result = mat_mul(&result, &result, n, n, n);
    }
    Ok(result)
}

/// Evaluate the [m/m] Padé approximant `q(A)⁻¹·p(A)` for the exponential.
///
/// `p` collects the odd coefficient terms as `U = A·(Σ b[2k+1]·A^{2k})` and
/// `q` the even ones as `V = Σ b[2k]·A^{2k}`; then `exp(A) ≈ (V−U)⁻¹(V+U)`.
fn pade(a: &[f64], n: usize, coeffs: &[f64]) -> Result<Vec<f64>> {
    let degree = coeffs.len() - 1;
    let a2 = mat_mul(a, a, n, n, n);

    // Even powers A^0, A^2, A^4, ...
    let mut even_powers: Vec<Vec<f64>> = vec![eye(n, n)];
    let mut k = 2;
    while k <= degree {
        let next = mat_mul(&even_powers[even_powers.len() - 1], &a2, n, n, n);
        even_powers.push(next);
        k += 2;
    }

    let mut u_inner = vec![0.0; n * n];
    let mut v = vec![0.0; n * n];
    for (power_index, power) in even_powers.iter().enumerate() {
        let even_coeff = coeffs[2 * power_index];
        for (dst, src) in v.iter_mut().zip(power.iter()) {
            *dst += even_coeff * src;
        }
        if 2 * power_index + 1 <= degree {
            let odd_coeff = coeffs[2 * power_index + 1];
            for (dst, src) in u_inner.iter_mut().zip(power.iter()) {
                *dst += odd_coeff * src;
            }
        }
    }
    let u = mat_mul(a, &u_inner, n, n, n);

    let mut lhs = vec![0.0; n * n]; // V - U
    let mut rhs = vec![0.0; n * n]; // V + U
    for i in 0..n * n {
        lhs[i] = v[i] - u[i];
        rhs[i] = v[i] + u[i];
    }

    solve(&lhs, &rhs, n, n)
}
