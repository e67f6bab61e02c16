//! CPU dense linear-algebra kernels.
//!
//! # Why CPU-Only?
//!
//! Everything in this module is small-matrix, inherently sequential work:
//! pivoted elimination, QR sweeps with data-dependent shifts, Padé
//! scaling-and-squaring. The matrices involved are the state dynamics of a
//! sampling network (N is rarely above a few tens), so the routines operate
//! directly on row-major `Vec<f64>` buffers and only touch tensors at the
//! boundary.
//!
//! Complex quantities follow the split convention used elsewhere in the
//! ecosystem: separate real and imaginary buffers of equal shape.

mod dense;
mod eig;
mod expm;

pub use dense::{
    cholesky, determinant, eye, frobenius_norm, has_non_finite, inverse, mat_mul, mat_vec,
    one_norm, ones, permutation_matrix, solve, solve_complex, stable_argsort, transpose,
};
pub use eig::{eig, eigenvector, Eigen};
pub use expm::expm;
