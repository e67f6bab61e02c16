//! Explicit Runge–Kutta integrators.
//!
//! A method is described by its [`ButcherTableau`]; supplied methods are
//! Euler, classic RK4 and Fehlberg 4(5). [`RungeKutta::compute`] performs one
//! explicit step across a full interval (columns of a matrix state integrate
//! independently, in parallel), and [`RungeKutta::adaptive_compute`]
//! subdivides until the embedded local error estimate meets the tolerance.
//!
//! Linear state-space models take a closed-form fast path: the autonomous
//! drift is advanced by `exp(A·h)` exactly and only the input terms go
//! through the Runge–Kutta stages, so the step size can be chosen from the
//! input dynamics alone. Intermediate stage states are not physically
//! meaningful under the fast path.

pub mod error;
mod solver;
mod tableau;

pub use error::{OdeError, OdeResult};
pub use solver::{RungeKutta, MAX_ITERATIONS};
pub use tableau::{euler, fehlberg45, rk4, ButcherTableau};
