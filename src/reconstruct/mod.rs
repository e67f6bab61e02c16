//! Input reconstruction from a codeword stream.
//!
//! Reconstruction is a steady-state Kalman smoother specialised to an LTI
//! plant with quantised feedback: two linear recursions (forward and
//! backward in time) whose gains come from a continuous algebraic Riccati
//! equation, merged per sample into input estimates through the input-weight
//! matrix. See [`care`] for the Riccati solvers and
//! [`SteadyStateReconstructor`] for the two-pass message passing.

pub mod care;
mod steady_state;

use std::fmt;

use crate::control::ControlError;
use crate::ode::OdeError;

pub use care::{care, CareMethod};
pub use steady_state::SteadyStateReconstructor;

/// Result type for reconstruction.
pub type ReconstructResult<T> = Result<T, ReconstructError>;

/// Errors from the CARE solvers and the reconstructor.
#[derive(Debug, Clone)]
pub enum ReconstructError {
    /// An iterative CARE method ran out of iterations.
    NonConvergence {
        iterations: usize,
        residual: f64,
        context: String,
    },
    /// The Riccati solution is not symmetric positive-definite.
    NotPositiveDefinite { context: String },
    /// Matrix dimensions are inconsistent.
    ShapeMismatch {
        expected: usize,
        found: usize,
        context: String,
    },
    /// A dense kernel failed (singular solve, eigendecomposition, ...).
    NumericalError { message: String },
    /// Contribution lookup failed during a recursion.
    Control(ControlError),
    /// The filter-cache build failed in the ODE layer.
    Ode(OdeError),
}

impl fmt::Display for ReconstructError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonConvergence {
                iterations,
                residual,
                context,
            } => write!(
                f,
                "{}: no convergence after {} iterations (residual {:.2e})",
                context, iterations, residual
            ),
            Self::NotPositiveDefinite { context } => {
                write!(f, "{}: result is not positive definite", context)
            }
            Self::ShapeMismatch {
                expected,
                found,
                context,
            } => write!(
                f,
                "{}: expected dimension {}, got {}",
                context, expected, found
            ),
            Self::NumericalError { message } => write!(f, "numerical error: {}", message),
            Self::Control(err) => write!(f, "control lookup failed: {}", err),
            Self::Ode(err) => write!(f, "integration failed: {}", err),
        }
    }
}

impl std::error::Error for ReconstructError {}

impl From<ControlError> for ReconstructError {
    fn from(err: ControlError) -> Self {
        Self::Control(err)
    }
}

impl From<OdeError> for ReconstructError {
    fn from(err: OdeError) -> Self {
        Self::Ode(err)
    }
}

impl From<numr::error::Error> for ReconstructError {
    fn from(err: numr::error::Error) -> Self {
        Self::NumericalError {
            message: err.to_string(),
        }
    }
}
