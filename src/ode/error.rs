//! Error types for the ODE solvers.

use std::fmt;

/// Result type for ODE operations.
pub type OdeResult<T> = Result<T, OdeError>;

/// Errors that can occur while integrating.
#[derive(Debug, Clone)]
pub enum OdeError {
    /// Adaptive stepping exhausted its iteration budget.
    DidNotConverge {
        iterations: usize,
        best_error: f64,
        completed: f64,
        context: String,
    },

    /// The trial step shrank below the resolvable scale of the interval.
    StepSizeTooSmall { step: f64, t: f64, context: String },

    /// Invalid integration interval.
    InvalidInterval { from: f64, to: f64, context: String },

    /// State shape does not match the system order.
    ShapeMismatch {
        expected: usize,
        found: usize,
        context: String,
    },

    /// Numerical failure (NaN/Inf, poisoned worker, ...).
    NumericalError { message: String },

    /// Error from an underlying numr operation.
    NumrError(String),
}

impl fmt::Display for OdeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DidNotConverge {
                iterations,
                best_error,
                completed,
                context,
            } => write!(
                f,
                "{}: no step met the tolerance after {} iterations (best error {:.2e}, {:.1}% of the interval done)",
                context,
                iterations,
                best_error,
                completed * 100.0
            ),
            Self::StepSizeTooSmall { step, t, context } => {
                write!(f, "{}: step size {:.2e} too small at t = {:.6}", context, step, t)
            }
            Self::InvalidInterval { from, to, context } => {
                write!(f, "{}: invalid interval [{}, {}]", context, from, to)
            }
            Self::ShapeMismatch {
                expected,
                found,
                context,
            } => write!(
                f,
                "{}: state has {} rows but the system order is {}",
                context, found, expected
            ),
            Self::NumericalError { message } => write!(f, "numerical error: {}", message),
            Self::NumrError(msg) => write!(f, "numr error: {}", msg),
        }
    }
}

impl std::error::Error for OdeError {}

impl From<numr::error::Error> for OdeError {
    fn from(err: numr::error::Error) -> Self {
        Self::NumrError(err.to_string())
    }
}
