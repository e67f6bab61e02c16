//! Vector-valued input functions.
//!
//! A state-space model's input enters as `B·u(t)`: a fixed steering vector
//! `B ∈ ℝᴺ` scaled by a scalar waveform `u: ℝ → ℝ`. [`VectorFunction`] is
//! that immutable pair, and [`InputFunction`] is the scalar waveform.
//!
//! Waveforms used by feedback controls are plain value variants (constant,
//! sinusoid, zero) evaluated through a single dispatcher, so that scaling or
//! negating a control never aliases state captured by a closure. Arbitrary
//! user signals go through [`InputFunction::Custom`].

use std::fmt;
use std::sync::Arc;

use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// A scalar waveform `u: ℝ → ℝ`.
///
/// The closed variants carry their parameters by value; [`eval`] is the only
/// dispatch point.
///
/// [`eval`]: InputFunction::eval
#[derive(Clone)]
pub enum InputFunction {
    /// `u(t) = 0`.
    Zero,
    /// `u(t) = value`.
    Constant(f64),
    /// `u(t) = amplitude · sin(2π·frequency·t + phase)`.
    Sine {
        amplitude: f64,
        frequency: f64,
        phase: f64,
    },
    /// An arbitrary user-supplied waveform. Must be referentially
    /// transparent: the same `t` always yields the same value.
    Custom(Arc<dyn Fn(f64) -> f64 + Send + Sync>),
}

impl InputFunction {
    /// Evaluate the waveform at time `t`.
    pub fn eval(&self, t: f64) -> f64 {
        match self {
            Self::Zero => 0.0,
            Self::Constant(value) => *value,
            Self::Sine {
                amplitude,
                frequency,
                phase,
            } => amplitude * (2.0 * std::f64::consts::PI * frequency * t + phase).sin(),
            Self::Custom(f) => f(t),
        }
    }

    /// Wrap a closure as a custom waveform.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }
}

impl fmt::Debug for InputFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zero => write!(f, "Zero"),
            Self::Constant(value) => write!(f, "Constant({})", value),
            Self::Sine {
                amplitude,
                frequency,
                phase,
            } => write!(
                f,
                "Sine {{ amplitude: {}, frequency: {}, phase: {} }}",
                amplitude, frequency, phase
            ),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// An immutable pair `(B, u)` representing the vector-valued input `B·u(t)`.
///
/// The steering vector's length is fixed at construction and never changes.
#[derive(Debug, Clone)]
pub struct VectorFunction<R: Runtime> {
    /// Steering vector, a length-N column.
    pub b: Tensor<R>,
    /// Scalar waveform.
    pub u: InputFunction,
}

impl<R: Runtime> VectorFunction<R> {
    /// Create a new vector function from a steering vector and a waveform.
    pub fn new(b: Tensor<R>, u: InputFunction) -> Self {
        Self { b, u }
    }

    /// Dimension N of the steering vector.
    pub fn order(&self) -> usize {
        self.b.shape()[0]
    }

    /// Evaluate `B·u(t)` into a plain vector.
    pub fn bu(&self, t: f64) -> Vec<f64> {
        let scale = self.u.eval(t);
        let b: Vec<f64> = self.b.to_vec();
        b.iter().map(|&bi| bi * scale).collect()
    }

    /// Evaluate `B·u(t)` as a tensor on the steering vector's device.
    pub fn value(&self, t: f64) -> Tensor<R> {
        let data = self.bu(t);
        Tensor::<R>::from_slice(&data, &[data.len()], self.b.device())
    }
}

/// Dirac delta surrogate: a narrow normalised Gaussian pulse.
///
/// Useful as an impulse input when probing a model's response numerically.
pub fn dirac_delta(x: f64) -> f64 {
    let a: f64 = 1e-9;
    let a2 = a * a;
    let c1 = 1.0 / (a.abs() * std::f64::consts::PI.sqrt());
    c1 * (-x * x / a2).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use numr::runtime::cpu::{CpuDevice, CpuRuntime};

    #[test]
    fn test_input_function_eval() {
        assert_eq!(InputFunction::Zero.eval(3.7), 0.0);
        assert_eq!(InputFunction::Constant(2.5).eval(-1.0), 2.5);

        let sine = InputFunction::Sine {
            amplitude: 2.0,
            frequency: 1.0,
            phase: 0.0,
        };
        // sin(2π·0.25) = 1
        assert!((sine.eval(0.25) - 2.0).abs() < 1e-12);

        let custom = InputFunction::from_fn(|t| t * t);
        assert_eq!(custom.eval(3.0), 9.0);
    }

    #[test]
    fn test_sine_phase_offset() {
        let sine = InputFunction::Sine {
            amplitude: 1.0,
            frequency: 10.0,
            phase: std::f64::consts::PI / 2.0,
        };
        // A quarter-period phase shift turns sin into cos.
        assert!((sine.eval(0.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_vector_function_scales_steering_vector() {
        let device = CpuDevice::new();
        let b = Tensor::<CpuRuntime>::from_slice(&[1.0, -2.0, 0.5], &[3], &device);
        let vf = VectorFunction::new(b, InputFunction::Constant(4.0));

        assert_eq!(vf.order(), 3);
        let out = vf.bu(0.0);
        assert_eq!(out, vec![4.0, -8.0, 2.0]);
    }

    #[test]
    fn test_vector_function_is_deterministic() {
        let device = CpuDevice::new();
        let b = Tensor::<CpuRuntime>::from_slice(&[1.0, 1.0], &[2], &device);
        let vf = VectorFunction::new(
            b,
            InputFunction::Sine {
                amplitude: 1.0,
                frequency: 3.0,
                phase: 0.1,
            },
        );
        assert_eq!(vf.bu(0.123), vf.bu(0.123));
    }

    #[test]
    fn test_dirac_delta_is_a_narrow_pulse() {
        assert!(dirac_delta(0.0) > 1e8);
        assert!(dirac_delta(1e-6).abs() < 1e-300);
    }
}
