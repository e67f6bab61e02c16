//! Sampling networks: linear plants plus their feedback controls.
//!
//! A [`SamplingNetwork`] couples a [`LinearSystem`] `(A, B, C)` with an
//! ordered bank of [`Control`]s that observe the state and inject corrective
//! signals between sample ticks. Networks compose through the combinators in
//! [`topology`]; composition always constructs fresh controls with injection
//! vectors padded and shifted into the enlarged state space, so no two
//! networks ever share a control value.

pub mod topology;

use std::fmt;

use numr::runtime::Runtime;
use numr::tensor::Tensor;

use crate::signal::{InputFunction, VectorFunction};

/// Result type for network operations.
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Errors from network composition.
#[derive(Debug, Clone)]
pub enum NetworkError {
    /// Two systems cannot be combined because their port dimensions differ.
    DimensionMismatch {
        left: usize,
        right: usize,
        context: String,
    },
    /// A variadic combinator needs at least one operand.
    Empty { context: String },
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DimensionMismatch {
                left,
                right,
                context,
            } => write!(
                f,
                "{}: incompatible dimensions {} and {}",
                context, left, right
            ),
            Self::Empty { context } => write!(f, "{}: no systems to combine", context),
        }
    }
}

impl std::error::Error for NetworkError {}

/// A linear plant `(A, B, C)`.
#[derive(Debug, Clone)]
pub struct LinearSystem<R: Runtime> {
    /// State dynamics, N×N.
    pub a: Tensor<R>,
    /// Input matrix, N×K.
    pub b: Tensor<R>,
    /// Observation matrix, P×N.
    pub c: Tensor<R>,
}

impl<R: Runtime> LinearSystem<R> {
    pub fn new(a: Tensor<R>, b: Tensor<R>, c: Tensor<R>) -> Self {
        Self { a, b, c }
    }

    /// State dimension N.
    pub fn state_order(&self) -> usize {
        self.a.shape()[0]
    }

    /// Number of input columns K.
    pub fn input_order(&self) -> usize {
        self.b.shape()[1]
    }

    /// Number of observation rows P.
    pub fn output_order(&self) -> usize {
        self.c.shape()[0]
    }
}

/// A feedback control bounding the state of a sampling network.
///
/// Every variant carries a decision bit and an injection vector `v ∈ ℝᴺ`;
/// the variants differ in the waveform their response applies to it.
#[derive(Debug, Clone)]
pub enum Control<R: Runtime> {
    /// Constant response `(2s−1)·v`.
    AnalogSwitch { state: bool, vector: Tensor<R> },
    /// Carrier-modulated response `(2s−1)·v·sin(2πft+φ)`.
    Oscillator {
        state: bool,
        vector: Tensor<R>,
        frequency: f64,
        phase: f64,
    },
    /// Switched-capacitor control: a unit charge decaying with rate `1/(RC)`
    /// drains into the plant through `v`.
    SwitchedCapacitor {
        state: bool,
        r: f64,
        c: f64,
        vector: Tensor<R>,
    },
}

impl<R: Runtime> Control<R> {
    /// The decision bit.
    pub fn state(&self) -> bool {
        match self {
            Self::AnalogSwitch { state, .. }
            | Self::Oscillator { state, .. }
            | Self::SwitchedCapacitor { state, .. } => *state,
        }
    }

    /// Threshold decision: strictly positive discriminant sets the bit.
    pub fn set_state(&mut self, value: f64) {
        let bit = value > 0.0;
        match self {
            Self::AnalogSwitch { state, .. }
            | Self::Oscillator { state, .. }
            | Self::SwitchedCapacitor { state, .. } => *state = bit,
        }
    }

    /// The injection vector.
    pub fn vector(&self) -> &Tensor<R> {
        match self {
            Self::AnalogSwitch { vector, .. }
            | Self::Oscillator { vector, .. }
            | Self::SwitchedCapacitor { vector, .. } => vector,
        }
    }

    /// The same control with a replacement injection vector.
    pub fn with_vector(&self, vector: Tensor<R>) -> Self {
        match self {
            Self::AnalogSwitch { state, .. } => Self::AnalogSwitch {
                state: *state,
                vector,
            },
            Self::Oscillator {
                state,
                frequency,
                phase,
                ..
            } => Self::Oscillator {
                state: *state,
                vector,
                frequency: *frequency,
                phase: *phase,
            },
            Self::SwitchedCapacitor { state, r, c, .. } => Self::SwitchedCapacitor {
                state: *state,
                r: *r,
                c: *c,
                vector,
            },
        }
    }

    /// The control's response for its current decision bit: a vector function
    /// whose waveform is a plain value, never a captured closure.
    pub fn response(&self) -> VectorFunction<R> {
        let sigma = if self.state() { 1.0 } else { -1.0 };
        let v: Vec<f64> = self.vector().to_vec();
        let scaled: Vec<f64> = v.iter().map(|x| sigma * x).collect();
        let b = Tensor::<R>::from_slice(&scaled, &[scaled.len()], self.vector().device());
        match self {
            Self::AnalogSwitch { .. } => VectorFunction::new(b, InputFunction::Constant(1.0)),
            Self::Oscillator {
                frequency, phase, ..
            } => VectorFunction::new(
                b,
                InputFunction::Sine {
                    amplitude: 1.0,
                    frequency: *frequency,
                    phase: *phase,
                },
            ),
            // The capacitor drains through its own decaying state, not
            // through a waveform; see the control bank's one-period solver.
            Self::SwitchedCapacitor { .. } => VectorFunction::new(b, InputFunction::Zero),
        }
    }
}

/// A linear plant together with its ordered control bank.
#[derive(Debug, Clone)]
pub struct SamplingNetwork<R: Runtime> {
    pub system: LinearSystem<R>,
    pub controls: Vec<Control<R>>,
}

impl<R: Runtime> SamplingNetwork<R> {
    pub fn new(system: LinearSystem<R>, controls: Vec<Control<R>>) -> Self {
        Self { system, controls }
    }

    pub fn state_order(&self) -> usize {
        self.system.state_order()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use numr::runtime::cpu::{CpuDevice, CpuRuntime};

    fn vector(device: &CpuDevice, data: &[f64]) -> Tensor<CpuRuntime> {
        Tensor::<CpuRuntime>::from_slice(data, &[data.len()], device)
    }

    #[test]
    fn test_set_state_sign_convention() {
        let device = CpuDevice::new();
        let mut ctrl = Control::AnalogSwitch {
            state: false,
            vector: vector(&device, &[1.0]),
        };
        ctrl.set_state(0.5);
        assert!(ctrl.state());
        // Zero is not strictly positive.
        ctrl.set_state(0.0);
        assert!(!ctrl.state());
        ctrl.set_state(-3.0);
        assert!(!ctrl.state());
    }

    #[test]
    fn test_analog_switch_response_sign() {
        let device = CpuDevice::new();
        let mut ctrl = Control::AnalogSwitch {
            state: false,
            vector: vector(&device, &[2.0, -1.0]),
        };
        let low = ctrl.response();
        assert_eq!(low.bu(0.0), vec![-2.0, 1.0]);

        ctrl.set_state(1.0);
        let high = ctrl.response();
        assert_eq!(high.bu(123.0), vec![2.0, -1.0]);
    }

    #[test]
    fn test_oscillator_response_waveform() {
        let device = CpuDevice::new();
        let ctrl = Control::Oscillator {
            state: true,
            vector: vector(&device, &[1.0, 0.0]),
            frequency: 1.0,
            phase: 0.0,
        };
        let response = ctrl.response();
        // sin(2π·0.25) = 1
        let at_quarter = response.bu(0.25);
        assert!((at_quarter[0] - 1.0).abs() < 1e-12);
        assert!(at_quarter[1].abs() < 1e-12);
    }

    #[test]
    fn test_with_vector_preserves_kind_and_parameters() {
        let device = CpuDevice::new();
        let ctrl = Control::Oscillator {
            state: true,
            vector: vector(&device, &[1.0]),
            frequency: 42.0,
            phase: 0.5,
        };
        let padded = ctrl.with_vector(vector(&device, &[1.0, 0.0]));
        match padded {
            Control::Oscillator {
                state,
                frequency,
                phase,
                ref vector,
            } => {
                assert!(state);
                assert_eq!(frequency, 42.0);
                assert_eq!(phase, 0.5);
                assert_eq!(vector.shape(), &[2]);
            }
            _ => panic!("kind changed"),
        }
    }
}
