//! Control codewords and the per-sample control bank.
//!
//! At every sample tick the bank quantises the current state into one bit per
//! control and packs the bits into a *codeword* (bit i has weight `2^i`,
//! following the declaration order of the controls). Codewords index
//! lazily-populated caches of pre-solved one-period control responses: one
//! cache for simulation, and — after an explicit build step — one each for
//! the forward and backward reconstruction filters.

mod lookup;

use std::fmt;

use numr::runtime::cpu::CpuRuntime;
use numr::tensor::Tensor;

use crate::network::Control;
use crate::ode::OdeError;

pub use lookup::{ContributionCache, OnePeriodSolver};

/// Result type for control operations.
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors from quantisation and contribution lookup.
#[derive(Debug, Clone)]
pub enum ControlError {
    /// Codeword outside `[0, 2^K)`.
    CodewordOutOfRange { codeword: usize, limit: usize },
    /// A control discriminates on a state component the state does not have.
    ControlIndexOutOfRange { index: usize, order: usize },
    /// An injection vector does not match the plant's state dimension.
    ShapeMismatch {
        expected: usize,
        found: usize,
        context: String,
    },
    /// A filter cache was queried before the build step.
    MissingPrecomputation { context: String },
    /// The one-period solve failed.
    Ode(OdeError),
    /// Error from an underlying numr operation.
    NumrError(String),
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CodewordOutOfRange { codeword, limit } => {
                write!(f, "codeword {} out of range [0, {})", codeword, limit)
            }
            Self::ControlIndexOutOfRange { index, order } => write!(
                f,
                "control {} discriminates on a state of order {}",
                index, order
            ),
            Self::ShapeMismatch {
                expected,
                found,
                context,
            } => write!(
                f,
                "{}: injection vector of length {} does not match state order {}",
                context, found, expected
            ),
            Self::MissingPrecomputation { context } => {
                write!(f, "{}: filter contributions have not been precomputed", context)
            }
            Self::Ode(err) => write!(f, "one-period solve failed: {}", err),
            Self::NumrError(msg) => write!(f, "numr error: {}", msg),
        }
    }
}

impl std::error::Error for ControlError {}

impl From<OdeError> for ControlError {
    fn from(err: OdeError) -> Self {
        Self::Ode(err)
    }
}

impl From<numr::error::Error> for ControlError {
    fn from(err: numr::error::Error) -> Self {
        Self::NumrError(err.to_string())
    }
}

/// Pack control bits into a codeword; bit i carries weight `2^i`.
pub fn bits_to_index(bits: &[u8]) -> usize {
    bits.iter()
        .enumerate()
        .map(|(i, &bit)| (bit as usize) << i)
        .sum()
}

/// Unpack a codeword into `length` control bits.
pub fn index_to_bits(index: usize, length: usize) -> Vec<u8> {
    (0..length).map(|i| ((index >> i) & 1) as u8).collect()
}

/// Unpack a codeword into the signed factors `σᵢ = 2·bitᵢ − 1`.
pub fn index_to_signs(index: usize, length: usize) -> Vec<f64> {
    index_to_bits(index, length)
        .iter()
        .map(|&bit| 2.0 * bit as f64 - 1.0)
        .collect()
}

/// The forward/backward filter caches, built once per reconstruction.
struct FilterLookups {
    forward_solver: OnePeriodSolver,
    forward_cache: ContributionCache,
    backward_solver: OnePeriodSolver,
    backward_cache: ContributionCache,
}

/// A bank of feedback controls tied to a plant.
///
/// Owns the simulation contribution cache and, after
/// [`precompute_filter_contributions`], the filter caches. All caches are
/// keyed by codeword, populated on first use, and immutable once written.
///
/// [`precompute_filter_contributions`]: ControlBank::precompute_filter_contributions
pub struct ControlBank {
    controls: Vec<Control<CpuRuntime>>,
    ts: f64,
    order: usize,
    simulation_solver: OnePeriodSolver,
    simulation_cache: ContributionCache,
    filter: Option<FilterLookups>,
}

impl ControlBank {
    /// Create a bank for `controls` acting on a plant with state dynamics
    /// `dynamics` and sample period `ts`.
    pub fn new(
        controls: Vec<Control<CpuRuntime>>,
        dynamics: &Tensor<CpuRuntime>,
        ts: f64,
    ) -> ControlResult<Self> {
        let order = dynamics.shape()[0];
        for (index, ctrl) in controls.iter().enumerate() {
            let len = ctrl.vector().shape()[0];
            if len != order {
                return Err(ControlError::ShapeMismatch {
                    expected: order,
                    found: len,
                    context: format!("control {}", index),
                });
            }
        }
        let scenarios = 1usize << controls.len();
        let simulation_solver = OnePeriodSolver::new(dynamics.clone(), controls.clone(), ts, false);
        Ok(Self {
            controls,
            ts,
            order,
            simulation_solver,
            simulation_cache: ContributionCache::new(scenarios),
            filter: None,
        })
    }

    /// Number of controls K.
    pub fn number_of_controls(&self) -> usize {
        self.controls.len()
    }

    /// Number of distinct codewords, `2^K`.
    pub fn scenario_count(&self) -> usize {
        1usize << self.controls.len()
    }

    /// Sample period.
    pub fn ts(&self) -> f64 {
        self.ts
    }

    /// The controls, in codeword bit order.
    pub fn controls(&self) -> &[Control<CpuRuntime>] {
        &self.controls
    }

    /// Quantise a state into a codeword.
    ///
    /// Analog-switch and switched-capacitor controls threshold their own
    /// state component; oscillator controls threshold the inner product of
    /// their injection vector with the state. Strictly positive → bit 1.
    pub fn quantize(&self, state: &[f64]) -> ControlResult<usize> {
        let mut bits = vec![0u8; self.controls.len()];
        for (i, ctrl) in self.controls.iter().enumerate() {
            let discriminant = match ctrl {
                Control::Oscillator { vector, .. } => {
                    let v: Vec<f64> = vector.to_vec();
                    v.iter().zip(state.iter()).map(|(a, b)| a * b).sum::<f64>()
                }
                _ => *state
                    .get(i)
                    .ok_or(ControlError::ControlIndexOutOfRange {
                        index: i,
                        order: state.len(),
                    })?,
            };
            bits[i] = u8::from(discriminant > 0.0);
        }
        Ok(bits_to_index(&bits))
    }

    /// The pre-solved simulation contribution for a codeword: the one-period
    /// response of the uncontrolled plant driven only by the codeword-implied
    /// control waveforms, from zero state.
    pub fn simulation_contribution(&self, codeword: usize) -> ControlResult<Vec<f64>> {
        self.simulation_cache
            .get_or_compute(codeword, || self.simulation_solver.vector(codeword))
    }

    /// Build the forward and backward filter caches for the reconstruction
    /// dynamics `A_f` and `A_b`.
    ///
    /// The forward cache solves `x' = A_f·x + Σᵢ σᵢ·Bᵢuᵢ(τ)`, the backward
    /// cache `x' = A_b·x − Σᵢ σᵢ·Bᵢuᵢ(τ)`, both from zero state over one
    /// sample period. Codeword keying assumes oscillator carriers are
    /// phase-coherent with the sample clock.
    pub fn precompute_filter_contributions(
        &mut self,
        forward_dynamics: &Tensor<CpuRuntime>,
        backward_dynamics: &Tensor<CpuRuntime>,
    ) {
        let scenarios = self.scenario_count();
        self.filter = Some(FilterLookups {
            forward_solver: OnePeriodSolver::new(
                forward_dynamics.clone(),
                self.controls.clone(),
                self.ts,
                false,
            ),
            forward_cache: ContributionCache::new(scenarios),
            backward_solver: OnePeriodSolver::new(
                backward_dynamics.clone(),
                self.controls.clone(),
                self.ts,
                true,
            ),
            backward_cache: ContributionCache::new(scenarios),
        });
    }

    /// Forward filter contribution for a codeword.
    pub fn forward_filter_contribution(&self, codeword: usize) -> ControlResult<Vec<f64>> {
        let filter = self
            .filter
            .as_ref()
            .ok_or_else(|| ControlError::MissingPrecomputation {
                context: "forward filter".to_string(),
            })?;
        filter
            .forward_cache
            .get_or_compute(codeword, || filter.forward_solver.vector(codeword))
    }

    /// Backward filter contribution for a codeword.
    pub fn backward_filter_contribution(&self, codeword: usize) -> ControlResult<Vec<f64>> {
        let filter = self
            .filter
            .as_ref()
            .ok_or_else(|| ControlError::MissingPrecomputation {
                context: "backward filter".to_string(),
            })?;
        filter
            .backward_cache
            .get_or_compute(codeword, || filter.backward_solver.vector(codeword))
    }

    /// State order of the plant the bank is tied to.
    pub fn order(&self) -> usize {
        self.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use numr::runtime::cpu::CpuDevice;

    fn setup() -> CpuDevice {
        CpuDevice::new()
    }

    fn switch(device: &CpuDevice, v: &[f64]) -> Control<CpuRuntime> {
        Control::AnalogSwitch {
            state: false,
            vector: Tensor::<CpuRuntime>::from_slice(v, &[v.len()], device),
        }
    }

    #[test]
    fn test_codeword_round_trip_pairs() {
        // (index, bits) with bit i weighted 2^i.
        let cases: &[(usize, &[u8])] = &[
            (1, &[1]),
            (2, &[0, 1]),
            (3, &[1, 1]),
            (4, &[0, 0, 1]),
            (5, &[1, 0, 1]),
            (6, &[0, 1, 1]),
        ];
        for (index, bits) in cases {
            assert_eq!(bits_to_index(bits), *index);
            assert_eq!(index_to_bits(*index, bits.len()), bits.to_vec());
        }
    }

    #[test]
    fn test_codeword_round_trip_exhaustive() {
        for k in 0..=6usize {
            for w in 0..(1usize << k) {
                assert_eq!(bits_to_index(&index_to_bits(w, k)), w);
            }
        }
    }

    #[test]
    fn test_index_to_signs() {
        assert_eq!(index_to_signs(5, 3), vec![1.0, -1.0, 1.0]);
        assert_eq!(index_to_signs(0, 2), vec![-1.0, -1.0]);
    }

    #[test]
    fn test_quantize_sign_convention() {
        let device = setup();
        let dynamics = Tensor::<CpuRuntime>::zeros(&[3, 3], numr::dtype::DType::F64, &device);
        let bank = ControlBank::new(
            vec![
                switch(&device, &[1.0, 0.0, 0.0]),
                switch(&device, &[0.0, 1.0, 0.0]),
                switch(&device, &[0.0, 0.0, 1.0]),
            ],
            &dynamics,
            1e-3,
        )
        .unwrap();

        // Strictly-greater-than-zero sets the bit; zero does not.
        assert_eq!(bank.quantize(&[1.0, -1.0, 0.0]).unwrap(), 0b001);
        assert_eq!(bank.quantize(&[-1.0, 2.0, 3.0]).unwrap(), 0b110);
        assert_eq!(bank.quantize(&[0.0, 0.0, 0.0]).unwrap(), 0);
    }

    #[test]
    fn test_quantize_oscillator_uses_inner_product() {
        let device = setup();
        let dynamics = Tensor::<CpuRuntime>::zeros(&[2, 2], numr::dtype::DType::F64, &device);
        let osc = Control::Oscillator {
            state: false,
            vector: Tensor::<CpuRuntime>::from_slice(&[1.0, 0.0], &[2], &device),
            frequency: 1.0,
            phase: 0.0,
        };
        let bank = ControlBank::new(vec![osc.clone(), osc], &dynamics, 1e-3).unwrap();

        // Both controls share the same discriminant, so both bits agree.
        assert_eq!(bank.quantize(&[1.0, -5.0]).unwrap(), 0b11);
        assert_eq!(bank.quantize(&[-1.0, 5.0]).unwrap(), 0b00);
    }

    #[test]
    fn test_bank_rejects_mismatched_vectors() {
        let device = setup();
        let dynamics = Tensor::<CpuRuntime>::zeros(&[2, 2], numr::dtype::DType::F64, &device);
        assert!(matches!(
            ControlBank::new(vec![switch(&device, &[1.0])], &dynamics, 1e-3),
            Err(ControlError::ShapeMismatch { expected: 2, found: 1, .. })
        ));
    }

    #[test]
    fn test_filter_lookup_before_build_is_fatal() {
        let device = setup();
        let dynamics = Tensor::<CpuRuntime>::zeros(&[1, 1], numr::dtype::DType::F64, &device);
        let bank = ControlBank::new(vec![switch(&device, &[1.0])], &dynamics, 1e-3).unwrap();
        assert!(matches!(
            bank.forward_filter_contribution(0),
            Err(ControlError::MissingPrecomputation { .. })
        ));
        assert!(matches!(
            bank.backward_filter_contribution(1),
            Err(ControlError::MissingPrecomputation { .. })
        ));
    }

    #[test]
    fn test_empty_bank_contribution_is_zero() {
        let device = setup();
        let dynamics = Tensor::<CpuRuntime>::from_slice(&[-1.0, 0.0, 0.0, -1.0], &[2, 2], &device);
        let bank = ControlBank::new(vec![], &dynamics, 1e-3).unwrap();
        assert_eq!(bank.scenario_count(), 1);
        assert_eq!(bank.quantize(&[5.0, -5.0]).unwrap(), 0);
        assert_eq!(bank.simulation_contribution(0).unwrap(), vec![0.0, 0.0]);
    }
}
