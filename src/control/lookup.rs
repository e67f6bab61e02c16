//! Lazy codeword-indexed contribution caches and their one-period solvers.

use once_cell::sync::OnceCell;

use numr::runtime::cpu::CpuRuntime;
use numr::tensor::Tensor;

use crate::linalg;
use crate::network::Control;
use crate::ode::RungeKutta;
use crate::signal::{InputFunction, VectorFunction};
use crate::ssm::{LinearStateSpaceModel, SystemDynamics};

use super::{index_to_signs, ControlError, ControlResult};

/// Error tolerance for the one-period contribution solves.
const SOLVE_TOLERANCE: f64 = 1e-9;

/// A codeword-indexed cache of contribution vectors.
///
/// Entries are populated on first access under a per-entry initialisation
/// barrier and never rewritten, so concurrent readers always observe the same
/// vector for the same codeword.
pub struct ContributionCache {
    entries: Vec<OnceCell<Vec<f64>>>,
}

impl ContributionCache {
    /// A cache with one slot per codeword.
    pub fn new(scenarios: usize) -> Self {
        Self {
            entries: (0..scenarios).map(|_| OnceCell::new()).collect(),
        }
    }

    /// Number of codeword slots.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fetch the cached vector for `codeword`, computing and storing it on
    /// first access.
    pub fn get_or_compute<F>(&self, codeword: usize, compute: F) -> ControlResult<Vec<f64>>
    where
        F: FnOnce() -> ControlResult<Vec<f64>>,
    {
        let entry = self
            .entries
            .get(codeword)
            .ok_or(ControlError::CodewordOutOfRange {
                codeword,
                limit: self.entries.len(),
            })?;
        entry.get_or_try_init(compute).map(|v| v.clone())
    }
}

/// Solves the one-sample-period response of a plant driven only by the
/// control waveforms implied by a codeword, from zero state.
///
/// Analog-switch and oscillator controls enter as inputs `σᵢ·Bᵢ·uᵢ(τ)`.
/// Switched-capacitor controls instead extend the state with one first-order
/// decay component each (rate `1/(RᵢCᵢ)`, initial charge `σᵢ`) coupled into
/// the base state through the injection vector; the result is projected back
/// to the base coordinates, a documented approximation of the discrete
/// capacitor reset.
///
/// With `negate` set every signed factor flips, which is what the backward
/// reconstruction filter requires.
pub struct OnePeriodSolver {
    dynamics: Tensor<CpuRuntime>,
    controls: Vec<Control<CpuRuntime>>,
    ts: f64,
    negate: bool,
}

impl OnePeriodSolver {
    pub fn new(
        dynamics: Tensor<CpuRuntime>,
        controls: Vec<Control<CpuRuntime>>,
        ts: f64,
        negate: bool,
    ) -> Self {
        Self {
            dynamics,
            controls,
            ts,
            negate,
        }
    }

    /// The contribution vector for `codeword`.
    pub fn vector(&self, codeword: usize) -> ControlResult<Vec<f64>> {
        let n = self.dynamics.shape()[0];
        let k = self.controls.len();
        if k == 0 {
            return Ok(vec![0.0; n]);
        }

        let mut signs = index_to_signs(codeword, k);
        if self.negate {
            for s in signs.iter_mut() {
                *s = -*s;
            }
        }

        let device = self.dynamics.device();
        let capacitors: Vec<usize> = self
            .controls
            .iter()
            .enumerate()
            .filter(|(_, ctrl)| matches!(ctrl, Control::SwitchedCapacitor { .. }))
            .map(|(i, _)| i)
            .collect();
        let extended = n + capacitors.len();

        // Extended dynamics: the base block, plus one decay state per
        // switched capacitor draining into the base state through its
        // injection vector.
        let base: Vec<f64> = self.dynamics.to_vec();
        let mut a = vec![0.0; extended * extended];
        for i in 0..n {
            for j in 0..n {
                a[i * extended + j] = base[i * n + j];
            }
        }
        let mut initial = vec![0.0; extended];
        for (slot, &ctrl_index) in capacitors.iter().enumerate() {
            if let Control::SwitchedCapacitor { r, c, vector, .. } = &self.controls[ctrl_index] {
                let v: Vec<f64> = vector.to_vec();
                for i in 0..n {
                    a[i * extended + n + slot] = v[i];
                }
                a[(n + slot) * extended + n + slot] = -1.0 / (r * c);
                initial[n + slot] = signs[ctrl_index];
            }
        }

        // Waveform-driven controls enter as inputs, padded to the extended
        // state space.
        let mut inputs = Vec::new();
        for (i, ctrl) in self.controls.iter().enumerate() {
            let u = match ctrl {
                Control::AnalogSwitch { .. } => InputFunction::Constant(1.0),
                Control::Oscillator {
                    frequency, phase, ..
                } => InputFunction::Sine {
                    amplitude: 1.0,
                    frequency: *frequency,
                    phase: *phase,
                },
                Control::SwitchedCapacitor { .. } => continue,
            };
            let v: Vec<f64> = ctrl.vector().to_vec();
            let mut b = vec![0.0; extended];
            for (dst, src) in b.iter_mut().zip(v.iter()) {
                *dst = signs[i] * src;
            }
            inputs.push(VectorFunction::new(
                Tensor::<CpuRuntime>::from_slice(&b, &[extended], device),
                u,
            ));
        }

        let observation = linalg::eye(extended, extended);
        let model = LinearStateSpaceModel::new(
            Tensor::<CpuRuntime>::from_slice(&a, &[extended, extended], device),
            Tensor::<CpuRuntime>::from_slice(&observation, &[extended, extended], device),
            inputs,
        )?;
        let system = SystemDynamics::Linear(model);

        let solver = RungeKutta::fehlberg45();
        let mut result =
            solver.adaptive_compute_vec(0.0, self.ts, SOLVE_TOLERANCE, &initial, &system)?;
        result.truncate(n);
        Ok(result)
    }
}
