//! One-step and adaptive Runge–Kutta solvers.
//!
//! # Why CPU-Only?
//!
//! A Runge–Kutta step is a short chain of small matrix-vector products with a
//! strict stage-to-stage dependency, and the adaptive loop is control-flow
//! driven by scalar error norms. The parallelism that is worth having — over
//! the independent columns of a matrix state, and over competing trial step
//! sizes — is thread parallelism, not data parallelism.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;

use numr::runtime::cpu::CpuRuntime;
use numr::tensor::Tensor;

use crate::linalg;
use crate::ssm::SystemDynamics;

use super::error::{OdeError, OdeResult};
use super::tableau::{euler, fehlberg45, rk4, ButcherTableau};

/// Failed-round budget for adaptive stepping.
pub const MAX_ITERATIONS: usize = 1_000_000;

/// Number of step-length candidates raced per adaptive round.
const CANDIDATES: usize = 4;

/// Step-controller safety factor and growth clamps.
const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 5.0;

/// An explicit Runge–Kutta method, parameterised by its Butcher tableau.
#[derive(Debug, Clone)]
pub struct RungeKutta {
    pub tableau: ButcherTableau,
}

impl RungeKutta {
    pub fn new(tableau: ButcherTableau) -> Self {
        Self { tableau }
    }

    /// Forward Euler method.
    pub fn euler() -> Self {
        Self::new(euler())
    }

    /// Classic fourth-order method.
    pub fn rk4() -> Self {
        Self::new(rk4())
    }

    /// Fehlberg 4(5) with embedded error estimation.
    pub fn fehlberg45() -> Self {
        Self::new(fehlberg45())
    }

    /// One explicit step over `[from, to]` for a single state vector.
    pub fn compute_vec(
        &self,
        from: f64,
        to: f64,
        state: &[f64],
        system: &SystemDynamics<CpuRuntime>,
    ) -> OdeResult<Vec<f64>> {
        Ok(self.step(from, to, state, system)?.0)
    }

    /// One explicit step over `[from, to]`.
    ///
    /// `value` is either a length-N vector or an N×M matrix whose columns are
    /// independent systems sharing the same dynamics; columns integrate on
    /// their own threads and any column failure fails the whole call.
    pub fn compute(
        &self,
        from: f64,
        to: f64,
        value: &Tensor<CpuRuntime>,
        system: &SystemDynamics<CpuRuntime>,
    ) -> OdeResult<Tensor<CpuRuntime>> {
        self.solve_columns(value, |column| self.step(from, to, column, system).map(|r| r.0))
    }

    /// Adaptive integration of a single state vector over `[from, to]`.
    pub fn adaptive_compute_vec(
        &self,
        from: f64,
        to: f64,
        tolerance: f64,
        state: &[f64],
        system: &SystemDynamics<CpuRuntime>,
    ) -> OdeResult<Vec<f64>> {
        if to < from {
            return Err(OdeError::InvalidInterval {
                from,
                to,
                context: "adaptive_compute".to_string(),
            });
        }
        self.adaptive_column(from, to, tolerance, state, system)
    }

    /// Adaptive integration over `[from, to]` keeping the local ℓ¹ error
    /// estimate of every accepted step below `tolerance`.
    pub fn adaptive_compute(
        &self,
        from: f64,
        to: f64,
        tolerance: f64,
        value: &Tensor<CpuRuntime>,
        system: &SystemDynamics<CpuRuntime>,
    ) -> OdeResult<Tensor<CpuRuntime>> {
        if to < from {
            return Err(OdeError::InvalidInterval {
                from,
                to,
                context: "adaptive_compute".to_string(),
            });
        }
        self.solve_columns(value, |column| {
            self.adaptive_column(from, to, tolerance, column, system)
        })
    }

    /// Run `solve` on every column of `value`, in parallel when there is more
    /// than one column, and reassemble the result with the input's shape.
    fn solve_columns<F>(&self, value: &Tensor<CpuRuntime>, solve: F) -> OdeResult<Tensor<CpuRuntime>>
    where
        F: Fn(&[f64]) -> OdeResult<Vec<f64>> + Sync,
    {
        let shape = value.shape().to_vec();
        let (rows, cols) = match shape.len() {
            1 => (shape[0], 1),
            2 => (shape[0], shape[1]),
            _ => {
                return Err(OdeError::ShapeMismatch {
                    expected: 2,
                    found: shape.len(),
                    context: "state must be a vector or a matrix".to_string(),
                })
            }
        };

        let data: Vec<f64> = value.to_vec();
        let columns: Vec<Vec<f64>> = (0..cols)
            .map(|j| (0..rows).map(|i| data[i * cols + j]).collect())
            .collect();

        let solved: Vec<Vec<f64>> = if cols <= 1 {
            let mut out = Vec::with_capacity(cols);
            for column in &columns {
                out.push(solve(column)?);
            }
            out
        } else {
            let results: Vec<OdeResult<Vec<f64>>> = thread::scope(|scope| {
                let handles: Vec<_> = columns
                    .iter()
                    .map(|column| scope.spawn(|| solve(column)))
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle.join().unwrap_or_else(|_| {
                            Err(OdeError::NumericalError {
                                message: "integration worker panicked".to_string(),
                            })
                        })
                    })
                    .collect()
            });
            let mut out = Vec::with_capacity(cols);
            for result in results {
                out.push(result?);
            }
            out
        };

        let mut result = vec![0.0; rows * cols];
        for (j, column) in solved.iter().enumerate() {
            for (i, &x) in column.iter().enumerate() {
                result[i * cols + j] = x;
            }
        }
        Ok(Tensor::<CpuRuntime>::from_slice(
            &result,
            &shape,
            value.device(),
        ))
    }

    /// One step of the tableau for a single column, returning the advanced
    /// state and the embedded error estimate (zero without `b̂`).
    fn step(
        &self,
        from: f64,
        to: f64,
        x0: &[f64],
        system: &SystemDynamics<CpuRuntime>,
    ) -> OdeResult<(Vec<f64>, Vec<f64>)> {
        let n = system.order();
        if x0.len() != n {
            return Err(OdeError::ShapeMismatch {
                expected: n,
                found: x0.len(),
                context: "step".to_string(),
            });
        }

        let h = to - from;
        let stages = self.tableau.stages;
        let linear = matches!(system, SystemDynamics::Linear(_));

        // Stage derivatives. Under the linear fast path the stages start from
        // the zero state: they only have to capture the input terms, the
        // autonomous drift is applied in closed form below.
        let mut k: Vec<Vec<f64>> = Vec::with_capacity(stages);
        for stage in 0..stages {
            let mut x = if linear { vec![0.0; n] } else { x0.to_vec() };
            for (j, &a) in self.tableau.matrix[stage].iter().enumerate() {
                if a == 0.0 {
                    continue;
                }
                for i in 0..n {
                    x[i] += h * a * k[j][i];
                }
            }
            k.push(system.derivative(from + self.tableau.nodes[stage] * h, &x));
        }

        let mut result = match system {
            SystemDynamics::Linear(model) => {
                let a: Vec<f64> = model.a.to_vec();
                let ah: Vec<f64> = a.iter().map(|x| x * h).collect();
                let drift = linalg::expm(&ah, n)?;
                linalg::mat_vec(&drift, x0, n, n)
            }
            _ => x0.to_vec(),
        };

        for (stage, ki) in k.iter().enumerate() {
            let w = self.tableau.weights[stage];
            if w == 0.0 {
                continue;
            }
            for i in 0..n {
                result[i] += h * w * ki[i];
            }
        }

        let mut err = vec![0.0; n];
        if let Some(error_weights) = &self.tableau.error_weights {
            for (stage, ki) in k.iter().enumerate() {
                let dw = error_weights[stage] - self.tableau.weights[stage];
                if dw == 0.0 {
                    continue;
                }
                for i in 0..n {
                    err[i] += h * dw * ki[i];
                }
            }
        }

        Ok((result, err))
    }

    /// Adaptive stepping for one column.
    ///
    /// Each round races a halving ladder of candidate step lengths on their
    /// own threads; the longest candidate whose error estimate beats the
    /// tolerance wins and the losers are cancelled through an atomic tag they
    /// check before publishing. A round where nothing passes halves the
    /// ladder and counts against [`MAX_ITERATIONS`].
    fn adaptive_column(
        &self,
        from: f64,
        to: f64,
        tolerance: f64,
        x0: &[f64],
        system: &SystemDynamics<CpuRuntime>,
    ) -> OdeResult<Vec<f64>> {
        let span = to - from;
        if span == 0.0 {
            return Ok(x0.to_vec());
        }
        let min_step = span * 1e-14;

        let mut t_now = from;
        let mut x = x0.to_vec();
        let mut base_h = span;
        let mut failures = 0usize;
        let mut best_error = f64::INFINITY;

        while t_now < to {
            let remaining = to - t_now;
            let steps: Vec<f64> = (0..CANDIDATES)
                .map(|c| (base_h / (2.0_f64).powi(c as i32)).min(remaining))
                .collect();

            let mut winner: Option<(usize, Vec<f64>, f64)> = None;
            let mut round_best = f64::INFINITY;
            let mut round_error: Option<OdeError> = None;

            // The leading candidate alone settles most rounds; the parallel
            // race below only runs when it misses the tolerance.
            match self.step(t_now, t_now + steps[0], &x, system) {
                Ok((state, err)) => {
                    let norm: f64 = err.iter().map(|e| e.abs()).sum();
                    if norm < tolerance {
                        winner = Some((0, state, norm));
                    } else if norm.is_finite() {
                        round_best = round_best.min(norm);
                    }
                }
                Err(err) => round_error = Some(err),
            }

            if winner.is_none() && round_error.is_none() && CANDIDATES > 1 {
                let cancelled = AtomicBool::new(false);
                let (tx, rx) =
                    mpsc::sync_channel::<(usize, OdeResult<(Vec<f64>, f64)>)>(CANDIDATES);

                thread::scope(|scope| {
                    for (index, &h) in steps.iter().enumerate().skip(1) {
                        let tx = tx.clone();
                        let cancelled = &cancelled;
                        let x = &x;
                        scope.spawn(move || {
                            let outcome = self
                                .step(t_now, t_now + h, x, system)
                                .map(|(state, err)| {
                                    let norm: f64 = err.iter().map(|e| e.abs()).sum();
                                    (state, norm)
                                });
                            // A cancelled loser must not publish.
                            if !cancelled.load(Ordering::Acquire) {
                                let _ = tx.send((index, outcome));
                            }
                        });
                    }
                    drop(tx);

                    let mut slots: Vec<Option<OdeResult<(Vec<f64>, f64)>>> =
                        (0..CANDIDATES).map(|_| None).collect();
                    while let Ok((index, outcome)) = rx.recv() {
                        slots[index] = Some(outcome);
                        // The longest candidate that met the tolerance wins;
                        // it is only decidable once every longer candidate
                        // is in.
                        let mut decidable = true;
                        for slot_index in 1..CANDIDATES {
                            let passes = match &slots[slot_index] {
                                None => {
                                    decidable = false;
                                    break;
                                }
                                Some(Ok((_, norm))) => {
                                    if *norm >= tolerance && norm.is_finite() {
                                        round_best = round_best.min(*norm);
                                    }
                                    *norm < tolerance
                                }
                                Some(Err(err)) => {
                                    if round_error.is_none() {
                                        round_error = Some(err.clone());
                                    }
                                    false
                                }
                            };
                            if passes {
                                if let Some(Ok((state, norm))) = slots[slot_index].take() {
                                    winner = Some((slot_index, state, norm));
                                }
                                break;
                            }
                        }
                        if winner.is_some() || decidable {
                            cancelled.store(true, Ordering::Release);
                            break;
                        }
                    }
                });
            }

            // A deterministic stepping error will not get better on retry.
            if winner.is_none() {
                if let Some(err) = round_error {
                    return Err(err);
                }
            }

            match winner {
                Some((index, state, norm)) => {
                    t_now += steps[index];
                    x = state;
                    // Standard error-based controller for the next trial.
                    let factor = if norm > 0.0 {
                        (SAFETY * (tolerance / norm).powf(0.2)).clamp(MIN_FACTOR, MAX_FACTOR)
                    } else {
                        MAX_FACTOR
                    };
                    base_h = (steps[index] * factor).max(min_step);
                    failures = 0;
                }
                None => {
                    best_error = best_error.min(round_best);
                    failures += 1;
                    if failures >= MAX_ITERATIONS {
                        return Err(OdeError::DidNotConverge {
                            iterations: failures,
                            best_error,
                            completed: (t_now - from) / span,
                            context: "adaptive_compute".to_string(),
                        });
                    }
                    base_h = steps[CANDIDATES - 1] / 2.0;
                    if base_h < min_step {
                        return Err(OdeError::StepSizeTooSmall {
                            step: base_h,
                            t: t_now,
                            context: "adaptive_compute".to_string(),
                        });
                    }
                }
            }
        }

        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{InputFunction, VectorFunction};
    use crate::ssm::{AdhocSystem, LinearStateSpaceModel};
    use numr::runtime::cpu::{CpuDevice, CpuRuntime};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn setup() -> CpuDevice {
        CpuDevice::new()
    }

    fn decay_model(device: &CpuDevice) -> SystemDynamics<CpuRuntime> {
        // x' = -x + 1, x(0) = 0, solution 1 - e^{-t}.
        let a = Tensor::<CpuRuntime>::from_slice(&[-1.0], &[1, 1], device);
        let c = Tensor::<CpuRuntime>::from_slice(&[1.0], &[1, 1], device);
        let input = VectorFunction::new(
            Tensor::<CpuRuntime>::from_slice(&[1.0], &[1], device),
            InputFunction::Constant(1.0),
        );
        SystemDynamics::Linear(LinearStateSpaceModel::new(a, c, vec![input]).unwrap())
    }

    #[test]
    fn test_rk4_linear_decay_thousand_steps() {
        let device = setup();
        let system = decay_model(&device);
        let rk = RungeKutta::rk4();

        let mut x = vec![0.0];
        let h = 1.0 / 1000.0;
        for step in 0..1000 {
            let t = step as f64 * h;
            x = rk.compute_vec(t, t + h, &x, &system).unwrap();
        }
        let exact = 1.0 - (-1.0_f64).exp();
        assert!(
            (x[0] - exact).abs() < 1e-6,
            "x(1) = {}, exact = {}",
            x[0],
            exact
        );
    }

    #[test]
    fn test_lti_fast_path_zero_input_is_matrix_exponential() {
        let device = setup();
        // Autonomous rotation: one full step must land on exp(A·T)·x0.
        let a = Tensor::<CpuRuntime>::from_slice(&[0.0, -1.0, 1.0, 0.0], &[2, 2], &device);
        let c = Tensor::<CpuRuntime>::from_slice(&[1.0, 0.0], &[1, 2], &device);
        let model = LinearStateSpaceModel::new(a, c, vec![]).unwrap();
        let system = SystemDynamics::Linear(model);

        let rk = RungeKutta::rk4();
        let t = 2.0;
        let x = rk.compute_vec(0.0, t, &[1.0, 0.0], &system).unwrap();
        assert!((x[0] - t.cos()).abs() < 1e-10);
        assert!((x[1] - t.sin()).abs() < 1e-10);
    }

    #[test]
    fn test_euler_single_stage() {
        let adhoc = AdhocSystem::new(1, |_t, x| vec![-x[0]]);
        let system: SystemDynamics<CpuRuntime> = SystemDynamics::Adhoc(adhoc);
        let rk = RungeKutta::euler();
        let x = rk.compute_vec(0.0, 0.1, &[1.0], &system).unwrap();
        // One Euler step: x - h·x.
        assert!((x[0] - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_compute_matrix_columns_are_independent() {
        let device = setup();
        let adhoc = AdhocSystem::new(2, |_t, x| vec![-x[0], -2.0 * x[1]]);
        let system: SystemDynamics<CpuRuntime> = SystemDynamics::Adhoc(adhoc);
        let rk = RungeKutta::rk4();

        let value = Tensor::<CpuRuntime>::from_slice(
            &[1.0, 2.0, 3.0, 1.0, 2.0, 3.0],
            &[2, 3],
            &device,
        );
        let result = rk.compute(0.0, 0.01, &value, &system).unwrap();
        let data: Vec<f64> = result.to_vec();
        assert_eq!(result.shape(), &[2, 3]);
        // Columns scale independently of each other.
        assert!((data[1] / data[0] - 2.0).abs() < 1e-9);
        assert!((data[2] / data[0] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_shape_mismatch_is_fatal() {
        let adhoc = AdhocSystem::new(3, |_t, x| x.to_vec());
        let system: SystemDynamics<CpuRuntime> = SystemDynamics::Adhoc(adhoc);
        let rk = RungeKutta::rk4();
        assert!(matches!(
            rk.compute_vec(0.0, 1.0, &[1.0, 2.0], &system),
            Err(OdeError::ShapeMismatch { expected: 3, found: 2, .. })
        ));
    }

    #[test]
    fn test_adaptive_linear_decay() {
        let device = setup();
        let system = decay_model(&device);
        let rk = RungeKutta::fehlberg45();

        let value = Tensor::<CpuRuntime>::from_slice(&[0.0], &[1], &device);
        let result = rk.adaptive_compute(0.0, 1.0, 1e-9, &value, &system).unwrap();
        let x: Vec<f64> = result.to_vec();
        let exact = 1.0 - (-1.0_f64).exp();
        assert!((x[0] - exact).abs() < 1e-6);
    }

    #[test]
    fn test_adaptive_general_path_harmonic_oscillator() {
        let device = setup();
        let adhoc = AdhocSystem::new(2, |_t, x| vec![x[1], -x[0]]);
        let system: SystemDynamics<CpuRuntime> = SystemDynamics::Adhoc(adhoc);
        let rk = RungeKutta::fehlberg45();

        let value = Tensor::<CpuRuntime>::from_slice(&[1.0, 0.0], &[2], &device);
        let period = 2.0 * std::f64::consts::PI;
        let result = rk
            .adaptive_compute(0.0, period, 1e-8, &value, &system)
            .unwrap();
        let x: Vec<f64> = result.to_vec();
        assert!((x[0] - 1.0).abs() < 1e-4, "x0 = {}", x[0]);
        assert!(x[1].abs() < 1e-4, "x1 = {}", x[1]);
    }

    #[test]
    fn test_adaptive_matches_fine_fixed_step_on_random_chain() {
        let device = setup();
        let n = 9;
        let mut rng = StdRng::seed_from_u64(42);
        let a_data: Vec<f64> = (0..n * n).map(|_| rng.gen::<f64>()).collect();
        let x0 = vec![1.2, 32.0, 34.0, 12.0, 532.0, 12.0, 35.0, 1.0, 0.91283];

        let a = Tensor::<CpuRuntime>::from_slice(&a_data, &[n, n], &device);
        let c = Tensor::<CpuRuntime>::from_slice(&vec![1.0; n], &[1, n], &device);
        let mut b = vec![0.0; n];
        b[0] = 1.0;
        let input = VectorFunction::new(
            Tensor::<CpuRuntime>::from_slice(&b, &[n], &device),
            InputFunction::Constant(1.24),
        );
        let linear = SystemDynamics::Linear(
            LinearStateSpaceModel::new(a, c, vec![input]).unwrap(),
        );

        let value = Tensor::<CpuRuntime>::from_slice(&x0, &[n], &device);
        let adaptive = RungeKutta::fehlberg45()
            .adaptive_compute(0.0, 1.0, 1e-4, &value, &linear)
            .unwrap();
        let adaptive: Vec<f64> = adaptive.to_vec();

        // Reference: fine fixed-step RK4 through the generic path.
        let a_ref = a_data.clone();
        let adhoc = AdhocSystem::new(n, move |_t, x| {
            let mut dx = crate::linalg::mat_vec(&a_ref, x, n, n);
            dx[0] += 1.24;
            dx
        });
        let general: SystemDynamics<CpuRuntime> = SystemDynamics::Adhoc(adhoc);
        let rk = RungeKutta::rk4();
        let mut x = x0.clone();
        let steps = 100_000;
        let h = 1.0 / steps as f64;
        for step in 0..steps {
            let t = step as f64 * h;
            x = rk.compute_vec(t, t + h, &x, &general).unwrap();
        }

        for i in 0..n {
            let scale = x[i].abs().max(1.0);
            assert!(
                (adaptive[i] - x[i]).abs() / scale < 1e-3,
                "component {}: adaptive {} vs reference {}",
                i,
                adaptive[i],
                x[i]
            );
        }
    }

    #[test]
    fn test_bilinear_system_takes_general_path() {
        let device = setup();
        // x' = a_b·x·u with constant u = 1: exponential growth x·e^{a_b·t}.
        use crate::ssm::BilinearStateSpaceModel;
        let a_l = Tensor::<CpuRuntime>::from_slice(&[0.0], &[1, 1], &device);
        let a_b = Tensor::<CpuRuntime>::from_slice(&[0.5], &[1, 1], &device);
        let c = Tensor::<CpuRuntime>::from_slice(&[1.0], &[1, 1], &device);
        let input = VectorFunction::new(
            Tensor::<CpuRuntime>::from_slice(&[0.0], &[1], &device),
            InputFunction::Constant(1.0),
        );
        let model = BilinearStateSpaceModel::new(a_l, a_b, c, vec![input]).unwrap();
        let system: SystemDynamics<CpuRuntime> = SystemDynamics::Bilinear(model);

        let value = Tensor::<CpuRuntime>::from_slice(&[2.0], &[1], &device);
        let result = RungeKutta::fehlberg45()
            .adaptive_compute(0.0, 1.0, 1e-10, &value, &system)
            .unwrap();
        let x: Vec<f64> = result.to_vec();
        let exact = 2.0 * (0.5_f64).exp();
        assert!((x[0] - exact).abs() < 1e-6, "x = {}, exact = {}", x[0], exact);
    }

    #[test]
    fn test_adaptive_aborts_on_non_finite_derivative() {
        let adhoc = AdhocSystem::new(1, |_t, _x| vec![f64::NAN]);
        let system: SystemDynamics<CpuRuntime> = SystemDynamics::Adhoc(adhoc);
        let device = setup();
        let value = Tensor::<CpuRuntime>::from_slice(&[1.0], &[1], &device);
        let rk = RungeKutta::fehlberg45();
        let result = rk.adaptive_compute(0.0, 1.0, 1e-9, &value, &system);
        assert!(matches!(
            result,
            Err(OdeError::StepSizeTooSmall { .. }) | Err(OdeError::DidNotConverge { .. })
        ));
    }

    #[test]
    fn test_adaptive_zero_span_is_identity() {
        let device = setup();
        let system = decay_model(&device);
        let value = Tensor::<CpuRuntime>::from_slice(&[0.7], &[1], &device);
        let result = RungeKutta::fehlberg45()
            .adaptive_compute(2.0, 2.0, 1e-9, &value, &system)
            .unwrap();
        let x: Vec<f64> = result.to_vec();
        assert_eq!(x, vec![0.7]);
    }
}
