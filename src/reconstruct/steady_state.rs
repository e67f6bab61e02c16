//! Steady-state two-pass reconstruction.
//!
//! # Why CPU-Only?
//!
//! Both message-passing recursions are strict chains — sample k+1 needs
//! sample k — so the useful concurrency is running the two recursions
//! against each other and merging finished indices as they meet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;

use once_cell::sync::OnceCell;

use numr::dtype::DType;
use numr::runtime::cpu::{CpuDevice, CpuRuntime};
use numr::tensor::Tensor;

use crate::control::ControlBank;
use crate::linalg;
use crate::ssm::LinearStateSpaceModel;

use super::care::{care, CareMethod};
use super::{ReconstructError, ReconstructResult};

/// Bound of the per-recursion completion-event channels.
const EVENT_BOUND: usize = 64;

/// The steady-state smoother: forward/backward filter recursions plus the
/// input-weight combination.
///
/// Built once per `(model, noise covariances)` configuration; the build
/// solves the two Riccati equations, derives the filter dynamics, and
/// instructs the control bank to prepare its forward and backward codeword
/// caches.
pub struct SteadyStateReconstructor {
    a_f_bar: Vec<f64>,
    a_b_bar: Vec<f64>,
    /// Input weights, N×K; estimates are `Wᵀ·(m_f − m_b)`.
    w: Vec<f64>,
    order: usize,
    input_order: usize,
    device: CpuDevice,
}

impl SteadyStateReconstructor {
    /// Build the reconstructor using the Hamiltonian CARE method.
    pub fn new(
        model: &LinearStateSpaceModel<CpuRuntime>,
        bank: &mut ControlBank,
        measurement_noise_covariance: &Tensor<CpuRuntime>,
        input_noise_covariance: &Tensor<CpuRuntime>,
    ) -> ReconstructResult<Self> {
        Self::with_method(
            model,
            bank,
            measurement_noise_covariance,
            input_noise_covariance,
            &CareMethod::MatrixFactorization,
        )
    }

    /// Build the reconstructor with an explicit CARE method.
    pub fn with_method(
        model: &LinearStateSpaceModel<CpuRuntime>,
        bank: &mut ControlBank,
        measurement_noise_covariance: &Tensor<CpuRuntime>,
        input_noise_covariance: &Tensor<CpuRuntime>,
        method: &CareMethod,
    ) -> ReconstructResult<Self> {
        let n = model.state_order();
        let p = model.observation_order();
        let k = model.input_order();
        let device = model.a.device().clone();

        let sigma_z_shape = measurement_noise_covariance.shape();
        if sigma_z_shape.len() != 2 || sigma_z_shape[0] != p || sigma_z_shape[1] != p {
            return Err(ReconstructError::ShapeMismatch {
                expected: p,
                found: sigma_z_shape[0],
                context: "measurement noise covariance".to_string(),
            });
        }
        let q_shape = input_noise_covariance.shape();
        if q_shape.len() != 2 || q_shape[0] != n || q_shape[1] != n {
            return Err(ReconstructError::ShapeMismatch {
                expected: n,
                found: q_shape[0],
                context: "input noise covariance".to_string(),
            });
        }

        let a: Vec<f64> = model.a.to_vec();
        let c: Vec<f64> = model.c.to_vec();
        let sigma_z: Vec<f64> = measurement_noise_covariance.to_vec();
        let q: Vec<f64> = input_noise_covariance.to_vec();

        // R = Cᵀ·Σ_z⁻¹·C
        let sigma_z_inv = linalg::inverse(&sigma_z, p).map_err(|err| {
            ReconstructError::NumericalError {
                message: format!("singular measurement noise covariance: {}", err),
            }
        })?;
        let ct = linalg::transpose(&c, p, n);
        let r = linalg::mat_mul(&ct, &linalg::mat_mul(&sigma_z_inv, &c, p, p, n), n, p, n);

        // Forward and backward steady-state covariances.
        let at = linalg::transpose(&a, n, n);
        let neg_at: Vec<f64> = at.iter().map(|v| -v).collect();
        let r_tensor = Tensor::<CpuRuntime>::from_slice(&r, &[n, n], &device);
        let q_tensor = Tensor::<CpuRuntime>::from_slice(&q, &[n, n], &device);

        let v_f = care(
            &Tensor::<CpuRuntime>::from_slice(&at, &[n, n], &device),
            &r_tensor,
            &q_tensor,
            method,
        )?;
        let v_b = care(
            &Tensor::<CpuRuntime>::from_slice(&neg_at, &[n, n], &device),
            &r_tensor,
            &q_tensor,
            method,
        )?;
        let v_f: Vec<f64> = v_f.to_vec();
        let v_b: Vec<f64> = v_b.to_vec();

        // Filter dynamics A_f = A − V_f·R, A_b = −(A + V_b·R).
        let vfr = linalg::mat_mul(&v_f, &r, n, n, n);
        let vbr = linalg::mat_mul(&v_b, &r, n, n, n);
        let a_f: Vec<f64> = (0..n * n).map(|i| a[i] - vfr[i]).collect();
        let a_b: Vec<f64> = (0..n * n).map(|i| -(a[i] + vbr[i])).collect();

        bank.precompute_filter_contributions(
            &Tensor::<CpuRuntime>::from_slice(&a_f, &[n, n], &device),
            &Tensor::<CpuRuntime>::from_slice(&a_b, &[n, n], &device),
        );

        // Input weights: (V_f + V_b)·W = −B_u.
        let vsum: Vec<f64> = (0..n * n).map(|i| v_f[i] + v_b[i]).collect();
        let mut neg_bu = vec![0.0; n * k];
        for (j, input) in model.inputs.iter().enumerate() {
            let b: Vec<f64> = input.b.to_vec();
            for i in 0..n {
                neg_bu[i * k + j] = -b[i];
            }
        }
        let w = linalg::solve(&vsum, &neg_bu, n, k).map_err(|err| {
            ReconstructError::NumericalError {
                message: format!("singular covariance sum: {}", err),
            }
        })?;

        // Sample-rate transition matrices.
        let ts = bank.ts();
        let a_f_ts: Vec<f64> = a_f.iter().map(|v| v * ts).collect();
        let a_b_ts: Vec<f64> = a_b.iter().map(|v| v * ts).collect();
        let a_f_bar = linalg::expm(&a_f_ts, n)?;
        let a_b_bar = linalg::expm(&a_b_ts, n)?;

        Ok(Self {
            a_f_bar,
            a_b_bar,
            w,
            order: n,
            input_order: k,
            device,
        })
    }

    /// State dimension N.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of estimated inputs K.
    pub fn input_order(&self) -> usize {
        self.input_order
    }

    /// Run both recursions over a codeword stream and merge them into
    /// per-sample input estimates, shape L×K.
    ///
    /// The forward and backward passes run on their own threads, posting
    /// completion events into bounded channels; a combiner task is started
    /// for every index as soon as both of its messages exist. The first
    /// error from any task aborts the others.
    pub fn reconstruct(
        &self,
        bank: &ControlBank,
        codewords: &[usize],
    ) -> ReconstructResult<Tensor<CpuRuntime>> {
        let l = codewords.len();
        let n = self.order;
        let k = self.input_order;

        if l == 0 {
            return Ok(Tensor::<CpuRuntime>::zeros(&[0, k], DType::F64, &self.device));
        }

        let forward: Vec<OnceCell<Vec<f64>>> = (0..l).map(|_| OnceCell::new()).collect();
        let backward: Vec<OnceCell<Vec<f64>>> = (0..l).map(|_| OnceCell::new()).collect();
        let estimates: Vec<OnceCell<Vec<f64>>> = (0..l).map(|_| OnceCell::new()).collect();

        let abort = AtomicBool::new(false);
        let (forward_tx, forward_rx) = mpsc::sync_channel::<usize>(EVENT_BOUND);
        let (backward_tx, backward_rx) = mpsc::sync_channel::<usize>(EVENT_BOUND);
        let (error_tx, error_rx) = mpsc::channel::<ReconstructError>();

        let mut first_error: Option<ReconstructError> = None;

        thread::scope(|scope| {
            // Forward recursion: m_f[k+1] = Ā_f·m_f[k] + ctrl_f(w_k).
            {
                let forward = &forward;
                let abort = &abort;
                let error_tx = error_tx.clone();
                scope.spawn(move || {
                    let mut m = vec![0.0; n];
                    let _ = forward[0].set(m.clone());
                    if forward_tx.send(0).is_err() {
                        return;
                    }
                    for index in 0..l - 1 {
                        if abort.load(Ordering::Acquire) {
                            return;
                        }
                        let ctrl = match bank.forward_filter_contribution(codewords[index]) {
                            Ok(ctrl) => ctrl,
                            Err(err) => {
                                let _ = error_tx.send(err.into());
                                return;
                            }
                        };
                        let mut next = linalg::mat_vec(&self.a_f_bar, &m, n, n);
                        for (dst, c) in next.iter_mut().zip(ctrl.iter()) {
                            *dst += c;
                        }
                        m = next;
                        let _ = forward[index + 1].set(m.clone());
                        if forward_tx.send(index + 1).is_err() {
                            return;
                        }
                    }
                });
            }

            // Backward recursion: m_b[k−1] = Ā_b·m_b[k] + ctrl_b(w_k).
            {
                let backward = &backward;
                let abort = &abort;
                let error_tx = error_tx.clone();
                scope.spawn(move || {
                    let mut m = vec![0.0; n];
                    let _ = backward[l - 1].set(m.clone());
                    if backward_tx.send(l - 1).is_err() {
                        return;
                    }
                    for index in (1..l).rev() {
                        if abort.load(Ordering::Acquire) {
                            return;
                        }
                        let ctrl = match bank.backward_filter_contribution(codewords[index]) {
                            Ok(ctrl) => ctrl,
                            Err(err) => {
                                let _ = error_tx.send(err.into());
                                return;
                            }
                        };
                        let mut next = linalg::mat_vec(&self.a_b_bar, &m, n, n);
                        for (dst, c) in next.iter_mut().zip(ctrl.iter()) {
                            *dst += c;
                        }
                        m = next;
                        let _ = backward[index - 1].set(m.clone());
                        if backward_tx.send(index - 1).is_err() {
                            return;
                        }
                    }
                });
            }
            drop(error_tx);

            // Coordinator: track which indices have both messages and start a
            // combiner for each completed pair.
            let mut forward_done = vec![false; l];
            let mut backward_done = vec![false; l];
            let mut remaining = l;

            while remaining > 0 {
                if first_error.is_none() {
                    if let Ok(err) = error_rx.try_recv() {
                        first_error = Some(err);
                        abort.store(true, Ordering::Release);
                        break;
                    }
                }

                let mut progressed = false;
                while let Ok(index) = forward_rx.try_recv() {
                    progressed = true;
                    if backward_done[index] {
                        spawn_combiner(scope, self, &forward, &backward, &estimates, index);
                        remaining -= 1;
                    } else {
                        forward_done[index] = true;
                    }
                }
                while let Ok(index) = backward_rx.try_recv() {
                    progressed = true;
                    if forward_done[index] {
                        spawn_combiner(scope, self, &forward, &backward, &estimates, index);
                        remaining -= 1;
                    } else {
                        backward_done[index] = true;
                    }
                }
                if !progressed {
                    thread::yield_now();
                }
            }

            // Unblock any recursion still waiting on a full event channel.
            drop(forward_rx);
            drop(backward_rx);
        });

        if let Some(err) = first_error {
            return Err(err);
        }

        let mut data = vec![0.0; l * k];
        for (index, cell) in estimates.iter().enumerate() {
            let estimate = cell.get().ok_or_else(|| ReconstructError::NumericalError {
                message: format!("combiner for sample {} produced no estimate", index),
            })?;
            data[index * k..(index + 1) * k].copy_from_slice(estimate);
        }
        Ok(Tensor::<CpuRuntime>::from_slice(&data, &[l, k], &self.device))
    }
}

/// One short-lived combiner: û[k] = Wᵀ·(m_f[k] − m_b[k]).
fn spawn_combiner<'scope>(
    scope: &'scope thread::Scope<'scope, '_>,
    rec: &'scope SteadyStateReconstructor,
    forward: &'scope [OnceCell<Vec<f64>>],
    backward: &'scope [OnceCell<Vec<f64>>],
    estimates: &'scope [OnceCell<Vec<f64>>],
    index: usize,
) {
    scope.spawn(move || {
        let (Some(m_f), Some(m_b)) = (forward[index].get(), backward[index].get()) else {
            return;
        };
        let n = rec.order;
        let k = rec.input_order;
        let mut estimate = vec![0.0; k];
        for j in 0..k {
            let mut acc = 0.0;
            for i in 0..n {
                acc += rec.w[i * k + j] * (m_f[i] - m_b[i]);
            }
            estimate[j] = acc;
        }
        let _ = estimates[index].set(estimate);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Control;
    use crate::signal::{InputFunction, VectorFunction};
    use crate::simulate::Simulation;
    use crate::ssm::integrator_chain;

    fn setup() -> CpuDevice {
        CpuDevice::new()
    }

    /// An integrator chain bounded by one analog switch per stage, the
    /// workhorse configuration of the end-to-end tests.
    fn chain_setup(
        device: &CpuDevice,
        n: usize,
        beta: f64,
        ts: f64,
        input: InputFunction,
        sigma_u2: f64,
        sigma_z2: f64,
    ) -> (
        LinearStateSpaceModel<CpuRuntime>,
        ControlBank,
        Tensor<CpuRuntime>,
        Tensor<CpuRuntime>,
    ) {
        let mut b = vec![0.0; n];
        b[0] = beta;
        let vf = VectorFunction::new(
            Tensor::<CpuRuntime>::from_slice(&b, &[n], device),
            input,
        );
        let model = integrator_chain(n, beta, vec![vf], device).unwrap();

        let controls: Vec<Control<CpuRuntime>> = (0..n)
            .map(|i| {
                let mut v = vec![0.0; n];
                v[i] = -beta.abs();
                Control::AnalogSwitch {
                    state: false,
                    vector: Tensor::<CpuRuntime>::from_slice(&v, &[n], device),
                }
            })
            .collect();
        let bank = ControlBank::new(controls, &model.a, ts).unwrap();

        // Q = σ_u²·b·bᵀ
        let mut q = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..n {
                q[i * n + j] = sigma_u2 * b[i] * b[j];
            }
        }
        let q = Tensor::<CpuRuntime>::from_slice(&q, &[n, n], device);

        // Σ_z = σ_z²·C·Cᵀ
        let c: Vec<f64> = model.c.to_vec();
        let sigma_z = vec![sigma_z2 * c.iter().map(|x| x * x).sum::<f64>()];
        let sigma_z = Tensor::<CpuRuntime>::from_slice(&sigma_z, &[1, 1], device);

        (model, bank, sigma_z, q)
    }

    #[test]
    fn test_filter_dynamics_stability() {
        let device = setup();
        let (model, mut bank, sigma_z, q) = chain_setup(
            &device,
            3,
            100.0,
            1e-3,
            InputFunction::Zero,
            1e-4,
            1.0,
        );
        let n = model.state_order();
        let rec = SteadyStateReconstructor::new(&model, &mut bank, &sigma_z, &q).unwrap();

        // Ā_f = exp(A_f·T_s) of a stable A_f has spectral radius below one;
        // Ā_b likewise since A_b's eigenvalues have non-negative real parts
        // and it runs against time.
        let eig_f = linalg::eig(&rec.a_f_bar, n).unwrap();
        for i in 0..n {
            let modulus = eig_f.values_re[i].hypot(eig_f.values_im[i]);
            assert!(modulus <= 1.0 + 1e-9, "forward mode {} has modulus {}", i, modulus);
        }
        let eig_b = linalg::eig(&rec.a_b_bar, n).unwrap();
        for i in 0..n {
            let modulus = eig_b.values_re[i].hypot(eig_b.values_im[i]);
            assert!(modulus <= 1.0 + 1e-9, "backward mode {} has modulus {}", i, modulus);
        }
    }

    #[test]
    fn test_reconstruct_empty_stream() {
        let device = setup();
        let (model, mut bank, sigma_z, q) =
            chain_setup(&device, 2, 10.0, 1e-3, InputFunction::Zero, 1e-4, 1.0);
        let rec = SteadyStateReconstructor::new(&model, &mut bank, &sigma_z, &q).unwrap();
        let estimates = rec.reconstruct(&bank, &[]).unwrap();
        assert_eq!(estimates.shape(), &[0, 1]);
    }

    #[test]
    fn test_reconstruct_single_sample() {
        let device = setup();
        let (model, mut bank, sigma_z, q) =
            chain_setup(&device, 2, 10.0, 1e-3, InputFunction::Zero, 1e-4, 1.0);
        let rec = SteadyStateReconstructor::new(&model, &mut bank, &sigma_z, &q).unwrap();
        let estimates = rec.reconstruct(&bank, &[0]).unwrap();
        assert_eq!(estimates.shape(), &[1, 1]);
        // Both boundary messages are zero, so the single estimate is zero.
        let data: Vec<f64> = estimates.to_vec();
        assert_eq!(data[0], 0.0);
    }

    #[test]
    fn test_reconstruct_before_build_is_fatal() {
        let device = setup();
        let (model, mut bank, sigma_z, q) =
            chain_setup(&device, 2, 10.0, 1e-3, InputFunction::Zero, 1e-4, 1.0);
        let rec = SteadyStateReconstructor::new(&model, &mut bank, &sigma_z, &q).unwrap();

        // A fresh bank without the filter caches: the recursions must abort
        // with the missing-precomputation error.
        let fresh = ControlBank::new(bank.controls().to_vec(), &model.a, bank.ts()).unwrap();
        let result = rec.reconstruct(&fresh, &[0, 1, 0]);
        assert!(matches!(result, Err(ReconstructError::Control(_))));
    }

    #[test]
    fn test_zero_input_reconstruction_is_small() {
        let device = setup();
        let ts = 1.0 / 16000.0;
        let (model, mut bank, sigma_z, q) = chain_setup(
            &device,
            3,
            1000.0,
            ts,
            InputFunction::Zero,
            1e-8,
            1.0,
        );

        let mut sim = Simulation::new(model.clone(), bank, 0.0, 2000, None).unwrap();
        let run = sim.run().unwrap();

        let rec =
            SteadyStateReconstructor::new(&model, sim.bank_mut(), &sigma_z, &q).unwrap();
        let estimates = rec.reconstruct(sim.bank(), &run.codewords).unwrap();
        let data: Vec<f64> = estimates.to_vec();

        // With no input the smoother output hovers around zero at the scale
        // of one quantisation step.
        let mid = &data[200..1800];
        let rms = (mid.iter().map(|x| x * x).sum::<f64>() / mid.len() as f64).sqrt();
        assert!(rms < 0.1, "zero-input rms = {}", rms);
    }

    #[test]
    fn test_integrator_chain_signal_to_noise() {
        let device = setup();
        let n = 5;
        let beta = 6250.0;
        let ts = 1.0 / 16000.0;
        let length = 100_000;
        let phase = 0.345;
        let input = InputFunction::Sine {
            amplitude: 1.0,
            frequency: 1.0,
            phase,
        };
        let (model, bank, sigma_z, q) =
            chain_setup(&device, n, beta, ts, input, 1e-8, 1.0);

        let mut sim = Simulation::new(model.clone(), bank, 0.0, length, None).unwrap();
        let run = sim.run().unwrap();
        assert_eq!(run.codewords.len(), length);

        let rec =
            SteadyStateReconstructor::new(&model, sim.bank_mut(), &sigma_z, &q).unwrap();
        let estimates = rec.reconstruct(sim.bank(), &run.codewords).unwrap();
        let estimates: Vec<f64> = estimates.to_vec();

        // Steady-state error, excluding the smoother's edge transients.
        let margin = 1000;
        let mut err_power = 0.0;
        let mut sig_power = 0.0;
        for index in margin..length - margin {
            let t = index as f64 * ts;
            let u = (2.0 * std::f64::consts::PI * t + phase).sin();
            let e = estimates[index] - u;
            err_power += e * e;
            sig_power += u * u;
        }
        let mse_db = 10.0 * (err_power / sig_power).log10();
        assert!(mse_db < -40.0, "reconstruction MSE {} dB", mse_db);
    }
}
