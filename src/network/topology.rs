//! Compositional construction of sampling networks.
//!
//! Every combinator builds the block form of the composed `(A, B, C)` and
//! re-emits each inherited control with its injection vector zero-padded into
//! the new state space: controls of the first operand keep their positions,
//! controls of the second shift by the first operand's state order. The
//! variadic forms fold left by pairs.

use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

use super::{Control, LinearSystem, NetworkError, NetworkResult, SamplingNetwork};

fn raw<R: Runtime>(t: &Tensor<R>) -> (Vec<f64>, usize, usize) {
    let shape = t.shape();
    let data: Vec<f64> = t.to_vec();
    (data, shape[0], shape[1])
}

/// Block-diagonal assembly of two row-major matrices.
fn block_diag(
    a1: &[f64],
    (m1, n1): (usize, usize),
    a2: &[f64],
    (m2, n2): (usize, usize),
) -> Vec<f64> {
    let rows = m1 + m2;
    let cols = n1 + n2;
    let mut out = vec![0.0; rows * cols];
    for i in 0..m1 {
        for j in 0..n1 {
            out[i * cols + j] = a1[i * n1 + j];
        }
    }
    for i in 0..m2 {
        for j in 0..n2 {
            out[(m1 + i) * cols + (n1 + j)] = a2[i * n2 + j];
        }
    }
    out
}

/// Place `block` (m×n) into a zeroed `rows×cols` matrix at `(row, col)`.
fn place(
    out: &mut [f64],
    cols: usize,
    block: &[f64],
    (m, n): (usize, usize),
    row: usize,
    col: usize,
) {
    for i in 0..m {
        for j in 0..n {
            out[(row + i) * cols + (col + j)] = block[i * n + j];
        }
    }
}

/// Re-emit the controls of both operands into an `n1 + n2` state space.
fn pad_controls<R: Runtime>(
    s1: &SamplingNetwork<R>,
    s2: &SamplingNetwork<R>,
    device: &R::Device,
) -> Vec<Control<R>> {
    let n1 = s1.state_order();
    let n2 = s2.state_order();
    let total = n1 + n2;

    let mut controls = Vec::with_capacity(s1.controls.len() + s2.controls.len());
    for ctrl in &s1.controls {
        let v: Vec<f64> = ctrl.vector().to_vec();
        let mut padded = vec![0.0; total];
        padded[..n1].copy_from_slice(&v);
        controls.push(ctrl.with_vector(Tensor::<R>::from_slice(&padded, &[total], device)));
    }
    for ctrl in &s2.controls {
        let v: Vec<f64> = ctrl.vector().to_vec();
        let mut padded = vec![0.0; total];
        padded[n1..].copy_from_slice(&v);
        controls.push(ctrl.with_vector(Tensor::<R>::from_slice(&padded, &[total], device)));
    }
    controls
}

fn tensor<R: Runtime>(data: &[f64], rows: usize, cols: usize, device: &R::Device) -> Tensor<R> {
    if data.is_empty() {
        Tensor::<R>::zeros(&[rows, cols], DType::F64, device)
    } else {
        Tensor::<R>::from_slice(data, &[rows, cols], device)
    }
}

/// Series connection: the first system's output drives the second's input.
pub fn series<R: Runtime>(
    s1: &SamplingNetwork<R>,
    s2: &SamplingNetwork<R>,
) -> NetworkResult<SamplingNetwork<R>> {
    if s1.system.output_order() != s2.system.input_order() {
        return Err(NetworkError::DimensionMismatch {
            left: s1.system.output_order(),
            right: s2.system.input_order(),
            context: "series".to_string(),
        });
    }
    let device = s1.system.a.device();
    let (a1, n1, _) = raw(&s1.system.a);
    let (a2, n2, _) = raw(&s2.system.a);
    let (b1, _, k1) = raw(&s1.system.b);
    let (b2, _, _) = raw(&s2.system.b);
    let (c1, p1, _) = raw(&s1.system.c);
    let (c2, p2, _) = raw(&s2.system.c);
    let total = n1 + n2;

    // A = [[A1, 0], [B2·C1, A2]]
    let b2c1 = crate::linalg::mat_mul(&b2, &c1, n2, p1, n1);
    let mut a = vec![0.0; total * total];
    place(&mut a, total, &a1, (n1, n1), 0, 0);
    place(&mut a, total, &b2c1, (n2, n1), n1, 0);
    place(&mut a, total, &a2, (n2, n2), n1, n1);

    // B = [B1; 0]
    let mut b = vec![0.0; total * k1];
    place(&mut b, k1, &b1, (n1, k1), 0, 0);

    // C = [0, C2]
    let mut c = vec![0.0; p2 * total];
    place(&mut c, total, &c2, (p2, n2), 0, n1);

    Ok(SamplingNetwork::new(
        LinearSystem::new(
            tensor(&a, total, total, device),
            tensor(&b, total, k1, device),
            tensor(&c, p2, total, device),
        ),
        pad_controls(s1, s2, device),
    ))
}

/// Parallel composition: disjoint inputs and disjoint outputs.
pub fn parallel<R: Runtime>(
    s1: &SamplingNetwork<R>,
    s2: &SamplingNetwork<R>,
) -> NetworkResult<SamplingNetwork<R>> {
    let device = s1.system.a.device();
    let (a1, n1, _) = raw(&s1.system.a);
    let (a2, n2, _) = raw(&s2.system.a);
    let (b1, _, k1) = raw(&s1.system.b);
    let (b2, _, k2) = raw(&s2.system.b);
    let (c1, p1, _) = raw(&s1.system.c);
    let (c2, p2, _) = raw(&s2.system.c);
    let total = n1 + n2;

    let a = block_diag(&a1, (n1, n1), &a2, (n2, n2));
    let b = block_diag(&b1, (n1, k1), &b2, (n2, k2));
    let c = block_diag(&c1, (p1, n1), &c2, (p2, n2));

    Ok(SamplingNetwork::new(
        LinearSystem::new(
            tensor(&a, total, total, device),
            tensor(&b, total, k1 + k2, device),
            tensor(&c, p1 + p2, total, device),
        ),
        pad_controls(s1, s2, device),
    ))
}

/// Merge: disjoint inputs feeding a shared output space.
pub fn merge<R: Runtime>(
    s1: &SamplingNetwork<R>,
    s2: &SamplingNetwork<R>,
) -> NetworkResult<SamplingNetwork<R>> {
    if s1.system.output_order() != s2.system.output_order() {
        return Err(NetworkError::DimensionMismatch {
            left: s1.system.output_order(),
            right: s2.system.output_order(),
            context: "merge".to_string(),
        });
    }
    let device = s1.system.a.device();
    let (a1, n1, _) = raw(&s1.system.a);
    let (a2, n2, _) = raw(&s2.system.a);
    let (b1, _, k1) = raw(&s1.system.b);
    let (b2, _, k2) = raw(&s2.system.b);
    let (c1, p, _) = raw(&s1.system.c);
    let (c2, _, _) = raw(&s2.system.c);
    let total = n1 + n2;

    let a = block_diag(&a1, (n1, n1), &a2, (n2, n2));
    let b = block_diag(&b1, (n1, k1), &b2, (n2, k2));

    // C = [C1, C2]
    let mut c = vec![0.0; p * total];
    place(&mut c, total, &c1, (p, n1), 0, 0);
    place(&mut c, total, &c2, (p, n2), 0, n1);

    Ok(SamplingNetwork::new(
        LinearSystem::new(
            tensor(&a, total, total, device),
            tensor(&b, total, k1 + k2, device),
            tensor(&c, p, total, device),
        ),
        pad_controls(s1, s2, device),
    ))
}

/// Split: a shared input space driving disjoint outputs.
pub fn split<R: Runtime>(
    s1: &SamplingNetwork<R>,
    s2: &SamplingNetwork<R>,
) -> NetworkResult<SamplingNetwork<R>> {
    if s1.system.input_order() != s2.system.input_order() {
        return Err(NetworkError::DimensionMismatch {
            left: s1.system.input_order(),
            right: s2.system.input_order(),
            context: "split".to_string(),
        });
    }
    let device = s1.system.a.device();
    let (a1, n1, _) = raw(&s1.system.a);
    let (a2, n2, _) = raw(&s2.system.a);
    let (b1, _, k) = raw(&s1.system.b);
    let (b2, _, _) = raw(&s2.system.b);
    let (c1, p1, _) = raw(&s1.system.c);
    let (c2, p2, _) = raw(&s2.system.c);
    let total = n1 + n2;

    let a = block_diag(&a1, (n1, n1), &a2, (n2, n2));

    // B = [B1; B2]
    let mut b = vec![0.0; total * k];
    place(&mut b, k, &b1, (n1, k), 0, 0);
    place(&mut b, k, &b2, (n2, k), n1, 0);

    let c = block_diag(&c1, (p1, n1), &c2, (p2, n2));

    Ok(SamplingNetwork::new(
        LinearSystem::new(
            tensor(&a, total, total, device),
            tensor(&b, total, k, device),
            tensor(&c, p1 + p2, total, device),
        ),
        pad_controls(s1, s2, device),
    ))
}

/// Feedback loop: negative feedback from the second system's output into the
/// first's input, positive feedforward from the first's output into the
/// second's input.
pub fn feedback<R: Runtime>(
    s1: &SamplingNetwork<R>,
    s2: &SamplingNetwork<R>,
) -> NetworkResult<SamplingNetwork<R>> {
    if s1.system.output_order() != s2.system.input_order() {
        return Err(NetworkError::DimensionMismatch {
            left: s1.system.output_order(),
            right: s2.system.input_order(),
            context: "feedback (feedforward path)".to_string(),
        });
    }
    if s1.system.input_order() != s2.system.output_order() {
        return Err(NetworkError::DimensionMismatch {
            left: s1.system.input_order(),
            right: s2.system.output_order(),
            context: "feedback (return path)".to_string(),
        });
    }
    let device = s1.system.a.device();
    let (a1, n1, _) = raw(&s1.system.a);
    let (a2, n2, _) = raw(&s2.system.a);
    let (b1, _, k1) = raw(&s1.system.b);
    let (b2, _, _) = raw(&s2.system.b);
    let (c1, p1, _) = raw(&s1.system.c);
    let (c2, p2, _) = raw(&s2.system.c);
    let total = n1 + n2;

    // A = [[A1, -B1·C2], [B2·C1, A2]]
    let mut b1c2 = crate::linalg::mat_mul(&b1, &c2, n1, p2, n2);
    for x in b1c2.iter_mut() {
        *x = -*x;
    }
    let b2c1 = crate::linalg::mat_mul(&b2, &c1, n2, p1, n1);
    let mut a = vec![0.0; total * total];
    place(&mut a, total, &a1, (n1, n1), 0, 0);
    place(&mut a, total, &b1c2, (n1, n2), 0, n1);
    place(&mut a, total, &b2c1, (n2, n1), n1, 0);
    place(&mut a, total, &a2, (n2, n2), n1, n1);

    // B = [B1; 0]
    let mut b = vec![0.0; total * k1];
    place(&mut b, k1, &b1, (n1, k1), 0, 0);

    // C = [C1, 0]
    let mut c = vec![0.0; p1 * total];
    place(&mut c, total, &c1, (p1, n1), 0, 0);

    Ok(SamplingNetwork::new(
        LinearSystem::new(
            tensor(&a, total, total, device),
            tensor(&b, total, k1, device),
            tensor(&c, p1, total, device),
        ),
        pad_controls(s1, s2, device),
    ))
}

/// Post-multiply the input matrix by a map: `B ← B·M`.
pub fn multiplex<R: Runtime>(
    network: &SamplingNetwork<R>,
    map: &Tensor<R>,
) -> NetworkResult<SamplingNetwork<R>> {
    let (m, rows, cols) = raw(map);
    if rows != network.system.input_order() {
        return Err(NetworkError::DimensionMismatch {
            left: network.system.input_order(),
            right: rows,
            context: "multiplex".to_string(),
        });
    }
    let device = network.system.a.device();
    let (b, n, k) = raw(&network.system.b);
    let mapped = crate::linalg::mat_mul(&b, &m, n, k, cols);
    Ok(SamplingNetwork::new(
        LinearSystem::new(
            network.system.a.clone(),
            tensor(&mapped, n, cols, device),
            network.system.c.clone(),
        ),
        network.controls.clone(),
    ))
}

/// Pre-multiply the observation matrix by a map: `C ← M·C`.
pub fn demultiplex<R: Runtime>(
    network: &SamplingNetwork<R>,
    map: &Tensor<R>,
) -> NetworkResult<SamplingNetwork<R>> {
    let (m, rows, cols) = raw(map);
    if cols != network.system.output_order() {
        return Err(NetworkError::DimensionMismatch {
            left: network.system.output_order(),
            right: cols,
            context: "demultiplex".to_string(),
        });
    }
    let device = network.system.a.device();
    let (c, p, n) = raw(&network.system.c);
    let mapped = crate::linalg::mat_mul(&m, &c, rows, p, n);
    Ok(SamplingNetwork::new(
        LinearSystem::new(
            network.system.a.clone(),
            network.system.b.clone(),
            tensor(&mapped, rows, n, device),
        ),
        network.controls.clone(),
    ))
}

macro_rules! variadic {
    ($name:ident, $op:ident, $doc:literal) => {
        #[doc = $doc]
        pub fn $name<R: Runtime>(
            systems: &[SamplingNetwork<R>],
        ) -> NetworkResult<SamplingNetwork<R>> {
            let (first, rest) = systems.split_first().ok_or_else(|| NetworkError::Empty {
                context: stringify!($name).to_string(),
            })?;
            let mut acc = first.clone();
            for next in rest {
                acc = $op(&acc, next)?;
            }
            Ok(acc)
        }
    };
}

variadic!(series_all, series, "Left fold of [`series`] over a slice.");
variadic!(parallel_all, parallel, "Left fold of [`parallel`] over a slice.");
variadic!(merge_all, merge, "Left fold of [`merge`] over a slice.");
variadic!(split_all, split, "Left fold of [`split`] over a slice.");

/// The fundamental integrator block: one state, unit observation, and an
/// analog-switch control pulling against the gain.
pub fn integrator_block<R: Runtime>(device: &R::Device, gain: f64) -> SamplingNetwork<R> {
    let system = LinearSystem::new(
        Tensor::<R>::from_slice(&[0.0], &[1, 1], device),
        Tensor::<R>::from_slice(&[gain], &[1, 1], device),
        Tensor::<R>::from_slice(&[1.0], &[1, 1], device),
    );
    let control = Control::AnalogSwitch {
        state: false,
        vector: Tensor::<R>::from_slice(&[-gain], &[1], device),
    };
    SamplingNetwork::new(system, vec![control])
}

/// The symmetric oscillator block: a two-state resonator at
/// `resonance_frequency` with two carrier-modulated controls a quarter
/// period apart.
pub fn oscillator_block<R: Runtime>(
    device: &R::Device,
    gain: f64,
    resonance_frequency: f64,
) -> SamplingNetwork<R> {
    let omega = 2.0 * std::f64::consts::PI * resonance_frequency;
    let system = LinearSystem::new(
        Tensor::<R>::from_slice(&[0.0, -omega, omega, 0.0], &[2, 2], device),
        Tensor::<R>::from_slice(&[gain, 0.0, 0.0, gain], &[2, 2], device),
        Tensor::<R>::from_slice(&[1.0, 0.0, 0.0, 1.0], &[2, 2], device),
    );
    let controls = vec![
        Control::Oscillator {
            state: false,
            vector: Tensor::<R>::from_slice(&[gain, 0.0], &[2], device),
            frequency: resonance_frequency,
            phase: 0.0,
        },
        Control::Oscillator {
            state: false,
            vector: Tensor::<R>::from_slice(&[gain, 0.0], &[2], device),
            frequency: resonance_frequency,
            phase: std::f64::consts::PI / 2.0,
        },
    ];
    SamplingNetwork::new(system, controls)
}

/// Convert a network's linear system and a set of input waveforms into a
/// state-space model, one input per column of `B`.
pub fn to_state_space_model<R: Runtime>(
    network: &SamplingNetwork<R>,
    input_functions: &[crate::signal::InputFunction],
) -> NetworkResult<crate::ssm::LinearStateSpaceModel<R>> {
    let k = network.system.input_order();
    if input_functions.len() != k {
        return Err(NetworkError::DimensionMismatch {
            left: k,
            right: input_functions.len(),
            context: "to_state_space_model".to_string(),
        });
    }
    let device = network.system.a.device();
    let (b, n, _) = raw(&network.system.b);
    let inputs = input_functions
        .iter()
        .enumerate()
        .map(|(j, u)| {
            let column: Vec<f64> = (0..n).map(|i| b[i * k + j]).collect();
            crate::signal::VectorFunction::new(
                Tensor::<R>::from_slice(&column, &[n], device),
                u.clone(),
            )
        })
        .collect();
    crate::ssm::LinearStateSpaceModel::new(
        network.system.a.clone(),
        network.system.c.clone(),
        inputs,
    )
    .map_err(|_| NetworkError::DimensionMismatch {
        left: n,
        right: k,
        context: "to_state_space_model".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::InputFunction;
    use numr::runtime::cpu::{CpuDevice, CpuRuntime};

    fn setup() -> CpuDevice {
        CpuDevice::new()
    }

    #[test]
    fn test_integrator_block_layout() {
        let device = setup();
        let block = integrator_block::<CpuRuntime>(&device, 100.0);
        assert_eq!(block.system.state_order(), 1);
        assert_eq!(block.system.input_order(), 1);
        assert_eq!(block.system.output_order(), 1);
        assert_eq!(block.controls.len(), 1);

        let a: Vec<f64> = block.system.a.to_vec();
        let b: Vec<f64> = block.system.b.to_vec();
        let c: Vec<f64> = block.system.c.to_vec();
        assert_eq!((a[0], b[0], c[0]), (0.0, 100.0, 1.0));

        let v: Vec<f64> = block.controls[0].vector().to_vec();
        assert_eq!(v, vec![-100.0]);
    }

    #[test]
    fn test_oscillator_block_layout() {
        let device = setup();
        let block = oscillator_block::<CpuRuntime>(&device, 1.0, 10.0);
        assert_eq!(block.system.state_order(), 2);
        assert_eq!(block.controls.len(), 2);
        let a: Vec<f64> = block.system.a.to_vec();
        let omega = 2.0 * std::f64::consts::PI * 10.0;
        assert!((a[1] + omega).abs() < 1e-12);
        assert!((a[2] - omega).abs() < 1e-12);
    }

    #[test]
    fn test_state_order_is_additive() {
        let device = setup();
        let i1 = integrator_block::<CpuRuntime>(&device, 1.0);
        let i2 = integrator_block::<CpuRuntime>(&device, 2.0);
        let o = oscillator_block::<CpuRuntime>(&device, 1.0, 1.0);

        assert_eq!(series(&i1, &i2).unwrap().state_order(), 2);
        assert_eq!(parallel(&i1, &o).unwrap().state_order(), 3);
        assert_eq!(split(&i1, &i2).unwrap().state_order(), 2);
        assert_eq!(feedback(&i1, &i2).unwrap().state_order(), 2);

        let m1 = merge(&i1, &i2).unwrap();
        assert_eq!(m1.state_order(), 2);
        assert_eq!(m1.system.output_order(), 1);
        assert_eq!(m1.system.input_order(), 2);
    }

    #[test]
    fn test_series_block_structure() {
        let device = setup();
        let i1 = integrator_block::<CpuRuntime>(&device, 10.0);
        let i2 = integrator_block::<CpuRuntime>(&device, 20.0);
        let chain = series(&i1, &i2).unwrap();

        let a: Vec<f64> = chain.system.a.to_vec();
        // Lower-left block carries B2·C1 = 20·1 = 20.
        assert_eq!(a, vec![0.0, 0.0, 20.0, 0.0]);

        let b: Vec<f64> = chain.system.b.to_vec();
        assert_eq!(b, vec![10.0, 0.0]);

        let c: Vec<f64> = chain.system.c.to_vec();
        assert_eq!(c, vec![0.0, 1.0]);
    }

    #[test]
    fn test_series_rejects_port_mismatch() {
        let device = setup();
        let i = integrator_block::<CpuRuntime>(&device, 1.0);
        let o = oscillator_block::<CpuRuntime>(&device, 1.0, 1.0);
        assert!(matches!(
            series(&i, &o),
            Err(NetworkError::DimensionMismatch { left: 1, right: 2, .. })
        ));
    }

    #[test]
    fn test_split_rejects_input_mismatch() {
        let device = setup();
        let i = integrator_block::<CpuRuntime>(&device, 1.0);
        let o = oscillator_block::<CpuRuntime>(&device, 1.0, 1.0);
        assert!(split(&i, &o).is_err());
    }

    #[test]
    fn test_controls_are_padded_and_shifted() {
        let device = setup();
        let i1 = integrator_block::<CpuRuntime>(&device, 10.0);
        let i2 = integrator_block::<CpuRuntime>(&device, 20.0);
        let chain = series(&i1, &i2).unwrap();

        assert_eq!(chain.controls.len(), 2);
        let v0: Vec<f64> = chain.controls[0].vector().to_vec();
        let v1: Vec<f64> = chain.controls[1].vector().to_vec();
        assert_eq!(v0, vec![-10.0, 0.0]);
        assert_eq!(v1, vec![0.0, -20.0]);
    }

    #[test]
    fn test_composition_does_not_mutate_operands() {
        let device = setup();
        let i1 = integrator_block::<CpuRuntime>(&device, 10.0);
        let i2 = integrator_block::<CpuRuntime>(&device, 20.0);
        let _ = series(&i1, &i2).unwrap();

        // Original blocks keep their one-dimensional injection vectors.
        assert_eq!(i1.controls[0].vector().shape(), &[1]);
        assert_eq!(i2.controls[0].vector().shape(), &[1]);
    }

    #[test]
    fn test_parallel_with_empty_network_is_identity() {
        let device = setup();
        let i = integrator_block::<CpuRuntime>(&device, 5.0);
        let empty = SamplingNetwork::new(
            LinearSystem::new(
                Tensor::<CpuRuntime>::zeros(&[0, 0], DType::F64, &device),
                Tensor::<CpuRuntime>::zeros(&[0, 0], DType::F64, &device),
                Tensor::<CpuRuntime>::zeros(&[0, 0], DType::F64, &device),
            ),
            vec![],
        );
        let composed = parallel(&i, &empty).unwrap();
        assert_eq!(composed.state_order(), 1);
        let a: Vec<f64> = composed.system.a.to_vec();
        let b: Vec<f64> = composed.system.b.to_vec();
        let c: Vec<f64> = composed.system.c.to_vec();
        assert_eq!(a, vec![0.0]);
        assert_eq!(b, vec![5.0]);
        assert_eq!(c, vec![1.0]);
        assert_eq!(composed.controls.len(), 1);
    }

    #[test]
    fn test_feedback_oscillator_from_two_integrators() {
        let device = setup();
        let gain = 3.0;
        let loop_net = feedback(
            &integrator_block::<CpuRuntime>(&device, gain),
            &integrator_block::<CpuRuntime>(&device, gain),
        )
        .unwrap();
        let a: Vec<f64> = loop_net.system.a.to_vec();
        // [[0, -g], [g, 0]]: a harmonic oscillator at ω = g.
        assert_eq!(a, vec![0.0, -gain, gain, 0.0]);
    }

    #[test]
    fn test_variadic_series_chain() {
        let device = setup();
        let blocks: Vec<_> = (0..5)
            .map(|_| integrator_block::<CpuRuntime>(&device, 6250.0))
            .collect();
        let chain = series_all(&blocks).unwrap();
        assert_eq!(chain.state_order(), 5);
        assert_eq!(chain.controls.len(), 5);

        let a: Vec<f64> = chain.system.a.to_vec();
        // Each stage feeds the next through the sub-diagonal.
        for row in 1..5 {
            assert_eq!(a[row * 5 + row - 1], 6250.0);
        }

        assert!(series_all::<CpuRuntime>(&[]).is_err());
    }

    #[test]
    fn test_multiplex_and_demultiplex() {
        let device = setup();
        let o = oscillator_block::<CpuRuntime>(&device, 2.0, 1.0);

        let map = Tensor::<CpuRuntime>::from_slice(&[1.0, 0.0], &[2, 1], &device);
        let muxed = multiplex(&o, &map).unwrap();
        assert_eq!(muxed.system.input_order(), 1);
        let b: Vec<f64> = muxed.system.b.to_vec();
        assert_eq!(b, vec![2.0, 0.0]);

        let map = Tensor::<CpuRuntime>::from_slice(&[1.0, 1.0], &[1, 2], &device);
        let demuxed = demultiplex(&o, &map).unwrap();
        assert_eq!(demuxed.system.output_order(), 1);
        let c: Vec<f64> = demuxed.system.c.to_vec();
        assert_eq!(c, vec![1.0, 1.0]);

        // Wrong map shape is rejected.
        let bad = Tensor::<CpuRuntime>::from_slice(&[1.0], &[1, 1], &device);
        assert!(multiplex(&o, &bad).is_err());
    }

    #[test]
    fn test_to_state_space_model() {
        let device = setup();
        let chain = series_all(&[
            integrator_block::<CpuRuntime>(&device, 10.0),
            integrator_block::<CpuRuntime>(&device, 10.0),
        ])
        .unwrap();
        let model =
            to_state_space_model(&chain, &[InputFunction::Constant(1.0)]).unwrap();
        assert_eq!(model.state_order(), 2);
        assert_eq!(model.input_order(), 1);
        let b: Vec<f64> = model.inputs[0].b.to_vec();
        assert_eq!(b, vec![10.0, 0.0]);

        // One waveform per input column is required.
        assert!(to_state_space_model(&chain, &[]).is_err());
    }
}
