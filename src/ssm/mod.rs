//! Continuous-time state-space models.
//!
//! The simulation and reconstruction pipeline works on linear time-invariant
//! models
//!
//! ```text
//! x'(t) = A·x(t) + Σᵢ Bᵢ·uᵢ(t)
//! y(t)  = C·x(t)
//! ```
//!
//! plus a bilinear variant whose derivative carries an extra
//! `A_B·vec(x·u(t)ᵀ)` term, used for oscillator-controlled systems whose
//! decisions modulate a carrier. [`SystemDynamics`] is the closed set of
//! systems the ODE layer knows how to integrate; the integrator
//! pattern-matches it to pick the closed-form fast path for linear models.

use std::fmt;
use std::sync::Arc;

use numr::error::{Error, Result};
use numr::runtime::Runtime;
use numr::tensor::Tensor;

use crate::linalg;
use crate::signal::VectorFunction;

/// A linear time-invariant state-space model `(A, C, {Bᵢuᵢ})`.
///
/// Immutable once built: all shape invariants are checked by [`new`].
///
/// [`new`]: LinearStateSpaceModel::new
#[derive(Debug, Clone)]
pub struct LinearStateSpaceModel<R: Runtime> {
    /// State dynamics, N×N.
    pub a: Tensor<R>,
    /// Observation matrix, P×N.
    pub c: Tensor<R>,
    /// Input vector functions, each with a length-N steering vector.
    pub inputs: Vec<VectorFunction<R>>,
}

impl<R: Runtime> LinearStateSpaceModel<R> {
    /// Create a model, validating that all shapes are consistent.
    pub fn new(a: Tensor<R>, c: Tensor<R>, inputs: Vec<VectorFunction<R>>) -> Result<Self> {
        let a_shape = a.shape();
        if a_shape.len() != 2 || a_shape[0] != a_shape[1] {
            return Err(Error::InvalidArgument {
                arg: "a",
                reason: format!("state dynamics must be square, got {:?}", a_shape),
            });
        }
        let n = a_shape[0];
        let c_shape = c.shape();
        if c_shape.len() != 2 || c_shape[1] != n {
            return Err(Error::InvalidArgument {
                arg: "c",
                reason: format!("observation matrix must have {} columns, got {:?}", n, c_shape),
            });
        }
        for (index, input) in inputs.iter().enumerate() {
            if input.order() != n {
                return Err(Error::InvalidArgument {
                    arg: "inputs",
                    reason: format!(
                        "input {} has steering vector of length {}, expected {}",
                        index,
                        input.order(),
                        n
                    ),
                });
            }
        }
        Ok(Self { a, c, inputs })
    }

    /// State dimension N.
    pub fn state_order(&self) -> usize {
        self.a.shape()[0]
    }

    /// Observation dimension P.
    pub fn observation_order(&self) -> usize {
        self.c.shape()[0]
    }

    /// Number of inputs.
    pub fn input_order(&self) -> usize {
        self.inputs.len()
    }

    /// State derivative `A·x + Σᵢ Bᵢuᵢ(t)`.
    pub fn derivative(&self, t: f64, state: &[f64]) -> Vec<f64> {
        let n = self.state_order();
        debug_assert_eq!(state.len(), n);
        let a: Vec<f64> = self.a.to_vec();
        let mut dx = linalg::mat_vec(&a, state, n, n);
        for input in &self.inputs {
            let scale = input.u.eval(t);
            if scale == 0.0 {
                continue;
            }
            let b: Vec<f64> = input.b.to_vec();
            for (dst, bi) in dx.iter_mut().zip(b.iter()) {
                *dst += bi * scale;
            }
        }
        dx
    }

    /// Observation `C·x`.
    pub fn observation(&self, _t: f64, state: &[f64]) -> Vec<f64> {
        let c: Vec<f64> = self.c.to_vec();
        linalg::mat_vec(&c, state, self.observation_order(), self.state_order())
    }

    /// Impulse response taps `C·exp(A·tₖ)·Bᵢ` for each requested time.
    ///
    /// Returned as `[observation][input][tap]`.
    pub fn impulse_response(&self, taps: &[f64]) -> Result<Vec<Vec<Vec<f64>>>> {
        let n = self.state_order();
        let p = self.observation_order();
        let k = self.input_order();
        let a: Vec<f64> = self.a.to_vec();
        let c: Vec<f64> = self.c.to_vec();

        let mut res = vec![vec![vec![0.0; taps.len()]; k]; p];
        for (tap, &t) in taps.iter().enumerate() {
            let at: Vec<f64> = a.iter().map(|x| x * t).collect();
            let e = linalg::expm(&at, n)?;
            let ce = linalg::mat_mul(&c, &e, p, n, n);
            for (input_index, input) in self.inputs.iter().enumerate() {
                let b: Vec<f64> = input.b.to_vec();
                let h = linalg::mat_vec(&ce, &b, p, n);
                for obs in 0..p {
                    res[obs][input_index][tap] = h[obs];
                }
            }
        }
        Ok(res)
    }
}

/// An integrator chain of size `n`: each stage feeds the next with
/// `stage_gain`, and the observation row sums every state.
pub fn integrator_chain<R: Runtime>(
    n: usize,
    stage_gain: f64,
    inputs: Vec<VectorFunction<R>>,
    device: &R::Device,
) -> Result<LinearStateSpaceModel<R>> {
    let mut a = vec![0.0; n * n];
    for row in 1..n {
        a[row * n + row - 1] = stage_gain;
    }
    let c = vec![1.0; n];
    LinearStateSpaceModel::new(
        Tensor::<R>::from_slice(&a, &[n, n], device),
        Tensor::<R>::from_slice(&c, &[1, n], device),
        inputs,
    )
}

/// A bilinear state-space model `(A_L, A_B, C, {Bᵢuᵢ})` with derivative
///
/// ```text
/// x'(t) = A_L·x + Σᵢ Bᵢuᵢ(t) + A_B·vec(x·u(t)ᵀ)
/// ```
///
/// `vec` stacks the columns of `x·u(t)ᵀ` input-major: block j of the
/// vectorisation is `x·uⱼ(t)`, so `A_B` is N×(N·K).
#[derive(Debug, Clone)]
pub struct BilinearStateSpaceModel<R: Runtime> {
    pub a_l: Tensor<R>,
    pub a_b: Tensor<R>,
    pub c: Tensor<R>,
    pub inputs: Vec<VectorFunction<R>>,
}

impl<R: Runtime> BilinearStateSpaceModel<R> {
    pub fn new(
        a_l: Tensor<R>,
        a_b: Tensor<R>,
        c: Tensor<R>,
        inputs: Vec<VectorFunction<R>>,
    ) -> Result<Self> {
        let shape = a_l.shape();
        if shape.len() != 2 || shape[0] != shape[1] {
            return Err(Error::InvalidArgument {
                arg: "a_l",
                reason: format!("linear dynamics must be square, got {:?}", shape),
            });
        }
        let n = shape[0];
        let k = inputs.len();
        let b_shape = a_b.shape();
        if b_shape.len() != 2 || b_shape[0] != n || b_shape[1] != n * k {
            return Err(Error::InvalidArgument {
                arg: "a_b",
                reason: format!(
                    "bilinear dynamics must be {}×{}, got {:?}",
                    n,
                    n * k,
                    b_shape
                ),
            });
        }
        let c_shape = c.shape();
        if c_shape.len() != 2 || c_shape[1] != n {
            return Err(Error::InvalidArgument {
                arg: "c",
                reason: format!("observation matrix must have {} columns, got {:?}", n, c_shape),
            });
        }
        for (index, input) in inputs.iter().enumerate() {
            if input.order() != n {
                return Err(Error::InvalidArgument {
                    arg: "inputs",
                    reason: format!(
                        "input {} has steering vector of length {}, expected {}",
                        index,
                        input.order(),
                        n
                    ),
                });
            }
        }
        Ok(Self { a_l, a_b, c, inputs })
    }

    pub fn state_order(&self) -> usize {
        self.a_l.shape()[0]
    }

    pub fn observation_order(&self) -> usize {
        self.c.shape()[0]
    }

    pub fn input_order(&self) -> usize {
        self.inputs.len()
    }

    /// State derivative `A_L·x + Σᵢ Bᵢuᵢ(t) + A_B·vec(x·u(t)ᵀ)`.
    pub fn derivative(&self, t: f64, state: &[f64]) -> Vec<f64> {
        let n = self.state_order();
        let k = self.input_order();
        debug_assert_eq!(state.len(), n);

        let a_l: Vec<f64> = self.a_l.to_vec();
        let mut dx = linalg::mat_vec(&a_l, state, n, n);

        for input in &self.inputs {
            let scale = input.u.eval(t);
            if scale == 0.0 {
                continue;
            }
            let b: Vec<f64> = input.b.to_vec();
            for (dst, bi) in dx.iter_mut().zip(b.iter()) {
                *dst += bi * scale;
            }
        }

        // vec(x·uᵀ): block j is x scaled by u_j(t).
        let mut bilinear = vec![0.0; n * k];
        for (j, input) in self.inputs.iter().enumerate() {
            let scale = input.u.eval(t);
            for i in 0..n {
                bilinear[j * n + i] = state[i] * scale;
            }
        }
        let a_b: Vec<f64> = self.a_b.to_vec();
        let coupled = linalg::mat_vec(&a_b, &bilinear, n, n * k);
        for (dst, src) in dx.iter_mut().zip(coupled.iter()) {
            *dst += src;
        }
        dx
    }

    pub fn observation(&self, _t: f64, state: &[f64]) -> Vec<f64> {
        let c: Vec<f64> = self.c.to_vec();
        linalg::mat_vec(&c, state, self.observation_order(), self.state_order())
    }
}

/// A system defined only by its derivative closure.
#[derive(Clone)]
pub struct AdhocSystem {
    order: usize,
    derivative: Arc<dyn Fn(f64, &[f64]) -> Vec<f64> + Send + Sync>,
}

impl AdhocSystem {
    pub fn new<F>(order: usize, derivative: F) -> Self
    where
        F: Fn(f64, &[f64]) -> Vec<f64> + Send + Sync + 'static,
    {
        Self {
            order,
            derivative: Arc::new(derivative),
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn derivative(&self, t: f64, state: &[f64]) -> Vec<f64> {
        (self.derivative)(t, state)
    }
}

impl fmt::Debug for AdhocSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AdhocSystem {{ order: {} }}", self.order)
    }
}

/// The closed set of systems the ODE layer integrates.
///
/// The integrator dispatches on this: [`Linear`] takes the closed-form drift
/// fast path, everything else the generic Runge–Kutta path.
///
/// [`Linear`]: SystemDynamics::Linear
#[derive(Debug, Clone)]
pub enum SystemDynamics<R: Runtime> {
    Linear(LinearStateSpaceModel<R>),
    Bilinear(BilinearStateSpaceModel<R>),
    Adhoc(AdhocSystem),
}

impl<R: Runtime> SystemDynamics<R> {
    /// State dimension.
    pub fn order(&self) -> usize {
        match self {
            Self::Linear(model) => model.state_order(),
            Self::Bilinear(model) => model.state_order(),
            Self::Adhoc(system) => system.order(),
        }
    }

    /// State derivative at `(t, x)`.
    pub fn derivative(&self, t: f64, state: &[f64]) -> Vec<f64> {
        match self {
            Self::Linear(model) => model.derivative(t, state),
            Self::Bilinear(model) => model.derivative(t, state),
            Self::Adhoc(system) => system.derivative(t, state),
        }
    }
}
