//! Simulation and reconstruction of control-bounded analog-to-digital
//! converters.
//!
//! A control-bounded ADC is modelled as a continuous-time linear state-space
//! system whose state is kept bounded by a bank of feedback controls. At every
//! sample tick the controls quantise the state into a *codeword*; the stream
//! of codewords is the converter's digital output. The original analog input
//! is recovered offline by a steady-state Kalman smoother whose gains come
//! from a continuous algebraic Riccati equation.
//!
//! # Architecture
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`signal`] | Vector-valued input functions `B·u(t)` |
//! | [`ssm`] | Linear and bilinear state-space models |
//! | [`ode`] | Explicit Runge–Kutta integrators (fixed and adaptive) |
//! | [`linalg`] | CPU dense kernels: `expm`, `eig`, solves, permutation sort |
//! | [`network`] | Sampling networks, controls, topology algebra |
//! | [`control`] | Codewords, control banks, lazy contribution caches |
//! | [`simulate`] | The controlled-simulation loop |
//! | [`reconstruct`] | CARE solver and the two-pass steady-state smoother |
//! | [`converter`] | End-to-end orchestration |
//!
//! # Example
//!
//! ```ignore
//! use adcsim::converter::Converter;
//! use adcsim::network::topology;
//! use adcsim::signal::InputFunction;
//!
//! let chain = topology::series_all(&[
//!     topology::integrator_block(&device, 6250.0),
//!     topology::integrator_block(&device, 6250.0),
//! ])?;
//! let input = InputFunction::Sine { amplitude: 1.0, frequency: 10.0, phase: 0.0 };
//! let mut conv = Converter::new(chain, vec![input], 1.0 / 16000.0, 0.0, 1000)?;
//! let simulation = conv.simulate()?;
//! let estimates = conv.reconstruct(&simulation.codewords, &sigma_z, &q)?;
//! ```

pub mod control;
pub mod converter;
pub mod linalg;
pub mod network;
pub mod ode;
pub mod reconstruct;
pub mod signal;
pub mod simulate;
pub mod ssm;

pub use converter::Converter;
pub use network::SamplingNetwork;
pub use signal::{InputFunction, VectorFunction};
pub use ssm::{LinearStateSpaceModel, SystemDynamics};
