//! End-to-end orchestration: network → model → simulation → reconstruction.
//!
//! [`Converter`] owns the sample timeline for one run and wires the pieces
//! together; the free functions [`simulate`] and [`reconstruct`] are the
//! one-shot library entry points.

use std::fmt;

use numr::runtime::cpu::CpuRuntime;
use numr::tensor::Tensor;

use crate::control::{ControlBank, ControlError};
use crate::network::{topology, NetworkError, SamplingNetwork};
use crate::reconstruct::{ReconstructError, SteadyStateReconstructor};
use crate::signal::InputFunction;
use crate::simulate::{SimulateError, Simulation, SimulationResult};
use crate::ssm::LinearStateSpaceModel;

/// Result type for orchestration.
pub type ConverterResult<T> = Result<T, ConverterError>;

/// Errors surfaced by the orchestrator, tagged by pipeline stage.
#[derive(Debug)]
pub enum ConverterError {
    Network(NetworkError),
    Control(ControlError),
    Simulate(SimulateError),
    Reconstruct(ReconstructError),
}

impl fmt::Display for ConverterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(err) => write!(f, "network construction failed: {}", err),
            Self::Control(err) => write!(f, "control bank construction failed: {}", err),
            Self::Simulate(err) => write!(f, "simulation failed: {}", err),
            Self::Reconstruct(err) => write!(f, "reconstruction failed: {}", err),
        }
    }
}

impl std::error::Error for ConverterError {}

impl From<NetworkError> for ConverterError {
    fn from(err: NetworkError) -> Self {
        Self::Network(err)
    }
}

impl From<ControlError> for ConverterError {
    fn from(err: ControlError) -> Self {
        Self::Control(err)
    }
}

impl From<SimulateError> for ConverterError {
    fn from(err: SimulateError) -> Self {
        Self::Simulate(err)
    }
}

impl From<ReconstructError> for ConverterError {
    fn from(err: ReconstructError) -> Self {
        Self::Reconstruct(err)
    }
}

/// One end-to-end run over a fixed sample timeline.
pub struct Converter {
    simulation: Simulation,
    t0: f64,
    length: usize,
}

impl Converter {
    /// Build the model and control bank for `network` and set up a run of
    /// `length` samples with period `ts` starting at `t0`.
    pub fn new(
        network: &SamplingNetwork<CpuRuntime>,
        inputs: Vec<InputFunction>,
        ts: f64,
        t0: f64,
        length: usize,
    ) -> ConverterResult<Self> {
        let model = topology::to_state_space_model(network, &inputs)?;
        let bank = ControlBank::new(network.controls.clone(), &model.a, ts)?;
        let simulation = Simulation::new(model, bank, t0, length, None)?;
        Ok(Self {
            simulation,
            t0,
            length,
        })
    }

    /// The model under conversion.
    pub fn model(&self) -> &LinearStateSpaceModel<CpuRuntime> {
        self.simulation.model()
    }

    /// Sample instants `t₀ + k·T_s` for every produced sample.
    pub fn time_stamps(&self) -> Vec<f64> {
        let ts = self.simulation.ts();
        (0..self.length).map(|k| self.t0 + k as f64 * ts).collect()
    }

    /// Run the forward simulation.
    pub fn simulate(&mut self) -> ConverterResult<SimulationResult> {
        Ok(self.simulation.run()?)
    }

    /// Reconstruct input estimates from a codeword stream.
    pub fn reconstruct(
        &mut self,
        codewords: &[usize],
        measurement_noise_covariance: &Tensor<CpuRuntime>,
        input_noise_covariance: &Tensor<CpuRuntime>,
    ) -> ConverterResult<Tensor<CpuRuntime>> {
        let model = self.simulation.model().clone();
        let reconstructor = SteadyStateReconstructor::new(
            &model,
            self.simulation.bank_mut(),
            measurement_noise_covariance,
            input_noise_covariance,
        )?;
        Ok(reconstructor.reconstruct(self.simulation.bank(), codewords)?)
    }
}

/// Simulate a sampling network driven by `inputs` for `length` samples.
///
/// Returns the codeword stream and the state trajectory.
pub fn simulate(
    network: &SamplingNetwork<CpuRuntime>,
    inputs: Vec<InputFunction>,
    ts: f64,
    t0: f64,
    length: usize,
) -> ConverterResult<SimulationResult> {
    Converter::new(network, inputs, ts, t0, length)?.simulate()
}

/// Reconstruct input estimates for a codeword stream recorded from
/// `network`, under the given measurement and input noise covariances.
pub fn reconstruct(
    network: &SamplingNetwork<CpuRuntime>,
    codewords: &[usize],
    measurement_noise_covariance: &Tensor<CpuRuntime>,
    input_noise_covariance: &Tensor<CpuRuntime>,
    ts: f64,
) -> ConverterResult<Tensor<CpuRuntime>> {
    // The reconstruction only needs the steering vectors, not the waveforms.
    let inputs = vec![InputFunction::Zero; network.system.input_order()];
    let mut converter = Converter::new(network, inputs, ts, 0.0, codewords.len())?;
    converter.reconstruct(
        codewords,
        measurement_noise_covariance,
        input_noise_covariance,
    )
}
