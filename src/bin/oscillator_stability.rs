//! Prints the state trajectory of a controlled oscillator block.
//!
//! Usage: `oscillator_stability <gain> <frequency> [samples]`

use std::env;
use std::process;

use adcsim::converter::Converter;
use adcsim::network::topology::oscillator_block;
use adcsim::signal::InputFunction;
use numr::runtime::cpu::{CpuDevice, CpuRuntime};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: {} <gain> <frequency> [samples]", args[0]);
        process::exit(2);
    }
    let gain: f64 = args[1].parse().expect("gain must be a number");
    let frequency: f64 = args[2].parse().expect("frequency must be a number");
    let samples: usize = args
        .get(3)
        .map(|s| s.parse().expect("samples must be an integer"))
        .unwrap_or(100);

    println!("simulation for gain, frequency: ({}, {})", gain, frequency);

    let device = CpuDevice::new();
    let oscillator = oscillator_block::<CpuRuntime>(&device, gain, frequency);

    let input = InputFunction::Sine {
        amplitude: 1.0,
        frequency,
        phase: std::f64::consts::PI / 2.0,
    };

    let ts = 1e-3;
    let mut converter = Converter::new(
        &oscillator,
        vec![input.clone(), input],
        ts,
        0.0,
        samples,
    )
    .expect("setup failed");
    let result = converter.simulate().expect("simulation failed");

    let states: Vec<f64> = result.states.to_vec();
    for (k, t) in converter.time_stamps().iter().enumerate() {
        let energy = states[k * 2].powi(2) + states[k * 2 + 1].powi(2);
        println!(
            "t = {:9.4}  codeword = {}  state = [{:+.5e}, {:+.5e}]  energy = {:.3e}",
            t,
            result.codewords[k],
            states[k * 2],
            states[k * 2 + 1],
            energy
        );
    }
}
