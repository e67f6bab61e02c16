//! Prints the state trajectory of a controlled integrator chain.
//!
//! Usage: `integrator_stability <gain> <frequency> [samples]`

use std::env;
use std::process;

use adcsim::converter::Converter;
use adcsim::network::topology::{integrator_block, series_all};
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
    let blocks: Vec<_> = (0..2)
        .map(|_| integrator_block::<CpuRuntime>(&device, gain))
        .collect();
    let chain = series_all(&blocks).expect("chain construction failed");

    let input = InputFunction::Sine {
        amplitude: 1.0,
        frequency,
        phase: std::f64::consts::PI / 7.0,
    };

    let ts = 1e-3;
    let mut converter =
        Converter::new(&chain, vec![input], ts, 0.0, samples).expect("setup failed");
    let result = converter.simulate().expect("simulation failed");

    let n = chain.state_order();
    let states: Vec<f64> = result.states.to_vec();
    for (k, t) in converter.time_stamps().iter().enumerate() {
        print!("t = {:9.4}  codeword = {:2}  state = [", t, result.codewords[k]);
        for i in 0..n {
            if i > 0 {
                print!(", ");
            }
            print!("{:+.5e}", states[k * n + i]);
        }
        println!("]");
    }
}
