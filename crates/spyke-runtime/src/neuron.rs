//! Neuron update collaborator interface

use crate::ring_buffer::SynapticInputs;

/// Consumes one timestep of synaptic input
pub trait NeuronUpdate {
    /// Update neurons for `time` from `inputs`, pushing local indices of fired neurons onto `fired`
    ///
    /// `fired` is cleared by the caller before each call.
    fn update(&mut self, time: u32, inputs: &SynapticInputs, fired: &mut Vec<u32>);
}

/// Neurons that take input and never fire
#[derive(Debug, Clone, Copy, Default)]
pub struct Passive;

impl NeuronUpdate for Passive {
    fn update(&mut self, _time: u32, _inputs: &SynapticInputs, _fired: &mut Vec<u32>) {}
}

/// Reports a neuron as fired whenever its raw input summed over types reaches a threshold
///
/// No state is kept between timesteps.
#[derive(Debug, Clone, Copy)]
pub struct EchoThreshold {
    threshold: u32,
}

impl EchoThreshold {
    /// Fire at `threshold` (at least 1)
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    /// Firing threshold
    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

impl NeuronUpdate for EchoThreshold {
    fn update(&mut self, _time: u32, inputs: &SynapticInputs, fired: &mut Vec<u32>) {
        for neuron in 0..inputs.n_neurons() {
            let total: u32 = (0..inputs.n_types())
                .map(|ty| u32::from(inputs.raw(ty, neuron)))
                .sum();
            if total >= self.threshold {
                fired.push(neuron as u32);
            }
        }
    }
}
