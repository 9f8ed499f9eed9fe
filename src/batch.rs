use rand::Rng;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use rayon::prelude::*;

use crate::cpu::{Cpu, CpuConfig};
use crate::error::Error;
use crate::memory::MEMORY_SIZE;

/// Result of running one program on its own engine.
#[derive(Debug)]
pub struct BatchResult {
    /// Instructions executed, including on failure.
    pub steps: usize,
    /// Everything PRN wrote before the run ended.
    pub output: Vec<u8>,
    pub outcome: Result<(), Error>,
}

/// Run each image on a fresh engine, in parallel. Results keep input order.
pub fn run_all(images: &[Vec<u8>], config: &CpuConfig) -> Vec<BatchResult> {
    images
        .par_iter()
        .map(|image| run_one(image, config))
        .collect()
}

fn run_one(image: &[u8], config: &CpuConfig) -> BatchResult {
    let mut cpu = Cpu::with_config(config.clone(), Vec::new());
    let outcome = cpu.load(image).and_then(|()| cpu.run().map(|_| ()));
    let steps = cpu.steps();
    BatchResult {
        steps,
        output: cpu.into_output(),
        outcome,
    }
}

/// Settings for a random-image stress run.
pub struct StressConfig {
    /// Number of random memory images to run.
    pub count: usize,
    /// Maximum steps per image.
    pub step_limit: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            count: 1 << 12,
            step_limit: 1 << 10,
        }
    }
}

/// How a batch of runs ended, by category.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StressTally {
    pub halted: usize,
    pub unknown_opcode: usize,
    pub out_of_range: usize,
    pub step_limit: usize,
    pub other: usize,
    pub total_steps: usize,
}

impl StressTally {
    pub fn record(&mut self, result: &BatchResult) {
        self.total_steps += result.steps;
        match &result.outcome {
            Ok(()) => self.halted += 1,
            Err(Error::UnknownOpcode { .. }) => self.unknown_opcode += 1,
            Err(Error::AddressOutOfRange(_) | Error::RegisterOutOfRange(_)) => {
                self.out_of_range += 1
            }
            Err(Error::StepLimitExceeded(_)) => self.step_limit += 1,
            Err(_) => self.other += 1,
        }
    }

    pub fn runs(&self) -> usize {
        self.halted + self.unknown_opcode + self.out_of_range + self.step_limit + self.other
    }
}

/// Generate `count` full-size memory images of random bytes.
pub fn random_images(count: usize, seed: u64) -> Vec<Vec<u8>> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let mut image = vec![0u8; MEMORY_SIZE];
            rng.fill(&mut image[..]);
            image
        })
        .collect()
}

/// Run random images under a step limit and count how each run ended.
/// The same seed always produces the same tally.
pub fn stress(config: &StressConfig, cpu: &CpuConfig, seed: u64) -> StressTally {
    let images = random_images(config.count, seed);
    let cpu = CpuConfig {
        step_limit: Some(config.step_limit),
        ..cpu.clone()
    };
    let mut tally = StressTally::default();
    for result in run_all(&images, &cpu) {
        tally.record(&result);
    }
    tally
}
