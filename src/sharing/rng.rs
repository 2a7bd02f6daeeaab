//! Random generation strategies for share sampling

use crate::error::{FedError, Result};
use crate::weights::Shape;
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Requested security level for share randomness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RngSecurity {
    /// Fast pseudo-random sampling, statistically weak
    #[default]
    Insecure,
    /// Uniform sampling from a cryptographically random seed (reserved)
    BasicSecure,
    /// Every value from a cryptographically secure generator (unimplemented)
    StrictSecure,
}

/// Source of random share tensors
pub trait ShareRng: Send {
    /// Sample a tensor of `shape` uniformly from `[-bound, bound]`
    fn sample(&mut self, shape: Shape, bound: f64) -> DMatrix<f64>;

    fn security(&self) -> RngSecurity;
}

/// Pseudo-random strategy backed by `StdRng`
pub struct InsecureRng {
    rng: StdRng,
}

impl InsecureRng {
    pub fn new() -> Self {
        Self { rng: StdRng::from_entropy() }
    }

    /// Reproducible stream, for tests and simulations
    pub fn seeded(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }
}

impl Default for InsecureRng {
    fn default() -> Self {
        Self::new()
    }
}

impl ShareRng for InsecureRng {
    fn sample(&mut self, (rows, cols): Shape, bound: f64) -> DMatrix<f64> {
        if bound == 0.0 {
            return DMatrix::zeros(rows, cols);
        }
        DMatrix::from_fn(rows, cols, |_, _| self.rng.gen_range(-bound..=bound))
    }

    fn security(&self) -> RngSecurity {
        RngSecurity::Insecure
    }
}

/// Resolve a strategy for the requested level, never substituting a weaker one
pub fn share_rng(security: RngSecurity) -> Result<Box<dyn ShareRng>> {
    match security {
        RngSecurity::Insecure => Ok(Box::new(InsecureRng::new())),
        RngSecurity::BasicSecure | RngSecurity::StrictSecure => {
            Err(FedError::NotImplemented(security))
        }
    }
}
