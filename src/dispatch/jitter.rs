//! Random downward perturbation of candidate scores.
//!
//! Each candidate loses `delta = min(Dirichlet(alpha))`. With the default
//! `alpha = (18, 2)` that is usually around 0.1 and occasionally larger, so
//! repeated identical inputs do not always produce identical rankings.

use std::sync::Mutex;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Dirichlet, Distribution};

use crate::dispatch::types::Candidate;
use crate::error::ConfigError;

/// Score perturbation with its own random source.
pub struct Jitter {
    distribution: Dirichlet<f64>,
    rng: Mutex<StdRng>,
}

impl std::fmt::Debug for Jitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jitter").finish_non_exhaustive()
    }
}

impl Jitter {
    /// Entropy-seeded jitter with the given concentration parameters.
    pub fn new(alpha: &[f64]) -> Result<Self, ConfigError> {
        Self::with_rng(alpha, StdRng::from_entropy())
    }

    /// Deterministic jitter for tests and replays.
    pub fn seeded(alpha: &[f64], seed: u64) -> Result<Self, ConfigError> {
        Self::with_rng(alpha, StdRng::seed_from_u64(seed))
    }

    fn with_rng(alpha: &[f64], rng: StdRng) -> Result<Self, ConfigError> {
        let distribution = Dirichlet::new(alpha).map_err(|e| ConfigError::InvalidValue {
            key: "jitter_alpha".into(),
            message: e.to_string(),
        })?;
        Ok(Self {
            distribution,
            rng: Mutex::new(rng),
        })
    }

    /// Draw one reduction amount in `(0, 1)`.
    pub fn draw_delta(&self) -> f64 {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        self.distribution
            .sample(&mut *rng)
            .into_iter()
            .fold(f64::INFINITY, f64::min)
    }

    /// Lower the candidate's score by a fresh draw, clamped at zero.
    pub fn apply(&self, mut candidate: Candidate) -> Candidate {
        let delta = self.draw_delta();
        candidate.probability = (candidate.probability - delta).max(0.0);
        candidate
    }
}
