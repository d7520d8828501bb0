//! Synthetic price generation: seeding prices and the bounded threshold walk.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

use super::error::DeskError;
use super::money::Money;

#[derive(Debug, Clone, PartialEq)]
pub struct PriceConfig {
    /// θ as a fraction: a tick moves at most `θ × price` either way.
    pub threshold: f64,
    pub min_initial: Money,
    pub max_initial: Money,
    pub seed: Option<u64>,
}

impl Default for PriceConfig {
    fn default() -> Self {
        PriceConfig {
            threshold: 0.05,
            min_initial: Money::from_cents(100),
            max_initial: Money::from_cents(100_000),
            seed: None,
        }
    }
}

pub fn validate_threshold(threshold: f64) -> Result<f64, DeskError> {
    if !threshold.is_finite() || threshold <= 0.0 || threshold >= 1.0 {
        return Err(DeskError::InvalidThreshold { value: threshold });
    }
    Ok(threshold)
}

pub struct PriceOracle {
    config: PriceConfig,
    rng: Mutex<StdRng>,
}

impl PriceOracle {
    pub fn new(config: PriceConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        PriceOracle {
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &PriceConfig {
        &self.config
    }

    /// Uniform draw in `[min_initial, max_initial]`, rounded to the cent.
    pub fn initial_price(&self) -> Money {
        let low = self.config.min_initial.to_f64();
        let high = self.config.max_initial.to_f64();
        let drawn = self.draw(low, high);
        Money::from_f64(drawn).max(Money::ONE_CENT)
    }

    /// Uniform draw in `[current × (1 − θ), current × (1 + θ)]`, rounded to the
    /// cent and never below one cent.
    pub fn tick_with(&self, current: Money, threshold: f64) -> Money {
        let price = current.to_f64();
        let low = price * (1.0 - threshold);
        let high = price * (1.0 + threshold);
        let drawn = self.draw(low, high);
        Money::from_f64(drawn).max(Money::ONE_CENT)
    }

    fn draw(&self, low: f64, high: f64) -> f64 {
        if !(low < high) {
            return low;
        }
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        rng.gen_range(low..=high)
    }
}

impl std::fmt::Debug for PriceOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceOracle")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
