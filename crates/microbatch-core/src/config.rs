//! Batcher configuration.
//!
//! The typed form is what the builder works with. The serialized form is
//! lenient about numbers: `max_batches` accepts any number and is floored
//! and clamped at zero, `batch_size` and `frequency_ms` are floored but
//! rejected below one.
use std::time::Duration;

use serde::Deserialize;

use crate::error::BuildError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawBatcherConfig")]
/// Fixed parameters of a batcher.
pub struct BatcherConfig {
    /// Maximum jobs drained per tick.
    pub batch_size: usize,
    /// Minimum delay between ticks.
    pub frequency: Duration,
    /// Queue capacity in batches; `0` means unbounded.
    pub max_batches: usize,
}

impl BatcherConfig {
    pub const MIN_FREQUENCY: Duration = Duration::from_millis(1);

    /// One job per tick, unbounded queue.
    pub const fn new(frequency: Duration) -> Self {
        Self {
            batch_size: 1,
            frequency,
            max_batches: 0,
        }
    }

    pub fn validate(&self) -> Result<(), BuildError> {
        if self.frequency < Self::MIN_FREQUENCY {
            return Err(BuildError::InvalidFrequency);
        }
        if self.batch_size < 1 {
            return Err(BuildError::InvalidBatchSize);
        }
        Ok(())
    }

    /// Absolute job capacity, `None` when unbounded.
    ///
    /// A product that overflows `usize` is treated as unbounded.
    pub fn capacity(&self) -> Option<usize> {
        if self.max_batches == 0 {
            return None;
        }
        self.max_batches.checked_mul(self.batch_size)
    }
}

/// Normalize a loosely typed batch count: floor, then clamp negatives to 0.
pub fn normalize_max_batches(max_batches: f64) -> usize {
    // NaN compares false and lands on 0.
    if max_batches > 0.0 {
        max_batches.floor() as usize
    } else {
        0
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBatcherConfig {
    #[serde(default = "RawBatcherConfig::default_batch_size")]
    batch_size: f64,
    frequency_ms: f64,
    #[serde(default)]
    max_batches: f64,
}

impl RawBatcherConfig {
    fn default_batch_size() -> f64 {
        1.0
    }
}

impl TryFrom<RawBatcherConfig> for BatcherConfig {
    type Error = BuildError;

    fn try_from(raw: RawBatcherConfig) -> Result<Self, Self::Error> {
        if raw.frequency_ms.is_nan() || raw.frequency_ms < 1.0 {
            return Err(BuildError::InvalidFrequency);
        }
        if raw.batch_size.is_nan() || raw.batch_size < 1.0 {
            return Err(BuildError::InvalidBatchSize);
        }
        let config = BatcherConfig {
            batch_size: raw.batch_size.floor() as usize,
            frequency: Duration::from_millis(raw.frequency_ms.floor() as u64),
            max_batches: normalize_max_batches(raw.max_batches),
        };
        config.validate()?;
        Ok(config)
    }
}
