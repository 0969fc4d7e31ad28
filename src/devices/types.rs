//! Common types and traits for device simulation components.

use chrono::NaiveDateTime;
use rand::{Rng, rngs::StdRng};

/// Timing information handed to a model on every simulation step.
///
/// # Fields
/// * `now` - Local wall-clock time, drives diurnal profiles and day rollover
/// * `monotonic_ms` - Milliseconds on a monotonic clock, drives alarm timing
/// * `dt_s` - Seconds covered by this step, used to integrate power into energy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub now: NaiveDateTime,
    pub monotonic_ms: u64,
    pub dt_s: f64,
}

impl Tick {
    /// Creates a tick covering `dt_s` seconds.
    pub fn new(now: NaiveDateTime, monotonic_ms: u64, dt_s: f64) -> Self {
        Self {
            now,
            monotonic_ms,
            dt_s,
        }
    }
}

/// A clocked physical model that publishes its state as an immutable snapshot.
///
/// The owning engine calls [`Model::step`] on every tick and hands copies of
/// [`Model::snapshot`] to readers, so readers never see a half-updated state.
pub trait Model: Send + 'static {
    /// Copy of the model state handed to publishers and the REST layer.
    type Snapshot: Clone + Send + Sync + 'static;

    /// Advances the model by one tick.
    fn step(&mut self, tick: &Tick);

    /// Returns the current state.
    fn snapshot(&self) -> Self::Snapshot;

    /// Returns a human-readable type name for the model.
    fn device_type(&self) -> &'static str;
}

/// Uniform noise in `[-span/2, span/2)`.
///
/// # Arguments
///
/// * `rng` - Random number generator
/// * `span` - Full width of the noise band
pub fn uniform_noise(rng: &mut StdRng, span: f64) -> f64 {
    if span <= 0.0 {
        return 0.0;
    }
    (rng.random::<f64>() - 0.5) * span
}

/// Uniform value in `[low, low + width)`.
pub fn uniform_between(rng: &mut StdRng, low: f64, width: f64) -> f64 {
    low + rng.random::<f64>() * width
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn noise_stays_within_half_span() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let n = uniform_noise(&mut rng, 4.0);
            assert!((-2.0..2.0).contains(&n), "noise {n} out of band");
        }
    }

    #[test]
    fn zero_span_is_silent() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(uniform_noise(&mut rng, 0.0), 0.0);
        assert_eq!(uniform_noise(&mut rng, -1.0), 0.0);
    }

    #[test]
    fn between_respects_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..1000 {
            let v = uniform_between(&mut rng, 0.7, 0.3);
            assert!((0.7..1.0).contains(&v));
        }
    }
}
