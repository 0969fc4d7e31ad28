use rand::{SeedableRng, rngs::StdRng};

use crate::devices::types::{uniform_between, uniform_noise};

/// Site demand generator for the battery rack's peak-shaving controller.
///
/// `LoadProfile` draws one base demand per hour of day at construction
/// (morning and evening peaks, a low night band, a moderate daytime band)
/// and then perturbs it on every sample with uniform noise plus a sinusoid
/// that completes one cycle per hour.
///
/// # Examples
///
/// ```
/// use ess_modbus_sim::devices::load_profile::LoadProfile;
///
/// let mut load = LoadProfile::generate(42);
/// let demand = load.demand_kw(18, 30);
/// assert!(demand >= 20.0);
/// ```
#[derive(Debug, Clone)]
pub struct LoadProfile {
    /// Base demand per hour of day in kilowatts.
    pub hourly_kw: [f64; 24],

    /// Full width of the per-sample uniform noise in kilowatts.
    pub noise_kw: f64,

    /// Amplitude of the within-hour sinusoid in kilowatts.
    pub minute_amp_kw: f64,

    /// Demand never drops below this value in kilowatts.
    pub floor_kw: f64,

    /// Random number generator for noise generation.
    rng: StdRng,
}

impl LoadProfile {
    /// Draws a fresh 24-hour profile.
    ///
    /// # Arguments
    ///
    /// * `seed` - Random seed for reproducible profiles and noise
    pub fn generate(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut hourly_kw = [0.0; 24];
        for (hour, kw) in hourly_kw.iter_mut().enumerate() {
            let (low, width) = Self::band(hour);
            *kw = uniform_between(&mut rng, low, width);
        }
        Self {
            hourly_kw,
            noise_kw: 10.0,
            minute_amp_kw: 5.0,
            floor_kw: 20.0,
            rng,
        }
    }

    /// Lower bound and width of the base-demand band for `hour`.
    fn band(hour: usize) -> (f64, f64) {
        match hour {
            6..=8 => (60.0, 20.0),
            17..=21 => (70.0, 20.0),
            0..=5 | 22..=23 => (30.0, 10.0),
            _ => (50.0, 15.0),
        }
    }

    /// Samples the demand at a time of day.
    ///
    /// The result is a consumption magnitude in kilowatts, never below
    /// `floor_kw` before the within-hour sinusoid is applied.
    ///
    /// # Arguments
    ///
    /// * `hour` - Hour of day, 0–23 (wraps)
    /// * `minute` - Minute of hour, 0–59
    pub fn demand_kw(&mut self, hour: u32, minute: u32) -> f64 {
        let base = self.hourly_kw[hour as usize % 24];
        let noisy = (base + uniform_noise(&mut self.rng, self.noise_kw)).max(self.floor_kw);
        let wave = (f64::from(minute) * std::f64::consts::PI / 30.0).sin() * self.minute_amp_kw;
        (noisy + wave).round()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hourly_bands() {
        let load = LoadProfile::generate(7);
        for (hour, kw) in load.hourly_kw.iter().enumerate() {
            let (low, width) = LoadProfile::band(hour);
            assert!(*kw >= low && *kw < low + width, "hour {hour}: {kw}");
        }
        assert!(load.hourly_kw[7] >= 60.0);
        assert!(load.hourly_kw[19] >= 70.0);
        assert!(load.hourly_kw[2] < 40.0);
        assert!(load.hourly_kw[12] >= 50.0 && load.hourly_kw[12] < 65.0);
    }

    #[test]
    fn demand_respects_floor_and_wave() {
        let mut load = LoadProfile::generate(3);
        for hour in 0..24 {
            for minute in [0, 15, 30, 45] {
                let kw = load.demand_kw(hour, minute);
                assert!(kw >= load.floor_kw - load.minute_amp_kw - 0.5, "{hour}:{minute} -> {kw}");
            }
        }
    }

    #[test]
    fn deterministic_with_same_seed() {
        let mut a = LoadProfile::generate(42);
        let mut b = LoadProfile::generate(42);
        assert_eq!(a.hourly_kw, b.hourly_kw);
        for minute in 0..60 {
            assert_eq!(a.demand_kw(12, minute), b.demand_kw(12, minute));
        }
    }

    #[test]
    fn hour_wraps() {
        let mut a = LoadProfile::generate(1);
        let mut b = LoadProfile::generate(1);
        assert_eq!(a.demand_kw(25, 0), b.demand_kw(1, 0));
    }
}
