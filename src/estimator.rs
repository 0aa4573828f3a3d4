use std::time::Instant;

const WH_PER_KWH: f64 = 1000.0;
const SECONDS_PER_HOUR: f64 = 3600.0;

/// Derives instantaneous power from successive cumulative-energy readings.
///
/// Energy is expected to be non-decreasing within a session. A decrease (tracker reset)
/// or a non-positive interval yields no estimate rather than a negative or infinite one.
#[derive(Debug, Default)]
pub struct PowerEstimator {
    last_energy_kwh: Option<f64>,
    last_timestamp: Option<Instant>,
}

impl PowerEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watts drawn since the previous call. The reading is always recorded, whether or
    /// not it produced an estimate.
    pub fn estimate(&mut self, current_energy_kwh: f64, current_time: Instant) -> Option<f64> {
        let watts = match (self.last_energy_kwh, self.last_timestamp) {
            (Some(last_energy), Some(last_time)) => {
                let delta_kwh = current_energy_kwh - last_energy;
                let delta_s = current_time
                    .checked_duration_since(last_time)
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0);
                if delta_s > 0.0 && delta_kwh >= 0.0 {
                    Some(delta_kwh * WH_PER_KWH * SECONDS_PER_HOUR / delta_s)
                } else {
                    None
                }
            }
            _ => None,
        };

        self.last_energy_kwh = Some(current_energy_kwh);
        self.last_timestamp = Some(current_time);
        watts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_reading_has_no_estimate() {
        let mut estimator = PowerEstimator::new();
        assert_eq!(estimator.estimate(5.0, Instant::now()), None);
    }

    #[test]
    fn test_rising_then_falling_energy() {
        let mut estimator = PowerEstimator::new();
        let t0 = Instant::now();
        let readings = [0.0, 0.001, 0.0009];

        let results: Vec<Option<f64>> = readings
            .iter()
            .enumerate()
            .map(|(i, &kwh)| estimator.estimate(kwh, t0 + Duration::from_secs(i as u64)))
            .collect();

        assert_eq!(results[0], None);
        assert!((results[1].unwrap() - 3600.0).abs() < 1e-9);
        assert_eq!(results[2], None);
    }

    #[test]
    fn test_state_tracks_rejected_readings() {
        let mut estimator = PowerEstimator::new();
        let t0 = Instant::now();
        estimator.estimate(0.002, t0);
        // Reset: rejected, but becomes the new baseline.
        assert_eq!(estimator.estimate(0.0, t0 + Duration::from_secs(1)), None);
        let watts = estimator.estimate(0.001, t0 + Duration::from_secs(2)).unwrap();
        assert!((watts - 3600.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_interval_has_no_estimate() {
        let mut estimator = PowerEstimator::new();
        let t0 = Instant::now();
        estimator.estimate(0.0, t0);
        assert_eq!(estimator.estimate(0.5, t0), None);
    }
}
