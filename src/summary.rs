use crate::energy_tracker::EnergyBreakdown;
use crate::sample::Sample;
use crate::utils::errors::MonitoringError;
use itertools::multiunzip;
use polars::prelude::*;
use std::fmt;

/// Mean and max of one metric over the samples where it was present.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricStats {
    pub mean: f64,
    pub max: f64,
    pub count: usize,
}

/// Final figures captured from the tracker after it stopped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerFinal {
    pub energy_kwh: f64,
    pub emissions_kg: f64,
    pub breakdown: Option<EnergyBreakdown>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub sample_count: usize,
    /// `elapsed_seconds` of the last sample
    pub duration_seconds: Option<f64>,
    pub gpu_utilization: Option<MetricStats>,
    pub gpu_memory: Option<MetricStats>,
    pub gpu_temperature: Option<MetricStats>,
    pub gpu_power: Option<MetricStats>,
    /// `None` when the tracker never produced final figures
    pub tracker: Option<TrackerFinal>,
    /// Whether a tracker ran at all; distinguishes "unavailable" from "not configured"
    pub tracker_expected: bool,
}

/// DataFrame: gpu_utilization_percent | gpu_memory_percent | gpu_temperature_c | gpu_power_watts
pub fn gpu_frame(samples: &[Sample]) -> Result<DataFrame, MonitoringError> {
    let (utilization, memory, temperature, power): (
        Vec<Option<f64>>,
        Vec<Option<f64>>,
        Vec<Option<f64>>,
        Vec<Option<f64>>,
    ) = multiunzip(samples.iter().map(|s| {
        (
            s.gpu_utilization_percent,
            s.gpu_memory_percent,
            s.gpu_temperature_c,
            s.gpu_power_watts,
        )
    }));

    let frame = DataFrame::new(vec![
        Column::new("gpu_utilization_percent".into(), utilization),
        Column::new("gpu_memory_percent".into(), memory),
        Column::new("gpu_temperature_c".into(), temperature),
        Column::new("gpu_power_watts".into(), power),
    ])?;
    Ok(frame)
}

/// Stats over the non-null values of a float column; `None` if every value is null.
fn column_stats(frame: &DataFrame, name: &str) -> Result<Option<MetricStats>, MonitoringError> {
    let values = frame.column(name)?.f64()?;
    let count = values.len() - values.null_count();
    if count == 0 {
        return Ok(None);
    }
    Ok(values
        .mean()
        .zip(values.max())
        .map(|(mean, max)| MetricStats { mean, max, count }))
}

/// Aggregate a closed session. Pure: reads `samples` and the tracker's final figures only.
pub fn summarize(
    samples: &[Sample],
    tracker: Option<TrackerFinal>,
    tracker_expected: bool,
) -> Result<Summary, MonitoringError> {
    let frame = gpu_frame(samples)?;
    Ok(Summary {
        sample_count: samples.len(),
        duration_seconds: samples.last().map(|s| s.elapsed_seconds),
        gpu_utilization: column_stats(&frame, "gpu_utilization_percent")?,
        gpu_memory: column_stats(&frame, "gpu_memory_percent")?,
        gpu_temperature: column_stats(&frame, "gpu_temperature_c")?,
        gpu_power: column_stats(&frame, "gpu_power_watts")?,
        tracker,
        tracker_expected,
    })
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Samples collected: {}", self.sample_count)?;
        if self.sample_count == 0 {
            return Ok(());
        }

        writeln!(f, "\n--- GPU summary ---")?;
        let rows = [
            ("GPU utilization", self.gpu_utilization, "%"),
            ("GPU memory", self.gpu_memory, "%"),
            ("Temperature", self.gpu_temperature, "°C"),
            ("GPU power", self.gpu_power, "W"),
        ];
        for (label, stats, unit) in rows {
            if let Some(stats) = stats {
                writeln!(
                    f,
                    "{}: mean={:.1}{unit}, max={:.1}{unit}",
                    label, stats.mean, stats.max
                )?;
            }
        }
        if let Some(duration) = self.duration_seconds {
            writeln!(f, "Total duration: {:.1} seconds", duration)?;
        }

        match &self.tracker {
            Some(tracker) => {
                writeln!(f, "\n--- Energy summary ---")?;
                writeln!(f, "Total energy consumed: {:.6} kWh", tracker.energy_kwh)?;
                writeln!(f, "Total CO2 emissions: {:.6} kg", tracker.emissions_kg)?;
                if let Some(breakdown) = tracker.breakdown {
                    let parts = [
                        ("CPU", breakdown.cpu_kwh),
                        ("GPU", breakdown.gpu_kwh),
                        ("RAM", breakdown.ram_kwh),
                    ];
                    for (label, kwh) in parts {
                        if let Some(kwh) = kwh {
                            writeln!(f, "{} energy total: {:.4} Wh", label, kwh * 1000.0)?;
                        }
                    }
                }
            }
            None if self.tracker_expected => {
                writeln!(
                    f,
                    "\nWarning: energy figures unavailable; the tracker produced no final reading."
                )?;
            }
            None => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn sample_with(elapsed: f64, utilization: Option<f64>) -> Sample {
        let mut sample = Sample::empty(Local::now(), elapsed);
        sample.gpu_utilization_percent = utilization;
        sample
    }

    #[test]
    fn test_stats_skip_missing_values() {
        let samples = vec![
            sample_with(0.5, Some(10.0)),
            sample_with(1.0, None),
            sample_with(1.5, Some(20.0)),
            sample_with(2.0, Some(30.0)),
        ];
        let summary = summarize(&samples, None, false).unwrap();
        let stats = summary.gpu_utilization.unwrap();
        assert!((stats.mean - 20.0).abs() < 1e-9);
        assert_eq!(stats.max, 30.0);
        assert_eq!(stats.count, 3);
        assert_eq!(summary.duration_seconds, Some(2.0));
        assert_eq!(summary.sample_count, 4);
    }

    #[test]
    fn test_all_null_metric_is_omitted() {
        let samples = vec![sample_with(0.5, None), sample_with(1.0, None)];
        let summary = summarize(&samples, None, false).unwrap();
        assert_eq!(summary.gpu_utilization, None);
        assert_eq!(summary.gpu_power, None);
        assert!(!summary.to_string().contains("GPU utilization"));
    }

    #[test]
    fn test_empty_session() {
        let summary = summarize(&[], None, true).unwrap();
        assert_eq!(summary.sample_count, 0);
        assert_eq!(summary.duration_seconds, None);
        assert_eq!(summary.gpu_temperature, None);
        assert_eq!(summary.to_string(), "Samples collected: 0\n");
    }

    #[test]
    fn test_tracker_section() {
        let samples = vec![sample_with(1.0, Some(50.0))];
        let final_figures = TrackerFinal {
            energy_kwh: 0.0125,
            emissions_kg: 0.004,
            breakdown: Some(EnergyBreakdown {
                cpu_kwh: Some(0.01),
                gpu_kwh: None,
                ram_kwh: Some(0.0025),
            }),
        };
        let text = summarize(&samples, Some(final_figures), true)
            .unwrap()
            .to_string();
        assert!(text.contains("Total energy consumed: 0.012500 kWh"));
        assert!(text.contains("CPU energy total: 10.0000 Wh"));
        assert!(text.contains("RAM energy total: 2.5000 Wh"));
        assert!(!text.contains("GPU energy total"));

        let missing = summarize(&samples, None, true).unwrap().to_string();
        assert!(missing.contains("energy figures unavailable"));
        let absent = summarize(&samples, None, false).unwrap().to_string();
        assert!(!absent.contains("Energy summary") && !absent.contains("unavailable"));
    }
}
