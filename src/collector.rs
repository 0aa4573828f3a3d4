use crate::collectors::GpuReader;
use crate::energy_tracker::EmissionsTracker;
use crate::estimator::PowerEstimator;
use crate::sample::Sample;
use crate::utils::psutils::SystemReader;
use chrono::Local;
use std::sync::Arc;
use std::time::Instant;

/// Only the first GPU is sampled.
const GPU_INDEX: u32 = 0;

/// Merges one reading from each telemetry reader into a `Sample`.
pub struct SampleCollector {
    system: Box<dyn SystemReader>,
    gpu: Option<Arc<dyn GpuReader>>,
    tracker: Option<Arc<dyn EmissionsTracker>>,
    estimator: PowerEstimator,
    started_at: Instant,
}

impl SampleCollector {
    pub fn new(
        system: Box<dyn SystemReader>,
        gpu: Option<Arc<dyn GpuReader>>,
        tracker: Option<Arc<dyn EmissionsTracker>>,
        started_at: Instant,
    ) -> Self {
        Self {
            system,
            gpu,
            tracker,
            estimator: PowerEstimator::new(),
            started_at,
        }
    }

    pub fn collect(&mut self) -> Sample {
        // Clock first, so reader latency doesn't skew the timestamp.
        let now = Instant::now();
        let mut sample = Sample::empty(
            Local::now(),
            now.saturating_duration_since(self.started_at).as_secs_f64(),
        );

        let system = self.system.read();
        sample.cpu_percent = system.cpu_percent;
        sample.memory_used_gb = system.memory_used_gb;

        if let Some(gpu) = self.gpu.as_ref().and_then(|g| g.read(GPU_INDEX)) {
            sample.gpu_name = Some(gpu.name);
            sample.gpu_utilization_percent = gpu.utilization_percent;
            sample.gpu_memory_used_mb = gpu.memory_used_mb;
            sample.gpu_memory_percent = gpu.memory_percent;
            sample.gpu_temperature_c = gpu.temperature_c;
            sample.gpu_power_watts = gpu.power_watts;
            sample.gpu_power_limit_watts = gpu.power_limit_watts;
        }

        if let Some(cumulative) = self
            .tracker
            .as_ref()
            .and_then(|t| t.current_cumulative_energy())
        {
            sample.tracker_energy_kwh = Some(cumulative.energy_kwh);
            sample.tracker_emissions_kg = Some(cumulative.emissions_kg);
            sample.tracker_power_watts = self.estimator.estimate(cumulative.energy_kwh, now);
        }

        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeGpu, FakeSystem, FakeTracker};

    #[test]
    fn test_collects_every_reader() {
        let tracker = Arc::new(FakeTracker::new(vec![0.0, 0.5]));
        let mut collector = SampleCollector::new(
            Box::new(FakeSystem::new(25.0, 4.0)),
            Some(Arc::new(FakeGpu::with_power(200.0))),
            Some(tracker.clone()),
            Instant::now(),
        );

        let first = collector.collect();
        assert_eq!(first.cpu_percent, Some(25.0));
        assert_eq!(first.memory_used_gb, Some(4.0));
        assert_eq!(first.gpu_name.as_deref(), Some("Fake GPU"));
        assert_eq!(first.gpu_power_watts, Some(200.0));
        assert_eq!(first.tracker_energy_kwh, Some(0.0));
        assert_eq!(first.tracker_power_watts, None);

        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = collector.collect();
        assert_eq!(second.tracker_energy_kwh, Some(0.5));
        assert!(second.tracker_power_watts.unwrap() > 0.0);
        assert!(second.elapsed_seconds >= first.elapsed_seconds);
    }

    #[test]
    fn test_missing_gpu_keeps_system_fields() {
        let mut collector = SampleCollector::new(
            Box::new(FakeSystem::new(50.0, 8.0)),
            Some(Arc::new(FakeGpu::unavailable())),
            None,
            Instant::now(),
        );
        let sample = collector.collect();
        assert_eq!(sample.cpu_percent, Some(50.0));
        assert_eq!(sample.memory_used_gb, Some(8.0));
        assert_eq!(sample.gpu_name, None);
        assert_eq!(sample.gpu_utilization_percent, None);
        assert_eq!(sample.tracker_energy_kwh, None);
    }

    #[test]
    fn test_tracker_not_started_leaves_tracker_fields_empty() {
        let tracker = Arc::new(FakeTracker::new(vec![1.0]));
        tracker.set_started(false);
        let mut collector = SampleCollector::new(
            Box::new(FakeSystem::new(1.0, 1.0)),
            None,
            Some(tracker),
            Instant::now(),
        );
        let sample = collector.collect();
        assert_eq!(sample.tracker_energy_kwh, None);
        assert_eq!(sample.tracker_power_watts, None);
    }
}
