//! In-crate fakes for the telemetry readers and the energy tracker.

use crate::collectors::{GpuReader, GpuReading};
use crate::energy_tracker::{CumulativeEnergy, EmissionsTracker, EnergyBreakdown};
use crate::utils::errors::MonitoringError;
use crate::utils::psutils::{SystemReader, SystemReading};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub struct FakeSystem {
    reading: SystemReading,
}

impl FakeSystem {
    pub fn new(cpu_percent: f64, memory_used_gb: f64) -> Self {
        Self {
            reading: SystemReading {
                cpu_percent: Some(cpu_percent),
                memory_used_gb: Some(memory_used_gb),
            },
        }
    }
}

impl SystemReader for FakeSystem {
    fn read(&mut self) -> SystemReading {
        self.reading
    }
}

pub struct FakeGpu {
    reading: Option<GpuReading>,
}

impl FakeGpu {
    pub fn with_power(watts: f64) -> Self {
        Self {
            reading: Some(GpuReading {
                name: "Fake GPU".to_string(),
                utilization_percent: Some(75.0),
                memory_used_mb: Some(1024),
                memory_percent: Some(12.5),
                temperature_c: None,
                power_watts: Some(watts),
                power_limit_watts: Some(300.0),
            }),
        }
    }

    pub fn unavailable() -> Self {
        Self { reading: None }
    }
}

impl GpuReader for FakeGpu {
    fn read(&self, index: u32) -> Option<GpuReading> {
        if index == 0 { self.reading.clone() } else { None }
    }

    fn device_count(&self) -> u32 {
        u32::from(self.reading.is_some())
    }
}

/// Replays a fixed sequence of cumulative energy readings, repeating the last one.
/// Emissions are half the energy figure.
pub struct FakeTracker {
    energies_kwh: Vec<f64>,
    cursor: AtomicUsize,
    started: AtomicBool,
    stopped: AtomicBool,
    fail_start: bool,
    start_delay: Duration,
    pub start_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
}

impl FakeTracker {
    pub fn new(energies_kwh: Vec<f64>) -> Self {
        Self {
            energies_kwh,
            cursor: AtomicUsize::new(0),
            started: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            fail_start: false,
            start_delay: Duration::ZERO,
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
        }
    }

    /// A tracker that has not been started yet and refuses to start.
    pub fn failing() -> Self {
        let tracker = Self {
            fail_start: true,
            ..Self::new(vec![])
        };
        tracker.set_started(false);
        tracker
    }

    /// A tracker that waits for `start` before reporting.
    pub fn idle(energies_kwh: Vec<f64>) -> Self {
        let tracker = Self::new(energies_kwh);
        tracker.set_started(false);
        tracker
    }

    /// Like `idle`, but `start` takes `delay` to complete.
    pub fn slow_start(energies_kwh: Vec<f64>, delay: Duration) -> Self {
        Self {
            start_delay: delay,
            ..Self::idle(energies_kwh)
        }
    }

    pub fn set_started(&self, started: bool) {
        self.started.store(started, Ordering::SeqCst);
    }

    fn latest(&self) -> Option<f64> {
        let seen = self.cursor.load(Ordering::SeqCst);
        self.energies_kwh
            .get(seen.saturating_sub(1).min(self.energies_kwh.len().saturating_sub(1)))
            .copied()
    }
}

#[async_trait]
impl EmissionsTracker for FakeTracker {
    fn mode(&self) -> &str {
        "fake"
    }

    async fn start(&self) -> Result<(), MonitoringError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        if self.fail_start {
            return Err(MonitoringError::CollaboratorUnavailable("fake refuses".to_string()));
        }
        self.set_started(true);
        Ok(())
    }

    async fn stop(&self) -> Result<f64, MonitoringError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
        Ok(self.latest().unwrap_or(0.0) / 2.0)
    }

    fn current_cumulative_energy(&self) -> Option<CumulativeEnergy> {
        if !self.started.load(Ordering::SeqCst) || self.energies_kwh.is_empty() {
            return None;
        }
        let index = self
            .cursor
            .fetch_add(1, Ordering::SeqCst)
            .min(self.energies_kwh.len() - 1);
        let energy_kwh = self.energies_kwh[index];
        Some(CumulativeEnergy {
            energy_kwh,
            emissions_kg: energy_kwh / 2.0,
        })
    }

    fn final_breakdown(&self) -> Option<EnergyBreakdown> {
        self.stopped.load(Ordering::SeqCst).then(|| EnergyBreakdown {
            cpu_kwh: self.latest(),
            gpu_kwh: None,
            ram_kwh: Some(0.0),
        })
    }
}
