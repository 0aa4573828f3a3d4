use crate::utils::errors::MonitoringError;
use log::{debug, info, warn};
use nvml_wrapper::Nvml;
use nvml_wrapper::enum_wrappers::device::TemperatureSensor;
use nvml_wrapper::error::NvmlError;

const BYTES_PER_MIB: u64 = 1024 * 1024;

/// One reading of a single GPU. Every metric is optional on its own; a device that can't
/// report temperature still reports utilization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpuReading {
    pub name: String,
    pub utilization_percent: Option<f64>,
    pub memory_used_mb: Option<u64>,
    pub memory_percent: Option<f64>,
    pub temperature_c: Option<f64>,
    pub power_watts: Option<f64>,
    pub power_limit_watts: Option<f64>,
}

/// GPU telemetry provider. `read` returns `None` when the index was not enumerated.
pub trait GpuReader: Send + Sync {
    fn read(&self, index: u32) -> Option<GpuReading>;

    fn device_count(&self) -> u32;
}

/// Static facts captured once at enumeration.
#[derive(Debug, Clone)]
struct GpuDevice {
    index: u32,
    name: String,
    total_memory_mb: Option<u64>,
    power_limit_watts: Option<f64>,
}

pub struct NvidiaGpu {
    nvml: Nvml,
    devices: Vec<GpuDevice>,
}

impl NvidiaGpu {
    /// Initialise NVML and enumerate devices. Per-device failures are logged and the
    /// device is skipped; only a failed NVML init is an error.
    pub fn init() -> Result<Self, MonitoringError> {
        let nvml = Nvml::init().map_err(|e| {
            MonitoringError::CollaboratorUnavailable(format!("NVML init failed: {}", e))
        })?;

        match nvml.sys_driver_version() {
            Ok(version) => info!("NVIDIA driver: {}", version),
            Err(e) => debug!("NVIDIA driver version unavailable: {}", e),
        }

        let count = nvml.device_count().map_err(|e| {
            MonitoringError::CollaboratorUnavailable(format!("NVML device count failed: {}", e))
        })?;

        let mut devices = Vec::with_capacity(count as usize);
        for index in 0..count {
            let device = match nvml.device_by_index(index) {
                Ok(device) => device,
                Err(e) => {
                    warn!("Skipping GPU {}: {}", index, e);
                    continue;
                }
            };
            let name = device.name().unwrap_or_else(|_| format!("GPU {}", index));
            let total_memory_mb = device.memory_info().ok().map(|m| m.total / BYTES_PER_MIB);
            let power_limit_watts = device
                .power_management_limit_constraints()
                .ok()
                .map(|c| c.max_limit as f64 / 1000.0);

            info!("GPU {}: {} ({:?} MB)", index, name, total_memory_mb);
            devices.push(GpuDevice {
                index,
                name,
                total_memory_mb,
                power_limit_watts,
            });
        }

        Ok(Self { nvml, devices })
    }

    fn device(&self, index: u32) -> Option<&GpuDevice> {
        self.devices.iter().find(|d| d.index == index)
    }
}

/// NotSupported is expected on consumer boards; anything else is worth a debug line.
fn note_metric_error(metric: &str, index: u32, err: &NvmlError) {
    if !matches!(err, NvmlError::NotSupported) {
        debug!("GPU {} {} read failed: {}", index, metric, err);
    }
}

impl GpuReader for NvidiaGpu {
    fn read(&self, index: u32) -> Option<GpuReading> {
        let info = self.device(index)?;
        let mut reading = GpuReading {
            name: info.name.clone(),
            power_limit_watts: info.power_limit_watts,
            ..Default::default()
        };

        let device = match self.nvml.device_by_index(info.index) {
            Ok(device) => device,
            Err(e) => {
                warn!("GPU {} handle lost: {}", index, e);
                return Some(reading);
            }
        };

        match device.utilization_rates() {
            Ok(util) => reading.utilization_percent = Some(util.gpu as f64),
            Err(e) => note_metric_error("utilization", index, &e),
        }

        match device.memory_info() {
            Ok(mem) => {
                reading.memory_used_mb = Some(mem.used / BYTES_PER_MIB);
                if mem.total > 0 {
                    reading.memory_percent = Some(mem.used as f64 / mem.total as f64 * 100.0);
                }
            }
            Err(e) => note_metric_error("memory", index, &e),
        }

        match device.temperature(TemperatureSensor::Gpu) {
            Ok(temp) => reading.temperature_c = Some(temp as f64),
            Err(e) => note_metric_error("temperature", index, &e),
        }

        match device.power_usage() {
            Ok(milliwatts) => reading.power_watts = Some(milliwatts as f64 / 1000.0),
            Err(e) => note_metric_error("power", index, &e),
        }

        if reading.memory_percent.is_none() {
            if let (Some(used), Some(total)) = (reading.memory_used_mb, info.total_memory_mb) {
                if total > 0 {
                    reading.memory_percent = Some(used as f64 / total as f64 * 100.0);
                }
            }
        }

        Some(reading)
    }

    fn device_count(&self) -> u32 {
        self.devices.len() as u32
    }
}
