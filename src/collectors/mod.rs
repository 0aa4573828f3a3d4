pub mod model;
pub mod nvidia_gpu;
pub mod rapl;

pub use model::PowerModel;
pub use nvidia_gpu::{GpuReader, GpuReading, NvidiaGpu};
pub use rapl::Rapl;

use std::sync::Arc;

/// 3 W per 8 GB of installed memory.
pub const RAM_WATTS_PER_GB: f64 = 0.375;

/// GPU and RAM power shared by every tracker power source. GPU power comes from device 0
/// only; RAM power is a flat per-GB model.
#[derive(Clone)]
pub struct ComponentModels {
    gpu: Option<Arc<dyn GpuReader>>,
    total_ram_gb: Option<f64>,
}

impl ComponentModels {
    pub fn new(gpu: Option<Arc<dyn GpuReader>>, total_ram_gb: Option<f64>) -> Self {
        Self { gpu, total_ram_gb }
    }

    pub fn gpu_watts(&self) -> Option<f64> {
        self.gpu.as_ref()?.read(0)?.power_watts
    }

    pub fn ram_watts(&self) -> Option<f64> {
        self.total_ram_gb.map(|gb| gb * RAM_WATTS_PER_GB)
    }
}
