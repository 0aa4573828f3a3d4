use sysinfo::{MemoryRefreshKind, System};

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// System-wide CPU and memory snapshot. Fields are `None` when the platform can't report them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemReading {
    pub cpu_percent: Option<f64>,
    pub memory_used_gb: Option<f64>,
}

/// Source of system-wide resource figures.
pub trait SystemReader: Send {
    fn read(&mut self) -> SystemReading;
}

/// `SystemReader` backed by `sysinfo`.
pub struct SysinfoReader {
    system: System,
}

impl SysinfoReader {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta between two refreshes; prime the first one here.
        system.refresh_cpu_usage();
        Self { system }
    }
}

impl Default for SysinfoReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemReader for SysinfoReader {
    fn read(&mut self) -> SystemReading {
        self.system.refresh_cpu_usage();
        self.system
            .refresh_memory_specifics(MemoryRefreshKind::nothing().with_ram());

        let cpu_percent = if self.system.cpus().is_empty() {
            None
        } else {
            Some(self.system.global_cpu_usage() as f64)
        };
        let memory_used_gb = match self.system.total_memory() {
            0 => None,
            _ => Some(self.system.used_memory() as f64 / BYTES_PER_GIB),
        };

        SystemReading {
            cpu_percent,
            memory_used_gb,
        }
    }
}

/// Total installed RAM in GiB, or `None` when sysinfo reports nothing.
pub fn total_memory_gb() -> Option<f64> {
    let mut system = System::new();
    system.refresh_memory_specifics(MemoryRefreshKind::nothing().with_ram());
    match system.total_memory() {
        0 => None,
        bytes => Some(bytes as f64 / BYTES_PER_GIB),
    }
}
