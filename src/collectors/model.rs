use crate::collectors::ComponentModels;
use crate::energy_tracker::{ComponentPower, PowerSource};
use async_trait::async_trait;
use sysinfo::System;

/// Package power assumed when nothing better is known.
pub const DEFAULT_CPU_TDP_WATTS: f64 = 85.0;

/// Offline power source: CPU power modelled as TDP scaled by system-wide utilisation.
/// Needs no privileged counters, so it is always available.
pub struct PowerModel {
    cpu_tdp_watts: f64,
    system: System,
    components: ComponentModels,
}

impl PowerModel {
    pub fn new(cpu_tdp_watts: f64, components: ComponentModels) -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self {
            cpu_tdp_watts,
            system,
            components,
        }
    }

    fn cpu_watts(&mut self) -> Option<f64> {
        self.system.refresh_cpu_usage();
        if self.system.cpus().is_empty() {
            return None;
        }
        let utilization = self.system.global_cpu_usage() as f64 / 100.0;
        utilization
            .is_finite()
            .then(|| self.cpu_tdp_watts * utilization.clamp(0.0, 1.0))
    }
}

#[async_trait]
impl PowerSource for PowerModel {
    async fn measure(&mut self) -> Result<ComponentPower, String> {
        Ok(ComponentPower {
            cpu_watts: self.cpu_watts(),
            gpu_watts: self.components.gpu_watts(),
            ram_watts: self.components.ram_watts(),
        })
    }

    fn is_available() -> bool {
        true
    }

    fn mode(&self) -> &'static str {
        "offline model"
    }
}
