use crate::collectors::ComponentModels;
use crate::energy_tracker::{ComponentPower, PowerSource};
use async_trait::async_trait;
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub const DEFAULT_RAPL_PATH: &str = "/sys/class/powercap/intel-rapl";

/// One top-level package domain (`intel-rapl:N`).
#[derive(Debug)]
struct RaplDomain {
    energy_path: PathBuf,
    max_energy_range_uj: u64,
    last_uj: Option<u64>,
}

impl RaplDomain {
    /// Microjoules consumed since the last read, correcting for one counter wrap.
    fn advance(&mut self, now_uj: u64) -> Option<u64> {
        let last = self.last_uj.replace(now_uj)?;
        if now_uj >= last {
            Some(now_uj - last)
        } else {
            Some(self.max_energy_range_uj.saturating_sub(last) + now_uj)
        }
    }
}

fn read_counter(path: &Path) -> Result<u64, String> {
    let raw = fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    raw.trim()
        .parse::<u64>()
        .map_err(|e| format!("{}: {}", path.display(), e))
}

/// Package domains sit directly under the powercap root as `intel-rapl:<n>`; subdomains
/// (`intel-rapl:<n>:<m>`) are already counted by their package.
fn discover_domains(root: &Path) -> Result<Vec<RaplDomain>, String> {
    let entries = fs::read_dir(root).map_err(|e| format!("{}: {}", root.display(), e))?;
    let mut domains = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with("intel-rapl:") || name.matches(':').count() != 1 {
            continue;
        }
        let dir = entry.path();
        let max_energy_range_uj = read_counter(&dir.join("max_energy_range_uj")).unwrap_or(u64::MAX);
        domains.push(RaplDomain {
            energy_path: dir.join("energy_uj"),
            max_energy_range_uj,
            last_uj: None,
        });
    }
    domains.sort_by(|a, b| a.energy_path.cmp(&b.energy_path));
    Ok(domains)
}

/// Hardware-counter power source: CPU package energy from Intel RAPL, GPU and RAM from
/// the shared component models.
pub struct Rapl {
    pub rapl_path: PathBuf,
    domains: Vec<RaplDomain>,
    last_read: Option<Instant>,
    components: ComponentModels,
}

impl Rapl {
    pub fn new(rapl_path: Option<String>, components: ComponentModels) -> Self {
        let rapl_path = PathBuf::from(rapl_path.unwrap_or_else(|| DEFAULT_RAPL_PATH.to_string()));
        Self {
            rapl_path,
            domains: Vec::new(),
            last_read: None,
            components,
        }
    }

    /// Average package power since the previous call; `None` on the first call.
    fn package_watts(&mut self) -> Result<Option<f64>, String> {
        if self.domains.is_empty() {
            self.domains = discover_domains(&self.rapl_path)?;
            if self.domains.is_empty() {
                return Err(format!("no RAPL package domains under {}", self.rapl_path.display()));
            }
            info!(
                "RAPL reading {} package domain(s) from {}",
                self.domains.len(),
                self.rapl_path.display()
            );
        }

        let now = Instant::now();
        let mut consumed_uj: Option<u64> = Some(0);
        for domain in &mut self.domains {
            let reading = read_counter(&domain.energy_path)?;
            consumed_uj = match (consumed_uj, domain.advance(reading)) {
                (Some(total), Some(delta)) => Some(total + delta),
                _ => None,
            };
        }

        let previous = self.last_read.replace(now);
        let watts = match (previous, consumed_uj) {
            (Some(previous), Some(uj)) => {
                let seconds = now.saturating_duration_since(previous).as_secs_f64();
                (seconds > 0.0).then(|| uj as f64 / 1_000_000.0 / seconds)
            }
            _ => None,
        };
        debug!("RAPL package power: {:?} W", watts);
        Ok(watts)
    }
}

#[async_trait]
impl PowerSource for Rapl {
    async fn measure(&mut self) -> Result<ComponentPower, String> {
        Ok(ComponentPower {
            cpu_watts: self.package_watts()?,
            gpu_watts: self.components.gpu_watts(),
            ram_watts: self.components.ram_watts(),
        })
    }

    /// Counters are root-only on recent kernels, so this needs a readable one.
    fn is_available() -> bool {
        read_counter(&Path::new(DEFAULT_RAPL_PATH).join("intel-rapl:0/energy_uj")).is_ok()
    }

    fn mode(&self) -> &'static str {
        "RAPL"
    }
}
