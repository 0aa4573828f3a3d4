use chrono::{DateTime, Local, SecondsFormat};

/// Persisted column set, in row order.
pub const SAMPLE_COLUMNS: [&str; 14] = [
    "timestamp",
    "elapsed_seconds",
    "cpu_percent",
    "memory_used_gb",
    "gpu_name",
    "gpu_utilization_percent",
    "gpu_memory_used_mb",
    "gpu_memory_percent",
    "gpu_temperature_c",
    "gpu_power_watts",
    "gpu_power_limit_watts",
    "tracker_energy_kwh",
    "tracker_emissions_kg",
    "tracker_power_watts",
];

/// One snapshot of system, GPU and tracker state. Never mutated after collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Local>,
    pub elapsed_seconds: f64,
    pub cpu_percent: Option<f64>,
    pub memory_used_gb: Option<f64>,
    pub gpu_name: Option<String>,
    pub gpu_utilization_percent: Option<f64>,
    pub gpu_memory_used_mb: Option<u64>,
    pub gpu_memory_percent: Option<f64>,
    pub gpu_temperature_c: Option<f64>,
    pub gpu_power_watts: Option<f64>,
    pub gpu_power_limit_watts: Option<f64>,
    pub tracker_energy_kwh: Option<f64>,
    pub tracker_emissions_kg: Option<f64>,
    pub tracker_power_watts: Option<f64>,
}

impl Sample {
    /// A sample with only the clock fields set.
    pub fn empty(timestamp: DateTime<Local>, elapsed_seconds: f64) -> Self {
        Self {
            timestamp,
            elapsed_seconds,
            cpu_percent: None,
            memory_used_gb: None,
            gpu_name: None,
            gpu_utilization_percent: None,
            gpu_memory_used_mb: None,
            gpu_memory_percent: None,
            gpu_temperature_c: None,
            gpu_power_watts: None,
            gpu_power_limit_watts: None,
            tracker_energy_kwh: None,
            tracker_emissions_kg: None,
            tracker_power_watts: None,
        }
    }

    /// CSV cells in `SAMPLE_COLUMNS` order; absent values are empty cells.
    pub fn to_record(&self) -> Vec<String> {
        vec![
            self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, false),
            format!("{:.3}", self.elapsed_seconds),
            cell(self.cpu_percent),
            cell(self.memory_used_gb),
            self.gpu_name.clone().unwrap_or_default(),
            cell(self.gpu_utilization_percent),
            self.gpu_memory_used_mb.map(|v| v.to_string()).unwrap_or_default(),
            cell(self.gpu_memory_percent),
            cell(self.gpu_temperature_c),
            cell(self.gpu_power_watts),
            cell(self.gpu_power_limit_watts),
            cell(self.tracker_energy_kwh),
            cell(self.tracker_emissions_kg),
            cell(self.tracker_power_watts),
        ]
    }

    /// One-line live summary, e.g. `T: 3.5s | CPU: 12.0% | GPU: 80.0% | ...`.
    pub fn status_line(&self) -> String {
        let mut line = format!("T: {:.1}s", self.elapsed_seconds);
        if let Some(cpu) = self.cpu_percent {
            line.push_str(&format!(" | CPU: {:.1}%", cpu));
        }
        if let Some(util) = self.gpu_utilization_percent {
            line.push_str(&format!(" | GPU: {:.1}%", util));
        }
        if let Some(mem) = self.gpu_memory_percent {
            line.push_str(&format!(" | VRAM: {:.1}%", mem));
        }
        if let Some(temp) = self.gpu_temperature_c {
            line.push_str(&format!(" | Temp: {:.1}°C", temp));
        }
        if let Some(power) = self.gpu_power_watts {
            line.push_str(&format!(" | GPU Power: {:.1}W", power));
        }
        if let Some(energy) = self.tracker_energy_kwh {
            line.push_str(&format!(" | Energy: {:.4}Wh", energy * 1000.0));
        }
        if let Some(emissions) = self.tracker_emissions_kg {
            line.push_str(&format!(" | CO2: {:.4}g", emissions * 1000.0));
        }
        if let Some(power) = self.tracker_power_watts {
            line.push_str(&format!(" | Power: {:.1}W", power));
        }
        line
    }
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_matches_column_count() {
        let sample = Sample::empty(Local::now(), 0.0);
        assert_eq!(sample.to_record().len(), SAMPLE_COLUMNS.len());
    }

    #[test]
    fn test_absent_fields_are_empty_cells() {
        let mut sample = Sample::empty(Local::now(), 1.25);
        sample.cpu_percent = Some(42.5);
        sample.gpu_memory_used_mb = Some(2048);
        let record = sample.to_record();
        assert_eq!(record[1], "1.250");
        assert_eq!(record[2], "42.5");
        assert_eq!(record[3], "");
        assert_eq!(record[4], "");
        assert_eq!(record[6], "2048");
        assert!(record[11..].iter().all(|c| c.is_empty()));
    }

    #[test]
    fn test_status_line_skips_missing_metrics() {
        let mut sample = Sample::empty(Local::now(), 2.0);
        sample.cpu_percent = Some(10.0);
        assert_eq!(sample.status_line(), "T: 2.0s | CPU: 10.0%");

        sample.gpu_power_watts = Some(150.0);
        sample.tracker_energy_kwh = Some(0.002);
        let line = sample.status_line();
        assert!(line.contains("GPU Power: 150.0W"));
        assert!(line.contains("Energy: 2.0000Wh"));
        assert!(!line.contains("VRAM"));
    }
}
