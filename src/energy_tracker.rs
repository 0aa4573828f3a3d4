use crate::carbon;
use crate::utils::errors::MonitoringError;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Extra time a measurement task gets to notice its stop token beyond one interval.
pub const STOP_GRACE: Duration = Duration::from_secs(1);

/// Instantaneous power per component, in watts.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ComponentPower {
    pub cpu_watts: Option<f64>,
    pub gpu_watts: Option<f64>,
    pub ram_watts: Option<f64>,
}

/// Cumulative figures as of the tracker's last internal measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CumulativeEnergy {
    pub energy_kwh: f64,
    pub emissions_kg: f64,
}

/// Per-component cumulative energy. A component the source never reported stays `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnergyBreakdown {
    pub cpu_kwh: Option<f64>,
    pub gpu_kwh: Option<f64>,
    pub ram_kwh: Option<f64>,
}

/// Energy/emissions accounting service with its own start/stop lifecycle.
///
/// `start` and `stop` are each called at most once per session; the session controller
/// enforces that. Both accessors are cheap and never block on the measurement task.
#[async_trait]
pub trait EmissionsTracker: Send + Sync {
    /// Human-readable accounting mode, used in logs.
    fn mode(&self) -> &str;

    async fn start(&self) -> Result<(), MonitoringError>;

    /// Stop measuring and return cumulative emissions in kg CO2.
    async fn stop(&self) -> Result<f64, MonitoringError>;

    /// `None` until the tracker has started.
    fn current_cumulative_energy(&self) -> Option<CumulativeEnergy>;

    /// `None` until the tracker has stopped.
    fn final_breakdown(&self) -> Option<EnergyBreakdown>;
}

/// A hardware or model-based source of per-component power.
#[async_trait]
pub trait PowerSource: Send + 'static {
    /// Current power draw. Sources that derive power from counters report the average
    /// since their previous call.
    async fn measure(&mut self) -> Result<ComponentPower, String>;

    /// Check if this source can run on the current system
    fn is_available() -> bool
    where
        Self: Sized;

    fn mode(&self) -> &'static str;
}

#[derive(Debug, Default)]
struct EnergyLedger {
    cpu_kwh: Option<f64>,
    gpu_kwh: Option<f64>,
    ram_kwh: Option<f64>,
    last_measured: Option<Instant>,
    finalized: bool,
}

impl EnergyLedger {
    fn begin(&mut self, at: Instant) {
        self.last_measured = Some(at);
    }

    /// Integrate `power` over the time since the previous measurement.
    fn accumulate(&mut self, power: ComponentPower, at: Instant) {
        let Some(last) = self.last_measured.replace(at) else {
            return;
        };
        let hours = at.saturating_duration_since(last).as_secs_f64() / 3600.0;
        integrate(&mut self.cpu_kwh, power.cpu_watts, hours);
        integrate(&mut self.gpu_kwh, power.gpu_watts, hours);
        integrate(&mut self.ram_kwh, power.ram_watts, hours);
    }

    fn total_kwh(&self) -> f64 {
        [self.cpu_kwh, self.gpu_kwh, self.ram_kwh]
            .into_iter()
            .flatten()
            .sum()
    }

    fn breakdown(&self) -> EnergyBreakdown {
        EnergyBreakdown {
            cpu_kwh: self.cpu_kwh,
            gpu_kwh: self.gpu_kwh,
            ram_kwh: self.ram_kwh,
        }
    }
}

fn integrate(slot: &mut Option<f64>, watts: Option<f64>, hours: f64) {
    if let Some(watts) = watts.filter(|w| w.is_finite() && *w >= 0.0) {
        *slot = Some(slot.unwrap_or(0.0) + watts * hours / 1000.0);
    }
}

/// Generic energy tracker
/// # Type Parameters
/// * `T` - A power source that implements `PowerSource`
pub struct EnergyTracker<T: PowerSource> {
    mode: &'static str,
    /// Time between internal measurements
    measure_interval: Duration,
    /// Grid carbon intensity in g CO2 per kWh
    carbon_intensity: f64,
    /// The source lives here until `start` moves it into the measurement task
    source: Mutex<Option<T>>,
    ledger: Arc<Mutex<EnergyLedger>>,
    stop_token: CancellationToken,
    task_handle: Mutex<Option<JoinHandle<T>>>,
    stopped: AtomicBool,
}

impl<T: PowerSource> EnergyTracker<T> {
    pub fn new(source: T, measure_interval: Duration, country_code: &str) -> Self {
        Self {
            mode: source.mode(),
            measure_interval,
            carbon_intensity: carbon::intensity_for(country_code),
            source: Mutex::new(Some(source)),
            ledger: Arc::new(Mutex::new(EnergyLedger::default())),
            stop_token: CancellationToken::new(),
            task_handle: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .lock()
            .map(|h| h.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    fn emissions_kg(&self, energy_kwh: f64) -> f64 {
        energy_kwh * self.carbon_intensity / 1000.0
    }

    /// Background task that measures the source at a fixed interval until stopped.
    /// Hands the source back so `stop` can take one last measurement.
    async fn run_measurement_loop(
        mut source: T,
        ledger: Arc<Mutex<EnergyLedger>>,
        stop: CancellationToken,
        interval: Duration,
    ) -> T {
        let mut iteration: u64 = 0;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            iteration += 1;
            match source.measure().await {
                Ok(power) => {
                    if let Ok(mut ledger) = ledger.lock() {
                        ledger.accumulate(power, Instant::now());
                    }
                }
                Err(e) => warn!("{} measurement {} failed: {}", source.mode(), iteration, e),
            }
        }
        debug!(
            "{} measurement loop stopped after {} iterations",
            source.mode(),
            iteration
        );
        source
    }
}

#[async_trait]
impl<T: PowerSource> EmissionsTracker for EnergyTracker<T> {
    fn mode(&self) -> &str {
        self.mode
    }

    async fn start(&self) -> Result<(), MonitoringError> {
        if self.is_running() {
            warn!("Energy tracker is already running. Ignoring start request.");
            return Ok(());
        }

        if !T::is_available() {
            return Err(MonitoringError::CollaboratorUnavailable(
                "Power source is not available on this system".to_string(),
            ));
        }

        let mut source = self
            .source
            .lock()
            .map_err(|e| MonitoringError::Other(e.to_string()))?
            .take()
            .ok_or_else(|| {
                MonitoringError::CollaboratorUnavailable("Tracker was already used".to_string())
            })?;

        // Counter-based sources need one reading to establish their baseline.
        if let Err(e) = source.measure().await {
            if let Ok(mut slot) = self.source.lock() {
                *slot = Some(source);
            }
            return Err(MonitoringError::CollaboratorUnavailable(format!(
                "{} failed its first measurement: {}",
                self.mode, e
            )));
        }

        self.ledger
            .lock()
            .map_err(|e| MonitoringError::Other(e.to_string()))?
            .begin(Instant::now());

        let handle = tokio::spawn(Self::run_measurement_loop(
            source,
            Arc::clone(&self.ledger),
            self.stop_token.clone(),
            self.measure_interval,
        ));
        *self
            .task_handle
            .lock()
            .map_err(|e| MonitoringError::Other(e.to_string()))? = Some(handle);

        info!(
            "{} tracker started, measuring every {:?} at {:.0} gCO2/kWh",
            self.mode, self.measure_interval, self.carbon_intensity
        );
        Ok(())
    }

    async fn stop(&self) -> Result<f64, MonitoringError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(MonitoringError::Other("Tracker already stopped".to_string()));
        }
        let handle = self
            .task_handle
            .lock()
            .map_err(|e| MonitoringError::Other(e.to_string()))?
            .take();
        let Some(mut handle) = handle else {
            return Err(MonitoringError::CollaboratorUnavailable(
                "Tracker was never started".to_string(),
            ));
        };
        self.stopped.store(true, Ordering::SeqCst);

        self.stop_token.cancel();
        let join_timeout = self.measure_interval + STOP_GRACE;
        match tokio::time::timeout(join_timeout, &mut handle).await {
            Ok(Ok(mut source)) => match source.measure().await {
                Ok(power) => {
                    if let Ok(mut ledger) = self.ledger.lock() {
                        ledger.accumulate(power, Instant::now());
                    }
                }
                Err(e) => warn!("Final {} measurement failed: {}", source.mode(), e),
            },
            Ok(Err(e)) => warn!("Measurement task ended abnormally: {}", e),
            Err(_) => {
                warn!(
                    "Measurement task did not stop within {:?}; abandoning it",
                    join_timeout
                );
                handle.abort();
            }
        }

        let mut ledger = self
            .ledger
            .lock()
            .map_err(|e| MonitoringError::Other(e.to_string()))?;
        ledger.finalized = true;
        let emissions = self.emissions_kg(ledger.total_kwh());
        info!(
            "Energy tracker stopped: {:.6} kWh, {:.6} kg CO2",
            ledger.total_kwh(),
            emissions
        );
        Ok(emissions)
    }

    fn current_cumulative_energy(&self) -> Option<CumulativeEnergy> {
        let ledger = self.ledger.lock().ok()?;
        ledger.last_measured?;
        let energy_kwh = ledger.total_kwh();
        Some(CumulativeEnergy {
            energy_kwh,
            emissions_kg: self.emissions_kg(energy_kwh),
        })
    }

    fn final_breakdown(&self) -> Option<EnergyBreakdown> {
        let ledger = self.ledger.lock().ok()?;
        ledger.finalized.then(|| ledger.breakdown())
    }
}

/// Start the first tracker that comes up, in preference order. Later candidates are the
/// degraded/offline modes; `None` means the session runs without energy accounting.
pub async fn start_first_available(
    candidates: Vec<Arc<dyn EmissionsTracker>>,
) -> Option<Arc<dyn EmissionsTracker>> {
    for (position, tracker) in candidates.into_iter().enumerate() {
        match tracker.start().await {
            Ok(()) => {
                if position > 0 {
                    warn!("Energy accounting running in fallback mode: {}", tracker.mode());
                }
                return Some(tracker);
            }
            Err(e) => warn!("Could not start {} tracker: {}", tracker.mode(), e),
        }
    }
    warn!("No energy tracker available; tracker columns will be empty");
    None
}
