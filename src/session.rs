use crate::collector::SampleCollector;
use crate::collectors::GpuReader;
use crate::config::SessionConfig;
use crate::energy_tracker::{EmissionsTracker, start_first_available};
use crate::sample::Sample;
use crate::sample_log::SampleLog;
use crate::sampler::Sampler;
use crate::summary::{Summary, TrackerFinal, summarize};
use crate::supervisor::{ExitReason, ProcessSupervisor};
use crate::utils::errors::MonitoringError;
use crate::utils::psutils::SystemReader;
use log::{error, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Draining,
    Closed,
}

/// The readers a session samples from. Tracker candidates are tried in order.
pub struct Telemetry {
    pub system: Box<dyn SystemReader>,
    pub gpu: Option<Arc<dyn GpuReader>>,
    pub trackers: Vec<Arc<dyn EmissionsTracker>>,
}

#[derive(Debug)]
pub enum SessionOutcome {
    /// Cancellation arrived before the child was launched.
    NotStarted,
    Finished(ExitReason),
}

/// One monitoring session: a child process, the sampling loop around it and the
/// energy tracker, torn down together exactly once.
pub struct Session {
    config: SessionConfig,
    state: SessionState,
    cancel: CancellationToken,
    telemetry: Option<Telemetry>,
    tracker: Option<Arc<dyn EmissionsTracker>>,
    tracker_expected: bool,
    sampler: Option<Sampler>,
    samples: Vec<Sample>,
    summary: Option<Summary>,
}

impl Session {
    pub fn new(config: SessionConfig, telemetry: Telemetry, cancel: CancellationToken) -> Self {
        Self {
            config,
            state: SessionState::Idle,
            cancel,
            telemetry: Some(telemetry),
            tracker: None,
            tracker_expected: false,
            sampler: None,
            samples: Vec::new(),
            summary: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn summary(&self) -> Option<&Summary> {
        self.summary.as_ref()
    }

    pub fn output_path(&self) -> &Path {
        &self.config.output
    }

    /// Start the tracker, open the log, launch the child and sample until it exits or the
    /// session is cancelled. Shutdown has completed by the time this returns `Ok`.
    pub async fn run(&mut self) -> Result<SessionOutcome, MonitoringError> {
        if self.state != SessionState::Idle {
            return Err(MonitoringError::Other(format!(
                "session cannot run from state {:?}",
                self.state
            )));
        }
        let Some(telemetry) = self.telemetry.take() else {
            return Err(MonitoringError::Other("session has no telemetry".to_string()));
        };
        if self.cancel.is_cancelled() {
            info!("Cancelled before launch; nothing to monitor");
            self.state = SessionState::Closed;
            return Ok(SessionOutcome::NotStarted);
        }

        self.tracker_expected = !telemetry.trackers.is_empty();
        self.tracker = tokio::select! {
            tracker = start_first_available(telemetry.trackers) => tracker,
            _ = self.cancel.cancelled() => None,
        };
        if self.cancel.is_cancelled() {
            info!("Cancelled while starting the tracker; nothing launched");
            self.stop_tracker().await;
            self.state = SessionState::Closed;
            return Ok(SessionOutcome::NotStarted);
        }

        let launched = SampleLog::create(&self.config.output).and_then(|log| {
            ProcessSupervisor::launch(&self.config.command).map(|child| (log, child))
        });
        let (log, mut child) = match launched {
            Ok(launched) => launched,
            Err(e) => {
                self.stop_tracker().await;
                self.state = SessionState::Closed;
                return Err(e);
            }
        };
        if let Some(pid) = child.pid() {
            info!("Monitoring pid {}", pid);
        }

        let collector = SampleCollector::new(
            telemetry.system,
            telemetry.gpu,
            self.tracker.clone(),
            Instant::now(),
        );
        self.sampler = Some(Sampler::spawn(
            collector,
            log,
            self.config.sampling_interval(),
            self.config.live_status,
        ));
        self.state = SessionState::Running;

        let reason = child.await_exit_or_cancel(&self.cancel).await;
        self.shutdown().await;
        Ok(SessionOutcome::Finished(reason))
    }

    /// Stop sampling, stop the tracker and aggregate. Safe to call any number of times;
    /// only the first call does work.
    pub async fn shutdown(&mut self) -> Option<&Summary> {
        match self.state {
            SessionState::Running => {}
            SessionState::Idle => {
                self.state = SessionState::Closed;
                return None;
            }
            SessionState::Draining | SessionState::Closed => return self.summary.as_ref(),
        }
        self.state = SessionState::Draining;

        if let Some(sampler) = self.sampler.take() {
            let (samples, joined) = sampler.stop_and_join(self.config.join_timeout).await;
            self.samples.extend(samples);
            if let Err(e) = joined {
                warn!("{}", e);
            }
        }

        let tracker_final = self.stop_tracker().await;
        match summarize(&self.samples, tracker_final, self.tracker_expected) {
            Ok(summary) => self.summary = Some(summary),
            Err(e) => error!("Could not summarize session: {}", e),
        }

        self.state = SessionState::Closed;
        info!("Session closed with {} samples", self.samples.len());
        self.summary.as_ref()
    }

    /// Stops the tracker at most once; later calls find nothing to stop.
    async fn stop_tracker(&mut self) -> Option<TrackerFinal> {
        let tracker = self.tracker.take()?;
        let emissions_kg = match tracker.stop().await {
            Ok(emissions_kg) => emissions_kg,
            Err(e) => {
                warn!("Stopping the {} tracker failed: {}", tracker.mode(), e);
                return None;
            }
        };
        let energy_kwh = tracker.current_cumulative_energy()?.energy_kwh;
        Some(TrackerFinal {
            energy_kwh,
            emissions_kg,
            breakdown: tracker.final_breakdown(),
        })
    }
}
