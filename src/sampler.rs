use crate::collector::SampleCollector;
use crate::sample::Sample;
use crate::sample_log::SampleLog;
use crate::utils::errors::MonitoringError;
use log::{debug, error, info, warn};
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Handle to the background sampling task.
pub struct Sampler {
    stop: CancellationToken,
    handle: JoinHandle<SampleLog>,
    receiver: mpsc::UnboundedReceiver<Sample>,
}

impl Sampler {
    /// Spawn the sampling loop. It runs until `stop_and_join` is called.
    pub fn spawn(
        collector: SampleCollector,
        log: SampleLog,
        interval: Duration,
        live_status: bool,
    ) -> Self {
        let stop = CancellationToken::new();
        let (tx, receiver) = mpsc::unbounded_channel();
        let status: StatusSink =
            live_status.then(|| Box::new(std::io::stdout()) as Box<dyn Write + Send>);
        let handle = tokio::spawn(run_sampling_loop(
            collector,
            log,
            tx,
            stop.clone(),
            interval,
            status,
        ));
        info!("Sampling started every {:?}", interval);
        Self {
            stop,
            handle,
            receiver,
        }
    }

    /// Signal the loop and wait up to `timeout` for it. A loop that misses the deadline is
    /// aborted and abandoned. Returns every sample it produced either way.
    pub async fn stop_and_join(
        mut self,
        timeout: Duration,
    ) -> (Vec<Sample>, Result<(), MonitoringError>) {
        self.stop.cancel();
        let joined = match tokio::time::timeout(timeout, &mut self.handle).await {
            Ok(Ok(log)) => {
                debug!("Sampling loop wrote {} rows to {}", log.rows(), log.path().display());
                Ok(())
            }
            Ok(Err(e)) => Err(MonitoringError::SampleIteration(format!(
                "sampling task ended abnormally: {}",
                e
            ))),
            Err(_) => {
                self.handle.abort();
                Err(MonitoringError::ShutdownTimeout(format!(
                    "sampling loop did not stop within {:?}",
                    timeout
                )))
            }
        };

        let mut samples = Vec::new();
        while let Ok(sample) = self.receiver.try_recv() {
            samples.push(sample);
        }
        (samples, joined)
    }
}

/// Where the live status line goes, if anywhere.
type StatusSink = Option<Box<dyn Write + Send>>;

/// Collect, persist, hand over, report. Errors are contained to the iteration that raised
/// them; a status line that can't be written doesn't cost the sample.
fn sample_once(
    collector: &mut SampleCollector,
    log: &mut SampleLog,
    tx: &mpsc::UnboundedSender<Sample>,
    status: &mut StatusSink,
) -> Result<(), MonitoringError> {
    let sample = collector.collect();
    log.append(&sample)
        .map_err(|e| MonitoringError::SampleIteration(format!("log append failed: {}", e)))?;

    let line = status.is_some().then(|| sample.status_line());
    tx.send(sample)
        .map_err(|_| MonitoringError::SampleIteration("sample receiver dropped".to_string()))?;

    if let (Some(out), Some(line)) = (status.as_mut(), line) {
        if let Err(e) = write!(out, "\r{}", line).and_then(|_| out.flush()) {
            debug!("Status line not rendered: {}", e);
        }
    }
    Ok(())
}

/// Fixed-rate loop: each tick sleeps for whatever is left of `interval` after sampling.
/// Overruns are not carried into the next tick.
async fn run_sampling_loop(
    mut collector: SampleCollector,
    mut log: SampleLog,
    tx: mpsc::UnboundedSender<Sample>,
    stop: CancellationToken,
    interval: Duration,
    mut status: StatusSink,
) -> SampleLog {
    let mut iteration: u64 = 0;
    while !stop.is_cancelled() {
        let tick_start = Instant::now();
        iteration += 1;

        if let Err(e) = sample_once(&mut collector, &mut log, &tx, &mut status) {
            error!("Sampling iteration {} failed: {}", iteration, e);
        }

        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep_until(tick_start + interval) => {}
        }
    }

    if let Some(out) = status.as_mut() {
        let _ = writeln!(out).and_then(|_| out.flush());
    }
    if iteration == 0 {
        warn!("Sampling stopped before the first sample");
    }
    debug!("Sampling loop stopped after {} iterations", iteration);
    log
}
