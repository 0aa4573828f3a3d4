use crate::utils::errors::MonitoringError;
use log::{debug, info, warn};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long a terminated child gets to exit before it is killed.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);
/// How long pipes may stay open after exit, e.g. held by a backgrounded grandchild.
pub const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything the child left behind.
#[derive(Debug, Default)]
pub struct ChildOutput {
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug)]
pub enum ExitReason {
    Exited(ChildOutput),
    Cancelled(ChildOutput),
}

/// Owns the single target process of a session.
pub struct ProcessSupervisor {
    program: String,
    pid: Option<u32>,
    child: Child,
    pumps: Option<(JoinHandle<String>, JoinHandle<String>)>,
    captured: (String, String),
}

/// Drain a pipe in the background so a chatty child never blocks on a full buffer.
fn spawn_pump<R>(pipe: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buffer).await {
                debug!("Child pipe read ended early: {}", e);
            }
        }
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

async fn drain(mut pump: JoinHandle<String>) -> String {
    match tokio::time::timeout(PIPE_DRAIN_TIMEOUT, &mut pump).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            debug!("Child pipe reader failed: {}", e);
            String::new()
        }
        Err(_) => {
            pump.abort();
            warn!("Child output still open {:?} after exit; discarding it", PIPE_DRAIN_TIMEOUT);
            String::new()
        }
    }
}

impl ProcessSupervisor {
    pub fn launch(command: &[String]) -> Result<Self, MonitoringError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| MonitoringError::ChildLaunch("empty command".to_string()))?;

        info!("Spawning {:?}", command);
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MonitoringError::ChildLaunch(format!("{}: {}", program, e)))?;

        let pid = child.id();
        let pumps = (
            spawn_pump(child.stdout.take()),
            spawn_pump(child.stderr.take()),
        );

        Ok(Self {
            program: program.clone(),
            pid,
            child,
            pumps: Some(pumps),
            captured: (String::new(), String::new()),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn collect_output(&mut self, status: Option<ExitStatus>) -> ChildOutput {
        if let Some((stdout_pump, stderr_pump)) = self.pumps.take() {
            self.captured = (drain(stdout_pump).await, drain(stderr_pump).await);
        }
        ChildOutput {
            status,
            stdout: self.captured.0.clone(),
            stderr: self.captured.1.clone(),
        }
    }

    /// Block until the child exits on its own.
    pub async fn await_exit(&mut self) -> ChildOutput {
        let status = match self.child.wait().await {
            Ok(status) => {
                info!("{} exited with {}", self.program, status);
                Some(status)
            }
            Err(e) => {
                warn!("Failed waiting for {}: {}", self.program, e);
                None
            }
        };
        self.collect_output(status).await
    }

    /// Wait for a natural exit unless `cancel` fires first, in which case the child is
    /// terminated.
    pub async fn await_exit_or_cancel(&mut self, cancel: &CancellationToken) -> ExitReason {
        let exited = tokio::select! {
            status = self.child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };
        match exited {
            Some(status) => {
                let status = status
                    .inspect_err(|e| warn!("Failed waiting for {}: {}", self.program, e))
                    .ok();
                if let Some(status) = status {
                    info!("{} exited with {}", self.program, status);
                }
                ExitReason::Exited(self.collect_output(status).await)
            }
            None => ExitReason::Cancelled(self.cancel().await),
        }
    }

    /// Terminate the child and wait for it. A child that already exited is left alone.
    pub async fn cancel(&mut self) -> ChildOutput {
        if let Ok(Some(status)) = self.child.try_wait() {
            debug!("{} already exited with {}; nothing to cancel", self.program, status);
            return self.collect_output(Some(status)).await;
        }

        info!("Terminating {}", self.program);
        self.request_termination();
        let status = match tokio::time::timeout(TERMINATE_GRACE, self.child.wait()).await {
            Ok(status) => status.ok(),
            Err(_) => {
                warn!(
                    "{} ignored termination for {:?}; killing it",
                    self.program, TERMINATE_GRACE
                );
                if let Err(e) = self.child.start_kill() {
                    debug!("Kill of {} failed: {}", self.program, e);
                }
                self.child.wait().await.ok()
            }
        };
        self.collect_output(status).await
    }

    #[cfg(unix)]
    fn request_termination(&mut self) {
        let Some(pid) = self.pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
            return;
        };
        // SAFETY: `kill` has no memory-safety preconditions. The child is not yet reaped
        // (we hold its handle and `try_wait` saw it running), so the pid is still ours.
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            debug!(
                "SIGTERM to {} failed: {}",
                pid,
                std::io::Error::last_os_error()
            );
        }
    }

    #[cfg(not(unix))]
    fn request_termination(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!("Kill of {} failed: {}", self.program, e);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_captures_output_after_exit() {
        let mut supervisor = ProcessSupervisor::launch(&sh("echo out; echo err >&2; exit 3")).unwrap();
        assert!(supervisor.pid().is_some());
        let output = supervisor.await_exit().await;
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert_eq!(output.status.and_then(|s| s.code()), Some(3));
    }

    #[tokio::test]
    async fn test_launch_failure_is_reported() {
        let result = ProcessSupervisor::launch(&["/definitely/not/a/binary".to_string()]);
        assert!(matches!(result, Err(MonitoringError::ChildLaunch(_))));
        assert!(matches!(
            ProcessSupervisor::launch(&[]),
            Err(MonitoringError::ChildLaunch(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_terminates_running_child() {
        let mut supervisor = ProcessSupervisor::launch(&sh("echo started; exec sleep 30")).unwrap();
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        match supervisor.await_exit_or_cancel(&token).await {
            ExitReason::Cancelled(output) => {
                assert!(!output.status.unwrap().success());
                assert_eq!(output.stdout, "started\n");
            }
            other => panic!("expected cancellation, got {:?}", other),
        }
        assert!(started.elapsed() < TERMINATE_GRACE);
    }

    #[tokio::test]
    async fn test_cancel_after_exit_is_a_noop() {
        let mut supervisor = ProcessSupervisor::launch(&sh("exit 0")).unwrap();
        let token = CancellationToken::new();
        let reason = supervisor.await_exit_or_cancel(&token).await;
        assert!(matches!(reason, ExitReason::Exited(_)));

        let again = supervisor.cancel().await;
        assert!(again.status.unwrap().success());
    }
}
