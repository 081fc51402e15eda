//! Encoder process supervisor
//!
//! Owns at most one long-running encoder process. A monitor task per run
//! waits on the child, reads its stderr incrementally and reports lifecycle
//! and progress as [`SupervisorEvent`]s on a single channel. Every event is
//! tagged with the run id so the controller can drop events that belong to
//! a process it has already stopped.

use super::command::EncoderCommand;
use super::error::{RecordingError, RecordingResult};
use super::progress::parse_fps;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Lifecycle and progress of one encoder run
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    Started { pid: Option<u32> },
    /// Emitted for every chunk of diagnostic output
    ProgressTick {
        fps: Option<f32>,
        size_bytes: u64,
        elapsed: Duration,
    },
    Exited { code: Option<i32> },
    Crashed { code: Option<i32>, signal: Option<i32> },
    FailedToStart { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorEvent {
    pub run_id: u64,
    pub event: ProcessEvent,
}

pub type EventSender = mpsc::UnboundedSender<SupervisorEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SupervisorEvent>;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    /// A stop had been requested before the process went away
    pub requested: bool,
}

impl ExitInfo {
    fn from_status(status: ExitStatus, requested: bool) -> Self {
        Self {
            code: status.code(),
            signal: exit_signal(&status),
            requested,
        }
    }

    /// Abnormal termination. After a requested stop only death by a
    /// signal other than the stop or kill signal counts.
    pub fn is_crash(&self) -> bool {
        match self.signal {
            Some(signal) => !self.requested || !is_stop_signal(signal),
            None => !self.requested && self.code != Some(0),
        }
    }
}

#[cfg(unix)]
fn is_stop_signal(signal: i32) -> bool {
    matches!(signal, libc::SIGTERM | libc::SIGINT | libc::SIGKILL)
}

#[cfg(not(unix))]
fn is_stop_signal(_signal: i32) -> bool {
    false
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Result of [`EncoderProcess::stop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    /// Exited within the graceful window, or had already exited
    Exited(ExitInfo),
    /// Needed a forced kill
    Killed(ExitInfo),
}

impl StopOutcome {
    /// The process crashed, before or while being stopped
    pub fn crashed(&self) -> Option<ExitInfo> {
        match self {
            StopOutcome::Exited(info) | StopOutcome::Killed(info) if info.is_crash() => Some(*info),
            _ => None,
        }
    }
}

/// A short-lived encoder invocation (merge, `-version`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedRun {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Process control seam used by the session controller
#[async_trait]
pub trait EncoderProcess: Send + Sync {
    /// Spawn a capture run writing to `output`; returns its run id
    async fn start(&mut self, command: &EncoderCommand, output: &Path) -> RecordingResult<u64>;

    /// Graceful stop with bounded wait
    async fn stop(&mut self) -> RecordingResult<StopOutcome>;

    fn is_running(&self) -> bool;

    fn current_run(&self) -> Option<u64>;

    /// Run a command to completion, capturing its output
    async fn run_to_completion(&mut self, command: &EncoderCommand) -> RecordingResult<CompletedRun>;
}

struct RunningProcess {
    run_id: u64,
    pid: Option<u32>,
    stop_requested: Arc<AtomicBool>,
    kill_tx: Option<oneshot::Sender<()>>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
    _monitor: JoinHandle<()>,
}

/// Supervises encoder child processes with tokio
pub struct ProcessSupervisor {
    events: EventSender,
    stop_timeout: Duration,
    kill_timeout: Duration,
    next_run: u64,
    current: Option<RunningProcess>,
}

impl ProcessSupervisor {
    pub fn new(events: EventSender, stop_timeout: Duration, kill_timeout: Duration) -> Self {
        Self {
            events,
            stop_timeout,
            kill_timeout,
            next_run: 0,
            current: None,
        }
    }

    fn emit(&self, run_id: u64, event: ProcessEvent) {
        let _ = self.events.send(SupervisorEvent { run_id, event });
    }

    fn spawn_command(command: &EncoderCommand) -> Command {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null());
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl EncoderProcess for ProcessSupervisor {
    async fn start(&mut self, command: &EncoderCommand, output: &Path) -> RecordingResult<u64> {
        if self.is_running() {
            return Err(RecordingError::AlreadyRecording);
        }

        self.next_run += 1;
        let run_id = self.next_run;
        tracing::info!("Starting encoder (run {}): {}", run_id, command.command_line());

        let mut cmd = Self::spawn_command(command);
        cmd.stdout(Stdio::null()).stderr(Stdio::piped()).kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!("{}: {}", command.program, e);
                tracing::error!("Encoder failed to start: {}", message);
                self.emit(run_id, ProcessEvent::FailedToStart { message: message.clone() });
                return Err(RecordingError::FailedToStart(message));
            }
        };

        let pid = child.id();
        let stderr = child.stderr.take();
        let stop_requested = Arc::new(AtomicBool::new(false));
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        self.emit(run_id, ProcessEvent::Started { pid });

        let monitor = tokio::spawn(monitor(
            MonitorContext {
                run_id,
                output: output.to_path_buf(),
                started_at: Instant::now(),
                events: self.events.clone(),
                stop_requested: stop_requested.clone(),
            },
            child,
            stderr,
            kill_rx,
            exit_tx,
        ));

        self.current = Some(RunningProcess {
            run_id,
            pid,
            stop_requested,
            kill_tx: Some(kill_tx),
            exit_rx,
            _monitor: monitor,
        });
        Ok(run_id)
    }

    async fn stop(&mut self) -> RecordingResult<StopOutcome> {
        let Some(mut running) = self.current.take() else {
            return Ok(StopOutcome::NotRunning);
        };

        let exited = *running.exit_rx.borrow();
        if let Some(info) = exited {
            tracing::debug!("Run {} had already exited: {:?}", running.run_id, info);
            return Ok(StopOutcome::Exited(info));
        }

        tracing::info!("Stopping encoder (run {})", running.run_id);
        running.stop_requested.store(true, Ordering::SeqCst);

        let graceful = match running.pid {
            Some(pid) => request_graceful_stop(pid),
            None => Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no pid")),
        };
        if let Err(e) = graceful {
            tracing::warn!("Graceful stop unavailable ({}), killing encoder", e);
        } else if let Ok(Some(info)) =
            tokio::time::timeout(self.stop_timeout, wait_exit(&mut running.exit_rx)).await
        {
            return Ok(StopOutcome::Exited(info));
        } else {
            tracing::warn!(
                "Encoder did not exit within {:?}, killing it",
                self.stop_timeout
            );
        }

        if let Some(kill_tx) = running.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        match tokio::time::timeout(self.kill_timeout, wait_exit(&mut running.exit_rx)).await {
            Ok(Some(info)) => Ok(StopOutcome::Killed(info)),
            _ => Err(RecordingError::StopTimeout(self.stop_timeout + self.kill_timeout)),
        }
    }

    fn is_running(&self) -> bool {
        self.current
            .as_ref()
            .map(|running| running.exit_rx.borrow().is_none())
            .unwrap_or(false)
    }

    fn current_run(&self) -> Option<u64> {
        self.current.as_ref().map(|running| running.run_id)
    }

    async fn run_to_completion(&mut self, command: &EncoderCommand) -> RecordingResult<CompletedRun> {
        tracing::info!("Running: {}", command.command_line());
        let output = Self::spawn_command(command)
            .output()
            .await
            .map_err(|e| RecordingError::FailedToStart(format!("{}: {}", command.program, e)))?;

        Ok(CompletedRun {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(unix)]
fn request_graceful_stop(pid: u32) -> std::io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) has no memory-safety preconditions
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn request_graceful_stop(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "no terminate signal on this platform",
    ))
}

async fn wait_exit(rx: &mut watch::Receiver<Option<ExitInfo>>) -> Option<ExitInfo> {
    rx.wait_for(|exit| exit.is_some()).await.ok().and_then(|exit| *exit)
}

async fn read_chunk(stderr: &mut Option<ChildStderr>, buf: &mut [u8]) -> Option<usize> {
    match stderr {
        Some(stream) => stream.read(buf).await.ok(),
        None => std::future::pending().await,
    }
}

struct MonitorContext {
    run_id: u64,
    output: PathBuf,
    started_at: Instant,
    events: EventSender,
    stop_requested: Arc<AtomicBool>,
}

impl MonitorContext {
    fn emit(&self, event: ProcessEvent) {
        let _ = self.events.send(SupervisorEvent {
            run_id: self.run_id,
            event,
        });
    }
}

async fn monitor(
    ctx: MonitorContext,
    mut child: Child,
    mut stderr: Option<ChildStderr>,
    mut kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ExitInfo>>,
) {
    let mut buf = vec![0u8; 4096];
    let mut fps = None;
    let mut kill_sent = false;

    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            read = read_chunk(&mut stderr, &mut buf) => match read {
                Some(n) if n > 0 => {
                    let chunk = String::from_utf8_lossy(&buf[..n]);
                    if let Some(value) = parse_fps(&chunk) {
                        fps = Some(value);
                    }
                    let size_bytes = tokio::fs::metadata(&ctx.output)
                        .await
                        .map(|m| m.len())
                        .unwrap_or(0);
                    ctx.emit(ProcessEvent::ProgressTick {
                        fps,
                        size_bytes,
                        elapsed: ctx.started_at.elapsed(),
                    });
                }
                _ => stderr = None,
            },
            _ = &mut kill_rx, if !kill_sent => {
                kill_sent = true;
                if let Err(e) = child.start_kill() {
                    tracing::warn!("Failed to kill encoder (run {}): {}", ctx.run_id, e);
                }
            }
        }
    };

    let requested = ctx.stop_requested.load(Ordering::SeqCst);
    let info = match status {
        Ok(status) => ExitInfo::from_status(status, requested),
        Err(e) => {
            tracing::error!("Lost track of encoder (run {}): {}", ctx.run_id, e);
            ExitInfo {
                code: None,
                signal: None,
                requested,
            }
        }
    };
    let _ = exit_tx.send(Some(info));

    if info.is_crash() {
        tracing::error!(
            "Encoder crashed (run {}): code {:?}, signal {:?}",
            ctx.run_id,
            info.code,
            info.signal
        );
        ctx.emit(ProcessEvent::Crashed {
            code: info.code,
            signal: info.signal,
        });
    } else {
        tracing::info!("Encoder exited (run {}): code {:?}", ctx.run_id, info.code);
        ctx.emit(ProcessEvent::Exited { code: info.code });
    }
}
