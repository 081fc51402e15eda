//! Recording session controller
//!
//! Turns record/pause/resume/stop into a correctly sequenced set of encoder
//! runs. Pause is implemented by stopping the encoder and starting a fresh
//! segment on resume; stop stitches the segments together. Encoder lifecycle
//! events arrive through [`SessionController::on_process_event`].

use super::alsa::AlsaBusyCheck;
use super::audio_route::{AudioRouteManager, AudioSource};
use super::command::{CommandBuilder, EncoderCommand};
use super::config::{CaptureConfig, Rect};
use super::crash::CrashArchive;
use super::diagnostics::{encoder_version, remove_report_logs, DiagnosticLog};
use super::error::{CrashNotice, RecordingError, RecordingResult};
use super::geometry::{resolve_region, GeometryProvider};
use super::segments::{final_file_name, Finalized, SegmentManager};
use super::state::{RecordingOutput, Session, SessionState, SessionStatus};
use super::supervisor::{EncoderProcess, ProcessEvent, StopOutcome, SupervisorEvent};
use chrono::Local;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Settings-dir fallback for segments that could not be saved
pub const RESCUE_DIR: &str = "rescued";

/// Events emitted during a recording session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// Seconds left before capture starts
    Countdown(u32),
    SegmentStarted { index: usize, path: PathBuf },
    /// Status refreshed from a progress tick
    Progress(SessionStatus),
    /// The captured window moved
    WindowMoved(Rect),
    Crashed(CrashNotice),
    Finished(RecordingOutput),
    Error(String),
}

/// Where the controller keeps its files and how it names things
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Program name, used for the diagnostic log
    pub program: String,
    pub version: String,
    pub builder: CommandBuilder,
    /// Encoder working directory; also holds the logs and `crashed/`
    pub settings_dir: PathBuf,
    pub settings_file: Option<PathBuf>,
    pub temp_dir: PathBuf,
    pub output_dir: PathBuf,
    pub countdown_secs: u32,
}

/// External collaborators of the controller
pub struct ControllerDeps {
    pub encoder: Box<dyn EncoderProcess>,
    pub audio: AudioRouteManager,
    pub alsa: Box<dyn AlsaBusyCheck>,
    pub geometry: Arc<dyn GeometryProvider>,
}

/// The single owner of the recording session
pub struct SessionController {
    /// Current state
    state: Arc<RwLock<SessionState>>,

    /// Snapshot published for status displays
    status: Arc<RwLock<SessionStatus>>,

    /// The active session, if any
    session: Option<Session>,

    segments: SegmentManager,
    encoder: Box<dyn EncoderProcess>,
    audio: AudioRouteManager,
    alsa: Box<dyn AlsaBusyCheck>,
    geometry: Arc<dyn GeometryProvider>,
    crash: CrashArchive,
    options: ControllerOptions,

    /// Window position seen on the last check, waiting to settle
    window_pending: Option<(i32, i32)>,

    /// Event broadcaster
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    pub fn new(options: ControllerOptions, deps: ControllerDeps) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let mut crash = CrashArchive::new(&options.settings_dir, &options.program, options.builder.program());
        if let Some(settings_file) = &options.settings_file {
            crash = crash.with_settings_file(settings_file);
        }
        Self {
            state: Arc::new(RwLock::new(SessionState::Idle)),
            status: Arc::new(RwLock::new(SessionStatus::new(SessionState::Idle, None))),
            session: None,
            segments: SegmentManager::new(&options.temp_dir),
            encoder: deps.encoder,
            audio: deps.audio,
            alsa: deps.alsa,
            geometry: deps.geometry,
            crash,
            options,
            window_pending: None,
            event_tx,
        }
    }

    /// Get the current state
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Shared handle to the status snapshot, readable while the controller
    /// is busy
    pub fn status_handle(&self) -> Arc<RwLock<SessionStatus>> {
        self.status.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.read().clone()
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    fn refresh_status(&self) -> SessionStatus {
        let status = SessionStatus::new(self.state(), self.session.as_ref());
        *self.status.write() = status.clone();
        status
    }

    fn set_state(&self, state: SessionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            tracing::debug!("Session state: {} -> {}", previous, state);
        }
        self.refresh_status();
        self.emit(SessionEvent::StateChanged(state));
    }

    fn invalid(&self, action: &'static str) -> RecordingError {
        RecordingError::InvalidState {
            action,
            state: self.state().to_string(),
        }
    }

    fn check_alsa(&self, config: &CaptureConfig) -> RecordingResult<()> {
        if let Some(device) = config.effective_audio().alsa_device() {
            if self.alsa.is_busy(device) {
                return Err(RecordingError::DeviceBusy {
                    hw: device.hw.clone(),
                    name: device.name.clone(),
                });
            }
        }
        Ok(())
    }

    async fn countdown(&self) {
        self.set_state(SessionState::CountingDown);
        for remaining in (1..=self.options.countdown_secs).rev() {
            self.emit(SessionEvent::Countdown(remaining));
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Spawn the encoder for a fresh segment and enter Recording
    async fn start_segment(&mut self) -> RecordingResult<(EncoderCommand, AudioSource)> {
        let session = self.session.as_mut().ok_or(RecordingError::NotRecording)?;
        let path = self.segments.next_segment(session.config.container)?;
        let audio = self.audio.resolve(session.config.effective_audio()).await;
        let command = self.options.builder.record(&mut session.config, &audio, &path);

        match self.encoder.start(&command, &path).await {
            Ok(run_id) => session.begin_interval(run_id),
            Err(e) => {
                self.segments.abandon_last();
                self.audio.teardown().await;
                return Err(e);
            }
        }

        let index = session.intervals.len() - 1;
        self.set_state(SessionState::Recording);
        self.emit(SessionEvent::SegmentStarted { index, path });
        Ok((command, audio))
    }

    async fn write_diagnostics(&mut self, command: &EncoderCommand, audio: &AudioSource) {
        let Some(resolution) = self.session.as_ref().map(|s| s.config.geometry.size_arg()) else {
            return;
        };
        let log = DiagnosticLog {
            program: self.options.program.clone(),
            version: self.options.version.clone(),
            resolution,
            audio: audio.describe(),
            encoder: self.options.builder.program().to_string(),
            encoder_version: encoder_version(self.encoder.as_mut(), &self.options.builder).await,
            record_command: command.command_line(),
        };
        if let Err(e) = log.write(&self.options.settings_dir) {
            tracing::warn!("Could not write diagnostic log: {}", e);
        }
    }

    /// Start a new recording
    pub async fn record(&mut self, config: CaptureConfig) -> RecordingResult<()> {
        let current_state = self.state();
        if current_state != SessionState::Idle {
            return Err(RecordingError::AlreadyRecording);
        }

        tracing::info!("Recording {} at {} fps", config.region.label(), config.framerate);

        self.audio.teardown().await;
        self.check_alsa(&config)?;

        std::fs::create_dir_all(&self.options.settings_dir)?;
        if let Err(e) = remove_report_logs(&self.options.settings_dir, self.options.builder.program()) {
            tracing::warn!("Could not remove old encoder reports: {}", e);
        }
        self.segments.purge()?;

        self.countdown().await;

        let (geometry, window_id) = match resolve_region(self.geometry.as_ref(), &config.region).await {
            Ok(resolved) => resolved,
            Err(e) => {
                self.set_state(SessionState::Idle);
                return Err(e);
            }
        };
        let mut config = config;
        config.geometry = geometry;

        let file_name = final_file_name(&config.name_prefix, config.container, Local::now());
        let final_path = self.options.output_dir.join(file_name);
        self.session = Some(Session::new(config, final_path, window_id));
        self.window_pending = None;

        match self.start_segment().await {
            Ok((command, audio)) => {
                self.write_diagnostics(&command, &audio).await;
                tracing::info!("Recording started");
                Ok(())
            }
            Err(e) => {
                tracing::error!("Could not start recording: {}", e);
                self.session = None;
                self.set_state(SessionState::Idle);
                Err(e)
            }
        }
    }

    /// Pause recording
    pub async fn pause(&mut self) -> RecordingResult<()> {
        if self.state() != SessionState::Recording {
            return Err(self.invalid("pause"));
        }
        if self.session.as_ref().map(|s| s.config.is_gif()).unwrap_or(false) {
            return Err(RecordingError::ConfigurationError(
                "GIF recordings cannot be paused".to_string(),
            ));
        }

        tracing::info!("Pausing recording");

        self.stop_encoder().await?;
        self.end_interval();
        self.audio.teardown().await;
        self.set_state(SessionState::Paused);
        Ok(())
    }

    /// Resume recording into a new segment
    pub async fn resume(&mut self) -> RecordingResult<()> {
        if self.state() != SessionState::Paused {
            return Err(self.invalid("resume"));
        }
        let session = self.session.as_ref().ok_or(RecordingError::NotRecording)?;
        self.check_alsa(&session.config)?;

        tracing::info!("Resuming recording");

        self.countdown().await;
        self.follow_window().await;

        if let Err(e) = self.start_segment().await {
            tracing::error!("Could not resume recording: {}", e);
            self.set_state(SessionState::Paused);
            return Err(e);
        }
        Ok(())
    }

    /// Stop recording and produce the final file
    pub async fn stop(&mut self) -> RecordingResult<RecordingOutput> {
        let current_state = self.state();
        if !matches!(current_state, SessionState::Recording | SessionState::Paused) {
            return Err(self.invalid("stop"));
        }

        tracing::info!("Stopping recording");
        self.set_state(SessionState::Stopping);

        self.stop_encoder().await?;
        self.end_interval();
        self.audio.teardown().await;

        let Some(session) = self.session.take() else {
            self.set_state(SessionState::Idle);
            return Err(RecordingError::NotRecording);
        };

        let result = self
            .segments
            .finalize(self.encoder.as_mut(), &self.options.builder, &session.final_path)
            .await;

        let result = match result {
            Ok(finalized) => {
                self.segments.remove_temp_dir();
                let output = RecordingOutput {
                    session_id: session.id,
                    path: finalized.path().to_path_buf(),
                    segment_count: session.intervals.len(),
                    merged: matches!(finalized, Finalized::Merged { .. }),
                    total_duration_ms: session.intervals.iter().map(|i| i.duration_ms).sum(),
                    intervals: session.intervals,
                };
                tracing::info!(
                    "Recording saved to {} ({} segments, {:.0}ms)",
                    output.path.display(),
                    output.segment_count,
                    output.total_duration_ms
                );
                self.emit(SessionEvent::Finished(output.clone()));
                Ok(output)
            }
            Err(RecordingError::MergeFailed {
                reason,
                segments,
                manifest,
            }) => {
                let (segments, manifest) = match self.rescue_segments(&session.final_path, &segments, Some(&manifest)) {
                    Some((moved, Some(moved_manifest))) => (moved, moved_manifest),
                    _ => (segments, manifest),
                };
                let error = RecordingError::MergeFailed {
                    reason,
                    segments,
                    manifest,
                };
                self.emit(SessionEvent::Error(error.to_string()));
                Err(error)
            }
            Err(RecordingError::SaveFailed { reason, segments }) => {
                tracing::error!("Could not save {}: {}", session.final_path.display(), reason);
                let segments = match self.rescue_segments(&session.final_path, &segments, None) {
                    Some((moved, _)) => moved,
                    None => segments,
                };
                let error = RecordingError::SaveFailed { reason, segments };
                self.emit(SessionEvent::Error(error.to_string()));
                Err(error)
            }
            Err(e) => {
                tracing::error!("Could not finish recording: {}", e);
                self.segments.release();
                self.emit(SessionEvent::Error(e.to_string()));
                Err(e)
            }
        };

        self.set_state(SessionState::Idle);
        result
    }

    /// Stop the running capture. A crash, or a capture that would not go
    /// away, runs crash recovery and is returned as the error.
    async fn stop_encoder(&mut self) -> RecordingResult<()> {
        match self.encoder.stop().await {
            Ok(outcome) if outcome.crashed().is_some() => Err(self.recover_from_crash().await),
            Ok(outcome) => {
                if let StopOutcome::Killed(info) = outcome {
                    tracing::warn!("Encoder had to be killed: {:?}", info);
                }
                Ok(())
            }
            Err(e) => {
                tracing::error!("Encoder could not be stopped: {}", e);
                self.recover_from_crash().await;
                Err(e)
            }
        }
    }

    /// Move segments that could not become a final file next to the
    /// intended output, or under the settings directory when that fails
    fn rescue_segments(
        &mut self,
        final_path: &Path,
        segments: &[PathBuf],
        manifest: Option<&Path>,
    ) -> Option<(Vec<PathBuf>, Option<PathBuf>)> {
        let stem = final_path
            .file_stem()
            .map(|s| s.to_os_string())
            .unwrap_or_else(|| "recording".into());
        let targets = [
            final_path.with_extension("segments"),
            self.options.settings_dir.join(RESCUE_DIR).join(stem),
        ];
        for dest in &targets {
            match self.segments.rescue(segments, manifest, dest) {
                Ok(moved) => return Some(moved),
                Err(e) => tracing::warn!("Could not move segments to {}: {}", dest.display(), e),
            }
        }
        tracing::error!("Segments stay in {}", self.segments.temp_dir().display());
        self.segments.release();
        None
    }

    fn end_interval(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.end_interval();
        }
        self.segments.refresh_sizes();
    }

    /// Archive diagnostics, drop the session and return to Idle.
    /// Captured segments stay in the temp directory.
    async fn recover_from_crash(&mut self) -> RecordingError {
        self.set_state(SessionState::Crashed);
        self.audio.teardown().await;

        let notice = match self.crash.archive() {
            Ok(notice) => notice,
            Err(e) => {
                tracing::error!("Could not archive crash artifacts: {}", e);
                self.crash.unarchived_notice()
            }
        };

        if let Some(mut session) = self.session.take() {
            session.crashed = true;
            tracing::info!(
                "Keeping {} segments of session {} in {}",
                self.segments.segments().len(),
                session.id,
                self.segments.temp_dir().display()
            );
        }
        self.segments.release();

        self.emit(SessionEvent::Crashed(notice.clone()));
        self.set_state(SessionState::Idle);
        RecordingError::Crashed(notice)
    }

    /// Apply one event from the process supervisor.
    ///
    /// Events of runs other than the active one are ignored. A crash is
    /// returned as an error after recovery has run.
    pub async fn on_process_event(&mut self, event: SupervisorEvent) -> RecordingResult<()> {
        let active = self.session.as_ref().and_then(|s| s.active_run);
        if active != Some(event.run_id) {
            tracing::trace!("Ignoring event of run {}: {:?}", event.run_id, event.event);
            return Ok(());
        }

        match event.event {
            ProcessEvent::Started { pid } => {
                tracing::debug!("Encoder run {} has pid {:?}", event.run_id, pid);
            }
            ProcessEvent::ProgressTick {
                fps,
                size_bytes,
                elapsed,
            } => {
                if let Some(session) = self.session.as_mut() {
                    session.update_progress(fps, size_bytes, elapsed);
                }
                let status = self.refresh_status();
                self.emit(SessionEvent::Progress(status));
            }
            ProcessEvent::Exited { code } => {
                tracing::warn!("Encoder exited on its own with {:?}, pausing", code);
                self.stop_encoder().await?;
                self.end_interval();
                self.audio.teardown().await;
                self.set_state(SessionState::Paused);
            }
            ProcessEvent::Crashed { code, signal } => {
                tracing::error!("Encoder crashed: code {:?}, signal {:?}", code, signal);
                let _ = self.encoder.stop().await;
                return Err(self.recover_from_crash().await);
            }
            ProcessEvent::FailedToStart { message } => {
                tracing::error!("Encoder failed to start: {}", message);
            }
        }
        Ok(())
    }

    /// Re-read the captured window's position before a new segment
    async fn follow_window(&mut self) {
        let Some(id) = self.session.as_ref().and_then(|s| s.window_id) else {
            return;
        };
        match self.geometry.window_geometry(id).await {
            Ok(rect) => {
                if let Some(moved) = self.apply_window_offset(rect) {
                    tracing::info!("Window {:#x} moved to {},{}", id, moved.x, moved.y);
                }
            }
            Err(e) => tracing::warn!("Could not re-query window {:#x}: {}", id, e),
        }
    }

    /// Adopt a new window position; size stays fixed so segments remain
    /// concat compatible
    fn apply_window_offset(&mut self, rect: Rect) -> Option<Rect> {
        let session = self.session.as_mut()?;
        let geometry = &mut session.config.geometry;
        if (geometry.x, geometry.y) == (rect.x, rect.y) {
            return None;
        }
        geometry.x = rect.x;
        geometry.y = rect.y;
        let moved = *geometry;
        self.emit(SessionEvent::WindowMoved(moved));
        Some(moved)
    }

    /// Periodic window check while recording a window.
    ///
    /// x11grab cannot move its capture area, so once the window has stayed
    /// at a new position for two consecutive checks the capture rolls over
    /// into a new segment there. Returns the new geometry after a roll.
    /// GIF captures cannot be split and keep their area.
    pub async fn track_window(&mut self) -> RecordingResult<Option<Rect>> {
        if self.state() != SessionState::Recording {
            self.window_pending = None;
            return Ok(None);
        }
        let Some(session) = self.session.as_ref() else {
            return Ok(None);
        };
        let Some(id) = session.window_id else {
            return Ok(None);
        };
        if session.config.is_gif() {
            return Ok(None);
        }
        let current = session.config.geometry;

        let rect = self.geometry.window_geometry(id).await?;
        let position = (rect.x, rect.y);
        if position == (current.x, current.y) {
            self.window_pending = None;
            return Ok(None);
        }
        if self.window_pending != Some(position) {
            self.window_pending = Some(position);
            return Ok(None);
        }
        self.window_pending = None;

        tracing::info!("Window {:#x} settled at {},{}, starting a new segment", id, rect.x, rect.y);
        self.stop_encoder().await?;
        self.end_interval();
        self.audio.teardown().await;
        let moved = self.apply_window_offset(rect);
        if let Err(e) = self.start_segment().await {
            tracing::error!("Could not continue at the new window position: {}", e);
            self.set_state(SessionState::Paused);
            return Err(e);
        }
        Ok(moved)
    }

    /// Whether the window tracker has anything to do
    pub fn tracks_window(&self) -> bool {
        self.session.as_ref().and_then(|s| s.window_id).is_some()
    }
}
