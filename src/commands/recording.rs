//! Recording commands for front ends
//!
//! [`RecorderState`] owns the session controller behind one async mutex and
//! funnels everything that mutates the session through it: user commands,
//! process supervisor events and the window-tracking timer.

use crate::recorder::alsa::ProcAsound;
use crate::recorder::audio_route::{AudioRouteManager, Pactl};
use crate::recorder::command::CommandBuilder;
use crate::recorder::config::CaptureConfig;
use crate::recorder::coordinator::{ControllerDeps, ControllerOptions, SessionController, SessionEvent};
use crate::recorder::segments::latest_recording;
use crate::recorder::state::{RecordingOutput, SessionStatus};
use crate::recorder::supervisor::{EventReceiver, ProcessSupervisor};
use crate::recorder::x11::X11Geometry;
use crate::settings::{Settings, SettingsPaths};
use crate::utils::error::{AppError, ErrorResponse};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

/// Application state for recording
pub struct RecorderState {
    pub controller: Arc<Mutex<SessionController>>,
    status: Arc<RwLock<SessionStatus>>,
    tasks: Vec<JoinHandle<()>>,
}

impl RecorderState {
    /// Wrap a controller and start pumping supervisor events and window
    /// checks into it. Must be called inside a tokio runtime.
    pub fn new(controller: SessionController, events: EventReceiver, window_poll: Duration) -> Self {
        let status = controller.status_handle();
        let controller = Arc::new(Mutex::new(controller));
        let tasks = vec![
            tokio::spawn(pump_events(controller.clone(), events)),
            tokio::spawn(track_window(controller.clone(), window_poll)),
        ];
        Self {
            controller,
            status,
            tasks,
        }
    }

    /// Production wiring: ffmpeg supervisor, pactl, /proc/asound and X11
    pub fn from_settings(settings: &Settings, paths: &SettingsPaths) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let supervisor = ProcessSupervisor::new(
            tx,
            Duration::from_millis(settings.stop_timeout_ms),
            Duration::from_millis(settings.kill_timeout_ms),
        );
        let options = ControllerOptions {
            program: settings.program.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            builder: CommandBuilder::new(&settings.encoder, &settings.display)
                .with_working_dir(&paths.settings_dir),
            settings_dir: paths.settings_dir.clone(),
            settings_file: Some(paths.settings_file.clone()),
            temp_dir: paths.temp_dir.clone(),
            output_dir: settings.output_dir.clone(),
            countdown_secs: settings.countdown_secs,
        };
        let deps = ControllerDeps {
            encoder: Box::new(supervisor),
            audio: AudioRouteManager::new(Box::new(Pactl::new()), settings.mix_sink_name()),
            alsa: Box::new(ProcAsound::new()),
            geometry: Arc::new(X11Geometry::new(&settings.display)),
        };
        Self::new(
            SessionController::new(options, deps),
            rx,
            Duration::from_millis(settings.window_poll_ms),
        )
    }

    /// Subscribe to session events
    pub async fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.controller.lock().await.subscribe()
    }

    /// Latest status, without waiting for a running command
    pub fn status(&self) -> SessionStatus {
        self.status.read().clone()
    }
}

impl Drop for RecorderState {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn pump_events(controller: Arc<Mutex<SessionController>>, mut events: EventReceiver) {
    while let Some(event) = events.recv().await {
        let mut controller = controller.lock().await;
        if let Err(e) = controller.on_process_event(event).await {
            tracing::error!("Recording ended: {}", e);
        }
    }
    tracing::debug!("Supervisor event channel closed");
}

async fn track_window(controller: Arc<Mutex<SessionController>>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let mut controller = controller.lock().await;
        if !controller.tracks_window() {
            continue;
        }
        if let Err(e) = controller.track_window().await {
            tracing::debug!("Window check failed: {}", e);
        }
    }
}

fn respond(error: impl Into<AppError>) -> ErrorResponse {
    ErrorResponse::from(error.into())
}

/// Start recording
pub async fn start_recording(state: &RecorderState, config: CaptureConfig) -> Result<(), ErrorResponse> {
    let mut controller = state.controller.lock().await;
    controller.record(config).await.map_err(respond)
}

/// Stop recording
pub async fn stop_recording(state: &RecorderState) -> Result<RecordingOutput, ErrorResponse> {
    let mut controller = state.controller.lock().await;
    controller.stop().await.map_err(respond)
}

/// Pause recording
pub async fn pause_recording(state: &RecorderState) -> Result<(), ErrorResponse> {
    let mut controller = state.controller.lock().await;
    controller.pause().await.map_err(respond)
}

/// Resume recording
pub async fn resume_recording(state: &RecorderState) -> Result<(), ErrorResponse> {
    let mut controller = state.controller.lock().await;
    controller.resume().await.map_err(respond)
}

/// Get current recording status
pub fn get_recording_status(state: &RecorderState) -> SessionStatus {
    state.status()
}

/// Newest finished recording in the output directory
pub fn get_last_recording(settings: &Settings) -> Option<PathBuf> {
    latest_recording(&settings.output_dir, &settings.name_prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::config::{AudioMode, Rect, RegionKind};
    use crate::recorder::state::SessionState;
    use crate::recorder::supervisor::SupervisorEvent;
    use crate::recorder::testing::{FakeAlsa, FakeAudioServer, FakeEncoder, FakeGeometry};
    use tempfile::{tempdir, TempDir};
    use tokio::time::timeout;

    struct Fixture {
        _dir: TempDir,
        encoder: FakeEncoder,
        geometry: FakeGeometry,
        tx: mpsc::UnboundedSender<SupervisorEvent>,
        state: RecorderState,
        settings: Settings,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let settings = Settings {
            output_dir: dir.path().join("videos"),
            ..Settings::default()
        };
        let paths = SettingsPaths::new(&dir.path().join("settings"), dir.path(), &settings.program);
        let encoder = FakeEncoder::default();
        let geometry = FakeGeometry::default();
        let options = ControllerOptions {
            program: settings.program.clone(),
            version: "0.1.0".to_string(),
            builder: CommandBuilder::new("ffmpeg", ":0.0").with_working_dir(&paths.settings_dir),
            settings_dir: paths.settings_dir.clone(),
            settings_file: Some(paths.settings_file.clone()),
            temp_dir: paths.temp_dir.clone(),
            output_dir: settings.output_dir.clone(),
            countdown_secs: 0,
        };
        let controller = SessionController::new(
            options,
            ControllerDeps {
                encoder: Box::new(encoder.clone()),
                audio: AudioRouteManager::new(Box::new(FakeAudioServer::default()), settings.mix_sink_name()),
                alsa: Box::new(FakeAlsa::default()),
                geometry: Arc::new(geometry.clone()),
            },
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let state = RecorderState::new(controller, rx, Duration::from_millis(10));
        Fixture {
            _dir: dir,
            encoder,
            geometry,
            tx,
            state,
            settings,
        }
    }

    async fn wait_for(
        events: &mut broadcast::Receiver<SessionEvent>,
        pred: impl Fn(&SessionEvent) -> bool,
    ) -> SessionEvent {
        loop {
            let event = timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for session event")
                .expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_full_cycle_through_commands() {
        let f = fixture();
        let config = f.settings.capture_config(
            RegionKind::Fullscreen {
                screen: crate::recorder::config::ScreenSelection::All,
            },
            AudioMode::Off,
        );
        start_recording(&f.state, config).await.unwrap();
        assert_eq!(get_recording_status(&f.state).state, SessionState::Recording);

        pause_recording(&f.state).await.unwrap();
        resume_recording(&f.state).await.unwrap();
        let output = stop_recording(&f.state).await.unwrap();

        assert_eq!(output.segment_count, 2);
        assert_eq!(get_last_recording(&f.settings), Some(output.path));
        assert_eq!(get_recording_status(&f.state).state, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_errors_carry_codes() {
        let f = fixture();
        let err = pause_recording(&f.state).await.unwrap_err();
        assert_eq!(err.code, "INVALID_STATE");
    }

    #[tokio::test]
    async fn test_supervisor_crash_is_pumped() {
        let f = fixture();
        let mut events = f.state.subscribe().await;
        let config = f.settings.capture_config(
            RegionKind::Area {
                rect: Rect::new(0, 0, 640, 480),
            },
            AudioMode::Off,
        );
        start_recording(&f.state, config).await.unwrap();

        f.tx.send(f.encoder.crash()).unwrap();

        wait_for(&mut events, |e| matches!(e, SessionEvent::Crashed(_))).await;
        wait_for(&mut events, |e| matches!(e, SessionEvent::StateChanged(SessionState::Idle))).await;
        assert_eq!(f.state.status().state, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_window_is_tracked_while_recording() {
        let f = fixture();
        f.geometry.set_window(7, Rect::new(0, 0, 400, 300));
        let mut events = f.state.subscribe().await;
        let config = f.settings.capture_config(RegionKind::Window { id: None }, AudioMode::Off);
        start_recording(&f.state, config).await.unwrap();

        f.geometry.move_window(7, 40, 30);

        let event = wait_for(&mut events, |e| matches!(e, SessionEvent::WindowMoved(_))).await;
        match event {
            SessionEvent::WindowMoved(rect) => assert_eq!(rect, Rect::new(40, 30, 400, 300)),
            other => panic!("unexpected {:?}", other),
        }
        wait_for(&mut events, |e| matches!(e, SessionEvent::SegmentStarted { index: 1, .. })).await;
        assert_eq!(f.encoder.started().len(), 2);
        assert_eq!(f.state.status().state, SessionState::Recording);
    }
}
