//! Recording state management
//!
//! Defines the session state machine states and the session aggregate.

use super::config::CaptureConfig;
use super::controls::{controls, Controls};
use super::progress::format_elapsed;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Current state of the recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// No recording in progress
    #[default]
    Idle,
    /// Pre-roll delay before capture starts
    CountingDown,
    Recording,
    Paused,
    /// Stopping the encoder and producing the final file
    Stopping,
    /// Recovering from an encoder crash
    Crashed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::CountingDown => "counting down",
            SessionState::Recording => "recording",
            SessionState::Paused => "paused",
            SessionState::Stopping => "stopping",
            SessionState::Crashed => "crashed",
        };
        f.write_str(name)
    }
}

/// One contiguous recording interval
///
/// A new interval is started each time recording is resumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingInterval {
    /// Interval index (0, 1, 2, ...)
    pub index: usize,

    /// Duration of this interval in milliseconds
    pub duration_ms: f64,

    /// Unix timestamp when the interval started
    pub unix_start_ms: u64,

    /// Unix timestamp when the interval ended
    pub unix_end_ms: u64,
}

impl RecordingInterval {
    /// Create a new interval starting now
    pub fn new(index: usize) -> Self {
        let now = Utc::now().timestamp_millis() as u64;
        Self {
            index,
            duration_ms: 0.0,
            unix_start_ms: now,
            unix_end_ms: now,
        }
    }

    /// End the interval
    pub fn end(&mut self, duration: Duration) {
        self.duration_ms = duration.as_secs_f64() * 1000.0;
        self.unix_end_ms = Utc::now().timestamp_millis() as u64;
    }
}

/// The aggregate for one recording, from the first Record to Stop or crash
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub config: CaptureConfig,
    /// Destination of the finished recording
    pub final_path: PathBuf,
    /// Window being captured, once resolved
    pub window_id: Option<u64>,
    pub intervals: Vec<RecordingInterval>,
    /// Run id of the encoder writing the active segment
    pub active_run: Option<u64>,
    pub fps: Option<f32>,
    pub crashed: bool,
    segment_bytes: u64,
    finished_bytes: u64,
    anchor: Option<Instant>,
    interval_elapsed: Duration,
    accumulated: Duration,
}

impl Session {
    pub fn new(config: CaptureConfig, final_path: PathBuf, window_id: Option<u64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            final_path,
            window_id,
            intervals: Vec::new(),
            active_run: None,
            fps: None,
            crashed: false,
            segment_bytes: 0,
            finished_bytes: 0,
            anchor: None,
            interval_elapsed: Duration::ZERO,
            accumulated: Duration::ZERO,
        }
    }

    pub fn begin_interval(&mut self, run_id: u64) {
        self.intervals.push(RecordingInterval::new(self.intervals.len()));
        self.active_run = Some(run_id);
        self.anchor = Some(Instant::now());
        self.interval_elapsed = Duration::ZERO;
        self.segment_bytes = 0;
        self.fps = None;
    }

    pub fn end_interval(&mut self) {
        let Some(anchor) = self.anchor.take() else {
            return;
        };
        let duration = anchor.elapsed();
        self.accumulated += duration;
        self.interval_elapsed = Duration::ZERO;
        if let Some(interval) = self.intervals.last_mut() {
            interval.end(duration);
        }
        self.finished_bytes += self.segment_bytes;
        self.segment_bytes = 0;
        self.active_run = None;
    }

    /// Apply one progress tick of the active segment
    pub fn update_progress(&mut self, fps: Option<f32>, segment_bytes: u64, elapsed: Duration) {
        if fps.is_some() {
            self.fps = fps;
        }
        self.segment_bytes = segment_bytes;
        self.interval_elapsed = elapsed;
    }

    /// Elapsed time as of the last progress tick, over all intervals
    pub fn elapsed(&self) -> Duration {
        self.accumulated + self.interval_elapsed
    }

    /// Wall-clock recording time including the running interval
    pub fn recorded_time(&self) -> Duration {
        self.accumulated + self.anchor.map(|a| a.elapsed()).unwrap_or_default()
    }

    pub fn size_bytes(&self) -> u64 {
        self.finished_bytes + self.segment_bytes
    }
}

/// Snapshot of the session for status displays
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub state: SessionState,
    pub session_id: Option<Uuid>,
    pub elapsed_ms: u64,
    /// `hh:mm:ss`
    pub elapsed_text: String,
    pub fps: Option<f32>,
    pub size_kib: u64,
    pub region: Option<String>,
    pub segment_count: usize,
    pub controls: Controls,
}

impl SessionStatus {
    pub fn new(state: SessionState, session: Option<&Session>) -> Self {
        let Some(session) = session else {
            return Self {
                state,
                elapsed_text: format_elapsed(Duration::ZERO),
                controls: controls(state, &super::config::AudioMode::Off, false),
                ..Self::default()
            };
        };
        let elapsed = session.elapsed();
        Self {
            state,
            session_id: Some(session.id),
            elapsed_ms: elapsed.as_millis() as u64,
            elapsed_text: format_elapsed(elapsed),
            fps: session.fps,
            size_kib: session.size_bytes() / 1024,
            region: Some(session.config.region.label()),
            segment_count: session.intervals.len(),
            controls: controls(state, session.config.effective_audio(), session.config.is_gif()),
        }
    }
}

/// Result of a completed recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOutput {
    pub session_id: Uuid,

    /// Path of the final video file
    pub path: PathBuf,

    /// Number of segments that went into the file
    pub segment_count: usize,

    /// Whether a concat merge was needed
    pub merged: bool,

    /// Total duration in milliseconds
    pub total_duration_ms: f64,

    pub intervals: Vec<RecordingInterval>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::config::{AudioCodec, AudioMode, Container, Rect, RegionKind, ScreenSelection};

    fn session() -> Session {
        let config = CaptureConfig {
            region: RegionKind::Fullscreen {
                screen: ScreenSelection::All,
            },
            geometry: Rect::new(0, 0, 1920, 1080),
            framerate: 25,
            video_codec: "libx264".to_string(),
            audio_codec: AudioCodec::default(),
            container: Container::Mkv,
            audio: AudioMode::Off,
            show_cursor: true,
            name_prefix: "screencast".to_string(),
        };
        Session::new(config, PathBuf::from("/tmp/out.mkv"), None)
    }

    #[test]
    fn test_elapsed_accumulates_across_intervals() {
        let mut s = session();
        s.begin_interval(1);
        s.update_progress(Some(25.0), 2048, Duration::from_secs(3));
        assert_eq!(s.elapsed(), Duration::from_secs(3));
        s.end_interval();
        let first = s.recorded_time();

        s.begin_interval(2);
        assert_eq!(s.fps, None);
        s.update_progress(None, 1024, Duration::from_secs(2));
        assert_eq!(s.elapsed(), first + Duration::from_secs(2));
        assert_eq!(s.size_bytes(), 3072);
        assert_eq!(s.intervals.len(), 2);
        assert_eq!(s.active_run, Some(2));
    }

    #[test]
    fn test_end_interval_twice_is_harmless() {
        let mut s = session();
        s.begin_interval(1);
        s.end_interval();
        s.end_interval();
        assert_eq!(s.active_run, None);
        assert_eq!(s.intervals.len(), 1);
    }

    #[test]
    fn test_status_snapshot() {
        let mut s = session();
        s.begin_interval(1);
        s.update_progress(Some(24.5), 10 * 1024, Duration::from_secs(61));
        let status = SessionStatus::new(SessionState::Recording, Some(&s));
        assert_eq!(status.elapsed_text, "00:01:01");
        assert_eq!(status.size_kib, 10);
        assert_eq!(status.fps, Some(24.5));
        assert!(status.controls.pause);

        let idle = SessionStatus::new(SessionState::Idle, None);
        assert_eq!(idle.elapsed_text, "00:00:00");
        assert!(idle.controls.record);
    }

    #[test]
    fn test_state_serializes_camel_case() {
        assert_eq!(
            serde_json::to_string(&SessionState::CountingDown).unwrap(),
            "\"countingDown\""
        );
    }
}
