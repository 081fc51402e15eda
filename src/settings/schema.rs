//! Settings schema
//!
//! Every field has a default so older or hand-edited files keep loading.

use crate::recorder::config::{AudioCodec, AudioMode, CaptureConfig, Container, Rect, RegionKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_PROGRAM: &str = "screencast";

/// Persisted user settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Names the settings directory, temp directory and mix sink
    pub program: String,

    /// Encoder binary
    pub encoder: String,

    /// X display to capture
    pub display: String,

    /// Where finished recordings go
    pub output_dir: PathBuf,

    /// File name prefix of finished recordings
    pub name_prefix: String,

    pub framerate: u32,
    pub video_codec: String,
    pub audio_codec: AudioCodec,
    pub container: Container,
    pub show_cursor: bool,

    /// Pre-roll delay before capture, 0 to skip
    pub countdown_secs: u32,

    /// Graceful stop wait before the encoder is killed
    pub stop_timeout_ms: u64,
    pub kill_timeout_ms: u64,

    /// Window position check interval
    pub window_poll_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            encoder: "ffmpeg".to_string(),
            display: default_display(),
            output_dir: default_output_dir(),
            name_prefix: DEFAULT_PROGRAM.to_string(),
            framerate: 25,
            video_codec: "libx264".to_string(),
            audio_codec: AudioCodec::default(),
            container: Container::Mkv,
            show_cursor: true,
            countdown_secs: 0,
            stop_timeout_ms: 5000,
            kill_timeout_ms: 2000,
            window_poll_ms: 120,
        }
    }
}

impl Settings {
    /// Name of the null sink used to mix several PulseAudio sources
    pub fn mix_sink_name(&self) -> String {
        format!("{}Mix", self.program)
    }

    /// Capture configuration for a region and audio selection, with the
    /// remaining choices taken from the settings
    pub fn capture_config(&self, region: RegionKind, audio: AudioMode) -> CaptureConfig {
        let geometry = match &region {
            RegionKind::Area { rect } => *rect,
            _ => Rect::default(),
        };
        CaptureConfig {
            region,
            geometry,
            framerate: self.framerate,
            video_codec: self.video_codec.clone(),
            audio_codec: self.audio_codec.clone(),
            container: self.container,
            audio,
            show_cursor: self.show_cursor,
            name_prefix: self.name_prefix.clone(),
        }
    }
}

fn default_display() -> String {
    std::env::var("DISPLAY")
        .ok()
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| ":0.0".to_string())
}

fn default_output_dir() -> PathBuf {
    dirs::video_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::config::ScreenSelection;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.program, "screencast");
        assert_eq!(settings.encoder, "ffmpeg");
        assert_eq!(settings.framerate, 25);
        assert_eq!(settings.video_codec, "libx264");
        assert_eq!(settings.container, Container::Mkv);
        assert_eq!(settings.mix_sink_name(), "screencastMix");
        assert!(!settings.display.is_empty());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"framerate": 30, "container": "gif"}"#).unwrap();
        assert_eq!(settings.framerate, 30);
        assert_eq!(settings.container, Container::Gif);
        assert_eq!(settings.stop_timeout_ms, 5000);
    }

    #[test]
    fn test_capture_config_from_settings() {
        let settings = Settings::default();
        let config = settings.capture_config(
            RegionKind::Fullscreen {
                screen: ScreenSelection::All,
            },
            AudioMode::Off,
        );
        assert_eq!(config.framerate, 25);
        assert_eq!(config.name_prefix, "screencast");

        let rect = Rect::new(10, 10, 320, 240);
        let area = settings.capture_config(RegionKind::Area { rect }, AudioMode::Off);
        assert_eq!(area.geometry, rect);
    }
}
