//! Capture configuration
//!
//! A `CaptureConfig` is the snapshot taken when the user presses Record. It
//! stays fixed for the whole session except for the geometry, which is
//! resolved on the first entry into Recording and corrected by the command
//! builder for codecs that need even dimensions.

use serde::{Deserialize, Serialize};

/// Pixel rectangle on the X screen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// `WxH` as used by `-video_size` and `-s`
    pub fn size_arg(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Which screen(s) a fullscreen capture covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "index")]
pub enum ScreenSelection {
    All,
    Screen(u32),
}

/// Region kind chosen by the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum RegionKind {
    Fullscreen { screen: ScreenSelection },
    /// `id` is `None` when the user still has to pick the window
    Window { id: Option<u64> },
    Area { rect: Rect },
}

impl RegionKind {
    pub fn is_window(&self) -> bool {
        matches!(self, RegionKind::Window { .. })
    }

    /// Short label for the status bar
    pub fn label(&self) -> String {
        match self {
            RegionKind::Fullscreen { screen: ScreenSelection::All } => "Fullscreen (all)".to_string(),
            RegionKind::Fullscreen { screen: ScreenSelection::Screen(i) } => format!("Fullscreen ({})", i),
            RegionKind::Window { .. } => "Window".to_string(),
            RegionKind::Area { .. } => "Area".to_string(),
        }
    }
}

/// An ALSA capture device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlsaDevice {
    /// Hardware id, e.g. `hw:0,0`
    pub hw: String,
    /// Human readable card name
    pub name: String,
    pub channels: u32,
}

/// Audio selection. Replaces reading checkbox widgets directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum AudioMode {
    Off,
    Alsa { device: AlsaDevice },
    /// Selected PulseAudio source names, in selection order
    Pulse { sources: Vec<String> },
}

impl AudioMode {
    pub fn is_off(&self) -> bool {
        matches!(self, AudioMode::Off)
    }

    pub fn alsa_device(&self) -> Option<&AlsaDevice> {
        match self {
            AudioMode::Alsa { device } => Some(device),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioCodec {
    pub name: String,
    /// Needs `-strict experimental`
    #[serde(default)]
    pub experimental: bool,
}

impl Default for AudioCodec {
    fn default() -> Self {
        Self {
            name: "libmp3lame".to_string(),
            experimental: false,
        }
    }
}

/// Output container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mkv,
    Mp4,
    Gif,
}

impl Container {
    /// File extension
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mkv => "mkv",
            Container::Mp4 => "mp4",
            Container::Gif => "gif",
        }
    }

    /// FFmpeg muxer name passed to `-f`
    pub fn muxer(&self) -> &'static str {
        match self {
            Container::Mkv => "matroska",
            Container::Mp4 => "mp4",
            Container::Gif => "gif",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "mkv" | "matroska" => Some(Container::Mkv),
            "mp4" => Some(Container::Mp4),
            "gif" => Some(Container::Gif),
            _ => None,
        }
    }
}

static AUDIO_OFF: AudioMode = AudioMode::Off;

/// Immutable snapshot of what to record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    pub region: RegionKind,
    /// Resolved pixel geometry; filled in on first entry into Recording
    #[serde(default)]
    pub geometry: Rect,
    pub framerate: u32,
    pub video_codec: String,
    #[serde(default)]
    pub audio_codec: AudioCodec,
    pub container: Container,
    pub audio: AudioMode,
    pub show_cursor: bool,
    /// Base name of the final file, e.g. `screencast`
    pub name_prefix: String,
}

impl CaptureConfig {
    /// GIF output has no audio and no pause
    pub fn is_gif(&self) -> bool {
        self.container == Container::Gif || self.video_codec == "gif"
    }

    /// Audio mode after container constraints are applied
    pub fn effective_audio(&self) -> &AudioMode {
        if self.is_gif() {
            &AUDIO_OFF
        } else {
            &self.audio
        }
    }
}
