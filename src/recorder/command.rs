//! Encoder command construction
//!
//! Builds the argument vectors for the x11grab capture and for the
//! stream-copy concat merge. Arguments are kept as a structured list and are
//! only joined into a string for logging and the diagnostic log.

use super::audio_route::AudioSource;
use super::config::{AudioCodec, CaptureConfig};
use std::path::{Path, PathBuf};

/// A fully assembled encoder invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment for the child
    pub env: Vec<(String, String)>,
    /// Working directory; `-report` writes its log here
    pub working_dir: Option<PathBuf>,
}

impl EncoderCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
            working_dir: None,
        }
    }

    /// Single-line rendering for logs
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                line.push('"');
                line.push_str(arg);
                line.push('"');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

/// Codecs that reject odd frame dimensions
pub fn requires_even_dimensions(codec: &str) -> bool {
    matches!(codec, "libx264" | "libx265")
}

/// `-c:v` value plus the codec's fixed options
pub fn video_codec_args(codec: &str) -> Vec<String> {
    let args: &[&str] = match codec {
        "libx264" => &["libx264", "-preset", "veryfast"],
        // https://trac.ffmpeg.org/wiki/Encode/H.265
        "libx265" => &["libx265", "-preset", "ultrafast", "-x265-params", "crf=28"],
        other => return vec![other.to_string()],
    };
    args.iter().map(|s| s.to_string()).collect()
}

/// `-c:a` arguments; empty when no audio source is connected
pub fn audio_codec_args(codec: &AudioCodec, audio: &AudioSource) -> Vec<String> {
    if audio.is_none() {
        return Vec::new();
    }
    let mut args = vec!["-c:a".to_string(), codec.name.clone()];
    if codec.experimental {
        args.extend(["-strict".to_string(), "experimental".to_string()]);
    }
    args
}

fn even(value: u32) -> u32 {
    if value % 2 == 1 {
        value - 1
    } else {
        value
    }
}

/// Builds encoder invocations for one X display
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    program: String,
    display: String,
    working_dir: Option<PathBuf>,
}

impl CommandBuilder {
    pub fn new(program: impl Into<String>, display: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            display: display.into(),
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, args: Vec<String>) -> EncoderCommand {
        let mut command = EncoderCommand::new(self.program.clone(), args);
        command.working_dir = self.working_dir.clone();
        command
    }

    /// Capture command for one segment.
    ///
    /// For codecs that need even dimensions an odd width or height is
    /// decremented by one, and the corrected size is written back into
    /// `config.geometry` so later segments of the session reuse it.
    pub fn record(&self, config: &mut CaptureConfig, audio: &AudioSource, output: &Path) -> EncoderCommand {
        if requires_even_dimensions(&config.video_codec) {
            config.geometry.width = even(config.geometry.width);
            config.geometry.height = even(config.geometry.height);
        }
        let geometry = config.geometry;
        let size = geometry.size_arg();

        let mut args = vec![
            "-report".to_string(),
            "-f".to_string(),
            "x11grab".to_string(),
            "-draw_mouse".to_string(),
            if config.show_cursor { "1" } else { "0" }.to_string(),
            "-framerate".to_string(),
            config.framerate.to_string(),
            "-video_size".to_string(),
            size.clone(),
            "-i".to_string(),
            format!("{}+{},{}", self.display, geometry.x, geometry.y),
        ];
        args.extend(audio.input_args());
        args.extend(["-pix_fmt".to_string(), "yuv420p".to_string()]);
        args.push("-c:v".to_string());
        args.extend(video_codec_args(&config.video_codec));
        args.extend(audio_codec_args(&config.audio_codec, audio));
        args.extend([
            "-q:v".to_string(),
            "1".to_string(),
            "-s".to_string(),
            size,
            "-f".to_string(),
            config.container.muxer().to_string(),
            output.to_string_lossy().to_string(),
        ]);

        let mut command = self.command(args);
        if let AudioSource::Pulse { endpoint } = audio {
            command.env.push(("PULSE_SOURCE".to_string(), endpoint.clone()));
        }
        command
    }

    /// Lossless stream-copy concatenation of the manifest's entries
    pub fn merge(&self, manifest: &Path, output: &Path) -> EncoderCommand {
        self.command(vec![
            "-report".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-i".to_string(),
            manifest.to_string_lossy().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            output.to_string_lossy().to_string(),
        ])
    }

    /// `<encoder> -version`
    pub fn version(&self) -> EncoderCommand {
        EncoderCommand::new(self.program.clone(), vec!["-version".to_string()])
    }
}
