//! Recording error taxonomy
//!
//! Configuration errors are reported before any encoder process is spawned
//! or resumed and leave the session untouched. Crashes and merge failures
//! are runtime errors raised after the session has already produced files.

use std::path::PathBuf;
use thiserror::Error;

/// Notice shown to the user when the encoder dies abnormally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashNotice {
    /// Encoder program name
    pub program: String,
    /// Weekday of the crash ("Monday")
    pub day: String,
    /// Local time of the crash ("14:05")
    pub time: String,
    /// Directory that now holds the archived diagnostics
    pub archive_dir: Option<PathBuf>,
}

impl std::fmt::Display for CrashNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} is crashed on {}, {}", self.program, self.day, self.time)
    }
}

/// Errors raised by the recording subsystem
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Recording already in progress")]
    AlreadyRecording,

    #[error("No recording in progress")]
    NotRecording,

    #[error("Cannot {action} while {state}")]
    InvalidState { action: &'static str, state: String },

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Audio device {name} ({hw}) is busy")]
    DeviceBusy { hw: String, name: String },

    #[error("Encoder failed to start: {0}")]
    FailedToStart(String),

    #[error("{0}")]
    Crashed(CrashNotice),

    #[error("Merging {} segments failed: {reason}", segments.len())]
    MergeFailed {
        reason: String,
        segments: Vec<PathBuf>,
        manifest: PathBuf,
    },

    /// The final file could not be written; the segments were kept
    #[error("Could not save the recording, {} segments kept: {reason}", segments.len())]
    SaveFailed { reason: String, segments: Vec<PathBuf> },

    #[error("Encoder did not exit within {0:?}")]
    StopTimeout(std::time::Duration),

    #[error("Nothing was recorded")]
    NoSegments,

    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("Audio server error: {0}")]
    AudioServer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecordingError {
    /// Errors of this class are raised before anything is spawned; the
    /// session state is unchanged when one is returned.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RecordingError::ConfigurationError(_)
                | RecordingError::DeviceBusy { .. }
                | RecordingError::FailedToStart(_)
        )
    }
}

/// Result type alias for recording operations
pub type RecordingResult<T> = Result<T, RecordingError>;
