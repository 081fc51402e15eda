//! Error types and handling
//!
//! Common error types used across the application.

use crate::recorder::error::RecordingError;
use crate::settings::SettingsError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Recording(#[from] RecordingError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Error response for front ends
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

fn recording_code(error: &RecordingError) -> &'static str {
    match error {
        RecordingError::AlreadyRecording
        | RecordingError::NotRecording
        | RecordingError::InvalidState { .. } => "INVALID_STATE",
        RecordingError::ConfigurationError(_) | RecordingError::FailedToStart(_) => "CONFIGURATION_ERROR",
        RecordingError::DeviceBusy { .. } => "DEVICE_BUSY",
        RecordingError::Crashed(_) => "CRASHED",
        RecordingError::MergeFailed { .. } => "MERGE_FAILED",
        RecordingError::SaveFailed { .. } => "SAVE_FAILED",
        RecordingError::StopTimeout(_) => "STOP_TIMEOUT",
        RecordingError::NoSegments => "NO_SEGMENTS",
        RecordingError::Geometry(_) => "GEOMETRY_ERROR",
        RecordingError::AudioServer(_) => "AUDIO_SERVER_ERROR",
        RecordingError::Io(_) => "IO_ERROR",
    }
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let code = match &error {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Settings(_) => "SETTINGS_ERROR",
            AppError::Recording(e) => recording_code(e),
            AppError::InvalidArgument(_) => "INVALID_ARGUMENT",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
