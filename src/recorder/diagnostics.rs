//! Operator-facing diagnostic log
//!
//! Written once when a recording starts; nothing reads it back.

use super::command::CommandBuilder;
use super::supervisor::EncoderProcess;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Contents of `<settings dir>/<program>.log`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticLog {
    pub program: String,
    pub version: String,
    pub resolution: String,
    pub audio: String,
    pub encoder: String,
    pub encoder_version: String,
    pub record_command: String,
}

impl DiagnosticLog {
    pub fn render(&self) -> String {
        format!(
            "{} Version: {}\nRecord resolution: {}\nAudio string: {}\n{} Version: {}\nRecord String: {}\n",
            self.program,
            self.version,
            self.resolution,
            self.audio,
            self.encoder,
            self.encoder_version,
            self.record_command
        )
    }

    pub fn write(&self, settings_dir: &Path) -> io::Result<PathBuf> {
        let path = log_path(settings_dir, &self.program);
        fs::write(&path, self.render())?;
        Ok(path)
    }
}

pub fn log_path(settings_dir: &Path, program: &str) -> PathBuf {
    settings_dir.join(format!("{}.log", program))
}

/// First line of `<encoder> -version`
pub async fn encoder_version(encoder: &mut dyn EncoderProcess, builder: &CommandBuilder) -> String {
    match encoder.run_to_completion(&builder.version()).await {
        Ok(run) => run
            .stdout
            .lines()
            .next()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .unwrap_or_else(|| "unknown".to_string()),
        Err(e) => {
            tracing::warn!("Could not query {} version: {}", builder.program(), e);
            "unknown".to_string()
        }
    }
}

/// Delete `<encoder>-*.log` reports left by earlier runs
pub fn remove_report_logs(dir: &Path, encoder: &str) -> io::Result<usize> {
    let prefix = format!("{}-", encoder);
    let mut removed = 0;
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let path = entry?.path();
        let stale = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(&prefix) && n.ends_with(".log"))
            .unwrap_or(false);
        if stale && path.is_file() {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::debug!("Removed {} stale {} reports", removed, encoder);
    }
    Ok(removed)
}
