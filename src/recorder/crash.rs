//! Crash recovery
//!
//! Preserves the diagnostics of an abnormal encoder exit before the next
//! recording can overwrite them. Only the most recent crash is kept.

use super::error::CrashNotice;
use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Subdirectory of the settings directory holding the last crash
pub const CRASH_DIR: &str = "crashed";

/// Where artifacts live and which of them belong to a crash
#[derive(Debug, Clone)]
pub struct CrashArchive {
    settings_dir: PathBuf,
    program: String,
    encoder: String,
    settings_file: Option<PathBuf>,
}

impl CrashArchive {
    pub fn new(settings_dir: impl Into<PathBuf>, program: impl Into<String>, encoder: impl Into<String>) -> Self {
        Self {
            settings_dir: settings_dir.into(),
            program: program.into(),
            encoder: encoder.into(),
            settings_file: None,
        }
    }

    /// Settings file to snapshot alongside the logs
    pub fn with_settings_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_file = Some(path.into());
        self
    }

    pub fn dir(&self) -> PathBuf {
        self.settings_dir.join(CRASH_DIR)
    }

    /// Encoder `-report` logs and the application log
    fn is_log_artifact(&self, name: &str) -> bool {
        let report = name.starts_with(&format!("{}-", self.encoder)) && name.ends_with(".log");
        report || name == format!("{}.log", self.program)
    }

    /// Replace the archive's contents with the current artifacts
    pub fn archive(&self) -> io::Result<CrashNotice> {
        self.archive_at(Local::now())
    }

    pub fn archive_at(&self, at: DateTime<Local>) -> io::Result<CrashNotice> {
        let dir = self.dir();
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;

        for entry in fs::read_dir(&self.settings_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if self.is_log_artifact(name) {
                tracing::debug!("Archiving {}", name);
                fs::rename(entry.path(), dir.join(name))?;
            }
        }

        if let Some(settings) = &self.settings_file {
            if let Some(name) = settings.file_name().filter(|_| settings.is_file()) {
                fs::copy(settings, dir.join(name))?;
            }
        }

        let notice = crash_notice(&self.encoder, at, Some(dir));
        tracing::error!("{}", notice);
        Ok(notice)
    }

    /// Notice for a crash whose artifacts could not be archived
    pub fn unarchived_notice(&self) -> CrashNotice {
        crash_notice(&self.encoder, Local::now(), None)
    }
}

fn crash_notice(program: &str, at: DateTime<Local>, archive_dir: Option<PathBuf>) -> CrashNotice {
    CrashNotice {
        program: program.to_string(),
        day: at.format("%A").to_string(),
        time: at.format("%H:%M").to_string(),
        archive_dir,
    }
}

/// Files currently held in the archive, sorted by name
pub fn archived_files(settings_dir: &Path) -> io::Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(settings_dir.join(CRASH_DIR))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    Ok(names)
}
