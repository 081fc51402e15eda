//! Segment management
//!
//! The encoder cannot pause, so every recording interval is captured into its
//! own file in the per-user temp directory. On stop a single segment is moved
//! to its destination; several are joined with a stream-copy concat merge.

use super::command::CommandBuilder;
use super::config::Container;
use super::error::{RecordingError, RecordingResult};
use super::supervisor::EncoderProcess;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Name of the concat manifest inside the temp directory
pub const MANIFEST_NAME: &str = "mergeFile.txt";

const SEGMENT_STEM: &str = "screencast-pause";

/// One physical capture file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// Creation order, starting at 0
    pub index: usize,
    pub path: PathBuf,
    pub size: u64,
}

/// How the final file was produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalized {
    /// The single segment was renamed into place
    Moved(PathBuf),
    /// Several segments were concatenated
    Merged { path: PathBuf, segments: usize },
}

impl Finalized {
    pub fn path(&self) -> &Path {
        match self {
            Finalized::Moved(path) => path,
            Finalized::Merged { path, .. } => path,
        }
    }
}

/// `<prefix>-yyyy-MM-dd_hh-mm-ss.<ext>`
pub fn final_file_name(prefix: &str, container: Container, at: DateTime<Local>) -> String {
    format!(
        "{}-{}.{}",
        prefix,
        at.format("%Y-%m-%d_%H-%M-%S"),
        container.extension()
    )
}

/// Newest finished recording in `dir` whose name starts with `<prefix>-`
pub fn latest_recording(dir: &Path, prefix: &str) -> Option<PathBuf> {
    let name_prefix = format!("{}-", prefix);
    fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|entry| {
            let path = entry.path();
            let named = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(&name_prefix))
                .unwrap_or(false);
            let known = path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(Container::from_extension)
                .is_some();
            named && known
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((modified, entry.path()))
        })
        .max()
        .map(|(_, path)| path)
}

/// Rename, falling back to copy + remove across filesystems
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)?;
    fs::remove_file(from)
}

/// Create `dir`, or `dir-2`, `dir-3`... when it already exists
fn create_fresh_dir(dir: &Path) -> std::io::Result<PathBuf> {
    let mut candidate = dir.to_path_buf();
    let mut n = 1;
    while candidate.exists() {
        n += 1;
        let mut name = dir.as_os_str().to_os_string();
        name.push(format!("-{}", n));
        candidate = PathBuf::from(name);
    }
    fs::create_dir_all(&candidate)?;
    Ok(candidate)
}

fn save_failed(segments: &[PathBuf], error: std::io::Error) -> RecordingError {
    RecordingError::SaveFailed {
        reason: error.to_string(),
        segments: segments.to_vec(),
    }
}

/// Owns the temp directory and the ordered segment list of one session
#[derive(Debug)]
pub struct SegmentManager {
    temp_dir: PathBuf,
    segments: Vec<Segment>,
    next_number: u32,
}

impl SegmentManager {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            segments: Vec::new(),
            next_number: 1,
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.temp_dir.join(MANIFEST_NAME)
    }

    /// Create the temp directory and delete anything left in it
    pub fn purge(&mut self) -> RecordingResult<()> {
        fs::create_dir_all(&self.temp_dir)?;
        for entry in fs::read_dir(&self.temp_dir)? {
            let path = entry?.path();
            tracing::debug!("Removing leftover {}", path.display());
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }
        self.segments.clear();
        self.next_number = 1;
        Ok(())
    }

    /// Reserve the file for the next recording interval
    pub fn next_segment(&mut self, container: Container) -> RecordingResult<PathBuf> {
        fs::create_dir_all(&self.temp_dir)?;
        let path = loop {
            let candidate = self.temp_dir.join(format!(
                "{}-{:04}.{}",
                SEGMENT_STEM,
                self.next_number,
                container.extension()
            ));
            self.next_number += 1;
            if !candidate.exists() {
                break candidate;
            }
        };

        tracing::debug!("Segment {}: {}", self.segments.len(), path.display());
        self.segments.push(Segment {
            index: self.segments.len(),
            path: path.clone(),
            size: 0,
        });
        Ok(path)
    }

    /// Forget the newest segment when its encoder never started
    pub fn abandon_last(&mut self) {
        if let Some(segment) = self.segments.pop() {
            let _ = fs::remove_file(&segment.path);
        }
    }

    /// Re-read sizes from disk
    pub fn refresh_sizes(&mut self) {
        for segment in &mut self.segments {
            segment.size = fs::metadata(&segment.path).map(|m| m.len()).unwrap_or(0);
        }
    }

    fn write_manifest(&self, segments: &[PathBuf]) -> RecordingResult<PathBuf> {
        let manifest = self.manifest_path();
        let mut file = fs::File::create(&manifest)?;
        for path in segments {
            // relative entries keep the concat demuxer in safe mode
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            writeln!(file, "file '{}'", name.replace('\'', "'\\''"))?;
        }
        Ok(manifest)
    }

    /// Produce the final file and clean up the segments.
    ///
    /// A failed merge or write keeps every segment (and the manifest) on
    /// disk and names them in the error.
    pub async fn finalize(
        &mut self,
        encoder: &mut dyn EncoderProcess,
        builder: &CommandBuilder,
        final_path: &Path,
    ) -> RecordingResult<Finalized> {
        self.refresh_sizes();
        let existing: Vec<PathBuf> = self
            .segments
            .iter()
            .filter(|s| s.path.is_file())
            .map(|s| s.path.clone())
            .collect();

        if existing.is_empty() {
            return Err(RecordingError::NoSegments);
        }
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).map_err(|e| save_failed(&existing, e))?;
        }

        match existing.as_slice() {
            [] => Err(RecordingError::NoSegments),
            [single] => {
                tracing::info!("Moving {} to {}", single.display(), final_path.display());
                move_file(single, final_path).map_err(|e| save_failed(&existing, e))?;
                self.segments.clear();
                Ok(Finalized::Moved(final_path.to_path_buf()))
            }
            many => {
                let manifest = self.write_manifest(many).map_err(|e| match e {
                    RecordingError::Io(e) => save_failed(many, e),
                    other => other,
                })?;
                tracing::info!("Merging {} segments into {}", many.len(), final_path.display());

                let reason = match encoder.run_to_completion(&builder.merge(&manifest, final_path)).await {
                    Ok(run) if run.success => None,
                    Ok(run) => Some(format!(
                        "encoder exited with {:?}: {}",
                        run.code,
                        run.stderr.lines().last().unwrap_or("").trim()
                    )),
                    Err(e) => Some(e.to_string()),
                };

                if let Some(reason) = reason {
                    tracing::error!("Merge failed, keeping segments in {}: {}", self.temp_dir.display(), reason);
                    return Err(RecordingError::MergeFailed {
                        reason,
                        segments: many.to_vec(),
                        manifest,
                    });
                }

                for path in many {
                    if let Err(e) = fs::remove_file(path) {
                        tracing::warn!("Failed to remove segment {}: {}", path.display(), e);
                    }
                }
                let _ = fs::remove_file(&manifest);
                let count = many.len();
                self.segments.clear();
                Ok(Finalized::Merged {
                    path: final_path.to_path_buf(),
                    segments: count,
                })
            }
        }
    }

    /// Drop the segment list without touching the files
    pub fn release(&mut self) {
        self.segments.clear();
    }

    /// Move the files of an unfinished recording out of the temp directory
    /// so the next purge cannot delete them. `dest` gets a numeric suffix
    /// when it already exists. Returns the new locations.
    pub fn rescue(
        &mut self,
        segments: &[PathBuf],
        manifest: Option<&Path>,
        dest: &Path,
    ) -> RecordingResult<(Vec<PathBuf>, Option<PathBuf>)> {
        let dest = create_fresh_dir(dest)?;
        let relocate = |path: &Path| -> RecordingResult<PathBuf> {
            let target = dest.join(path.file_name().unwrap_or(path.as_os_str()));
            move_file(path, &target)?;
            Ok(target)
        };
        let moved = segments.iter().map(|p| relocate(p.as_path())).collect::<RecordingResult<Vec<_>>>()?;
        let manifest = manifest.map(relocate).transpose()?;
        self.segments.clear();
        tracing::info!("Kept {} unfinished segments in {}", moved.len(), dest.display());
        Ok((moved, manifest))
    }

    /// Best-effort removal of the temp directory after a successful stop
    pub fn remove_temp_dir(&self) {
        if let Err(e) = fs::remove_dir_all(&self.temp_dir) {
            tracing::debug!("Could not remove {}: {}", self.temp_dir.display(), e);
        }
    }
}
