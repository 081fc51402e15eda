//! In-memory collaborators for exercising the recorder without X11,
//! PulseAudio or a real encoder. Clones share state so a test can keep a
//! handle after boxing one into the controller.

use super::alsa::AlsaBusyCheck;
use super::audio_route::{AudioServer, LoadedModule};
use super::command::EncoderCommand;
use super::config::{AlsaDevice, Rect};
use super::error::{RecordingError, RecordingResult};
use super::geometry::{GeometryProvider, WindowGeometry};
use super::supervisor::{CompletedRun, EncoderProcess, ExitInfo, ProcessEvent, StopOutcome, SupervisorEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct EncoderState {
    spawns: usize,
    merges: usize,
    next_run: u64,
    running: Option<u64>,
    last_exit: Option<ExitInfo>,
    fail_merges: bool,
    fail_start: bool,
    crash_on_stop: bool,
    hang_on_stop: bool,
    started: Vec<EncoderCommand>,
}

/// Encoder that writes `segment<N>|` into each capture output and
/// concatenates manifest entries on merge
#[derive(Clone, Default)]
pub struct FakeEncoder {
    state: Arc<Mutex<EncoderState>>,
}

impl FakeEncoder {
    pub fn spawn_count(&self) -> usize {
        self.state.lock().spawns
    }

    pub fn merge_count(&self) -> usize {
        self.state.lock().merges
    }

    pub fn started(&self) -> Vec<EncoderCommand> {
        self.state.lock().started.clone()
    }

    pub fn fail_merges(&self, fail: bool) {
        self.state.lock().fail_merges = fail;
    }

    pub fn fail_start(&self, fail: bool) {
        self.state.lock().fail_start = fail;
    }

    /// The next stop finds the capture dying from a segfault
    pub fn crash_on_stop(&self, crash: bool) {
        self.state.lock().crash_on_stop = crash;
    }

    /// Stops give up as if the capture ignored both signals
    pub fn hang_on_stop(&self, hang: bool) {
        self.state.lock().hang_on_stop = hang;
    }

    /// Kill the running capture abnormally; returns the event the real
    /// supervisor would publish
    pub fn crash(&self) -> SupervisorEvent {
        let mut state = self.state.lock();
        let run_id = state.running.take().unwrap_or(0);
        let info = ExitInfo {
            code: None,
            signal: Some(11),
            requested: false,
        };
        state.last_exit = Some(info);
        SupervisorEvent {
            run_id,
            event: ProcessEvent::Crashed {
                code: info.code,
                signal: info.signal,
            },
        }
    }

    /// Let the running capture exit with code 0 on its own
    pub fn finish(&self) -> SupervisorEvent {
        let mut state = self.state.lock();
        let run_id = state.running.take().unwrap_or(0);
        state.last_exit = Some(ExitInfo {
            code: Some(0),
            signal: None,
            requested: false,
        });
        SupervisorEvent {
            run_id,
            event: ProcessEvent::Exited { code: Some(0) },
        }
    }

    /// Progress tick for the running capture
    pub fn tick(&self, fps: f32, size_bytes: u64, elapsed: std::time::Duration) -> SupervisorEvent {
        SupervisorEvent {
            run_id: self.state.lock().running.unwrap_or(0),
            event: ProcessEvent::ProgressTick {
                fps: Some(fps),
                size_bytes,
                elapsed,
            },
        }
    }

    fn merge(manifest: &Path, output: &Path) -> std::io::Result<()> {
        let dir = manifest.parent().unwrap_or(Path::new("."));
        let mut merged = Vec::new();
        for line in fs::read_to_string(manifest)?.lines() {
            let name = line.trim_start_matches("file ").trim_matches('\'');
            merged.extend(fs::read(dir.join(name))?);
        }
        fs::write(output, merged)
    }
}

fn arg_after<'a>(command: &'a EncoderCommand, flag: &str) -> Option<&'a str> {
    let at = command.args.iter().position(|a| a == flag)?;
    command.args.get(at + 1).map(String::as_str)
}

#[async_trait]
impl EncoderProcess for FakeEncoder {
    async fn start(&mut self, command: &EncoderCommand, output: &Path) -> RecordingResult<u64> {
        let mut state = self.state.lock();
        if state.fail_start {
            return Err(RecordingError::FailedToStart(format!("{}: not found", command.program)));
        }
        if state.running.is_some() {
            return Err(RecordingError::AlreadyRecording);
        }
        state.spawns += 1;
        state.next_run += 1;
        state.running = Some(state.next_run);
        state.last_exit = None;
        state.started.push(command.clone());
        fs::write(output, format!("segment{}|", state.spawns))?;
        Ok(state.next_run)
    }

    async fn stop(&mut self) -> RecordingResult<StopOutcome> {
        let mut state = self.state.lock();
        let was_running = state.running.take().is_some();
        if state.hang_on_stop {
            return Err(RecordingError::StopTimeout(std::time::Duration::from_secs(7)));
        }
        if was_running {
            let crashed = state.crash_on_stop;
            return Ok(StopOutcome::Exited(ExitInfo {
                code: if crashed { None } else { Some(255) },
                signal: if crashed { Some(11) } else { None },
                requested: true,
            }));
        }
        Ok(state
            .last_exit
            .take()
            .map(StopOutcome::Exited)
            .unwrap_or(StopOutcome::NotRunning))
    }

    fn is_running(&self) -> bool {
        self.state.lock().running.is_some()
    }

    fn current_run(&self) -> Option<u64> {
        self.state.lock().running
    }

    async fn run_to_completion(&mut self, command: &EncoderCommand) -> RecordingResult<CompletedRun> {
        if command.args.iter().any(|a| a == "-version") {
            return Ok(CompletedRun {
                success: true,
                code: Some(0),
                stdout: "ffmpeg version 6.1-fake Copyright (c) 2000-2023\nbuilt with gcc 13\n".to_string(),
                stderr: String::new(),
            });
        }

        let fail = {
            let mut state = self.state.lock();
            state.merges += 1;
            state.fail_merges
        };
        if fail {
            return Ok(CompletedRun {
                success: false,
                code: Some(1),
                stdout: String::new(),
                stderr: "mergeFile.txt: Invalid data found when processing input\n".to_string(),
            });
        }

        let manifest = arg_after(command, "-i").map(PathBuf::from);
        let output = command.args.last().map(PathBuf::from);
        match (manifest, output) {
            (Some(manifest), Some(output)) => {
                Self::merge(&manifest, &output)?;
                Ok(CompletedRun {
                    success: true,
                    code: Some(0),
                    stdout: String::new(),
                    stderr: String::new(),
                })
            }
            _ => Err(RecordingError::ConfigurationError("unexpected command".to_string())),
        }
    }
}

#[derive(Default)]
struct AudioState {
    next_id: u32,
    loaded: Vec<LoadedModule>,
    loads: Vec<(String, Vec<String>)>,
    unloads: Vec<u32>,
    fail_loads: bool,
    failing_sources: Vec<String>,
}

/// Audio server keeping its module table in memory
#[derive(Clone, Default)]
pub struct FakeAudioServer {
    state: Arc<Mutex<AudioState>>,
}

impl FakeAudioServer {
    /// Currently loaded modules with this name
    pub fn loaded_count(&self, name: &str) -> usize {
        self.state.lock().loaded.iter().filter(|m| m.name == name).count()
    }

    pub fn loaded_modules(&self) -> Vec<LoadedModule> {
        self.state.lock().loaded.clone()
    }

    /// Every load request, in order
    pub fn loads(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().loads.clone()
    }

    pub fn unloads(&self) -> Vec<u32> {
        self.state.lock().unloads.clone()
    }

    pub fn fail_loads(&self, fail: bool) {
        self.state.lock().fail_loads = fail;
    }

    /// Refuse loopbacks reading from `source`
    pub fn fail_source(&self, source: &str) {
        self.state.lock().failing_sources.push(format!("source={}", source));
    }

    /// A module left behind by an earlier process
    pub fn preload(&self, id: u32, name: &str, argument: &str) {
        let mut state = self.state.lock();
        state.next_id = state.next_id.max(id);
        state.loaded.push(LoadedModule {
            id,
            name: name.to_string(),
            argument: argument.to_string(),
        });
    }
}

#[async_trait]
impl AudioServer for FakeAudioServer {
    async fn load_module(&self, module: &str, args: &[String]) -> RecordingResult<u32> {
        let mut state = self.state.lock();
        state.loads.push((module.to_string(), args.to_vec()));
        let refused = args.iter().any(|a| state.failing_sources.contains(a));
        if state.fail_loads || refused {
            return Err(RecordingError::AudioServer("Connection refused".to_string()));
        }
        state.next_id += 1;
        let id = state.next_id;
        state.loaded.push(LoadedModule {
            id,
            name: module.to_string(),
            argument: args.join(" "),
        });
        Ok(id)
    }

    async fn unload_module(&self, id: u32) -> RecordingResult<()> {
        let mut state = self.state.lock();
        state.unloads.push(id);
        let before = state.loaded.len();
        state.loaded.retain(|m| m.id != id);
        if state.loaded.len() == before {
            return Err(RecordingError::AudioServer(format!("No such module {}", id)));
        }
        Ok(())
    }

    async fn list_modules(&self) -> RecordingResult<Vec<LoadedModule>> {
        Ok(self.state.lock().loaded.clone())
    }
}

/// ALSA busy check with a switchable busy flag
#[derive(Clone, Default)]
pub struct FakeAlsa {
    busy: Arc<AtomicBool>,
}

impl FakeAlsa {
    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }
}

impl AlsaBusyCheck for FakeAlsa {
    fn is_busy(&self, _device: &AlsaDevice) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

struct GeometryState {
    screens: Vec<Rect>,
    windows: HashMap<u64, Rect>,
    picked: Option<u64>,
}

/// One 1920x1080 screen plus whatever windows a test places
#[derive(Clone)]
pub struct FakeGeometry {
    state: Arc<Mutex<GeometryState>>,
}

impl Default for FakeGeometry {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(GeometryState {
                screens: vec![Rect::new(0, 0, 1920, 1080)],
                windows: HashMap::new(),
                picked: None,
            })),
        }
    }
}

impl FakeGeometry {
    pub fn set_screens(&self, screens: Vec<Rect>) {
        self.state.lock().screens = screens;
    }

    /// Place a window; the first one placed is what a user pick returns
    pub fn set_window(&self, id: u64, rect: Rect) {
        let mut state = self.state.lock();
        state.windows.insert(id, rect);
        state.picked.get_or_insert(id);
    }

    pub fn move_window(&self, id: u64, x: i32, y: i32) {
        if let Some(rect) = self.state.lock().windows.get_mut(&id) {
            rect.x = x;
            rect.y = y;
        }
    }
}

#[async_trait]
impl GeometryProvider for FakeGeometry {
    async fn screens(&self) -> RecordingResult<Vec<Rect>> {
        Ok(self.state.lock().screens.clone())
    }

    async fn resolve_window(&self, id: Option<u64>) -> RecordingResult<WindowGeometry> {
        let state = self.state.lock();
        let id = id
            .or(state.picked)
            .ok_or_else(|| RecordingError::Geometry("no window picked".to_string()))?;
        let rect = state
            .windows
            .get(&id)
            .copied()
            .ok_or_else(|| RecordingError::Geometry(format!("no window {:#x}", id)))?;
        Ok(WindowGeometry { id, rect })
    }

    async fn window_geometry(&self, id: u64) -> RecordingResult<Rect> {
        self.state
            .lock()
            .windows
            .get(&id)
            .copied()
            .ok_or_else(|| RecordingError::Geometry(format!("no window {:#x}", id)))
    }
}
