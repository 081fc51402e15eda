//! PulseAudio routing
//!
//! Turns the user's audio selection into exactly one source for the
//! encoder. Mixing two or more PulseAudio sources needs a null sink plus one
//! loopback per source; the encoder then records the sink's monitor.
//!
//! Audio-server failures never abort a recording: they are logged and the
//! recording continues without the requested routing.

use super::config::AudioMode;
use super::error::{RecordingError, RecordingResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;

/// Upper bound for one `pactl` call; a hung server must not stall a session
const PACTL_TIMEOUT: Duration = Duration::from_secs(5);

/// The single audio input handed to the command builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    None,
    Alsa { hw: String, channels: u32 },
    Pulse { endpoint: String },
}

impl AudioSource {
    pub fn is_none(&self) -> bool {
        matches!(self, AudioSource::None)
    }

    /// Encoder input arguments for this source
    pub fn input_args(&self) -> Vec<String> {
        match self {
            AudioSource::None => Vec::new(),
            AudioSource::Alsa { hw, channels } => vec![
                "-f".to_string(),
                "alsa".to_string(),
                "-ac".to_string(),
                channels.to_string(),
                "-i".to_string(),
                hw.clone(),
            ],
            AudioSource::Pulse { endpoint } => vec![
                "-f".to_string(),
                "pulse".to_string(),
                "-i".to_string(),
                endpoint.clone(),
            ],
        }
    }

    /// Human readable form for the diagnostic log
    pub fn describe(&self) -> String {
        self.input_args().join(" ")
    }
}

/// A module currently loaded in the audio server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
    pub id: u32,
    pub name: String,
    pub argument: String,
}

/// Audio server control surface
#[async_trait]
pub trait AudioServer: Send + Sync {
    /// Load a module and return its index
    async fn load_module(&self, module: &str, args: &[String]) -> RecordingResult<u32>;

    async fn unload_module(&self, id: u32) -> RecordingResult<()>;

    async fn list_modules(&self) -> RecordingResult<Vec<LoadedModule>>;
}

/// `pactl` command-line client
#[derive(Debug, Clone)]
pub struct Pactl {
    program: String,
}

impl Pactl {
    pub fn new() -> Self {
        Self {
            program: "pactl".to_string(),
        }
    }

    async fn run(&self, args: &[String]) -> RecordingResult<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args).kill_on_drop(true);
        let output = tokio::time::timeout(PACTL_TIMEOUT, cmd.output())
            .await
            .map_err(|_| {
                RecordingError::AudioServer(format!("{} {} timed out", self.program, args.join(" ")))
            })?
            .map_err(|e| RecordingError::AudioServer(format!("Failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(RecordingError::AudioServer(format!(
                "{} {} failed: {}",
                self.program,
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Default for Pactl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioServer for Pactl {
    async fn load_module(&self, module: &str, args: &[String]) -> RecordingResult<u32> {
        let mut cmd = vec!["load-module".to_string(), module.to_string()];
        cmd.extend(args.iter().cloned());
        let stdout = self.run(&cmd).await?;
        stdout
            .trim()
            .parse::<u32>()
            .map_err(|_| RecordingError::AudioServer(format!("Unexpected module index: {:?}", stdout.trim())))
    }

    async fn unload_module(&self, id: u32) -> RecordingResult<()> {
        self.run(&["unload-module".to_string(), id.to_string()]).await?;
        Ok(())
    }

    async fn list_modules(&self) -> RecordingResult<Vec<LoadedModule>> {
        let stdout = self
            .run(&["list".to_string(), "short".to_string(), "modules".to_string()])
            .await?;
        Ok(parse_module_list(&stdout))
    }
}

/// Parse `pactl list short modules` output (`id<TAB>name<TAB>argument`)
pub fn parse_module_list(output: &str) -> Vec<LoadedModule> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let id = parts.next()?.trim().parse::<u32>().ok()?;
            let name = parts.next()?.trim().to_string();
            let argument = parts.next().unwrap_or("").trim().to_string();
            Some(LoadedModule { id, name, argument })
        })
        .collect()
}

/// Server-side routing created for one recording interval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioRoute {
    pub sink_module: u32,
    pub loopback_modules: Vec<u32>,
}

/// Owns the null sink and loopbacks of the current recording interval
pub struct AudioRouteManager {
    server: Box<dyn AudioServer>,
    sink_name: String,
    route: Option<AudioRoute>,
}

impl AudioRouteManager {
    /// `sink_name` is the name of the mixing null sink, e.g. `screencastMix`
    pub fn new(server: Box<dyn AudioServer>, sink_name: impl Into<String>) -> Self {
        Self {
            server,
            sink_name: sink_name.into(),
            route: None,
        }
    }

    pub fn route(&self) -> Option<&AudioRoute> {
        self.route.as_ref()
    }

    pub fn sink_name(&self) -> &str {
        &self.sink_name
    }

    fn monitor(&self) -> String {
        format!("{}.monitor", self.sink_name)
    }

    /// Resolve the selection into one encoder source, creating the mixing
    /// topology when two or more PulseAudio sources are selected.
    pub async fn resolve(&mut self, audio: &AudioMode) -> AudioSource {
        match audio {
            AudioMode::Off => AudioSource::None,
            AudioMode::Alsa { device } => AudioSource::Alsa {
                hw: device.hw.clone(),
                channels: device.channels,
            },
            AudioMode::Pulse { sources } => match sources.as_slice() {
                [] => AudioSource::None,
                [single] => AudioSource::Pulse {
                    endpoint: single.clone(),
                },
                many => self.mix(many).await,
            },
        }
    }

    async fn mix(&mut self, sources: &[String]) -> AudioSource {
        if self.route.is_some() {
            self.teardown().await;
        }

        tracing::debug!("Creating null sink {} for {} sources", self.sink_name, sources.len());
        let sink_module = match self
            .server
            .load_module("module-null-sink", &[format!("sink_name={}", self.sink_name)])
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("Could not create mixing sink, recording first source only: {}", e);
                return AudioSource::Pulse {
                    endpoint: sources[0].clone(),
                };
            }
        };

        let mut loopback_modules = Vec::with_capacity(sources.len());
        for source in sources {
            let args = [format!("source={}", source), format!("sink={}", self.sink_name)];
            match self.server.load_module("module-loopback", &args).await {
                Ok(id) => {
                    tracing::debug!("Loopback {} -> {} is module {}", source, self.sink_name, id);
                    loopback_modules.push(id);
                }
                Err(e) => tracing::warn!("Could not route {} into {}: {}", source, self.sink_name, e),
            }
        }

        if loopback_modules.is_empty() {
            tracing::warn!("No source could be routed, recording first source only");
            if let Err(e) = self.server.unload_module(sink_module).await {
                tracing::warn!("Failed to unload sink module {}: {}", sink_module, e);
            }
            return AudioSource::Pulse {
                endpoint: sources[0].clone(),
            };
        }

        self.route = Some(AudioRoute {
            sink_module,
            loopback_modules,
        });
        AudioSource::Pulse {
            endpoint: self.monitor(),
        }
    }

    /// Unload the current route and any stale module that references the
    /// mixing sink. Calling this when nothing is loaded does nothing.
    pub async fn teardown(&mut self) {
        if let Some(route) = self.route.take() {
            for id in route.loopback_modules.iter().rev() {
                if let Err(e) = self.server.unload_module(*id).await {
                    tracing::warn!("Failed to unload loopback module {}: {}", id, e);
                }
            }
            if let Err(e) = self.server.unload_module(route.sink_module).await {
                tracing::warn!("Failed to unload sink module {}: {}", route.sink_module, e);
            }
        }

        let stale = match self.server.list_modules().await {
            Ok(modules) => modules,
            Err(e) => {
                tracing::debug!("Could not list audio modules: {}", e);
                return;
            }
        };
        let sink_arg = format!("sink_name={}", self.sink_name);
        let loopback_arg = format!("sink={}", self.sink_name);
        for module in stale.iter().filter(|m| {
            m.argument
                .split_whitespace()
                .any(|a| a == sink_arg || a == loopback_arg)
        }) {
            tracing::info!("Unloading stale module {} ({})", module.id, module.name);
            if let Err(e) = self.server.unload_module(module.id).await {
                tracing::warn!("Failed to unload stale module {}: {}", module.id, e);
            }
        }
    }
}
