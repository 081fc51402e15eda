//! screencast - record the X screen with FFmpeg from the command line
//!
//! Subcommands:
//! - `screencast record` - start a session, then control it from stdin
//!   with `pause`, `go`, `stop` and `status`
//! - `screencast settings` - print the effective settings

use anyhow::{anyhow, bail, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use screencast_recorder::commands::recording::{
    get_recording_status, pause_recording, resume_recording, start_recording, stop_recording, RecorderState,
};
use screencast_recorder::recorder::config::AlsaDevice;
use screencast_recorder::recorder::{AudioMode, Container, Rect, RegionKind, ScreenSelection, SessionEvent};
use screencast_recorder::settings::schema::DEFAULT_PROGRAM;
use screencast_recorder::settings::{load_settings, SettingsPaths};
use screencast_recorder::utils::ErrorResponse;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "screencast")]
#[command(about = "Screen recorder driving FFmpeg")]
#[command(version)]
struct Cli {
    /// Program name; selects the settings directory
    #[arg(long, default_value = DEFAULT_PROGRAM)]
    program: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a session, controlled by commands on stdin
    Record(RecordArgs),

    /// Print the effective settings as JSON
    Settings,
}

#[derive(Args)]
#[command(group(ArgGroup::new("region").args(["fullscreen", "window", "area"])))]
struct RecordArgs {
    /// Capture all screens, or screen N
    #[arg(long)]
    fullscreen: Option<Option<u32>>,

    /// Capture a window; without an id the window is picked with the mouse
    #[arg(long, value_parser = parse_window_id)]
    window: Option<Option<u64>>,

    /// Capture a fixed area, `X,Y,WxH`
    #[arg(long, value_parser = parse_area)]
    area: Option<Rect>,

    /// Frames per second
    #[arg(long)]
    fps: Option<u32>,

    /// Video codec passed to the encoder
    #[arg(long)]
    codec: Option<String>,

    /// mkv, mp4 or gif
    #[arg(long, value_parser = parse_container)]
    container: Option<Container>,

    /// ALSA capture device, e.g. hw:0,0
    #[arg(long, conflicts_with = "pulse")]
    alsa: Option<String>,

    /// Channels of the ALSA device
    #[arg(long, requires = "alsa", default_value = "2")]
    channels: u32,

    /// PulseAudio sources; more than one are mixed
    #[arg(long, num_args = 1..)]
    pulse: Vec<String>,

    /// Hide the mouse pointer
    #[arg(long)]
    no_cursor: bool,

    /// Seconds to wait before capture starts
    #[arg(long)]
    countdown: Option<u32>,
}

impl RecordArgs {
    fn region(&self) -> RegionKind {
        if let Some(screen) = self.fullscreen {
            return RegionKind::Fullscreen {
                screen: screen.map(ScreenSelection::Screen).unwrap_or(ScreenSelection::All),
            };
        }
        if let Some(id) = self.window {
            return RegionKind::Window { id };
        }
        match self.area {
            Some(rect) => RegionKind::Area { rect },
            None => RegionKind::Fullscreen {
                screen: ScreenSelection::All,
            },
        }
    }

    fn audio(&self) -> AudioMode {
        if let Some(hw) = &self.alsa {
            return AudioMode::Alsa {
                device: AlsaDevice {
                    hw: hw.clone(),
                    name: hw.clone(),
                    channels: self.channels,
                },
            };
        }
        if !self.pulse.is_empty() {
            return AudioMode::Pulse {
                sources: self.pulse.clone(),
            };
        }
        AudioMode::Off
    }
}

fn parse_window_id(value: &str) -> Result<u64, String> {
    let parsed = match value.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid window id {:?}: {}", value, e))
}

fn parse_area(value: &str) -> Result<Rect, String> {
    let bad = || format!("expected X,Y,WxH, got {:?}", value);
    let mut parts = value.splitn(3, ',');
    let x = parts.next().and_then(|v| v.trim().parse().ok()).ok_or_else(bad)?;
    let y = parts.next().and_then(|v| v.trim().parse().ok()).ok_or_else(bad)?;
    let (w, h) = parts.next().and_then(|v| v.split_once('x')).ok_or_else(bad)?;
    let width: u32 = w.trim().parse().map_err(|_| bad())?;
    let height: u32 = h.trim().parse().map_err(|_| bad())?;
    if width == 0 || height == 0 {
        return Err(bad());
    }
    Ok(Rect::new(x, y, width, height))
}

fn parse_container(value: &str) -> Result<Container, String> {
    Container::from_extension(value).ok_or_else(|| format!("unknown container {:?}", value))
}

fn failed(error: ErrorResponse) -> anyhow::Error {
    anyhow!("{}: {}", error.code, error.message)
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged(state) => println!("state: {}", state),
        SessionEvent::Countdown(left) => println!("starting in {}...", left),
        SessionEvent::SegmentStarted { index, path } => println!("segment {}: {}", index, path.display()),
        SessionEvent::Progress(status) => {
            let fps = status.fps.map(|f| format!("{:.1}", f)).unwrap_or_else(|| "-".to_string());
            println!("{}  {} fps  {} KiB", status.elapsed_text, fps, status.size_kib);
        }
        SessionEvent::WindowMoved(rect) => println!("window moved to {},{}", rect.x, rect.y),
        SessionEvent::Crashed(notice) => {
            println!("{}", notice);
            if let Some(dir) = &notice.archive_dir {
                println!("logs saved in {}", dir.display());
            }
        }
        SessionEvent::Finished(output) => println!("saved {}", output.path.display()),
        SessionEvent::Error(message) => println!("error: {}", message),
    }
}

enum Flow {
    Continue,
    Done,
}

async fn handle_line(recorder: &RecorderState, line: &str) -> Result<Flow> {
    let result = match line {
        "" => return Ok(Flow::Continue),
        "pause" => pause_recording(recorder).await,
        "go" | "resume" => resume_recording(recorder).await,
        "stop" => return stop_recording(recorder).await.map(|_| Flow::Done).map_err(failed),
        "status" => {
            println!("{}", serde_json::to_string_pretty(&get_recording_status(recorder))?);
            Ok(())
        }
        other => {
            eprintln!("unknown command {:?}; use pause, go, stop or status", other);
            Ok(())
        }
    };
    if let Err(e) = result {
        eprintln!("{}: {}", e.code, e.message);
    }
    Ok(Flow::Continue)
}

async fn record(args: RecordArgs, program: &str) -> Result<()> {
    let paths = SettingsPaths::resolve(program)?;
    let mut settings = load_settings(&paths.settings_file)?;
    if let Some(countdown) = args.countdown {
        settings.countdown_secs = countdown;
    }

    let mut config = settings.capture_config(args.region(), args.audio());
    if let Some(fps) = args.fps {
        config.framerate = fps;
    }
    if let Some(codec) = &args.codec {
        config.video_codec = codec.clone();
    }
    if let Some(container) = args.container {
        config.container = container;
    }
    if args.no_cursor {
        config.show_cursor = false;
    }

    let recorder = RecorderState::from_settings(&settings, &paths);
    let mut events = recorder.subscribe().await;

    let start = start_recording(&recorder, config);
    tokio::pin!(start);
    loop {
        tokio::select! {
            result = &mut start => {
                result.map_err(failed)?;
                break;
            }
            Ok(event) = events.recv() => print_event(&event),
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    tracing::info!("stdin closed, stopping");
                    stop_recording(&recorder).await.map_err(failed)?;
                    break;
                };
                if let Flow::Done = handle_line(&recorder, line.trim()).await? {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&event);
                    if let SessionEvent::Crashed(notice) = event {
                        bail!("{}", notice);
                    }
                }
                Err(RecvError::Lagged(n)) => tracing::debug!("Skipped {} session events", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    screencast_recorder::init_tracing();
    let cli = Cli::parse();

    tracing::info!("Starting {} v{}", cli.program, env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Record(args) => record(args, &cli.program).await?,
        Commands::Settings => {
            let paths = SettingsPaths::resolve(&cli.program)?;
            let settings = load_settings(&paths.settings_file)?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
    }
    Ok(())
}
