//! X11 geometry provider
//!
//! Queries screens with `xrandr --listmonitors` and windows with `xwininfo`.
//! Without a window id `xwininfo` waits for the user to click a window,
//! which is how window capture defers until the pick is made.

use super::config::Rect;
use super::error::{RecordingError, RecordingResult};
use super::geometry::{GeometryProvider, WindowGeometry};
use async_trait::async_trait;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct X11Geometry {
    display: String,
}

impl X11Geometry {
    pub fn new(display: impl Into<String>) -> Self {
        Self {
            display: display.into(),
        }
    }

    async fn run(&self, program: &str, args: &[String]) -> RecordingResult<String> {
        let output = Command::new(program)
            .args(args)
            .env("DISPLAY", &self.display)
            .output()
            .await
            .map_err(|e| RecordingError::Geometry(format!("Failed to run {}: {}", program, e)))?;
        if !output.status.success() {
            return Err(RecordingError::Geometry(format!(
                "{} failed: {}",
                program,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn xwininfo(&self, id: Option<u64>) -> RecordingResult<WindowGeometry> {
        let args = match id {
            Some(id) => vec!["-id".to_string(), format!("{:#x}", id)],
            None => Vec::new(),
        };
        let stdout = self.run("xwininfo", &args).await?;
        parse_xwininfo(&stdout).ok_or_else(|| RecordingError::Geometry("unreadable xwininfo output".to_string()))
    }
}

#[async_trait]
impl GeometryProvider for X11Geometry {
    async fn screens(&self) -> RecordingResult<Vec<Rect>> {
        let stdout = self.run("xrandr", &["--listmonitors".to_string()]).await?;
        Ok(parse_monitors(&stdout))
    }

    async fn resolve_window(&self, id: Option<u64>) -> RecordingResult<WindowGeometry> {
        if id.is_none() {
            tracing::info!("Waiting for a window to be selected");
        }
        self.xwininfo(id).await
    }

    async fn window_geometry(&self, id: u64) -> RecordingResult<Rect> {
        Ok(self.xwininfo(Some(id)).await?.rect)
    }
}

/// `W/mmxH/mm+X+Y` from one `xrandr --listmonitors` line
fn parse_monitor_token(token: &str) -> Option<Rect> {
    let (width, rest) = token.split_once('/')?;
    let (_, rest) = rest.split_once('x')?;
    let (height, rest) = rest.split_once('/')?;
    let mut offsets = rest.splitn(3, '+').skip(1);
    let x = offsets.next()?.parse().ok()?;
    let y = offsets.next()?.parse().ok()?;
    Some(Rect::new(x, y, width.parse().ok()?, height.parse().ok()?))
}

pub fn parse_monitors(output: &str) -> Vec<Rect> {
    output
        .lines()
        .skip_while(|line| line.starts_with("Monitors:"))
        .filter_map(|line| line.split_whitespace().find_map(parse_monitor_token))
        .collect()
}

fn field<'a>(output: &'a str, label: &str) -> Option<&'a str> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix(label))
        .map(str::trim)
}

pub fn parse_xwininfo(output: &str) -> Option<WindowGeometry> {
    let id_field = field(output, "xwininfo: Window id:")?;
    let id_hex = id_field.split_whitespace().next()?.trim_start_matches("0x");
    let id = u64::from_str_radix(id_hex, 16).ok()?;
    let rect = Rect::new(
        field(output, "Absolute upper-left X:")?.parse().ok()?,
        field(output, "Absolute upper-left Y:")?.parse().ok()?,
        field(output, "Width:")?.parse().ok()?,
        field(output, "Height:")?.parse().ok()?,
    );
    Some(WindowGeometry { id, rect })
}
