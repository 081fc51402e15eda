//! ALSA capture device busy check

use super::config::AlsaDevice;
use std::path::{Path, PathBuf};

/// Reports whether a capture device is already held by another process
pub trait AlsaBusyCheck: Send + Sync {
    fn is_busy(&self, device: &AlsaDevice) -> bool;
}

/// Reads the substream status files under `/proc/asound`
#[derive(Debug, Clone)]
pub struct ProcAsound {
    root: PathBuf,
}

impl ProcAsound {
    pub fn new() -> Self {
        Self::with_root("/proc/asound")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn status_path(&self, card: u32, device: u32) -> PathBuf {
        self.root
            .join(format!("card{}", card))
            .join(format!("pcm{}c", device))
            .join("sub0")
            .join("status")
    }
}

impl Default for ProcAsound {
    fn default() -> Self {
        Self::new()
    }
}

/// Split `hw:1,0` / `plughw:1,0` / `hw:1` into card and device
pub fn parse_hw(hw: &str) -> Option<(u32, u32)> {
    let (_, spec) = hw.split_once(':')?;
    let mut parts = spec.split(',');
    let card = parts.next()?.trim().parse().ok()?;
    let device = match parts.next() {
        Some(d) => d.trim().parse().ok()?,
        None => 0,
    };
    Some((card, device))
}

fn status_is_busy(path: &Path) -> bool {
    match std::fs::read_to_string(path) {
        Ok(status) => status.trim() != "closed",
        Err(_) => false,
    }
}

impl AlsaBusyCheck for ProcAsound {
    fn is_busy(&self, device: &AlsaDevice) -> bool {
        let Some((card, pcm)) = parse_hw(&device.hw) else {
            tracing::warn!("Cannot parse ALSA device id {}", device.hw);
            return false;
        };
        let busy = status_is_busy(&self.status_path(card, pcm));
        if busy {
            tracing::info!("ALSA device {} ({}) is busy", device.name, device.hw);
        }
        busy
    }
}
