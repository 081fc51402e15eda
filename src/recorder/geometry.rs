//! Capture geometry
//!
//! Resolves a [`RegionKind`] into pixel bounds. Screen and window queries go
//! through the [`GeometryProvider`] seam; the X11 implementation lives in
//! [`super::x11`].

use super::config::{Rect, RegionKind, ScreenSelection};
use super::error::{RecordingError, RecordingResult};
use async_trait::async_trait;

/// Bounds of a resolved window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGeometry {
    pub id: u64,
    pub rect: Rect,
}

/// Source of screen and window bounds
#[async_trait]
pub trait GeometryProvider: Send + Sync {
    /// Attached screens in X order
    async fn screens(&self) -> RecordingResult<Vec<Rect>>;

    /// Resolve a window; `None` waits for the user to pick one
    async fn resolve_window(&self, id: Option<u64>) -> RecordingResult<WindowGeometry>;

    /// Current bounds of a known window
    async fn window_geometry(&self, id: u64) -> RecordingResult<Rect>;
}

/// Bounds for fullscreen capture.
///
/// `All` spans every screen: the sum of their widths by the tallest height,
/// anchored at the origin.
pub fn fullscreen_rect(screens: &[Rect], selection: ScreenSelection) -> RecordingResult<Rect> {
    if screens.is_empty() {
        return Err(RecordingError::Geometry("no screens found".to_string()));
    }
    match selection {
        ScreenSelection::All => {
            let width = screens.iter().map(|s| s.width).sum();
            let height = screens.iter().map(|s| s.height).max().unwrap_or(0);
            Ok(Rect::new(0, 0, width, height))
        }
        ScreenSelection::Screen(index) => screens
            .get(index as usize)
            .copied()
            .ok_or_else(|| RecordingError::Geometry(format!("screen {} does not exist", index))),
    }
}

/// Geometry of a region plus the window it belongs to, if any
pub async fn resolve_region(
    provider: &dyn GeometryProvider,
    region: &RegionKind,
) -> RecordingResult<(Rect, Option<u64>)> {
    match region {
        RegionKind::Fullscreen { screen } => {
            let screens = provider.screens().await?;
            Ok((fullscreen_rect(&screens, *screen)?, None))
        }
        RegionKind::Window { id } => {
            let window = provider.resolve_window(*id).await?;
            tracing::info!("Window {:#x} at {:?}", window.id, window.rect);
            Ok((window.rect, Some(window.id)))
        }
        RegionKind::Area { rect } => Ok((*rect, None)),
    }
}
