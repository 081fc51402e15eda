//! Recording system module
//!
//! The session controller and everything it drives:
//! - ProcessSupervisor running one encoder process at a time
//! - SegmentManager collecting pause segments and merging them on stop
//! - AudioRouteManager for PulseAudio sources and the mix sink
//! - Crash archive and diagnostic log in the settings directory

pub mod alsa;
pub mod audio_route;
pub mod command;
pub mod config;
pub mod controls;
pub mod coordinator;
pub mod crash;
pub mod diagnostics;
pub mod error;
pub mod geometry;
pub mod progress;
pub mod segments;
pub mod state;
pub mod supervisor;
pub mod x11;

#[cfg(test)]
pub mod testing;

pub use config::{AudioMode, CaptureConfig, Container, Rect, RegionKind, ScreenSelection};
pub use coordinator::{SessionController, SessionEvent};
pub use error::{RecordingError, RecordingResult};
pub use state::{RecordingOutput, SessionState, SessionStatus};
