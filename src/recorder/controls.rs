//! Front-end control enablement
//!
//! Which controls a front end should offer is a pure function of the
//! session state, the audio selection and whether the output is a GIF.

use super::config::AudioMode;
use super::state::SessionState;
use serde::{Deserialize, Serialize};

/// Tray icon variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrayIcon {
    #[default]
    Idle,
    CountingDown,
    Recording,
    Paused,
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Controls {
    pub record: bool,
    pub pause: bool,
    /// Resume after a pause
    pub go: bool,
    pub stop: bool,
    /// Open the last recording in a player
    pub play: bool,
    pub region_select: bool,
    pub audio_select: bool,
    /// Audio codec options only apply when something is recorded
    pub audio_options: bool,
    pub video_options: bool,
    pub tray: TrayIcon,
}

pub fn controls(state: SessionState, audio: &AudioMode, is_gif: bool) -> Controls {
    match state {
        SessionState::Idle => Controls {
            record: true,
            play: true,
            region_select: true,
            audio_select: !is_gif,
            audio_options: !is_gif && !audio.is_off(),
            video_options: true,
            ..Controls::default()
        },
        SessionState::CountingDown => Controls {
            tray: TrayIcon::CountingDown,
            ..Controls::default()
        },
        SessionState::Recording => Controls {
            pause: !is_gif,
            stop: true,
            tray: TrayIcon::Recording,
            ..Controls::default()
        },
        SessionState::Paused => Controls {
            go: true,
            tray: TrayIcon::Paused,
            ..Controls::default()
        },
        SessionState::Stopping | SessionState::Crashed => Controls {
            tray: TrayIcon::Busy,
            ..Controls::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle() {
        let c = controls(SessionState::Idle, &AudioMode::Off, false);
        assert!(c.record && c.play && c.region_select && c.video_options);
        assert!(!c.pause && !c.stop && !c.go);
        assert!(!c.audio_options);
        assert_eq!(c.tray, TrayIcon::Idle);
    }

    #[test]
    fn test_audio_options_follow_selection() {
        let pulse = AudioMode::Pulse {
            sources: vec!["mic".to_string()],
        };
        assert!(controls(SessionState::Idle, &pulse, false).audio_options);
        let gif = controls(SessionState::Idle, &pulse, true);
        assert!(!gif.audio_options && !gif.audio_select);
    }

    #[test]
    fn test_recording_gif_cannot_pause() {
        assert!(controls(SessionState::Recording, &AudioMode::Off, false).pause);
        let gif = controls(SessionState::Recording, &AudioMode::Off, true);
        assert!(!gif.pause);
        assert!(gif.stop);
    }

    #[test]
    fn test_paused_disables_stop() {
        let c = controls(SessionState::Paused, &AudioMode::Off, false);
        assert!(c.go);
        assert!(!c.stop && !c.record && !c.pause);
        assert_eq!(c.tray, TrayIcon::Paused);
    }

    #[test]
    fn test_busy_states_disable_everything() {
        for state in [SessionState::CountingDown, SessionState::Stopping, SessionState::Crashed] {
            let c = controls(state, &AudioMode::Off, false);
            assert!(!c.record && !c.pause && !c.go && !c.stop && !c.play);
        }
    }
}
