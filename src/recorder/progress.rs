//! Encoder diagnostic stream parsing
//!
//! FFmpeg writes its progress lines (`frame= 123 fps= 25 q=... size= ...`)
//! to stderr, separated by carriage returns. The supervisor feeds every
//! chunk it reads through here.

use std::time::Duration;

/// Value following `key`, skipping leading whitespace, up to the next
/// whitespace. Uses the last occurrence so the newest progress line wins.
pub fn last_value<'a>(chunk: &'a str, key: &str) -> Option<&'a str> {
    let start = chunk.rfind(key)?;
    let after_key = &chunk[start + key.len()..];
    let value_start = after_key.find(|c: char| !c.is_whitespace()).unwrap_or(after_key.len());
    let value_part = &after_key[value_start..];
    let end = value_part.find(char::is_whitespace).unwrap_or(value_part.len());
    let value = &value_part[..end];
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Most recent `fps=` reading in a chunk
pub fn parse_fps(chunk: &str) -> Option<f32> {
    last_value(chunk, "fps=")?.parse().ok()
}

/// `hh:mm:ss` for the status bar
pub fn format_elapsed(elapsed: Duration) -> String {
    let s = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", s / 3600, (s % 3600) / 60, s % 60)
}
