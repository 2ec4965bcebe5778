//! Host-side collaborators: the display surface and the UI configuration.
//!
//! The emulator core never talks to a real window; it drives a [`Display`]
//! trait object owned by the PPI and polls it for frame starts. The default
//! [`HeadlessDisplay`] keeps the framebuffer in memory and paces frames
//! against the wall clock, which is enough for firmware bring-up and tests.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

/// Host display surface fed RGB565 rows by the PPI.
pub trait Display: Send {
    /// Video output declared `width` pixels by `height` rows.
    fn initialize(&mut self, width: u32, height: u32);

    /// One row (or row fragment) of RGB565 pixels, `x`/`y` in elements.
    fn update_row(&mut self, x: u32, y: u32, pixels: &[u8]);

    /// Polled once per instruction step; returning true starts a new frame
    /// and pulses the PPI frame-sync pin.
    fn frame_started(&mut self) -> bool;
}

/// In-memory display with wall-clock frame pacing (~60 Hz).
pub struct HeadlessDisplay {
    width: u32,
    height: u32,
    framebuffer: Vec<u8>,
    rows_received: u64,
    last_frame: Instant,
    frame_interval: Duration,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            framebuffer: Vec::new(),
            rows_received: 0,
            last_frame: Instant::now(),
            frame_interval: Duration::from_micros(16_667),
        }
    }

    pub fn rows_received(&self) -> u64 {
        self.rows_received
    }
}

impl Default for HeadlessDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for HeadlessDisplay {
    fn initialize(&mut self, width: u32, height: u32) {
        info!(width, height, "display initialized");
        self.width = width;
        self.height = height;
        self.framebuffer = vec![0; (width * height * 2) as usize];
    }

    fn update_row(&mut self, x: u32, y: u32, pixels: &[u8]) {
        self.rows_received += 1;
        if y >= self.height {
            return;
        }
        let start = ((y * self.width + x) * 2) as usize;
        let end = (start + pixels.len()).min(self.framebuffer.len());
        if start < end {
            self.framebuffer[start..end].copy_from_slice(&pixels[..end - start]);
        }
    }

    fn frame_started(&mut self) -> bool {
        if self.last_frame.elapsed() >= self.frame_interval {
            self.last_frame = Instant::now();
            true
        } else {
            false
        }
    }
}

/// Errors loading or validating the UI configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read UI config: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed UI config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Pixel rectangle of the emulated screen inside the background image.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct DisplayRect {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

/// A mouse hot-spot mapped onto an expander pin `[bank, index]`.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct Button {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
    pub pin: [u8; 2],
}

fn default_scale() -> f32 {
    1.0
}

/// GUI layout description: background art, screen placement, and the input
/// maps routing host clicks/keys onto expander pins.
#[derive(Debug, Deserialize)]
pub struct UiConfig {
    pub background: String,
    #[serde(default = "default_scale")]
    pub scale: f32,
    pub display: DisplayRect,
    #[serde(default)]
    pub buttons: Vec<Button>,
    #[serde(default)]
    pub keycaps: HashMap<String, [u8; 2]>,
}

impl UiConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses() {
        let cfg: UiConfig = serde_json::from_str(
            r#"{
                "background": "op.png",
                "display": { "left": 248, "top": 132, "width": 652, "height": 378 }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.background, "op.png");
        assert_eq!(cfg.scale, 1.0);
        assert!(cfg.buttons.is_empty());
        assert!(cfg.keycaps.is_empty());
    }

    #[test]
    fn buttons_and_keycaps_parse() {
        let cfg: UiConfig = serde_json::from_str(
            r#"{
                "background": "op.png",
                "scale": 0.5,
                "display": { "left": 0, "top": 0, "width": 320, "height": 160 },
                "buttons": [
                    { "left": 10, "top": 20, "width": 30, "height": 30, "pin": [3, 4] }
                ],
                "keycaps": { "q": [0, 2], "w": [0, 3] }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.buttons[0].pin, [3, 4]);
        assert_eq!(cfg.keycaps["w"], [0, 3]);
    }

    #[test]
    fn malformed_config_is_an_error() {
        let err = serde_json::from_str::<UiConfig>(r#"{ "background": 3 }"#);
        assert!(err.is_err());
    }

    #[test]
    fn headless_display_collects_rows() {
        let mut d = HeadlessDisplay::new();
        d.initialize(320, 240);
        d.update_row(0, 0, &[0xAB; 640]);
        d.update_row(0, 239, &[0xCD; 640]);
        assert_eq!(d.rows_received(), 2);
        assert_eq!(d.framebuffer[0], 0xAB);
        // Out-of-range rows are dropped, not panicking.
        d.update_row(0, 240, &[0xEF; 640]);
        assert_eq!(d.rows_received(), 3);
    }
}
