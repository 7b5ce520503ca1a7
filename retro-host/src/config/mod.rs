//! Host configuration.
//!
//! Read from a TOML file; every section and key is optional and falls back to the defaults
//! below. Command line flags (see `main.rs`) are applied on top of the file afterwards.
//!
//! ```toml
//! language = 0
//! username = "player"
//!
//! [paths]
//! system_dir = "system"
//! save_dir = "saves"
//!
//! [video]
//! allowed_formats = ["rgb565", "xrgb8888"]
//!
//! [audio]
//! pending_frames = 8192
//!
//! [frontend]
//! fast_forward_multiplier = 3
//!
//! [core_options]
//! pcsx_rearmed_dithering = "disabled"
//! ```

use crate::abi::PixelFormat;
use anyhow::Context;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub paths: PathsConfig,
    pub video: VideoConfig,
    pub audio: AudioConfig,
    pub input: InputConfig,
    pub frontend: FrontendConfig,
    /// Answers to `GET_VARIABLE`, keyed by core option name. Values that are not one of the
    /// option's declared choices are ignored in favour of the core's default.
    pub core_options: BTreeMap<String, String>,
    pub username: Option<String>,
    /// `RETRO_LANGUAGE_*` value; 0 is English.
    pub language: u32,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// BIOS / firmware directory (`GET_SYSTEM_DIRECTORY`).
    pub system_dir: Option<PathBuf>,
    /// Battery saves (`GET_SAVE_DIRECTORY`); the frontend also syncs save RAM here.
    pub save_dir: Option<PathBuf>,
    pub core_assets_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Formats accepted from `SET_PIXEL_FORMAT`.
    pub allowed_formats: Vec<PixelFormat>,
    /// Answer to `GET_OVERSCAN`.
    pub overscan: bool,
    /// Answer to `GET_CAN_DUPE`.
    pub allow_dupe: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            allowed_formats: vec![
                PixelFormat::Xrgb1555,
                PixelFormat::Xrgb8888,
                PixelFormat::Rgb565,
            ],
            overscan: false,
            allow_dupe: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Stereo frames the host holds back when the audio sink is saturated.
    pub pending_frames: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            pending_frames: 8192,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub max_ports: u32,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { max_ports: 8 }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FrontendConfig {
    /// Frames run per tick while fast-forwarding.
    pub fast_forward_multiplier: u32,
    /// Refresh rate of the output device the pacing loop targets.
    pub display_hz: f64,
    /// Cores running faster than this get their audio rate scaled down to `display_hz`.
    pub audio_rate_fps_threshold: f64,
    /// Keep running frames as fast as possible instead of sleeping to the core's rate.
    pub unthrottled: bool,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            fast_forward_multiplier: 3,
            display_hz: 60.0,
            audio_rate_fps_threshold: 60.05,
            unthrottled: false,
        }
    }
}

impl HostConfig {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("invalid host configuration")
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::from_toml_str(&text)
            .with_context(|| format!("in config file {}", path.display()))?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn allows_pixel_format(&self, format: PixelFormat) -> bool {
        self.video.allowed_formats.contains(&format)
    }
}
