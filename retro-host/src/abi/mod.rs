//! retro-host ABI module
//!
//! This module defines the data-shape side of the contract between:
//! - **Host**: `retro-host` (the frontend)
//! - **Core**: a libretro shared library (emulator / game)
//!
//! ## Raw vs owned types
//! The `#[repr(C)]` structs that actually cross the boundary come from `libretro-sys`
//! (`GameInfo`, `SystemInfo`, `SystemAvInfo`, ...). They are full of raw pointers, so the
//! rest of the host works with the owned mirrors defined here:
//! - [`GameDescriptor`]: content handed to `retro_load_game`
//! - [`SystemDescriptor`]: static facts reported by `retro_get_system_info`
//! - [`AvTiming`]: geometry + timing reported by `retro_get_system_av_info`
//!
//! ## Identifiers
//! Device ids, joypad ids, environment opcodes and memory regions are kept as small enums
//! with `from_raw` conversions. Anything the host does not recognize maps to `None` (or an
//! `Unknown` variant) and is treated as a neutral value / decline by the layers above.
//!
//! ## ABI Stability
//! The ABI is versioned with a single integer. The host refuses cores that report a
//! different [`API_VERSION`].

use serde::Deserialize;
use std::ffi::{CStr, CString, c_char};
use std::path::{Path, PathBuf};

/// API version the host is built against.
pub const API_VERSION: u32 = 1;

/// Shared-library symbol names resolved by [`crate::loader::Core::open`].
pub mod symbols {
    pub const INIT: &str = "retro_init";
    pub const DEINIT: &str = "retro_deinit";
    pub const API_VERSION: &str = "retro_api_version";
    pub const GET_SYSTEM_INFO: &str = "retro_get_system_info";
    pub const GET_SYSTEM_AV_INFO: &str = "retro_get_system_av_info";
    pub const SET_ENVIRONMENT: &str = "retro_set_environment";
    pub const SET_VIDEO_REFRESH: &str = "retro_set_video_refresh";
    pub const SET_AUDIO_SAMPLE: &str = "retro_set_audio_sample";
    pub const SET_AUDIO_SAMPLE_BATCH: &str = "retro_set_audio_sample_batch";
    pub const SET_INPUT_POLL: &str = "retro_set_input_poll";
    pub const SET_INPUT_STATE: &str = "retro_set_input_state";
    pub const SET_CONTROLLER_PORT_DEVICE: &str = "retro_set_controller_port_device";
    pub const RESET: &str = "retro_reset";
    pub const RUN: &str = "retro_run";
    pub const LOAD_GAME: &str = "retro_load_game";
    pub const UNLOAD_GAME: &str = "retro_unload_game";

    // Optional: missing symbols turn the matching host operation into `Unsupported`.
    pub const SERIALIZE_SIZE: &str = "retro_serialize_size";
    pub const SERIALIZE: &str = "retro_serialize";
    pub const UNSERIALIZE: &str = "retro_unserialize";
    pub const GET_MEMORY_DATA: &str = "retro_get_memory_data";
    pub const GET_MEMORY_SIZE: &str = "retro_get_memory_size";
}

/// Video pixel formats a core may negotiate with `SET_PIXEL_FORMAT`.
///
/// Cores that never negotiate get [`PixelFormat::Xrgb1555`].
#[repr(u32)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 0RGB1555, native endian, 2 bytes per pixel.
    #[default]
    Xrgb1555 = 0,
    /// XRGB8888, native endian, 4 bytes per pixel.
    Xrgb8888 = 1,
    /// RGB565, native endian, 2 bytes per pixel.
    Rgb565 = 2,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Xrgb1555 | PixelFormat::Rgb565 => 2,
            PixelFormat::Xrgb8888 => 4,
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(PixelFormat::Xrgb1555),
            1 => Some(PixelFormat::Xrgb8888),
            2 => Some(PixelFormat::Rgb565),
            _ => None,
        }
    }
}

/// Mask selecting the base device class out of a (possibly subclassed) device id.
pub const DEVICE_TYPE_MASK: u32 = 0xff;

/// Logical input device classes.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum Device {
    None = 0,
    #[default]
    Joypad = 1,
    Mouse = 2,
    Keyboard = 3,
    Lightgun = 4,
    Analog = 5,
    Pointer = 6,
}

impl Device {
    /// Map a raw device id onto its base class; subclasses (`(n + 1) << 8 | base`) are folded.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw & DEVICE_TYPE_MASK {
            0 => Some(Device::None),
            1 => Some(Device::Joypad),
            2 => Some(Device::Mouse),
            3 => Some(Device::Keyboard),
            4 => Some(Device::Lightgun),
            5 => Some(Device::Analog),
            6 => Some(Device::Pointer),
            _ => None,
        }
    }
}

/// Joypad button ids used with [`Device::Joypad`].
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum JoypadButton {
    B = 0,
    Y = 1,
    Select = 2,
    Start = 3,
    Up = 4,
    Down = 5,
    Left = 6,
    Right = 7,
    A = 8,
    X = 9,
    L1 = 10,
    R1 = 11,
    L2 = 12,
    R2 = 13,
    L3 = 14,
    R3 = 15,
}

impl JoypadButton {
    pub const fn mask(self) -> u16 {
        1 << (self as u32)
    }
}

/// Joypad query id returning the whole button bitmask at once.
pub const JOYPAD_ID_MASK: u32 = 256;

/// Number of distinct joypad button ids.
pub const JOYPAD_BUTTONS: u32 = 16;

pub mod analog {
    pub const INDEX_LEFT: u32 = 0;
    pub const INDEX_RIGHT: u32 = 1;
    /// Analog values for digital buttons; `id` is a joypad button id.
    pub const INDEX_BUTTON: u32 = 2;
    pub const ID_X: u32 = 0;
    pub const ID_Y: u32 = 1;
}

pub mod mouse {
    pub const ID_X: u32 = 0;
    pub const ID_Y: u32 = 1;
    pub const ID_LEFT: u32 = 2;
    pub const ID_RIGHT: u32 = 3;
    pub const ID_WHEELUP: u32 = 4;
    pub const ID_WHEELDOWN: u32 = 5;
    pub const ID_MIDDLE: u32 = 6;
    pub const ID_BUTTON_4: u32 = 9;
    pub const ID_BUTTON_5: u32 = 10;
}

pub mod lightgun {
    pub const ID_TRIGGER: u32 = 2;
    pub const ID_AUX_A: u32 = 3;
    pub const ID_AUX_B: u32 = 4;
    pub const ID_START: u32 = 6;
    pub const ID_SELECT: u32 = 7;
    pub const ID_AUX_C: u32 = 8;
    pub const ID_SCREEN_X: u32 = 13;
    pub const ID_SCREEN_Y: u32 = 14;
    pub const ID_IS_OFFSCREEN: u32 = 15;
    pub const ID_RELOAD: u32 = 16;
}

pub mod pointer {
    pub const ID_X: u32 = 0;
    pub const ID_Y: u32 = 1;
    pub const ID_PRESSED: u32 = 2;
}

/// Mouse button bitmask stored in the input snapshot.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MouseButtons {
    Left = 1 << 0,
    Right = 1 << 1,
    Middle = 1 << 2,
    Button4 = 1 << 3,
    Button5 = 1 << 4,
    WheelUp = 1 << 5,
    WheelDown = 1 << 6,
}

/// Lightgun button bitmask stored in the input snapshot.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LightgunButtons {
    Trigger = 1 << 0,
    Reload = 1 << 1,
    Start = 1 << 2,
    Select = 1 << 3,
    AuxA = 1 << 4,
    AuxB = 1 << 5,
    AuxC = 1 << 6,
    Offscreen = 1 << 7,
}

/// Core memory regions reachable through `retro_get_memory_data/size`.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MemoryRegion {
    /// Battery-backed save RAM.
    SaveRam = 0,
    Rtc = 1,
    SystemRam = 2,
    VideoRam = 3,
}

/// Environment opcodes understood by the host.
///
/// Values are the libretro `RETRO_ENVIRONMENT_*` numbers; the experimental flag is stripped
/// before decoding.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum EnvCommand {
    SetRotation = 1,
    GetOverscan = 2,
    GetCanDupe = 3,
    SetMessage = 6,
    Shutdown = 7,
    SetPerformanceLevel = 8,
    GetSystemDirectory = 9,
    SetPixelFormat = 10,
    GetVariable = 15,
    SetVariables = 16,
    GetVariableUpdate = 17,
    SetSupportNoGame = 18,
    GetLibretroPath = 19,
    GetCoreAssetsDirectory = 30,
    GetSaveDirectory = 31,
    SetSystemAvInfo = 32,
    SetGeometry = 37,
    GetUsername = 38,
    GetLanguage = 39,
}

/// Flag OR'ed into opcodes the ABI considers experimental.
pub const ENVIRONMENT_EXPERIMENTAL: u32 = 0x10000;

impl EnvCommand {
    pub fn from_raw(raw: u32) -> Option<Self> {
        let cmd = match raw & !ENVIRONMENT_EXPERIMENTAL {
            1 => EnvCommand::SetRotation,
            2 => EnvCommand::GetOverscan,
            3 => EnvCommand::GetCanDupe,
            6 => EnvCommand::SetMessage,
            7 => EnvCommand::Shutdown,
            8 => EnvCommand::SetPerformanceLevel,
            9 => EnvCommand::GetSystemDirectory,
            10 => EnvCommand::SetPixelFormat,
            15 => EnvCommand::GetVariable,
            16 => EnvCommand::SetVariables,
            17 => EnvCommand::GetVariableUpdate,
            18 => EnvCommand::SetSupportNoGame,
            19 => EnvCommand::GetLibretroPath,
            30 => EnvCommand::GetCoreAssetsDirectory,
            31 => EnvCommand::GetSaveDirectory,
            32 => EnvCommand::SetSystemAvInfo,
            37 => EnvCommand::SetGeometry,
            38 => EnvCommand::GetUsername,
            39 => EnvCommand::GetLanguage,
            _ => return None,
        };
        Some(cmd)
    }
}

/// Game content handed to `retro_load_game`.
///
/// Built by the host right before the load call. The host keeps the buffer alive until the
/// game is unloaded, since cores are allowed to hold on to the pointer.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GameDescriptor {
    pub path: Option<PathBuf>,
    pub data: Option<Vec<u8>>,
    pub meta: Option<String>,
}

impl GameDescriptor {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    /// Read the file into memory as well, for cores that accept a buffer.
    pub fn with_contents(path: impl Into<PathBuf>, data: Vec<u8>) -> Self {
        Self {
            path: Some(path.into()),
            data: Some(data),
            meta: None,
        }
    }

    /// Buffer length, which is what the core sees as `size`.
    pub fn size(&self) -> usize {
        self.data.as_ref().map(Vec::len).unwrap_or(0)
    }

    /// True when neither a path nor a non-empty buffer is present.
    pub fn is_empty(&self) -> bool {
        self.path.is_none() && self.size() == 0
    }

    /// Lower-case extension of `path`, if any.
    pub fn extension(&self) -> Option<String> {
        self.path
            .as_ref()?
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
    }
}

/// Static facts about a core, as reported by `retro_get_system_info`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SystemDescriptor {
    pub library_name: String,
    pub library_version: String,
    /// `|`-separated extension list, e.g. `"sfc|smc"`.
    pub valid_extensions: String,
    /// The core cannot take an in-memory buffer, only a real path.
    pub need_fullpath: bool,
    /// Archives must be handed over untouched.
    pub block_extract: bool,
}

impl SystemDescriptor {
    /// Copy the raw struct into owned strings.
    ///
    /// # Safety
    /// The string pointers in `raw` must be null or valid NUL-terminated strings.
    pub unsafe fn from_raw(raw: &libretro_sys::SystemInfo) -> Self {
        // SAFETY: forwarded from the caller.
        unsafe {
            Self {
                library_name: cstr_lossy(raw.library_name).unwrap_or_default(),
                library_version: cstr_lossy(raw.library_version).unwrap_or_default(),
                valid_extensions: cstr_lossy(raw.valid_extensions).unwrap_or_default(),
                need_fullpath: raw.need_fullpath,
                block_extract: raw.block_extract,
            }
        }
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.valid_extensions
            .split('|')
            .map(str::trim)
            .filter(|ext| !ext.is_empty())
    }

    /// Classification only; a non-matching extension may still load.
    pub fn supports_extension(&self, ext: &str) -> bool {
        let ext = ext.trim_start_matches('.');
        self.extensions().any(|known| known.eq_ignore_ascii_case(ext))
    }
}

/// Frame geometry negotiated with the core.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Geometry {
    pub base_width: u32,
    pub base_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    /// Display aspect ratio; `<= 0.0` means "derive from base size".
    pub aspect_ratio: f32,
}

impl Geometry {
    pub fn from_raw(raw: &libretro_sys::GameGeometry) -> Self {
        Self {
            base_width: raw.base_width,
            base_height: raw.base_height,
            max_width: raw.max_width,
            max_height: raw.max_height,
            aspect_ratio: raw.aspect_ratio,
        }
    }

    pub fn fits_within_max(&self) -> bool {
        self.base_width <= self.max_width && self.base_height <= self.max_height
    }

    pub fn effective_aspect_ratio(&self) -> f32 {
        if self.aspect_ratio > 0.0 {
            self.aspect_ratio
        } else if self.base_height == 0 {
            0.0
        } else {
            self.base_width as f32 / self.base_height as f32
        }
    }
}

/// The negotiated output contract: geometry plus frame and sample rate.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct AvTiming {
    pub geometry: Geometry,
    pub fps: f64,
    pub sample_rate: f64,
}

impl AvTiming {
    pub fn from_raw(raw: &libretro_sys::SystemAvInfo) -> Self {
        Self {
            geometry: Geometry::from_raw(&raw.geometry),
            fps: raw.timing.fps,
            sample_rate: raw.timing.sample_rate,
        }
    }

    /// Check the descriptor invariants: base <= max, positive rates.
    pub fn validate(&self) -> Result<(), AvTimingViolation> {
        if !self.geometry.fits_within_max() {
            return Err(AvTimingViolation::BaseExceedsMax);
        }
        if !(self.fps > 0.0) {
            return Err(AvTimingViolation::NonPositiveFps);
        }
        if !(self.sample_rate > 0.0) {
            return Err(AvTimingViolation::NonPositiveSampleRate);
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum AvTimingViolation {
    #[error("base geometry exceeds max geometry")]
    BaseExceedsMax,
    #[error("frame rate is not positive")]
    NonPositiveFps,
    #[error("sample rate is not positive")]
    NonPositiveSampleRate,
}

/// Path as a C string, byte for byte on Unix. `None` if it contains a NUL.
pub fn path_to_cstring(path: &Path) -> Option<CString> {
    #[cfg(unix)]
    let bytes = {
        use std::os::unix::ffi::OsStrExt;
        path.as_os_str().as_bytes().to_vec()
    };
    #[cfg(not(unix))]
    let bytes = path.to_string_lossy().into_owned().into_bytes();
    CString::new(bytes).ok()
}

/// Copy a C string into an owned `String`, replacing invalid UTF-8.
///
/// # Safety
/// `ptr` must be null or point to a valid NUL-terminated string.
pub(crate) unsafe fn cstr_lossy(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: checked for null; validity is the caller's contract.
    let s = unsafe { CStr::from_ptr(ptr) };
    Some(s.to_string_lossy().into_owned())
}
