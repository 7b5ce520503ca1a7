//! Environment negotiation.
//!
//! The core calls a single `environment(cmd, data) -> bool` callback for every capability
//! query or request. Here the raw `(cmd, void*)` pair is turned into a typed
//! [`EnvRequest`], answered by [`Environment::handle`], and the [`EnvResponse`] is written
//! back through the payload pointer.
//!
//! Rules:
//! - Every opcode is either satisfied or explicitly declined (`false`); unknown opcodes and
//!   malformed payloads are declined, never treated as fatal.
//! - Strings handed to the core (directories, option values, username) are owned by the
//!   [`Environment`] and stay valid until it is dropped or the answer changes.
//! - The callback can arrive at any time after `set_environment`, including from inside
//!   `retro_init` and `retro_run`; it only borrows the environment cell of the active
//!   [`crate::state::HostContext`].

pub mod variables;

use crate::abi::{AvTiming, EnvCommand, Geometry, PixelFormat, cstr_lossy, path_to_cstring};
use crate::config::HostConfig;
use crate::state;
use std::collections::BTreeMap;
use std::ffi::{CStr, CString, c_char, c_uint, c_void};
use std::path::Path;
use variables::{VariableDefinition, Variables};

/// A decoded environment call.
#[derive(Clone, Debug, PartialEq)]
pub enum EnvRequest {
    SetRotation(u32),
    GetOverscan,
    GetCanDupe,
    SetMessage { text: String, frames: u32 },
    Shutdown,
    SetPerformanceLevel(u32),
    GetSystemDirectory,
    /// `None` when the core asked for a format value the ABI does not define.
    SetPixelFormat(Option<PixelFormat>),
    GetVariable { key: String },
    SetVariables(Vec<VariableDefinition>),
    GetVariableUpdate,
    SetSupportNoGame(bool),
    GetLibretroPath,
    GetCoreAssetsDirectory,
    GetSaveDirectory,
    SetSystemAvInfo(AvTiming),
    SetGeometry(Geometry),
    GetUsername,
    GetLanguage,
    /// Known opcode whose payload pointer was null.
    Malformed(EnvCommand),
    /// Opcode the host does not implement.
    Unsupported(u32),
}

/// Host answer to an [`EnvRequest`].
#[derive(Clone, Debug, PartialEq)]
pub enum EnvResponse<'a> {
    Declined,
    Accepted,
    Flag(bool),
    Unsigned(u32),
    Text(&'a CStr),
}

/// `SET_MESSAGE` payload, kept for the frontend to display.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoreMessage {
    pub text: String,
    /// How many frames the core wants it shown for.
    pub frames: u32,
}

/// Negotiation state for one host.
#[derive(Debug)]
pub struct Environment {
    system_dir: Option<CString>,
    save_dir: Option<CString>,
    core_assets_dir: Option<CString>,
    libretro_path: Option<CString>,
    username: Option<CString>,
    language: u32,
    overscan: bool,
    can_dupe: bool,
    allowed_formats: Vec<PixelFormat>,

    pixel_format: PixelFormat,
    rotation: u32,
    performance_level: Option<u32>,
    support_no_game: bool,
    variables: Variables,
    av_timing: Option<AvTiming>,
    av_timing_changed: bool,
    messages: Vec<CoreMessage>,
    shutdown_requested: bool,
}

impl Environment {
    pub fn new(config: &HostConfig, libretro_path: Option<&Path>) -> Self {
        Self {
            system_dir: config.paths.system_dir.as_deref().and_then(path_cstring),
            save_dir: config.paths.save_dir.as_deref().and_then(path_cstring),
            core_assets_dir: config.paths.core_assets_dir.as_deref().and_then(path_cstring),
            libretro_path: libretro_path.and_then(path_cstring),
            username: config
                .username
                .as_deref()
                .and_then(|name| CString::new(name).ok()),
            language: config.language,
            overscan: config.video.overscan,
            can_dupe: config.video.allow_dupe,
            allowed_formats: config.video.allowed_formats.clone(),

            pixel_format: PixelFormat::default(),
            rotation: 0,
            performance_level: None,
            support_no_game: false,
            variables: Variables::with_overrides(config.core_options.clone()),
            av_timing: None,
            av_timing_changed: false,
            messages: Vec::new(),
            shutdown_requested: false,
        }
    }

    /// Answer one request.
    pub fn handle(&mut self, request: EnvRequest) -> EnvResponse<'_> {
        match request {
            EnvRequest::SetRotation(rotation) if rotation < 4 => {
                self.rotation = rotation;
                EnvResponse::Accepted
            }
            EnvRequest::SetRotation(_) => EnvResponse::Declined,
            EnvRequest::GetOverscan => EnvResponse::Flag(self.overscan),
            EnvRequest::GetCanDupe => EnvResponse::Flag(self.can_dupe),
            EnvRequest::SetMessage { text, frames } => {
                log::info!("core message: {text}");
                self.messages.push(CoreMessage { text, frames });
                EnvResponse::Accepted
            }
            EnvRequest::Shutdown => {
                log::info!("core requested shutdown");
                self.shutdown_requested = true;
                EnvResponse::Accepted
            }
            EnvRequest::SetPerformanceLevel(level) => {
                log::debug!("core performance level: {level}");
                self.performance_level = Some(level);
                EnvResponse::Accepted
            }
            EnvRequest::GetSystemDirectory => text_or_decline(self.system_dir.as_deref()),
            EnvRequest::GetSaveDirectory => text_or_decline(self.save_dir.as_deref()),
            EnvRequest::GetCoreAssetsDirectory => text_or_decline(self.core_assets_dir.as_deref()),
            EnvRequest::GetLibretroPath => text_or_decline(self.libretro_path.as_deref()),
            EnvRequest::GetUsername => text_or_decline(self.username.as_deref()),
            EnvRequest::GetLanguage => EnvResponse::Unsigned(self.language),
            EnvRequest::SetPixelFormat(Some(format)) if self.allowed_formats.contains(&format) => {
                log::debug!("core set pixel format {format:?}");
                self.pixel_format = format;
                EnvResponse::Accepted
            }
            EnvRequest::SetPixelFormat(format) => {
                log::info!("declining pixel format {format:?}");
                EnvResponse::Declined
            }
            EnvRequest::GetVariable { key } => match self.variables.answer(&key) {
                Some(value) => EnvResponse::Text(value),
                None => EnvResponse::Declined,
            },
            EnvRequest::SetVariables(definitions) => {
                log::debug!("core declared {} options", definitions.len());
                self.variables.define(definitions);
                EnvResponse::Accepted
            }
            EnvRequest::GetVariableUpdate => EnvResponse::Flag(self.variables.take_dirty()),
            EnvRequest::SetSupportNoGame(supported) => {
                self.support_no_game = supported;
                EnvResponse::Accepted
            }
            EnvRequest::SetSystemAvInfo(timing) => match timing.validate() {
                Ok(()) => {
                    self.av_timing = Some(timing);
                    self.av_timing_changed = true;
                    EnvResponse::Accepted
                }
                Err(violation) => {
                    log::warn!("declining SET_SYSTEM_AV_INFO: {violation}");
                    EnvResponse::Declined
                }
            },
            EnvRequest::SetGeometry(geometry) => self.apply_geometry(geometry),
            EnvRequest::Malformed(cmd) => {
                log::warn!("declining {cmd:?}: null payload");
                EnvResponse::Declined
            }
            EnvRequest::Unsupported(cmd) => {
                log::trace!("declining unsupported environment opcode {cmd}");
                EnvResponse::Declined
            }
        }
    }

    /// Only the base size and aspect ratio may change; max stays as negotiated.
    fn apply_geometry(&mut self, geometry: Geometry) -> EnvResponse<'static> {
        let Some(timing) = self.av_timing.as_mut() else {
            return EnvResponse::Declined;
        };
        let current = &mut timing.geometry;
        if geometry.base_width > current.max_width || geometry.base_height > current.max_height {
            log::warn!(
                "declining SET_GEOMETRY {}x{}: exceeds max {}x{}",
                geometry.base_width,
                geometry.base_height,
                current.max_width,
                current.max_height
            );
            return EnvResponse::Declined;
        }
        current.base_width = geometry.base_width;
        current.base_height = geometry.base_height;
        current.aspect_ratio = geometry.aspect_ratio;
        self.av_timing_changed = true;
        EnvResponse::Accepted
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn rotation(&self) -> u32 {
        self.rotation
    }

    pub fn performance_level(&self) -> Option<u32> {
        self.performance_level
    }

    pub fn supports_no_game(&self) -> bool {
        self.support_no_game
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut Variables {
        &mut self.variables
    }

    pub fn av_timing(&self) -> Option<AvTiming> {
        self.av_timing
    }

    pub(crate) fn set_av_timing(&mut self, timing: Option<AvTiming>) {
        self.av_timing = timing;
        self.av_timing_changed = false;
    }

    /// Report and clear "the core changed its AV timing / geometry".
    pub fn take_av_timing_changed(&mut self) -> bool {
        std::mem::take(&mut self.av_timing_changed)
    }

    pub fn take_messages(&mut self) -> Vec<CoreMessage> {
        std::mem::take(&mut self.messages)
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }
}

fn text_or_decline(value: Option<&CStr>) -> EnvResponse<'_> {
    value.map(EnvResponse::Text).unwrap_or(EnvResponse::Declined)
}

fn path_cstring(path: &Path) -> Option<CString> {
    let value = path_to_cstring(path);
    if value.is_none() {
        log::warn!("path {} contains a NUL byte; ignoring", path.display());
    }
    value
}

/// Read a `T` out of a payload pointer.
///
/// # Safety
/// `data` must be null or point to a readable `T`.
unsafe fn read<T>(data: *mut c_void) -> Option<T> {
    if data.is_null() {
        return None;
    }
    // SAFETY: non-null, validity is the caller's contract.
    Some(unsafe { (data as *const T).read_unaligned() })
}

/// Decode a raw environment call.
///
/// # Safety
/// `data` must match the payload shape libretro defines for `cmd` (or be null).
pub(crate) unsafe fn decode(cmd: c_uint, data: *mut c_void) -> EnvRequest {
    let Some(command) = EnvCommand::from_raw(cmd) else {
        return EnvRequest::Unsupported(cmd);
    };

    // SAFETY (all arms): payload shape per opcode is the caller's contract.
    let request = unsafe {
        match command {
            EnvCommand::SetRotation => read::<c_uint>(data).map(EnvRequest::SetRotation),
            EnvCommand::GetOverscan => Some(EnvRequest::GetOverscan),
            EnvCommand::GetCanDupe => Some(EnvRequest::GetCanDupe),
            EnvCommand::SetMessage => {
                read::<libretro_sys::Message>(data).map(|message| EnvRequest::SetMessage {
                    text: cstr_lossy(message.msg).unwrap_or_default(),
                    frames: message.frames,
                })
            }
            EnvCommand::Shutdown => Some(EnvRequest::Shutdown),
            EnvCommand::SetPerformanceLevel => {
                read::<c_uint>(data).map(EnvRequest::SetPerformanceLevel)
            }
            EnvCommand::GetSystemDirectory => Some(EnvRequest::GetSystemDirectory),
            EnvCommand::SetPixelFormat => read::<c_uint>(data)
                .map(|raw| EnvRequest::SetPixelFormat(PixelFormat::from_raw(raw))),
            EnvCommand::GetVariable => read::<libretro_sys::Variable>(data)
                .and_then(|variable| cstr_lossy(variable.key))
                .map(|key| EnvRequest::GetVariable { key }),
            EnvCommand::SetVariables => {
                (!data.is_null()).then(|| EnvRequest::SetVariables(decode_variables(data)))
            }
            EnvCommand::GetVariableUpdate => Some(EnvRequest::GetVariableUpdate),
            EnvCommand::SetSupportNoGame => read::<bool>(data).map(EnvRequest::SetSupportNoGame),
            EnvCommand::GetLibretroPath => Some(EnvRequest::GetLibretroPath),
            EnvCommand::GetCoreAssetsDirectory => Some(EnvRequest::GetCoreAssetsDirectory),
            EnvCommand::GetSaveDirectory => Some(EnvRequest::GetSaveDirectory),
            EnvCommand::SetSystemAvInfo => (!data.is_null()).then(|| {
                EnvRequest::SetSystemAvInfo(AvTiming::from_raw(
                    &*(data as *const libretro_sys::SystemAvInfo),
                ))
            }),
            EnvCommand::SetGeometry => (!data.is_null()).then(|| {
                EnvRequest::SetGeometry(Geometry::from_raw(
                    &*(data as *const libretro_sys::GameGeometry),
                ))
            }),
            EnvCommand::GetUsername => Some(EnvRequest::GetUsername),
            EnvCommand::GetLanguage => Some(EnvRequest::GetLanguage),
        }
    };

    request.unwrap_or(EnvRequest::Malformed(command))
}

/// Walk a `{ key, value }` array terminated by a null key.
///
/// # Safety
/// `data` must point to such an array.
unsafe fn decode_variables(data: *mut c_void) -> Vec<VariableDefinition> {
    let mut definitions = Vec::new();
    let mut entry = data as *const libretro_sys::Variable;
    loop {
        // SAFETY: the array is terminated by an entry with a null key.
        let variable = unsafe { &*entry };
        if variable.key.is_null() {
            break;
        }
        // SAFETY: keys and values are NUL-terminated strings.
        let (key, value) = unsafe { (cstr_lossy(variable.key), cstr_lossy(variable.value)) };
        match (key, value) {
            (Some(key), Some(value)) => match VariableDefinition::parse(&key, &value) {
                Some(definition) => definitions.push(definition),
                None => log::warn!("core option {key} has malformed declaration {value:?}"),
            },
            (Some(key), None) => log::warn!("core option {key} has no declaration"),
            _ => {}
        }
        // SAFETY: still inside the terminated array.
        entry = unsafe { entry.add(1) };
    }
    definitions
}

/// Write a response back through the payload pointer. Returns the callback's result.
///
/// # Safety
/// `data` must match the payload shape libretro defines for `cmd` (or be null).
pub(crate) unsafe fn write_back(cmd: c_uint, data: *mut c_void, response: EnvResponse<'_>) -> bool {
    let command = EnvCommand::from_raw(cmd);

    // SAFETY (all arms): payload shape per opcode is the caller's contract.
    unsafe {
        match response {
            EnvResponse::Declined => {
                if command == Some(EnvCommand::GetVariable) && !data.is_null() {
                    (*(data as *mut libretro_sys::Variable)).value = std::ptr::null();
                }
                false
            }
            EnvResponse::Accepted => true,
            _ if data.is_null() => false,
            EnvResponse::Flag(value) => {
                (data as *mut bool).write_unaligned(value);
                true
            }
            EnvResponse::Unsigned(value) => {
                (data as *mut c_uint).write_unaligned(value);
                true
            }
            EnvResponse::Text(value) => {
                if command == Some(EnvCommand::GetVariable) {
                    (*(data as *mut libretro_sys::Variable)).value = value.as_ptr();
                } else {
                    (data as *mut *const c_char).write_unaligned(value.as_ptr());
                }
                true
            }
        }
    }
}

/// `retro_environment_t` installed into the core.
pub(crate) extern "C" fn environment_callback(cmd: c_uint, data: *mut c_void) -> bool {
    // SAFETY: the core passes the payload shape libretro defines for `cmd`.
    let request = unsafe { decode(cmd, data) };

    state::with_active(|ctx| {
        let Ok(mut environment) = ctx.environment.try_borrow_mut() else {
            log::warn!("reentrant environment call {cmd} declined");
            return false;
        };
        let response = environment.handle(request);
        // SAFETY: as above.
        unsafe { write_back(cmd, data, response) }
    })
    .unwrap_or_else(|| {
        log::warn!("environment call {cmd} with no active host; declined");
        false
    })
}

/// Overrides handed to [`Variables::with_overrides`] by tests and tools.
pub fn overrides<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect()
}
