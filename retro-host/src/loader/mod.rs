//! Core loader.
//!
//! Responsibilities:
//! - Resolve the `retro_*` entry points of a core into a [`CoreSymbols`] table.
//! - Keep the backing shared library alive for as long as the table is in use.
//!
//! Two ways to obtain a [`Core`]:
//! - [`Core::open`]: `dlopen` a shared library via `libloading`.
//! - [`Core::from_symbols`]: wrap `extern "C"` functions linked into the current binary
//!   (statically linked cores, and the mock cores used by the integration tests).
//!
//! Nothing here enforces call ordering; that is the job of [`crate::host::CoreHost`].

use crate::abi::symbols;
use crate::error::{HostError, HostResult};
use libloading::Library;
use libretro_sys::{
    AudioSampleBatchFn, AudioSampleFn, EnvironmentFn, GameInfo, InputPollFn, InputStateFn,
    SystemAvInfo, SystemInfo, VideoRefreshFn,
};
use std::ffi::{c_uint, c_void};
use std::path::{Path, PathBuf};

/// Entry points of a core. Function pointers are `Copy`, so the table is too.
#[derive(Copy, Clone)]
pub struct CoreSymbols {
    pub init: unsafe extern "C" fn(),
    pub deinit: unsafe extern "C" fn(),
    pub api_version: unsafe extern "C" fn() -> c_uint,
    pub get_system_info: unsafe extern "C" fn(info: *mut SystemInfo),
    pub get_system_av_info: unsafe extern "C" fn(info: *mut SystemAvInfo),
    pub set_environment: unsafe extern "C" fn(callback: EnvironmentFn),
    pub set_video_refresh: unsafe extern "C" fn(callback: VideoRefreshFn),
    pub set_audio_sample: unsafe extern "C" fn(callback: AudioSampleFn),
    pub set_audio_sample_batch: unsafe extern "C" fn(callback: AudioSampleBatchFn),
    pub set_input_poll: unsafe extern "C" fn(callback: InputPollFn),
    pub set_input_state: unsafe extern "C" fn(callback: InputStateFn),
    pub set_controller_port_device: unsafe extern "C" fn(port: c_uint, device: c_uint),
    pub reset: unsafe extern "C" fn(),
    pub run: unsafe extern "C" fn(),
    pub load_game: unsafe extern "C" fn(game: *const GameInfo) -> bool,
    pub unload_game: unsafe extern "C" fn(),
    pub optional: OptionalSymbols,
}

/// Entry points a core may leave out.
#[derive(Copy, Clone, Default)]
pub struct OptionalSymbols {
    pub serialize_size: Option<unsafe extern "C" fn() -> usize>,
    pub serialize: Option<unsafe extern "C" fn(data: *mut c_void, size: usize) -> bool>,
    pub unserialize: Option<unsafe extern "C" fn(data: *const c_void, size: usize) -> bool>,
    pub get_memory_data: Option<unsafe extern "C" fn(id: c_uint) -> *mut c_void>,
    pub get_memory_size: Option<unsafe extern "C" fn(id: c_uint) -> usize>,
}

/// A bound core: its symbol table plus whatever keeps the code mapped.
pub struct Core {
    symbols: CoreSymbols,
    path: Option<PathBuf>,
    // Must outlive every call through `symbols`; dropped last.
    _library: Option<Library>,
}

impl Core {
    /// Load a core from a shared library and resolve its entry points.
    pub fn open(path: impl AsRef<Path>) -> HostResult<Self> {
        let path = path.as_ref();
        log::debug!("opening core library {}", path.display());

        // SAFETY: loading a library runs its initializers; a libretro core is trusted code.
        let library = unsafe { Library::new(path) }.map_err(HostError::Library)?;

        let symbols = CoreSymbols {
            init: required(&library, symbols::INIT)?,
            deinit: required(&library, symbols::DEINIT)?,
            api_version: required(&library, symbols::API_VERSION)?,
            get_system_info: required(&library, symbols::GET_SYSTEM_INFO)?,
            get_system_av_info: required(&library, symbols::GET_SYSTEM_AV_INFO)?,
            set_environment: required(&library, symbols::SET_ENVIRONMENT)?,
            set_video_refresh: required(&library, symbols::SET_VIDEO_REFRESH)?,
            set_audio_sample: required(&library, symbols::SET_AUDIO_SAMPLE)?,
            set_audio_sample_batch: required(&library, symbols::SET_AUDIO_SAMPLE_BATCH)?,
            set_input_poll: required(&library, symbols::SET_INPUT_POLL)?,
            set_input_state: required(&library, symbols::SET_INPUT_STATE)?,
            set_controller_port_device: required(&library, symbols::SET_CONTROLLER_PORT_DEVICE)?,
            reset: required(&library, symbols::RESET)?,
            run: required(&library, symbols::RUN)?,
            load_game: required(&library, symbols::LOAD_GAME)?,
            unload_game: required(&library, symbols::UNLOAD_GAME)?,
            optional: OptionalSymbols {
                serialize_size: optional(&library, symbols::SERIALIZE_SIZE),
                serialize: optional(&library, symbols::SERIALIZE),
                unserialize: optional(&library, symbols::UNSERIALIZE),
                get_memory_data: optional(&library, symbols::GET_MEMORY_DATA),
                get_memory_size: optional(&library, symbols::GET_MEMORY_SIZE),
            },
        };

        Ok(Self {
            symbols,
            path: Some(path.to_path_buf()),
            _library: Some(library),
        })
    }

    /// Wrap entry points that are already linked into this binary.
    pub fn from_symbols(symbols: CoreSymbols) -> Self {
        Self {
            symbols,
            path: None,
            _library: None,
        }
    }

    pub fn symbols(&self) -> &CoreSymbols {
        &self.symbols
    }

    /// Filesystem path of the library, when loaded with [`Core::open`].
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn required<T: Copy>(library: &Library, name: &'static str) -> HostResult<T> {
    // SAFETY: `T` is the documented libretro signature for `name`.
    let symbol = unsafe { library.get::<T>(name.as_bytes()) }
        .map_err(|source| HostError::MissingSymbol { name, source })?;
    Ok(*symbol)
}

fn optional<T: Copy>(library: &Library, name: &'static str) -> Option<T> {
    // SAFETY: see `required`.
    match unsafe { library.get::<T>(name.as_bytes()) } {
        Ok(symbol) => Some(*symbol),
        Err(_) => {
            log::debug!("core does not export optional symbol {name}");
            None
        }
    }
}
