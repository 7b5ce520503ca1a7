//! Core lifecycle.
//!
//! [`CoreHost`] owns one bound [`Core`] plus the host-side context the callbacks route to,
//! and enforces the libretro call ordering:
//!
//! ```text
//! Unloaded -> Initialized -> Configured -> GameLoaded -> Running <-> Paused
//!                                ^              |           |          |
//!                                +--------------+-----------+----------+  (unload_game)
//! any state -> Deinitialized (deinit); Deinitialized -> Initialized (init)
//! ```
//!
//! Calls that are not valid in the current state are rejected with
//! [`HostError::InvalidState`] before anything reaches the core. Every call into the core is
//! made with this host's context active on the current thread (see [`crate::state`]).

use crate::abi::{
    API_VERSION, AvTiming, Device, GameDescriptor, MemoryRegion, PixelFormat, SystemDescriptor,
    path_to_cstring,
};
use crate::av::audio::{self, AudioSink};
use crate::av::video::{self, VideoFrame, VideoPipeline, VideoSink};
use crate::av::AudioPipeline;
use crate::config::HostConfig;
use crate::environment::variables::VariableDefinition;
use crate::environment::{self, CoreMessage, Environment};
use crate::error::{HostError, HostResult, LoadError};
use crate::input::{self, InputSampler, InputSource};
use crate::loader::{Core, CoreSymbols};
use crate::state::{self, HostContext};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ffi::{CString, c_void};
use std::mem::MaybeUninit;
use std::path::Path;
use std::ptr;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum HostState {
    /// Core bound, `retro_init` not called yet.
    Unloaded,
    /// `retro_init` done; some callback slots are still empty.
    Initialized,
    /// Every callback slot is filled; ready to load content.
    Configured,
    /// Content loaded, no frame run since.
    GameLoaded,
    Running,
    Paused,
    /// `retro_deinit` done; only `init` is valid.
    Deinitialized,
}

impl HostState {
    pub fn has_game(self) -> bool {
        matches!(
            self,
            HostState::GameLoaded | HostState::Running | HostState::Paused
        )
    }

    fn is_initialized(self) -> bool {
        !matches!(self, HostState::Unloaded | HostState::Deinitialized)
    }
}

/// The three host-side sinks, registered together with [`CoreHost::register`].
pub struct HostCallbacks {
    pub video: Box<dyn VideoSink>,
    pub audio: Box<dyn AudioSink>,
    pub input: Box<dyn InputSource>,
}

/// Content handed to the core, kept alive until unload.
struct LoadedGame {
    descriptor: GameDescriptor,
    _path: Option<CString>,
    _meta: Option<CString>,
}

pub struct CoreHost {
    core: Core,
    config: HostConfig,
    context: Box<HostContext>,
    state: HostState,
    system_info: SystemDescriptor,
    game: Option<LoadedGame>,
    av_cached: bool,
    av_changed: bool,
    port_devices: BTreeMap<u32, u32>,
    frame_count: u64,
}

impl std::fmt::Debug for CoreHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreHost")
            .field("library", &self.system_info.library_name)
            .field("state", &self.state)
            .field("frame_count", &self.frame_count)
            .finish()
    }
}

impl CoreHost {
    /// Load a core library from disk and bind a host to it.
    pub fn open(path: impl AsRef<Path>, config: HostConfig) -> HostResult<Self> {
        Self::new(Core::open(path)?, config)
    }

    /// Bind a host to `core`. Checks the API version and reads the system descriptor;
    /// `retro_init` is not called until [`CoreHost::init`].
    pub fn new(core: Core, config: HostConfig) -> HostResult<Self> {
        let symbols = core.symbols();

        // SAFETY: both entry points are valid before `retro_init`.
        let found = unsafe { (symbols.api_version)() };
        if found != API_VERSION {
            return Err(HostError::ApiVersionMismatch {
                expected: API_VERSION,
                found,
            });
        }

        // SAFETY: the core fills the struct; strings it points to are static in the core.
        let system_info = unsafe {
            let mut raw = MaybeUninit::<libretro_sys::SystemInfo>::zeroed();
            (symbols.get_system_info)(raw.as_mut_ptr());
            SystemDescriptor::from_raw(raw.assume_init_ref())
        };
        log::info!(
            "bound core {} {} (extensions: {:?}, need_fullpath: {})",
            system_info.library_name,
            system_info.library_version,
            system_info.valid_extensions,
            system_info.need_fullpath
        );

        let context = Box::new(HostContext {
            environment: RefCell::new(Environment::new(&config, core.path())),
            video: RefCell::new(VideoPipeline::default()),
            audio: RefCell::new(AudioPipeline::new(config.audio.pending_frames)),
            input: RefCell::new(InputSampler::new(config.input.max_ports)),
        });

        Ok(Self {
            core,
            config,
            context,
            state: HostState::Unloaded,
            system_info,
            game: None,
            av_cached: false,
            av_changed: false,
            port_devices: BTreeMap::new(),
            frame_count: 0,
        })
    }

    /// Run `f` against the core with this host's context routed to the callbacks.
    fn call<R>(&self, f: impl FnOnce(&CoreSymbols) -> R) -> R {
        let _active = state::activate(&self.context);
        f(self.core.symbols())
    }

    fn expect_state(&self, operation: &'static str, allowed: &[HostState]) -> HostResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(HostError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn transition(&mut self, next: HostState) {
        if self.state != next {
            log::debug!("host state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    // --- init / deinit ---

    /// `retro_set_environment`, `retro_init`, then the AV / input callbacks.
    pub fn init(&mut self) -> HostResult<()> {
        self.expect_state("init", &[HostState::Unloaded, HostState::Deinitialized])?;

        if self.state == HostState::Deinitialized {
            self.reset_session();
        }

        self.call(|core| unsafe { (core.set_environment)(environment::environment_callback) });
        self.call(|core| unsafe { (core.init)() });
        self.call(|core| unsafe {
            (core.set_video_refresh)(video::video_refresh);
            (core.set_audio_sample)(audio::audio_sample);
            (core.set_audio_sample_batch)(audio::audio_sample_batch);
            (core.set_input_poll)(input::input_poll);
            (core.set_input_state)(input::input_state);
        });

        self.transition(HostState::Initialized);
        self.promote_if_configured();
        Ok(())
    }

    /// Fresh negotiation state for a new init cycle; registered sinks are kept.
    fn reset_session(&mut self) {
        *self.context.environment.borrow_mut() = Environment::new(&self.config, self.core.path());
        let mut input = self.context.input.borrow_mut();
        let source = input.take_source();
        *input = InputSampler::new(self.config.input.max_ports);
        if let Some(source) = source {
            input.set_source(source);
        }
        drop(input);
        self.port_devices.clear();
        self.av_cached = false;
        self.av_changed = false;
        self.frame_count = 0;
    }

    /// Unload any game, then `retro_deinit`. Valid in every state.
    pub fn deinit(&mut self) -> HostResult<()> {
        match self.state {
            HostState::Deinitialized => return Ok(()),
            HostState::Unloaded => {
                self.transition(HostState::Deinitialized);
                return Ok(());
            }
            state if state.has_game() => self.unload_game()?,
            _ => {}
        }
        self.call(|core| unsafe { (core.deinit)() });
        self.transition(HostState::Deinitialized);
        log::info!("core {} deinitialized", self.system_info.library_name);
        Ok(())
    }

    // --- callback registration ---

    const REGISTRATION_STATES: [HostState; 3] = [
        HostState::Initialized,
        HostState::Configured,
        HostState::GameLoaded,
    ];

    pub fn set_video_sink(&mut self, sink: Box<dyn VideoSink>) -> HostResult<()> {
        self.expect_state("set_video_sink", &Self::REGISTRATION_STATES)?;
        self.context.video.borrow_mut().set_sink(sink);
        self.promote_if_configured();
        Ok(())
    }

    pub fn set_audio_sink(&mut self, sink: Box<dyn AudioSink>) -> HostResult<()> {
        self.expect_state("set_audio_sink", &Self::REGISTRATION_STATES)?;
        self.context.audio.borrow_mut().set_sink(sink);
        if let Some(timing) = self.av_timing() {
            self.context.audio.borrow_mut().set_timing(&timing);
        }
        self.promote_if_configured();
        Ok(())
    }

    pub fn set_input_source(&mut self, source: Box<dyn InputSource>) -> HostResult<()> {
        self.expect_state("set_input_source", &Self::REGISTRATION_STATES)?;
        self.context.input.borrow_mut().set_source(source);
        self.promote_if_configured();
        Ok(())
    }

    /// Fill every callback slot at once.
    pub fn register(&mut self, callbacks: HostCallbacks) -> HostResult<()> {
        self.expect_state("register", &Self::REGISTRATION_STATES)?;
        let HostCallbacks {
            video,
            audio,
            input,
        } = callbacks;
        self.set_video_sink(video)?;
        self.set_audio_sink(audio)?;
        self.set_input_source(input)
    }

    /// Names of the callback slots that are still empty.
    pub fn missing_callbacks(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.context.video.borrow().has_sink() {
            missing.push("video");
        }
        if !self.context.audio.borrow().has_sink() {
            missing.push("audio");
        }
        if !self.context.input.borrow().has_source() {
            missing.push("input");
        }
        missing
    }

    fn require_callbacks(&self) -> HostResult<()> {
        let missing = self.missing_callbacks();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(HostError::MissingCallbacks {
                missing: missing.join(", "),
            })
        }
    }

    fn promote_if_configured(&mut self) {
        if self.state == HostState::Initialized && self.missing_callbacks().is_empty() {
            self.transition(HostState::Configured);
        }
    }

    // --- content ---

    /// Hand `game` to the core. On failure the host stays `Configured` and another
    /// descriptor may be tried.
    pub fn load_game(&mut self, game: GameDescriptor) -> HostResult<()> {
        if self.state == HostState::Initialized {
            self.require_callbacks()?;
        }
        self.expect_state("load_game", &[HostState::Configured])?;

        if game.is_empty() {
            return Err(LoadError::NoContent.into());
        }
        if self.system_info.need_fullpath && game.path.is_none() {
            return Err(LoadError::PathRequired.into());
        }
        let path = match game.path.as_deref() {
            Some(path) => Some(path_to_cstring(path).ok_or(LoadError::InvalidPath)?),
            None => None,
        };
        let meta = game.meta.as_deref().and_then(|meta| match CString::new(meta) {
            Ok(meta) => Some(meta),
            Err(_) => {
                log::warn!("content metadata contains a NUL byte; not passed to the core");
                None
            }
        });

        let info = libretro_sys::GameInfo {
            path: path.as_ref().map_or(ptr::null(), |path| path.as_ptr()),
            data: game
                .data
                .as_ref()
                .map_or(ptr::null(), |data| data.as_ptr() as *const c_void),
            size: game.size(),
            meta: meta.as_ref().map_or(ptr::null(), |meta| meta.as_ptr()),
        };

        self.finish_load(Some(&info))?;
        log::info!(
            "loaded content ({} bytes{})",
            game.size(),
            game.path
                .as_ref()
                .map(|path| format!(", {}", path.display()))
                .unwrap_or_default()
        );
        self.game = Some(LoadedGame {
            descriptor: game,
            _path: path,
            _meta: meta,
        });
        Ok(())
    }

    /// Start a core that runs without content (`SET_SUPPORT_NO_GAME`).
    pub fn load_no_game(&mut self) -> HostResult<()> {
        if self.state == HostState::Initialized {
            self.require_callbacks()?;
        }
        self.expect_state("load_no_game", &[HostState::Configured])?;
        if !self.context.environment.borrow().supports_no_game() {
            return Err(HostError::Unsupported("running without content"));
        }
        self.finish_load(None)?;
        log::info!("started core without content");
        self.game = Some(LoadedGame {
            descriptor: GameDescriptor::default(),
            _path: None,
            _meta: None,
        });
        Ok(())
    }

    fn finish_load(&mut self, info: Option<&libretro_sys::GameInfo>) -> HostResult<()> {
        self.context.environment.borrow_mut().set_av_timing(None);
        let raw = info.map_or(ptr::null(), |info| info as *const _);

        let accepted = self.call(|core| unsafe { (core.load_game)(raw) });
        if !accepted {
            log::warn!("core {} rejected the content", self.system_info.library_name);
            return Err(LoadError::Rejected.into());
        }

        self.av_cached = false;
        self.av_changed = false;
        self.frame_count = 0;
        self.transition(HostState::GameLoaded);

        for (&port, &device) in &self.port_devices {
            self.call(|core| unsafe { (core.set_controller_port_device)(port, device) });
        }
        Ok(())
    }

    /// Descriptor of the loaded content.
    pub fn game(&self) -> Option<&GameDescriptor> {
        self.game.as_ref().map(|game| &game.descriptor)
    }

    /// `retro_unload_game`; callbacks stay registered.
    pub fn unload_game(&mut self) -> HostResult<()> {
        self.expect_state(
            "unload_game",
            &[HostState::GameLoaded, HostState::Running, HostState::Paused],
        )?;
        self.call(|core| unsafe { (core.unload_game)() });
        self.game = None;
        self.av_cached = false;
        self.context.environment.borrow_mut().set_av_timing(None);
        self.context.video.borrow_mut().clear();
        self.context.audio.borrow_mut().clear();
        self.transition(HostState::Configured);
        Ok(())
    }

    // --- AV timing ---

    /// Query `retro_get_system_av_info`. Valid once content is loaded and before the first
    /// frame; later calls return the cached (possibly core-updated) value.
    pub fn system_av_info(&mut self) -> HostResult<AvTiming> {
        if self.av_cached {
            if let Some(timing) = self.av_timing() {
                return Ok(timing);
            }
        }
        if !(self.state == HostState::GameLoaded && self.frame_count == 0) {
            return Err(HostError::InvalidState {
                operation: "system_av_info",
                state: self.state,
            });
        }

        let timing = self.call(|core| unsafe {
            let mut raw = MaybeUninit::<libretro_sys::SystemAvInfo>::zeroed();
            (core.get_system_av_info)(raw.as_mut_ptr());
            AvTiming::from_raw(raw.assume_init_ref())
        });
        timing.validate().map_err(HostError::InvalidAvInfo)?;

        log::info!(
            "av info: {}x{} (max {}x{}), {:.3} fps, {} Hz",
            timing.geometry.base_width,
            timing.geometry.base_height,
            timing.geometry.max_width,
            timing.geometry.max_height,
            timing.fps,
            timing.sample_rate
        );
        self.context
            .environment
            .borrow_mut()
            .set_av_timing(Some(timing));
        self.context.audio.borrow_mut().set_timing(&timing);
        self.av_cached = true;
        Ok(timing)
    }

    /// Current AV timing, including updates made through the environment.
    pub fn av_timing(&self) -> Option<AvTiming> {
        self.context.environment.borrow().av_timing()
    }

    /// Report and clear "the core changed its AV timing or geometry since the last check".
    pub fn take_av_timing_changed(&mut self) -> bool {
        std::mem::take(&mut self.av_changed)
    }

    // --- execution ---

    /// Run one frame.
    pub fn run(&mut self) -> HostResult<()> {
        self.expect_state("run", &[HostState::GameLoaded, HostState::Running])?;
        self.require_callbacks()?;

        self.context.video.borrow_mut().begin_step();
        self.context.audio.borrow_mut().begin_step();
        self.context.input.borrow_mut().begin_step();

        self.call(|core| unsafe { (core.run)() });

        self.context.video.borrow_mut().end_step();
        self.context.input.borrow_mut().end_step();

        let changed = self.context.environment.borrow_mut().take_av_timing_changed();
        if changed {
            if let Some(timing) = self.av_timing() {
                log::info!(
                    "core changed av info: {}x{}, {:.3} fps, {} Hz",
                    timing.geometry.base_width,
                    timing.geometry.base_height,
                    timing.fps,
                    timing.sample_rate
                );
                self.context.audio.borrow_mut().set_timing(&timing);
            }
            self.av_changed = true;
        }

        self.frame_count += 1;
        self.transition(HostState::Running);
        Ok(())
    }

    pub fn pause(&mut self) -> HostResult<()> {
        self.expect_state("pause", &[HostState::Running])?;
        self.transition(HostState::Paused);
        Ok(())
    }

    pub fn resume(&mut self) -> HostResult<()> {
        self.expect_state("resume", &[HostState::Paused])?;
        self.transition(HostState::Running);
        Ok(())
    }

    /// `retro_reset`; a paused host resumes.
    pub fn reset(&mut self) -> HostResult<()> {
        self.expect_state("reset", &[HostState::Running, HostState::Paused])?;
        self.call(|core| unsafe { (core.reset)() });
        self.transition(HostState::Running);
        Ok(())
    }

    // --- controller ports ---

    /// Bind `port` to a raw libretro device id. Recorded for later loads, forwarded right
    /// away when content is loaded.
    pub fn set_controller_port_device(&mut self, port: u32, device: u32) -> HostResult<()> {
        if !self.state.is_initialized() {
            return Err(HostError::InvalidState {
                operation: "set_controller_port_device",
                state: self.state,
            });
        }
        let class = Device::from_raw(device).unwrap_or_else(|| {
            log::warn!("unknown device id {device} on port {port}; treating as unplugged");
            Device::None
        });
        if !self.context.input.borrow_mut().bind(port, class) {
            log::warn!(
                "port {port} is beyond the {} sampled ports; input will read as 0",
                self.config.input.max_ports
            );
        }
        self.port_devices.insert(port, device);

        if self.state.has_game() {
            self.call(|core| unsafe { (core.set_controller_port_device)(port, device) });
        }
        Ok(())
    }

    // --- snapshots and memory ---

    fn expect_game(&self, operation: &'static str) -> HostResult<()> {
        self.expect_state(
            operation,
            &[HostState::GameLoaded, HostState::Running, HostState::Paused],
        )
    }

    /// Snapshot the core's state in memory.
    pub fn serialize(&mut self) -> HostResult<Vec<u8>> {
        self.expect_game("serialize")?;
        let optional = self.core.symbols().optional;
        let (Some(size_fn), Some(serialize)) = (optional.serialize_size, optional.serialize) else {
            return Err(HostError::Unsupported("serialize"));
        };

        let size = self.call(|_| unsafe { size_fn() });
        if size == 0 {
            return Err(HostError::Unsupported("serialize"));
        }
        let mut buffer = vec![0u8; size];
        let ok = self.call(|_| unsafe { serialize(buffer.as_mut_ptr() as *mut c_void, size) });
        if !ok {
            return Err(HostError::CoreFailed("serialize its state"));
        }
        Ok(buffer)
    }

    /// Restore a snapshot produced by [`CoreHost::serialize`].
    pub fn unserialize(&mut self, data: &[u8]) -> HostResult<()> {
        self.expect_game("unserialize")?;
        let Some(unserialize) = self.core.symbols().optional.unserialize else {
            return Err(HostError::Unsupported("unserialize"));
        };
        let ok = self.call(|_| unsafe { unserialize(data.as_ptr() as *const c_void, data.len()) });
        if !ok {
            return Err(HostError::CoreFailed("restore a snapshot"));
        }
        Ok(())
    }

    /// Raw pointer and size of a memory region, if the core exposes it.
    fn memory_region(&self, region: MemoryRegion) -> HostResult<(*mut u8, usize)> {
        let optional = self.core.symbols().optional;
        let (Some(data_fn), Some(size_fn)) = (optional.get_memory_data, optional.get_memory_size)
        else {
            return Err(HostError::Unsupported("memory access"));
        };
        let (data, size) = self.call(|_| unsafe { (data_fn(region as u32), size_fn(region as u32)) });
        if data.is_null() || size == 0 {
            return Err(HostError::NoMemoryRegion(region));
        }
        Ok((data as *mut u8, size))
    }

    /// Copy a memory region out of the core.
    pub fn memory(&self, region: MemoryRegion) -> HostResult<Vec<u8>> {
        self.expect_game("memory")?;
        let (data, size) = self.memory_region(region)?;
        // SAFETY: the core reported `size` readable bytes at `data`.
        Ok(unsafe { std::slice::from_raw_parts(data, size) }.to_vec())
    }

    /// Copy `bytes` into a memory region. Returns how many bytes were written.
    pub fn write_memory(&mut self, region: MemoryRegion, bytes: &[u8]) -> HostResult<usize> {
        self.expect_game("write_memory")?;
        let (data, size) = self.memory_region(region)?;
        if bytes.len() != size {
            log::warn!(
                "{region:?}: writing {} bytes into a {size}-byte region",
                bytes.len()
            );
        }
        let count = bytes.len().min(size);
        // SAFETY: the core reported `size` writable bytes at `data`; `count <= size`.
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), data, count) };
        Ok(count)
    }

    // --- accessors ---

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn system_info(&self) -> &SystemDescriptor {
        &self.system_info
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn core_path(&self) -> Option<&Path> {
        self.core.path()
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.context.environment.borrow().pixel_format()
    }

    pub fn rotation(&self) -> u32 {
        self.context.environment.borrow().rotation()
    }

    pub fn supports_no_game(&self) -> bool {
        self.context.environment.borrow().supports_no_game()
    }

    pub fn take_messages(&mut self) -> Vec<CoreMessage> {
        self.context.environment.borrow_mut().take_messages()
    }

    pub fn shutdown_requested(&self) -> bool {
        self.context.environment.borrow().shutdown_requested()
    }

    /// Options the core declared with `SET_VARIABLES`.
    pub fn core_options(&self) -> Vec<VariableDefinition> {
        self.context
            .environment
            .borrow()
            .variables()
            .definitions()
            .cloned()
            .collect()
    }

    pub fn core_option(&self, key: &str) -> Option<String> {
        self.context
            .environment
            .borrow()
            .variables()
            .current(key)
            .map(str::to_owned)
    }

    /// Change a core option; the core sees it after its next `GET_VARIABLE_UPDATE`.
    pub fn set_core_option(&mut self, key: &str, value: &str) -> bool {
        self.context
            .environment
            .borrow_mut()
            .variables_mut()
            .set(key, value)
    }

    /// Inspect the most recent frame the core produced.
    pub fn with_last_frame<R>(&self, f: impl FnOnce(Option<VideoFrame<'_>>) -> R) -> R {
        let video = self.context.video.borrow();
        f(video.retained())
    }

    /// Frames the audio pipeline is holding back for a saturated sink.
    pub fn pending_audio_frames(&self) -> usize {
        self.context.audio.borrow().pending_frames()
    }

    /// Drop audio held back for the sink, e.g. after fast-forwarding.
    pub fn discard_pending_audio(&mut self) {
        self.context.audio.borrow_mut().clear();
    }

    /// Times the core polled input since the host was bound.
    pub fn input_polls(&self) -> u64 {
        self.context.input.borrow().polls()
    }
}

impl Drop for CoreHost {
    fn drop(&mut self) {
        if self.state.is_initialized() {
            if let Err(err) = self.deinit() {
                log::error!("failed to deinitialize core on drop: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_states() {
        assert!(HostState::GameLoaded.has_game());
        assert!(HostState::Paused.has_game());
        assert!(!HostState::Configured.has_game());
        assert!(!HostState::Unloaded.is_initialized());
        assert!(!HostState::Deinitialized.is_initialized());
        assert!(HostState::Initialized.is_initialized());
    }
}
