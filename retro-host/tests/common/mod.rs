//! A scriptable libretro core linked into the test binary.
//!
//! The core's state is thread-local, so every test thread drives its own instance. Tests
//! call [`reset`] (done by the host helpers), tweak the script with [`configure`], then
//! inspect what the core saw with [`observe`].

#![allow(dead_code)]

use libretro_sys::{
    AudioSampleBatchFn, AudioSampleFn, EnvironmentFn, GameInfo, InputPollFn, InputStateFn,
    SystemAvInfo, SystemInfo, VideoRefreshFn,
};
use retro_host::av::{AudioSink, VideoFrame, VideoSink};
use retro_host::input::{InputSnapshot, InputSource};
use retro_host::{Core, CoreHost, CoreSymbols, HostCallbacks, HostConfig, OptionalSymbols};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::ffi::{CStr, c_char, c_uint, c_void};
use std::ptr;
use std::rc::Rc;

pub const JOYPAD: u32 = 1;
pub const JOYPAD_A: u32 = 8;

pub const ENV_SET_MESSAGE: u32 = 6;
pub const ENV_SHUTDOWN: u32 = 7;
pub const ENV_SET_PIXEL_FORMAT: u32 = 10;
pub const ENV_GET_VARIABLE: u32 = 15;
pub const ENV_SET_VARIABLES: u32 = 16;
pub const ENV_GET_VARIABLE_UPDATE: u32 = 17;
pub const ENV_SET_SUPPORT_NO_GAME: u32 = 18;
pub const ENV_GET_CAN_DUPE: u32 = 3;
pub const ENV_SET_GEOMETRY: u32 = 37;

/// What the core's video callback receives in one step.
#[derive(Clone, Debug, Default)]
pub enum Video {
    #[default]
    Skip,
    Frame {
        data: Vec<u8>,
        width: u32,
        height: u32,
        pitch: usize,
    },
    Dupe,
}

/// One `retro_run`.
#[derive(Clone, Debug)]
pub struct Step {
    pub polls: u32,
    pub query_before_poll: bool,
    pub video: Video,
    pub batches: Vec<Vec<i16>>,
    pub samples: Vec<(i16, i16)>,
    pub geometry: Option<(u32, u32)>,
    pub shutdown: bool,
    pub message: Option<(&'static CStr, u32)>,
    pub check_variable_update: bool,
}

impl Default for Step {
    fn default() -> Self {
        Self {
            polls: 1,
            query_before_poll: false,
            video: Video::Skip,
            batches: Vec::new(),
            samples: Vec::new(),
            geometry: None,
            shutdown: false,
            message: None,
            check_variable_update: false,
        }
    }
}

#[derive(Default)]
struct Callbacks {
    environment: Option<EnvironmentFn>,
    video: Option<VideoRefreshFn>,
    audio_sample: Option<AudioSampleFn>,
    audio_batch: Option<AudioSampleBatchFn>,
    poll: Option<InputPollFn>,
    state: Option<InputStateFn>,
}

pub struct Mock {
    // Script.
    pub api_version: u32,
    pub need_fullpath: bool,
    pub accept_load: bool,
    pub support_no_game: bool,
    pub pixel_format: Option<u32>,
    pub declare_options: bool,
    pub base: (u32, u32),
    pub max: (u32, u32),
    pub fps: f64,
    pub sample_rate: f64,
    pub steps: VecDeque<Step>,
    pub default_step: Step,
    pub save_ram: Vec<u8>,

    // Observations.
    pub calls: Vec<&'static str>,
    pub init_can_dupe: Option<bool>,
    pub init_unknown_opcode: Option<bool>,
    pub init_pixel_format: Option<bool>,
    pub init_option: Option<String>,
    pub loaded: Option<LoadedContent>,
    pub port_devices: Vec<(u32, u32)>,
    pub inputs_before_poll: Vec<i16>,
    pub inputs: Vec<(i16, i16)>,
    pub audio_taken: Vec<usize>,
    pub variable_updates: Vec<(bool, Option<String>)>,
    pub env_results: Vec<(u32, bool)>,
    pub counter: u32,

    callbacks: Callbacks,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadedContent {
    pub path: Option<String>,
    /// `path` exactly as the core received it.
    pub path_bytes: Option<Vec<u8>>,
    pub size: usize,
    pub data: Option<Vec<u8>>,
    pub meta: Option<String>,
    pub no_game: bool,
}

impl Default for Mock {
    fn default() -> Self {
        Self {
            api_version: 1,
            need_fullpath: false,
            accept_load: true,
            support_no_game: false,
            pixel_format: None,
            declare_options: false,
            base: (256, 224),
            max: (512, 448),
            fps: 60.0,
            sample_rate: 48000.0,
            steps: VecDeque::new(),
            default_step: Step::default(),
            save_ram: vec![0; 16],
            calls: Vec::new(),
            init_can_dupe: None,
            init_unknown_opcode: None,
            init_pixel_format: None,
            init_option: None,
            loaded: None,
            port_devices: Vec::new(),
            inputs_before_poll: Vec::new(),
            inputs: Vec::new(),
            audio_taken: Vec::new(),
            variable_updates: Vec::new(),
            env_results: Vec::new(),
            counter: 0,
            callbacks: Callbacks::default(),
        }
    }
}

thread_local! {
    static MOCK: RefCell<Mock> = RefCell::new(Mock::default());
}

pub fn reset() {
    MOCK.with(|mock| *mock.borrow_mut() = Mock::default());
}

pub fn configure(f: impl FnOnce(&mut Mock)) {
    MOCK.with(|mock| f(&mut mock.borrow_mut()));
}

pub fn observe<R>(f: impl FnOnce(&Mock) -> R) -> R {
    MOCK.with(|mock| f(&mock.borrow()))
}

pub fn calls() -> Vec<&'static str> {
    observe(|mock| mock.calls.clone())
}

pub fn count(name: &str) -> usize {
    observe(|mock| mock.calls.iter().filter(|call| **call == name).count())
}

fn record(name: &'static str) {
    configure(|mock| mock.calls.push(name));
}

fn environment(cmd: u32, data: *mut c_void) -> Option<bool> {
    let callback = observe(|mock| mock.callbacks.environment)?;
    let result = unsafe { callback(cmd, data) };
    configure(|mock| mock.env_results.push((cmd, result)));
    Some(result)
}

fn get_variable(key: &'static CStr) -> Option<String> {
    let mut variable = libretro_sys::Variable {
        key: key.as_ptr(),
        value: ptr::null(),
    };
    let ok = environment(ENV_GET_VARIABLE, &mut variable as *mut _ as *mut c_void)?;
    if !ok || variable.value.is_null() {
        return None;
    }
    Some(
        unsafe { CStr::from_ptr(variable.value) }
            .to_string_lossy()
            .into_owned(),
    )
}

// --- the core ---

extern "C" fn retro_api_version() -> c_uint {
    observe(|mock| mock.api_version)
}

extern "C" fn retro_get_system_info(info: *mut SystemInfo) {
    record("get_system_info");
    let need_fullpath = observe(|mock| mock.need_fullpath);
    unsafe {
        (*info).library_name = c"mock".as_ptr();
        (*info).library_version = c"1.0".as_ptr();
        (*info).valid_extensions = c"bin|rom".as_ptr();
        (*info).need_fullpath = need_fullpath;
        (*info).block_extract = false;
    }
}

extern "C" fn retro_set_environment(callback: EnvironmentFn) {
    record("set_environment");
    configure(|mock| mock.callbacks.environment = Some(callback));
}

extern "C" fn retro_init() {
    record("init");

    let mut can_dupe = false;
    let answered = environment(ENV_GET_CAN_DUPE, &mut can_dupe as *mut bool as *mut c_void);
    let unknown = environment(0xdead, ptr::null_mut());

    let (pixel_format, declare, no_game) =
        observe(|mock| (mock.pixel_format, mock.declare_options, mock.support_no_game));

    let pixel_result = pixel_format.and_then(|format| {
        let mut format = format;
        environment(ENV_SET_PIXEL_FORMAT, &mut format as *mut u32 as *mut c_void)
    });

    if declare {
        let table = [
            libretro_sys::Variable {
                key: c"mock_speed".as_ptr(),
                value: c"Emulation speed; normal|turbo|slow".as_ptr(),
            },
            libretro_sys::Variable {
                key: c"mock_palette".as_ptr(),
                value: c"Palette; warm|cold".as_ptr(),
            },
            libretro_sys::Variable {
                key: ptr::null(),
                value: ptr::null(),
            },
        ];
        environment(ENV_SET_VARIABLES, table.as_ptr() as *mut c_void);
    }
    let option = if declare { get_variable(c"mock_speed") } else { None };

    if no_game {
        let mut yes = true;
        environment(ENV_SET_SUPPORT_NO_GAME, &mut yes as *mut bool as *mut c_void);
    }

    configure(|mock| {
        mock.init_can_dupe = answered.filter(|ok| *ok).map(|_| can_dupe);
        mock.init_unknown_opcode = unknown;
        mock.init_pixel_format = pixel_result;
        mock.init_option = option;
    });
}

extern "C" fn retro_deinit() {
    record("deinit");
}

extern "C" fn retro_set_video_refresh(callback: VideoRefreshFn) {
    record("set_video_refresh");
    configure(|mock| mock.callbacks.video = Some(callback));
}

extern "C" fn retro_set_audio_sample(callback: AudioSampleFn) {
    configure(|mock| mock.callbacks.audio_sample = Some(callback));
}

extern "C" fn retro_set_audio_sample_batch(callback: AudioSampleBatchFn) {
    configure(|mock| mock.callbacks.audio_batch = Some(callback));
}

extern "C" fn retro_set_input_poll(callback: InputPollFn) {
    configure(|mock| mock.callbacks.poll = Some(callback));
}

extern "C" fn retro_set_input_state(callback: InputStateFn) {
    configure(|mock| mock.callbacks.state = Some(callback));
}

extern "C" fn retro_set_controller_port_device(port: c_uint, device: c_uint) {
    record("set_controller_port_device");
    configure(|mock| mock.port_devices.push((port, device)));
}

extern "C" fn retro_reset() {
    record("reset");
    configure(|mock| mock.counter = 0);
}

extern "C" fn retro_load_game(game: *const GameInfo) -> bool {
    record("load_game");
    let content = if game.is_null() {
        LoadedContent {
            no_game: true,
            ..LoadedContent::default()
        }
    } else {
        let game = unsafe { &*game };
        let text = |ptr: *const c_char| {
            (!ptr.is_null())
                .then(|| unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
        };
        LoadedContent {
            path: text(game.path),
            path_bytes: (!game.path.is_null())
                .then(|| unsafe { CStr::from_ptr(game.path) }.to_bytes().to_vec()),
            size: game.size,
            data: (!game.data.is_null()).then(|| {
                unsafe { std::slice::from_raw_parts(game.data as *const u8, game.size) }.to_vec()
            }),
            meta: text(game.meta),
            no_game: false,
        }
    };

    let accept = observe(|mock| mock.accept_load && (!content.no_game || mock.support_no_game));
    if accept {
        configure(|mock| mock.loaded = Some(content));
    }
    accept
}

extern "C" fn retro_unload_game() {
    record("unload_game");
    configure(|mock| mock.loaded = None);
}

extern "C" fn retro_get_system_av_info(info: *mut SystemAvInfo) {
    record("get_system_av_info");
    let (base, max, fps, rate) = observe(|mock| (mock.base, mock.max, mock.fps, mock.sample_rate));
    unsafe {
        (*info).geometry.base_width = base.0;
        (*info).geometry.base_height = base.1;
        (*info).geometry.max_width = max.0;
        (*info).geometry.max_height = max.1;
        (*info).geometry.aspect_ratio = 0.0;
        (*info).timing.fps = fps;
        (*info).timing.sample_rate = rate;
    }
}

extern "C" fn retro_run() {
    record("run");
    let step = MOCK.with(|mock| {
        let mut mock = mock.borrow_mut();
        mock.counter += 1;
        let default = mock.default_step.clone();
        mock.steps.pop_front().unwrap_or(default)
    });
    let (video, sample, batch, poll, state) = observe(|mock| {
        let cb = &mock.callbacks;
        (cb.video, cb.audio_sample, cb.audio_batch, cb.poll, cb.state)
    });
    let (video, sample, batch, poll, state) = (
        video.unwrap(),
        sample.unwrap(),
        batch.unwrap(),
        poll.unwrap(),
        state.unwrap(),
    );

    if step.query_before_poll {
        let value = unsafe { state(0, JOYPAD, 0, JOYPAD_A) };
        configure(|mock| mock.inputs_before_poll.push(value));
    }
    for _ in 0..step.polls {
        unsafe { poll() };
    }
    let first = unsafe { state(0, JOYPAD, 0, JOYPAD_A) };
    let second = unsafe { state(0, JOYPAD, 0, JOYPAD_A) };
    configure(|mock| mock.inputs.push((first, second)));

    match &step.video {
        Video::Skip => {}
        Video::Frame {
            data,
            width,
            height,
            pitch,
        } => unsafe { video(data.as_ptr() as *const c_void, *width, *height, *pitch) },
        Video::Dupe => unsafe { video(ptr::null(), 0, 0, 0) },
    }

    for (left, right) in &step.samples {
        unsafe { sample(*left, *right) };
    }
    for samples in &step.batches {
        let taken = unsafe { batch(samples.as_ptr(), samples.len() / 2) };
        configure(|mock| mock.audio_taken.push(taken));
    }

    if let Some((width, height)) = step.geometry {
        let mut geometry = libretro_sys::GameGeometry {
            base_width: width,
            base_height: height,
            max_width: 0,
            max_height: 0,
            aspect_ratio: 0.0,
        };
        environment(ENV_SET_GEOMETRY, &mut geometry as *mut _ as *mut c_void);
    }
    if let Some((text, frames)) = step.message {
        let mut message = libretro_sys::Message {
            msg: text.as_ptr(),
            frames,
        };
        environment(ENV_SET_MESSAGE, &mut message as *mut _ as *mut c_void);
    }
    if step.check_variable_update {
        let mut updated = false;
        environment(ENV_GET_VARIABLE_UPDATE, &mut updated as *mut bool as *mut c_void);
        let value = if updated { get_variable(c"mock_speed") } else { None };
        configure(|mock| mock.variable_updates.push((updated, value)));
    }
    if step.shutdown {
        environment(ENV_SHUTDOWN, ptr::null_mut());
    }
}

extern "C" fn retro_serialize_size() -> usize {
    4
}

extern "C" fn retro_serialize(data: *mut c_void, size: usize) -> bool {
    if size < 4 {
        return false;
    }
    let bytes = observe(|mock| mock.counter.to_le_bytes());
    unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), data as *mut u8, 4) };
    true
}

extern "C" fn retro_unserialize(data: *const c_void, size: usize) -> bool {
    if size != 4 {
        return false;
    }
    let mut bytes = [0u8; 4];
    unsafe { ptr::copy_nonoverlapping(data as *const u8, bytes.as_mut_ptr(), 4) };
    configure(|mock| mock.counter = u32::from_le_bytes(bytes));
    true
}

extern "C" fn retro_get_memory_data(id: c_uint) -> *mut c_void {
    if id != 0 {
        return ptr::null_mut();
    }
    MOCK.with(|mock| mock.borrow_mut().save_ram.as_mut_ptr() as *mut c_void)
}

extern "C" fn retro_get_memory_size(id: c_uint) -> usize {
    if id != 0 {
        return 0;
    }
    observe(|mock| mock.save_ram.len())
}

pub fn symbols() -> CoreSymbols {
    CoreSymbols {
        optional: OptionalSymbols {
            serialize_size: Some(retro_serialize_size),
            serialize: Some(retro_serialize),
            unserialize: Some(retro_unserialize),
            get_memory_data: Some(retro_get_memory_data),
            get_memory_size: Some(retro_get_memory_size),
        },
        ..symbols_without_optional()
    }
}

pub fn symbols_without_optional() -> CoreSymbols {
    CoreSymbols {
        init: retro_init,
        deinit: retro_deinit,
        api_version: retro_api_version,
        get_system_info: retro_get_system_info,
        get_system_av_info: retro_get_system_av_info,
        set_environment: retro_set_environment,
        set_video_refresh: retro_set_video_refresh,
        set_audio_sample: retro_set_audio_sample,
        set_audio_sample_batch: retro_set_audio_sample_batch,
        set_input_poll: retro_set_input_poll,
        set_input_state: retro_set_input_state,
        set_controller_port_device: retro_set_controller_port_device,
        reset: retro_reset,
        run: retro_run,
        load_game: retro_load_game,
        unload_game: retro_unload_game,
        optional: OptionalSymbols::default(),
    }
}

// --- host-side sinks ---

#[derive(Clone, Debug, PartialEq)]
pub struct CapturedFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pitch: usize,
    pub duplicate: bool,
}

#[derive(Clone, Default)]
pub struct RecordingVideo(pub Rc<RefCell<Vec<CapturedFrame>>>);

impl VideoSink for RecordingVideo {
    fn present(&mut self, frame: &VideoFrame<'_>) {
        self.0.borrow_mut().push(CapturedFrame {
            pixels: frame.rows().flatten().copied().collect(),
            width: frame.width,
            height: frame.height,
            pitch: frame.pitch,
            duplicate: frame.duplicate,
        });
    }
}

#[derive(Default)]
pub struct AudioLog {
    /// Frames the sink accepts per push; `None` accepts everything.
    pub budget: Option<usize>,
    pub received: Vec<i16>,
    pub offers: Vec<usize>,
}

#[derive(Clone, Default)]
pub struct RecordingAudio(pub Rc<RefCell<AudioLog>>);

impl AudioSink for RecordingAudio {
    fn push(&mut self, samples: &[i16]) -> usize {
        let mut log = self.0.borrow_mut();
        let offered = samples.len() / 2;
        log.offers.push(offered);
        let accepted = log.budget.map_or(offered, |budget| budget.min(offered));
        log.received.extend_from_slice(&samples[..accepted * 2]);
        accepted
    }
}

/// Presses `A` on port 0 according to a script, one entry per poll.
#[derive(Clone, Default)]
pub struct ScriptedInput(pub Rc<RefCell<VecDeque<bool>>>);

impl InputSource for ScriptedInput {
    fn poll(&mut self, snapshot: &mut InputSnapshot) {
        let pressed = self.0.borrow_mut().pop_front().unwrap_or(false);
        if pressed {
            if let Some(port) = snapshot.port_mut(0) {
                port.press(retro_host::abi::JoypadButton::A);
            }
        }
    }
}

pub struct Sinks {
    pub video: RecordingVideo,
    pub audio: RecordingAudio,
    pub input: ScriptedInput,
}

impl Sinks {
    pub fn callbacks(&self) -> HostCallbacks {
        HostCallbacks {
            video: Box::new(self.video.clone()),
            audio: Box::new(self.audio.clone()),
            input: Box::new(self.input.clone()),
        }
    }

    pub fn frames(&self) -> Vec<CapturedFrame> {
        self.video.0.borrow().clone()
    }
}

pub fn sinks() -> Sinks {
    Sinks {
        video: RecordingVideo::default(),
        audio: RecordingAudio::default(),
        input: ScriptedInput::default(),
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A host bound to a fresh mock core, not yet initialized.
pub fn host_with(config: HostConfig, setup: impl FnOnce(&mut Mock)) -> CoreHost {
    init_logging();
    reset();
    configure(setup);
    CoreHost::new(Core::from_symbols(symbols()), config).unwrap()
}

pub fn host() -> CoreHost {
    host_with(HostConfig::default(), |_| {})
}

/// An initialized host with every callback registered.
pub fn configured_host_with(config: HostConfig, setup: impl FnOnce(&mut Mock)) -> (CoreHost, Sinks) {
    let mut host = host_with(config, setup);
    let sinks = sinks();
    host.init().unwrap();
    host.register(sinks.callbacks()).unwrap();
    (host, sinks)
}

pub fn configured_host() -> (CoreHost, Sinks) {
    configured_host_with(HostConfig::default(), |_| {})
}

/// A host with `rom` content loaded and AV info queried.
pub fn running_host_with(setup: impl FnOnce(&mut Mock)) -> (CoreHost, Sinks) {
    let (mut host, sinks) = configured_host_with(HostConfig::default(), setup);
    host.load_game(retro_host::abi::GameDescriptor::with_contents(
        "game.rom",
        vec![1, 2, 3, 4],
    ))
    .unwrap();
    host.system_av_info().unwrap();
    (host, sinks)
}

pub fn push_steps(steps: impl IntoIterator<Item = Step>) {
    configure(|mock| mock.steps.extend(steps));
}
