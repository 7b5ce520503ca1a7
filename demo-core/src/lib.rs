//! retro-host-demo-core: a tiny libretro core for exercising `retro-host` end to end.
//!
//! Loads any content; the first bytes of the file tint the test pattern.
//! - Video: 160x120 XRGB8888 scrolling colour bars with a square the d-pad moves.
//! - Audio: a 44.1 kHz square-wave tone; `A` raises the pitch, `Start` mutes it.
//! - Save RAM: 64 bytes, byte 0 counts how many times `B` was pressed.

use libretro_backend::{
    AudioVideoInfo, Core, CoreInfo, GameData, JoypadButton, LoadGameResult, PixelFormat,
    RuntimeHandle, libretro_core,
};

pub const WIDTH: u32 = 160;
pub const HEIGHT: u32 = 120;
pub const FPS: f64 = 60.0;
pub const SAMPLE_RATE: f64 = 44_100.0;
pub const SAVE_RAM_SIZE: usize = 64;

const SQUARE: u32 = 12;
const AUDIO_FRAMES_PER_RUN: usize = (SAMPLE_RATE / FPS) as usize;

/// Everything that survives between frames.
#[derive(Clone, Debug, PartialEq)]
pub struct Scene {
    pub frame: u32,
    pub tint: [u8; 3],
    pub square: (u32, u32),
    pub phase: f32,
    pub b_held: bool,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            frame: 0,
            tint: [0, 0, 0],
            square: ((WIDTH - SQUARE) / 2, (HEIGHT - SQUARE) / 2),
            phase: 0.0,
            b_held: false,
        }
    }
}

/// Buttons the demo reacts to, sampled once per frame.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Buttons {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub a: bool,
    pub b: bool,
    pub start: bool,
}

impl Buttons {
    fn sample(handle: &mut RuntimeHandle) -> Self {
        let mut pressed = |button| handle.is_joypad_button_pressed(0, button);
        Self {
            up: pressed(JoypadButton::Up),
            down: pressed(JoypadButton::Down),
            left: pressed(JoypadButton::Left),
            right: pressed(JoypadButton::Right),
            a: pressed(JoypadButton::A),
            b: pressed(JoypadButton::B),
            start: pressed(JoypadButton::Start),
        }
    }
}

impl Scene {
    /// Advance one frame. Returns true on a fresh `B` press.
    pub fn step(&mut self, buttons: Buttons) -> bool {
        self.frame = self.frame.wrapping_add(1);

        let (mut x, mut y) = self.square;
        if buttons.left {
            x = x.saturating_sub(1);
        }
        if buttons.right {
            x = (x + 1).min(WIDTH - SQUARE);
        }
        if buttons.up {
            y = y.saturating_sub(1);
        }
        if buttons.down {
            y = (y + 1).min(HEIGHT - SQUARE);
        }
        self.square = (x, y);

        let pressed = buttons.b && !self.b_held;
        self.b_held = buttons.b;
        pressed
    }

    /// XRGB8888 frame, rows packed without padding.
    pub fn render(&self, out: &mut Vec<u8>) {
        out.clear();
        let (sx, sy) = self.square;
        for y in 0..HEIGHT {
            for x in 0..WIDTH {
                let inside = x >= sx && x < sx + SQUARE && y >= sy && y < sy + SQUARE;
                let pixel: u32 = if inside {
                    0x00ff_ffff
                } else {
                    let bar = ((x + self.frame) / 20) % 8;
                    let r = (if bar & 4 != 0 { 0xc0 } else { 0 }) | self.tint[0] as u32;
                    let g = (if bar & 2 != 0 { 0xc0 } else { 0 }) | self.tint[1] as u32;
                    let b = (if bar & 1 != 0 { 0xc0 } else { 0 }) | self.tint[2] as u32;
                    (r << 16) | (g << 8) | b
                };
                out.extend_from_slice(&pixel.to_ne_bytes());
            }
        }
    }

    /// One frame's worth of interleaved stereo samples.
    pub fn tone(&mut self, buttons: Buttons, out: &mut Vec<i16>) {
        out.clear();
        let frequency = if buttons.a { 880.0 } else { 440.0 };
        let amplitude: i16 = if buttons.start { 0 } else { 4000 };
        let step = frequency / SAMPLE_RATE as f32;
        for _ in 0..AUDIO_FRAMES_PER_RUN {
            let sample = if self.phase < 0.5 { amplitude } else { -amplitude };
            out.extend_from_slice(&[sample, sample]);
            self.phase = (self.phase + step).fract();
        }
    }
}

pub struct DemoCore {
    game_data: Option<GameData>,
    scene: Scene,
    save_ram: [u8; SAVE_RAM_SIZE],
    video: Vec<u8>,
    audio: Vec<i16>,
}

impl Default for DemoCore {
    fn default() -> Self {
        Self {
            game_data: None,
            scene: Scene::default(),
            save_ram: [0; SAVE_RAM_SIZE],
            video: Vec::with_capacity((WIDTH * HEIGHT * 4) as usize),
            audio: Vec::with_capacity(AUDIO_FRAMES_PER_RUN * 2),
        }
    }
}

impl Core for DemoCore {
    fn save_memory(&mut self) -> Option<&mut [u8]> {
        Some(&mut self.save_ram)
    }

    fn rtc_memory(&mut self) -> Option<&mut [u8]> {
        None
    }

    fn system_memory(&mut self) -> Option<&mut [u8]> {
        None
    }

    fn video_memory(&mut self) -> Option<&mut [u8]> {
        None
    }

    fn info() -> CoreInfo {
        CoreInfo::new("retro-host demo", env!("CARGO_PKG_VERSION"))
            .supports_roms_with_extension("bin")
            .supports_roms_with_extension("rom")
    }

    fn on_load_game(&mut self, game_data: GameData) -> LoadGameResult {
        let Some(data) = game_data.data() else {
            return LoadGameResult::Failed(game_data);
        };
        let mut tint = [0u8; 3];
        for (slot, byte) in tint.iter_mut().zip(data) {
            *slot = byte & 0x3f;
        }

        self.scene = Scene {
            tint,
            ..Scene::default()
        };
        self.game_data = Some(game_data);

        let av_info = AudioVideoInfo::new()
            .video(WIDTH, HEIGHT, FPS, PixelFormat::ARGB8888)
            .audio(SAMPLE_RATE);
        LoadGameResult::Success(av_info)
    }

    fn on_unload_game(&mut self) -> GameData {
        self.scene = Scene::default();
        self.game_data
            .take()
            .expect("the backend only unloads after a successful load")
    }

    fn on_run(&mut self, handle: &mut RuntimeHandle) {
        let buttons = Buttons::sample(handle);
        if self.scene.step(buttons) {
            self.save_ram[0] = self.save_ram[0].wrapping_add(1);
        }

        self.scene.render(&mut self.video);
        handle.upload_video_frame(&self.video);

        self.scene.tone(buttons, &mut self.audio);
        handle.upload_audio_frame(&self.audio);
    }

    fn on_reset(&mut self) {
        let tint = self.scene.tint;
        self.scene = Scene {
            tint,
            ..Scene::default()
        };
    }
}

libretro_core!(DemoCore);
