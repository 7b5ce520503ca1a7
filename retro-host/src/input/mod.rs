//! Input sampling for retro-host.
//!
//! Responsibilities:
//! - Capture one [`InputSnapshot`] per step from the registered [`InputSource`] when the core
//!   calls `input_poll`.
//! - Answer `input_state(port, device, index, id)` as a pure lookup against that snapshot.
//! - Track controller port bindings (`set_controller_port_device`).
//!
//! Determinism rules:
//! - Repeat polls within one step are ignored, so every query in a step sees the same state.
//! - Queries made before the step's poll see the previous step's snapshot.
//! - Out-of-range ports / devices / ids, and ports bound to [`Device::None`], read as 0.

use crate::abi::{
    Device, JOYPAD_BUTTONS, JOYPAD_ID_MASK, LightgunButtons, MouseButtons, analog, lightgun,
    mouse, pointer,
};
use crate::state;
use std::ffi::c_uint;

/// Number of keyboard key codes tracked (`RETROK_*` values below this).
pub const KEYBOARD_KEYS: u32 = 512;

/// Full-scale analog value, reported for a digitally pressed button with no analog reading.
pub const ANALOG_MAX: i16 = 0x7fff;

/// Inputs of one controller port.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortState {
    /// One bit per [`crate::abi::JoypadButton`].
    pub joypad: u16,
    /// `[x, y]`, -0x8000..=0x7fff.
    pub analog_left: [i16; 2],
    pub analog_right: [i16; 2],
    /// Pressure per joypad button; 0 falls back to the digital state.
    pub analog_buttons: [i16; JOYPAD_BUTTONS as usize],
    /// Movement since the previous poll.
    pub mouse_delta: [i16; 2],
    /// Bits of [`MouseButtons`].
    pub mouse_buttons: u32,
    /// Screen-relative, -0x7fff..=0x7fff.
    pub pointer: [i16; 2],
    pub pointer_pressed: bool,
    /// Screen-relative, -0x7fff..=0x7fff.
    pub lightgun: [i16; 2],
    /// Bits of [`LightgunButtons`].
    pub lightgun_buttons: u32,
}

impl PortState {
    pub fn press(&mut self, button: crate::abi::JoypadButton) {
        self.joypad |= button.mask();
    }
}

/// Everything the core may ask about during one step.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InputSnapshot {
    ports: Vec<PortState>,
    keys: [u64; KEYBOARD_KEYS as usize / 64],
}

impl InputSnapshot {
    pub fn with_ports(ports: u32) -> Self {
        Self {
            ports: vec![PortState::default(); ports as usize],
            keys: Default::default(),
        }
    }

    pub fn port_count(&self) -> u32 {
        self.ports.len() as u32
    }

    pub fn port(&self, port: u32) -> Option<&PortState> {
        self.ports.get(port as usize)
    }

    pub fn port_mut(&mut self, port: u32) -> Option<&mut PortState> {
        self.ports.get_mut(port as usize)
    }

    pub fn set_key(&mut self, key: u32, pressed: bool) {
        if key >= KEYBOARD_KEYS {
            return;
        }
        let (word, bit) = ((key / 64) as usize, key % 64);
        if pressed {
            self.keys[word] |= 1 << bit;
        } else {
            self.keys[word] &= !(1 << bit);
        }
    }

    pub fn key(&self, key: u32) -> bool {
        if key >= KEYBOARD_KEYS {
            return false;
        }
        self.keys[(key / 64) as usize] & (1 << (key % 64)) != 0
    }
}

/// Supplies input to the host, once per step.
pub trait InputSource {
    /// Fill a blank snapshot with the current state of every port.
    fn poll(&mut self, snapshot: &mut InputSnapshot);
}

/// Reports nothing pressed.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullInput;

impl InputSource for NullInput {
    fn poll(&mut self, _snapshot: &mut InputSnapshot) {}
}

pub struct InputSampler {
    source: Option<Box<dyn InputSource>>,
    snapshot: InputSnapshot,
    bindings: Vec<Device>,
    polled_this_step: bool,
    warned_query_before_poll: bool,
    polls: u64,
}

impl std::fmt::Debug for InputSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputSampler")
            .field("has_source", &self.source.is_some())
            .field("bindings", &self.bindings)
            .field("polled_this_step", &self.polled_this_step)
            .field("polls", &self.polls)
            .finish()
    }
}

impl InputSampler {
    pub fn new(max_ports: u32) -> Self {
        Self {
            source: None,
            snapshot: InputSnapshot::with_ports(max_ports),
            bindings: vec![Device::Joypad; max_ports as usize],
            polled_this_step: false,
            warned_query_before_poll: false,
            polls: 0,
        }
    }

    pub fn set_source(&mut self, source: Box<dyn InputSource>) {
        self.source = Some(source);
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn take_source(&mut self) -> Option<Box<dyn InputSource>> {
        self.source.take()
    }

    pub fn max_ports(&self) -> u32 {
        self.bindings.len() as u32
    }

    /// Bind `port` to `device`. Returns false for ports beyond `max_ports`.
    pub fn bind(&mut self, port: u32, device: Device) -> bool {
        match self.bindings.get_mut(port as usize) {
            Some(binding) => {
                *binding = device;
                true
            }
            None => false,
        }
    }

    pub fn binding(&self, port: u32) -> Option<Device> {
        self.bindings.get(port as usize).copied()
    }

    pub fn snapshot(&self) -> &InputSnapshot {
        &self.snapshot
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }

    pub(crate) fn begin_step(&mut self) {
        self.polled_this_step = false;
    }

    pub(crate) fn end_step(&mut self) {
        if !self.polled_this_step {
            log::trace!("core did not poll input this step");
        }
    }

    /// Capture a new snapshot, unless one was already captured this step.
    pub fn poll(&mut self) {
        if self.polled_this_step {
            log::debug!("repeated input poll within a step ignored");
            return;
        }
        self.polled_this_step = true;
        self.polls += 1;

        let mut next = InputSnapshot::with_ports(self.max_ports());
        if let Some(source) = self.source.as_mut() {
            source.poll(&mut next);
        }
        self.snapshot = next;
    }

    /// Answer one `input_state` query.
    pub fn state(&mut self, port: u32, device: u32, index: u32, id: u32) -> i16 {
        if !self.polled_this_step && !self.warned_query_before_poll {
            log::warn!("core queried input before polling; answering from previous snapshot");
            self.warned_query_before_poll = true;
        }
        self.lookup(port, device, index, id)
    }

    fn lookup(&self, port: u32, device: u32, index: u32, id: u32) -> i16 {
        let Some(device) = Device::from_raw(device) else {
            return 0;
        };
        match self.binding(port) {
            None | Some(Device::None) => return 0,
            Some(_) => {}
        }
        let Some(state) = self.snapshot.port(port) else {
            return 0;
        };

        match device {
            Device::None => 0,
            Device::Joypad => joypad(state, id),
            Device::Keyboard => self.snapshot.key(id) as i16,
            Device::Analog => match (index, id) {
                (analog::INDEX_LEFT, analog::ID_X) => state.analog_left[0],
                (analog::INDEX_LEFT, analog::ID_Y) => state.analog_left[1],
                (analog::INDEX_RIGHT, analog::ID_X) => state.analog_right[0],
                (analog::INDEX_RIGHT, analog::ID_Y) => state.analog_right[1],
                (analog::INDEX_BUTTON, id) if id < JOYPAD_BUTTONS => {
                    match state.analog_buttons[id as usize] {
                        0 if state.joypad & (1 << id) != 0 => ANALOG_MAX,
                        value => value,
                    }
                }
                _ => 0,
            },
            Device::Mouse => {
                let bit = |b: MouseButtons| (state.mouse_buttons & b as u32 != 0) as i16;
                match id {
                    mouse::ID_X => state.mouse_delta[0],
                    mouse::ID_Y => state.mouse_delta[1],
                    mouse::ID_LEFT => bit(MouseButtons::Left),
                    mouse::ID_RIGHT => bit(MouseButtons::Right),
                    mouse::ID_MIDDLE => bit(MouseButtons::Middle),
                    mouse::ID_WHEELUP => bit(MouseButtons::WheelUp),
                    mouse::ID_WHEELDOWN => bit(MouseButtons::WheelDown),
                    mouse::ID_BUTTON_4 => bit(MouseButtons::Button4),
                    mouse::ID_BUTTON_5 => bit(MouseButtons::Button5),
                    _ => 0,
                }
            }
            Device::Pointer => match id {
                pointer::ID_X => state.pointer[0],
                pointer::ID_Y => state.pointer[1],
                pointer::ID_PRESSED => state.pointer_pressed as i16,
                _ => 0,
            },
            Device::Lightgun => {
                let bit = |b: LightgunButtons| (state.lightgun_buttons & b as u32 != 0) as i16;
                match id {
                    lightgun::ID_SCREEN_X => state.lightgun[0],
                    lightgun::ID_SCREEN_Y => state.lightgun[1],
                    lightgun::ID_TRIGGER => bit(LightgunButtons::Trigger),
                    lightgun::ID_RELOAD => bit(LightgunButtons::Reload),
                    lightgun::ID_START => bit(LightgunButtons::Start),
                    lightgun::ID_SELECT => bit(LightgunButtons::Select),
                    lightgun::ID_AUX_A => bit(LightgunButtons::AuxA),
                    lightgun::ID_AUX_B => bit(LightgunButtons::AuxB),
                    lightgun::ID_AUX_C => bit(LightgunButtons::AuxC),
                    lightgun::ID_IS_OFFSCREEN => bit(LightgunButtons::Offscreen),
                    _ => 0,
                }
            }
        }
    }
}

fn joypad(state: &PortState, id: u32) -> i16 {
    if id == JOYPAD_ID_MASK {
        // Bitmask query: reinterpret all 16 bits.
        state.joypad as i16
    } else if id < JOYPAD_BUTTONS {
        ((state.joypad >> id) & 1) as i16
    } else {
        0
    }
}

/// `retro_input_poll_t` installed into the core.
pub(crate) extern "C" fn input_poll() {
    let handled = state::with_active(|ctx| match ctx.input.try_borrow_mut() {
        Ok(mut input) => input.poll(),
        Err(_) => log::warn!("reentrant input poll ignored"),
    });
    if handled.is_none() {
        log::warn!("input poll with no active host; ignored");
    }
}

/// `retro_input_state_t` installed into the core.
pub(crate) extern "C" fn input_state(
    port: c_uint,
    device: c_uint,
    index: c_uint,
    id: c_uint,
) -> i16 {
    state::with_active(|ctx| match ctx.input.try_borrow_mut() {
        Ok(mut input) => input.state(port, device, index, id),
        Err(_) => 0,
    })
    .unwrap_or(0)
}
