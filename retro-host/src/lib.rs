//! retro-host: a libretro core host.
//!
//! Loads a libretro core (a shared library implementing API version 1), negotiates
//! capabilities with it over the environment callback, drives its lifecycle and per-frame
//! loop, and routes the video, audio and input traffic it produces and consumes.
//!
//! Layers, leaves first:
//! - [`abi`]: identifiers and owned mirrors of the raw `libretro-sys` structs.
//! - [`loader`]: binds the `retro_*` entry points, from a library or linked functions.
//! - [`environment`], [`av`], [`input`]: what the core's callbacks land in.
//! - [`host`]: the lifecycle state machine, [`CoreHost`].
//! - [`frontend`]: a headless pacing loop with capture sinks, used by the CLI.
//!
//! ```no_run
//! use retro_host::{CoreHost, HostCallbacks, HostConfig, av::{NullAudio, NullVideo}, input::NullInput};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut host = CoreHost::open("snes9x_libretro.so", HostConfig::default())?;
//! host.init()?;
//! host.register(HostCallbacks {
//!     video: Box::new(NullVideo),
//!     audio: Box::new(NullAudio),
//!     input: Box::new(NullInput),
//! })?;
//! host.load_game(retro_host::abi::GameDescriptor::from_path("game.sfc"))?;
//! let timing = host.system_av_info()?;
//! println!("{} fps", timing.fps);
//! host.run()?;
//! # Ok(())
//! # }
//! ```

pub mod abi;
pub mod av;
pub mod config;
pub mod environment;
pub mod error;
pub mod frontend;
pub mod host;
pub mod input;
pub mod loader;
mod state;

pub use config::HostConfig;
pub use error::{HostError, HostResult, LoadError};
pub use host::{CoreHost, HostCallbacks, HostState};
pub use loader::{Core, CoreSymbols, OptionalSymbols};
