//! Headless frontend.
//!
//! Drives a configured [`CoreHost`] the way an interactive frontend would, minus the window:
//! - loads content (reading it into memory unless the core needs a path),
//! - paces `run` to the core's frame rate, or runs unthrottled,
//! - fast-forward runs several frames per tick,
//! - pause / resume,
//! - battery saves are loaded after the content and written back on stop,
//! - messages from the core are kept for as many frames as the core asked for.

pub mod capture;
pub mod saves;

use crate::abi::{AvTiming, GameDescriptor};
use crate::config::FrontendConfig;
use crate::environment::CoreMessage;
use crate::host::{CoreHost, HostState};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Sample rate to play a core's audio at.
///
/// Cores running faster than the display (e.g. 60.1 Hz consoles on a 60 Hz screen) would
/// drift out of sync, so their rate is scaled by `display_hz / fps`.
pub fn adjusted_sample_rate(timing: &AvTiming, config: &FrontendConfig) -> f64 {
    if timing.fps > config.audio_rate_fps_threshold {
        let ratio = config.display_hz / timing.fps;
        log::debug!(
            "scaling audio rate {} Hz by {ratio:.4} for a {:.3} fps core",
            timing.sample_rate,
            timing.fps
        );
        timing.sample_rate * ratio
    } else {
        timing.sample_rate
    }
}

/// Why [`Frontend::run`] returned.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StopReason {
    FrameLimit,
    ShutdownRequested,
    Paused,
}

pub struct Frontend {
    host: CoreHost,
    config: FrontendConfig,
    save_dir: Option<PathBuf>,
    content: Option<PathBuf>,
    timing: Option<AvTiming>,
    fast_forward: bool,
    message: Option<(CoreMessage, u32)>,
}

impl Frontend {
    /// Wrap a host whose callbacks are registered. `init` is called if it has not been.
    pub fn new(mut host: CoreHost) -> Result<Self> {
        if matches!(host.state(), HostState::Unloaded | HostState::Deinitialized) {
            host.init().context("failed to initialize core")?;
        }
        let config = host.config().frontend.clone();
        let save_dir = host.config().paths.save_dir.clone();
        Ok(Self {
            host,
            config,
            save_dir,
            content: None,
            timing: None,
            fast_forward: false,
            message: None,
        })
    }

    pub fn host(&self) -> &CoreHost {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut CoreHost {
        &mut self.host
    }

    pub fn into_host(self) -> CoreHost {
        self.host
    }

    /// Load `content` (or start without content), query AV info and restore battery saves.
    pub fn start(&mut self, content: Option<&Path>) -> Result<AvTiming> {
        match content {
            Some(path) => {
                let game = if self.host.system_info().need_fullpath {
                    GameDescriptor::from_path(path)
                } else {
                    let data = std::fs::read(path)
                        .with_context(|| format!("failed to read content {}", path.display()))?;
                    GameDescriptor::with_contents(path, data)
                };
                if let Some(ext) = game.extension() {
                    if !self.host.system_info().supports_extension(&ext) {
                        log::warn!(
                            "{} does not list .{ext} among its extensions; trying anyway",
                            self.host.system_info().library_name
                        );
                    }
                }
                self.host
                    .load_game(game)
                    .with_context(|| format!("failed to load {}", path.display()))?;
            }
            None => self
                .host
                .load_no_game()
                .context("core needs content to start")?,
        }
        self.content = content.map(Path::to_path_buf);

        let timing = self.host.system_av_info()?;
        self.timing = Some(timing);

        if let (Some(save_dir), Some(content)) = (&self.save_dir, &self.content) {
            saves::load_save_ram(&mut self.host, save_dir, content)?;
        }
        Ok(timing)
    }

    pub fn timing(&self) -> Option<AvTiming> {
        self.timing
    }

    /// Time between frames at the core's rate.
    pub fn frame_interval(&self) -> Duration {
        let fps = self
            .timing
            .map(|timing| timing.fps)
            .filter(|fps| *fps > 0.0)
            .unwrap_or(self.config.display_hz);
        Duration::from_secs_f64(1.0 / fps)
    }

    pub fn fast_forward(&self) -> bool {
        self.fast_forward
    }

    pub fn set_fast_forward(&mut self, enabled: bool) {
        if self.fast_forward && !enabled {
            // Audio queued while fast-forwarding would play late.
            self.host.discard_pending_audio();
        }
        self.fast_forward = enabled;
    }

    pub fn pause(&mut self) -> Result<()> {
        self.host.pause()?;
        log::info!("paused at frame {}", self.host.frame_count());
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        self.host.resume()?;
        log::info!("resumed");
        Ok(())
    }

    pub fn is_paused(&self) -> bool {
        self.host.state() == HostState::Paused
    }

    /// The core message currently on screen, if any.
    pub fn message(&self) -> Option<&CoreMessage> {
        self.message.as_ref().map(|(message, _)| message)
    }

    fn frames_per_tick(&self) -> u32 {
        if self.fast_forward {
            self.config.fast_forward_multiplier.max(1)
        } else {
            1
        }
    }

    /// Run one tick: one frame, or several while fast-forwarding, capped at `budget`.
    /// Returns the number of frames run; 0 while paused.
    pub fn tick(&mut self, budget: Option<u64>) -> Result<u32> {
        if self.is_paused() {
            return Ok(0);
        }
        let mut frames = self.frames_per_tick();
        if let Some(budget) = budget {
            frames = frames.min(budget.min(u32::MAX as u64) as u32);
        }
        for _ in 0..frames {
            self.host.run()?;
            self.update_message();
        }
        if self.host.take_av_timing_changed() {
            self.timing = self.host.av_timing();
        }
        Ok(frames)
    }

    fn update_message(&mut self) {
        if let Some(latest) = self.host.take_messages().pop() {
            let frames = latest.frames;
            self.message = Some((latest, frames));
            return;
        }
        if let Some((_, remaining)) = self.message.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                self.message = None;
            }
        }
    }

    /// Run until `max_frames` have been run in total, the core asks to shut down, or the
    /// frontend is paused.
    pub fn run(&mut self, max_frames: Option<u64>) -> Result<StopReason> {
        let mut deadline = Instant::now();
        loop {
            if self.host.shutdown_requested() {
                return Ok(StopReason::ShutdownRequested);
            }
            if self.is_paused() {
                return Ok(StopReason::Paused);
            }
            let budget = match max_frames {
                Some(limit) => {
                    let remaining = limit.saturating_sub(self.host.frame_count());
                    if remaining == 0 {
                        return Ok(StopReason::FrameLimit);
                    }
                    Some(remaining)
                }
                None => None,
            };

            self.tick(budget)?;

            if self.config.unthrottled || self.fast_forward {
                continue;
            }
            let interval = self.frame_interval();
            deadline += interval;
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            } else if now - deadline > interval * 4 {
                log::debug!("running behind by {:?}; resetting pacing", now - deadline);
                deadline = now;
            }
        }
    }

    /// Write battery saves back and shut the core down.
    pub fn stop(&mut self) -> Result<()> {
        if self.host.state().has_game() {
            if let (Some(save_dir), Some(content)) = (&self.save_dir, &self.content) {
                saves::store_save_ram(&self.host, save_dir, content)?;
            }
        }
        self.host.deinit()?;
        Ok(())
    }
}
