//! Capture sinks: last frame to PNG, audio stream to WAV.

use super::adjusted_sample_rate;
use crate::abi::AvTiming;
use crate::av::{AudioSink, VideoFrame, frame_to_rgba8};
use crate::config::FrontendConfig;
use anyhow::{Context, Result};
use std::cell::RefCell;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Write `frame` as an 8-bit RGBA PNG.
pub fn write_png(path: &Path, frame: &VideoFrame<'_>) -> Result<()> {
    let rgba = frame_to_rgba8(frame);
    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;

    let mut encoder = png::Encoder::new(BufWriter::new(file), frame.width, frame.height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder
        .write_header()
        .with_context(|| format!("failed to write PNG header to {}", path.display()))?;
    writer
        .write_image_data(&rgba)
        .with_context(|| format!("failed to write PNG data to {}", path.display()))?;
    writer.finish().context("failed to finish PNG")?;

    log::info!(
        "captured {}x{} frame to {}",
        frame.width,
        frame.height,
        path.display()
    );
    Ok(())
}

type Writer = hound::WavWriter<BufWriter<File>>;

struct WavState {
    path: PathBuf,
    config: FrontendConfig,
    writer: Option<Writer>,
    error: Option<anyhow::Error>,
    frames: u64,
}

/// Records everything the core plays as 16-bit stereo WAV.
///
/// The file is created once the core's timing is known, at the (possibly adjusted) sample
/// rate. Clone the capture before registering it to keep a handle for [`WavCapture::finish`].
#[derive(Clone)]
pub struct WavCapture {
    shared: Rc<RefCell<WavState>>,
}

impl WavCapture {
    pub fn new(path: impl Into<PathBuf>, config: FrontendConfig) -> Self {
        Self {
            shared: Rc::new(RefCell::new(WavState {
                path: path.into(),
                config,
                writer: None,
                error: None,
                frames: 0,
            })),
        }
    }

    /// Frames written so far.
    pub fn frames(&self) -> u64 {
        self.shared.borrow().frames
    }

    /// Flush the WAV header. Returns the number of frames written.
    pub fn finish(&self) -> Result<u64> {
        let mut state = self.shared.borrow_mut();
        if let Some(err) = state.error.take() {
            return Err(err);
        }
        let path = state.path.clone();
        let Some(writer) = state.writer.take() else {
            anyhow::bail!("no audio was captured to {}", path.display());
        };
        writer
            .finalize()
            .with_context(|| format!("failed to finalize {}", path.display()))?;
        log::info!("captured {} audio frames to {}", state.frames, path.display());
        Ok(state.frames)
    }
}

impl AudioSink for WavCapture {
    fn push(&mut self, samples: &[i16]) -> usize {
        let mut guard = self.shared.borrow_mut();
        let state = &mut *guard;
        let frames = samples.len() / 2;
        let Some(writer) = state.writer.as_mut() else {
            // Nothing to record into; drop rather than stall the core.
            return frames;
        };
        if let Err(err) = samples.iter().try_for_each(|&sample| writer.write_sample(sample)) {
            log::error!("audio capture failed: {err}");
            state.error = Some(anyhow::Error::new(err).context("failed to write WAV samples"));
            state.writer = None;
            return frames;
        }
        state.frames += frames as u64;
        frames
    }

    fn set_timing(&mut self, timing: &AvTiming) {
        let mut state = self.shared.borrow_mut();
        if state.writer.is_some() {
            log::warn!("core changed its sample rate mid-capture; keeping the original rate");
            return;
        }
        let rate = adjusted_sample_rate(timing, &state.config).round() as u32;
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        match hound::WavWriter::create(&state.path, spec) {
            Ok(writer) => {
                log::debug!("capturing audio at {rate} Hz to {}", state.path.display());
                state.writer = Some(writer);
            }
            Err(err) => {
                log::error!("cannot create {}: {err}", state.path.display());
                let context = format!("failed to create {}", state.path.display());
                state.error = Some(anyhow::Error::new(err).context(context));
            }
        }
    }
}
