//! Audio sample delivery.
//!
//! Samples are interleaved stereo `i16`. A core may emit them one frame at a time
//! (`audio_sample`) or in batches (`audio_sample_batch`); both end up in
//! [`AudioPipeline::batch`].
//!
//! Backpressure:
//! - the sink reports how many frames it accepted;
//! - whatever it refuses is parked in a bounded pending buffer and re-offered, ahead of any
//!   newer samples, on the next batch call;
//! - only when that buffer is full does the host report fewer frames consumed than offered.

use crate::abi::AvTiming;
use crate::state;
use std::collections::VecDeque;

// Up front; a larger configured capacity grows on demand.
const MAX_PREALLOCATED_SAMPLES: usize = 1 << 16;

/// Receives interleaved stereo samples.
pub trait AudioSink {
    /// Offer `samples` (`samples.len() / 2` frames). Returns how many whole frames were
    /// accepted; the rest will be offered again later.
    fn push(&mut self, samples: &[i16]) -> usize;

    /// Called once the core's timing is known, and again whenever the core changes it.
    fn set_timing(&mut self, _timing: &AvTiming) {}
}

pub struct AudioPipeline {
    sink: Option<Box<dyn AudioSink>>,
    pending: VecDeque<i16>,
    capacity_frames: usize,
    frames_this_step: usize,
}

impl std::fmt::Debug for AudioPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioPipeline")
            .field("has_sink", &self.sink.is_some())
            .field("pending_frames", &self.pending_frames())
            .field("capacity_frames", &self.capacity_frames)
            .finish()
    }
}

impl AudioPipeline {
    pub fn new(capacity_frames: usize) -> Self {
        Self {
            sink: None,
            pending: VecDeque::with_capacity(
                capacity_frames
                    .saturating_mul(2)
                    .min(MAX_PREALLOCATED_SAMPLES),
            ),
            capacity_frames,
            frames_this_step: 0,
        }
    }

    pub fn set_sink(&mut self, sink: Box<dyn AudioSink>) {
        self.sink = Some(sink);
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub(crate) fn set_timing(&mut self, timing: &AvTiming) {
        if let Some(sink) = self.sink.as_mut() {
            sink.set_timing(timing);
        }
    }

    pub(crate) fn begin_step(&mut self) {
        self.frames_this_step = 0;
    }

    pub fn pending_frames(&self) -> usize {
        self.pending.len() / 2
    }

    /// Frames taken from the core since the step began.
    pub fn frames_this_step(&self) -> usize {
        self.frames_this_step
    }

    /// Drop anything still pending.
    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }

    /// Offer `samples` to the sink. Returns the number of frames taken off the core's hands.
    pub fn batch(&mut self, samples: &[i16]) -> usize {
        let frames = samples.len() / 2;
        let samples = &samples[..frames * 2];

        self.flush_pending();

        let accepted = if self.pending.is_empty() {
            self.offer(samples)
        } else {
            // Older frames are still waiting; keep the stream in order.
            0
        };

        let room = self.capacity_frames.saturating_sub(self.pending_frames());
        let parked = (frames - accepted).min(room);
        let start = accepted * 2;
        self.pending.extend(&samples[start..start + parked * 2]);

        let taken = accepted + parked;
        if taken < frames {
            log::debug!(
                "audio backpressure: took {taken} of {frames} frames ({} pending)",
                self.pending_frames()
            );
        }
        self.frames_this_step += taken;
        taken
    }

    /// Re-offer pending frames to the sink.
    pub fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let accepted = {
            let pending = self.pending.make_contiguous();
            let Some(sink) = self.sink.as_mut() else {
                return;
            };
            let frames = pending.len() / 2;
            sink.push(pending).min(frames)
        };
        self.pending.drain(..accepted * 2);
    }

    fn offer(&mut self, samples: &[i16]) -> usize {
        if samples.is_empty() {
            return 0;
        }
        match self.sink.as_mut() {
            Some(sink) => sink.push(samples).min(samples.len() / 2),
            None => 0,
        }
    }
}

/// `retro_audio_sample_t` installed into the core.
pub(crate) extern "C" fn audio_sample(left: i16, right: i16) {
    let delivered = state::with_active(|ctx| match ctx.audio.try_borrow_mut() {
        Ok(mut audio) => {
            audio.batch(&[left, right]);
        }
        Err(_) => log::warn!("reentrant audio sample dropped"),
    });
    if delivered.is_none() {
        log::warn!("audio sample with no active host; ignored");
    }
}

/// `retro_audio_sample_batch_t` installed into the core.
pub(crate) extern "C" fn audio_sample_batch(data: *const i16, frames: usize) -> usize {
    if data.is_null() || frames == 0 {
        return 0;
    }
    let Some(len) = frames.checked_mul(2) else {
        return 0;
    };
    // SAFETY: the core guarantees `frames` interleaved stereo frames at `data` for the
    // duration of this call.
    let samples = unsafe { std::slice::from_raw_parts(data, len) };

    state::with_active(|ctx| match ctx.audio.try_borrow_mut() {
        Ok(mut audio) => audio.batch(samples),
        Err(_) => {
            log::warn!("reentrant audio batch of {frames} frames refused");
            0
        }
    })
    .unwrap_or_else(|| {
        log::warn!("audio batch with no active host; refused");
        0
    })
}
