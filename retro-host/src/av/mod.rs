//! Audio/Video delivery for retro-host.
//!
//! This module implements the "core produces, host consumes" side of a step:
//!
//! - Video: the core calls `video_refresh(data, width, height, pitch)` at most once per step.
//!   The host copies the frame out of core memory, retains it for dupes, and presents it to
//!   the registered [`VideoSink`].
//!
//! - Audio: the core calls `audio_sample(l, r)` or `audio_sample_batch(data, frames)`. Frames
//!   go to the registered [`AudioSink`]; rejected frames are parked in a bounded buffer and
//!   re-offered first on the next batch call.
//!
//! Notes / limitations (current):
//! - We always copy out of core memory (no zero-copy).
//! - Pixel formats are not converted on the hot path; [`frame_to_rgba8`] exists for sinks
//!   that want RGBA.

pub mod audio;
pub mod video;

pub use audio::{AudioPipeline, AudioSink};
pub use video::{VideoFrame, VideoPipeline, VideoSink, frame_span, frame_to_rgba8};

/// Discards every frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullVideo;

impl VideoSink for NullVideo {
    fn present(&mut self, _frame: &VideoFrame<'_>) {}
}

/// Accepts and discards every sample.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullAudio;

impl AudioSink for NullAudio {
    fn push(&mut self, samples: &[i16]) -> usize {
        samples.len() / 2
    }
}
