//! Video refresh delivery.
//!
//! The core hands over a borrowed frame per step via `video_refresh(data, w, h, pitch)`.
//! The host copies exactly the bytes the frame occupies (`(h - 1) * pitch + w * bpp`),
//! keeps that copy as the *retained* frame and passes a [`VideoFrame`] view to the sink.
//! A null `data` pointer is a dupe: the retained frame is presented again unchanged.

use crate::abi::PixelFormat;
use crate::state;
use std::ffi::{c_uint, c_void};

/// Receives every presented frame.
pub trait VideoSink {
    fn present(&mut self, frame: &VideoFrame<'_>);
}

/// A frame as the sink sees it. Rows are `pitch` bytes apart; only the first
/// `width * bytes_per_pixel` bytes of each row are pixels.
#[derive(Clone, Copy, Debug)]
pub struct VideoFrame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub pitch: usize,
    pub format: PixelFormat,
    /// The core asked for the previous frame to be shown again.
    pub duplicate: bool,
}

impl<'a> VideoFrame<'a> {
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Pixel bytes of row `y`, without padding.
    pub fn row(&self, y: u32) -> Option<&'a [u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.pitch;
        self.data.get(start..start + self.row_bytes())
    }

    pub fn rows(&self) -> impl Iterator<Item = &'a [u8]> + use<'a> {
        let frame = *self;
        (0..frame.height).filter_map(move |y| frame.row(y))
    }
}

/// Bytes a frame occupies in memory, or `None` if `pitch` is smaller than a row.
pub fn frame_span(width: u32, height: u32, pitch: usize, format: PixelFormat) -> Option<usize> {
    let row = (width as usize).checked_mul(format.bytes_per_pixel())?;
    if pitch < row {
        return None;
    }
    if height == 0 || width == 0 {
        return Some(0);
    }
    (height as usize - 1).checked_mul(pitch)?.checked_add(row)
}

#[derive(Debug, Default)]
struct RetainedFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    pitch: usize,
    format: PixelFormat,
}

impl RetainedFrame {
    fn view(&self, duplicate: bool) -> VideoFrame<'_> {
        VideoFrame {
            data: &self.data,
            width: self.width,
            height: self.height,
            pitch: self.pitch,
            format: self.format,
            duplicate,
        }
    }
}

#[derive(Default)]
pub struct VideoPipeline {
    sink: Option<Box<dyn VideoSink>>,
    retained: Option<RetainedFrame>,
    refreshes_this_step: u32,
    presented: u64,
    dropped: u64,
}

impl std::fmt::Debug for VideoPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoPipeline")
            .field("has_sink", &self.sink.is_some())
            .field("retained", &self.retained.is_some())
            .field("presented", &self.presented)
            .field("dropped", &self.dropped)
            .finish()
    }
}

impl VideoPipeline {
    pub fn set_sink(&mut self, sink: Box<dyn VideoSink>) {
        self.sink = Some(sink);
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub(crate) fn begin_step(&mut self) {
        self.refreshes_this_step = 0;
    }

    pub(crate) fn end_step(&mut self) {
        if self.refreshes_this_step == 0 {
            log::trace!("core produced no video this step");
        }
    }

    /// Forget the retained frame; a dupe before the next real frame presents nothing.
    pub(crate) fn clear(&mut self) {
        self.retained = None;
    }

    pub fn retained(&self) -> Option<VideoFrame<'_>> {
        self.retained.as_ref().map(|frame| frame.view(false))
    }

    pub fn refreshes_this_step(&self) -> u32 {
        self.refreshes_this_step
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Deliver one refresh. `data == None` is a dupe request.
    ///
    /// `data` must cover at least [`frame_span`] bytes; extra bytes are ignored.
    /// Returns whether anything reached the sink.
    pub fn refresh(
        &mut self,
        data: Option<&[u8]>,
        width: u32,
        height: u32,
        pitch: usize,
        format: PixelFormat,
    ) -> bool {
        self.refreshes_this_step += 1;
        if self.refreshes_this_step == 2 {
            log::warn!("core called video refresh more than once in a step");
        }

        match data {
            Some(data) => {
                let Some(span) = frame_span(width, height, pitch, format) else {
                    log::error!(
                        "dropping {width}x{height} frame: pitch {pitch} is smaller than a row"
                    );
                    self.dropped += 1;
                    return false;
                };
                let Some(bytes) = data.get(..span) else {
                    log::error!(
                        "dropping {width}x{height} frame: {} bytes given, {span} needed",
                        data.len()
                    );
                    self.dropped += 1;
                    return false;
                };
                let retained = self.retained.get_or_insert_with(RetainedFrame::default);
                retained.data.clear();
                retained.data.extend_from_slice(bytes);
                retained.width = width;
                retained.height = height;
                retained.pitch = pitch;
                retained.format = format;
                self.present(false)
            }
            None => {
                if self.retained.is_none() {
                    log::debug!("dupe requested before any frame; nothing to present");
                    return false;
                }
                self.present(true)
            }
        }
    }

    fn present(&mut self, duplicate: bool) -> bool {
        let (Some(sink), Some(frame)) = (self.sink.as_mut(), self.retained.as_ref()) else {
            return false;
        };
        sink.present(&frame.view(duplicate));
        self.presented += 1;
        true
    }
}

/// Convert a frame to tightly packed RGBA8, dropping row padding.
pub fn frame_to_rgba8(frame: &VideoFrame<'_>) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.width as usize * frame.height as usize * 4);
    for row in frame.rows() {
        match frame.format {
            PixelFormat::Xrgb8888 => {
                for px in row.chunks_exact(4) {
                    let v = u32::from_ne_bytes([px[0], px[1], px[2], px[3]]);
                    out.extend_from_slice(&[(v >> 16) as u8, (v >> 8) as u8, v as u8, 0xff]);
                }
            }
            PixelFormat::Rgb565 => {
                for px in row.chunks_exact(2) {
                    let v = u16::from_ne_bytes([px[0], px[1]]);
                    let r = expand5((v >> 11) & 0x1f);
                    let g = expand6((v >> 5) & 0x3f);
                    let b = expand5(v & 0x1f);
                    out.extend_from_slice(&[r, g, b, 0xff]);
                }
            }
            PixelFormat::Xrgb1555 => {
                for px in row.chunks_exact(2) {
                    let v = u16::from_ne_bytes([px[0], px[1]]);
                    let r = expand5((v >> 10) & 0x1f);
                    let g = expand5((v >> 5) & 0x1f);
                    let b = expand5(v & 0x1f);
                    out.extend_from_slice(&[r, g, b, 0xff]);
                }
            }
        }
    }
    out
}

fn expand5(v: u16) -> u8 {
    ((v << 3) | (v >> 2)) as u8
}

fn expand6(v: u16) -> u8 {
    ((v << 2) | (v >> 4)) as u8
}

/// `retro_video_refresh_t` installed into the core.
pub(crate) extern "C" fn video_refresh(
    data: *const c_void,
    width: c_uint,
    height: c_uint,
    pitch: usize,
) {
    let delivered = state::with_active(|ctx| {
        let format = match ctx.environment.try_borrow() {
            Ok(environment) => environment.pixel_format(),
            Err(_) => {
                log::warn!("video refresh during environment call; frame dropped");
                return;
            }
        };
        let Ok(mut video) = ctx.video.try_borrow_mut() else {
            log::warn!("reentrant video refresh; frame dropped");
            return;
        };

        if data.is_null() {
            video.refresh(None, width, height, pitch, format);
            return;
        }
        let Some(span) = frame_span(width, height, pitch, format) else {
            // Let the pipeline count and log the drop.
            video.refresh(Some(&[]), width, height, pitch, format);
            return;
        };
        // SAFETY: the core guarantees `data` covers the frame it describes for the
        // duration of this call; `span` is exactly that extent.
        let bytes = unsafe { std::slice::from_raw_parts(data as *const u8, span) };
        video.refresh(Some(bytes), width, height, pitch, format);
    });
    if delivered.is_none() {
        log::warn!("video refresh with no active host; ignored");
    }
}
