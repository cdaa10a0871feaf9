//! Single-slot frame storage.
//!
//! A session owns exactly one `FrameBuffer`. Every successful capture
//! overwrites it wholesale; there is no history.
//!
//! - `raw`: samples exactly as read from the device. Written once per capture.
//! - `filtered`: starts as a copy of `raw`, the only array transforms touch.
//! - `FrameView`: borrowed, read-only view handed out by the session.
//! - `FrameSnapshot`: owned copy for binding layers and JSON output.
//!
//! Installing a reading validates it completely before touching the slot, so a
//! rejected reading never leaves a half-written frame behind.

use serde::Serialize;
use std::ops::Range;

use crate::error::CaptureFault;

/// Number of effective pixels on the sensor.
pub const PIXEL_COUNT: usize = 3648;

/// Number of light-shielded pixels used for the dark-current estimate.
pub const DARK_PIXEL_COUNT: usize = 13;

/// Position of the light-shielded pixels inside the pixel array.
pub const DARK_PIXEL_RANGE: Range<usize> = 0..DARK_PIXEL_COUNT;

/// One frame as delivered by a transport, before it is installed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reading {
    pub pixels: Vec<u16>,
    /// Device-side timestamp (wraps at `u16::MAX`).
    pub timestamp: u16,
}

/// Per-frame metadata passed to filters and estimators.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FrameMeta {
    pub timestamp: u16,
    pub dark_mean: u16,
    /// Number of frames installed so far; 0 means the slot is still empty.
    pub sequence: u64,
}

/// Integer mean of the light-shielded pixels, or 0 when `pixels` is too
/// short to contain them.
pub fn dark_mean(pixels: &[u16]) -> u16 {
    let Some(dark) = pixels.get(DARK_PIXEL_RANGE) else {
        return 0;
    };
    let sum: u32 = dark.iter().map(|&p| u32::from(p)).sum();
    (sum / DARK_PIXEL_COUNT as u32) as u16
}

// ----------------------------------------------------------------------------
// FrameBuffer: the session's single mutable slot
// ----------------------------------------------------------------------------

pub struct FrameBuffer {
    raw: Vec<u16>,
    filtered: Vec<u16>,
    /// Filter output lands here first and is swapped in on success.
    scratch: Vec<u16>,
    meta: FrameMeta,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            raw: vec![0; PIXEL_COUNT],
            filtered: vec![0; PIXEL_COUNT],
            scratch: vec![0; PIXEL_COUNT],
            meta: FrameMeta::default(),
        }
    }

    /// Replace the slot with a new reading.
    ///
    /// The reading is rejected, and the slot left untouched, unless it carries
    /// exactly [`PIXEL_COUNT`] samples.
    pub fn install(&mut self, reading: Reading) -> Result<FrameMeta, CaptureFault> {
        if reading.pixels.len() != PIXEL_COUNT {
            return Err(CaptureFault::Malformed {
                expected: PIXEL_COUNT,
                actual: reading.pixels.len(),
            });
        }

        self.raw = reading.pixels;
        self.filtered.copy_from_slice(&self.raw);
        self.meta = FrameMeta {
            timestamp: reading.timestamp,
            dark_mean: dark_mean(&self.raw),
            sequence: self.meta.sequence + 1,
        };
        Ok(self.meta)
    }

    pub fn is_empty(&self) -> bool {
        self.meta.sequence == 0
    }

    pub fn meta(&self) -> FrameMeta {
        self.meta
    }

    pub fn raw(&self) -> &[u16] {
        &self.raw
    }

    pub fn filtered(&self) -> &[u16] {
        &self.filtered
    }

    /// Restore `filtered` to an exact copy of `raw`.
    pub(crate) fn reset_filtered(&mut self) {
        self.filtered.copy_from_slice(&self.raw);
    }

    /// Run `transform` over a fresh copy of `raw` and commit the result only
    /// if it succeeds.
    pub(crate) fn refilter<E>(
        &mut self,
        transform: impl FnOnce(&FrameMeta, &[u16], &mut [u16]) -> Result<(), E>,
    ) -> Result<(), E> {
        self.scratch.copy_from_slice(&self.raw);
        transform(&self.meta, &self.raw, &mut self.scratch)?;
        std::mem::swap(&mut self.filtered, &mut self.scratch);
        Ok(())
    }

    pub fn view(&self) -> FrameView<'_> {
        FrameView { buffer: self }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Read-only access
// ----------------------------------------------------------------------------

/// Borrowed view of the current frame. Cannot mutate the slot.
#[derive(Clone, Copy)]
pub struct FrameView<'a> {
    buffer: &'a FrameBuffer,
}

impl<'a> FrameView<'a> {
    pub fn raw(&self) -> &'a [u16] {
        &self.buffer.raw
    }

    pub fn filtered(&self) -> &'a [u16] {
        &self.buffer.filtered
    }

    pub fn timestamp(&self) -> u16 {
        self.buffer.meta.timestamp
    }

    pub fn dark_mean(&self) -> u16 {
        self.buffer.meta.dark_mean
    }

    pub fn sequence(&self) -> u64 {
        self.buffer.meta.sequence
    }

    pub fn meta(&self) -> FrameMeta {
        self.buffer.meta
    }

    pub fn to_snapshot(&self) -> FrameSnapshot {
        FrameSnapshot {
            timestamp: self.timestamp(),
            dark_mean: self.dark_mean(),
            sequence: self.sequence(),
            raw: self.raw().to_vec(),
            filtered: self.filtered().to_vec(),
        }
    }
}

/// Owned copy of a frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FrameSnapshot {
    pub timestamp: u16,
    pub dark_mean: u16,
    pub sequence: u64,
    pub raw: Vec<u16>,
    pub filtered: Vec<u16>,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
