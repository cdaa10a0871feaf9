//! Device-side frame queue monitoring.
//!
//! The camera buffers at most [`FIFO_CAPACITY`] frames. The depth is only a
//! signal: this module validates and interprets it, while the waiting or
//! draining policy stays with the caller.

use serde::Serialize;

use crate::error::{LineCamError, Result};

/// Maximum number of frames the device can queue.
pub const FIFO_CAPACITY: u8 = 4;

/// Validated count of frames queued on the device (0..=4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct FifoDepth(u8);

/// What the caller should do next given the queue depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backpressure {
    /// Queue is full; read frames before asking for more.
    Drain,
    /// At least one frame is ready.
    Ready,
    /// Nothing queued; a capture will block until data arrives (or, in
    /// triggered mode, until the trigger fires).
    Wait,
}

impl FifoDepth {
    /// Validate a raw device count. Out-of-range values, including the
    /// negative codes the transport uses for failures, are connection errors.
    pub fn new(raw: i32) -> Result<Self> {
        if raw < 0 || raw > i32::from(FIFO_CAPACITY) {
            return Err(LineCamError::connection(anyhow::anyhow!(
                "device reported fifo depth {raw}, expected 0..={FIFO_CAPACITY}"
            )));
        }
        Ok(Self(raw as u8))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn is_full(self) -> bool {
        self.0 == FIFO_CAPACITY
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn backpressure(self) -> Backpressure {
        if self.is_full() {
            Backpressure::Drain
        } else if self.is_empty() {
            Backpressure::Wait
        } else {
            Backpressure::Ready
        }
    }
}
