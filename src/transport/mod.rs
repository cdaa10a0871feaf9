//! Device transports.
//!
//! A transport is the only thing that talks to the camera. It moves
//! configuration registers down and frames up; it does not interpret pixels.
//!
//! - `stub://` identifiers open the synthetic line camera (testing, demos)
//! - USB hardware backends plug in by implementing [`Transport`] and are
//!   handed to `DeviceSession::with_transport`
//!
//! Transports report failures through `anyhow`; the session decides which
//! error family a failure belongs to.

pub mod stub;

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::time::Duration;

use crate::frame::Reading;
use crate::Mode;

pub use stub::{StubConfig, StubTransport};

/// Number of GPIO registers exposed by the camera.
pub const GPIO_REGISTERS: u8 = 4;

/// Exposure limits supported by a device, in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ExposureRange {
    pub min_ms: f32,
    pub max_ms: f32,
}

impl ExposureRange {
    pub fn contains(&self, ms: f32) -> bool {
        ms.is_finite() && ms >= self.min_ms && ms <= self.max_ms
    }
}

impl Default for ExposureRange {
    /// 0.1 ms steps held in a 16-bit register.
    fn default() -> Self {
        Self {
            min_ms: 0.1,
            max_ms: 6553.5,
        }
    }
}

/// Identity of an opened device.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub serial_number: String,
    pub firmware_version: String,
    pub exposure_range: ExposureRange,
}

/// Link to one physical (or synthetic) camera.
///
/// Implementations own the underlying handle. `close` must release it and be
/// safe to call any number of times.
pub trait Transport: Send {
    /// Transport identifier, used in log lines.
    fn name(&self) -> &'static str;

    /// Claim the device and report its identity.
    fn open(&mut self) -> Result<DeviceInfo>;

    fn write_exposure(&mut self, ms: f32) -> Result<()>;

    fn write_mode(&mut self, mode: Mode) -> Result<()>;

    /// Read one frame, waiting at most `timeout`.
    ///
    /// `Ok(None)` means nothing arrived in time. Implementations return
    /// whatever the device delivered; length checks happen in the session.
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Reading>>;

    /// Frames queued on the device. Negative values signal a driver failure.
    fn queued_frames(&mut self) -> Result<i32>;

    fn gpio_write(&mut self, register: u8, level: bool) -> Result<()>;

    fn gpio_read(&mut self, register: u8) -> Result<bool>;

    fn close(&mut self);
}

/// Resolve a device identifier into a transport.
pub fn connect(identifier: &str) -> Result<Box<dyn Transport>> {
    if identifier.starts_with("stub://") {
        let config = StubConfig::parse(identifier)?;
        return Ok(Box::new(StubTransport::new(config)));
    }
    Err(anyhow!(
        "no compatible device for identifier '{}' (supported: stub://<name>)",
        identifier
    ))
}
