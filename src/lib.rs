//! linecam
//!
//! Userland driver core for USB single-line CCD cameras (3648 effective
//! pixels, 13 light-shielded pixels) used to locate a light peak, such as a
//! laser line, with sub-pixel precision.
//!
//! # Architecture
//!
//! A [`DeviceSession`] exclusively owns one camera link and one frame slot:
//!
//! 1. `capture()` reads a frame through the [`Transport`], stores it as `raw`,
//!    copies it to `filtered` and computes the dark mean.
//! 2. `apply_filter()` recomputes `filtered` from `raw` (default: subtract
//!    the dark mean, clamped at zero).
//! 3. `apply_estimator()` reduces `filtered` to one number (default: centroid
//!    of the pixels at or above three times the dark mean).
//!
//! A failed capture never touches the slot. Filters and estimators are
//! replaceable at runtime and receive a caller-owned context value.
//!
//! # Module Structure
//!
//! - `frame`: single-slot frame storage and read-only views
//! - `filter` / `estimator`: pluggable pipeline stages and shipped defaults
//! - `fifo`: device queue depth validation and backpressure advice
//! - `transport`: device link contract and the synthetic `stub://` camera
//! - `session`: open/configure/capture/close orchestration
//! - `config`: file and environment configuration

pub mod config;
pub mod error;
pub mod estimator;
pub mod fifo;
pub mod filter;
pub mod frame;
pub mod session;
pub mod transport;

pub use config::LineCamConfig;
pub use error::{CaptureFault, LineCamError, Result};
pub use estimator::{CentroidEstimator, Estimator, FnEstimator, PeakEstimator, NO_PEAK};
pub use fifo::{Backpressure, FifoDepth, FIFO_CAPACITY};
pub use filter::{DarkSubtraction, Filter, FnFilter, ThresholdFilter};
pub use frame::{
    FrameMeta, FrameSnapshot, FrameView, Reading, DARK_PIXEL_COUNT, DARK_PIXEL_RANGE, PIXEL_COUNT,
};
pub use session::{DeviceSession, Mode, SessionHandle, SessionOptions, SessionState};
pub use transport::{DeviceInfo, ExposureRange, StubConfig, StubTransport, Transport};

/// Library name and version, e.g. `linecam 0.1.0`.
pub fn library_version() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
}
