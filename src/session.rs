//! Device session: the one object that owns a camera link and its frame slot.
//!
//! Lifecycle: `open` → configure/capture/query any number of times → `close`.
//! A closed session never reopens; build a new one instead. Dropping a
//! session closes it.
//!
//! Everything that mutates state goes through `&mut self`, so a session can be
//! moved between threads but never driven from two at once. The single piece
//! of shared state is the close request behind [`SessionHandle`], which lets
//! another thread end a capture blocked on an external trigger.

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{CaptureFault, LineCamError, Result};
use crate::estimator::{CentroidEstimator, Estimator, EstimatorSlot, FnEstimator};
use crate::fifo::FifoDepth;
use crate::filter::{DarkSubtraction, Filter, FilterSlot, FnFilter};
use crate::frame::{
    FrameBuffer, FrameMeta, FrameSnapshot, FrameView, Reading, DARK_PIXEL_COUNT, PIXEL_COUNT,
};
use crate::transport::{self, DeviceInfo, Transport, GPIO_REGISTERS};

pub const DEFAULT_DEVICE: &str = "stub://linecam";
pub const DEFAULT_EXPOSURE_MS: f32 = 10.0;
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_millis(1000);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Acquisition mode. Device-wide; persists until changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Mode {
    /// Free-running capture.
    #[default]
    Normal = 0,
    /// Capture completes only when the external trigger fires.
    #[serde(alias = "trigger")]
    Triggered = 1,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Normal => f.write_str("normal"),
            Mode::Triggered => f.write_str("triggered"),
        }
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(Mode::Normal),
            "triggered" | "trigger" => Ok(Mode::Triggered),
            other => Err(anyhow!(
                "unknown mode '{}' (expected normal or triggered)",
                other
            )),
        }
    }
}

/// Parameters used when opening a session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionOptions {
    /// Device identifier handed to [`transport::connect`].
    pub device: String,
    /// Exposure pushed to the device on open.
    pub exposure_ms: f32,
    /// Mode pushed to the device on open.
    pub mode: Mode,
    /// Upper bound on a normal-mode capture.
    pub capture_timeout: Duration,
    /// Slice length used while waiting for a trigger.
    pub poll_interval: Duration,
    /// Give up on a trigger after this long; `None` waits until the trigger
    /// fires or the session is closed.
    pub trigger_timeout: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            exposure_ms: DEFAULT_EXPOSURE_MS,
            mode: Mode::Normal,
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            trigger_timeout: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

/// Cross-thread close request for a session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    close_requested: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Ask the session to close. A capture waiting on a trigger returns
    /// `CaptureFault::Aborted` within one poll interval; any later operation
    /// finds the session closed.
    pub fn close(&self) {
        self.close_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_close_requested(&self) -> bool {
        self.close_requested.load(Ordering::SeqCst)
    }
}

/// An open link to one line camera plus its single frame slot.
///
/// `C` is the context type threaded through filters and estimators.
pub struct DeviceSession<C = ()> {
    transport: Box<dyn Transport>,
    info: DeviceInfo,
    options: SessionOptions,
    state: SessionState,
    exposure_ms: f32,
    mode: Mode,
    frame: FrameBuffer,
    filter: FilterSlot<C>,
    estimator: EstimatorSlot<C>,
    close_requested: Arc<AtomicBool>,
}

impl<C> DeviceSession<C> {
    /// Connect to `options.device` and bring the camera up.
    pub fn open(options: SessionOptions) -> Result<Self> {
        let transport = transport::connect(&options.device).map_err(LineCamError::Connection)?;
        Self::with_transport(transport, options)
    }

    /// Bring up a session over an already constructed transport.
    ///
    /// The transport is closed again if anything fails along the way.
    pub fn with_transport(mut transport: Box<dyn Transport>, options: SessionOptions) -> Result<Self> {
        let info = match bring_up(transport.as_mut(), &options) {
            Ok(info) => info,
            Err(err) => {
                log::warn!("DeviceSession: open {} failed: {}", options.device, err);
                transport.close();
                return Err(err);
            }
        };

        log::info!(
            "DeviceSession: opened {} via {} (serial {}, firmware {}, {} ms, {} mode)",
            options.device,
            transport.name(),
            info.serial_number,
            info.firmware_version,
            options.exposure_ms,
            options.mode
        );

        Ok(Self {
            transport,
            info,
            exposure_ms: options.exposure_ms,
            mode: options.mode,
            options,
            state: SessionState::Open,
            frame: FrameBuffer::new(),
            filter: FilterSlot::Default,
            estimator: EstimatorSlot::Default,
            close_requested: Arc::new(AtomicBool::new(false)),
        })
    }

    // ------------------------------------------------------------------------
    // Device configuration
    // ------------------------------------------------------------------------

    pub fn set_exposure(&mut self, ms: f32) -> Result<()> {
        self.ensure_open()?;
        let range = self.info.exposure_range;
        if !range.contains(ms) {
            return Err(LineCamError::invalid(
                "exposure_ms",
                format!("{} ms outside {}..={} ms", ms, range.min_ms, range.max_ms),
            ));
        }
        self.transport
            .write_exposure(ms)
            .context("write exposure")
            .map_err(LineCamError::Connection)?;
        self.exposure_ms = ms;
        log::info!("DeviceSession: exposure set to {} ms", ms);
        Ok(())
    }

    pub fn set_mode(&mut self, mode: Mode) -> Result<()> {
        self.ensure_open()?;
        self.transport
            .write_mode(mode)
            .context("write mode")
            .map_err(LineCamError::Connection)?;
        self.mode = mode;
        log::info!("DeviceSession: {} mode", mode);
        Ok(())
    }

    /// Frames currently queued on the device.
    pub fn query_fifo_depth(&mut self) -> Result<FifoDepth> {
        self.ensure_open()?;
        let raw = self
            .transport
            .queued_frames()
            .context("query fifo depth")
            .map_err(LineCamError::Connection)?;
        FifoDepth::new(raw).inspect_err(|err| log::warn!("DeviceSession: {}", err))
    }

    pub fn gpio_write(&mut self, register: u8, level: bool) -> Result<()> {
        self.ensure_open()?;
        check_register(register)?;
        self.transport
            .gpio_write(register, level)
            .with_context(|| format!("write gpio register {}", register))
            .map_err(LineCamError::Connection)
    }

    pub fn gpio_read(&mut self, register: u8) -> Result<bool> {
        self.ensure_open()?;
        check_register(register)?;
        self.transport
            .gpio_read(register)
            .with_context(|| format!("read gpio register {}", register))
            .map_err(LineCamError::Connection)
    }

    // ------------------------------------------------------------------------
    // Capture
    // ------------------------------------------------------------------------

    /// Acquire one frame into the slot.
    ///
    /// On any failure the previous frame is left exactly as it was. There is
    /// no retry here; use [`query_fifo_depth`](Self::query_fifo_depth) to
    /// decide when to try again.
    pub fn capture(&mut self) -> Result<FrameMeta> {
        self.ensure_open()?;
        let reading = match self.mode {
            Mode::Normal => self.read_once(),
            Mode::Triggered => self.wait_for_trigger(),
        };

        let installed = reading.and_then(|reading| self.frame.install(reading));
        match installed {
            Ok(meta) => {
                log::debug!(
                    "DeviceSession: frame {} (timestamp {}, dark mean {})",
                    meta.sequence,
                    meta.timestamp,
                    meta.dark_mean
                );
                Ok(meta)
            }
            Err(fault) => {
                if fault == CaptureFault::NoData {
                    log::debug!("DeviceSession: no frame ready");
                } else {
                    log::warn!("DeviceSession: capture failed: {}", fault);
                }
                if fault == CaptureFault::Aborted {
                    self.close();
                }
                Err(fault.into())
            }
        }
    }

    fn read_once(&mut self) -> std::result::Result<Reading, CaptureFault> {
        match self.transport.read_frame(self.options.capture_timeout) {
            Ok(Some(reading)) => Ok(reading),
            Ok(None) => Err(CaptureFault::NoData),
            Err(err) => Err(CaptureFault::Transport(format!("{:#}", err))),
        }
    }

    fn wait_for_trigger(&mut self) -> std::result::Result<Reading, CaptureFault> {
        let started = Instant::now();
        loop {
            if self.close_requested.load(Ordering::SeqCst) {
                return Err(CaptureFault::Aborted);
            }
            let mut slice = self.options.poll_interval;
            if let Some(limit) = self.options.trigger_timeout {
                let waited = started.elapsed();
                if waited >= limit {
                    return Err(CaptureFault::Timeout { waited });
                }
                slice = slice.min(limit - waited);
            }
            match self.transport.read_frame(slice) {
                Ok(Some(reading)) => return Ok(reading),
                Ok(None) => {}
                Err(err) => return Err(CaptureFault::Transport(format!("{:#}", err))),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Filter pipeline
    // ------------------------------------------------------------------------

    /// Recompute `filtered` from `raw` with the installed filter.
    pub fn apply_filter(&mut self, ctx: &mut C) -> Result<()> {
        self.ensure_frame("apply filter")?;
        match &self.filter {
            FilterSlot::Default => refilter(&mut self.frame, &DarkSubtraction, ctx),
            FilterSlot::Custom(filter) => refilter(&mut self.frame, filter.as_ref(), ctx),
            FilterSlot::Disabled => {
                self.frame.reset_filtered();
                Ok(())
            }
        }
    }

    /// Recompute `filtered` with `filter`, leaving the installed one alone.
    pub fn apply_filter_with<F>(&mut self, filter: &F, ctx: &mut C) -> Result<()>
    where
        F: Filter<C> + ?Sized,
    {
        self.ensure_frame("apply filter")?;
        refilter(&mut self.frame, filter, ctx)
    }

    pub fn set_filter<F>(&mut self, filter: F)
    where
        F: Filter<C> + Send + 'static,
    {
        log::debug!("DeviceSession: filter set to {}", filter.name());
        self.filter = FilterSlot::Custom(Box::new(filter));
    }

    pub fn set_filter_fn<F>(&mut self, filter: F)
    where
        F: Fn(&FrameMeta, &[u16], &mut [u16], &mut C) -> anyhow::Result<()> + Send + 'static,
    {
        self.set_filter(FnFilter(filter));
    }

    /// Restore dark-level subtraction.
    pub fn reset_filter(&mut self) {
        self.filter = FilterSlot::Default;
    }

    /// Make [`apply_filter`](Self::apply_filter) leave `filtered` as an exact
    /// copy of `raw`.
    pub fn disable_filter(&mut self) {
        self.filter = FilterSlot::Disabled;
    }

    pub fn filter_name(&self) -> &'static str {
        self.filter.name()
    }

    // ------------------------------------------------------------------------
    // Estimator pipeline
    // ------------------------------------------------------------------------

    /// Reduce `filtered` to a single value with the installed estimator.
    pub fn apply_estimator(&self, ctx: &mut C) -> Result<f64> {
        self.ensure_frame("apply estimator")?;
        match &self.estimator {
            EstimatorSlot::Default => estimate(&self.frame, &CentroidEstimator, ctx),
            EstimatorSlot::Custom(estimator) => estimate(&self.frame, estimator.as_ref(), ctx),
        }
    }

    pub fn apply_estimator_with<E>(&self, estimator: &E, ctx: &mut C) -> Result<f64>
    where
        E: Estimator<C> + ?Sized,
    {
        self.ensure_frame("apply estimator")?;
        estimate(&self.frame, estimator, ctx)
    }

    pub fn set_estimator<E>(&mut self, estimator: E)
    where
        E: Estimator<C> + Send + 'static,
    {
        log::debug!("DeviceSession: estimator set to {}", estimator.name());
        self.estimator = EstimatorSlot::Custom(Box::new(estimator));
    }

    pub fn set_estimator_fn<E>(&mut self, estimator: E)
    where
        E: Fn(&FrameMeta, &[u16], &mut C) -> anyhow::Result<f64> + Send + 'static,
    {
        self.set_estimator(FnEstimator(estimator));
    }

    /// Restore the thresholded centroid.
    pub fn reset_estimator(&mut self) {
        self.estimator = EstimatorSlot::Default;
    }

    pub fn estimator_name(&self) -> &'static str {
        self.estimator.name()
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn serial_number(&self) -> &str {
        &self.info.serial_number
    }

    pub fn firmware_version(&self) -> &str {
        &self.info.firmware_version
    }

    pub fn library_version(&self) -> &'static str {
        crate::library_version()
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn pixel_count(&self) -> usize {
        PIXEL_COUNT
    }

    pub fn dark_pixel_count(&self) -> usize {
        DARK_PIXEL_COUNT
    }

    pub fn exposure_ms(&self) -> f32 {
        self.exposure_ms
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Reports `Closed` as soon as a close was requested through a
    /// [`SessionHandle`], even before the transport has been released.
    pub fn state(&self) -> SessionState {
        if self.close_requested.load(Ordering::SeqCst) {
            return SessionState::Closed;
        }
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    pub fn timestamp(&self) -> u16 {
        self.frame.meta().timestamp
    }

    pub fn dark_mean(&self) -> u16 {
        self.frame.meta().dark_mean
    }

    pub fn raw(&self) -> &[u16] {
        self.frame.raw()
    }

    pub fn filtered(&self) -> &[u16] {
        self.frame.filtered()
    }

    pub fn frame(&self) -> FrameView<'_> {
        self.frame.view()
    }

    pub fn snapshot(&self) -> FrameSnapshot {
        self.frame.view().to_snapshot()
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            close_requested: Arc::clone(&self.close_requested),
        }
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Release the transport. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.transport.close();
        self.state = SessionState::Closed;
        log::info!("DeviceSession: closed {}", self.info.serial_number);
    }

    fn ensure_open(&mut self) -> Result<()> {
        if self.close_requested.load(Ordering::SeqCst) {
            self.close();
        }
        match self.state {
            SessionState::Open => Ok(()),
            SessionState::Closed => Err(LineCamError::connection(anyhow!("session is closed"))),
        }
    }

    fn ensure_frame(&self, action: &str) -> Result<()> {
        if self.frame.is_empty() {
            return Err(LineCamError::Configuration(format!(
                "cannot {} before the first capture",
                action
            )));
        }
        Ok(())
    }
}

impl<C> Drop for DeviceSession<C> {
    fn drop(&mut self) {
        self.close();
    }
}

fn bring_up(transport: &mut dyn Transport, options: &SessionOptions) -> Result<DeviceInfo> {
    if options.capture_timeout.is_zero() {
        return Err(LineCamError::invalid("capture_timeout", "must be non-zero"));
    }
    if options.poll_interval.is_zero() {
        return Err(LineCamError::invalid("poll_interval", "must be non-zero"));
    }
    if options.trigger_timeout.is_some_and(|limit| limit.is_zero()) {
        return Err(LineCamError::invalid(
            "trigger_timeout",
            "must be non-zero (use None to wait indefinitely)",
        ));
    }

    let info = transport
        .open()
        .with_context(|| format!("open {}", options.device))
        .map_err(LineCamError::Connection)?;

    let range = info.exposure_range;
    if !range.contains(options.exposure_ms) {
        return Err(LineCamError::invalid(
            "exposure_ms",
            format!(
                "{} ms outside {}..={} ms",
                options.exposure_ms, range.min_ms, range.max_ms
            ),
        ));
    }
    transport
        .write_exposure(options.exposure_ms)
        .context("write initial exposure")
        .map_err(LineCamError::Connection)?;
    transport
        .write_mode(options.mode)
        .context("write initial mode")
        .map_err(LineCamError::Connection)?;
    Ok(info)
}

fn check_register(register: u8) -> Result<()> {
    if register >= GPIO_REGISTERS {
        return Err(LineCamError::invalid(
            "register",
            format!("{} outside 0..={}", register, GPIO_REGISTERS - 1),
        ));
    }
    Ok(())
}

fn refilter<C, F>(frame: &mut FrameBuffer, filter: &F, ctx: &mut C) -> Result<()>
where
    F: Filter<C> + ?Sized,
{
    frame
        .refilter(|meta, raw, filtered| filter.apply(meta, raw, filtered, ctx))
        .map_err(|source| LineCamError::Stage {
            stage: "filter",
            source,
        })
}

fn estimate<C, E>(frame: &FrameBuffer, estimator: &E, ctx: &mut C) -> Result<f64>
where
    E: Estimator<C> + ?Sized,
{
    estimator
        .estimate(&frame.meta(), frame.filtered(), ctx)
        .map_err(|source| LineCamError::Stage {
            stage: "estimator",
            source,
        })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DARK_PIXEL_RANGE;
    use crate::transport::ExposureRange;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport that replays queued responses and records what it was told.
    #[derive(Default)]
    struct Scripted {
        frames: VecDeque<anyhow::Result<Option<Reading>>>,
        fifo: VecDeque<i32>,
        fail_open: bool,
        fail_exposure: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Transport for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn open(&mut self) -> anyhow::Result<DeviceInfo> {
            self.log.lock().unwrap().push("open".into());
            if self.fail_open {
                return Err(anyhow!("no device on bus"));
            }
            Ok(DeviceInfo {
                serial_number: "13-00042".into(),
                firmware_version: "2.1.0".into(),
                exposure_range: ExposureRange::default(),
            })
        }

        fn write_exposure(&mut self, ms: f32) -> anyhow::Result<()> {
            if self.fail_exposure {
                return Err(anyhow!("control transfer timed out"));
            }
            self.log.lock().unwrap().push(format!("exposure {}", ms));
            Ok(())
        }

        fn write_mode(&mut self, mode: Mode) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(format!("mode {}", mode));
            Ok(())
        }

        fn read_frame(&mut self, _timeout: Duration) -> anyhow::Result<Option<Reading>> {
            self.frames.pop_front().unwrap_or(Ok(None))
        }

        fn queued_frames(&mut self) -> anyhow::Result<i32> {
            Ok(self.fifo.pop_front().unwrap_or(0))
        }

        fn gpio_write(&mut self, register: u8, level: bool) -> anyhow::Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("gpio {} {}", register, level));
            Ok(())
        }

        fn gpio_read(&mut self, _register: u8) -> anyhow::Result<bool> {
            Ok(true)
        }

        fn close(&mut self) {
            self.log.lock().unwrap().push("close".into());
        }
    }

    fn reading(dark: u16, light: u16, timestamp: u16) -> Reading {
        let mut pixels = vec![light; PIXEL_COUNT];
        pixels[DARK_PIXEL_RANGE].fill(dark);
        Reading { pixels, timestamp }
    }

    fn session_with(script: Scripted) -> DeviceSession {
        DeviceSession::with_transport(Box::new(script), SessionOptions::default()).unwrap()
    }

    #[test]
    fn open_pushes_initial_configuration() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let session = session_with(Scripted {
            log: log.clone(),
            ..Default::default()
        });
        assert_eq!(session.serial_number(), "13-00042");
        assert_eq!(session.firmware_version(), "2.1.0");
        assert_eq!(session.exposure_ms(), DEFAULT_EXPOSURE_MS);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["open", "exposure 10", "mode normal"]
        );
    }

    #[test]
    fn failed_open_closes_transport() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let script = Scripted {
            fail_open: true,
            log: log.clone(),
            ..Default::default()
        };
        let err = DeviceSession::<()>::with_transport(Box::new(script), SessionOptions::default())
            .err()
            .unwrap();
        assert!(err.is_connection());
        assert_eq!(*log.lock().unwrap(), vec!["open", "close"]);
    }

    #[test]
    fn out_of_range_exposure_is_rejected() {
        let mut session = session_with(Scripted::default());
        for ms in [0.0, -1.0, 10_000.0, f32::NAN] {
            let err = session.set_exposure(ms).unwrap_err();
            assert!(matches!(
                err,
                LineCamError::InvalidParameter {
                    name: "exposure_ms",
                    ..
                }
            ));
        }
        assert_eq!(session.exposure_ms(), DEFAULT_EXPOSURE_MS);
        session.set_exposure(0.1).unwrap();
        assert_eq!(session.exposure_ms(), 0.1);
    }

    #[test]
    fn capture_installs_frame_and_dark_mean() {
        let mut session = session_with(Scripted {
            frames: VecDeque::from([Ok(Some(reading(10, 700, 77)))]),
            ..Default::default()
        });
        let meta = session.capture().unwrap();
        assert_eq!(meta.dark_mean, 10);
        assert_eq!(session.timestamp(), 77);
        assert_eq!(session.raw().len(), PIXEL_COUNT);
        assert_eq!(session.filtered().len(), PIXEL_COUNT);
        assert_eq!(session.raw(), session.filtered());
    }

    #[test]
    fn failed_capture_keeps_previous_frame() {
        let mut session = session_with(Scripted {
            frames: VecDeque::from([
                Ok(Some(reading(10, 700, 1))),
                Ok(Some(Reading {
                    pixels: vec![5; 100],
                    timestamp: 2,
                })),
                Err(anyhow!("bulk transfer stalled")),
                Ok(None),
            ]),
            ..Default::default()
        });
        session.capture().unwrap();
        session.apply_filter(&mut ()).unwrap();
        let before = session.snapshot();

        let err = session.capture().unwrap_err();
        assert!(matches!(
            err,
            LineCamError::Capture(CaptureFault::Malformed { actual: 100, .. })
        ));
        let err = session.capture().unwrap_err();
        assert!(matches!(err, LineCamError::Capture(CaptureFault::Transport(_))));
        let err = session.capture().unwrap_err();
        assert!(err.is_no_data());

        assert_eq!(session.snapshot(), before);
        assert!(session.is_open());
    }

    #[test]
    fn filter_is_idempotent_and_preserves_raw() {
        let mut session = session_with(Scripted {
            frames: VecDeque::from([Ok(Some(reading(5, 200, 1)))]),
            ..Default::default()
        });
        session.capture().unwrap();
        let raw = session.raw().to_vec();

        session.apply_filter(&mut ()).unwrap();
        let first = session.filtered().to_vec();
        session.apply_filter(&mut ()).unwrap();
        assert_eq!(session.filtered(), first.as_slice());
        assert_eq!(session.raw(), raw.as_slice());
        assert_eq!(first[DARK_PIXEL_COUNT], 195);
        assert_eq!(first[0], 0);
    }

    #[test]
    fn pipeline_requires_a_frame() {
        let mut session = session_with(Scripted::default());
        assert!(matches!(
            session.apply_filter(&mut ()),
            Err(LineCamError::Configuration(_))
        ));
        assert!(matches!(
            session.apply_estimator(&mut ()),
            Err(LineCamError::Configuration(_))
        ));
    }

    #[test]
    fn fifo_depth_out_of_range_is_a_connection_error() {
        let mut session = session_with(Scripted {
            fifo: VecDeque::from([3, -1, 5]),
            ..Default::default()
        });
        assert_eq!(session.query_fifo_depth().unwrap().get(), 3);
        assert!(session.query_fifo_depth().unwrap_err().is_connection());
        assert!(session.query_fifo_depth().unwrap_err().is_connection());
    }

    #[test]
    fn gpio_register_bounds() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut session = session_with(Scripted {
            log: log.clone(),
            ..Default::default()
        });
        session.gpio_write(3, true).unwrap();
        assert!(session.gpio_read(0).unwrap());
        assert!(matches!(
            session.gpio_write(4, false),
            Err(LineCamError::InvalidParameter {
                name: "register",
                ..
            })
        ));
        assert_eq!(log.lock().unwrap().last().unwrap(), "gpio 3 true");
        assert!(matches!(
            session.gpio_read(4),
            Err(LineCamError::InvalidParameter {
                name: "register",
                ..
            })
        ));
    }

    #[test]
    fn exposure_write_failure_is_a_connection_error() {
        let mut session = session_with(Scripted::default());
        session.transport = Box::new(Scripted {
            fail_exposure: true,
            ..Default::default()
        });
        let err = session.set_exposure(20.0).unwrap_err();
        assert!(err.is_connection());
        assert!(err.to_string().contains("control transfer timed out"));
        assert_eq!(session.exposure_ms(), DEFAULT_EXPOSURE_MS);
    }

    #[test]
    fn failing_estimator_surfaces_as_stage_error() {
        let mut session = session_with(Scripted {
            frames: VecDeque::from([Ok(Some(reading(10, 700, 1)))]),
            ..Default::default()
        });
        session.capture().unwrap();
        session.set_estimator_fn(|_, _, _| Err(anyhow!("lens table missing")));

        let err = session.apply_estimator(&mut ()).unwrap_err();
        assert!(matches!(
            err,
            LineCamError::Stage {
                stage: "estimator",
                ..
            }
        ));
        assert_eq!(err.to_string(), "estimator failed: lens table missing");
    }

    #[test]
    fn handle_close_is_visible_before_next_call() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut session = session_with(Scripted {
            log: log.clone(),
            ..Default::default()
        });
        session.handle().close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_open());

        assert!(session.query_fifo_depth().unwrap_err().is_connection());
        assert_eq!(log.lock().unwrap().last().unwrap(), "close");
    }

    #[test]
    fn zero_trigger_timeout_is_rejected_on_open() {
        let options = SessionOptions {
            mode: Mode::Triggered,
            trigger_timeout: Some(Duration::ZERO),
            ..SessionOptions::default()
        };
        let err = DeviceSession::<()>::with_transport(Box::new(Scripted::default()), options)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            LineCamError::InvalidParameter {
                name: "trigger_timeout",
                ..
            }
        ));
    }

    #[test]
    fn close_is_idempotent_and_terminal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut session = session_with(Scripted {
            log: log.clone(),
            ..Default::default()
        });
        session.close();
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.capture().unwrap_err().is_connection());
        assert!(session.set_mode(Mode::Triggered).unwrap_err().is_connection());
        drop(session);

        let closes = log.lock().unwrap().iter().filter(|e| *e == "close").count();
        assert_eq!(closes, 1);
    }

    #[test]
    fn mode_parses_aliases() {
        assert_eq!("Normal".parse::<Mode>().unwrap(), Mode::Normal);
        assert_eq!("trigger".parse::<Mode>().unwrap(), Mode::Triggered);
        assert!("burst".parse::<Mode>().is_err());
        assert_eq!(Mode::Triggered as u8, 1);
    }
}
