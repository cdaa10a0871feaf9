//! Synthetic line camera (`stub://`).
//!
//! Produces frames with a Gaussian light peak over a constant dark level plus
//! uniform noise, at the rate a real device would:
//! - Normal mode: one frame per exposure period
//! - Triggered mode: one frame per `trigger_ms`, or never if unset
//!
//! Frames accumulate in a four-deep queue and overflow is dropped, like the
//! device FIFO. Reconfiguring exposure or mode flushes the queue.
//!
//! Identifier options: `stub://<name>?peak=1824&width=12&amplitude=2400&dark=40&noise=6&trigger_ms=20&seed=7`

use anyhow::{anyhow, bail, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

use super::{DeviceInfo, ExposureRange, Transport, GPIO_REGISTERS};
use crate::fifo::FIFO_CAPACITY;
use crate::frame::{Reading, DARK_PIXEL_RANGE, PIXEL_COUNT};
use crate::Mode;

/// Configuration for the synthetic camera.
#[derive(Clone, Debug, PartialEq)]
pub struct StubConfig {
    pub name: String,
    /// Peak centre, in pixels.
    pub peak: f64,
    /// Peak standard deviation, in pixels.
    pub width: f64,
    /// Peak height above the dark level.
    pub amplitude: u16,
    pub dark: u16,
    /// Upper bound of the uniform noise added to every sample.
    pub noise: u16,
    /// External trigger period; `None` means the trigger never fires.
    pub trigger_ms: Option<u64>,
    pub seed: Option<u64>,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            name: "stub".to_string(),
            peak: 1824.0,
            width: 12.0,
            amplitude: 2400,
            dark: 40,
            noise: 6,
            trigger_ms: None,
            seed: None,
        }
    }
}

impl StubConfig {
    /// Parse a `stub://name?key=value&...` identifier.
    pub fn parse(identifier: &str) -> Result<Self> {
        let rest = identifier
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("not a stub identifier: {}", identifier))?;
        let (name, query) = match rest.split_once('?') {
            Some((name, query)) => (name, Some(query)),
            None => (rest, None),
        };

        let mut config = Self::default();
        if !name.is_empty() {
            config.name = name.to_string();
        }

        for pair in query.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("stub option '{}' is missing a value", pair))?;
            let bad = || format!("invalid value for stub option '{}': {}", key, value);
            match key {
                "peak" => config.peak = value.parse().with_context(bad)?,
                "width" => config.width = value.parse().with_context(bad)?,
                "amplitude" => config.amplitude = value.parse().with_context(bad)?,
                "dark" => config.dark = value.parse().with_context(bad)?,
                "noise" => config.noise = value.parse().with_context(bad)?,
                "trigger_ms" => config.trigger_ms = Some(value.parse().with_context(bad)?),
                "seed" => config.seed = Some(value.parse().with_context(bad)?),
                other => bail!("unknown stub option '{}'", other),
            }
        }

        if !(config.width > 0.0) {
            bail!("stub option 'width' must be positive");
        }
        if config.trigger_ms == Some(0) {
            bail!("stub option 'trigger_ms' must be positive");
        }
        Ok(config)
    }
}

pub struct StubTransport {
    config: StubConfig,
    rng: StdRng,
    state: LinkState,
    opened_at: Instant,
    exposure_ms: f32,
    mode: Mode,
    gpio: [bool; GPIO_REGISTERS as usize],
    queued: u8,
    /// Start of the period in which the next frame is being produced.
    last_tick: Instant,
    frames_read: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LinkState {
    Idle,
    Open,
    Closed,
}

impl StubTransport {
    pub fn new(config: StubConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let now = Instant::now();
        Self {
            config,
            rng,
            state: LinkState::Idle,
            opened_at: now,
            exposure_ms: 10.0,
            mode: Mode::Normal,
            gpio: [false; GPIO_REGISTERS as usize],
            queued: 0,
            last_tick: now,
            frames_read: 0,
        }
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            LinkState::Open => Ok(()),
            LinkState::Idle => Err(anyhow!("stub device {} not opened", self.config.name)),
            LinkState::Closed => Err(anyhow!("stub device {} closed", self.config.name)),
        }
    }

    fn frame_period(&self) -> Option<Duration> {
        match self.mode {
            Mode::Normal => Some(Duration::from_secs_f32(self.exposure_ms / 1000.0)),
            Mode::Triggered => self.config.trigger_ms.map(Duration::from_millis),
        }
    }

    fn flush(&mut self) {
        self.queued = 0;
        self.last_tick = Instant::now();
    }

    /// Move frames produced since the last tick into the queue.
    fn refresh(&mut self) {
        let Some(period) = self.frame_period() else {
            return;
        };
        let produced = (self.last_tick.elapsed().as_secs_f64() / period.as_secs_f64()) as u64;
        if produced == 0 {
            return;
        }
        self.queued = (u64::from(self.queued) + produced).min(u64::from(FIFO_CAPACITY)) as u8;
        self.last_tick += period.mul_f64(produced as f64);
    }

    fn until_next_frame(&self) -> Option<Duration> {
        let period = self.frame_period()?;
        Some(period.saturating_sub(self.last_tick.elapsed()))
    }

    fn synthesize(&mut self) -> Reading {
        let cfg = &self.config;
        let two_sigma_sq = 2.0 * cfg.width * cfg.width;
        let mut pixels = Vec::with_capacity(PIXEL_COUNT);
        for i in 0..PIXEL_COUNT {
            let noise = self.rng.gen_range(0..=cfg.noise);
            let mut value = f64::from(cfg.dark) + f64::from(noise);
            if !DARK_PIXEL_RANGE.contains(&i) {
                let d = i as f64 - cfg.peak;
                value += f64::from(cfg.amplitude) * (-(d * d) / two_sigma_sq).exp();
            }
            pixels.push(value.round().min(f64::from(u16::MAX)) as u16);
        }

        let timestamp = (self.opened_at.elapsed().as_millis() % 65_536) as u16;
        Reading { pixels, timestamp }
    }
}

impl Transport for StubTransport {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn open(&mut self) -> Result<DeviceInfo> {
        if self.state == LinkState::Closed {
            bail!("stub device {} already closed", self.config.name);
        }
        self.state = LinkState::Open;
        self.opened_at = Instant::now();
        self.flush();
        log::info!("StubTransport: opened {} (synthetic)", self.config.name);
        Ok(DeviceInfo {
            serial_number: format!("STUB-{}", self.config.name.to_uppercase()),
            firmware_version: "1.0.0-synthetic".to_string(),
            exposure_range: ExposureRange::default(),
        })
    }

    fn write_exposure(&mut self, ms: f32) -> Result<()> {
        self.ensure_open()?;
        self.exposure_ms = ms;
        self.flush();
        Ok(())
    }

    fn write_mode(&mut self, mode: Mode) -> Result<()> {
        self.ensure_open()?;
        self.mode = mode;
        self.flush();
        Ok(())
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Reading>> {
        self.ensure_open()?;
        self.refresh();
        if self.queued == 0 {
            match self.until_next_frame() {
                Some(wait) if wait < timeout => {
                    // Small margin so the refresh below sees the finished period.
                    std::thread::sleep((wait + Duration::from_micros(100)).min(timeout));
                    self.refresh();
                }
                _ => {
                    std::thread::sleep(timeout);
                    return Ok(None);
                }
            }
        }
        if self.queued == 0 {
            return Ok(None);
        }

        self.queued -= 1;
        self.frames_read += 1;
        Ok(Some(self.synthesize()))
    }

    fn queued_frames(&mut self) -> Result<i32> {
        self.ensure_open()?;
        self.refresh();
        Ok(i32::from(self.queued))
    }

    fn gpio_write(&mut self, register: u8, level: bool) -> Result<()> {
        self.ensure_open()?;
        let slot = self
            .gpio
            .get_mut(register as usize)
            .ok_or_else(|| anyhow!("gpio register {} out of range", register))?;
        *slot = level;
        Ok(())
    }

    fn gpio_read(&mut self, register: u8) -> Result<bool> {
        self.ensure_open()?;
        self.gpio
            .get(register as usize)
            .copied()
            .ok_or_else(|| anyhow!("gpio register {} out of range", register))
    }

    fn close(&mut self) {
        if self.state != LinkState::Closed {
            log::info!(
                "StubTransport: closed {} after {} frames",
                self.config.name,
                self.frames_read
            );
        }
        self.state = LinkState::Closed;
        self.queued = 0;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
