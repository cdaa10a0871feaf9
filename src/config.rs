use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::session::{
    Mode, SessionOptions, DEFAULT_CAPTURE_TIMEOUT, DEFAULT_DEVICE, DEFAULT_EXPOSURE_MS,
    DEFAULT_POLL_INTERVAL,
};

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LineCamConfigFile {
    device: Option<String>,
    exposure_ms: Option<f32>,
    mode: Option<Mode>,
    capture: Option<CaptureConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CaptureConfigFile {
    timeout_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    /// 0 waits for the trigger indefinitely.
    trigger_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineCamConfig {
    pub device: String,
    pub exposure_ms: f32,
    pub mode: Mode,
    pub capture: CaptureSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub trigger_timeout: Option<Duration>,
}

impl LineCamConfig {
    /// Load from the file named by `LINECAM_CONFIG` (if any), then apply
    /// `LINECAM_*` environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LINECAM_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: LineCamConfigFile) -> Self {
        let capture = file.capture.unwrap_or_default();
        Self {
            device: file.device.unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            exposure_ms: file.exposure_ms.unwrap_or(DEFAULT_EXPOSURE_MS),
            mode: file.mode.unwrap_or_default(),
            capture: CaptureSettings {
                timeout: capture
                    .timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_CAPTURE_TIMEOUT),
                poll_interval: capture
                    .poll_interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_POLL_INTERVAL),
                trigger_timeout: capture.trigger_timeout_ms.and_then(trigger_timeout),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("LINECAM_DEVICE") {
            if !device.trim().is_empty() {
                self.device = device;
            }
        }
        if let Ok(exposure) = std::env::var("LINECAM_EXPOSURE_MS") {
            self.exposure_ms = exposure
                .trim()
                .parse()
                .map_err(|_| anyhow!("LINECAM_EXPOSURE_MS must be a number of milliseconds"))?;
        }
        if let Ok(mode) = std::env::var("LINECAM_MODE") {
            if !mode.trim().is_empty() {
                self.mode = mode.parse()?;
            }
        }
        if let Ok(timeout) = std::env::var("LINECAM_CAPTURE_TIMEOUT_MS") {
            let ms: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("LINECAM_CAPTURE_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.capture.timeout = Duration::from_millis(ms);
        }
        if let Ok(timeout) = std::env::var("LINECAM_TRIGGER_TIMEOUT_MS") {
            let ms: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("LINECAM_TRIGGER_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.capture.trigger_timeout = trigger_timeout(ms);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.device.trim().is_empty() {
            return Err(anyhow!("device identifier must not be empty"));
        }
        if !self.exposure_ms.is_finite() || self.exposure_ms <= 0.0 {
            return Err(anyhow!("exposure_ms must be a positive number"));
        }
        if self.capture.timeout.is_zero() {
            return Err(anyhow!("capture timeout must be greater than zero"));
        }
        if self.capture.poll_interval.is_zero() {
            return Err(anyhow!("capture poll interval must be greater than zero"));
        }
        Ok(())
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            device: self.device.clone(),
            exposure_ms: self.exposure_ms,
            mode: self.mode,
            capture_timeout: self.capture.timeout,
            poll_interval: self.capture.poll_interval,
            trigger_timeout: self.capture.trigger_timeout,
        }
    }
}

impl Default for LineCamConfig {
    fn default() -> Self {
        Self::from_file(LineCamConfigFile::default())
    }
}

fn trigger_timeout(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn read_config_file(path: &Path) -> Result<LineCamConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_session_defaults() {
        let cfg = LineCamConfig::default();
        assert_eq!(cfg.session_options(), SessionOptions::default());
    }

    #[test]
    fn zero_trigger_timeout_means_wait_forever() {
        let file: LineCamConfigFile =
            serde_json::from_str(r#"{"capture": {"trigger_timeout_ms": 0}}"#).unwrap();
        assert_eq!(LineCamConfig::from_file(file).capture.trigger_timeout, None);

        let file: LineCamConfigFile =
            serde_json::from_str(r#"{"capture": {"trigger_timeout_ms": 250}}"#).unwrap();
        assert_eq!(
            LineCamConfig::from_file(file).capture.trigger_timeout,
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn rejects_unknown_keys_and_modes() {
        assert!(serde_json::from_str::<LineCamConfigFile>(r#"{"exposure": 3}"#).is_err());
        assert!(serde_json::from_str::<LineCamConfigFile>(r#"{"mode": "burst"}"#).is_err());
        let file: LineCamConfigFile = serde_json::from_str(r#"{"mode": "trigger"}"#).unwrap();
        assert_eq!(file.mode, Some(Mode::Triggered));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = LineCamConfig::default();
        cfg.exposure_ms = f32::NAN;
        assert!(cfg.validate().is_err());

        let mut cfg = LineCamConfig::default();
        cfg.capture.poll_interval = Duration::ZERO;
        assert!(cfg.validate().is_err());

        let mut cfg = LineCamConfig::default();
        cfg.device = "  ".to_string();
        assert!(cfg.validate().is_err());
    }
}
