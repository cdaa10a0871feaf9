use std::time::Duration;

/// Result alias used by every session-level operation.
pub type Result<T> = std::result::Result<T, LineCamError>;

/// Errors surfaced by a [`DeviceSession`](crate::DeviceSession).
///
/// The variants separate the four failure families callers have to treat
/// differently: the device or link went away, the caller asked for something
/// out of range, a frame could not be acquired, or the pipeline was driven
/// from a state it cannot work in. `Stage` carries failures raised by
/// caller-supplied filters and estimators untouched.
#[derive(thiserror::Error, Debug)]
pub enum LineCamError {
    #[error("connection error: {0:#}")]
    Connection(anyhow::Error),
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureFault),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("{stage} failed: {source:#}")]
    Stage {
        stage: &'static str,
        source: anyhow::Error,
    },
}

/// Why a single capture attempt did not produce a frame.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureFault {
    #[error("no frame available")]
    NoData,
    #[error("no trigger within {waited:?}")]
    Timeout { waited: Duration },
    #[error("malformed frame: expected {expected} samples, got {actual}")]
    Malformed { expected: usize, actual: usize },
    #[error("session closed while waiting for a frame")]
    Aborted,
    #[error("transport: {0}")]
    Transport(String),
}

impl LineCamError {
    pub(crate) fn connection(err: impl Into<anyhow::Error>) -> Self {
        Self::Connection(err.into())
    }

    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// True when the failure only means "nothing ready yet" and the caller may
    /// simply try again later.
    pub fn is_no_data(&self) -> bool {
        matches!(self, Self::Capture(CaptureFault::NoData))
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_faults_convert_and_classify() {
        let err: LineCamError = CaptureFault::NoData.into();
        assert!(err.is_no_data());
        assert!(!err.is_connection());

        let err: LineCamError = CaptureFault::Malformed {
            expected: 3648,
            actual: 12,
        }
        .into();
        assert!(!err.is_no_data());
        assert_eq!(
            err.to_string(),
            "capture failed: malformed frame: expected 3648 samples, got 12"
        );
    }

    #[test]
    fn connection_error_renders_context_chain() {
        let inner = anyhow::anyhow!("pipe stalled").context("read fifo count");
        let err = LineCamError::connection(inner);
        assert!(err.is_connection());
        assert_eq!(err.to_string(), "connection error: read fifo count: pipe stalled");
    }
}
