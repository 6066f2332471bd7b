use thiserror::Error;

/// Failures surfaced by the capture pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Device read returned no samples")]
    ReadFailure,

    #[error("No baseline recorded")]
    BaselinePending,

    #[error("A capture is already active")]
    AlreadyActive,

    #[error("Invalid FFT window size: {0} (must be a non-zero power of two)")]
    InvalidWindowSize(usize),

    #[error("Device delivered no samples within {0} ms")]
    DeviceStalled(u64),
}

impl CaptureError {
    /// Message shown once to the user at the display boundary.
    pub fn notification(&self) -> &'static str {
        match self {
            CaptureError::DeviceUnavailable(_) => "Microphone is not available.",
            CaptureError::ReadFailure => "Failed to read audio from the microphone.",
            CaptureError::BaselinePending => "Please record baseline noise first.",
            CaptureError::AlreadyActive => "A capture is already running.",
            CaptureError::InvalidWindowSize(_) => "Spectrum analysis is misconfigured.",
            CaptureError::DeviceStalled(_) => "Microphone stopped delivering audio.",
        }
    }

    /// Whether the failure ends the current capture session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CaptureError::ReadFailure)
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_kind_has_a_distinct_notification() {
        let kinds = [
            CaptureError::DeviceUnavailable("gone".into()),
            CaptureError::ReadFailure,
            CaptureError::BaselinePending,
            CaptureError::AlreadyActive,
            CaptureError::InvalidWindowSize(3),
            CaptureError::DeviceStalled(500),
        ];
        let mut messages: Vec<&str> = kinds.iter().map(|k| k.notification()).collect();
        messages.sort();
        messages.dedup();
        assert_eq!(messages.len(), kinds.len());
    }

    #[test]
    fn only_read_failures_are_transient() {
        assert!(!CaptureError::ReadFailure.is_fatal());
        assert!(CaptureError::DeviceStalled(10).is_fatal());
        assert!(CaptureError::DeviceUnavailable("x".into()).is_fatal());
    }
}
