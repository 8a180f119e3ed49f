use thiserror::Error;

use crate::types::CaptureType;

/// Every failure the capture pipeline can produce.
///
/// Only [`CaptureError::StreamTerminated`] and [`CaptureError::StartFailure`]
/// ever reach the frame consumer; the rest are absorbed where they occur.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("Malformed sample buffer: {reason}")]
    MalformedSample { reason: String },

    #[error("Configuration rejected: {reason}")]
    ConfigurationRejected { reason: String },

    #[error("Stream terminated: {reason}")]
    StreamTerminated { reason: String },

    #[error("Failed to start capture: {reason}")]
    StartFailure { reason: String },

    #[error("No {capture_type} selected")]
    NoTargetSelected { capture_type: CaptureType },

    #[error("Unknown capture target: {target}")]
    UnknownTarget { target: String },

    #[error("Picker filter rejected: {reason}")]
    PickerRejected { reason: String },

    #[error("Capture session is gone")]
    SessionClosed,
}

impl CaptureError {
    pub fn terminated(reason: impl Into<String>) -> Self {
        Self::StreamTerminated { reason: reason.into() }
    }

    pub fn start_failure(reason: impl Into<String>) -> Self {
        Self::StartFailure { reason: reason.into() }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::ConfigurationRejected { reason: reason.into() }
    }

    /// True for the two kinds allowed to cross the bridge to the consumer.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::StreamTerminated { .. } | Self::StartFailure { .. })
    }
}
