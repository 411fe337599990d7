// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Scanwerk.

use thiserror::Error;

use crate::types::{JobId, JobState};

/// Boxed underlying cause, kept so the full chain can be reported.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for all Scanwerk operations.
#[derive(Debug, Error)]
pub enum ScanError {
    // -- Discovery --
    #[error("device discovery failed: {message}")]
    Discovery {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("device search was canceled")]
    SearchCanceled,

    #[error("no eSCL devices were found")]
    NoDevicesFound,

    #[error("no {0} selected")]
    NotSelected(&'static str),

    // -- Protocol --
    #[error("eSCL protocol error: {message}")]
    Protocol {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("unsupported device: {0}")]
    UnsupportedDevice(String),

    #[error("invalid scan parameter: {field} '{value}' is not supported by the device")]
    InvalidParameter { field: &'static str, value: String },

    #[error("device is busy: {0}")]
    DeviceBusy(String),

    // -- Job lifecycle --
    #[error("image acquisition failed")]
    Acquisition {
        #[source]
        source: Box<ScanError>,
    },

    #[error("job {job} is not active (state: {state})")]
    JobNotActive { job: JobId, state: JobState },

    #[error("operation was canceled")]
    Canceled,

    // -- Configuration / persistence --
    #[error("configuration error: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification used by outer layers (e.g. to pick an exit code).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SearchCanceled,
    NoDevicesFound,
    NotSelected,
    Discovery,
    Protocol,
    UnsupportedDevice,
    InvalidParameter,
    DeviceBusy,
    Acquisition,
    Canceled,
    Other,
}

impl ScanError {
    /// Protocol error without an underlying cause.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            source: None,
        }
    }

    /// Protocol error wrapping a lower-level cause.
    pub fn protocol_with(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Protocol {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Discovery error wrapping a lower-level cause.
    pub fn discovery_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Discovery {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Wrap a retrieval failure as an acquisition error.
    ///
    /// Already-wrapped errors are returned unchanged so the chain never nests
    /// two acquisition layers.
    pub fn acquisition(cause: ScanError) -> Self {
        match cause {
            err @ Self::Acquisition { .. } => err,
            other => Self::Acquisition {
                source: Box::new(other),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SearchCanceled => ErrorKind::SearchCanceled,
            Self::NoDevicesFound => ErrorKind::NoDevicesFound,
            Self::NotSelected(_) => ErrorKind::NotSelected,
            Self::Discovery { .. } => ErrorKind::Discovery,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::UnsupportedDevice(_) => ErrorKind::UnsupportedDevice,
            Self::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Self::DeviceBusy(_) => ErrorKind::DeviceBusy,
            Self::Acquisition { .. } => ErrorKind::Acquisition,
            Self::Canceled => ErrorKind::Canceled,
            Self::JobNotActive { .. }
            | Self::Config(_)
            | Self::Io(_)
            | Self::Serialization(_) => ErrorKind::Other,
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn acquisition_keeps_cause_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset");
        let err = ScanError::acquisition(ScanError::protocol_with("NextDocument", io));

        assert_eq!(err.kind(), ErrorKind::Acquisition);
        let protocol = err.source().expect("protocol layer");
        assert!(protocol.to_string().contains("NextDocument"));
        let transport = protocol.source().expect("transport layer");
        assert_eq!(transport.to_string(), "connection reset");
    }

    #[test]
    fn acquisition_does_not_double_wrap() {
        let once = ScanError::acquisition(ScanError::Canceled);
        let twice = ScanError::acquisition(once);
        let inner = twice.source().expect("one layer");
        assert!(inner.source().is_none());
    }
}
