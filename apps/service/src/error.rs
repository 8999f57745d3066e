//! Error taxonomy for the probe engine.
//!
//! Two layers exist. [`ProbeError`] is raised inside probers and always ends
//! up *recorded* in a [`ProbeResult`](crate::monitoring::ProbeResult); it is
//! never returned to callers. [`EngineError`] is what callers see, and only
//! for requests that are rejected before a probe is attempted.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flags::Capability;

/// Classified cause of a probe or instrument failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    AuthFailure,
    NetworkUnreachable,
    PermissionDenied,
    ExtensionUnavailable,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::AuthFailure => "auth_failure",
            ErrorKind::NetworkUnreachable => "network_unreachable",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::ExtensionUnavailable => "extension_unavailable",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Errors that mean the endpoint itself could not be used.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::AuthFailure | ErrorKind::NetworkUnreachable)
    }

    /// Errors that only cost a single health metric.
    pub fn is_instrument(&self) -> bool {
        matches!(self, ErrorKind::PermissionDenied | ErrorKind::ExtensionUnavailable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(ErrorKind::Timeout),
            "auth_failure" => Ok(ErrorKind::AuthFailure),
            "network_unreachable" => Ok(ErrorKind::NetworkUnreachable),
            "permission_denied" => Ok(ErrorKind::PermissionDenied),
            "extension_unavailable" => Ok(ErrorKind::ExtensionUnavailable),
            "unknown" => Ok(ErrorKind::Unknown),
            other => Err(format!("unknown error kind: {other}")),
        }
    }
}

/// Failure of a single probe step
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ProbeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ProbeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }
}

/// Rejections surfaced to the caller instead of a probe result
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown region: {0}")]
    UnknownRegion(String),

    #[error("region unavailable: {0}")]
    RegionUnavailable(String),

    #[error("{0} is disabled")]
    CapabilityDisabled(Capability),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("no regions available")]
    NoRegionsAvailable,

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}
