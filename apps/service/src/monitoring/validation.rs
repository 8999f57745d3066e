//! Request validation applied before any probe is attempted.
//!
//! Zero-sized requests are rejected as malformed. Oversized requests are
//! clamped to the engine limits so a single call cannot block for long or
//! open an unbounded number of connections.

use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::warn;

use crate::error::EngineError;
use crate::monitoring::types::ProbeParameters;

/// Upper bound on sequential latency iterations per call
pub const MAX_ITERATIONS: u32 = 50;

/// Upper bound on simultaneous load-test units per call
pub const MAX_CONCURRENCY: u32 = 100;

/// Upper bound on history rows returned by one query
pub const MAX_HISTORY_LIMIT: usize = 500;

/// Longest summary window accepted (matches the longest sane retention)
pub const MAX_SUMMARY_WINDOW: Duration = Duration::from_secs(90 * 24 * 3600);

/// Check parameters and clamp them into the supported range
pub fn normalize_parameters(parameters: ProbeParameters) -> Result<ProbeParameters, EngineError> {
    match parameters {
        ProbeParameters::Latency { iterations } => {
            if iterations == 0 {
                return Err(EngineError::InvalidParameter("iterations must be at least 1".into()));
            }
            if iterations > MAX_ITERATIONS {
                warn!("Clamping latency iterations from {} to {}", iterations, MAX_ITERATIONS);
            }
            Ok(ProbeParameters::Latency { iterations: iterations.min(MAX_ITERATIONS) })
        }
        ProbeParameters::Load { concurrency } => {
            if concurrency == 0 {
                return Err(EngineError::InvalidParameter("concurrency must be at least 1".into()));
            }
            if concurrency > MAX_CONCURRENCY {
                warn!("Clamping load concurrency from {} to {}", concurrency, MAX_CONCURRENCY);
            }
            Ok(ProbeParameters::Load { concurrency: concurrency.min(MAX_CONCURRENCY) })
        }
        other => Ok(other),
    }
}

pub fn validate_history_limit(limit: usize) -> Result<usize, EngineError> {
    if limit == 0 {
        return Err(EngineError::InvalidParameter("limit must be at least 1".into()));
    }
    Ok(limit.min(MAX_HISTORY_LIMIT))
}

pub fn validate_summary_window(window: Duration) -> Result<Duration, EngineError> {
    if window.is_zero() {
        return Err(EngineError::InvalidParameter("summary window must be positive".into()));
    }
    if window > MAX_SUMMARY_WINDOW {
        return Err(EngineError::InvalidParameter(format!(
            "summary window of {}s exceeds maximum of {}s",
            window.as_secs(),
            MAX_SUMMARY_WINDOW.as_secs()
        )));
    }
    Ok(window)
}

/// Validate timeout is reasonable
pub fn validate_timeout(timeout_seconds: u64) -> Result<()> {
    const MIN_TIMEOUT: u64 = 1;
    const MAX_TIMEOUT: u64 = 300; // 5 minutes

    if timeout_seconds < MIN_TIMEOUT {
        return Err(anyhow!(
            "Timeout too short: {} seconds (minimum: {})",
            timeout_seconds,
            MIN_TIMEOUT
        ));
    }

    if timeout_seconds > MAX_TIMEOUT {
        return Err(anyhow!(
            "Timeout too long: {} seconds (maximum: {})",
            timeout_seconds,
            MAX_TIMEOUT
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_iterations_rejected() {
        let result = normalize_parameters(ProbeParameters::Latency { iterations: 0 });
        assert!(matches!(result, Err(EngineError::InvalidParameter(_))));
    }

    #[test]
    fn test_iterations_clamped() {
        assert_eq!(
            normalize_parameters(ProbeParameters::Latency { iterations: 500 }).unwrap(),
            ProbeParameters::Latency { iterations: MAX_ITERATIONS }
        );
        assert_eq!(
            normalize_parameters(ProbeParameters::Latency { iterations: 5 }).unwrap(),
            ProbeParameters::Latency { iterations: 5 }
        );
    }

    #[test]
    fn test_concurrency_bounds() {
        assert!(normalize_parameters(ProbeParameters::Load { concurrency: 0 }).is_err());
        assert_eq!(
            normalize_parameters(ProbeParameters::Load { concurrency: 1_000 }).unwrap(),
            ProbeParameters::Load { concurrency: MAX_CONCURRENCY }
        );
    }

    #[test]
    fn test_parameterless_kinds_pass_through() {
        assert_eq!(normalize_parameters(ProbeParameters::Health).unwrap(), ProbeParameters::Health);
        assert_eq!(
            normalize_parameters(ProbeParameters::Connection).unwrap(),
            ProbeParameters::Connection
        );
    }

    #[test]
    fn test_history_limit() {
        assert!(validate_history_limit(0).is_err());
        assert_eq!(validate_history_limit(20).unwrap(), 20);
        assert_eq!(validate_history_limit(10_000).unwrap(), MAX_HISTORY_LIMIT);
    }

    #[test]
    fn test_summary_window() {
        assert!(validate_summary_window(Duration::ZERO).is_err());
        assert!(validate_summary_window(Duration::from_secs(24 * 3600)).is_ok());
        assert!(validate_summary_window(Duration::from_secs(365 * 24 * 3600)).is_err());
    }

    #[test]
    fn test_validate_timeout() {
        assert!(validate_timeout(1).is_ok());
        assert!(validate_timeout(300).is_ok());
        assert!(validate_timeout(0).is_err());
        assert!(validate_timeout(301).is_err());
    }
}
