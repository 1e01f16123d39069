//! Error types for Strata

use crate::time::{Interval, TimeGrain};
use std::fmt;

/// Result type alias for Strata operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Strata
///
/// Every variant carries owned, cloneable context so that callers collapsed
/// onto the same in-flight request can all receive the leader's outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// No physical table can answer the request
    Resolution(ResolutionError),
    /// The request itself is malformed
    InvalidQuery(String),
    /// Requested intervals exceed available data and policy is to reject
    PartialData { missing: Vec<Interval> },
    /// Estimated query cost is above the configured ceiling
    WeightExceeded { weight: u64, limit: u64 },
    /// Backend could not be reached after exhausting retries
    BackendUnavailable { attempts: u32, last_error: String },
    /// Backend refused the query (not retried)
    BackendRejected(String),
    /// Transient transport failure
    Transport(String),
    /// Cache backing store failure
    Cache(String),
    /// Metadata errors
    Metadata(String),
    /// Serialization errors
    Serialization(String),
    /// Configuration errors
    Config(String),
    /// Request deadline elapsed
    Timeout,
    /// Internal error
    Internal(String),
}

/// Reasons table resolution fails
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionError {
    /// No table covers the requested surface
    NoMatchingTable {
        dimensions: Vec<String>,
        metrics: Vec<String>,
        grain: TimeGrain,
    },
    /// The dictionary holds no tables at all
    EmptyDictionary,
}

impl Error {
    /// Transport failures are the only errors worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Stable label for telemetry attributes.
    pub fn error_class(&self) -> &'static str {
        match self {
            Error::Resolution(_) => "resolution",
            Error::InvalidQuery(_) => "invalid_query",
            Error::PartialData { .. } => "partial_data",
            Error::WeightExceeded { .. } => "weight_exceeded",
            Error::BackendUnavailable { .. } => "backend_unavailable",
            Error::BackendRejected(_) => "backend_rejected",
            Error::Transport(_) => "transport",
            Error::Cache(_) => "cache",
            Error::Metadata(_) => "metadata",
            Error::Serialization(_) => "serialization",
            Error::Config(_) => "config",
            Error::Timeout => "timeout",
            Error::Internal(_) => "internal",
        }
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Resolution(e) => write!(f, "{}", e),
            Error::InvalidQuery(msg) => write!(f, "Invalid query: {}", msg),
            Error::PartialData { missing } => {
                write!(f, "Requested data is not fully available; missing intervals: ")?;
                write_intervals(f, missing)
            }
            Error::WeightExceeded { weight, limit } => write!(
                f,
                "Result set too large ({} > {}). Try reducing interval, dimensions, or sketch metrics.",
                weight, limit
            ),
            Error::BackendUnavailable { attempts, last_error } => write!(
                f,
                "Backend unavailable after {} attempts: {}",
                attempts, last_error
            ),
            Error::BackendRejected(msg) => write!(f, "Backend rejected query: {}", msg),
            Error::Transport(msg) => write!(f, "Transport error: {}", msg),
            Error::Cache(msg) => write!(f, "Cache error: {}", msg),
            Error::Metadata(msg) => write!(f, "Metadata error: {}", msg),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Timeout => write!(f, "Request timed out"),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionError::NoMatchingTable {
                dimensions,
                metrics,
                grain,
            } => write!(
                f,
                "No matching physical table found for dimensions '{}', metrics '{}', and time grain '{}'",
                dimensions.join(","),
                metrics.join(","),
                grain
            ),
            ResolutionError::EmptyDictionary => write!(f, "Physical table dictionary is empty"),
        }
    }
}

fn write_intervals(f: &mut fmt::Formatter<'_>, intervals: &[Interval]) -> fmt::Result {
    for (i, interval) in intervals.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", interval)?;
    }
    Ok(())
}

impl From<ResolutionError> for Error {
    fn from(e: ResolutionError) -> Self {
        Error::Resolution(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::Cache(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_error_names_surface() {
        let err = Error::from(ResolutionError::NoMatchingTable {
            dimensions: vec!["country".to_string()],
            metrics: vec!["revenue".to_string()],
            grain: TimeGrain::Hour,
        });
        let msg = err.to_string();
        assert!(msg.contains("country"));
        assert!(msg.contains("revenue"));
        assert!(msg.contains("hour"));
        assert_eq!(err.error_class(), "resolution");
    }

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(Error::Transport("reset".into()).is_retryable());
        assert!(!Error::BackendRejected("bad".into()).is_retryable());
        assert!(!Error::WeightExceeded { weight: 2, limit: 1 }.is_retryable());
    }
}
