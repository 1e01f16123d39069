//! Backend collaborators
//!
//! The gateway talks to two backend roles: a broker that executes queries and
//! a coordinator that reports published segments and dimension values.

mod http;
mod memory;

pub use http::HttpBackend;
pub use memory::{InMemoryBackend, InMemoryMetadataSource};

use crate::metadata::{AvailabilityRecord, SegmentInfo};
use crate::query::{BackendQuery, ResultSet};
use crate::Error;
use async_trait::async_trait;
use std::fmt;

/// Failure reported by a backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Connection, timeout or server-side failure; worth retrying
    Transport(String),
    /// The backend refused the request; retrying will not help
    Rejected(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transport(_))
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Transport(msg) => write!(f, "transport failure: {}", msg),
            BackendError::Rejected(msg) => write!(f, "rejected: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<BackendError> for Error {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Transport(msg) => Error::Transport(msg),
            BackendError::Rejected(msg) => Error::BackendRejected(msg),
        }
    }
}

/// Executes backend queries
#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn execute(&self, query: &BackendQuery) -> Result<ResultSet, BackendError>;
}

/// Source of availability and dimension metadata
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Availability of a dataset as published by the backend.
    async fn fetch_segments(&self, dataset: &str) -> Result<AvailabilityRecord, BackendError>;

    /// Full segment list of a dataset.
    async fn fetch_datasource_metadata(
        &self,
        dataset: &str,
    ) -> Result<Vec<SegmentInfo>, BackendError>;

    /// Distinct values of one dimension in a dataset.
    async fn fetch_dimension_values(
        &self,
        dataset: &str,
        dimension: &str,
    ) -> Result<Vec<String>, BackendError>;
}
