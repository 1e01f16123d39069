//! # Strata
//!
//! An analytics query gateway in front of a clustered columnar time-series
//! backend.
//!
//! Requests name a logical table, dimensions, metrics, a time grain, filters
//! and intervals. The gateway answers them by:
//!
//! - **Resolving** each request to the cheapest physical table that carries
//!   the requested surface and has data for the interval
//! - **Signing** the resolved query with the availability version of every
//!   dataset it touches, so cached answers go stale the moment new segments land
//! - **Collapsing** identical concurrent requests onto one backend call
//! - **Weighing** queries before dispatch and rejecting the ones too costly
//!   for the backend
//! - **Splitting** long intervals into chunks and merging the answers,
//!   including time-shifted lookback series
//!
//! Availability and dimension values come from metadata loaders that refresh
//! the `MetadataStore` on a schedule.

pub mod api;
pub mod backend;
pub mod cache;
pub mod clock;
pub mod config;
pub mod loader;
pub mod metadata;
pub mod pipeline;
pub mod query;
pub mod table;
pub mod telemetry;
pub mod time;

mod error;

pub use error::{Error, ResolutionError, Result};
