//! Shared types and defaults for the reliability exporter
//!
//! This crate provides the bucket key types and the default constants
//! shared between the configuration layer, the aggregator and the publisher.

pub mod constants;
pub mod types;

// Re-export commonly used types
pub use constants::*;
pub use types::{BucketKey, BucketKind, CountingRule};
