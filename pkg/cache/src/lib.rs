//! Shared, periodically refreshed view of every project's workloads.
//!
//! One refresh pass builds a complete index off to the side and publishes it
//! with a single `Arc` swap, so readers always see a whole generation.

pub mod cache;
pub mod snapshot;

pub use cache::{CacheConfig, RefreshSummary, ResourceCache};
pub use snapshot::ResourceSnapshot;
