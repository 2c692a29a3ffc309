//! Centralized constants for hibernate.
//!
//! Annotation keys, default tunables and metric names live here so the
//! cache, both controllers and the binary agree on them.

pub mod annotations;
pub mod defaults;
pub mod metrics;
pub mod paths;
