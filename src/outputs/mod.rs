//! Output sinks for extracted batches.
//!
//! - [`json`]: per-firing JSON archive files

pub mod json;
