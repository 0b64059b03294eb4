//! Report export
//!
//! Serializes aggregation results for machine consumption. Currently only
//! JSON, for piping `jvmscope stats --json` into other tools.

pub mod json;

pub use json::{JsonReport, KindsReport};
