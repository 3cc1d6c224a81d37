//! Core data models for the blob lifecycle service.
//!
//! These entities describe stored objects and the summaries produced by
//! reconciliation sweeps. They serialize naturally as JSON via `serde` for
//! the trigger responses.

pub mod object;
pub mod report;
