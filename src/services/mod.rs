//! Service layer: the storage adapter, the per-object transfer operation,
//! and the lifecycle reconciler that drives both.

pub mod reconciler;
pub mod store;
pub mod transfer;
