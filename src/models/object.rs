//! Represents an object (blob) stored in a container.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for a single stored object within a container.
///
/// An object corresponds to a stored file or binary content, addressed by its
/// key. The struct carries metadata only, never the payload bytes. Objects are
/// immutable once written; moving one between containers is always modeled as
/// copy-then-delete.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StoredObject {
    /// Object key (path-like identifier, unique within its container).
    pub key: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Lowercase hex MD5 of the payload, used as the upload integrity check.
    /// Populated once the payload has been read; listings may omit it.
    pub content_hash: Option<String>,

    /// Timestamp of the last modification, UTC. Drives retention decisions.
    pub last_modified: DateTime<Utc>,
}
