//!
//! Project metadata
//!
use serde::{Deserialize, Serialize};

/// Immutable description of a project as seen by its storage.
///
/// Two metadata refer to the same revision of the same project
/// iff they compare equal on `(uri, last_modified)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    /// Canonical storage uri
    pub uri: String,
    /// Public (short) name of the project
    pub name: String,
    /// Url scheme used for resolution
    pub scheme: String,
    /// Storage backend tag
    pub storage: String,
    /// Modification time as epoch seconds
    pub last_modified: i64,
}

impl ProjectMetadata {
    /// Compare against another revision of the same project.
    ///
    /// Clock skew within the same wall-second compares as unchanged,
    /// the storage timestamp being authoritative.
    pub fn is_newer_than(&self, other: &ProjectMetadata) -> bool {
        self.last_modified > other.last_modified
    }
}
