//! Run and application bundle metadata.
//!
//! Both are immutable once created by the coordinator; nodes only fetch them.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One federated computation session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: u64,
    pub fab_id: String,
    pub fab_version: String,
    /// Hash of the application bundle this run executes.
    pub fab_hash: String,
    #[serde(default)]
    pub override_config: BTreeMap<String, String>,
}

/// A packaged application bundle, fetched by hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fab {
    pub hash_str: String,
    pub content: Bytes,
}

impl Fab {
    pub fn new(hash_str: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            hash_str: hash_str.into(),
            content: content.into(),
        }
    }
}
