//! Catalog fingerprint
//!
//! SHA-256 over the sorted document ids. Reordering the catalog keeps the
//! fingerprint; adding, removing or renaming any id changes it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::models::DocumentRecord;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestFingerprint(String);

impl ManifestFingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ManifestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn fingerprint(documents: &[DocumentRecord]) -> ManifestFingerprint {
    let mut ids: Vec<&str> = documents.iter().map(|doc| doc.id.as_str()).collect();
    ids.sort_unstable();

    let mut hasher = Sha256::new();
    for (index, id) in ids.iter().enumerate() {
        if index > 0 {
            hasher.update(b"|");
        }
        hasher.update(id.as_bytes());
    }
    ManifestFingerprint(hex::encode(hasher.finalize()))
}

/// True only when a previous fingerprint exists and differs from `current`.
pub fn has_changed(previous: Option<&ManifestFingerprint>, current: &ManifestFingerprint) -> bool {
    match previous {
        Some(previous) if !previous.is_empty() => previous != current,
        _ => false,
    }
}
