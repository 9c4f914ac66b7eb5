//! Domain models for the chart catalog
//!
//! Manifests are validated when they are deserialized, so the rest of the
//! core only ever sees well-formed records.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::warn;

use crate::error::{LibraryError, Result};

// =============================================================================
// ID Types
// =============================================================================

/// Opaque document identifier: base64 of the document's relative path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// One chart in the catalog.
///
/// Field names on the wire follow the published content manifest
/// (`pdfId`, `nome`, `classificacao`, `categoria`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    #[serde(rename = "pdfId", alias = "pdf", alias = "id")]
    pub id: DocumentId,

    #[serde(rename = "nome", alias = "displayName", default)]
    pub display_name: String,

    #[serde(
        rename = "classificacao",
        alias = "classificationCode",
        default,
        deserialize_with = "string_or_number"
    )]
    pub classification: Option<String>,

    #[serde(rename = "categoria", alias = "categoryLabel", default)]
    pub category: String,
}

impl DocumentRecord {
    pub fn new(id: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: DocumentId::new(id),
            display_name: String::new(),
            classification: None,
            category: category.into(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.id.as_str().trim().is_empty() {
            return Err("Document id cannot be empty".to_string());
        }
        Ok(())
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Option::<Loose>::deserialize(deserializer)? {
        Some(Loose::Text(text)) if !text.trim().is_empty() => Some(text),
        Some(Loose::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

/// Parses the content manifest (a JSON array of records).
///
/// Records that fail to deserialize or validate are skipped with a warning;
/// a body that is not a JSON array is rejected.
pub fn parse_catalog(bytes: &[u8]) -> Result<Vec<DocumentRecord>> {
    let values: Vec<serde_json::Value> = serde_json::from_slice(bytes)
        .map_err(|e| LibraryError::InvalidManifest(format!("catalog is not a JSON array: {}", e)))?;

    let mut documents = Vec::with_capacity(values.len());
    for (index, value) in values.into_iter().enumerate() {
        match serde_json::from_value::<DocumentRecord>(value) {
            Ok(record) => match record.validate() {
                Ok(()) => documents.push(record),
                Err(reason) => warn!(index, %reason, "Skipping invalid catalog record"),
            },
            Err(e) => warn!(index, error = %e, "Skipping malformed catalog record"),
        }
    }
    Ok(documents)
}

/// Records whose category is one of `categories`.
pub fn documents_in_categories<'a>(
    documents: &'a [DocumentRecord],
    categories: &[String],
) -> Vec<&'a DocumentRecord> {
    let wanted: BTreeSet<&str> = categories.iter().map(String::as_str).collect();
    documents
        .iter()
        .filter(|doc| wanted.contains(doc.category.as_str()))
        .collect()
}

/// Distinct category labels, sorted.
pub fn categories_of(documents: &[DocumentRecord]) -> Vec<String> {
    documents
        .iter()
        .map(|doc| doc.category.clone())
        .filter(|category| !category.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

// =============================================================================
// Offline package manifest
// =============================================================================

/// One downloadable archive belonging to a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagePart {
    /// Absolute URL or origin-relative path
    pub url: String,
    #[serde(default)]
    pub filename: Option<String>,
    /// Compressed size in bytes, when known
    #[serde(default)]
    pub size: Option<u64>,
}

impl PackagePart {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: None,
            size: None,
        }
    }

    /// Human label for logs: the filename, or the last URL segment.
    pub fn label(&self) -> &str {
        match &self.filename {
            Some(name) if !name.is_empty() => name,
            _ => self.url.rsplit('/').next().unwrap_or(&self.url),
        }
    }
}

/// Category label → ordered package parts.
///
/// Accepts both `{"packages": {"Cifra": [part, ..]}}` and
/// `{"packages": {"Cifra": {"parts": [part, ..]}}}`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawOfflineManifest")]
pub struct OfflineManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub packages: BTreeMap<String, Vec<PackagePart>>,
}

#[derive(Deserialize)]
struct RawOfflineManifest {
    #[serde(default)]
    version: Option<String>,
    packages: BTreeMap<String, RawCategoryPackages>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCategoryPackages {
    Parts(Vec<PackagePart>),
    Wrapped { parts: Vec<PackagePart> },
}

impl TryFrom<RawOfflineManifest> for OfflineManifest {
    type Error = String;

    fn try_from(raw: RawOfflineManifest) -> std::result::Result<Self, Self::Error> {
        let mut packages = BTreeMap::new();
        for (category, entry) in raw.packages {
            if category.trim().is_empty() {
                return Err("package category cannot be empty".to_string());
            }
            let parts = match entry {
                RawCategoryPackages::Parts(parts) => parts,
                RawCategoryPackages::Wrapped { parts } => parts,
            };
            let valid: Vec<PackagePart> = parts
                .into_iter()
                .filter(|part| {
                    let ok = !part.url.trim().is_empty();
                    if !ok {
                        warn!(category = %category, "Dropping package part without URL");
                    }
                    ok
                })
                .collect();
            packages.insert(category, valid);
        }

        Ok(OfflineManifest {
            version: raw.version,
            packages,
        })
    }
}

impl OfflineManifest {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| LibraryError::InvalidManifest(e.to_string()))
    }

    /// Parts for a category, or `None` when the manifest does not list it.
    pub fn parts_for(&self, category: &str) -> Option<&[PackagePart]> {
        self.packages.get(category).map(Vec::as_slice)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    /// Sum of known part sizes for a category.
    pub fn total_size(&self, category: &str) -> u64 {
        self.parts_for(category)
            .map(|parts| parts.iter().filter_map(|part| part.size).sum())
            .unwrap_or(0)
    }
}
