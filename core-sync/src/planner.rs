//! Sync planning
//!
//! Decides which documents of the requested categories still need to be
//! stored by comparing their canonical paths with the keys already in the
//! document cache.

use core_library::{
    canonical_url, path_of_key, resolve_canonical_path, CanonicalPath, DocumentId, DocumentRecord,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};
use url::Url;

/// Whether a cached path and a canonical path probably name the same
/// document.
///
/// Exact equality is the primary rule. The fallbacks tolerate keys stored as
/// relative paths or under a different origin:
///
/// - one path ends with the other on a segment boundary, and the shorter one
///   still names a folder and a file
/// - folder and file name are equal ignoring ASCII case
///
/// A bare file name never matches, so a chart stored under one
/// classification is not mistaken for its namesake under another.
pub fn is_likely_same_document(cached: &str, canonical: &str) -> bool {
    let cached = cached.trim_start_matches('/');
    let canonical = canonical.trim_start_matches('/');
    if cached.is_empty() || canonical.is_empty() {
        return false;
    }
    if cached == canonical
        || ends_with_segments(cached, canonical)
        || ends_with_segments(canonical, cached)
    {
        return true;
    }
    match (folder_and_name(cached), folder_and_name(canonical)) {
        (Some((cached_dir, cached_name)), Some((dir, name))) => {
            cached_dir.eq_ignore_ascii_case(dir) && cached_name.eq_ignore_ascii_case(name)
        }
        _ => false,
    }
}

fn ends_with_segments(path: &str, suffix: &str) -> bool {
    suffix.contains('/')
        && path.len() > suffix.len()
        && path.ends_with(suffix)
        && path[..path.len() - suffix.len()].ends_with('/')
}

fn folder_and_name(path: &str) -> Option<(&str, &str)> {
    let mut segments = path.rsplit('/');
    let name = segments.next().filter(|name| !name.is_empty())?;
    let folder = segments.next().filter(|folder| !folder.is_empty())?;
    Some((folder, name))
}

/// Lowercased `folder/file` of a path.
fn tail_key(path: &str) -> Option<String> {
    folder_and_name(path).map(|(folder, name)| format!("{}/{}", folder, name).to_lowercase())
}

/// Decoded view of the document cache keys.
#[derive(Debug, Default, Clone)]
pub struct CacheIndex {
    paths: HashSet<String>,
    tails: HashSet<String>,
}

impl CacheIndex {
    pub fn from_keys<S: AsRef<str>>(keys: &[S]) -> Self {
        let mut index = CacheIndex::default();
        for key in keys {
            let path = path_of_key(key.as_ref());
            if path.is_empty() {
                continue;
            }
            if let Some(tail) = tail_key(&path) {
                index.tails.insert(tail);
            }
            index.paths.insert(path);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Exact lookup first, then [`is_likely_same_document`] over every key.
    pub fn contains(&self, path: &CanonicalPath) -> bool {
        if self.paths.contains(path.as_str()) {
            return true;
        }
        if tail_key(path.as_str()).map_or(false, |tail| self.tails.contains(&tail)) {
            return true;
        }
        self.paths
            .iter()
            .any(|cached| is_likely_same_document(cached, path.as_str()))
    }

    /// Exact lookup only.
    pub fn contains_exact(&self, path: &CanonicalPath) -> bool {
        self.paths.contains(path.as_str())
    }
}

/// A document that still has to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDocument {
    pub id: DocumentId,
    pub path: CanonicalPath,
    /// Cache key
    pub url: Url,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryPlan {
    pub category: String,
    /// Keyed by canonical path, which is what archive entries resolve to
    pub pending: BTreeMap<CanonicalPath, PendingDocument>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Categories with outstanding work, in request order
    pub categories: Vec<CategoryPlan>,
    /// Requested categories whose documents are all cached
    pub already_complete: Vec<String>,
    /// Documents skipped because their id could not be decoded
    pub invalid_locators: usize,
}

impl SyncPlan {
    pub fn total(&self) -> u64 {
        self.categories
            .iter()
            .map(|category| category.pending.len() as u64)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

/// Builds the work list for `categories`.
pub fn plan(
    documents: &[DocumentRecord],
    categories: &[String],
    index: &CacheIndex,
    origin: &Url,
) -> SyncPlan {
    let mut by_category: HashMap<&str, Vec<&DocumentRecord>> = HashMap::new();
    for document in documents {
        by_category
            .entry(document.category.as_str())
            .or_default()
            .push(document);
    }

    let mut result = SyncPlan::default();
    let mut seen = HashSet::new();

    for category in categories {
        if !seen.insert(category.as_str()) {
            continue;
        }
        let mut pending = BTreeMap::new();

        for document in by_category.get(category.as_str()).into_iter().flatten() {
            let path = match resolve_canonical_path(document.id.as_str()) {
                Ok(path) => path,
                Err(e) => {
                    warn!(error = %e, "Skipping document with invalid locator");
                    result.invalid_locators += 1;
                    continue;
                }
            };
            if index.contains(&path) {
                continue;
            }
            let url = match canonical_url(origin, &path) {
                Ok(url) => url,
                Err(e) => {
                    warn!(path = %path, error = %e, "Skipping document without cache URL");
                    result.invalid_locators += 1;
                    continue;
                }
            };
            pending.insert(
                path.clone(),
                PendingDocument {
                    id: document.id.clone(),
                    path,
                    url,
                },
            );
        }

        if pending.is_empty() {
            debug!(category = %category, "Category already complete");
            result.already_complete.push(category.clone());
        } else {
            debug!(category = %category, pending = pending.len(), "Category has pending documents");
            result.categories.push(CategoryPlan {
                category: category.clone(),
                pending,
            });
        }
    }

    result
}
