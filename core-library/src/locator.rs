//! Document locators
//!
//! A document id is the base64 encoding of the document's relative path.
//! Everything that addresses a stored document (catalog ids, archive entry
//! names, cache keys) is reduced to the same [`CanonicalPath`] so the sync
//! session and the interceptor agree on cache keys.
//!
//! All functions here are pure.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use url::Url;

use crate::error::{LibraryError, Result};
use crate::models::DocumentId;

/// Prefix every canonical path starts with.
pub const ASSET_ROOT: &str = "assets/";

/// Normalized, slash-separated document path under [`ASSET_ROOT`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalPath(String);

impl CanonicalPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn is_pdf(&self) -> bool {
        self.0.to_ascii_lowercase().ends_with(".pdf")
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Prefixes [`ASSET_ROOT`], or rewrites a prefix that differs only in
    /// case, so `Assets/x.pdf` and `assets/x.pdf` share one cache key.
    fn with_root(path: &str) -> Self {
        if has_asset_root(path) {
            CanonicalPath(format!("{}{}", ASSET_ROOT, &path[ASSET_ROOT.len()..]))
        } else {
            CanonicalPath(format!("{}{}", ASSET_ROOT, path))
        }
    }
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn has_asset_root(path: &str) -> bool {
    path.len() >= ASSET_ROOT.len()
        && path.as_bytes()[..ASSET_ROOT.len()].eq_ignore_ascii_case(ASSET_ROOT.as_bytes())
}

/// Percent-decodes once when escapes are present; keeps the input on failure.
fn decode_escapes(text: &str) -> Cow<'_, str> {
    if !text.contains('%') {
        return Cow::Borrowed(text);
    }
    match urlencoding::decode(text) {
        Ok(decoded) => decoded,
        Err(_) => Cow::Borrowed(text),
    }
}

/// Accepts both alphabets and missing padding.
fn standard_alphabet(id: &str) -> String {
    let mut normalized: String = id
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    while normalized.len() % 4 != 0 {
        normalized.push('=');
    }
    normalized
}

/// Decodes a document id into its canonical storage path.
///
/// # Errors
///
/// [`LibraryError::InvalidLocator`] when the id is not base64, is not UTF-8,
/// or decodes to an empty path. Callers skip such documents.
pub fn resolve_canonical_path(id: &str) -> Result<CanonicalPath> {
    let bytes = STANDARD
        .decode(standard_alphabet(id))
        .map_err(|e| LibraryError::invalid_locator(id, format!("not base64: {}", e)))?;
    let text = String::from_utf8(bytes)
        .map_err(|_| LibraryError::invalid_locator(id, "decoded bytes are not UTF-8"))?;

    let trimmed = text.trim().trim_start_matches('/');
    let decoded = decode_escapes(trimmed);
    let path = decoded.trim_start_matches('/');
    if path.is_empty() {
        return Err(LibraryError::invalid_locator(id, "empty path"));
    }

    Ok(CanonicalPath::with_root(path))
}

/// Canonical path for an archive entry name, or `None` for directories and
/// empty names.
pub fn normalize_entry_name(name: &str) -> Option<CanonicalPath> {
    let name = name.trim().replace('\\', "/");
    let name = name.trim_start_matches('/');
    if name.is_empty() || name.ends_with('/') {
        return None;
    }
    let decoded = decode_escapes(name);
    let path = decoded.trim_start_matches('/');
    if path.is_empty() {
        return None;
    }
    Some(CanonicalPath::with_root(path))
}

/// Encodes a relative path as a document id.
pub fn encode_document_id(path: &str) -> DocumentId {
    DocumentId::new(STANDARD.encode(path.as_bytes()))
}

/// Absolute cache key for a canonical path: each segment percent-encoded
/// under `origin`.
pub fn canonical_url(origin: &Url, path: &CanonicalPath) -> Result<Url> {
    let mut url = origin.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| LibraryError::InvalidUrl(format!("'{}' cannot be a base URL", origin)))?
        .clear()
        .extend(path.as_str().split('/'));
    Ok(url)
}

/// Decoded path of a URL without the leading slash.
pub fn path_of_url(url: &Url) -> String {
    let raw = url.path().trim_start_matches('/');
    decode_escapes(raw).into_owned()
}

/// Decoded path of a cache key, whether it is an absolute URL or a bare path.
pub fn path_of_key(key: &str) -> String {
    match Url::parse(key) {
        Ok(url) => path_of_url(&url),
        Err(_) => {
            let raw = key.split(&['?', '#'][..]).next().unwrap_or(key);
            decode_escapes(raw.trim_start_matches('/')).into_owned()
        }
    }
}
