//! # Core Library Module
//!
//! The chart catalog and everything needed to address its documents offline:
//!
//! - [`models`]: catalog records and the offline package manifest
//! - [`locator`]: document identifier → canonical storage path and URL
//! - [`fingerprint`]: order-independent catalog fingerprint for change detection
//! - [`catalog`]: manifest loading with a cached fallback
//!
//! ## Example
//!
//! ```
//! use core_library::locator::{encode_document_id, resolve_canonical_path};
//!
//! let id = encode_document_id("assets/Cifra/Amazing Grace.pdf");
//! let path = resolve_canonical_path(id.as_str()).unwrap();
//! assert_eq!(path.as_str(), "assets/Cifra/Amazing Grace.pdf");
//! ```

pub mod catalog;
pub mod error;
pub mod fingerprint;
pub mod locator;
pub mod models;

pub use catalog::Catalog;
pub use error::{LibraryError, Result};
pub use fingerprint::{fingerprint, has_changed, ManifestFingerprint};
pub use locator::{
    canonical_url, encode_document_id, normalize_entry_name, path_of_key, path_of_url,
    resolve_canonical_path, CanonicalPath, ASSET_ROOT,
};
pub use models::{
    categories_of, documents_in_categories, parse_catalog, DocumentId, DocumentRecord,
    OfflineManifest, PackagePart,
};
