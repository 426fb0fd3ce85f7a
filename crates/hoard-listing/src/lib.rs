//! Hoard Listing
//!
//! Lists the model files of a category without re-walking large trees on
//! every request.
//!
//! # Invalidation
//!
//! Each root's listing is cached together with the modification time of
//! every directory the walk descended into, the root included. A cached
//! listing is reused only while all of those directories still report the
//! recorded mtime; a single mismatch discards the whole entry and the root is
//! walked again. There is no time-based expiry.
//!
//! A directory's mtime only changes when entries directly inside it are
//! added, removed or renamed. Rewriting a file in place, or filesystems that
//! do not maintain directory mtimes, go unnoticed until something else
//! invalidates the entry.

mod cache;
mod lister;
mod scan;

pub use cache::{CacheEntry, ListingCache};
pub use lister::{FolderInfo, ModelLister};
pub use scan::{FileEntry, ScanOptions, scan_root};

/// Errors returned by listing operations.
#[derive(Debug, thiserror::Error)]
pub enum ListingError {
  /// The requested category is not configured.
  #[error("unknown category '{0}'")]
  UnknownCategory(String),
}
