//! In-memory listing cache keyed by root directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use crate::scan::FileEntry;

/// Result of walking one root.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub category: String,
  pub path_index: usize,
  pub files: Vec<FileEntry>,

  /// Every directory the walk entered, the root included, with the mtime
  /// observed at walk time.
  pub dir_mtimes: HashMap<PathBuf, SystemTime>,

  pub scanned_at: SystemTime,
}

impl CacheEntry {
  /// Whether every recorded directory still reports its recorded mtime.
  ///
  /// A directory that has vanished or can no longer be stat'ed counts as
  /// changed.
  pub fn is_fresh(&self) -> bool {
    !self.dir_mtimes.is_empty()
      && self.dir_mtimes.iter().all(|(dir, recorded)| {
        std::fs::metadata(dir)
          .and_then(|m| m.modified())
          .is_ok_and(|current| current == *recorded)
      })
  }

  fn matches(&self, category: &str, path_index: usize) -> bool {
    self.category == category && self.path_index == path_index
  }
}

/// Shared map from root directory to its last listing.
///
/// Entries are replaced wholesale; concurrent misses on the same root may
/// both walk it and the last insert wins.
#[derive(Clone, Default)]
pub struct ListingCache {
  entries: Arc<RwLock<HashMap<PathBuf, Arc<CacheEntry>>>>,
}

impl ListingCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Cached listing for `root` if it is still valid for this category and
  /// root index. Stale entries are dropped.
  pub fn get(&self, root: &Path, category: &str, path_index: usize) -> Option<Arc<CacheEntry>> {
    let entry = {
      let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
      entries.get(root).cloned()
    }?;

    if entry.matches(category, path_index) && entry.is_fresh() {
      return Some(entry);
    }

    self.invalidate(root);
    None
  }

  pub fn insert(&self, root: PathBuf, entry: CacheEntry) -> Arc<CacheEntry> {
    let entry = Arc::new(entry);
    let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
    entries.insert(root, entry.clone());
    entry
  }

  pub fn invalidate(&self, root: &Path) {
    let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
    entries.remove(root);
  }

  /// Clear the cache.
  pub fn clear(&self) {
    let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
    entries.clear();
  }

  pub fn len(&self) -> usize {
    self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
