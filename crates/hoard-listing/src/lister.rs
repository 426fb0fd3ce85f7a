use std::path::PathBuf;
use std::sync::Arc;

use hoard_config::{INTERNAL_CATEGORIES, StoreConfig};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::scan::{FileEntry, ScanOptions, scan_root};
use crate::{ListingCache, ListingError};

/// A category and its root directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderInfo {
  pub name: String,
  pub folders: Vec<PathBuf>,
}

/// Lists category contents through a [`ListingCache`].
#[derive(Clone)]
pub struct ModelLister {
  config: Arc<StoreConfig>,
  options: ScanOptions,
  cache: ListingCache,
}

impl ModelLister {
  pub fn new(config: Arc<StoreConfig>) -> Self {
    let options = ScanOptions {
      include_hidden: config.include_hidden,
      excluded_dirs: config.excluded_dirs.clone(),
    };
    Self {
      config,
      options,
      cache: ListingCache::new(),
    }
  }

  pub fn cache(&self) -> &ListingCache {
    &self.cache
  }

  /// List every file of a category across all of its roots.
  ///
  /// Roots that do not exist or are not directories are skipped. Each root is
  /// served from the cache while its directory mtimes are unchanged.
  #[instrument(skip(self))]
  pub fn list(&self, category: &str) -> Result<Vec<FileEntry>, ListingError> {
    let category = self
      .config
      .category(category)
      .ok_or_else(|| ListingError::UnknownCategory(category.to_string()))?;

    let mut files = Vec::new();
    for (index, root) in category.roots.iter().enumerate() {
      if !root.is_dir() {
        debug!(root = %root.display(), "root is not a directory, skipping");
        continue;
      }

      let entry = match self.cache.get(root, &category.name, index) {
        Some(entry) => {
          debug!(root = %root.display(), "listing cache hit");
          entry
        }
        None => self
          .cache
          .insert(root.clone(), scan_root(root, index, &category, &self.options)),
      };

      files.extend(entry.files.iter().cloned());
    }

    Ok(files)
  }

  /// Every user-facing category with its configured roots.
  pub fn folders(&self) -> Vec<FolderInfo> {
    self
      .config
      .categories
      .keys()
      .filter(|name| !INTERNAL_CATEGORIES.contains(&name.as_str()))
      .filter_map(|name| self.config.category(name))
      .map(|category| FolderInfo {
        name: category.name,
        folders: category.roots,
      })
      .collect()
  }
}
