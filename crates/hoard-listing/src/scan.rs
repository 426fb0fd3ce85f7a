//! Recursive directory walk producing file descriptors and directory mtimes.

use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use hoard_config::{Category, normalize};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::cache::CacheEntry;

/// A file found under a category root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
  /// Path relative to the root, `/`-separated.
  pub name: String,

  /// Index of the root within its category.
  pub path_index: usize,

  /// Modification time, seconds since the Unix epoch.
  pub modified: f64,

  /// Creation time, seconds since the Unix epoch. Falls back to the
  /// modification time where the platform does not report it.
  pub created: f64,

  /// Size in bytes.
  pub size: u64,
}

/// Walk options shared by every root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
  pub include_hidden: bool,
  pub excluded_dirs: Vec<String>,
}

impl Default for ScanOptions {
  fn default() -> Self {
    Self {
      include_hidden: false,
      excluded_dirs: vec![".git".to_string()],
    }
  }
}

impl ScanOptions {
  fn skip_dir(&self, entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    self.excluded_dirs.iter().any(|d| d.as_str() == name)
      || (!self.include_hidden && name.starts_with('.'))
  }

  fn skip_file(&self, name: &str) -> bool {
    !self.include_hidden && name.starts_with('.')
  }
}

fn epoch_secs(time: SystemTime) -> f64 {
  time
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs_f64())
    .unwrap_or(0.0)
}

/// Walk one category root.
///
/// Unreadable entries are logged and skipped. The returned entry records the
/// mtime of the root and of every directory the walk entered.
pub fn scan_root(
  root: &Path,
  path_index: usize,
  category: &Category,
  options: &ScanOptions,
) -> CacheEntry {
  let mut files = Vec::new();
  let mut dir_mtimes = HashMap::new();

  let walker = WalkDir::new(root)
    .follow_links(true)
    .into_iter()
    .filter_entry(|e| e.depth() == 0 || !(e.file_type().is_dir() && options.skip_dir(e)));

  for entry in walker {
    let entry = match entry {
      Ok(entry) => entry,
      Err(e) => {
        warn!(root = %root.display(), error = %e, "unable to access entry, skipping");
        continue;
      }
    };

    if entry.file_type().is_dir() {
      match entry.metadata().map_err(std::io::Error::from).and_then(|m| m.modified()) {
        Ok(mtime) => {
          dir_mtimes.insert(entry.path().to_path_buf(), mtime);
        }
        Err(e) => {
          warn!(path = %entry.path().display(), error = %e, "unable to stat directory, skipping");
        }
      }
      continue;
    }

    let file_name = entry.file_name().to_string_lossy();
    if options.skip_file(&file_name) || !category.allows(&file_name) {
      continue;
    }

    let metadata = match entry.metadata() {
      Ok(m) => m,
      Err(e) => {
        warn!(path = %entry.path().display(), error = %e, "unable to access file, skipping");
        continue;
      }
    };

    let modified = match metadata.modified() {
      Ok(t) => t,
      Err(e) => {
        warn!(path = %entry.path().display(), error = %e, "unable to read file mtime, skipping");
        continue;
      }
    };
    let created = metadata.created().unwrap_or(modified);

    let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());

    files.push(FileEntry {
      name: normalize(&relative.to_string_lossy()),
      path_index,
      modified: epoch_secs(modified),
      created: epoch_secs(created),
      size: metadata.len(),
    });
  }

  debug!(
    root = %root.display(),
    files = files.len(),
    dirs = dir_mtimes.len(),
    "scanned category root"
  );

  CacheEntry {
    category: category.name.clone(),
    path_index,
    files,
    dir_mtimes,
    scanned_at: SystemTime::now(),
  }
}
