//! Request checks that run before any network access.

use std::path::{Path, PathBuf};

use hoard_config::{Category, StoreConfig, normalize, url_file_name};

use crate::{DownloadError, DownloadRequest};

/// Where a request will land.
#[derive(Debug, Clone)]
pub struct Target {
  pub category: Category,
  pub path_index: usize,

  /// Normalized name relative to the category root; may contain
  /// subdirectories.
  pub filename: String,

  /// Absolute destination on disk.
  pub dest: PathBuf,

  /// Destination as recorded in the registry.
  pub key: String,
}

impl Target {
  /// Final path component of the filename.
  pub fn base_name(&self) -> &str {
    self.filename.rsplit('/').next().unwrap_or(&self.filename)
  }
}

/// Resolve category, root and filename, rejecting names that would escape
/// the root.
pub fn resolve_target(
  config: &StoreConfig,
  request: &DownloadRequest,
) -> Result<Target, DownloadError> {
  let category = config
    .category(&request.folder)
    .ok_or_else(|| DownloadError::UnknownCategory(request.folder.clone()))?;

  let (path_index, root) = category
    .root(request.path_index)
    .map(|(i, root)| (i, root.to_path_buf()))
    .ok_or_else(|| DownloadError::UnknownCategory(request.folder.clone()))?;

  let raw = match request.filename.as_deref() {
    Some(name) if !name.trim().is_empty() => name.trim(),
    _ => url_file_name(&request.url),
  };
  let filename = checked_filename(raw)?;

  let dest = root.join(&filename);
  let key = config.registry_key(&dest);

  Ok(Target {
    category,
    path_index,
    filename,
    dest,
    key,
  })
}

fn checked_filename(raw: &str) -> Result<String, DownloadError> {
  let invalid = || DownloadError::InvalidFilename(raw.to_string());

  let stripped = raw.trim_start_matches(['/', '\\']);
  if stripped.is_empty() {
    return Err(invalid());
  }

  let name = normalize(stripped);
  if name == "." || name == ".." || name.starts_with("../") || name.contains(':') {
    return Err(invalid());
  }
  if Path::new(&name).is_absolute() {
    return Err(invalid());
  }

  Ok(name)
}

/// Source allow-list and extension filter. Trusted URLs skip both.
pub fn check_policy(
  config: &StoreConfig,
  request: &DownloadRequest,
  target: &Target,
) -> Result<(), DownloadError> {
  let policy = &config.download;
  if policy.is_trusted(&request.url) {
    return Ok(());
  }

  if !policy.source_allowed(&request.url) {
    return Err(DownloadError::DisallowedSource);
  }

  if !target.category.allows(target.base_name()) {
    return Err(DownloadError::DisallowedExtension {
      allowed: target.category.extension_list(),
    });
  }

  Ok(())
}
