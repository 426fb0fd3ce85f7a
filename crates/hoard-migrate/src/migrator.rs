use std::path::PathBuf;
use std::sync::Arc;

use hoard_config::{Category, StoreConfig, short_hash};
use hoard_registry::{ArtifactMetadata, Registry, RegistryError, hash_file};
use tracing::{debug, error, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::{MigrationError, MigrationStats};

/// A file found under a category root.
#[derive(Debug)]
struct Candidate {
  path: PathBuf,
  file_name: String,
  size: u64,
}

/// What happened to one file.
enum FileResult {
  AlreadyRegistered,
  Registered,
  Aliased,
}

/// Backfills the registry from files already on disk.
pub struct Migrator {
  registry: Arc<dyn Registry>,
  config: Arc<StoreConfig>,
  dry_run: bool,
}

impl Migrator {
  pub fn new(registry: Arc<dyn Registry>, config: Arc<StoreConfig>) -> Self {
    Self {
      registry,
      config,
      dry_run: false,
    }
  }

  /// Report what would happen without writing to the registry.
  pub fn dry_run(mut self, dry_run: bool) -> Self {
    self.dry_run = dry_run;
    self
  }

  /// Migrate the given categories, or every model category when empty.
  pub async fn run(&self, categories: &[String]) -> Result<MigrationStats, MigrationError> {
    let categories = if categories.is_empty() {
      self.config.model_category_names()
    } else {
      categories.to_vec()
    };

    if self.dry_run {
      info!("dry run, the registry will not be modified");
    }
    info!(folders = %categories.join(", "), "starting migration");

    let mut total = MigrationStats::default();
    for name in &categories {
      total += self.scan_category(name).await?;
    }

    info!(
      total_files = total.total_files,
      newly_registered = total.newly_registered,
      aliased = total.aliased,
      errors = total.errors,
      "migration finished"
    );
    Ok(total)
  }

  /// Migrate every root of one category.
  pub async fn scan_category(&self, name: &str) -> Result<MigrationStats, MigrationError> {
    let category = self
      .config
      .category(name)
      .ok_or_else(|| MigrationError::UnknownCategory(name.to_string()))?;

    info!(folder = %category.name, "scanning folder");

    let excluded = self.config.excluded_dirs.clone();
    let walk_category = category.clone();
    let candidates = tokio::task::spawn_blocking(move || collect(&walk_category, &excluded))
      .await
      .map_err(|e| MigrationError::Walk(e.to_string()))?;

    let mut stats = MigrationStats::default();
    for candidate in candidates {
      stats.total_files += 1;
      stats.total_size += candidate.size;

      let key = self.config.registry_key(&candidate.path);
      match self.migrate_file(&category, &candidate, &key).await {
        Ok(FileResult::AlreadyRegistered) => stats.already_registered += 1,
        Ok(FileResult::Registered) => stats.newly_registered += 1,
        Ok(FileResult::Aliased) => stats.aliased += 1,
        Err(e) => {
          error!(path = %key, error = %e, "failed to migrate file");
          stats.errors += 1;
        }
      }
    }

    Ok(stats)
  }

  async fn migrate_file(
    &self,
    category: &Category,
    candidate: &Candidate,
    key: &str,
  ) -> Result<FileResult, FileError> {
    if let Some(existing) = self.registry.find_by_path(key).await? {
      debug!(
        path = %key,
        hash = short_hash(&existing.record.content_hash),
        "already registered"
      );
      return Ok(FileResult::AlreadyRegistered);
    }

    info!(path = %key, "hashing");
    let hash = hash_file(&candidate.path).await?;

    if let Some(existing) = self.registry.find_by_hash(&hash).await? {
      info!(path = %key, duplicate_of = %existing.canonical_path, "duplicate content");
      if !self.dry_run {
        self.alias(&hash, key).await?;
      }
      return Ok(FileResult::Aliased);
    }

    if self.dry_run {
      info!(path = %key, hash = short_hash(&hash), "would register");
      return Ok(FileResult::Registered);
    }

    let metadata = ArtifactMetadata {
      filename: Some(candidate.file_name.clone()),
      folder: Some(category.name.clone()),
      migrated: true,
      ..Default::default()
    };
    let created = self
      .registry
      .add_artifact(&hash, key, candidate.size, None, &metadata)
      .await?;

    if created {
      info!(path = %key, hash = short_hash(&hash), "registered");
      Ok(FileResult::Registered)
    } else {
      // Registered concurrently by someone else.
      self.alias(&hash, key).await?;
      Ok(FileResult::Aliased)
    }
  }

  async fn alias(&self, hash: &str, key: &str) -> Result<(), FileError> {
    if self.registry.add_alias(hash, key).await? {
      Ok(())
    } else {
      Err(FileError::AliasRefused {
        hash: short_hash(hash).to_string(),
      })
    }
  }
}

#[derive(Debug, thiserror::Error)]
enum FileError {
  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Registry(#[from] RegistryError),

  #[error("registry refused alias of {hash}")]
  AliasRefused { hash: String },
}

fn is_hidden_or_excluded(entry: &DirEntry, excluded: &[String]) -> bool {
  let name = entry.file_name().to_string_lossy();
  name.starts_with('.') || excluded.iter().any(|d| d.as_str() == name)
}

#[cfg(unix)]
fn link_count(metadata: &std::fs::Metadata) -> u64 {
  use std::os::unix::fs::MetadataExt;
  metadata.nlink()
}

#[cfg(not(unix))]
fn link_count(_metadata: &std::fs::Metadata) -> u64 {
  1
}

/// Regular, singly linked files under the category roots that pass the
/// extension filter.
fn collect(category: &Category, excluded: &[String]) -> Vec<Candidate> {
  let mut candidates = Vec::new();

  for root in &category.roots {
    if !root.is_dir() {
      debug!(root = %root.display(), "skipping missing root");
      continue;
    }
    info!(root = %root.display(), "scanning root");

    let walker = WalkDir::new(root)
      .follow_links(true)
      .into_iter()
      .filter_entry(|e| e.depth() == 0 || !(e.file_type().is_dir() && is_hidden_or_excluded(e, excluded)));

    for entry in walker {
      let entry = match entry {
        Ok(entry) => entry,
        Err(e) => {
          warn!(root = %root.display(), error = %e, "unable to access entry, skipping");
          continue;
        }
      };
      if !entry.file_type().is_file() {
        continue;
      }

      let file_name = entry.file_name().to_string_lossy().into_owned();
      if file_name.starts_with('.') || !category.allows(&file_name) {
        continue;
      }

      if let Some(candidate) = candidate(&entry, file_name) {
        candidates.push(candidate);
      }
    }
  }

  candidates
}

fn candidate(entry: &DirEntry, file_name: String) -> Option<Candidate> {
  let path = entry.path();
  if entry.path_is_symlink() {
    debug!(path = %path.display(), "skipping symlink");
    return None;
  }

  let metadata = match std::fs::metadata(path) {
    Ok(m) => m,
    Err(e) => {
      warn!(path = %path.display(), error = %e, "unable to access file, skipping");
      return None;
    }
  };
  if link_count(&metadata) > 1 {
    debug!(path = %path.display(), "skipping hard link");
    return None;
  }

  Some(Candidate {
    path: path.to_path_buf(),
    file_name,
    size: metadata.len(),
  })
}
