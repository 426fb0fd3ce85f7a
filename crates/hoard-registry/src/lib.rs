//! Hoard Registry
//!
//! This crate provides the persistent content-addressed registry for model
//! artifacts, plus the hashing utility that produces its keys.
//!
//! The [`Registry`] trait defines operations for:
//! - Looking up artifacts by content hash or by path (canonical or alias)
//! - Registering artifacts and aliases
//! - Removing registry entries (never the files behind them)
//! - Recording download attempts for auditing
//!
//! # Concurrency
//!
//! [`Registry::add_artifact`] and [`Registry::add_alias`] are idempotent by
//! uniqueness: the `content_hash`, `canonical_path` and `alias_path`
//! constraints decide which of several concurrent callers wins, and the losers
//! get `Ok(false)` instead of an error. Each registration is a single
//! conditional insert, so a path can never be both canonical for one artifact
//! and an alias of another. There is no lock around registration.

mod hash;
mod sqlite;
mod types;

pub use hash::{ContentHasher, HASH_CHUNK_SIZE, digests_match, hash_file, hash_file_blocking};
pub use sqlite::SqliteRegistry;
pub use types::{
  ArtifactEntry, ArtifactMetadata, ArtifactRecord, DownloadRecord, DownloadStatus, PathMatch,
  RegistryStats,
};

use async_trait::async_trait;

/// Error type for registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Applying the schema failed.
  #[error("schema migration failed: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),

  /// An I/O error occurred.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// The path is already the canonical location of different content.
  #[error("'{path}' already holds artifact {}", hoard_config::short_hash(.owner))]
  PathConflict { path: String, owner: String },
}

/// Content-addressed artifact registry.
#[async_trait]
pub trait Registry: Send + Sync {
  /// Exact lookup by content hash.
  async fn find_by_hash(&self, content_hash: &str) -> Result<Option<ArtifactRecord>, RegistryError>;

  /// Lookup by path. Canonical paths are checked before aliases; an alias
  /// match returns the canonical record with `via_alias` set.
  async fn find_by_path(&self, path: &str) -> Result<Option<PathMatch>, RegistryError>;

  /// Register a new canonical artifact.
  ///
  /// Returns `false` when the hash is already registered; the stored record
  /// keeps its original path in that case. Fails with
  /// [`RegistryError::PathConflict`] when another artifact already lives at
  /// `path`.
  async fn add_artifact(
    &self,
    content_hash: &str,
    path: &str,
    size_bytes: u64,
    source_url: Option<&str>,
    metadata: &ArtifactMetadata,
  ) -> Result<bool, RegistryError>;

  /// Register an additional path for an existing artifact.
  ///
  /// Returns `false` without changing anything when the hash is not
  /// registered, the alias already exists, the path is the artifact's own
  /// canonical path, or the path is the canonical path of another artifact.
  async fn add_alias(&self, content_hash: &str, alias_path: &str) -> Result<bool, RegistryError>;

  /// Alias paths for an artifact, oldest first.
  async fn list_aliases(&self, content_hash: &str) -> Result<Vec<String>, RegistryError>;

  /// Every artifact with its aliases, newest first.
  async fn list_all(&self) -> Result<Vec<ArtifactEntry>, RegistryError>;

  /// Delete an artifact and its aliases from the registry.
  async fn remove_artifact(&self, content_hash: &str) -> Result<bool, RegistryError>;

  /// Sum of `size_bytes` over all artifacts.
  async fn total_size(&self) -> Result<u64, RegistryError>;

  /// Artifact count, alias count and total size.
  async fn stats(&self) -> Result<RegistryStats, RegistryError>;

  /// Open an audit row for a download attempt. The URL is stored without
  /// its query string.
  async fn begin_download(
    &self,
    content_hash: Option<&str>,
    url: &str,
    dest_path: &str,
  ) -> Result<i64, RegistryError>;

  /// Close an audit row.
  async fn finish_download(
    &self,
    id: i64,
    status: DownloadStatus,
    content_hash: Option<&str>,
    error: Option<&str>,
  ) -> Result<(), RegistryError>;

  /// Most recent download attempts, newest first.
  async fn list_downloads(&self, limit: u32) -> Result<Vec<DownloadRecord>, RegistryError>;
}
