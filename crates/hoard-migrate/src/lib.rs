//! Hoard Migrate
//!
//! Offline pass that walks existing category roots, hashes every file the
//! registry does not know yet, and registers it as a new artifact or as an
//! alias of identical content already on record. Files that are symlinks or
//! have more than one hard link are treated as materialized aliases and
//! skipped.

mod migrator;
mod stats;

pub use migrator::Migrator;
pub use stats::{MigrationStats, format_bytes};

use hoard_registry::RegistryError;

/// Errors that abort a migration run. Per-file failures are counted in
/// [`MigrationStats::errors`] instead.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
  #[error("unknown folder '{0}'")]
  UnknownCategory(String),

  #[error("registry error: {0}")]
  Registry(#[from] RegistryError),

  #[error("directory walk failed: {0}")]
  Walk(String),
}
