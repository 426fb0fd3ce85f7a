use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hoard_config::{clean_url, normalize, short_hash};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::types::Json;
use tracing::{debug, info, warn};

use crate::{
  ArtifactEntry, ArtifactMetadata, ArtifactRecord, DownloadRecord, DownloadStatus, PathMatch,
  Registry, RegistryError, RegistryStats,
};

const ARTIFACT_COLUMNS: &str =
  "content_hash, canonical_path, size_bytes, source_url, metadata, registered_at";

/// SQLite-based registry implementation.
///
/// The pool holds a single connection, so transactions from concurrent
/// callers are serialized by the pool rather than failing with "database is
/// locked". Which of two racing inserts wins is still decided by the
/// uniqueness constraints.
#[derive(Clone)]
pub struct SqliteRegistry {
  pool: SqlitePool,
}

impl SqliteRegistry {
  /// Create a registry with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if needed) the registry database at `path` and apply the
  /// schema.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }

    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true)
      .journal_mode(SqliteJournalMode::Wal)
      .foreign_keys(true)
      .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .connect_with(options)
      .await?;

    let registry = Self::new(pool);
    registry.migrate().await?;

    debug!(path = %path.display(), "registry opened");
    Ok(registry)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), RegistryError> {
    sqlx::migrate!("../../migrations").run(&self.pool).await?;
    Ok(())
  }

  /// Close the underlying pool.
  pub async fn close(&self) {
    self.pool.close().await;
  }

  async fn canonical_owner(&self, path: &str) -> Result<Option<String>, RegistryError> {
    let owner = sqlx::query_scalar("SELECT content_hash FROM artifacts WHERE canonical_path = ?")
      .bind(path)
      .fetch_optional(&self.pool)
      .await?;
    Ok(owner)
  }

  /// Why a conditional artifact insert matched no row.
  async fn classify_occupied(&self, content_hash: &str, path: &str) -> Result<bool, RegistryError> {
    match self.canonical_owner(path).await? {
      Some(owner) if owner != content_hash => {
        warn!(
          path = %path,
          owner = short_hash(&owner),
          "cannot register artifact: path holds another artifact"
        );
        Err(RegistryError::PathConflict {
          path: path.to_string(),
          owner,
        })
      }
      _ => {
        debug!(hash = short_hash(content_hash), "artifact already registered");
        Ok(false)
      }
    }
  }

  async fn explain_refused_alias(&self, content_hash: &str, alias_path: &str) {
    match self.canonical_owner(alias_path).await {
      Ok(Some(owner)) if owner == content_hash => {
        debug!(path = %alias_path, "alias equals canonical path, nothing to do");
      }
      Ok(Some(owner)) => warn!(
        path = %alias_path,
        owner = short_hash(&owner),
        "cannot create alias: path is canonical for another artifact"
      ),
      Ok(None) => warn!(
        hash = short_hash(content_hash),
        "cannot create alias: artifact not registered"
      ),
      Err(e) => debug!(error = %e, "failed to look up alias conflict"),
    }
  }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
  matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
  matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

#[async_trait]
impl Registry for SqliteRegistry {
  async fn find_by_hash(&self, content_hash: &str) -> Result<Option<ArtifactRecord>, RegistryError> {
    let record = sqlx::query_as(&format!(
      "SELECT {} FROM artifacts WHERE content_hash = ?",
      ARTIFACT_COLUMNS
    ))
    .bind(content_hash)
    .fetch_optional(&self.pool)
    .await?;

    Ok(record)
  }

  async fn find_by_path(&self, path: &str) -> Result<Option<PathMatch>, RegistryError> {
    let path = normalize(path);

    let canonical: Option<ArtifactRecord> = sqlx::query_as(&format!(
      "SELECT {} FROM artifacts WHERE canonical_path = ? ORDER BY registered_at LIMIT 1",
      ARTIFACT_COLUMNS
    ))
    .bind(&path)
    .fetch_optional(&self.pool)
    .await?;

    if let Some(record) = canonical {
      return Ok(Some(PathMatch {
        record,
        via_alias: false,
      }));
    }

    let aliased: Option<ArtifactRecord> = sqlx::query_as(
      r#"
            SELECT a.content_hash, a.canonical_path, a.size_bytes, a.source_url, a.metadata, a.registered_at
            FROM aliases al
            JOIN artifacts a ON al.content_hash = a.content_hash
            WHERE al.alias_path = ?
            "#,
    )
    .bind(&path)
    .fetch_optional(&self.pool)
    .await?;

    Ok(aliased.map(|record| PathMatch {
      record,
      via_alias: true,
    }))
  }

  async fn add_artifact(
    &self,
    content_hash: &str,
    path: &str,
    size_bytes: u64,
    source_url: Option<&str>,
    metadata: &ArtifactMetadata,
  ) -> Result<bool, RegistryError> {
    let path = normalize(path);
    let source_url = source_url.map(clean_url);
    let size_bytes = i64::try_from(size_bytes).unwrap_or(i64::MAX);

    let mut tx = self.pool.begin().await?;

    let inserted = sqlx::query(&format!(
      r#"
            INSERT INTO artifacts ({})
            SELECT ?, ?, ?, ?, ?, ?
            WHERE NOT EXISTS (SELECT 1 FROM artifacts WHERE canonical_path = ?)
            "#,
      ARTIFACT_COLUMNS
    ))
    .bind(content_hash)
    .bind(&path)
    .bind(size_bytes)
    .bind(source_url)
    .bind(Json(metadata))
    .bind(Utc::now())
    .bind(&path)
    .execute(&mut *tx)
    .await;

    let rows = match inserted {
      Ok(result) => result.rows_affected(),
      Err(e) if is_unique_violation(&e) => {
        debug!(hash = short_hash(content_hash), "artifact already registered");
        return Ok(false);
      }
      Err(e) => return Err(e.into()),
    };

    if rows == 0 {
      tx.rollback().await?;
      return self.classify_occupied(content_hash, &path).await;
    }

    // The bytes at `path` are now this artifact, so an alias row claiming the
    // path for different content is stale.
    let stale = sqlx::query("DELETE FROM aliases WHERE alias_path = ? AND content_hash != ?")
      .bind(&path)
      .bind(content_hash)
      .execute(&mut *tx)
      .await?;

    tx.commit().await?;

    if stale.rows_affected() > 0 {
      warn!(path = %path, "dropped stale alias replaced by a new artifact");
    }
    info!(path = %path, hash = short_hash(content_hash), "registered artifact");
    Ok(true)
  }

  async fn add_alias(&self, content_hash: &str, alias_path: &str) -> Result<bool, RegistryError> {
    let alias_path = normalize(alias_path);

    // One statement, so no artifact can claim the path between the checks
    // and the insert.
    let inserted = sqlx::query(
      r#"
            INSERT INTO aliases (content_hash, alias_path, created_at)
            SELECT ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM artifacts WHERE content_hash = ?)
              AND NOT EXISTS (SELECT 1 FROM artifacts WHERE canonical_path = ?)
            "#,
    )
    .bind(content_hash)
    .bind(&alias_path)
    .bind(Utc::now())
    .bind(content_hash)
    .bind(&alias_path)
    .execute(&self.pool)
    .await;

    match inserted {
      Ok(result) if result.rows_affected() > 0 => {
        info!(path = %alias_path, hash = short_hash(content_hash), "created alias");
        Ok(true)
      }
      Ok(_) => {
        self.explain_refused_alias(content_hash, &alias_path).await;
        Ok(false)
      }
      Err(e) if is_unique_violation(&e) => {
        debug!(path = %alias_path, "alias already exists");
        Ok(false)
      }
      // The artifact was removed while the insert was pending.
      Err(e) if is_foreign_key_violation(&e) => {
        warn!(hash = short_hash(content_hash), "artifact removed before alias insert");
        Ok(false)
      }
      Err(e) => Err(e.into()),
    }
  }

  async fn list_aliases(&self, content_hash: &str) -> Result<Vec<String>, RegistryError> {
    let aliases =
      sqlx::query_scalar("SELECT alias_path FROM aliases WHERE content_hash = ? ORDER BY id ASC")
        .bind(content_hash)
        .fetch_all(&self.pool)
        .await?;

    Ok(aliases)
  }

  async fn list_all(&self) -> Result<Vec<ArtifactEntry>, RegistryError> {
    let records: Vec<ArtifactRecord> = sqlx::query_as(&format!(
      "SELECT {} FROM artifacts ORDER BY registered_at DESC, rowid DESC",
      ARTIFACT_COLUMNS
    ))
    .fetch_all(&self.pool)
    .await?;

    let mut entries = Vec::with_capacity(records.len());
    for record in records {
      let aliases = self.list_aliases(&record.content_hash).await?;
      entries.push(ArtifactEntry { record, aliases });
    }

    Ok(entries)
  }

  async fn remove_artifact(&self, content_hash: &str) -> Result<bool, RegistryError> {
    let mut tx = self.pool.begin().await?;

    sqlx::query("DELETE FROM aliases WHERE content_hash = ?")
      .bind(content_hash)
      .execute(&mut *tx)
      .await?;

    let removed = sqlx::query("DELETE FROM artifacts WHERE content_hash = ?")
      .bind(content_hash)
      .execute(&mut *tx)
      .await?
      .rows_affected();

    tx.commit().await?;

    if removed > 0 {
      info!(hash = short_hash(content_hash), "removed artifact from registry");
    }
    Ok(removed > 0)
  }

  async fn total_size(&self) -> Result<u64, RegistryError> {
    let total: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(size_bytes), 0) FROM artifacts")
      .fetch_one(&self.pool)
      .await?;

    Ok(u64::try_from(total).unwrap_or(0))
  }

  async fn stats(&self) -> Result<RegistryStats, RegistryError> {
    let artifact_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM artifacts")
      .fetch_one(&self.pool)
      .await?;
    let alias_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM aliases")
      .fetch_one(&self.pool)
      .await?;

    Ok(RegistryStats {
      artifact_count: u64::try_from(artifact_count).unwrap_or(0),
      alias_count: u64::try_from(alias_count).unwrap_or(0),
      total_bytes: self.total_size().await?,
    })
  }

  async fn begin_download(
    &self,
    content_hash: Option<&str>,
    url: &str,
    dest_path: &str,
  ) -> Result<i64, RegistryError> {
    let id = sqlx::query(
      r#"
            INSERT INTO download_queue (content_hash, url, dest_path, status, started_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
    )
    .bind(content_hash)
    .bind(clean_url(url))
    .bind(normalize(dest_path))
    .bind(DownloadStatus::Downloading)
    .bind(Utc::now())
    .execute(&self.pool)
    .await?
    .last_insert_rowid();

    Ok(id)
  }

  async fn finish_download(
    &self,
    id: i64,
    status: DownloadStatus,
    content_hash: Option<&str>,
    error: Option<&str>,
  ) -> Result<(), RegistryError> {
    sqlx::query(
      r#"
            UPDATE download_queue
            SET status = ?, content_hash = COALESCE(?, content_hash), completed_at = ?, error = ?
            WHERE id = ?
            "#,
    )
    .bind(status)
    .bind(content_hash)
    .bind(Utc::now())
    .bind(error)
    .bind(id)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn list_downloads(&self, limit: u32) -> Result<Vec<DownloadRecord>, RegistryError> {
    let records = sqlx::query_as(
      r#"
            SELECT id, content_hash, url, dest_path, status, started_at, completed_at, error
            FROM download_queue
            ORDER BY id DESC
            LIMIT ?
            "#,
    )
    .bind(limit)
    .fetch_all(&self.pool)
    .await?;

    Ok(records)
  }
}
