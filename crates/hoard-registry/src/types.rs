use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

/// Descriptive metadata attached to an artifact.
///
/// Well-known fields are typed; anything else a caller attaches lands in
/// `extra` and round-trips untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub display_name: Option<String>,

  /// File name the artifact was first stored under.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub filename: Option<String>,

  /// Category the artifact was first stored in.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub folder: Option<String>,

  /// Set for records backfilled from files that predate the registry.
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub migrated: bool,

  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub tags: Vec<String>,

  #[serde(flatten)]
  pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A canonical artifact as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ArtifactRecord {
  pub content_hash: String,
  pub canonical_path: String,
  pub size_bytes: i64,
  pub source_url: Option<String>,
  pub metadata: Json<ArtifactMetadata>,
  pub registered_at: DateTime<Utc>,
}

impl ArtifactRecord {
  pub fn size(&self) -> u64 {
    u64::try_from(self.size_bytes).unwrap_or(0)
  }
}

/// An artifact together with its aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEntry {
  #[serde(flatten)]
  pub record: ArtifactRecord,
  pub aliases: Vec<String>,
}

/// Result of a lookup by path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathMatch {
  #[serde(flatten)]
  pub record: ArtifactRecord,

  /// The path matched an alias rather than the canonical path.
  pub via_alias: bool,
}

/// Registry totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
  pub artifact_count: u64,
  pub alias_count: u64,
  pub total_bytes: u64,
}

impl RegistryStats {
  /// Total size in GiB, rounded to two decimals.
  pub fn total_gib(&self) -> f64 {
    let gib = self.total_bytes as f64 / (1024.0 * 1024.0 * 1024.0);
    (gib * 100.0).round() / 100.0
  }
}

/// Status of a download audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DownloadStatus {
  Downloading,
  Completed,
  Deduplicated,
  Failed,
}

/// A download attempt as stored in the audit table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DownloadRecord {
  pub id: i64,
  pub content_hash: Option<String>,
  pub url: String,
  pub dest_path: String,
  pub status: DownloadStatus,
  pub started_at: DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
  pub error: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_metadata_keeps_unknown_fields() {
    let json = serde_json::json!({
      "display_name": "SD 1.5",
      "folder": "checkpoints",
      "tags": ["base"],
      "civitai_id": 4384
    });

    let metadata: ArtifactMetadata = serde_json::from_value(json.clone()).unwrap();
    assert_eq!(metadata.display_name.as_deref(), Some("SD 1.5"));
    assert!(!metadata.migrated);
    assert_eq!(metadata.extra["civitai_id"], 4384);
    assert_eq!(serde_json::to_value(&metadata).unwrap(), json);
  }

  #[test]
  fn test_total_gib_rounds() {
    let stats = RegistryStats {
      artifact_count: 1,
      alias_count: 0,
      total_bytes: 6_938_078_334,
    };
    assert_eq!(stats.total_gib(), 6.46);
  }
}
