//! Partition a workflow's model requirements into what is already stored
//! and what still has to be fetched.

use std::collections::BTreeMap;

use hoard_config::{StoreConfig, normalize};
use hoard_registry::{Registry, RegistryError};
use serde::{Deserialize, Serialize};

/// `{ "dependencies": { category: [requirement, ...] } }`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DependencyRequest {
  #[serde(default)]
  pub dependencies: BTreeMap<String, Vec<Requirement>>,
}

/// One model a workflow needs.
#[derive(Debug, Clone, Deserialize)]
pub struct Requirement {
  pub filename: String,
  pub sha256: String,
  #[serde(default)]
  pub size: Option<u64>,
  #[serde(default)]
  pub urls: Vec<String>,
  #[serde(default)]
  pub requires_auth: bool,
  #[serde(default)]
  pub auth_provider: Option<String>,
  #[serde(default)]
  pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExistingDependency {
  pub folder: String,
  pub filename: String,
  pub sha256: String,
  pub size_bytes: u64,

  /// Where the content is stored.
  pub canonical_path: String,

  /// The requested path is neither the canonical path nor a known alias, so
  /// a link has to be created there.
  pub needs_link: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingDependency {
  pub folder: String,
  pub filename: String,
  pub sha256: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub size: Option<u64>,
  pub urls: Vec<String>,
  pub requires_auth: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub auth_provider: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyReport {
  pub existing: Vec<ExistingDependency>,
  pub missing: Vec<MissingDependency>,
  pub total_download_size: u64,
  pub total_saved_size: u64,
}

/// Registry key the requirement would be stored under.
fn requested_key(config: &StoreConfig, folder: &str, filename: &str) -> String {
  let filename = normalize(filename.trim_start_matches(['/', '\\']));
  match config.category(folder).as_ref().and_then(|c| c.root(None)) {
    Some((_, root)) => config.registry_key(&root.join(&filename)),
    None => normalize(&format!("{}/{}", folder, filename)),
  }
}

/// Check every requirement against the registry. Reads only.
pub async fn check_dependencies(
  registry: &dyn Registry,
  config: &StoreConfig,
  request: &DependencyRequest,
) -> Result<DependencyReport, RegistryError> {
  let mut report = DependencyReport::default();

  for (folder, requirements) in &request.dependencies {
    let folder = config.canonical_category_name(folder);

    for requirement in requirements {
      let sha256 = requirement.sha256.trim().to_ascii_lowercase();

      match registry.find_by_hash(&sha256).await? {
        Some(record) => {
          let key = requested_key(config, folder, &requirement.filename);
          let needs_link = record.canonical_path != key
            && !registry
              .list_aliases(&record.content_hash)
              .await?
              .contains(&key);

          report.total_saved_size += record.size();
          report.existing.push(ExistingDependency {
            folder: folder.to_string(),
            filename: requirement.filename.clone(),
            sha256,
            size_bytes: record.size(),
            canonical_path: record.canonical_path,
            needs_link,
          });
        }
        None => {
          report.total_download_size += requirement.size.unwrap_or(0);
          report.missing.push(MissingDependency {
            folder: folder.to_string(),
            filename: requirement.filename.clone(),
            sha256,
            size: requirement.size,
            urls: requirement.urls.clone(),
            requires_auth: requirement.requires_auth,
            auth_provider: requirement.auth_provider.clone(),
            display_name: requirement.display_name.clone(),
          });
        }
      }
    }
  }

  Ok(report)
}
