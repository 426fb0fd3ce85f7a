use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::category::{Category, CategoryDef, MODEL_EXTENSIONS};
use crate::error::ConfigError;
use crate::path::normalize;

/// Categories that hold support files rather than model weights.
/// They are hidden from the folder overview and skipped by default migrations.
pub const INTERNAL_CATEGORIES: &[&str] = &["configs", "custom_nodes"];

/// Top-level settings for a hoard store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// Storage root. Registry paths are recorded relative to this directory.
  pub base_dir: PathBuf,

  /// SQLite registry file. Defaults to `<base_dir>/.registry/models.db`.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub registry_path: Option<PathBuf>,

  /// Scratch area for in-flight downloads. Defaults to
  /// `<base_dir>/.registry/staging`; keep it on the same filesystem as the
  /// category roots so publishing is a plain rename.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub staging_dir: Option<PathBuf>,

  /// Include dot-prefixed files and directories in listings.
  pub include_hidden: bool,

  /// Directory names never descended into by listings.
  pub excluded_dirs: Vec<String>,

  /// Network download policy.
  pub download: DownloadPolicy,

  /// Known model categories by name.
  pub categories: BTreeMap<String, CategoryDef>,

  /// Old category names mapped to their current name.
  pub legacy_names: BTreeMap<String, String>,
}

/// Rules applied to download requests before any network access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadPolicy {
  /// Overall timeout for a single fetch, in seconds.
  pub timeout_secs: u64,

  /// URL prefixes downloads may come from. Empty allows every source.
  pub allowed_sources: Vec<String>,

  /// Exact URLs exempt from the source and extension checks.
  pub trusted_urls: Vec<String>,
}

impl Default for DownloadPolicy {
  fn default() -> Self {
    Self {
      timeout_secs: 60 * 60,
      allowed_sources: vec![
        "https://civitai.com/".to_string(),
        "https://huggingface.co/".to_string(),
        "http://localhost:".to_string(),
      ],
      trusted_urls: vec![
        "https://huggingface.co/stabilityai/stable-zero123/resolve/main/stable_zero123.ckpt"
          .to_string(),
        "https://huggingface.co/TencentARC/T2I-Adapter/resolve/main/models/t2iadapter_depth_sd14v1.pth?download=true".to_string(),
        "https://github.com/xinntao/Real-ESRGAN/releases/download/v0.1.0/RealESRGAN_x4plus.pth"
          .to_string(),
      ],
    }
  }
}

impl DownloadPolicy {
  /// Exact match against the trusted URL list.
  pub fn is_trusted(&self, url: &str) -> bool {
    self.trusted_urls.iter().any(|u| u == url)
  }

  /// Whether the URL passes the source allow-list.
  pub fn source_allowed(&self, url: &str) -> bool {
    self.allowed_sources.is_empty()
      || self.is_trusted(url)
      || self.allowed_sources.iter().any(|s| url.starts_with(s.as_str()))
  }
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self::with_defaults(PathBuf::from("models"))
  }
}

impl StoreConfig {
  /// Default configuration with the conventional model folder layout under
  /// `base_dir`.
  pub fn with_defaults(base_dir: impl Into<PathBuf>) -> Self {
    let mut categories = BTreeMap::new();
    for name in [
      "checkpoints",
      "loras",
      "vae",
      "controlnet",
      "upscale_models",
      "text_encoders",
      "diffusion_models",
      "clip_vision",
      "embeddings",
      "hypernetworks",
    ] {
      categories.insert(
        name.to_string(),
        CategoryDef::new(vec![PathBuf::from(name)], MODEL_EXTENSIONS),
      );
    }
    categories.insert(
      "configs".to_string(),
      CategoryDef::new(vec![PathBuf::from("configs")], &[".yaml"]),
    );
    categories.insert(
      "custom_nodes".to_string(),
      CategoryDef::new(vec![PathBuf::from("custom_nodes")], &[]),
    );

    let legacy_names = BTreeMap::from([
      ("clip".to_string(), "text_encoders".to_string()),
      ("unet".to_string(), "diffusion_models".to_string()),
    ]);

    Self {
      base_dir: base_dir.into(),
      registry_path: None,
      staging_dir: None,
      include_hidden: false,
      excluded_dirs: vec![".git".to_string()],
      download: DownloadPolicy::default(),
      categories,
      legacy_names,
    }
  }

  /// Load a config file. Missing fields take their default values.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    debug!(path = %path.display(), "loading store config");

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;

    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Location of the registry database.
  pub fn registry_db_path(&self) -> PathBuf {
    match &self.registry_path {
      Some(p) => self.base_dir.join(p),
      None => self.base_dir.join(".registry").join("models.db"),
    }
  }

  /// Location of the download scratch area.
  pub fn staging_path(&self) -> PathBuf {
    match &self.staging_dir {
      Some(p) => self.base_dir.join(p),
      None => self.base_dir.join(".registry").join("staging"),
    }
  }

  /// Map a legacy category name to its current one.
  pub fn canonical_category_name<'a>(&'a self, name: &'a str) -> &'a str {
    self
      .legacy_names
      .get(name)
      .map(String::as_str)
      .unwrap_or(name)
  }

  /// Resolve a category by (possibly legacy) name.
  pub fn category(&self, name: &str) -> Option<Category> {
    let name = self.canonical_category_name(name);
    self.categories.get(name).map(|def| Category {
      name: name.to_string(),
      roots: def.paths.iter().map(|p| self.base_dir.join(p)).collect(),
      extensions: def.extensions.clone(),
    })
  }

  /// Category names excluding [`INTERNAL_CATEGORIES`].
  pub fn model_category_names(&self) -> Vec<String> {
    self
      .categories
      .keys()
      .filter(|name| !INTERNAL_CATEGORIES.contains(&name.as_str()))
      .cloned()
      .collect()
  }

  /// Registry key for a filesystem path.
  ///
  /// Paths under `base_dir` are recorded relative to it; anything else is
  /// recorded as a normalized absolute path.
  pub fn registry_key(&self, path: &Path) -> String {
    let rel = path.strip_prefix(&self.base_dir).unwrap_or(path);
    normalize(&rel.to_string_lossy())
  }

  /// Filesystem path for a registry key.
  pub fn resolve_key(&self, key: &str) -> PathBuf {
    self.base_dir.join(key)
  }
}
