use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use hoard_config::StoreConfig;
use hoard_migrate::{MigrationError, Migrator};
use hoard_registry::{
  ArtifactEntry, ArtifactMetadata, ArtifactRecord, DownloadRecord, DownloadStatus, PathMatch,
  Registry, RegistryError, RegistryStats, SqliteRegistry,
};

struct Store {
  _dir: tempfile::TempDir,
  config: Arc<StoreConfig>,
  registry: SqliteRegistry,
}

impl Store {
  async fn new() -> Self {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let config = Arc::new(StoreConfig::with_defaults(dir.path()));
    let registry = SqliteRegistry::open(config.registry_db_path())
      .await
      .expect("failed to open registry");
    Self {
      _dir: dir,
      config,
      registry,
    }
  }

  fn write(&self, relative: &str, data: &[u8]) {
    let path = self.config.base_dir.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
  }

  fn path(&self, relative: &str) -> std::path::PathBuf {
    self.config.base_dir.join(relative)
  }

  fn migrator(&self) -> Migrator {
    Migrator::new(Arc::new(self.registry.clone()), self.config.clone())
  }
}

fn folders(names: &[&str]) -> Vec<String> {
  names.iter().map(|n| n.to_string()).collect()
}

#[tokio::test]
async fn test_registers_existing_files() {
  let store = Store::new().await;
  store.write("checkpoints/sd15.safetensors", b"sd15 weights");
  store.write("checkpoints/sub/xl.ckpt", b"xl weights");
  store.write("checkpoints/readme.txt", b"not a model");
  store.write("checkpoints/.cache/tmp.safetensors", b"hidden");

  let stats = store.migrator().run(&folders(&["checkpoints"])).await.unwrap();

  assert_eq!(stats.total_files, 2);
  assert_eq!(stats.newly_registered, 2);
  assert_eq!(stats.errors, 0);
  assert_eq!(stats.total_size, 22);

  let record = store
    .registry
    .find_by_path("checkpoints/sub/xl.ckpt")
    .await
    .unwrap()
    .unwrap()
    .record;
  assert!(record.metadata.migrated);
  assert_eq!(record.metadata.filename.as_deref(), Some("xl.ckpt"));
  assert_eq!(record.metadata.folder.as_deref(), Some("checkpoints"));
  assert!(record.source_url.is_none());
}

#[tokio::test]
async fn test_duplicates_become_aliases() {
  let store = Store::new().await;
  store.write("checkpoints/a.safetensors", b"identical");
  store.write("loras/b.safetensors", b"identical");

  let stats = store.migrator().run(&folders(&["checkpoints", "loras"])).await.unwrap();
  assert_eq!(stats.newly_registered, 1);
  assert_eq!(stats.aliased, 1);

  let registry_stats = store.registry.stats().await.unwrap();
  assert_eq!(registry_stats.artifact_count, 1);
  assert_eq!(registry_stats.alias_count, 1);

  let a = store.registry.find_by_path("checkpoints/a.safetensors").await.unwrap().unwrap();
  let b = store.registry.find_by_path("loras/b.safetensors").await.unwrap().unwrap();
  assert_eq!(a.record.content_hash, b.record.content_hash);
  assert!(b.via_alias);
}

#[tokio::test]
async fn test_rerun_finds_everything_registered() {
  let store = Store::new().await;
  store.write("vae/a.safetensors", b"a");
  store.write("vae/b.safetensors", b"b");

  store.migrator().run(&folders(&["vae"])).await.unwrap();
  let again = store.migrator().run(&folders(&["vae"])).await.unwrap();

  assert_eq!(again.total_files, 2);
  assert_eq!(again.already_registered, 2);
  assert_eq!(again.newly_registered, 0);
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
  let store = Store::new().await;
  store.write("embeddings/e.pt", b"embedding");

  let stats = store
    .migrator()
    .dry_run(true)
    .run(&folders(&["embeddings"]))
    .await
    .unwrap();

  assert_eq!(stats.newly_registered, 1);
  assert_eq!(store.registry.stats().await.unwrap().artifact_count, 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_links_are_skipped() {
  let store = Store::new().await;
  store.write("checkpoints/real.safetensors", b"real");
  store.write("checkpoints/hard-src.safetensors", b"hard");
  fs::hard_link(
    store.path("checkpoints/hard-src.safetensors"),
    store.path("checkpoints/hard-dst.safetensors"),
  )
  .unwrap();
  std::os::unix::fs::symlink(
    store.path("checkpoints/real.safetensors"),
    store.path("checkpoints/sym.safetensors"),
  )
  .unwrap();

  let stats = store.migrator().run(&folders(&["checkpoints"])).await.unwrap();

  assert_eq!(stats.total_files, 1);
  assert_eq!(stats.newly_registered, 1);
  assert!(
    store
      .registry
      .find_by_path("checkpoints/real.safetensors")
      .await
      .unwrap()
      .is_some()
  );
  assert!(
    store
      .registry
      .find_by_path("checkpoints/sym.safetensors")
      .await
      .unwrap()
      .is_none()
  );
}

#[tokio::test]
async fn test_default_run_covers_model_folders_only() {
  let store = Store::new().await;
  store.write("diffusion_models/flux.safetensors", b"flux");
  store.write("configs/v1.yaml", b"model: {}");

  let stats = store.migrator().run(&[]).await.unwrap();
  assert_eq!(stats.newly_registered, 1);
  assert!(
    store
      .registry
      .find_by_path("configs/v1.yaml")
      .await
      .unwrap()
      .is_none()
  );
}

#[tokio::test]
async fn test_legacy_and_unknown_folders() {
  let store = Store::new().await;
  store.write("diffusion_models/flux.safetensors", b"flux");

  let stats = store.migrator().run(&folders(&["unet"])).await.unwrap();
  assert_eq!(stats.newly_registered, 1);

  let err = store.migrator().run(&folders(&["nope"])).await.unwrap_err();
  assert!(matches!(err, MigrationError::UnknownCategory(name) if name == "nope"));
}

#[tokio::test]
async fn test_missing_roots_are_empty() {
  let store = Store::new().await;
  assert!(!Path::new(&store.path("hypernetworks")).exists());

  let stats = store.migrator().run(&folders(&["hypernetworks"])).await.unwrap();
  assert_eq!(stats.total_files, 0);
}

/// Registry that turns every alias request down, as it does when another
/// artifact claims the path first.
struct RefusingAliases(SqliteRegistry);

#[async_trait]
impl Registry for RefusingAliases {
  async fn find_by_hash(&self, content_hash: &str) -> Result<Option<ArtifactRecord>, RegistryError> {
    self.0.find_by_hash(content_hash).await
  }

  async fn find_by_path(&self, path: &str) -> Result<Option<PathMatch>, RegistryError> {
    self.0.find_by_path(path).await
  }

  async fn add_artifact(
    &self,
    content_hash: &str,
    path: &str,
    size_bytes: u64,
    source_url: Option<&str>,
    metadata: &ArtifactMetadata,
  ) -> Result<bool, RegistryError> {
    self
      .0
      .add_artifact(content_hash, path, size_bytes, source_url, metadata)
      .await
  }

  async fn add_alias(&self, _content_hash: &str, _alias_path: &str) -> Result<bool, RegistryError> {
    Ok(false)
  }

  async fn list_aliases(&self, content_hash: &str) -> Result<Vec<String>, RegistryError> {
    self.0.list_aliases(content_hash).await
  }

  async fn list_all(&self) -> Result<Vec<ArtifactEntry>, RegistryError> {
    self.0.list_all().await
  }

  async fn remove_artifact(&self, content_hash: &str) -> Result<bool, RegistryError> {
    self.0.remove_artifact(content_hash).await
  }

  async fn total_size(&self) -> Result<u64, RegistryError> {
    self.0.total_size().await
  }

  async fn stats(&self) -> Result<RegistryStats, RegistryError> {
    self.0.stats().await
  }

  async fn begin_download(
    &self,
    content_hash: Option<&str>,
    url: &str,
    dest_path: &str,
  ) -> Result<i64, RegistryError> {
    self.0.begin_download(content_hash, url, dest_path).await
  }

  async fn finish_download(
    &self,
    id: i64,
    status: DownloadStatus,
    content_hash: Option<&str>,
    error: Option<&str>,
  ) -> Result<(), RegistryError> {
    self.0.finish_download(id, status, content_hash, error).await
  }

  async fn list_downloads(&self, limit: u32) -> Result<Vec<DownloadRecord>, RegistryError> {
    self.0.list_downloads(limit).await
  }
}

#[tokio::test]
async fn test_refused_alias_counts_as_error() {
  let store = Store::new().await;
  store.write("checkpoints/a.safetensors", b"same bytes");
  store.write("loras/b.safetensors", b"same bytes");

  let registry = Arc::new(RefusingAliases(store.registry.clone()));
  let stats = Migrator::new(registry, store.config.clone())
    .run(&folders(&["checkpoints", "loras"]))
    .await
    .unwrap();

  assert_eq!(stats.total_files, 2);
  assert_eq!(stats.newly_registered, 1);
  assert_eq!(stats.aliased, 0);
  assert_eq!(stats.errors, 1);
  assert!(
    store
      .registry
      .find_by_path("loras/b.safetensors")
      .await
      .unwrap()
      .is_none()
  );
}
