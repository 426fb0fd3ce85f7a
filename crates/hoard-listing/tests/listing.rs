use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use hoard_config::{CategoryDef, StoreConfig};
use hoard_listing::{FileEntry, ListingError, ModelLister};

fn lister(base: &Path) -> ModelLister {
  ModelLister::new(Arc::new(StoreConfig::with_defaults(base)))
}

fn names(files: &[FileEntry]) -> Vec<String> {
  let mut names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
  names.sort();
  names
}

/// Move a directory's mtime forward so the change is visible even on
/// filesystems with coarse timestamps.
fn bump_mtime(dir: &Path) {
  let later = SystemTime::now() + Duration::from_secs(10);
  filetime::set_file_mtime(dir, FileTime::from_system_time(later)).unwrap();
}

#[test]
fn test_listing_is_stable_without_changes() {
  let dir = tempfile::tempdir().unwrap();
  let root = dir.path().join("checkpoints");
  fs::create_dir_all(&root).unwrap();
  fs::write(root.join("a.safetensors"), b"a").unwrap();

  let lister = lister(dir.path());
  let first = lister.list("checkpoints").unwrap();
  let second = lister.list("checkpoints").unwrap();

  assert_eq!(first, second);
  assert_eq!(names(&first), vec!["a.safetensors"]);
  assert_eq!(lister.cache().len(), 1);
}

#[test]
fn test_listing_refreshes_after_file_added() {
  let dir = tempfile::tempdir().unwrap();
  let root = dir.path().join("loras");
  fs::create_dir_all(&root).unwrap();
  fs::write(root.join("a.safetensors"), b"a").unwrap();

  let lister = lister(dir.path());
  assert_eq!(names(&lister.list("loras").unwrap()), vec!["a.safetensors"]);

  fs::write(root.join("b.safetensors"), b"b").unwrap();
  bump_mtime(&root);

  assert_eq!(
    names(&lister.list("loras").unwrap()),
    vec!["a.safetensors", "b.safetensors"]
  );
}

#[test]
fn test_listing_refreshes_after_nested_change() {
  let dir = tempfile::tempdir().unwrap();
  let root = dir.path().join("vae");
  let nested = root.join("sdxl").join("fixed");
  fs::create_dir_all(&nested).unwrap();
  fs::write(nested.join("a.safetensors"), b"a").unwrap();

  let lister = lister(dir.path());
  assert_eq!(
    names(&lister.list("vae").unwrap()),
    vec!["sdxl/fixed/a.safetensors"]
  );

  // Only the deepest directory changes; the root mtime stays the same.
  fs::remove_file(nested.join("a.safetensors")).unwrap();
  bump_mtime(&nested);

  assert!(lister.list("vae").unwrap().is_empty());
}

#[test]
fn test_listing_misses_in_place_rewrite() {
  let dir = tempfile::tempdir().unwrap();
  let root = dir.path().join("checkpoints");
  fs::create_dir_all(&root).unwrap();
  let file = root.join("a.safetensors");
  fs::write(&file, b"a").unwrap();

  let lister = lister(dir.path());
  let before = lister.list("checkpoints").unwrap();

  // Rewriting a file does not touch any directory mtime, so the cached
  // descriptor (old size) is still served.
  let root_mtime = FileTime::from_last_modification_time(&fs::metadata(&root).unwrap());
  fs::write(&file, b"much longer content").unwrap();
  filetime::set_file_mtime(&root, root_mtime).unwrap();

  let after = lister.list("checkpoints").unwrap();
  assert_eq!(before, after);
  assert_eq!(after[0].size, 1);

  lister.cache().clear();
  let rescanned = lister.list("checkpoints").unwrap();
  assert_eq!(rescanned[0].size, 19);
}

#[test]
fn test_unknown_category() {
  let dir = tempfile::tempdir().unwrap();
  let lister = lister(dir.path());

  let err = lister.list("nope").unwrap_err();
  assert!(matches!(err, ListingError::UnknownCategory(name) if name == "nope"));
}

#[test]
fn test_missing_root_lists_empty() {
  let dir = tempfile::tempdir().unwrap();
  let lister = lister(dir.path());

  assert!(lister.list("embeddings").unwrap().is_empty());
  assert!(lister.cache().is_empty());
}

#[test]
fn test_legacy_name_lists_current_category() {
  let dir = tempfile::tempdir().unwrap();
  let root = dir.path().join("text_encoders");
  fs::create_dir_all(&root).unwrap();
  fs::write(root.join("t5.safetensors"), b"t5").unwrap();

  let lister = lister(dir.path());
  assert_eq!(names(&lister.list("clip").unwrap()), vec!["t5.safetensors"]);
}

#[test]
fn test_multiple_roots_carry_path_index() {
  let dir = tempfile::tempdir().unwrap();
  let first = dir.path().join("checkpoints");
  let second = dir.path().join("extra").join("checkpoints");
  fs::create_dir_all(&first).unwrap();
  fs::create_dir_all(&second).unwrap();
  fs::write(first.join("a.ckpt"), b"a").unwrap();
  fs::write(second.join("b.ckpt"), b"b").unwrap();

  let mut config = StoreConfig::with_defaults(dir.path());
  config.categories.insert(
    "checkpoints".to_string(),
    CategoryDef::new(
      vec![PathBuf::from("checkpoints"), second.clone()],
      &[".ckpt"],
    ),
  );
  let lister = ModelLister::new(Arc::new(config));

  let files = lister.list("checkpoints").unwrap();
  let a = files.iter().find(|f| f.name == "a.ckpt").unwrap();
  let b = files.iter().find(|f| f.name == "b.ckpt").unwrap();
  assert_eq!(a.path_index, 0);
  assert_eq!(b.path_index, 1);
  assert_eq!(lister.cache().len(), 2);
}

#[test]
fn test_file_entry_serializes_camel_case() {
  let entry = FileEntry {
    name: "a.safetensors".to_string(),
    path_index: 1,
    modified: 10.5,
    created: 9.0,
    size: 3,
  };

  let json = serde_json::to_value(&entry).unwrap();
  assert_eq!(json["pathIndex"], 1);
  assert_eq!(json["name"], "a.safetensors");
  assert_eq!(json["size"], 3);
}

#[test]
fn test_folders_hide_internal_categories() {
  let dir = tempfile::tempdir().unwrap();
  let lister = lister(dir.path());

  let folders = lister.folders();
  assert!(folders.iter().all(|f| f.name != "configs" && f.name != "custom_nodes"));

  let loras = folders.iter().find(|f| f.name == "loras").unwrap();
  assert_eq!(loras.folders, vec![dir.path().join("loras")]);
}
