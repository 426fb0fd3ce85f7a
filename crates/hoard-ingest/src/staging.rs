//! Staged downloads and atomic publishing.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tracing::{debug, warn};
use uuid::Uuid;

/// An in-progress download in the staging area.
///
/// The file is removed when the guard is dropped, unless it was published or
/// explicitly discarded first. This covers error returns as well as the
/// future being dropped on cancellation or timeout.
#[derive(Debug)]
pub struct StagedFile {
  path: PathBuf,
  armed: bool,
}

impl StagedFile {
  /// Create a uniquely named file in `staging_dir`.
  pub async fn create(staging_dir: &Path) -> std::io::Result<(Self, File)> {
    fs::create_dir_all(staging_dir).await?;

    let path = staging_dir.join(format!("{}.part", Uuid::new_v4()));
    let file = File::create(&path).await?;

    debug!(path = %path.display(), "staging download");
    Ok((Self { path, armed: true }, file))
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Remove the staged file now.
  pub async fn discard(mut self) {
    self.armed = false;
    if let Err(e) = fs::remove_file(&self.path).await
      && e.kind() != ErrorKind::NotFound
    {
      warn!(path = %self.path.display(), error = %e, "failed to remove staged file");
    }
  }

  /// Move the staged file to `dest`, replacing whatever is there.
  ///
  /// A plain rename when both paths share a filesystem. Otherwise the bytes
  /// are copied to a hidden sibling of `dest` first and renamed from there,
  /// so `dest` never holds a partial file.
  pub async fn publish(mut self, dest: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
      fs::create_dir_all(parent).await?;
    }

    match fs::rename(&self.path, dest).await {
      Ok(()) => {
        self.armed = false;
        Ok(())
      }
      Err(e) if e.kind() == ErrorKind::CrossesDevices => {
        debug!(dest = %dest.display(), "staging is on another filesystem, copying");
        let sibling = hidden_sibling(dest);
        let copied = async {
          fs::copy(&self.path, &sibling).await?;
          fs::rename(&sibling, dest).await
        }
        .await;

        if copied.is_err() {
          let _ = fs::remove_file(&sibling).await;
        }
        copied?;

        self.discard().await;
        Ok(())
      }
      Err(e) => Err(e),
    }
  }
}

impl Drop for StagedFile {
  fn drop(&mut self) {
    if self.armed
      && let Err(e) = std::fs::remove_file(&self.path)
      && e.kind() != ErrorKind::NotFound
    {
      warn!(path = %self.path.display(), error = %e, "failed to remove staged file");
    }
  }
}

/// `dir/.name.<uuid>.part` next to `path`.
pub(crate) fn hidden_sibling(path: &Path) -> PathBuf {
  let name = path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();
  path.with_file_name(format!(".{}.{}.part", name, Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
  use tokio::io::AsyncWriteExt;

  use super::*;

  #[tokio::test]
  async fn test_drop_removes_staged_file() {
    let dir = tempfile::tempdir().unwrap();
    let (staged, mut file) = StagedFile::create(dir.path()).await.unwrap();
    file.write_all(b"partial").await.unwrap();
    let path = staged.path().to_path_buf();
    assert!(path.exists());

    drop(file);
    drop(staged);
    assert!(!path.exists());
  }

  #[tokio::test]
  async fn test_publish_moves_into_place() {
    let dir = tempfile::tempdir().unwrap();
    let (staged, mut file) = StagedFile::create(&dir.path().join("staging")).await.unwrap();
    file.write_all(b"model").await.unwrap();
    file.flush().await.unwrap();
    drop(file);

    let staged_path = staged.path().to_path_buf();
    let dest = dir.path().join("checkpoints").join("sub").join("m.ckpt");
    staged.publish(&dest).await.unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), b"model");
    assert!(!staged_path.exists());
  }

  #[test]
  fn test_hidden_sibling() {
    let sibling = hidden_sibling(Path::new("/a/b/m.ckpt"));
    assert_eq!(sibling.parent(), Some(Path::new("/a/b")));
    let name = sibling.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with(".m.ckpt."));
    assert!(name.ends_with(".part"));
  }
}
