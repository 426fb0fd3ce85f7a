//! Materializing aliases on disk.

use std::io::ErrorKind;
use std::path::Path;

use tokio::fs;
use tracing::{debug, warn};

use crate::staging::hidden_sibling;

/// How an alias was placed on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
  Hard,
  Symbolic,
}

async fn link_at(canonical: &Path, at: &Path) -> std::io::Result<LinkKind> {
  match fs::hard_link(canonical, at).await {
    Ok(()) => Ok(LinkKind::Hard),
    Err(e) => {
      debug!(error = %e, "hard link failed, falling back to symlink");
      symlink(canonical, at).await?;
      Ok(LinkKind::Symbolic)
    }
  }
}

#[cfg(unix)]
async fn symlink(canonical: &Path, at: &Path) -> std::io::Result<()> {
  fs::symlink(canonical, at).await
}

#[cfg(windows)]
async fn symlink(canonical: &Path, at: &Path) -> std::io::Result<()> {
  fs::symlink_file(canonical, at).await
}

/// Make `dest` point at `canonical` unless something already exists there.
///
/// Returns `None` when `dest` is already occupied (or is `canonical`
/// itself).
pub async fn link_if_absent(canonical: &Path, dest: &Path) -> std::io::Result<Option<LinkKind>> {
  if dest == canonical || fs::symlink_metadata(dest).await.is_ok() {
    return Ok(None);
  }

  if let Some(parent) = dest.parent() {
    fs::create_dir_all(parent).await?;
  }

  match link_at(canonical, dest).await {
    Ok(kind) => {
      debug!(dest = %dest.display(), ?kind, "linked alias");
      Ok(Some(kind))
    }
    // Another request placed it first.
    Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
    Err(e) => Err(e),
  }
}

/// Atomically replace `dest` with a link to `canonical`.
pub async fn replace_with_link(canonical: &Path, dest: &Path) -> std::io::Result<LinkKind> {
  let sibling = hidden_sibling(dest);
  let kind = link_at(canonical, &sibling).await?;

  if let Err(e) = fs::rename(&sibling, dest).await {
    if let Err(cleanup) = fs::remove_file(&sibling).await {
      warn!(path = %sibling.display(), error = %cleanup, "failed to remove link placeholder");
    }
    return Err(e);
  }

  Ok(kind)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_link_if_absent_creates_hard_link() {
    let dir = tempfile::tempdir().unwrap();
    let canonical = dir.path().join("a.ckpt");
    std::fs::write(&canonical, b"weights").unwrap();
    let dest = dir.path().join("nested").join("b.ckpt");

    let kind = link_if_absent(&canonical, &dest).await.unwrap();
    assert_eq!(kind, Some(LinkKind::Hard));
    assert_eq!(std::fs::read(&dest).unwrap(), b"weights");

    // Second call leaves the existing file alone.
    assert_eq!(link_if_absent(&canonical, &dest).await.unwrap(), None);
    assert_eq!(link_if_absent(&canonical, &canonical).await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_replace_with_link() {
    let dir = tempfile::tempdir().unwrap();
    let canonical = dir.path().join("a.ckpt");
    let dest = dir.path().join("b.ckpt");
    std::fs::write(&canonical, b"weights").unwrap();
    std::fs::write(&dest, b"weights").unwrap();

    replace_with_link(&canonical, &dest).await.unwrap();

    #[cfg(unix)]
    {
      use std::os::unix::fs::MetadataExt;
      let a = std::fs::metadata(&canonical).unwrap();
      let b = std::fs::metadata(&dest).unwrap();
      assert_eq!(a.ino(), b.ino());
    }

    let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(leftovers, 2);
  }
}
