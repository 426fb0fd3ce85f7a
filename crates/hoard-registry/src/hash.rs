//! SHA-256 content hashing.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Read size used when hashing files.
pub const HASH_CHUNK_SIZE: usize = 1024 * 1024;

/// Incremental hasher that also counts the bytes it has seen.
#[derive(Clone, Default)]
pub struct ContentHasher {
  digest: Sha256,
  bytes: u64,
}

impl ContentHasher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn update(&mut self, chunk: &[u8]) {
    self.digest.update(chunk);
    self.bytes += chunk.len() as u64;
  }

  /// Bytes hashed so far.
  pub fn bytes(&self) -> u64 {
    self.bytes
  }

  /// Lowercase hex digest.
  pub fn finalize(self) -> String {
    hex::encode(self.digest.finalize())
  }
}

/// Hash a file in [`HASH_CHUNK_SIZE`] chunks. Blocks the calling thread.
pub fn hash_file_blocking(path: &Path) -> std::io::Result<String> {
  let mut file = File::open(path)?;
  let mut hasher = ContentHasher::new();
  let mut buf = vec![0u8; HASH_CHUNK_SIZE];

  loop {
    let n = file.read(&mut buf)?;
    if n == 0 {
      break;
    }
    hasher.update(&buf[..n]);
  }

  Ok(hasher.finalize())
}

/// Hash a file on the blocking thread pool.
pub async fn hash_file(path: impl Into<PathBuf>) -> std::io::Result<String> {
  let path = path.into();
  tokio::task::spawn_blocking(move || hash_file_blocking(&path))
    .await
    .map_err(std::io::Error::other)?
}

/// Compare a caller-supplied digest with a computed one.
/// Case and surrounding whitespace are ignored.
pub fn digests_match(expected: &str, computed: &str) -> bool {
  expected.trim().eq_ignore_ascii_case(computed.trim())
}

#[cfg(test)]
mod tests {
  use super::*;

  // sha256("hello world")
  const HELLO: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

  #[test]
  fn test_hasher_matches_known_digest() {
    let mut hasher = ContentHasher::new();
    hasher.update(b"hello ");
    hasher.update(b"world");
    assert_eq!(hasher.bytes(), 11);
    assert_eq!(hasher.finalize(), HELLO);
  }

  #[test]
  fn test_hash_file_spanning_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.bin");
    let data: Vec<u8> = (0..HASH_CHUNK_SIZE * 2 + 17).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, &data).unwrap();

    let mut expected = ContentHasher::new();
    expected.update(&data);

    assert_eq!(hash_file_blocking(&path).unwrap(), expected.finalize());
  }

  #[tokio::test]
  async fn test_hash_file_async() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hello.txt");
    std::fs::write(&path, b"hello world").unwrap();

    assert_eq!(hash_file(&path).await.unwrap(), HELLO);
  }

  #[tokio::test]
  async fn test_hash_missing_file() {
    let result = hash_file("/definitely/not/here.bin").await;
    assert_eq!(result.unwrap_err().kind(), std::io::ErrorKind::NotFound);
  }

  #[test]
  fn test_digests_match() {
    assert!(digests_match(&HELLO.to_uppercase(), HELLO));
    assert!(digests_match(&format!(" {} ", HELLO), HELLO));
    assert!(!digests_match("abc", HELLO));
  }
}
