use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Sentinel extension that accepts every file.
pub const ANY_EXTENSION: &str = "any";

/// Extensions recognised as model weights by default.
pub const MODEL_EXTENSIONS: &[&str] = &[
  ".ckpt",
  ".pt",
  ".pt2",
  ".bin",
  ".pth",
  ".safetensors",
  ".pkl",
  ".sft",
];

/// A model category as written in the config file.
///
/// Root paths may be relative, in which case they are resolved against the
/// store's base directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDef {
  /// Root directories, in priority order.
  pub paths: Vec<PathBuf>,

  /// Allowed file extensions including the leading dot.
  /// Empty, or containing [`ANY_EXTENSION`], means every extension.
  #[serde(default)]
  pub extensions: Vec<String>,
}

impl CategoryDef {
  pub fn new(paths: Vec<PathBuf>, extensions: &[&str]) -> Self {
    Self {
      paths,
      extensions: extensions.iter().map(|e| e.to_string()).collect(),
    }
  }
}

/// A resolved category: canonical name, absolute roots and extension filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
  pub name: String,
  pub roots: Vec<PathBuf>,
  pub extensions: Vec<String>,
}

impl Category {
  /// Whether the extension filter is disabled for this category.
  pub fn accepts_any(&self) -> bool {
    self.extensions.iter().all(|e| e.is_empty())
      || self
        .extensions
        .iter()
        .any(|e| e.eq_ignore_ascii_case(ANY_EXTENSION))
  }

  /// Check a file name against the extension filter (case-insensitive).
  pub fn allows(&self, file_name: &str) -> bool {
    if self.accepts_any() {
      return true;
    }
    let lower = file_name.to_lowercase();
    self
      .extensions
      .iter()
      .filter(|e| !e.is_empty())
      .any(|e| lower.ends_with(&e.to_lowercase()))
  }

  /// Root directory for a caller-supplied index.
  ///
  /// Missing or out-of-range indices select the first root. Returns `None`
  /// only when the category has no roots at all.
  pub fn root(&self, index: Option<usize>) -> Option<(usize, &Path)> {
    let index = index.filter(|i| *i < self.roots.len()).unwrap_or(0);
    self.roots.get(index).map(|p| (index, p.as_path()))
  }

  /// Sorted, lowercased extension list for error messages.
  pub fn extension_list(&self) -> Vec<String> {
    let mut list: Vec<String> = self
      .extensions
      .iter()
      .filter(|e| !e.is_empty())
      .map(|e| e.to_lowercase())
      .collect();
    list.sort();
    list.dedup();
    list
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn category(extensions: &[&str]) -> Category {
    Category {
      name: "checkpoints".to_string(),
      roots: vec![PathBuf::from("/models/checkpoints"), PathBuf::from("/mnt/extra")],
      extensions: extensions.iter().map(|e| e.to_string()).collect(),
    }
  }

  #[test]
  fn test_allows_matching_extension_case_insensitive() {
    let c = category(&[".safetensors", ".ckpt"]);
    assert!(c.allows("Model.SafeTensors"));
    assert!(c.allows("sub/model.ckpt"));
    assert!(!c.allows("model.exe"));
  }

  #[test]
  fn test_empty_and_sentinel_accept_everything() {
    assert!(category(&[]).allows("anything.exe"));
    assert!(category(&["any"]).allows("anything.exe"));
    assert!(category(&[""]).allows("README"));
  }

  #[test]
  fn test_root_falls_back_to_first() {
    let c = category(&[]);
    assert_eq!(c.root(Some(1)).unwrap().0, 1);
    assert_eq!(c.root(Some(7)).unwrap().0, 0);
    assert_eq!(c.root(None).unwrap().1, Path::new("/models/checkpoints"));
  }

  #[test]
  fn test_extension_list_sorted() {
    let c = category(&[".safetensors", ".CKPT", ".ckpt"]);
    assert_eq!(c.extension_list(), vec![".ckpt", ".safetensors"]);
  }
}
