use std::fmt;

use serde::Deserialize;

use crate::DownloadError;

/// Upstream credential supplied with a single request.
///
/// Only ever sent as a request header. It cannot be serialized and its
/// `Debug` output is redacted, so it does not end up in logs or storage.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct SecretToken(String);

impl SecretToken {
  pub fn new(token: impl Into<String>) -> Self {
    Self(token.into())
  }

  pub(crate) fn expose(&self) -> &str {
    &self.0
  }
}

impl fmt::Debug for SecretToken {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("SecretToken(***)")
  }
}

/// A request to materialize an artifact under a category.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadRequest {
  #[serde(default)]
  pub url: String,

  #[serde(default)]
  pub folder: String,

  /// Target name inside the category root. Defaults to the last segment of
  /// the URL path.
  #[serde(default)]
  pub filename: Option<String>,

  /// Expected SHA-256 of the content, hex encoded.
  #[serde(default)]
  pub sha256: Option<String>,

  #[serde(default)]
  pub display_name: Option<String>,

  #[serde(default)]
  pub path_index: Option<usize>,

  #[serde(default, alias = "huggingface_token", alias = "auth_token")]
  pub token: Option<SecretToken>,
}

impl DownloadRequest {
  pub fn new(url: impl Into<String>, folder: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      folder: folder.into(),
      ..Default::default()
    }
  }

  pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
    self.filename = Some(filename.into());
    self
  }

  pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
    self.sha256 = Some(sha256.into());
    self
  }

  pub fn with_token(mut self, token: SecretToken) -> Self {
    self.token = Some(token);
    self
  }

  /// Expected digest, lowercased, if one was supplied.
  pub fn expected_hash(&self) -> Option<String> {
    self
      .sha256
      .as_deref()
      .map(str::trim)
      .filter(|h| !h.is_empty())
      .map(str::to_ascii_lowercase)
  }

  pub(crate) fn check_required(&self) -> Result<(), DownloadError> {
    if self.url.trim().is_empty() {
      return Err(DownloadError::missing_field("url"));
    }
    if self.folder.trim().is_empty() {
      return Err(DownloadError::missing_field("folder"));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_deserialize_with_token_alias() {
    let request: DownloadRequest = serde_json::from_value(serde_json::json!({
      "url": "https://huggingface.co/x/model.safetensors",
      "folder": "checkpoints",
      "sha256": " ABCDEF ",
      "huggingface_token": "hf_secret",
    }))
    .unwrap();

    assert_eq!(request.expected_hash().as_deref(), Some("abcdef"));
    assert_eq!(request.token.as_ref().map(SecretToken::expose), Some("hf_secret"));

    let debug = format!("{:?}", request);
    assert!(!debug.contains("hf_secret"));
  }

  #[test]
  fn test_required_fields() {
    let err = DownloadRequest::new("", "checkpoints").check_required().unwrap_err();
    assert!(matches!(err, DownloadError::MissingField { field } if field == "url"));

    let err = DownloadRequest::new("https://x", " ").check_required().unwrap_err();
    assert!(matches!(err, DownloadError::MissingField { field } if field == "folder"));
  }
}
