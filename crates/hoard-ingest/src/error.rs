use hoard_config::short_hash;
use hoard_registry::RegistryError;
use thiserror::Error;

/// Errors that can occur while ingesting an artifact.
#[derive(Debug, Error)]
pub enum DownloadError {
  /// A required request field is missing or empty.
  #[error("missing required field '{field}'")]
  MissingField { field: String },

  /// The requested folder is not a known category.
  #[error("unknown folder '{0}'")]
  UnknownCategory(String),

  /// The filename escapes the category root or is otherwise unusable.
  #[error("invalid filename '{0}'")]
  InvalidFilename(String),

  /// The destination is already registered for different content.
  #[error("'{path}' already holds different content ({})", short_hash(.owner))]
  PathOccupied { path: String, owner: String },

  /// The URL is not on the source allow-list.
  #[error("downloads are not allowed from this source")]
  DisallowedSource,

  /// The filename does not carry an allowed extension.
  #[error("only {} downloads are allowed", .allowed.join(", "))]
  DisallowedExtension { allowed: Vec<String> },

  /// Connection or protocol failure.
  #[error("http error: {0}")]
  Http(reqwest::Error),

  /// Upstream answered with a non-success status.
  #[error("download failed with status {status}")]
  HttpStatus { status: u16 },

  /// Upstream rejected the supplied credentials (401/403).
  #[error("authentication failed with status {status}")]
  AuthenticationFailed { status: u16 },

  /// The transfer exceeded its overall time limit.
  #[error("download timed out after {timeout_secs}s")]
  Timeout { timeout_secs: u64 },

  /// The caller went away before the transfer finished.
  #[error("download cancelled")]
  Cancelled,

  /// Downloaded bytes do not match the expected digest. The message carries
  /// shortened digests; the fields hold them in full.
  #[error(
    "hash mismatch: expected {}, got {}",
    short_hash(.expected),
    short_hash(.actual)
  )]
  HashMismatch { expected: String, actual: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("registry error: {0}")]
  Registry(#[from] RegistryError),
}

/// Broad class of a [`DownloadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Rejected before any side effect.
  Validation,
  /// Network or upstream failure.
  Transfer,
  /// Content did not verify.
  Integrity,
  /// Local filesystem or registry failure.
  Internal,
}

impl From<reqwest::Error> for DownloadError {
  fn from(e: reqwest::Error) -> Self {
    // The URL may carry credentials in its query string.
    Self::Http(e.without_url())
  }
}

impl DownloadError {
  pub fn missing_field(field: impl Into<String>) -> Self {
    Self::MissingField {
      field: field.into(),
    }
  }

  /// Validation failures are reported before any side effect.
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::MissingField { .. }
      | Self::UnknownCategory(_)
      | Self::InvalidFilename(_)
      | Self::PathOccupied { .. }
      | Self::DisallowedSource
      | Self::DisallowedExtension { .. } => ErrorKind::Validation,
      Self::Http(_)
      | Self::HttpStatus { .. }
      | Self::AuthenticationFailed { .. }
      | Self::Timeout { .. }
      | Self::Cancelled => ErrorKind::Transfer,
      Self::HashMismatch { .. } => ErrorKind::Integrity,
      Self::Io(_) | Self::Registry(_) => ErrorKind::Internal,
    }
  }

  /// HTTP status a route layer should answer with.
  pub fn status_code(&self) -> u16 {
    match self {
      Self::AuthenticationFailed { status } => *status,
      Self::HttpStatus { .. } | Self::Http(_) => 502,
      Self::Timeout { .. } => 504,
      Self::HashMismatch { .. } => 422,
      Self::PathOccupied { .. } => 409,
      _ => match self.kind() {
        ErrorKind::Validation => 400,
        _ => 500,
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_codes() {
    assert_eq!(DownloadError::missing_field("url").status_code(), 400);
    assert_eq!(DownloadError::DisallowedSource.status_code(), 400);
    assert_eq!(
      DownloadError::AuthenticationFailed { status: 403 }.status_code(),
      403
    );
    assert_eq!(DownloadError::HttpStatus { status: 404 }.status_code(), 502);
    assert_eq!(DownloadError::Timeout { timeout_secs: 1 }.status_code(), 504);
    assert_eq!(DownloadError::Cancelled.status_code(), 500);
    assert_eq!(
      DownloadError::HashMismatch {
        expected: "a".into(),
        actual: "b".into()
      }
      .status_code(),
      422
    );
    assert_eq!(
      DownloadError::PathOccupied {
        path: "checkpoints/m.safetensors".into(),
        owner: "ab".into()
      }
      .status_code(),
      409
    );
  }

  #[test]
  fn test_hash_mismatch_message_is_shortened() {
    let expected = "a".repeat(64);
    let actual = "b".repeat(64);
    let err = DownloadError::HashMismatch {
      expected: expected.clone(),
      actual: actual.clone(),
    };
    let message = err.to_string();
    assert_eq!(
      message,
      format!("hash mismatch: expected {}, got {}", &expected[..16], &actual[..16])
    );
    assert!(!message.contains(&expected));
    assert_eq!(err.kind(), ErrorKind::Integrity);
  }

  #[test]
  fn test_extension_message_lists_allowed() {
    let err = DownloadError::DisallowedExtension {
      allowed: vec![".ckpt".into(), ".safetensors".into()],
    };
    assert_eq!(
      err.to_string(),
      "only .ckpt, .safetensors downloads are allowed"
    );
    assert_eq!(err.kind(), ErrorKind::Validation);
  }
}
