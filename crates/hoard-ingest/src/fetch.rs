use hoard_registry::ContentHasher;
use reqwest::{Client, StatusCode};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::events::{ProgressNotifier, ProgressThrottle};
use crate::{DownloadError, SecretToken};

/// Bytes written and their digest.
#[derive(Debug)]
pub(crate) struct Fetched {
  pub sha256: String,
  pub bytes: u64,
}

fn transfer_error(e: reqwest::Error, timeout_secs: u64) -> DownloadError {
  if e.is_timeout() {
    DownloadError::Timeout { timeout_secs }
  } else {
    e.into()
  }
}

/// Stream `url` into `file`, hashing as the bytes arrive.
pub(crate) async fn fetch_into(
  client: &Client,
  url: &str,
  token: Option<&SecretToken>,
  file: &mut File,
  notifier: &dyn ProgressNotifier,
  cancel: &CancellationToken,
  timeout_secs: u64,
) -> Result<Fetched, DownloadError> {
  let mut request = client.get(url);
  if let Some(token) = token {
    request = request.bearer_auth(token.expose());
  }

  let mut response = tokio::select! {
    biased;
    _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
    response = request.send() => response.map_err(|e| transfer_error(e, timeout_secs))?,
  };

  let status = response.status();
  if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
    return Err(DownloadError::AuthenticationFailed {
      status: status.as_u16(),
    });
  }
  if !status.is_success() {
    return Err(DownloadError::HttpStatus {
      status: status.as_u16(),
    });
  }

  let total = response.content_length();
  debug!(?total, "response accepted, streaming body");

  let mut hasher = ContentHasher::new();
  let mut throttle = ProgressThrottle::new(total);

  loop {
    let chunk = tokio::select! {
      biased;
      _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
      chunk = response.chunk() => chunk.map_err(|e| transfer_error(e, timeout_secs))?,
    };
    let Some(chunk) = chunk else {
      break;
    };

    file.write_all(&chunk).await?;
    hasher.update(&chunk);

    if let Some(event) = throttle.update(hasher.bytes()) {
      notifier.notify(event);
    }
  }

  file.flush().await?;
  file.sync_all().await?;

  Ok(Fetched {
    bytes: hasher.bytes(),
    sha256: hasher.finalize(),
  })
}
