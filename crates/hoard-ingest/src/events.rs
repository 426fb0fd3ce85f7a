//! Download progress events and notifiers.
//!
//! The pipeline reports what it is doing as an ordered sequence of
//! [`DownloadEvent`]s. Each event serializes to one JSON object, so a
//! transport can forward them as newline-delimited JSON.

use serde::Serialize;
use tokio::sync::mpsc;

/// Final result of a successful download request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadOutcome {
  /// Registry key of the requested destination.
  pub path: String,
  pub folder: String,
  pub filename: String,
  pub sha256: String,
  pub size_bytes: u64,

  /// The expected hash was already registered; nothing was fetched.
  #[serde(skip_serializing_if = "std::ops::Not::not")]
  pub already_exists: bool,

  /// The content was fetched but turned out to be registered already, so the
  /// destination links to the existing copy.
  #[serde(skip_serializing_if = "std::ops::Not::not")]
  pub deduplicated: bool,
}

/// Events emitted while a download runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DownloadEvent {
  /// Bytes received so far.
  Progress {
    /// Whole percent, when the total size is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<u8>,
    bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_bytes: Option<u64>,
  },

  /// Human-readable status line.
  Message { message: String },

  /// Terminal success.
  Finished(DownloadOutcome),

  /// Terminal failure.
  Failed { error: String },
}

impl DownloadEvent {
  pub fn message(message: impl Into<String>) -> Self {
    Self::Message {
      message: message.into(),
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Finished(_) | Self::Failed { .. })
  }

  /// One NDJSON line, without the trailing newline.
  pub fn to_json_line(&self) -> String {
    // Every variant is a plain struct of strings and integers.
    serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
  }
}

/// Receives download events.
pub trait ProgressNotifier: Send + Sync {
  fn notify(&self, event: DownloadEvent);
}

/// A notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ProgressNotifier for NoopNotifier {
  fn notify(&self, _event: DownloadEvent) {}
}

/// Forwards events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<DownloadEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<DownloadEvent>) -> Self {
    Self { sender }
  }
}

impl ProgressNotifier for ChannelNotifier {
  fn notify(&self, event: DownloadEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

const UNKNOWN_LENGTH_STEP: u64 = 1024 * 1024;

/// Decides when a progress event is worth sending.
///
/// With a known total, an event is due each time the whole percentage
/// advances. Without one, an event is due every [`UNKNOWN_LENGTH_STEP`]
/// bytes.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
  total: Option<u64>,
  last_percent: Option<u8>,
  last_bytes: u64,
}

impl ProgressThrottle {
  pub fn new(total: Option<u64>) -> Self {
    Self {
      total: total.filter(|t| *t > 0),
      last_percent: None,
      last_bytes: 0,
    }
  }

  /// Returns an event when `bytes` crosses the next threshold.
  pub fn update(&mut self, bytes: u64) -> Option<DownloadEvent> {
    match self.total {
      Some(total) => {
        let percent = (bytes.min(total) * 100 / total) as u8;
        if self.last_percent.is_some_and(|last| percent <= last) || percent == 0 {
          return None;
        }
        self.last_percent = Some(percent);
        Some(DownloadEvent::Progress {
          progress: Some(percent),
          bytes,
          total_bytes: Some(total),
        })
      }
      None => {
        if bytes < self.last_bytes + UNKNOWN_LENGTH_STEP {
          return None;
        }
        self.last_bytes = bytes;
        Some(DownloadEvent::Progress {
          progress: None,
          bytes,
          total_bytes: None,
        })
      }
    }
  }
}
