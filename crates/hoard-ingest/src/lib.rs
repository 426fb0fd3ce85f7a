//! Hoard Ingest
//!
//! Brings artifacts into the store. A [`Downloader`] streams a URL into a
//! staging area while hashing it, verifies the digest, and either publishes
//! the file as a new canonical artifact or, when the content is already
//! registered, links the requested path to the existing copy.
//!
//! Progress is reported through a [`ProgressNotifier`];
//! [`spawn_download`] validates a request, then wraps the download in a task
//! and hands back a channel of [`DownloadEvent`]s suitable for
//! newline-delimited JSON streaming. Validation errors come back before the
//! channel exists, with a [`DownloadError::status_code`] for the transport.
//!
//! [`check_dependencies`] answers which of a workflow's required models are
//! already stored without fetching anything.

mod dependencies;
mod error;
mod events;
mod fetch;
mod link;
mod pipeline;
mod request;
mod staging;
mod validate;

pub use dependencies::{
  DependencyReport, DependencyRequest, ExistingDependency, MissingDependency, Requirement,
  check_dependencies,
};
pub use error::{DownloadError, ErrorKind};
pub use events::{
  ChannelNotifier, DownloadEvent, DownloadOutcome, NoopNotifier, ProgressNotifier, ProgressThrottle,
};
pub use link::{LinkKind, link_if_absent, replace_with_link};
pub use pipeline::{Downloader, PreparedDownload, spawn_download};
pub use request::{DownloadRequest, SecretToken};
pub use staging::StagedFile;
pub use validate::{Target, check_policy, resolve_target};
