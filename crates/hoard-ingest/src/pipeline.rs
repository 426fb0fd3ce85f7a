//! The download pipeline.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hoard_config::{StoreConfig, clean_url, short_hash};
use hoard_registry::{
  ArtifactMetadata, ArtifactRecord, DownloadStatus, Registry, RegistryError, digests_match,
};
use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::events::{ChannelNotifier, DownloadEvent, DownloadOutcome, ProgressNotifier};
use crate::fetch::{Fetched, fetch_into};
use crate::link::{link_if_absent, replace_with_link};
use crate::staging::StagedFile;
use crate::validate::{Target, check_policy, resolve_target};
use crate::{DownloadError, DownloadRequest};

/// A validated request, ready for [`Downloader::run`].
#[derive(Debug)]
pub struct PreparedDownload {
  target: Target,
  expected: Option<String>,
  existing: Option<ArtifactRecord>,
}

impl PreparedDownload {
  pub fn target(&self) -> &Target {
    &self.target
  }

  /// The expected hash is registered, so running will not fetch anything.
  pub fn is_satisfied(&self) -> bool {
    self.existing.is_some()
  }
}

/// Fetches artifacts into the store and keeps the registry in step.
///
/// Byte-identical content is stored once: a request whose content is
/// already registered ends up as a link to the existing file plus an alias
/// row, whether that is known up front from the expected hash or only after
/// the bytes were fetched.
pub struct Downloader {
  registry: Arc<dyn Registry>,
  config: Arc<StoreConfig>,
  client: Client,
}

impl Downloader {
  pub fn new(registry: Arc<dyn Registry>, config: Arc<StoreConfig>) -> Result<Self, DownloadError> {
    let client = Client::builder()
      .timeout(Duration::from_secs(config.download.timeout_secs))
      .build()?;

    Ok(Self {
      registry,
      config,
      client,
    })
  }

  pub fn registry(&self) -> &Arc<dyn Registry> {
    &self.registry
  }

  /// Materialize `request` under its category.
  ///
  /// Equivalent to [`prepare`](Self::prepare) followed by
  /// [`run`](Self::run).
  pub async fn download(
    &self,
    request: &DownloadRequest,
    notifier: &dyn ProgressNotifier,
    cancel: CancellationToken,
  ) -> Result<DownloadOutcome, DownloadError> {
    let prepared = self.prepare(request).await?;
    self.run(request, prepared, notifier, cancel).await
  }

  /// Validate `request` and look up its expected hash.
  ///
  /// Nothing is written and nothing is fetched, so a transport can answer
  /// an error from here with [`DownloadError::status_code`] before it starts
  /// streaming.
  pub async fn prepare(&self, request: &DownloadRequest) -> Result<PreparedDownload, DownloadError> {
    request.check_required()?;
    let target = resolve_target(&self.config, request)?;
    let expected = request.expected_hash();

    let existing = match expected.as_deref() {
      Some(expected) => {
        self.ensure_vacant(&target, expected).await?;
        self.registry.find_by_hash(expected).await?
      }
      None => None,
    };

    if existing.is_none() {
      check_policy(&self.config, request, &target)?;
    }

    Ok(PreparedDownload {
      target,
      expected,
      existing,
    })
  }

  /// Carry out a prepared download.
  ///
  /// Once the transfer starts, every failure removes the staged file and any
  /// destination file this call created, and the attempt is recorded in the
  /// audit queue.
  #[instrument(
    name = "download",
    skip(self, request, prepared, notifier, cancel),
    fields(url = %clean_url(&request.url), folder = %request.folder)
  )]
  pub async fn run(
    &self,
    request: &DownloadRequest,
    prepared: PreparedDownload,
    notifier: &dyn ProgressNotifier,
    cancel: CancellationToken,
  ) -> Result<DownloadOutcome, DownloadError> {
    let PreparedDownload {
      target,
      expected,
      existing,
    } = prepared;

    if let Some(record) = existing {
      return self.satisfy_existing(&target, record, notifier).await;
    }

    let audit_id = self
      .registry
      .begin_download(expected.as_deref(), &request.url, &target.key)
      .await?;

    info!(dest = %target.key, "download started");

    let result = self
      .transfer(request, &target, expected.as_deref(), notifier, &cancel)
      .await;

    let (status, hash, message) = match &result {
      Ok(outcome) if outcome.deduplicated => (
        DownloadStatus::Deduplicated,
        Some(outcome.sha256.as_str()),
        None,
      ),
      Ok(outcome) => (DownloadStatus::Completed, Some(outcome.sha256.as_str()), None),
      Err(e) => (DownloadStatus::Failed, None, Some(e.to_string())),
    };
    if let Err(e) = self
      .registry
      .finish_download(audit_id, status, hash, message.as_deref())
      .await
    {
      warn!(error = %e, audit_id, "failed to record download result");
    }

    match &result {
      Ok(outcome) => info!(
        dest = %outcome.path,
        hash = short_hash(&outcome.sha256),
        size_bytes = outcome.size_bytes,
        deduplicated = outcome.deduplicated,
        "download completed"
      ),
      Err(e) => error!(error = %e, "download failed"),
    }

    result
  }

  /// Refuse a destination that the registry already knows as different
  /// content, canonical or alias.
  async fn ensure_vacant(&self, target: &Target, content_hash: &str) -> Result<(), DownloadError> {
    match self.registry.find_by_path(&target.key).await? {
      Some(found) if !digests_match(&found.record.content_hash, content_hash) => {
        warn!(
          dest = %target.key,
          owner = short_hash(&found.record.content_hash),
          via_alias = found.via_alias,
          "destination holds different content"
        );
        Err(DownloadError::PathOccupied {
          path: target.key.clone(),
          owner: found.record.content_hash,
        })
      }
      _ => Ok(()),
    }
  }

  /// The expected hash is already registered: alias the destination without
  /// touching the network.
  async fn satisfy_existing(
    &self,
    target: &Target,
    record: ArtifactRecord,
    notifier: &dyn ProgressNotifier,
  ) -> Result<DownloadOutcome, DownloadError> {
    if record.canonical_path != target.key {
      let canonical = self.canonical_file(&record).await?;
      link_if_absent(&canonical, &target.dest).await?;
      self
        .registry
        .add_alias(&record.content_hash, &target.key)
        .await?;
    }

    info!(
      hash = short_hash(&record.content_hash),
      canonical = %record.canonical_path,
      dest = %target.key,
      "artifact already present, skipping download"
    );
    notifier.notify(DownloadEvent::message(format!(
      "{} already exists as {}",
      target.filename, record.canonical_path
    )));

    Ok(DownloadOutcome {
      path: target.key.clone(),
      folder: target.category.name.clone(),
      filename: target.filename.clone(),
      size_bytes: record.size(),
      sha256: record.content_hash,
      already_exists: true,
      deduplicated: false,
    })
  }

  async fn transfer(
    &self,
    request: &DownloadRequest,
    target: &Target,
    expected: Option<&str>,
    notifier: &dyn ProgressNotifier,
    cancel: &CancellationToken,
  ) -> Result<DownloadOutcome, DownloadError> {
    // Only the network part is bounded; publishing and registering run to
    // completion once the bytes are staged.
    let timeout_secs = self.config.download.timeout_secs;
    let (staged, fetched) = tokio::time::timeout(
      Duration::from_secs(timeout_secs),
      self.receive(request, target, notifier, cancel),
    )
    .await
    .unwrap_or(Err(DownloadError::Timeout { timeout_secs }))?;

    if let Some(expected) = expected
      && !digests_match(expected, &fetched.sha256)
    {
      warn!(
        expected = short_hash(expected),
        actual = short_hash(&fetched.sha256),
        "hash mismatch, discarding download"
      );
      staged.discard().await;
      return Err(DownloadError::HashMismatch {
        expected: expected.to_string(),
        actual: fetched.sha256,
      });
    }

    if let Err(e) = self.ensure_vacant(target, &fetched.sha256).await {
      staged.discard().await;
      return Err(e);
    }

    let outcome = DownloadOutcome {
      path: target.key.clone(),
      folder: target.category.name.clone(),
      filename: target.filename.clone(),
      sha256: fetched.sha256.clone(),
      size_bytes: fetched.bytes,
      already_exists: false,
      deduplicated: false,
    };

    // Someone registered the same bytes while this transfer ran.
    if let Some(record) = self.registry.find_by_hash(&fetched.sha256).await? {
      staged.discard().await;
      self.alias_to(&record, target).await?;
      return Ok(DownloadOutcome {
        deduplicated: true,
        ..outcome
      });
    }

    staged.publish(&target.dest).await?;

    let metadata = ArtifactMetadata {
      display_name: request.display_name.clone(),
      filename: Some(target.filename.clone()),
      folder: Some(target.category.name.clone()),
      ..Default::default()
    };

    let registered = match self
      .registry
      .add_artifact(
        &fetched.sha256,
        &target.key,
        fetched.bytes,
        Some(&request.url),
        &metadata,
      )
      .await
    {
      Ok(registered) => registered,
      Err(RegistryError::PathConflict { path, owner }) => {
        // Claimed by another artifact after the vacancy check. A missing file
        // is reported as such later; wrong bytes under its hash would not be.
        self.remove_published(target).await;
        return Err(DownloadError::PathOccupied { path, owner });
      }
      Err(e) => {
        self.remove_published(target).await;
        return Err(e.into());
      }
    };

    if registered {
      return Ok(outcome);
    }

    // Lost the registration race after publishing: converge on the winner.
    let Some(record) = self.registry.find_by_hash(&fetched.sha256).await? else {
      warn!(
        hash = short_hash(&fetched.sha256),
        "artifact vanished after losing registration race"
      );
      return Ok(outcome);
    };

    debug!(
      hash = short_hash(&fetched.sha256),
      canonical = %record.canonical_path,
      "lost registration race, linking to winner"
    );
    if let Err(e) = self.alias_to(&record, target).await {
      self.remove_published(target).await;
      return Err(e);
    }

    Ok(DownloadOutcome {
      deduplicated: true,
      ..outcome
    })
  }

  /// Stage and hash the upstream bytes.
  async fn receive(
    &self,
    request: &DownloadRequest,
    target: &Target,
    notifier: &dyn ProgressNotifier,
    cancel: &CancellationToken,
  ) -> Result<(StagedFile, Fetched), DownloadError> {
    let (staged, mut file) = StagedFile::create(&self.config.staging_path()).await?;
    notifier.notify(DownloadEvent::message(format!(
      "Downloading {}",
      target.filename
    )));

    let fetched = fetch_into(
      &self.client,
      &request.url,
      request.token.as_ref(),
      &mut file,
      notifier,
      cancel,
      self.config.download.timeout_secs,
    )
    .await?;
    drop(file);

    debug!(
      hash = short_hash(&fetched.sha256),
      bytes = fetched.bytes,
      "transfer finished"
    );
    Ok((staged, fetched))
  }

  /// Point the destination at the canonical copy of `record` and register
  /// it as an alias.
  async fn alias_to(&self, record: &ArtifactRecord, target: &Target) -> Result<(), DownloadError> {
    if record.canonical_path == target.key {
      return Ok(());
    }

    self.ensure_vacant(target, &record.content_hash).await?;
    let canonical = self.canonical_file(record).await?;
    if let Some(parent) = target.dest.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    replace_with_link(&canonical, &target.dest).await?;
    self
      .registry
      .add_alias(&record.content_hash, &target.key)
      .await?;
    Ok(())
  }

  async fn canonical_file(&self, record: &ArtifactRecord) -> Result<PathBuf, DownloadError> {
    let canonical = self.config.resolve_key(&record.canonical_path);
    if !tokio::fs::try_exists(&canonical).await? {
      return Err(DownloadError::Io(std::io::Error::new(
        ErrorKind::NotFound,
        format!(
          "canonical file for {} is missing: {}",
          short_hash(&record.content_hash),
          record.canonical_path
        ),
      )));
    }
    Ok(canonical)
  }

  async fn remove_published(&self, target: &Target) {
    if let Err(e) = tokio::fs::remove_file(&target.dest).await
      && e.kind() != ErrorKind::NotFound
    {
      warn!(path = %target.dest.display(), error = %e, "failed to remove published file");
    }
  }
}

/// Validate a download and run it on its own task, streaming its events.
///
/// Errors from [`Downloader::prepare`] are returned directly, before any
/// event exists. After that the receiver yields progress events followed by
/// exactly one terminal event. Dropping the receiver cancels the transfer.
pub async fn spawn_download(
  downloader: Arc<Downloader>,
  request: DownloadRequest,
  cancel: CancellationToken,
) -> Result<mpsc::UnboundedReceiver<DownloadEvent>, DownloadError> {
  let prepared = downloader.prepare(&request).await?;
  let (tx, rx) = mpsc::unbounded_channel();

  tokio::spawn(async move {
    let notifier = ChannelNotifier::new(tx.clone());
    let download = downloader.run(&request, prepared, &notifier, cancel.clone());
    tokio::pin!(download);

    let result = tokio::select! {
      result = &mut download => result,
      _ = tx.closed() => {
        cancel.cancel();
        download.await
      }
    };

    let terminal = match result {
      Ok(outcome) => DownloadEvent::Finished(outcome),
      Err(e) => DownloadEvent::Failed {
        error: e.to_string(),
      },
    };
    notifier.notify(terminal);
  });

  Ok(rx)
}
