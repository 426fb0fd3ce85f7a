use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use hoard_config::StoreConfig;
use hoard_ingest::{
  DependencyRequest, DownloadEvent, DownloadRequest, Downloader, SecretToken, check_dependencies,
  spawn_download,
};
use hoard_listing::ModelLister;
use hoard_migrate::{Migrator, format_bytes};
use hoard_registry::{Registry, SqliteRegistry};

/// Hoard - a content-addressed store for model files
#[derive(Parser)]
#[command(name = "hoard")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.hoard)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Store config file (default: <data-dir>/config.json when present)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Log at debug level unless RUST_LOG says otherwise
  #[arg(long, short, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Register files already on disk
  Migrate {
    /// Show what would be done without changing the registry
    #[arg(long)]
    dry_run: bool,

    /// Only process this folder (repeatable; default: every model folder)
    #[arg(long)]
    folder: Vec<String>,
  },

  /// List the files of a folder as JSON
  List { folder: String },

  /// Show model folders and their root directories
  Folders,

  /// Download a model, streaming progress as JSON lines
  Download {
    url: String,

    #[arg(long)]
    folder: String,

    #[arg(long)]
    filename: Option<String>,

    /// Expected SHA-256 of the content
    #[arg(long)]
    sha256: Option<String>,

    #[arg(long)]
    display_name: Option<String>,

    #[arg(long)]
    path_index: Option<usize>,

    /// Bearer token for gated upstreams
    #[arg(long, env = "HOARD_TOKEN", hide_env_values = true)]
    token: Option<String>,
  },

  /// Check a workflow's model dependencies (JSON file, or stdin)
  CheckDeps { file: Option<PathBuf> },

  /// List registered models with their aliases
  Models,

  /// Registry totals
  Stats,

  /// Forget a registered model. Files on disk are left alone.
  Remove { sha256: String },
}

fn main() -> Result<ExitCode> {
  let cli = Cli::parse();
  init_logging(cli.verbose);

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".hoard"),
  };
  let config = Arc::new(load_config(&data_dir, cli.config.as_deref())?);

  let Some(command) = cli.command else {
    println!("hoard - use --help to see available commands");
    return Ok(ExitCode::SUCCESS);
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run(command, config).await })
}

fn init_logging(verbose: bool) {
  let default = if verbose { "debug" } else { "info" };
  tracing_subscriber::fmt()
    .with_writer(io::stderr)
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
    .init();
}

fn load_config(data_dir: &Path, explicit: Option<&Path>) -> Result<StoreConfig> {
  let default_file = data_dir.join("config.json");
  let file = match explicit {
    Some(path) => Some(path.to_path_buf()),
    None if default_file.is_file() => Some(default_file),
    None => None,
  };

  let mut config = match file {
    Some(path) => StoreConfig::load(&path)
      .with_context(|| format!("failed to load config: {}", path.display()))?,
    None => StoreConfig::with_defaults("models"),
  };

  if config.base_dir.is_relative() {
    config.base_dir = data_dir.join(&config.base_dir);
  }
  Ok(config)
}

async fn open_registry(config: &StoreConfig) -> Result<SqliteRegistry> {
  let path = config.registry_db_path();
  SqliteRegistry::open(&path)
    .await
    .with_context(|| format!("failed to open registry: {}", path.display()))
}

async fn run(command: Commands, config: Arc<StoreConfig>) -> Result<ExitCode> {
  match command {
    Commands::List { folder } => {
      let lister = ModelLister::new(config);
      let files = lister.list(&folder)?;
      println!("{}", serde_json::to_string_pretty(&files)?);
    }
    Commands::Folders => {
      let lister = ModelLister::new(config);
      println!("{}", serde_json::to_string_pretty(&lister.folders())?);
    }
    Commands::Migrate { dry_run, folder } => {
      let registry = open_registry(&config).await?;
      let migrator = Migrator::new(Arc::new(registry.clone()), config).dry_run(dry_run);
      let stats = migrator.run(&folder).await.context("migration failed")?;

      println!("{}", "=".repeat(60));
      println!("MIGRATION SUMMARY");
      println!("{}", "=".repeat(60));
      println!("{}", stats);
      println!("{}", "=".repeat(60));

      if dry_run {
        println!("\n[DRY RUN] No changes were made. Run without --dry-run to apply changes.");
      } else {
        let totals = registry.stats().await?;
        println!("\nRegistry statistics:");
        println!("  Total models:   {}", totals.artifact_count);
        println!("  Total aliases:  {}", totals.alias_count);
        println!("  Total size:     {} GB", totals.total_gib());
      }

      if stats.errors > 0 {
        return Ok(ExitCode::FAILURE);
      }
    }
    Commands::Download {
      url,
      folder,
      filename,
      sha256,
      display_name,
      path_index,
      token,
    } => {
      let registry: Arc<dyn Registry> = Arc::new(open_registry(&config).await?);
      let downloader = Arc::new(Downloader::new(registry, config)?);

      let request = DownloadRequest {
        url,
        folder,
        filename,
        sha256,
        display_name,
        path_index,
        token: token.map(SecretToken::new),
      };

      let cancel = CancellationToken::new();
      let interrupt = cancel.clone();
      tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
          interrupt.cancel();
        }
      });

      let mut stdout = io::stdout();
      let mut events = match spawn_download(downloader, request, cancel).await {
        Ok(events) => events,
        Err(e) => {
          let body = serde_json::json!({ "error": e.to_string(), "status": e.status_code() });
          writeln!(stdout, "{}", body)?;
          return Ok(ExitCode::FAILURE);
        }
      };

      let mut failed = false;
      while let Some(event) = events.recv().await {
        failed |= matches!(event, DownloadEvent::Failed { .. });
        writeln!(stdout, "{}", event.to_json_line())?;
        stdout.flush()?;
      }

      if failed {
        return Ok(ExitCode::FAILURE);
      }
    }
    Commands::CheckDeps { file } => {
      let registry = open_registry(&config).await?;
      let request = read_dependencies(file.as_deref())?;
      let report = check_dependencies(&registry, &config, &request).await?;
      println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Commands::Models => {
      let registry = open_registry(&config).await?;
      let entries = registry.list_all().await?;
      println!("{}", serde_json::to_string_pretty(&entries)?);
    }
    Commands::Stats => {
      let registry = open_registry(&config).await?;
      let stats = registry.stats().await?;
      println!("Models:     {}", stats.artifact_count);
      println!("Aliases:    {}", stats.alias_count);
      println!(
        "Total size: {} ({} GB)",
        format_bytes(stats.total_bytes),
        stats.total_gib()
      );
    }
    Commands::Remove { sha256 } => {
      let registry = open_registry(&config).await?;
      let sha256 = sha256.trim().to_ascii_lowercase();
      if registry.remove_artifact(&sha256).await? {
        println!("Removed {} from the registry", sha256);
      } else {
        eprintln!("No model registered with hash {}", sha256);
        return Ok(ExitCode::FAILURE);
      }
    }
  }

  Ok(ExitCode::SUCCESS)
}

fn read_dependencies(file: Option<&Path>) -> Result<DependencyRequest> {
  let input = match file {
    Some(path) => std::fs::read_to_string(path)
      .with_context(|| format!("failed to read dependency file: {}", path.display()))?,
    None => {
      let mut input = String::new();
      io::stdin()
        .read_to_string(&mut input)
        .context("failed to read dependencies from stdin")?;
      input
    }
  };

  serde_json::from_str(&input).context("failed to parse dependency JSON")
}
