//! Blobshed CLI - Command line interface for blobstore operations.
//!
//! This tool drives the configured blobstores from the command line:
//! uploading and fetching blobs, bulk deletes, signed URLs, and the
//! controller updates that accompany an upload.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use blobshed_blobstore::{default_registry, provide, Blobstore, SignedMethod};
use blobshed_common::BlobKey;
use blobshed_controller::{create_updater, StateUpdater};
use blobshed_ingest::Stager;

use config::Config;

#[derive(Parser)]
#[command(name = "blobshed")]
#[command(about = "Blobshed - Blobstore management")]
#[command(version)]
struct Cli {
    /// Path to the service configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Which configured blobstore to operate on.
    #[arg(short, long, default_value = "default", global = true)]
    store: String,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file.
    Put {
        /// Destination blob key.
        key: String,

        /// File to upload.
        file: PathBuf,

        /// Resource GUID to report upload progress for.
        #[arg(long)]
        package_guid: Option<String>,
    },

    /// Download a blob to a file.
    Get {
        /// Blob key.
        key: String,

        /// Destination file path.
        output: PathBuf,
    },

    /// Write a blob to stdout.
    Cat {
        /// Blob key.
        key: String,
    },

    /// Check whether a blob exists.
    Exists {
        /// Blob key.
        key: String,
    },

    /// Delete a blob.
    Delete {
        /// Blob key.
        key: String,
    },

    /// Delete every blob under a prefix.
    DeletePrefix {
        /// Key prefix.
        prefix: String,
    },

    /// Delete every blob in the store's scope.
    DeleteAll,

    /// Copy a blob to another key.
    Copy {
        /// Source blob key.
        src: String,

        /// Destination blob key.
        dest: String,
    },

    /// Produce a pre-signed URL for direct access.
    Sign {
        /// Blob key.
        key: String,

        /// HTTP verb the URL grants: "get" or "put".
        #[arg(short, long, default_value = "get")]
        method: String,

        /// Seconds until the URL expires.
        #[arg(short, long, default_value_t = 3600)]
        expires_secs: u64,
    },

    /// List blobs under a prefix.
    List {
        /// Key prefix; the whole scope when omitted.
        #[arg(default_value = "")]
        prefix: String,
    },

    /// Show the available backends.
    Backends,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match &cli.command {
        Commands::Put {
            key,
            file,
            package_guid,
        } => cmd_put(&cli, key, file, package_guid.as_deref()).await,

        Commands::Get { key, output } => cmd_get(&cli, key, output).await,

        Commands::Cat { key } => cmd_cat(&cli, key).await,

        Commands::Exists { key } => cmd_exists(&cli, key).await,

        Commands::Delete { key } => cmd_delete(&cli, key).await,

        Commands::DeletePrefix { prefix } => cmd_delete_prefix(&cli, prefix).await,

        Commands::DeleteAll => cmd_delete_all(&cli).await,

        Commands::Copy { src, dest } => cmd_copy(&cli, src, dest).await,

        Commands::Sign {
            key,
            method,
            expires_secs,
        } => cmd_sign(&cli, key, method, *expires_secs).await,

        Commands::List { prefix } => cmd_list(&cli, prefix).await,

        Commands::Backends => cmd_backends(),
    }
}

/// Load the configuration file named on the command line.
fn load_config(cli: &Cli) -> Result<Config> {
    let path = cli
        .config
        .as_deref()
        .context("No configuration file given. Pass --config")?;
    Ok(Config::from_path(path)?)
}

/// Open the selected blobstore.
fn open_store(cli: &Cli, config: &Config) -> Result<Blobstore> {
    let store = config.blobstore(&cli.store)?;
    Ok(provide(store, config.metrics_handle())?)
}

/// Upload a file, reporting progress to the controller when asked.
async fn cmd_put(cli: &Cli, key: &str, file: &Path, package_guid: Option<&str>) -> Result<()> {
    info!("Uploading {} as {}", file.display(), key);

    let config = load_config(cli)?;
    let store_config = config.blobstore(&cli.store)?;
    let store = provide(store_config, config.metrics_handle())?;
    let key = BlobKey::parse(key)?;

    let stager = Stager::new(None, store_config.max_size)?;
    let staged = stager
        .stage_file(file)
        .await
        .context("Failed to stage upload")?;

    let updater = create_updater(config.controller.as_ref())?;
    if let Some(guid) = package_guid {
        updater
            .processing_upload(guid)
            .await
            .context("Failed to report processing state")?;
    }

    match store.put_file(&key, staged.path()).await {
        Ok(Some(blob)) => {
            if let Some(guid) = package_guid {
                updater
                    .ready(guid, std::slice::from_ref(staged.checksum()))
                    .await
                    .context("Failed to report ready state")?;
            }

            println!("Blob stored successfully!");
            println!("  Key: {}", key);
            println!("  Storage key: {}", blob.key);
            println!("  Size: {} bytes", staged.size());
            println!("  Digest: {}", staged.checksum().value);
            Ok(())
        }
        Ok(None) => {
            let reason = format!(
                "File size {} bytes is outside the configured limits",
                staged.size()
            );
            if let Some(guid) = package_guid {
                updater
                    .failed(guid, &reason)
                    .await
                    .context("Failed to report failed state")?;
            }
            anyhow::bail!("Upload skipped: {}", reason);
        }
        Err(e) => {
            if let Some(guid) = package_guid {
                updater
                    .failed(guid, &e.to_string())
                    .await
                    .context("Failed to report failed state")?;
            }
            Err(e).context("Failed to upload blob")
        }
    }
}

/// Download a blob to a file.
async fn cmd_get(cli: &Cli, key: &str, output: &Path) -> Result<()> {
    use futures::StreamExt;
    use tokio::io::AsyncWriteExt;

    let config = load_config(cli)?;
    let store = open_store(cli, &config)?;
    let key = BlobKey::parse(key)?;

    let mut stream = store
        .download_stream(&key)
        .await
        .context("Failed to download blob")?;
    let mut file = tokio::fs::File::create(output)
        .await
        .context("Failed to create output file")?;

    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Failed to read download stream")?;
        written += chunk.len() as u64;
        file.write_all(&chunk)
            .await
            .context("Failed to write output file")?;
    }
    file.flush().await?;

    println!("Blob downloaded: {} ({} bytes)", output.display(), written);
    Ok(())
}

/// Write a blob to stdout.
async fn cmd_cat(cli: &Cli, key: &str) -> Result<()> {
    let config = load_config(cli)?;
    let store = open_store(cli, &config)?;
    let key = BlobKey::parse(key)?;

    let content = store
        .download(&key)
        .await
        .context("Failed to download blob")?;
    std::io::stdout()
        .write_all(&content)
        .context("Failed to write to stdout")?;

    Ok(())
}

/// Check whether a blob exists.
async fn cmd_exists(cli: &Cli, key: &str) -> Result<()> {
    let config = load_config(cli)?;
    let store = open_store(cli, &config)?;
    let key = BlobKey::parse(key)?;

    if store.exists(&key).await? {
        println!("Blob exists: {}", key);
        Ok(())
    } else {
        anyhow::bail!("Blob not found: {}", key);
    }
}

/// Delete a blob.
async fn cmd_delete(cli: &Cli, key: &str) -> Result<()> {
    info!("Deleting: {}", key);

    let config = load_config(cli)?;
    let store = open_store(cli, &config)?;
    let key = BlobKey::parse(key)?;

    store.delete(&key).await.context("Failed to delete blob")?;

    println!("Blob deleted: {}", key);
    Ok(())
}

/// Delete every blob under a prefix.
async fn cmd_delete_prefix(cli: &Cli, prefix: &str) -> Result<()> {
    info!("Deleting prefix: {}", prefix);

    let config = load_config(cli)?;
    let store = open_store(cli, &config)?;

    store
        .delete_prefix(prefix)
        .await
        .context("Failed to delete prefix")?;

    println!("Deleted blobs under prefix: {}", prefix);
    Ok(())
}

/// Delete every blob in the store's scope.
async fn cmd_delete_all(cli: &Cli) -> Result<()> {
    info!("Deleting all blobs in store: {}", cli.store);

    let config = load_config(cli)?;
    let store = open_store(cli, &config)?;

    store.delete_all().await.context("Failed to delete store contents")?;

    println!("Deleted all blobs in store: {}", cli.store);
    Ok(())
}

/// Copy a blob to another key.
async fn cmd_copy(cli: &Cli, src: &str, dest: &str) -> Result<()> {
    info!("Copying {} to {}", src, dest);

    let config = load_config(cli)?;
    let store = open_store(cli, &config)?;
    let src = BlobKey::parse(src)?;
    let dest = BlobKey::parse(dest)?;

    store
        .copy(&src, &dest)
        .await
        .context("Failed to copy blob")?;

    println!("Blob copied: {} -> {}", src, dest);
    Ok(())
}

/// Produce a pre-signed URL.
async fn cmd_sign(cli: &Cli, key: &str, method: &str, expires_secs: u64) -> Result<()> {
    let config = load_config(cli)?;
    let store = open_store(cli, &config)?;
    let key = BlobKey::parse(key)?;

    let method = match method {
        "get" => SignedMethod::Get,
        "put" => SignedMethod::Put,
        _ => {
            anyhow::bail!("Invalid method. Use: get or put");
        }
    };

    let url = store
        .signed_url(&key, method, Duration::from_secs(expires_secs))
        .await
        .context("Failed to sign URL")?;

    println!("{}", url);
    Ok(())
}

/// List blobs under a prefix.
async fn cmd_list(cli: &Cli, prefix: &str) -> Result<()> {
    let config = load_config(cli)?;
    let store = open_store(cli, &config)?;

    let blobs = store.list(prefix).await.context("Failed to list blobs")?;

    if blobs.is_empty() {
        println!("No blobs found.");
    } else {
        println!("Blobs in store '{}':", cli.store);
        for blob in blobs {
            let size = blob
                .size
                .map(|s| format!("{} bytes", s))
                .unwrap_or_else(|| "size unknown".to_string());
            println!("  {} ({})", blob.key, size);
        }
    }

    Ok(())
}

/// Show the available backends.
fn cmd_backends() -> Result<()> {
    println!("Available backends:");
    for name in default_registry().backends() {
        println!("  {}", name);
    }
    Ok(())
}
