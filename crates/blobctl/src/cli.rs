//! Exposes the command line application.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use managed_blob::config::Config;
use managed_blob::{
    BlobOptions, BlobRegistry, BlobSnapshot, BlobStore, ManagedBlob, TracingReporter, metrics,
    store,
};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::level_filters::LevelFilter;

use crate::logging;

/// Reads, writes and watches managed blobs.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// The severity level of logging output, overriding the configuration file.
    ///
    /// Possible values:
    /// off, error, warn, info, debug, trace
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<LevelFilter>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print a blob as JSON, or `null` if it does not exist.
    Get(BlobArgs),

    /// Store a JSON value in a blob.
    Put {
        #[command(flatten)]
        blob: BlobArgs,

        /// The JSON value to store.
        json: String,

        /// Go through the debounced write path, flushing it before exiting.
        #[arg(long)]
        debounced: bool,
    },

    /// Remove a blob.
    Delete(BlobArgs),

    /// Print every change of a blob and save JSON values read line by line from stdin.
    ///
    /// Pending changes are written when stdin is closed.
    Watch(BlobArgs),
}

#[derive(Debug, Args)]
struct BlobArgs {
    /// The owner of the blob, e.g. a chat id.
    owner: String,

    /// The name of the blob within the owner's namespace, e.g. `settings`.
    slot: String,
}

/// The blob stack built from the configuration.
#[derive(Debug)]
struct Blobs {
    store: Arc<dyn BlobStore>,
    options: BlobOptions,
}

impl Blobs {
    fn new(config: &Config) -> Result<Self> {
        let store = store::from_config(&config.store).context("failed to create the blob store")?;
        Ok(Self {
            store,
            options: config.blobs.options(),
        })
    }

    fn registry(&self, slot: &str) -> BlobRegistry<Value> {
        BlobRegistry::new(
            slot,
            Arc::clone(&self.store),
            Arc::new(TracingReporter),
            self.options,
        )
    }

    fn open(&self, args: &BlobArgs) -> ManagedBlob<Value> {
        self.registry(&args.slot).get(args.owner.as_str())
    }
}

fn print_json(value: &Value) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to format JSON")?;
    println!("{json}");
    Ok(())
}

fn print_snapshot(snapshot: &BlobSnapshot<Value>) {
    let event = serde_json::json!({
        "value": snapshot.value,
        "initialized": snapshot.initialized,
        "loading": snapshot.loading,
    });
    println!("{event}");
}

async fn watch(blob: ManagedBlob<Value>) -> Result<()> {
    let _subscription = blob.subscribe(print_snapshot);

    blob.get()
        .await
        .with_context(|| format!("failed to fetch `{}`", blob.key()))?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<Value>(line) {
            Ok(value) => blob.save_debounced(value),
            Err(error) => tracing::warn!(
                error = &error as &dyn std::error::Error,
                "Ignoring line that is not valid JSON"
            ),
        }
    }

    blob.save_pending_changes()
        .await
        .with_context(|| format!("failed to save `{}`", blob.key()))
}

async fn run(command: Command, config: Config) -> Result<()> {
    let blobs = Blobs::new(&config)?;

    match command {
        Command::Get(args) => {
            let blob = blobs.open(&args);
            let value = blob
                .get()
                .await
                .with_context(|| format!("failed to fetch `{}`", blob.key()))?;
            print_json(&value.unwrap_or(Value::Null))?;
        }
        Command::Put {
            blob: args,
            json,
            debounced,
        } => {
            let value: Value = serde_json::from_str(&json).context("value is not valid JSON")?;
            let registry = blobs.registry(&args.slot);
            let blob = registry.get(args.owner.as_str());

            if debounced {
                blob.save_debounced(value);
                registry
                    .save_all_pending()
                    .await
                    .with_context(|| format!("failed to save `{}`", blob.key()))?;
            } else {
                blob.save(value)
                    .await
                    .with_context(|| format!("failed to save `{}`", blob.key()))?;
            }
        }
        Command::Delete(args) => {
            let blob = blobs.open(&args);
            blob.delete()
                .await
                .with_context(|| format!("failed to delete `{}`", blob.key()))?;
        }
        Command::Watch(args) => watch(blobs.open(&args)).await?,
    }

    Ok(())
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::get(cli.config()).context("failed loading config")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: The runtime has not been started yet, so this is still single-threaded.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        let mut tags = config.metrics.custom_tags.clone();
        let hostname = config.metrics.hostname_tag.clone().and_then(|tag| {
            hostname::get()
                .ok()
                .and_then(|s| s.into_string().ok())
                .map(|name| (tag, name))
        });
        tags.extend(hostname);
        metrics::configure_statsd(&config.metrics.prefix, statsd.as_str(), tags)
            .context("failed to configure statsd")?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the runtime")?;

    runtime.block_on(run(cli.command, config))
}
