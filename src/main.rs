use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use rostersync::cache::EntityCache;
use rostersync::config::Config;
use rostersync::db::SqliteSnapshotStore;
use rostersync::import::ImportContext;
use rostersync::remote::RemoteTableClient;
use rostersync::sync::{ConflictSelection, Envelope, SyncOrchestrator, SyncService};

/// Reconcile roster exports against the remote tables
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// JSON config file (defaults to $ROSTERSYNC_CONFIG if set)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Import a CSV file
    Sync {
        file: PathBuf,
        /// Category applied to every row
        #[arg(long)]
        category: Option<String>,
        /// Reference date applied to every row (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,
    },
    /// Apply selected conflicts from a JSON file ([{natural_key, field_name, new_value}])
    Resolve { selections: PathBuf },
    /// Inspect or manage the entity cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Verify credentials and list the fields of both tables
    Check,
    /// Write the effective configuration (without credentials) to a file
    InitConfig { path: PathBuf },
}

#[derive(Debug, Subcommand)]
enum CacheAction {
    Status,
    Refresh,
    Clear,
}

fn print_envelope<T: Serialize>(envelope: &Envelope<T>) {
    match serde_json::to_string_pretty(envelope) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Could not serialize response: {}", e),
    }
}

fn exit_with(message: &str) -> ! {
    error!("✗ {}", message);
    std::process::exit(1);
}

async fn build_service(config: Config) -> SyncService {
    let client = match RemoteTableClient::new(config.client_settings()) {
        Ok(client) => client,
        Err(e) => exit_with(&format!("Could not create HTTP client: {}", e)),
    };

    let store = match SqliteSnapshotStore::new(&config.snapshot_path, "parent").await {
        Ok(store) => store,
        Err(e) => exit_with(&format!(
            "Could not open snapshot store {}: {}",
            config.snapshot_path.display(),
            e
        )),
    };

    let cache = Arc::new(EntityCache::new(
        config.parent.key_field.clone(),
        Arc::new(store),
    ));
    let orchestrator = SyncOrchestrator::new(config, Arc::new(client), cache);
    SyncService::new(Arc::new(orchestrator))
}

#[tokio::main]
async fn main() {
    // Use RUST_LOG env var if set, otherwise default to info level
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => exit_with(&format!("Could not load configuration: {}", e)),
    };

    if let Command::InitConfig { path } = &cli.command {
        if let Err(e) = config.save(path) {
            exit_with(&format!("Could not write {}: {}", path.display(), e));
        }
        info!("✓ Wrote {}", path.display());
        return;
    }

    let report = config.validate();
    for warning in &report.warnings {
        info!("Config warning: {}", warning);
    }
    if !report.valid {
        exit_with(&format!("Invalid configuration: {}", report.errors.join("; ")));
    }

    let service = build_service(config).await;

    let success = match cli.command {
        Command::Sync {
            file,
            category,
            date,
        } => {
            let payload = match tokio::fs::read(&file).await {
                Ok(payload) => payload,
                Err(e) => exit_with(&format!("Could not read {}: {}", file.display(), e)),
            };
            let filename = file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let context = ImportContext::new(category, date);

            let envelope = service.sync(&payload, &filename, &context).await;
            print_envelope(&envelope);
            envelope.success
        }
        Command::Resolve { selections } => {
            let text = match tokio::fs::read_to_string(&selections).await {
                Ok(text) => text,
                Err(e) => exit_with(&format!("Could not read {}: {}", selections.display(), e)),
            };
            let selected: Vec<ConflictSelection> = match serde_json::from_str(&text) {
                Ok(selected) => selected,
                Err(e) => exit_with(&format!("Invalid selection file: {}", e)),
            };

            let envelope = service.resolve_conflicts(&selected).await;
            print_envelope(&envelope);
            envelope.success
        }
        Command::Cache { action } => {
            let envelope = match action {
                CacheAction::Status => service.cache_status().await,
                CacheAction::Refresh => service.cache_refresh().await,
                CacheAction::Clear => service.cache_clear().await,
            };
            print_envelope(&envelope);
            envelope.success
        }
        Command::Check => {
            let envelope = service.check_tables().await;
            print_envelope(&envelope);
            envelope.success
        }
        Command::InitConfig { .. } => true,
    };

    if !success {
        std::process::exit(1);
    }
}
