use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quarry::catalog::IndexCatalog;
use quarry::storage::StorageKind;
use quarry::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::DocumentSource;

#[derive(Parser, Debug)]
#[command(name = "quarry")]
#[command(about = "Quarry CLI - index administration and search")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "QUARRY_CONFIG", default_value = "~/.quarry/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an index
    Create {
        index: String,

        /// JSON body with `settings` and `mappings`
        #[arg(short, long)]
        body: Option<String>,

        /// Storage kind (disk, s3, minio)
        #[arg(long)]
        storage: Option<String>,
    },

    /// Delete an index and its data
    Delete { index: String },

    /// List indices with document counts and sizes
    List {
        /// Only indices starting with this prefix
        #[arg(default_value = "")]
        prefix: String,
    },

    /// Index documents from a JSONL file or stdin
    Index {
        index: String,

        /// Input file (reads stdin when omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Documents per write batch
        #[arg(long, default_value = "500")]
        batch_size: usize,
    },

    /// Search one index, a comma list or a pattern
    Search {
        target: String,

        /// Query DSL body
        #[arg(long, conflicts_with = "q")]
        query: Option<String>,

        /// Lucene query string
        #[arg(short)]
        q: Option<String>,

        #[arg(long)]
        size: Option<usize>,
    },

    /// Run an NDJSON multi-search file
    Msearch {
        /// NDJSON header/body pairs
        input: PathBuf,

        /// Target used by headers without an index
        #[arg(long, default_value = "_all")]
        index: String,
    },

    /// Show or update field mappings
    Mapping {
        target: String,

        /// Mapping update to apply before printing
        #[arg(long)]
        put: Option<String>,
    },

    /// Show or update index settings
    Settings {
        target: String,

        /// Settings update to apply before printing
        #[arg(long)]
        put: Option<String>,
    },

    /// Show, store or delete index templates
    Template {
        /// Template name or `*` pattern; all templates when omitted
        name: Option<String>,

        /// Template body to store under NAME
        #[arg(long, conflicts_with = "delete")]
        put: Option<String>,

        /// Delete the template NAME
        #[arg(long)]
        delete: bool,
    },

    /// Run an analyzer over text
    Analyze {
        /// Analyze request body, e.g. {"analyzer": "standard", "text": "..."}
        body: String,

        /// Use this index's analyzers and mappings
        #[arg(long)]
        index: Option<String>,
    },
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone()),
    );
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(feature = "s3")]
fn attach_object_storage(catalog: IndexCatalog, config: &Config) -> Result<IndexCatalog> {
    match &config.object_storage {
        Some(remote) => {
            let cleanup = quarry::storage::ObjectStoreCleanup::from_config(remote)?;
            Ok(catalog.with_object_storage(Arc::new(cleanup)))
        }
        None => Ok(catalog),
    }
}

#[cfg(not(feature = "s3"))]
fn attach_object_storage(catalog: IndexCatalog, _config: &Config) -> Result<IndexCatalog> {
    Ok(catalog)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = quarry::config::expand_tilde(&cli.config)?;
    let config = Config::load_or_create(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    init_tracing(&config);
    config.ensure_dirs()?;
    tracing::debug!("Data directory: {:?}", config.storage.data_dir);

    let catalog = attach_object_storage(IndexCatalog::from_config(&config)?, &config)?;
    let catalog = Arc::new(catalog);

    let result = run(cli.command, &catalog, &config).await;
    catalog.close().await?;
    result
}

async fn run(command: Commands, catalog: &Arc<IndexCatalog>, config: &Config) -> Result<()> {
    match command {
        Commands::Create {
            index,
            body,
            storage,
        } => {
            let kind = storage
                .map(|s| StorageKind::parse(&s).with_context(|| format!("Unknown storage kind: {}", s)))
                .transpose()?;
            commands::run_create(catalog, &index, body.as_deref(), kind)
        }
        Commands::Delete { index } => commands::run_delete(catalog, &index).await,
        Commands::List { prefix } => commands::run_list(catalog, &prefix),
        Commands::Index {
            index,
            input,
            batch_size,
        } => {
            let source = match input {
                Some(path) => DocumentSource::FromFile(path),
                None => DocumentSource::FromStdin,
            };
            commands::run_index(catalog, &index, source, batch_size).await
        }
        Commands::Search {
            target,
            query,
            q,
            size,
        } => {
            let orchestrator = commands::orchestrator(catalog, config);
            let body = commands::search_body(query.as_deref(), q.as_deref(), size)?;
            commands::run_search(&orchestrator, &target, &body).await
        }
        Commands::Msearch { input, index } => {
            let orchestrator = commands::orchestrator(catalog, config);
            commands::run_msearch(&orchestrator, &index, &input).await
        }
        Commands::Mapping { target, put } => commands::run_mapping(catalog, &target, put.as_deref()),
        Commands::Settings { target, put } => commands::run_settings(catalog, &target, put.as_deref()),
        Commands::Template { name, put, delete } => {
            commands::run_template(catalog, name.as_deref(), put.as_deref(), delete)
        }
        Commands::Analyze { body, index } => commands::run_analyze(catalog, index.as_deref(), &body),
    }
}
