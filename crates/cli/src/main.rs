mod memory_commands;

use std::path::{Path, PathBuf};

use {
    clap::{Parser, Subcommand},
    mnemo_memory::{MemoryConfig, MemoryManager},
    tracing::{debug, info},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "mnemo", about = "Mnemo: semantic memory over markdown notes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (.toml or .json). Defaults to ./mnemo.toml, then ~/.config/mnemo/.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Index one markdown file, or every markdown file under a directory.
    Index { path: PathBuf },
    /// Sync all configured source directories.
    Sync,
    /// Search indexed memory.
    Search {
        query: String,
        /// Number of results; 0 uses the configured default.
        #[arg(long, default_value_t = 0)]
        top_k: usize,
        /// Print results as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show index statistics.
    Status {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Drop the oldest embedding cache rows.
    PruneCache {
        /// Number of most recent rows to keep.
        #[arg(long)]
        keep: usize,
    },
    /// Keep the index in sync with the source directories until interrupted.
    #[cfg(feature = "file-watcher")]
    Watch,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(explicit: Option<&Path>) -> anyhow::Result<MemoryConfig> {
    let path = explicit.map(Path::to_path_buf).or_else(MemoryConfig::discover);
    match path {
        Some(path) => MemoryConfig::load(&path),
        None => {
            debug!("no config file found, using defaults");
            let config = MemoryConfig {
                embedding_api_key: std::env::var("OPENAI_API_KEY")
                    .ok()
                    .filter(|k| !k.is_empty()),
                ..Default::default()
            };
            config.validate()?;
            Ok(config)
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "mnemo starting");

    let config = load_config(cli.config.as_deref())?;
    let manager = MemoryManager::open(config).await?;

    match cli.command {
        Commands::Index { path } => memory_commands::index(&manager, &path).await,
        Commands::Sync => memory_commands::sync(&manager).await,
        Commands::Search { query, top_k, json } => {
            memory_commands::search(&manager, &query, top_k, json).await
        },
        Commands::Status { json } => memory_commands::status(&manager, json).await,
        Commands::PruneCache { keep } => memory_commands::prune_cache(&manager, keep).await,
        #[cfg(feature = "file-watcher")]
        Commands::Watch => memory_commands::watch(&manager).await,
    }
}
