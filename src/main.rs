//! # Document Q&A CLI (`docqa`)
//!
//! The `docqa` binary runs the session-scoped document Q&A service.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa init` | Write a starter config file and, when `[db]` is set, create the SQLite schema |
//! | `docqa serve` | Start the HTTP API server |

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docqa::config;
use docqa::persist::Persistence;
use docqa::server;

/// Starter configuration written by `docqa init`.
const CONFIG_TEMPLATE: &str = r#"[server]
bind = "127.0.0.1:8080"

# Uncomment to mirror document metadata and the query log to SQLite.
# [db]
# path = "data/docqa.sqlite"

[chunking]
chunk_size = 2000
overlap = 200
strategy = "recursive" # or "fixed"

[retrieval]
similarity_threshold = 0.0
max_results = 5

[embedding]
provider = "ollama" # or "openai" (OPENAI_API_KEY) / "gemini" (GOOGLE_API_KEY)
model = "nomic-embed-text"
dims = 768

[llm]
provider = "ollama"
model = "llama3"

[limits]
max_files_per_session = 20
max_file_size_mb = 10
max_pages_per_file = 1000

[session]
idle_timeout_secs = 1800
"#;

/// Session-scoped document Q&A over a retrieval-augmented pipeline.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file; `docqa init` writes a starter one.
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "Session-scoped document Q&A — upload documents, ask questions answered from their content",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./docqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration file.
    ///
    /// Refuses to overwrite an existing file unless `--force` is given.
    /// When the written (or existing) config has a `[db]` section the
    /// SQLite schema is created as well; running it again is safe.
    Init {
        /// Overwrite an existing configuration file.
        #[arg(long)]
        force: bool,
    },

    /// Start the HTTP API server.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// upload/query/history endpoints until the process is terminated.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            if cli.config.exists() && !force {
                bail!(
                    "config file {} already exists (use --force to overwrite)",
                    cli.config.display()
                );
            }
            std::fs::write(&cli.config, CONFIG_TEMPLATE)
                .with_context(|| format!("failed to write {}", cli.config.display()))?;
            println!("Wrote {}", cli.config.display());

            let cfg = config::load_config(&cli.config)?;
            if let Some(db) = &cfg.db {
                let persistence = Persistence::connect(db).await?;
                persistence.migrate().await?;
                println!("Database initialized at {}", db.path.display());
            }
        }
        Commands::Serve => {
            let cfg = config::load_config(&cli.config)?;
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
