//! `aigw` command-line entry point.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `aigw init` | Create the database, schema and media directory |
//! | `aigw serve` | Run the HTTP gateway |
//! | `aigw models` | Print models available on the generation server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ai_gateway::config;
use ai_gateway::generation::{Generator, OllamaGenerator};
use ai_gateway::media::MediaStore;
use ai_gateway::migrate;
use ai_gateway::server;

/// AI Gateway CLI.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/gateway.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "aigw",
    about = "AI Gateway: chat, vision, speech, translation, RAG and voice chat over HTTP",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/gateway.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and media directory.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Start the HTTP gateway on `[server].bind`.
    Serve,

    /// List models available on the generation server.
    Models,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ai_gateway=info,aigw=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            MediaStore::new(&cfg.media)?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Models => {
            let generator = OllamaGenerator::new(&cfg.generation)?;
            let models = generator.list_models().await?;
            match models.get("models").and_then(|m| m.as_array()) {
                Some(list) if !list.is_empty() => {
                    for model in list {
                        let name = model
                            .get("name")
                            .and_then(|n| n.as_str())
                            .unwrap_or("<unnamed>");
                        println!("{}", name);
                    }
                }
                _ => println!("No models available on {}", cfg.generation.url),
            }
        }
    }

    Ok(())
}
