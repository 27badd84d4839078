use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use docs_rag::commands::{ask_question, build_or_load_index, run_chat, show_status};
use docs_rag::config::{Config, run_interactive_config, show_config};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docs-rag")]
#[command(about = "Answer questions about a local document folder with a retrieval-augmented local LLM")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama, the document folder and the index
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Build the index from the document folder, or load it if present
    Index {
        /// Delete the existing index first
        #[arg(long)]
        rebuild: bool,
    },
    /// Ask a single question
    Ask {
        /// The question to answer
        question: String,
    },
    /// Start an interactive chat with conversation memory
    Chat,
    /// Show index and model status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => Config::config_dir().context("Failed to locate the configuration directory")?,
    };

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&Config::load(&config_dir)?);
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Index { rebuild } => {
            build_or_load_index(Config::load(&config_dir)?, rebuild).await?;
        }
        Commands::Ask { question } => {
            ask_question(Config::load(&config_dir)?, &question).await?;
        }
        Commands::Chat => {
            run_chat(Config::load(&config_dir)?).await?;
        }
        Commands::Status => {
            show_status(&Config::load(&config_dir)?)?;
        }
    }

    Ok(())
}
