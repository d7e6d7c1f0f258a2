//! Phrasal CLI
//!
//! Generates intent/entity training data from `.phrasal` grammars.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// Phrasal - combinatorial training data generator
#[derive(Parser)]
#[command(name = "phrasal")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path (defaults to phrasal.yaml next to the grammar)
    #[arg(short, long)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate utterances from a grammar
    Generate {
        /// Grammar file (.phrasal)
        grammar: String,

        /// Output directory (defaults to <grammar dir>/<grammar name>)
        #[arg(short, long)]
        out: Option<String>,

        /// Utterances per intent (defaults to every distinct utterance)
        #[arg(short, long)]
        samples: Option<usize>,

        /// Fraction of each intent reserved for testing
        #[arg(long)]
        test_fraction: Option<f64>,

        /// Seed for reproducible sampling
        #[arg(long, env = "PHRASAL_SEED")]
        seed: Option<u64>,

        /// Intents generated concurrently
        #[arg(short, long)]
        workers: Option<usize>,

        /// Stop generating after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Parse and validate a grammar without generating
    Validate {
        /// Grammar file (.phrasal)
        grammar: String,
    },

    /// Create an example grammar and configuration
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,

        /// Grammar name (defaults to directory name)
        #[arg(short, long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Generate {
            grammar,
            out,
            samples,
            test_fraction,
            seed,
            workers,
            timeout_secs,
        } => {
            let options = commands::generate::Options {
                out,
                samples,
                test_fraction,
                seed,
                workers,
                timeout_secs,
            };
            commands::generate::run(cli.config.as_deref(), &grammar, options).await?;
        }
        Commands::Validate { grammar } => {
            commands::validate::run(cli.config.as_deref(), &grammar).await?;
        }
        Commands::Init { path, name } => {
            commands::init::run(&path, name.as_deref()).await?;
        }
    }

    Ok(())
}
