//! Parley CLI — the main entry point.
//!
//! Commands:
//! - `turn`    — Run one conversation turn through the full pipeline
//! - `resolve` — Show which generation config a user/persona resolves to
//! - `budget`  — Show how a context window would be divided
//! - `config`  — Print the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "parley",
    about = "Parley — LLM conversation orchestration",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file to use instead of ~/.parley/config.toml
    #[arg(short, long, global = true, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one turn: resolve config, budget the context, invoke the model
    Turn {
        /// User id; omit for an anonymous turn
        #[arg(short, long)]
        user: Option<String>,

        #[arg(short, long, default_value = parley_config::DEFAULT_PERSONA)]
        persona: String,

        /// The user's message
        #[arg(short, long)]
        message: String,

        /// File holding the rendered system prompt
        #[arg(long)]
        system_file: Option<PathBuf>,

        /// JSON file with prior turns: [{"role": "user", "content": "..."}]
        #[arg(long)]
        history_file: Option<PathBuf>,

        /// Use the provider-wide free default config
        #[arg(long)]
        free: bool,

        /// Resolve against an empty in-memory store
        #[arg(long)]
        ephemeral: bool,

        /// Print the full turn output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the resolved generation config as JSON
    Resolve {
        #[arg(short, long)]
        user: Option<String>,

        #[arg(short, long, default_value = parley_config::DEFAULT_PERSONA)]
        persona: String,

        /// Resolve the free default instead
        #[arg(long)]
        free: bool,

        #[arg(long)]
        ephemeral: bool,
    },

    /// Print how a context window would be split for a turn
    Budget {
        /// Context window size in tokens
        #[arg(short, long)]
        window: usize,

        #[arg(long)]
        system_file: Option<PathBuf>,

        #[arg(short, long)]
        message: String,

        /// JSON file with prior turns: [{"role": "user", "content": "..."}]
        #[arg(long)]
        history_file: Option<PathBuf>,
    },

    /// Print the effective configuration with secrets redacted
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Turn {
            user,
            persona,
            message,
            system_file,
            history_file,
            free,
            ephemeral,
            json,
        } => {
            commands::turn::run(
                &config,
                commands::turn::TurnArgs {
                    user,
                    persona,
                    message,
                    system_file,
                    history_file,
                    free,
                    ephemeral,
                    json,
                },
            )
            .await?
        }
        Commands::Resolve {
            user,
            persona,
            free,
            ephemeral,
        } => commands::resolve::run(&config, user, &persona, free, ephemeral).await?,
        Commands::Budget {
            window,
            system_file,
            message,
            history_file,
        } => commands::budget::run(window, system_file, &message, history_file)?,
        Commands::Config => commands::config_cmd::show(&config),
    }

    Ok(())
}
