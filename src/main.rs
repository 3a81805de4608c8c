//! markflow - declarative workflow engine
//!
//! Loads workflows from configuration and drives records through them, either
//! with one-shot commands or from an interactive REPL.

mod commands;
mod config;
mod loader;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use config::Config;
use loader::Runtime;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "markflow")]
#[command(about = "Drive records through declarative workflows")]
#[command(version)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, env = "MARKFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Start interactive REPL
    Repl,

    /// Validate a definition file (JSON or YAML)
    Validate {
        /// Definition file
        file: PathBuf,
    },

    /// List configured workflows
    Workflows,

    /// Show a workflow definition
    Show {
        /// Workflow name, e.g. article@status
        workflow: String,
    },

    /// Create a record and put it in its initial marking
    Create {
        /// Subject type
        subject_type: String,

        /// Record ID (optional, auto-generated if not provided)
        #[arg(short, long)]
        id: Option<String>,

        /// Initial fields JSON (or @file.json to read from file)
        #[arg(short, long)]
        fields: Option<String>,

        /// Workflow name, required when several match
        #[arg(short, long)]
        workflow: Option<String>,
    },

    /// List records
    List {
        /// Only records of this type
        subject_type: Option<String>,
    },

    /// Show a record's marking
    Marking {
        /// Record ID
        id: String,

        #[arg(short, long)]
        workflow: Option<String>,
    },

    /// Check whether a transition can be applied
    Can {
        /// Record ID
        id: String,

        /// Transition name
        transition: String,

        #[arg(short, long)]
        workflow: Option<String>,
    },

    /// List enabled transitions
    Enabled {
        /// Record ID
        id: String,

        #[arg(short, long)]
        workflow: Option<String>,
    },

    /// Apply a transition
    Apply {
        /// Record ID
        id: String,

        /// Transition name
        transition: String,

        /// Context JSON stored with the new marking (or @file.json)
        #[arg(short, long)]
        context: Option<String>,

        #[arg(short, long)]
        workflow: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    // Validation needs no configuration
    if let Some(Commands::Validate { file }) = &cli.command {
        return match commands::validate(file) {
            Ok(output) => {
                println!("{}", output);
                Ok(())
            }
            Err(e) => {
                eprintln!("{}: {}", "Invalid".red(), e);
                std::process::exit(1);
            }
        };
    }

    let config = Config::load(cli.config.as_deref()).map_err(|e| {
        tracing::error!("Failed to load config: {}", e);
        e
    })?;
    if let Some(path) = &cli.config {
        tracing::info!("Loaded config from {}", path.display());
    }

    let runtime = Runtime::load(&config)?;

    match cli.command {
        Some(Commands::Repl) | None => repl::run(&runtime)?,
        Some(cmd) => match commands::execute(&runtime, cmd) {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
