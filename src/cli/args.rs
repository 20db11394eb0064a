//! CLI argument definitions and parsing structures

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use npcspawn_config::CliArgs;
use npcspawn_utils::types::SpawnFormat;

/// npcspawn - fan one situation out to many characters at once
#[derive(Parser, Debug)]
#[command(name = "npcspawn")]
#[command(about = "Generate concurrent character reactions through tiered LLM backends")]
#[command(long_about = r#"
npcspawn sends one scene situation to every named character at the same time.
Each character is routed to a fallback chain of backend profiles chosen by its
tier, rate-limited profiles are skipped, and the results come back in the order
the characters were given.

EXAMPLES:
  # Two characters react to the same event
  npcspawn spawn "The door bursts open" --target Alice --target Bob

  # Dialogue only, as JSON
  npcspawn spawn "A stranger asks for directions" -t Guard --format dialogue --json

  # Show which profiles each tier will try, in order
  npcspawn chains

CONFIGURATION:
  Configuration is loaded with precedence: CLI flags > config file > defaults
  Config file is --config, else $NPCSPAWN_HOME/config.toml, else the first
  .npcspawn/config.toml found searching upward from the current directory

EXIT CODES:
  0  batch finished (some characters may still have failed)
  1  internal error
  2  invalid configuration or arguments
  3  every character failed
"#)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate one reaction per target for a situation
    Spawn {
        /// Scene text every character reacts to
        situation: String,

        /// Character name; repeat for each character
        #[arg(short = 't', long = "target", value_name = "NAME")]
        targets: Vec<String>,

        /// Output shape: narrative, dialogue or action
        #[arg(long)]
        format: Option<SpawnFormat>,

        /// Per-request timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Print the full batch result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the resolved fallback chain for each configured tier
    Chains {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Overrides handed to configuration discovery
    #[must_use]
    pub fn to_cli_args(&self) -> CliArgs {
        let (format, timeout_secs) = match &self.command {
            Commands::Spawn {
                format,
                timeout_secs,
                ..
            } => (*format, *timeout_secs),
            Commands::Chains { .. } => (None, None),
        };
        CliArgs {
            config_path: self.config.clone(),
            format,
            timeout_secs,
        }
    }
}
