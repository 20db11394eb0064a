//! CLI entry point and dispatch logic
//!
//! `run()` owns all output, errors included. main.rs only maps the returned
//! code to the process exit status.

use clap::Parser;

use npcspawn_config::{Config, ConfigError};
use npcspawn_orchestrator::SpawnError;
use npcspawn_utils::error::UserFriendlyError;
use npcspawn_utils::exit_codes::ExitCode;
use npcspawn_utils::logging::init_tracing;
use npcspawn_utils::redaction::redact_error_message;

use super::args::{Cli, Commands};
use super::commands;

/// Main CLI execution function.
///
/// Returns `Err(ExitCode)` for every non-zero exit after printing why.
pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("✗ Failed to initialize logging: {e}");
    }

    let cli_args = cli.to_cli_args();
    let config = match Config::discover(&cli_args) {
        Ok(config) => config,
        Err(err) => {
            report_error(&err);
            return Err(ExitCode::CONFIG);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("✗ Failed to create async runtime: {e}");
            return Err(ExitCode::INTERNAL);
        }
    };

    let result = rt.block_on(async {
        match cli.command {
            Commands::Spawn {
                situation,
                targets,
                json,
                ..
            } => commands::execute_spawn_command(&config, &targets, &situation, json).await,
            Commands::Chains { json } => commands::execute_chains_command(&config, json),
        }
    });

    match result {
        Ok(code) if code == ExitCode::SUCCESS => Ok(()),
        Ok(code) => Err(code),
        Err(error) => {
            report_error(&error);
            Err(exit_code_for(&error))
        }
    }
}

fn report_error(error: &anyhow::Error) {
    if let Some(config_error) = error.downcast_ref::<ConfigError>() {
        eprintln!("✗ {}", config_error.display_for_user());
    } else if let Some(spawn_error) = error.downcast_ref::<SpawnError>() {
        eprintln!("✗ {}", spawn_error.display_for_user());
    } else {
        eprintln!("✗ {}", redact_error_message(&format!("{error:#}")));
        eprintln!("  Run with --verbose for more detailed output");
    }
}

/// Invalid input maps to the configuration code; anything else is internal.
pub(crate) fn exit_code_for(error: &anyhow::Error) -> ExitCode {
    if error.downcast_ref::<ConfigError>().is_some() || error.downcast_ref::<SpawnError>().is_some()
    {
        ExitCode::CONFIG
    } else {
        ExitCode::INTERNAL
    }
}
