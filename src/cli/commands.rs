//! CLI command implementations

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

use npcspawn_config::Config;
use npcspawn_llm::HttpTransport;
use npcspawn_orchestrator::{BatchResult, Orchestrator};
use npcspawn_utils::exit_codes::ExitCode;
use npcspawn_utils::types::Tier;

// ============================================================================
// Spawn Command
// ============================================================================

/// Run one batch against the real HTTP backends.
///
/// Ctrl-C cancels the batch; whatever finished first is still printed.
pub async fn execute_spawn_command(
    config: &Config,
    targets: &[String],
    situation: &str,
    json: bool,
) -> Result<ExitCode> {
    let orchestrator = Orchestrator::from_config(config, Arc::new(HttpTransport::new()));

    let spawn = orchestrator.spawn(targets, situation);
    tokio::pin!(spawn);

    let result = tokio::select! {
        result = &mut spawn => result?,
        Ok(()) = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling batch");
            orchestrator.cancel_active();
            spawn.await?
        }
    };

    print_batch(&result, json)?;
    Ok(exit_code_for_batch(&result))
}

fn print_batch(result: &BatchResult, json: bool) -> Result<()> {
    if json {
        let rendered =
            serde_json::to_string_pretty(result).context("Failed to serialize batch result")?;
        println!("{rendered}");
    } else if !result.summary.is_empty() {
        println!("{}", result.summary);
    }
    Ok(())
}

pub(crate) fn exit_code_for_batch(result: &BatchResult) -> ExitCode {
    if result.all_failed() {
        ExitCode::ALL_FAILED
    } else {
        ExitCode::SUCCESS
    }
}

// ============================================================================
// Chains Command
// ============================================================================

/// Print the fallback chain each tier resolves to.
///
/// An empty chain means every target of that tier goes to the default backend.
pub fn execute_chains_command(config: &Config, json: bool) -> Result<ExitCode> {
    let orchestrator = Orchestrator::from_config(config, Arc::new(HttpTransport::new()));
    let chains = orchestrator.describe_chains();
    let fallback = &config.default_backend.name;

    if json {
        let rendered = serde_json::to_string_pretty(&chains_json(&chains, fallback))
            .context("Failed to serialize chains")?;
        println!("{rendered}");
    } else if chains.is_empty() {
        println!("No tiers configured; every character uses {fallback}");
    } else {
        for line in chains_lines(&chains, fallback) {
            println!("{line}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub(crate) fn chains_lines(chains: &[(Tier, Vec<String>)], fallback: &str) -> Vec<String> {
    chains
        .iter()
        .map(|(tier, names)| {
            if names.is_empty() {
                format!("{tier}: (default: {fallback})")
            } else {
                format!("{tier}: {}", names.join(" -> "))
            }
        })
        .collect()
}

fn chains_json(chains: &[(Tier, Vec<String>)], fallback: &str) -> Value {
    let tiers: Map<String, Value> = chains
        .iter()
        .map(|(tier, names)| (tier.to_string(), Value::from(names.clone())))
        .collect();
    serde_json::json!({
        "default_backend": fallback,
        "tiers": tiers,
    })
}
