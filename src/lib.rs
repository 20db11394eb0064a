//! npcspawn - concurrent character reactions over tiered LLM backends
//!
//! One scene situation fans out to many characters at once. Each character is
//! routed by tier to an ordered fallback chain of backend profiles; profiles
//! that answered 429 are skipped until their backoff expires, and results come
//! back in input order with per-character outcomes.
//!
//! npcspawn can be used in two ways:
//! - **CLI**: `npcspawn spawn "<situation>" --target Alice --target Bob`
//! - **Library**: build an [`Orchestrator`] from a [`Config`] and call
//!   [`Orchestrator::spawn`]
//!
//! # Quick Start (Library)
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use npcspawn::{CliArgs, Config, HttpTransport, Orchestrator};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = Config::discover(&CliArgs::default())?;
//! let orchestrator = Orchestrator::from_config(&config, Arc::new(HttpTransport::new()));
//! let result = orchestrator.spawn(&["Alice", "Bob"], "A wolf howls nearby").await?;
//! for record in &result.outcomes {
//!     println!("{}: {:?}", record.target_name, record.text());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Crates
//!
//! - `npcspawn-utils`: exit codes, error presentation, tracing, redaction
//! - `npcspawn-config`: TOML configuration and discovery
//! - `npcspawn-llm`: rate limiter, router, transport and dispatcher
//! - `npcspawn-orchestrator`: batches, cancellation and aggregation

pub mod cli;

pub use npcspawn_config::{BackendProfile, CliArgs, Config, ConfigError, EndpointKind};
pub use npcspawn_llm::{
    DispatchError, DispatchOptions, Dispatcher, ErrorKind, Generation, HttpTransport, Message,
    RateLimiter, RequestPayload, Role, Router, Transport,
};
pub use npcspawn_orchestrator::{
    BatchResult, BatchState, BatchStats, ConfigResolver, Orchestrator, Outcome, OutcomeRecord,
    PayloadBuilder, Resolver, SpawnError, TemplatePayloadBuilder,
};
pub use npcspawn_utils::exit_codes::ExitCode;
pub use npcspawn_utils::types::{SpawnFormat, Tier};
