//! Batch orchestration for npcspawn.
//!
//! One situation fans out to many characters at once. The [`Orchestrator`]
//! resolves each target, routes it to a fallback chain, dispatches every
//! target concurrently under one cancellation token, and folds the results
//! back into a [`BatchResult`] in input order.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use npcspawn_config::{CliArgs, Config};
//! use npcspawn_llm::HttpTransport;
//! use npcspawn_orchestrator::Orchestrator;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::discover(&CliArgs::default())?;
//!     let orchestrator = Orchestrator::from_config(&config, Arc::new(HttpTransport::new()));
//!
//!     let result = orchestrator
//!         .spawn(&["Alice", "Bob"], "The door bursts open")
//!         .await?;
//!     println!("{}", result.summary);
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod collaborators;
pub mod coordinator;
pub mod error;
pub mod orchestrator;
pub mod outcome;

pub use aggregate::aggregate;
pub use collaborators::{
    ConfigResolver, PayloadBuilder, PayloadError, ResolvedTarget, Resolver, TemplatePayloadBuilder,
};
pub use coordinator::{BatchCoordinator, BatchHandle, BatchState};
pub use error::SpawnError;
pub use orchestrator::Orchestrator;
pub use outcome::{BatchResult, BatchStats, Outcome, OutcomeRecord};
