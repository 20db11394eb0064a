//! Command-line interface for npcspawn
//!
//! ## Module Structure
//!
//! - `args`: CLI argument definitions (clap)
//! - `run`: entry point, config discovery and error output
//! - `commands`: the `spawn` and `chains` handlers

pub mod args;
mod commands;
mod run;


pub use args::{Cli, Commands};
pub use run::run;
