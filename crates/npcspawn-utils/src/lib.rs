//! Foundation utilities shared by the npcspawn crates.
//!
//! Nothing in here knows about backends or batches; it only carries the
//! cross-cutting pieces (error presentation, exit codes, tracing setup and
//! secret redaction) every other crate leans on.

pub mod error;
pub mod exit_codes;
pub mod logging;
pub mod redaction;
pub mod types;

pub use error::{ConfigError, ErrorCategory, UserFriendlyError};
pub use exit_codes::ExitCode;
pub use types::{SpawnFormat, Tier};
