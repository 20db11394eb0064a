mod discovery;
mod model;
mod validation;

pub use model::{
    BackendProfile, CharactersConfig, Config, Defaults, EndpointKind, MAX_DELAY_CEILING_SECS,
    RateLimitConfig, RoutingConfig,
};

use std::path::PathBuf;

use npcspawn_utils::types::SpawnFormat;

/// Directory searched for upward from the working directory
pub const CONFIG_DIR_NAME: &str = ".npcspawn";

/// File name inside [`CONFIG_DIR_NAME`] or `$NPCSPAWN_HOME`
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable pointing at a directory that holds `config.toml`
pub const HOME_ENV_VAR: &str = "NPCSPAWN_HOME";

/// Command-line overrides applied on top of the config file.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    /// Explicit config file; skips discovery when set
    pub config_path: Option<PathBuf>,
    /// Overrides `[defaults] format`
    pub format: Option<SpawnFormat>,
    /// Overrides `[defaults] timeout_secs`
    pub timeout_secs: Option<u64>,
}
