//! Configuration for npcspawn.
//!
//! Backend profiles, the tier routing table, backoff parameters and request
//! defaults all live in one TOML file. The dispatch core only ever reads the
//! resulting [`Config`]; editing and persisting it belongs to callers.

mod config;

pub use config::{
    BackendProfile, CharactersConfig, CliArgs, Config, Defaults, EndpointKind,
    MAX_DELAY_CEILING_SECS, RateLimitConfig, RoutingConfig, CONFIG_DIR_NAME, CONFIG_FILE_NAME,
    HOME_ENV_VAR,
};
pub use npcspawn_utils::error::ConfigError;
pub use npcspawn_utils::types::{SpawnFormat, Tier};
