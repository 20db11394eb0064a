use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use npcspawn_utils::error::ConfigError;
use npcspawn_utils::types::Tier;

use super::{
    BackendProfile, CharactersConfig, CliArgs, Config, Defaults, RateLimitConfig, RoutingConfig,
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, HOME_ENV_VAR,
};

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    defaults: Option<Defaults>,
    default_backend: Option<BackendProfile>,
    profiles: Option<Vec<BackendProfile>>,
    tiers: Option<BTreeMap<String, Vec<String>>>,
    rate_limit: Option<RateLimitConfig>,
    routing: Option<RoutingConfig>,
    characters: Option<TomlCharacters>,
}

/// `[characters]` mixes the `strict` switch with free-form name keys
#[derive(Debug, Default, Deserialize)]
struct TomlCharacters {
    #[serde(default)]
    strict: bool,
    #[serde(flatten)]
    entries: BTreeMap<String, String>,
}

impl Config {
    /// Discover and load configuration with precedence: CLI > file > defaults
    ///
    /// Uses the current working directory for the upward search when no
    /// explicit path is given.
    pub fn discover(cli_args: &CliArgs) -> Result<Self> {
        let start_dir = std::env::current_dir().context("Failed to get current directory")?;
        Self::discover_from(&start_dir, cli_args)
    }

    /// Discover and load configuration starting from a specific directory
    ///
    /// Lookup order: `cli_args.config_path`, then `$NPCSPAWN_HOME/config.toml`,
    /// then `.npcspawn/config.toml` in `start_dir` or any parent up to the
    /// repository root. No file at all means built-in defaults.
    pub fn discover_from(start_dir: &Path, cli_args: &CliArgs) -> Result<Self> {
        let config_path = if let Some(explicit_path) = &cli_args.config_path {
            if !explicit_path.exists() {
                return Err(ConfigError::NotFound {
                    path: explicit_path.display().to_string(),
                }
                .into());
            }
            Some(explicit_path.clone())
        } else if let Some(home_path) = Self::home_config_path() {
            Some(home_path)
        } else {
            Self::discover_config_file_from(start_dir)?
        };

        let mut config = match &config_path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                let mut config = Self::from_toml_str(&content)
                    .with_context(|| format!("Failed to load config file: {}", path.display()))?;
                config.source = Some(path.clone());
                config
            }
            None => {
                debug!("No config file found, using built-in defaults");
                Self::builtin()
            }
        };

        if let Some(format) = cli_args.format {
            config.defaults.format = Some(format);
        }
        if let Some(timeout_secs) = cli_args.timeout_secs {
            config.defaults.timeout_secs = Some(timeout_secs);
        }

        config.validate()?;

        debug!(
            source = ?config.source,
            profiles = config.profiles.len(),
            tiers = config.tiers.len(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Parse a TOML document and layer it over the built-in defaults.
    ///
    /// The result is not validated; [`Config::discover_from`] does that after
    /// CLI overrides are applied.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file_config: TomlConfig = toml::from_str(content)
            .map_err(|e| ConfigError::InvalidFile(e.message().to_string()))?;

        let mut config = Self::builtin();

        if let Some(file_defaults) = file_config.defaults {
            if file_defaults.tier.is_some() {
                config.defaults.tier = file_defaults.tier;
            }
            if file_defaults.format.is_some() {
                config.defaults.format = file_defaults.format;
            }
            if file_defaults.timeout_secs.is_some() {
                config.defaults.timeout_secs = file_defaults.timeout_secs;
            }
            if file_defaults.max_tokens.is_some() {
                config.defaults.max_tokens = file_defaults.max_tokens;
            }
            if file_defaults.temperature.is_some() {
                config.defaults.temperature = file_defaults.temperature;
            }
        }

        if let Some(default_backend) = file_config.default_backend {
            config.default_backend = default_backend;
        }
        if let Some(profiles) = file_config.profiles {
            config.profiles = profiles;
        }
        if let Some(tiers) = file_config.tiers {
            for (key, names) in tiers {
                let tier = parse_tier(&format!("tiers.{key}"), &key)?;
                config.tiers.insert(tier, names);
            }
        }
        if let Some(rate_limit) = file_config.rate_limit {
            config.rate_limit = rate_limit;
        }
        if let Some(routing) = file_config.routing {
            config.routing = routing;
        }
        if let Some(characters) = file_config.characters {
            let mut tiers = BTreeMap::new();
            for (name, tier) in characters.entries {
                let parsed = parse_tier(&format!("characters.{name}"), &tier)?;
                tiers.insert(name, parsed);
            }
            config.characters = CharactersConfig {
                strict: characters.strict,
                tiers,
            };
        }

        Ok(config)
    }

    /// `$NPCSPAWN_HOME/config.toml`, when the variable is set and the file exists
    fn home_config_path() -> Option<PathBuf> {
        let home = std::env::var_os(HOME_ENV_VAR)?;
        let path = PathBuf::from(home).join(CONFIG_FILE_NAME);
        path.exists().then_some(path)
    }

    /// Search upward from `start_dir` for `.npcspawn/config.toml`
    ///
    /// Stops at the filesystem root or at the first directory that looks like
    /// a repository root.
    pub fn discover_config_file_from(start_dir: &Path) -> Result<Option<PathBuf>> {
        let mut current_dir = start_dir.to_path_buf();

        loop {
            let config_path = current_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Ok(Some(config_path));
            }

            if current_dir.join(".git").exists() || current_dir.join(".hg").exists() {
                break;
            }

            match current_dir.parent() {
                Some(parent) => current_dir = parent.to_path_buf(),
                None => break,
            }
        }

        Ok(None)
    }
}

fn parse_tier(key: &str, value: &str) -> Result<Tier, ConfigError> {
    value.parse::<Tier>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: format!("unknown tier '{value}'"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EndpointKind;

    const SAMPLE: &str = r#"
[defaults]
tier = "minor"
timeout_secs = 30

[default_backend]
name = "local"
base_url = "http://localhost:5001/v1/chat/completions"

[[profiles]]
name = "claude-fast"
kind = "anthropic"
model = "claude-haiku"
api_key_env = "ANTHROPIC_API_KEY"

[[profiles]]
name = "router"
model = "mistral-small"
proxy = "http://proxy.internal:8080"

[tiers]
Major = ["claude-fast", "router"]
minor = ["router"]

[rate_limit]
base_delay_secs = 2

[characters]
strict = true
Alice = "major"
"Old Tom" = "minor"
"#;

    #[test]
    fn test_from_toml_str_layers_over_defaults() {
        let config = Config::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.default_tier(), Tier::Minor);
        assert_eq!(config.defaults.timeout_secs, Some(30));
        // Untouched defaults survive
        assert_eq!(config.defaults.max_tokens, Some(400));

        assert_eq!(config.default_backend.name, "local");
        assert_eq!(config.default_backend.kind, EndpointKind::OpenAi);

        assert_eq!(config.profiles.len(), 2);
        assert_eq!(config.profiles[0].kind, EndpointKind::Anthropic);
        assert_eq!(
            config.profiles[1].proxy.as_deref(),
            Some("http://proxy.internal:8080")
        );

        assert_eq!(
            config.tiers.get(&Tier::Major).unwrap(),
            &vec!["claude-fast".to_string(), "router".to_string()]
        );
        assert_eq!(config.rate_limit.base_delay_secs, 2);
        assert_eq!(config.rate_limit.max_delay_secs, 300);

        assert!(config.characters.strict);
        assert_eq!(config.characters.tiers.get("Old Tom"), Some(&Tier::Minor));
    }

    #[test]
    fn test_unknown_tier_key_is_rejected() {
        let err = Config::from_toml_str("[tiers]\nlegendary = [\"x\"]\n").unwrap_err();
        let config_err = err.downcast_ref::<ConfigError>().unwrap();
        assert!(matches!(config_err, ConfigError::InvalidValue { key, .. } if key == "tiers.legendary"));
    }

    #[test]
    fn test_invalid_toml_reports_invalid_file() {
        let err = Config::from_toml_str("[defaults\ntier = ").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::InvalidFile(_))
        ));
    }

    #[test]
    fn test_unknown_section_is_rejected() {
        assert!(Config::from_toml_str("[llm]\nprovider = \"x\"\n").is_err());
    }
}
