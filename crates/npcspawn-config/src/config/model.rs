use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use npcspawn_utils::types::{SpawnFormat, Tier};

/// Configuration for npcspawn.
///
/// Built by [`Config::discover`] (file + defaults) or constructed directly for
/// embedding and tests.
///
/// # Configuration File Format
///
/// ```toml
/// [defaults]
/// tier = "standard"
/// format = "narrative"
/// timeout_secs = 120
///
/// [default_backend]
/// name = "local"
/// kind = "openai"
/// base_url = "http://localhost:5001/v1/chat/completions"
///
/// [[profiles]]
/// name = "claude-fast"
/// kind = "anthropic"
/// model = "claude-haiku"
/// api_key_env = "ANTHROPIC_API_KEY"
///
/// [tiers]
/// major = ["claude-fast", "local"]
///
/// [rate_limit]
/// base_delay_secs = 5
/// max_delay_secs = 300
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Request defaults
    pub defaults: Defaults,
    /// Profile used when a tier has no configured chain
    pub default_backend: BackendProfile,
    /// Named backend profiles chains may refer to
    pub profiles: Vec<BackendProfile>,
    /// Tier to ordered profile names; names are resolved at chain-build time
    pub tiers: BTreeMap<Tier, Vec<String>>,
    /// Backoff parameters
    pub rate_limit: RateLimitConfig,
    /// Chain resolution switches
    pub routing: RoutingConfig,
    /// Character table used by the bundled resolver
    pub characters: CharactersConfig,
    /// File the values were loaded from, if any
    pub source: Option<PathBuf>,
}

/// Default values for requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    /// Tier assumed for characters the resolver knows nothing about
    pub tier: Option<Tier>,
    pub format: Option<SpawnFormat>,
    pub timeout_secs: Option<u64>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            tier: Some(Tier::Standard),
            format: Some(SpawnFormat::Narrative),
            timeout_secs: Some(120),
            max_tokens: Some(400),
            temperature: Some(0.8),
        }
    }
}

/// Wire protocol spoken by a backend endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum EndpointKind {
    /// OpenAI-compatible chat completions (OpenRouter, llama.cpp, vLLM, ...)
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    /// Anthropic Messages API
    #[serde(rename = "anthropic")]
    Anthropic,
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
        }
    }
}

/// One remote generation endpoint.
///
/// `name` is the identity: rate-limit state is keyed by it, and tier chains
/// refer to profiles by it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BackendProfile {
    pub name: String,
    #[serde(default)]
    pub kind: EndpointKind,
    /// Full request URL; falls back to the public endpoint for `kind`
    pub base_url: Option<String>,
    /// HTTP(S) proxy for requests to this profile
    pub proxy: Option<String>,
    pub model: Option<String>,
    /// Environment variable holding the API key; no auth header when unset
    pub api_key_env: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl BackendProfile {
    /// A profile with only a name and endpoint kind set
    #[must_use]
    pub fn new(name: impl Into<String>, kind: EndpointKind) -> Self {
        Self {
            name: name.into(),
            kind,
            base_url: None,
            proxy: None,
            model: None,
            api_key_env: None,
            max_tokens: None,
            temperature: None,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    #[must_use]
    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = Some(var.into());
        self
    }
}

impl Default for BackendProfile {
    fn default() -> Self {
        Self::new("default", EndpointKind::OpenAi)
    }
}

/// Exponential backoff parameters for rate-limited profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

/// Largest backoff window, in seconds, a configuration may ask for
pub const MAX_DELAY_CEILING_SECS: u64 = 86_400;

fn default_base_delay_secs() -> u64 {
    5
}

fn default_max_delay_secs() -> u64 {
    300
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

impl RateLimitConfig {
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_secs)
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}

/// Chain resolution switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RoutingConfig {
    /// Resolve near-miss profile names in `[tiers]` (case, punctuation, partial names)
    #[serde(default = "default_fuzzy_match")]
    pub fuzzy_match: bool,
}

fn default_fuzzy_match() -> bool {
    true
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            fuzzy_match: default_fuzzy_match(),
        }
    }
}

/// Character table for the bundled config-driven resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharactersConfig {
    /// When true, names missing from `tiers` are unknown rather than defaulted
    pub strict: bool,
    /// Character name to tier
    pub tiers: BTreeMap<String, Tier>,
}

impl Config {
    /// Built-in defaults with no profiles and no tier chains
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            defaults: Defaults::default(),
            default_backend: BackendProfile::default(),
            profiles: Vec::new(),
            tiers: BTreeMap::new(),
            rate_limit: RateLimitConfig::default(),
            routing: RoutingConfig::default(),
            characters: CharactersConfig::default(),
            source: None,
        }
    }

    /// Tier used when nothing more specific is known
    #[must_use]
    pub fn default_tier(&self) -> Tier {
        self.defaults.tier.unwrap_or(Tier::Standard)
    }

    #[must_use]
    pub fn default_format(&self) -> SpawnFormat {
        self.defaults.format.unwrap_or_default()
    }

    /// Per-request timeout handed to the transport
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.defaults.timeout_secs.unwrap_or(120))
    }

    /// Find a profile by exact name
    #[must_use]
    pub fn profile(&self, name: &str) -> Option<&BackendProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }
}
