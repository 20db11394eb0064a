//! Seams to the world outside the dispatch core.
//!
//! The orchestrator never decides who a character is or what prompt they get.
//! It asks a [`Resolver`] and a [`PayloadBuilder`]. The config-driven
//! implementations here are what the CLI ships with; embedders plug in their
//! own character store and prompt templates.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use npcspawn_config::Config;
use npcspawn_llm::{Message, RequestPayload};
use npcspawn_utils::types::{SpawnFormat, Tier};

/// A target name after lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// Canonical name as the resolver knows it
    pub name: String,
    /// Tier the resolver already associates with this target, if any
    pub tier_hint: Option<Tier>,
}

impl ResolvedTarget {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tier_hint: None,
        }
    }

    #[must_use]
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier_hint = Some(tier);
        self
    }
}

/// Maps target names to routable characters.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// `None` means the name is unknown and cannot be routed at all.
    async fn lookup(&self, name: &str) -> Option<ResolvedTarget>;

    /// Tier for a known target. Always answers; falls back to a default.
    async fn tier_for(&self, target: &ResolvedTarget) -> Tier;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("No prompt could be built for {target}: {reason}")]
    Template { target: String, reason: String },

    #[error("Situation is empty")]
    EmptySituation,
}

/// Produces the request sent on behalf of one target.
#[async_trait]
pub trait PayloadBuilder: Send + Sync {
    async fn build(
        &self,
        target: &ResolvedTarget,
        situation: &str,
        format: SpawnFormat,
    ) -> Result<RequestPayload, PayloadError>;
}

/// Resolver backed by the `[characters]` table.
///
/// Lookup is case-insensitive. Outside strict mode any non-blank name is
/// accepted and gets the default tier.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    /// Lowercased name to (canonical name, tier)
    characters: HashMap<String, (String, Tier)>,
    strict: bool,
    default_tier: Tier,
}

impl ConfigResolver {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config
                .characters
                .tiers
                .iter()
                .map(|(name, tier)| (name.clone(), *tier)),
            config.characters.strict,
            config.default_tier(),
        )
    }

    pub fn new(
        characters: impl IntoIterator<Item = (String, Tier)>,
        strict: bool,
        default_tier: Tier,
    ) -> Self {
        Self {
            characters: characters
                .into_iter()
                .map(|(name, tier)| (name.trim().to_lowercase(), (name, tier)))
                .collect(),
            strict,
            default_tier,
        }
    }
}

#[async_trait]
impl Resolver for ConfigResolver {
    async fn lookup(&self, name: &str) -> Option<ResolvedTarget> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        match self.characters.get(&name.to_lowercase()) {
            Some((canonical, tier)) => Some(ResolvedTarget::new(canonical.clone()).with_tier(*tier)),
            None if self.strict => None,
            None => Some(ResolvedTarget::new(name)),
        }
    }

    async fn tier_for(&self, target: &ResolvedTarget) -> Tier {
        target.tier_hint.unwrap_or(self.default_tier)
    }
}

/// Minimal prompt: a format-specific system message plus the situation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplatePayloadBuilder;

impl TemplatePayloadBuilder {
    fn system_prompt(name: &str, format: SpawnFormat) -> String {
        let instruction = match format {
            SpawnFormat::Narrative => format!(
                "Describe in two or three sentences of third-person prose how {name} reacts."
            ),
            SpawnFormat::Dialogue => {
                format!("Reply only with the words {name} says aloud, without narration.")
            }
            SpawnFormat::Action => {
                format!("Describe only what {name} physically does, in one short sentence.")
            }
        };
        format!("You are {name}, a character in an ongoing scene. Stay in character. {instruction}")
    }
}

#[async_trait]
impl PayloadBuilder for TemplatePayloadBuilder {
    async fn build(
        &self,
        target: &ResolvedTarget,
        situation: &str,
        format: SpawnFormat,
    ) -> Result<RequestPayload, PayloadError> {
        let situation = situation.trim();
        if situation.is_empty() {
            return Err(PayloadError::EmptySituation);
        }
        Ok(RequestPayload::new(vec![
            Message::system(Self::system_prompt(&target.name, format)),
            Message::user(situation),
        ]))
    }
}
