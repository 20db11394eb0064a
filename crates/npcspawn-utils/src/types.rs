//! Small shared vocabulary types.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, VariantNames};

/// Quality/cost bucket a generation request is routed by.
///
/// Tiers are ordered from most to least capable. The router maps each tier to
/// a fallback chain of backend profiles; how a character lands in a tier is
/// decided by whoever implements the resolver.
///
/// # Example
///
/// ```rust
/// use npcspawn_utils::types::Tier;
///
/// let tier: Tier = "Minor".parse().unwrap();
/// assert_eq!(tier, Tier::Minor);
/// assert_eq!(tier.as_str(), "minor");
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    VariantNames,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Tier {
    /// Reserved for the coordinating model that plans a scene
    Orchestrator,
    /// Named, plot-relevant characters
    Major,
    /// Recurring characters
    Standard,
    /// Background characters with a line or two
    Minor,
    /// Cheap housekeeping requests
    Utility,
}

impl Tier {
    /// Canonical lowercase name, as used in configuration keys
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Orchestrator => "orchestrator",
            Self::Major => "major",
            Self::Standard => "standard",
            Self::Minor => "minor",
            Self::Utility => "utility",
        }
    }
}

/// Shape of the text each character should produce.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    VariantNames,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SpawnFormat {
    /// Third-person prose describing the character's reaction
    #[default]
    Narrative,
    /// Spoken lines only
    Dialogue,
    /// A short statement of what the character does
    Action,
}
