//! Tier to fallback-chain routing.
//!
//! Configuration maps a tier to profile *names*. Names are resolved to
//! profiles each time a chain is built, so a reloaded table never leaves the
//! router holding stale profile references.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use npcspawn_config::{BackendProfile, Config};
use npcspawn_utils::types::Tier;

use crate::fuzzy::fuzzy_match_profile;
use crate::rate_limiter::RateLimiter;

/// Profiles and tier chains as read from configuration
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    pub profiles: Vec<Arc<BackendProfile>>,
    pub tiers: BTreeMap<Tier, Vec<String>>,
    pub fuzzy_match: bool,
}

impl RoutingTable {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            profiles: config.profiles.iter().cloned().map(Arc::new).collect(),
            tiers: config.tiers.clone(),
            fuzzy_match: config.routing.fuzzy_match,
        }
    }

    fn find_exact(&self, name: &str) -> Option<&Arc<BackendProfile>> {
        self.profiles.iter().find(|p| p.name == name)
    }

    fn find_fuzzy(&self, name: &str) -> Option<&Arc<BackendProfile>> {
        fuzzy_match_profile(name, &self.profiles)
    }
}

/// Ordered profiles for one tier; the first entry is the primary.
///
/// Empty means "use the dispatcher's default profile".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FallbackChain(Vec<Arc<BackendProfile>>);

impl FallbackChain {
    #[must_use]
    pub fn new(profiles: Vec<Arc<BackendProfile>>) -> Self {
        Self(profiles)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Arc<BackendProfile>> {
        self.0.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<BackendProfile>> {
        self.0.iter()
    }

    /// Index of the profile called `name`, if it is in the chain
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|p| p.name == name)
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|p| p.name.clone()).collect()
    }
}

/// A chain entry that was passed over because it is backing off
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedProfile {
    pub name: String,
    pub reason: String,
    #[serde(skip)]
    pub retry_in: Option<Duration>,
}

/// Chain entry chosen by [`Router::next_available`]
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedProfile {
    pub index: usize,
    pub profile: Arc<BackendProfile>,
}

/// Result of walking a chain for a usable profile.
///
/// `selected == None` with a non-empty `skipped` list means every remaining
/// entry is backing off; that is retryable later, unlike an empty chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Availability {
    pub selected: Option<SelectedProfile>,
    pub skipped: Vec<SkippedProfile>,
}

/// Resolves tiers to fallback chains and picks the first usable entry.
#[derive(Debug)]
pub struct Router {
    table: RwLock<RoutingTable>,
    limiter: Arc<RateLimiter>,
}

impl Router {
    #[must_use]
    pub fn new(table: RoutingTable, limiter: Arc<RateLimiter>) -> Self {
        Self {
            table: RwLock::new(table),
            limiter,
        }
    }

    #[must_use]
    pub fn from_config(config: &Config, limiter: Arc<RateLimiter>) -> Self {
        Self::new(RoutingTable::from_config(config), limiter)
    }

    /// Swap in a new routing table; chains built afterwards use it.
    pub fn reload(&self, table: RoutingTable) {
        let mut guard = self.table.write().unwrap_or_else(PoisonError::into_inner);
        *guard = table;
        debug!("Routing table reloaded");
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Build the fallback chain for `tier`.
    ///
    /// Each configured name is resolved by exact match, then (when enabled)
    /// by [`fuzzy_match_profile`]. Names that resolve to nothing are logged and
    /// skipped. A profile is listed at most once even if two names resolve to
    /// it. An unconfigured tier yields an empty chain.
    pub fn resolve_chain(&self, tier: Tier) -> FallbackChain {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        let Some(names) = table.tiers.get(&tier) else {
            debug!(tier = %tier, "No chain configured for tier");
            return FallbackChain::default();
        };

        let mut resolved: Vec<Arc<BackendProfile>> = Vec::with_capacity(names.len());
        for name in names {
            let profile = match table.find_exact(name) {
                Some(profile) => Some(profile),
                None if table.fuzzy_match => {
                    let hit = table.find_fuzzy(name);
                    if let Some(profile) = hit {
                        debug!(
                            tier = %tier,
                            configured = %name,
                            profile = %profile.name,
                            "Resolved profile name by approximate match"
                        );
                    }
                    hit
                }
                None => None,
            };

            match profile {
                Some(profile) if resolved.iter().any(|p| p.name == profile.name) => {
                    debug!(tier = %tier, profile = %profile.name, "Duplicate profile in chain ignored");
                }
                Some(profile) => resolved.push(Arc::clone(profile)),
                None => warn!(
                    tier = %tier,
                    configured = %name,
                    "Tier chain references unknown profile, skipping"
                ),
            }
        }

        FallbackChain(resolved)
    }

    /// Walk `chain` from `start` and return the first entry not backing off.
    pub fn next_available(&self, chain: &FallbackChain, start: usize) -> Availability {
        let mut skipped = Vec::new();

        for (index, profile) in chain.0.iter().enumerate().skip(start) {
            let status = self.limiter.check(&profile.name);
            if !status.limited {
                return Availability {
                    selected: Some(SelectedProfile {
                        index,
                        profile: Arc::clone(profile),
                    }),
                    skipped,
                };
            }

            let reason = match status.retry_in {
                Some(wait) => format!("rate limited, retry in {}s", ceil_secs(wait)),
                None => "rate limited".to_string(),
            };
            debug!(profile = %profile.name, reason = %reason, "Skipping profile");
            skipped.push(SkippedProfile {
                name: profile.name.clone(),
                reason,
                retry_in: status.retry_in,
            });
        }

        Availability {
            selected: None,
            skipped,
        }
    }

    /// Resolved chain per configured tier, for status display
    pub fn describe_chains(&self) -> Vec<(Tier, Vec<String>)> {
        let tiers: Vec<Tier> = {
            let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
            table.tiers.keys().copied().collect()
        };
        tiers
            .into_iter()
            .map(|tier| (tier, self.resolve_chain(tier).names()))
            .collect()
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 { secs + 1 } else { secs }
}
