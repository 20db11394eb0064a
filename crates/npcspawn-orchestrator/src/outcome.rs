//! Per-target outcomes and the batch result handed back to callers.

use serde::Serialize;

use npcspawn_llm::ErrorKind;
use npcspawn_utils::types::Tier;

use crate::coordinator::BatchState;

/// What happened to one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Success {
        text: String,
    },
    Failure {
        kind: ErrorKind,
        detail: String,
        /// Actionable next step, when one is known
        hint: Option<String>,
        /// Profiles involved, in attempt order
        profiles: Vec<String>,
    },
}

/// Terminal record for one target of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeRecord {
    pub target_name: String,
    pub outcome: Outcome,
    pub latency_ms: u64,
    pub tier_used: Option<Tier>,
    pub profile_used: Option<String>,
}

impl OutcomeRecord {
    #[must_use]
    pub fn success(target_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            outcome: Outcome::Success { text: text.into() },
            latency_ms: 0,
            tier_used: None,
            profile_used: None,
        }
    }

    #[must_use]
    pub fn failure(target_name: impl Into<String>, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            outcome: Outcome::Failure {
                kind,
                detail: detail.into(),
                hint: None,
                profiles: Vec::new(),
            },
            latency_ms: 0,
            tier_used: None,
            profile_used: None,
        }
    }

    #[must_use]
    pub fn cancelled(target_name: impl Into<String>) -> Self {
        Self::failure(target_name, ErrorKind::Cancelled, "cancelled")
    }

    #[must_use]
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    #[must_use]
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier_used = Some(tier);
        self
    }

    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile_used = Some(profile.into());
        self
    }

    /// Attach a hint and the profiles tried; no effect on a success
    #[must_use]
    pub fn with_failure_context(mut self, new_hint: Option<String>, new_profiles: Vec<String>) -> Self {
        if let Outcome::Failure { hint, profiles, .. } = &mut self.outcome {
            *hint = new_hint;
            *profiles = new_profiles;
        }
        self
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            Outcome::Success { .. } => None,
            Outcome::Failure { kind, .. } => Some(*kind),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.error_kind() == Some(ErrorKind::Cancelled)
    }

    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success { text } => Some(text),
            Outcome::Failure { .. } => None,
        }
    }
}

/// Counts over non-cancelled outcomes; `cancelled` is reported separately
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub avg_latency_ms: u64,
}

/// Everything one `spawn` call produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    /// `None` when nothing was submitted
    pub correlation_id: Option<String>,
    pub state: BatchState,
    /// One record per input target, in input order, cancelled ones included
    pub outcomes: Vec<OutcomeRecord>,
    pub stats: BatchStats,
    /// Formatted text for display; omits cancelled targets
    pub summary: String,
}

impl BatchResult {
    /// Result for a call with nothing to do
    #[must_use]
    pub fn empty() -> Self {
        Self {
            correlation_id: None,
            state: BatchState::Completed,
            outcomes: Vec::new(),
            stats: BatchStats::default(),
            summary: String::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// True when at least one target ran and none succeeded
    #[must_use]
    pub fn all_failed(&self) -> bool {
        self.stats.total > 0 && self.stats.success == 0
    }
}
