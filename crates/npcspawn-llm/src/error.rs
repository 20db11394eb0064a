use std::time::Duration;
use thiserror::Error;

use npcspawn_utils::error::{ErrorCategory, UserFriendlyError};

use crate::router::SkippedProfile;
use crate::types::ErrorKind;

/// Failure of the underlying HTTP call, before any status is known
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out after {}s", duration.as_secs())]
    Timeout { duration: Duration },

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Failed to build request: {0}")]
    Build(String),
}

/// Why one dispatch (single attempt or whole chain) did not produce text
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// 429 from this profile; the caller may move to the next chain entry
    #[error("Profile '{profile}' is rate limited (retry in {}ms)", retry_in.as_millis())]
    RateLimited { profile: String, retry_in: Duration },

    #[error("Profile '{profile}' returned HTTP {status}: {message}")]
    Backend {
        profile: String,
        status: u16,
        message: String,
    },

    #[error("Profile '{profile}' transport failure: {source}")]
    Transport {
        profile: String,
        #[source]
        source: TransportError,
    },

    #[error("Profile '{profile}' returned an unusable response: {reason}")]
    InvalidResponse { profile: String, reason: String },

    #[error("Profile '{profile}' is misconfigured: {reason}")]
    Misconfigured { profile: String, reason: String },

    #[error("Request cancelled")]
    Cancelled,

    /// Every remaining chain entry was rate limited or already backing off
    #[error("All profiles rate limited (attempted: {})", format_names(attempted))]
    Exhausted {
        attempted: Vec<String>,
        skipped: Vec<SkippedProfile>,
        last_error: Option<Box<DispatchError>>,
    },
}

fn format_names(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

impl DispatchError {
    /// Batch-level classification of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited { .. } | Self::Exhausted { .. } => ErrorKind::RateLimitExhausted,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Backend { .. }
            | Self::Transport { .. }
            | Self::InvalidResponse { .. }
            | Self::Misconfigured { .. } => ErrorKind::NetworkError,
        }
    }

    /// True only for a single-attempt 429; the chain walker advances on this.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Profile names this error concerns, in attempt order
    #[must_use]
    pub fn profiles(&self) -> Vec<String> {
        match self {
            Self::RateLimited { profile, .. }
            | Self::Backend { profile, .. }
            | Self::Transport { profile, .. }
            | Self::InvalidResponse { profile, .. }
            | Self::Misconfigured { profile, .. } => vec![profile.clone()],
            Self::Cancelled => Vec::new(),
            Self::Exhausted {
                attempted, skipped, ..
            } => {
                let mut names = attempted.clone();
                for skip in skipped {
                    if !names.contains(&skip.name) {
                        names.push(skip.name.clone());
                    }
                }
                names
            }
        }
    }

    /// One actionable hint for the person reading the batch summary
    #[must_use]
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::Backend { status, .. } => Some(suggestion_for_status(*status).to_string()),
            Self::Transport {
                source: TransportError::Timeout { .. },
                ..
            } => Some("The backend did not answer in time; raise defaults.timeout_secs or pick a faster tier".to_string()),
            Self::Transport { .. } => {
                Some("Check that the backend URL is reachable and any proxy is running".to_string())
            }
            Self::InvalidResponse { .. } => {
                Some("Confirm the profile's kind matches the endpoint's API".to_string())
            }
            Self::Misconfigured { reason, .. } => Some(reason.clone()),
            Self::RateLimited { .. } | Self::Exhausted { .. } => Some(
                "Wait for the backoff window to pass or add another profile to this tier's chain"
                    .to_string(),
            ),
            Self::Cancelled => None,
        }
    }
}

/// Hint keyed by HTTP status class
#[must_use]
pub fn suggestion_for_status(status: u16) -> &'static str {
    match status {
        401 | 403 => "Check the API key environment variable configured for this profile",
        404 => "Check the profile's base_url and model name",
        429 => "The provider is throttling requests; wait or add a fallback profile",
        500..=599 => "The provider is having an outage; try again later or use another tier",
        400..=499 => "The provider rejected the request; check model parameters for this profile",
        _ => "Unexpected response status from the provider",
    }
}

impl UserFriendlyError for DispatchError {
    fn user_message(&self) -> String {
        match self {
            Self::RateLimited { profile, .. } => format!("Backend '{profile}' is rate limited"),
            Self::Backend {
                profile, status, ..
            } => format!("Backend '{profile}' failed with HTTP {status}"),
            Self::Transport { profile, .. } => format!("Could not reach backend '{profile}'"),
            Self::InvalidResponse { profile, .. } => {
                format!("Backend '{profile}' returned a response npcspawn could not read")
            }
            Self::Misconfigured { profile, .. } => {
                format!("Backend '{profile}' is not configured correctly")
            }
            Self::Cancelled => "Request was cancelled".to_string(),
            Self::Exhausted { .. } => "Every backend for this tier is rate limited".to_string(),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Backend { message, .. } => Some(message.clone()),
            Self::Transport { source, .. } => Some(source.to_string()),
            Self::InvalidResponse { reason, .. } => Some(reason.clone()),
            Self::Exhausted {
                last_error: Some(last),
                ..
            } => Some(format!("Last error: {last}")),
            Self::RateLimited { retry_in, .. } => {
                Some(format!("Retry in {}s", retry_in.as_secs().max(1)))
            }
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        self.suggestion().into_iter().collect()
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::RateLimited { .. } | Self::Exhausted { .. } => ErrorCategory::RateLimit,
            Self::Misconfigured { .. } => ErrorCategory::Configuration,
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::Backend { .. } | Self::Transport { .. } | Self::InvalidResponse { .. } => {
                ErrorCategory::Backend
            }
        }
    }
}
