//! Per-profile rate-limit bookkeeping with exponential backoff.
//!
//! The limiter never talks to the network and never fails. The dispatcher
//! tells it about 429s and successes; the router asks it which profiles are
//! currently backing off.
//!
//! The `limited` flag is a cache: it is cleared lazily on the first
//! [`RateLimiter::check`] after `next_attempt_at` passes, not by a timer.
//! Time comes from `tokio::time::Instant`, so a paused test clock drives
//! expiry deterministically.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use npcspawn_config::{MAX_DELAY_CEILING_SECS, RateLimitConfig};

/// Default delay after the first rate-limit signal, before doubling
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(5);

/// Upper bound on any single backoff window
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

/// State tracked for one profile name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRecord {
    pub limited: bool,
    pub next_attempt_at: Instant,
    pub consecutive_errors: u32,
}

/// Answer to "may I call this profile now?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limited: bool,
    /// Remaining wait; `None` when not limited
    pub retry_in: Option<Duration>,
}

impl RateLimitStatus {
    const AVAILABLE: Self = Self {
        limited: false,
        retry_in: None,
    };
}

/// Result of recording a rate-limit signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitUpdate {
    pub retry_in: Duration,
    pub next_attempt_at: Instant,
}

/// Read-only view of one record for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitSnapshot {
    pub limited: bool,
    pub retry_in_ms: Option<u64>,
    /// Wall-clock estimate of when the profile may be retried
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
}

/// Tracks backoff state per backend profile name.
///
/// All mutations happen under one mutex, so two targets hitting the same
/// profile at once cannot lose an update.
#[derive(Debug)]
pub struct RateLimiter {
    base_delay: Duration,
    max_delay: Duration,
    records: Mutex<HashMap<String, RateLimitRecord>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl RateLimiter {
    /// Create a limiter with explicit backoff parameters.
    ///
    /// `max_delay` below `base_delay` is raised to `base_delay`. Both are
    /// capped at [`MAX_DELAY_CEILING_SECS`].
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        let ceiling = Duration::from_secs(MAX_DELAY_CEILING_SECS);
        let base_delay = base_delay.min(ceiling);
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay).min(ceiling),
            records: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.base_delay(), config.max_delay())
    }

    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Whether `profile` is currently backing off, and for how long.
    pub fn check(&self, profile: &str) -> RateLimitStatus {
        let now = Instant::now();
        let mut records = self.lock();
        let Some(record) = records.get_mut(profile) else {
            return RateLimitStatus::AVAILABLE;
        };

        if !record.limited {
            return RateLimitStatus::AVAILABLE;
        }

        if now >= record.next_attempt_at {
            record.limited = false;
            debug!(profile = profile, "Rate limit window expired");
            return RateLimitStatus::AVAILABLE;
        }

        RateLimitStatus {
            limited: true,
            retry_in: Some(record.next_attempt_at - now),
        }
    }

    /// Reset backoff for `profile` after a successful call.
    pub fn record_success(&self, profile: &str) {
        let now = Instant::now();
        let mut records = self.lock();
        let record = records
            .entry(profile.to_string())
            .or_insert_with(|| fresh_record(now));

        if record.consecutive_errors > 0 {
            debug!(
                profile = profile,
                previous_errors = record.consecutive_errors,
                "Rate limit state reset after success"
            );
        }
        record.consecutive_errors = 0;
        record.limited = false;
    }

    /// Record a 429 from `profile` and start (or extend) its backoff window.
    ///
    /// A finite, positive `retry_after_secs` from the server replaces the
    /// exponential delay; both are capped at the configured maximum.
    pub fn record_rate_limit(&self, profile: &str, retry_after_secs: Option<f64>) -> RateLimitUpdate {
        let now = Instant::now();
        let mut records = self.lock();
        let record = records
            .entry(profile.to_string())
            .or_insert_with(|| fresh_record(now));

        record.consecutive_errors = record.consecutive_errors.saturating_add(1);

        let retry_in = match retry_after_secs.and_then(valid_retry_after) {
            Some(server_delay) => server_delay.min(self.max_delay),
            None => backoff_delay(record.consecutive_errors, self.base_delay, self.max_delay),
        };

        record.limited = true;
        record.next_attempt_at = now + retry_in;

        warn!(
            profile = profile,
            consecutive_errors = record.consecutive_errors,
            retry_in_ms = duration_ms(retry_in),
            server_retry_after = ?retry_after_secs,
            "Backend rate limited"
        );

        RateLimitUpdate {
            retry_in,
            next_attempt_at: record.next_attempt_at,
        }
    }

    /// Forget everything about `profile`.
    pub fn clear(&self, profile: &str) {
        self.lock().remove(profile);
    }

    /// Forget every profile.
    pub fn clear_all(&self) {
        self.lock().clear();
    }

    /// Raw record for `profile`, if one has been created
    #[must_use]
    pub fn record(&self, profile: &str) -> Option<RateLimitRecord> {
        self.lock().get(profile).copied()
    }

    /// Status view of every known profile, sorted by name.
    ///
    /// Does not clear expired flags; an expired window simply reports as not
    /// limited.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, RateLimitSnapshot> {
        let now = Instant::now();
        let wall_now = Utc::now();
        self.lock()
            .iter()
            .map(|(name, record)| {
                let remaining = (record.limited && record.next_attempt_at > now)
                    .then(|| record.next_attempt_at - now);
                let snapshot = RateLimitSnapshot {
                    limited: remaining.is_some(),
                    retry_in_ms: remaining.map(duration_ms),
                    next_attempt_at: remaining.and_then(|d| {
                        chrono::Duration::from_std(d).ok().map(|d| wall_now + d)
                    }),
                    consecutive_errors: record.consecutive_errors,
                };
                (name.clone(), snapshot)
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RateLimitRecord>> {
        // Every critical section leaves the map consistent, so a poisoned lock is still usable.
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn fresh_record(now: Instant) -> RateLimitRecord {
    RateLimitRecord {
        limited: false,
        next_attempt_at: now,
        consecutive_errors: 0,
    }
}

/// `min(max, base * 2^consecutive_errors)`, saturating instead of overflowing
#[must_use]
pub fn backoff_delay(consecutive_errors: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.checked_pow(consecutive_errors).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}

fn valid_retry_after(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs > 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
