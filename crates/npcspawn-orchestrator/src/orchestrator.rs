//! Concurrent fan-out of one situation to many targets.
//!
//! Each target runs as its own task: lookup, tier, payload, chain, dispatch.
//! Every task ends in exactly one [`OutcomeRecord`], whatever goes wrong
//! inside it, so one target can never take its siblings down.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use npcspawn_config::Config;
use npcspawn_llm::{
    DispatchError, DispatchOptions, Dispatcher, ErrorKind, RateLimitSnapshot, Transport,
};
use npcspawn_utils::logging::{batch_span, target_span};
use npcspawn_utils::types::{SpawnFormat, Tier};

use crate::aggregate::aggregate;
use crate::collaborators::{ConfigResolver, PayloadBuilder, Resolver, TemplatePayloadBuilder};
use crate::coordinator::{BatchCoordinator, BatchState};
use crate::error::SpawnError;
use crate::outcome::{BatchResult, OutcomeRecord};

/// Prefix for failures that are not backend classifications
const INTERNAL_PREFIX: &str = "internal:";

struct Inner {
    dispatcher: Arc<Dispatcher>,
    resolver: Arc<dyn Resolver>,
    payloads: Arc<dyn PayloadBuilder>,
    coordinator: BatchCoordinator,
    default_format: SpawnFormat,
}

/// Entry point for spawning a batch. Cheap to clone; clones share the
/// active-batch slot and rate-limit state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("dispatcher", &self.inner.dispatcher)
            .field("default_format", &self.inner.default_format)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        resolver: Arc<dyn Resolver>,
        payloads: Arc<dyn PayloadBuilder>,
        default_format: SpawnFormat,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                dispatcher,
                resolver,
                payloads,
                coordinator: BatchCoordinator::new(),
                default_format,
            }),
        }
    }

    /// Wire the bundled resolver and payload builder from configuration
    #[must_use]
    pub fn from_config(config: &Config, transport: Arc<dyn Transport>) -> Self {
        Self::new(
            Arc::new(Dispatcher::from_config(config, transport)),
            Arc::new(ConfigResolver::from_config(config)),
            Arc::new(TemplatePayloadBuilder),
            config.default_format(),
        )
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    /// Spawn with the configured default format.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::spawn_with_format`].
    pub async fn spawn<S: AsRef<str>>(
        &self,
        targets: &[S],
        situation: &str,
    ) -> Result<BatchResult, SpawnError> {
        self.spawn_with_format(targets, situation, None).await
    }

    /// Run one batch: every target concurrently, then aggregate in input order.
    ///
    /// No targets or a blank situation returns [`BatchResult::empty`] without
    /// touching the active batch. Otherwise any running batch is superseded
    /// first.
    ///
    /// # Errors
    ///
    /// [`SpawnError::InvalidTarget`] when a target name contains control
    /// characters. Backend and routing failures are per-target outcomes.
    pub async fn spawn_with_format<S: AsRef<str>>(
        &self,
        targets: &[S],
        situation: &str,
        format: Option<SpawnFormat>,
    ) -> Result<BatchResult, SpawnError> {
        let situation = situation.trim();
        if targets.is_empty() || situation.is_empty() {
            debug!("Nothing to spawn");
            return Ok(BatchResult::empty());
        }

        if let Some(bad) = targets
            .iter()
            .map(AsRef::as_ref)
            .find(|name| name.chars().any(char::is_control))
        {
            return Err(SpawnError::InvalidTarget {
                name: bad.to_string(),
            });
        }

        let format = format.unwrap_or(self.inner.default_format);
        let batch = self.inner.coordinator.submit();
        let correlation_id = batch.correlation_id().to_string();
        let span = batch_span(&correlation_id, targets.len());
        let situation: Arc<str> = Arc::from(situation);

        async {
            info!(format = %format, "Batch started");

            let names: Vec<String> = targets.iter().map(|t| t.as_ref().to_string()).collect();
            let handles = names.iter().map(|name| {
                let inner = Arc::clone(&self.inner);
                let name = name.clone();
                let situation = Arc::clone(&situation);
                let token = batch.token();
                let unit_span = target_span(&correlation_id, &name);
                tokio::spawn(
                    async move { run_unit(&inner, &name, &situation, format, &token).await }
                        .instrument(unit_span),
                )
            });
            let joined = join_all(handles).await;

            let outcomes: Vec<OutcomeRecord> = names
                .iter()
                .zip(joined)
                .map(|(name, joined)| match joined {
                    Ok(record) => record,
                    Err(_) if batch.is_cancelled() => OutcomeRecord::cancelled(name.as_str()),
                    Err(join_error) => {
                        warn!(character = %name, error = %join_error, "Target task failed");
                        OutcomeRecord::failure(
                            name.as_str(),
                            ErrorKind::NetworkError,
                            format!("{INTERNAL_PREFIX} task failed: {join_error}"),
                        )
                    }
                })
                .collect();

            let state = self.inner.coordinator.complete(&batch);
            let mut result = aggregate(outcomes, format);
            result.correlation_id = Some(correlation_id.clone());
            result.state = state;

            info!(
                state = %state,
                total = result.stats.total,
                success = result.stats.success,
                failed = result.stats.failed,
                cancelled = result.stats.cancelled,
                avg_latency_ms = result.stats.avg_latency_ms,
                "Batch finished"
            );
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// Cancel the running batch. Returns false when idle.
    pub fn cancel_active(&self) -> bool {
        self.inner.coordinator.cancel_active()
    }

    /// State of the running batch, if there is one
    #[must_use]
    pub fn active_state(&self) -> Option<BatchState> {
        self.inner.coordinator.active().map(|b| b.state())
    }

    /// Read-only rate-limit view for status reporting
    #[must_use]
    pub fn rate_limit_snapshot(&self) -> BTreeMap<String, RateLimitSnapshot> {
        self.inner.dispatcher.rate_limiter().snapshot()
    }

    /// Resolved fallback chain per configured tier
    #[must_use]
    pub fn describe_chains(&self) -> Vec<(Tier, Vec<String>)> {
        self.inner.dispatcher.router().describe_chains()
    }
}

/// One target from name to outcome. Never fails.
async fn run_unit(
    inner: &Inner,
    name: &str,
    situation: &str,
    format: SpawnFormat,
    token: &CancellationToken,
) -> OutcomeRecord {
    let started = Instant::now();
    let elapsed_ms = || u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let Some(target) = inner.resolver.lookup(name).await else {
        debug!("Target not found");
        return OutcomeRecord::failure(
            name,
            ErrorKind::NotFound,
            format!("no character named '{name}'"),
        )
        .with_failure_context(
            Some("Check the spelling or add the character under [characters]".to_string()),
            Vec::new(),
        )
        .with_latency_ms(elapsed_ms());
    };

    let tier = inner.resolver.tier_for(&target).await;

    let payload = match inner.payloads.build(&target, situation, format).await {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "Payload build failed");
            return OutcomeRecord::failure(
                name,
                ErrorKind::NetworkError,
                format!("{INTERNAL_PREFIX} {err}"),
            )
            .with_tier(tier)
            .with_latency_ms(elapsed_ms());
        }
    };

    let chain = inner.dispatcher.router().resolve_chain(tier);
    debug!(tier = %tier, chain = ?chain.names(), "Dispatching target");

    let options = DispatchOptions::with_cancellation(token.clone());
    let result = inner.dispatcher.try_chain(&chain, &payload, &options).await;

    if token.is_cancelled() {
        return OutcomeRecord::cancelled(name)
            .with_tier(tier)
            .with_latency_ms(elapsed_ms());
    }

    let record = match result {
        Ok(generation) => OutcomeRecord::success(name, generation.text).with_profile(generation.profile),
        Err(DispatchError::Cancelled) => OutcomeRecord::cancelled(name),
        Err(err) => {
            let profile_used = match &err {
                DispatchError::Exhausted { .. } => None,
                other => other.profiles().into_iter().next(),
            };
            let record = OutcomeRecord::failure(name, err.kind(), err.to_string())
                .with_failure_context(err.suggestion(), err.profiles());
            match profile_used {
                Some(profile) => record.with_profile(profile),
                None => record,
            }
        }
    };

    record.with_tier(tier).with_latency_ms(elapsed_ms())
}
