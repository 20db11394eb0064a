//! Single-attempt execution and fallback-chain traversal.
//!
//! [`Dispatcher::execute`] makes exactly one call and classifies it.
//! [`Dispatcher::try_chain`] walks a [`FallbackChain`], moving on only when an
//! attempt was rate limited. Any other failure stops the walk so a broken
//! profile is reported instead of being papered over by the next one.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use npcspawn_config::{BackendProfile, Config};

use crate::error::DispatchError;
use crate::rate_limiter::RateLimiter;
use crate::router::{FallbackChain, Router, SkippedProfile};
use crate::transport::Transport;
use crate::types::{Generation, RequestPayload};
use crate::wire::{
    build_request, error_message, parse_response, parse_retry_after, ResolvedParams,
    SamplingDefaults,
};

/// Values applied to every request unless the payload or profile overrides them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestDefaults {
    pub timeout: Duration,
    pub sampling: SamplingDefaults,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            sampling: SamplingDefaults::default(),
        }
    }
}

impl RequestDefaults {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let fallback = SamplingDefaults::default();
        Self {
            timeout: config.request_timeout(),
            sampling: SamplingDefaults {
                max_tokens: config.defaults.max_tokens.unwrap_or(fallback.max_tokens),
                temperature: config.defaults.temperature.unwrap_or(fallback.temperature),
            },
        }
    }
}

/// Per-call knobs for [`Dispatcher::execute`] and [`Dispatcher::try_chain`]
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Batch token; cancelling it aborts the in-flight call
    pub cancellation: CancellationToken,
    /// First chain index to consider
    pub start_index: usize,
    /// Start at this profile instead, when it is in the chain
    pub preferred_profile: Option<String>,
}

impl DispatchOptions {
    #[must_use]
    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            ..Self::default()
        }
    }
}

/// Executes requests against backend profiles.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    router: Arc<Router>,
    default_profile: Arc<BackendProfile>,
    defaults: RequestDefaults,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("default_profile", &self.default_profile.name)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        router: Arc<Router>,
        default_profile: BackendProfile,
        defaults: RequestDefaults,
    ) -> Self {
        Self {
            transport,
            router,
            default_profile: Arc::new(default_profile),
            defaults,
        }
    }

    /// Wire a limiter, router and dispatcher from one configuration
    #[must_use]
    pub fn from_config(config: &Config, transport: Arc<dyn Transport>) -> Self {
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        let router = Arc::new(Router::from_config(config, limiter));
        Self::new(
            transport,
            router,
            config.default_backend.clone(),
            RequestDefaults::from_config(config),
        )
    }

    #[must_use]
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        self.router.rate_limiter()
    }

    #[must_use]
    pub fn default_profile(&self) -> &BackendProfile {
        &self.default_profile
    }

    /// Make one call to `profile` (or the default profile) and classify it.
    ///
    /// A 429 is recorded with the rate limiter and returned as
    /// [`DispatchError::RateLimited`]; success resets the profile's backoff.
    pub async fn execute(
        &self,
        payload: &RequestPayload,
        profile: Option<&BackendProfile>,
        options: &DispatchOptions,
    ) -> Result<Generation, DispatchError> {
        let profile = profile.unwrap_or(self.default_profile.as_ref());
        if options.cancellation.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let api_key = resolve_api_key(profile)?;
        let params = ResolvedParams::resolve(payload, profile, self.defaults.sampling);
        let request = build_request(
            profile,
            &params,
            &payload.messages,
            api_key.as_deref(),
            self.defaults.timeout,
        )
        .map_err(|e| DispatchError::Misconfigured {
            profile: profile.name.clone(),
            reason: e.to_string(),
        })?;

        debug!(
            profile = %profile.name,
            kind = %profile.kind,
            model = params.model_name(),
            max_tokens = params.max_tokens,
            "Dispatching request"
        );

        let started = Instant::now();
        let response = tokio::select! {
            biased;
            () = options.cancellation.cancelled() => {
                debug!(profile = %profile.name, "Request cancelled in flight");
                return Err(DispatchError::Cancelled);
            }
            result = self.transport.send(request) => result,
        };
        let latency = started.elapsed();

        let response = response.map_err(|source| {
            warn!(profile = %profile.name, error = %source, "Transport failure");
            DispatchError::Transport {
                profile: profile.name.clone(),
                source,
            }
        })?;

        if response.status == 429 {
            let retry_after = response.header("retry-after").and_then(parse_retry_after);
            let update = self
                .rate_limiter()
                .record_rate_limit(&profile.name, retry_after);
            return Err(DispatchError::RateLimited {
                profile: profile.name.clone(),
                retry_in: update.retry_in,
            });
        }

        if !response.is_success() {
            let message = error_message(&response.body);
            warn!(
                profile = %profile.name,
                status = response.status,
                error = %message,
                "Backend returned error status"
            );
            return Err(DispatchError::Backend {
                profile: profile.name.clone(),
                status: response.status,
                message,
            });
        }

        self.rate_limiter().record_success(&profile.name);

        let parsed = parse_response(profile.kind, &response.body).map_err(|reason| {
            DispatchError::InvalidResponse {
                profile: profile.name.clone(),
                reason,
            }
        })?;

        info!(
            profile = %profile.name,
            latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            tokens_output = ?parsed.tokens_output,
            "Generation completed"
        );

        Ok(Generation {
            text: parsed.text,
            profile: profile.name.clone(),
            model: params.model_name().to_string(),
            latency,
            tokens_input: parsed.tokens_input,
            tokens_output: parsed.tokens_output,
        })
    }

    /// Walk `chain` until a profile answers, falling through on 429s only.
    ///
    /// An empty chain means a one-entry chain holding the default profile, so
    /// the default honours its backoff like any other profile. Each profile is
    /// attempted at most once per call; limited profiles are skipped without a
    /// request. Exhaustion yields [`DispatchError::Exhausted`] naming every
    /// attempted profile and the last rate-limit error.
    pub async fn try_chain(
        &self,
        chain: &FallbackChain,
        payload: &RequestPayload,
        options: &DispatchOptions,
    ) -> Result<Generation, DispatchError> {
        let default_chain;
        let (chain, mut index) = if chain.is_empty() {
            default_chain = FallbackChain::new(vec![Arc::clone(&self.default_profile)]);
            (&default_chain, 0)
        } else {
            let index = options
                .preferred_profile
                .as_deref()
                .and_then(|name| chain.position(name))
                .unwrap_or(options.start_index);
            (chain, index)
        };
        let mut attempted: Vec<String> = Vec::new();
        let mut skipped: Vec<SkippedProfile> = Vec::new();
        let mut last_error: Option<Box<DispatchError>> = None;

        loop {
            if options.cancellation.is_cancelled() {
                return Err(DispatchError::Cancelled);
            }

            let availability = self.router.next_available(chain, index);
            for skip in availability.skipped {
                if !skipped.iter().any(|s| s.name == skip.name) {
                    skipped.push(skip);
                }
            }

            let Some(selected) = availability.selected else {
                break;
            };
            attempted.push(selected.profile.name.clone());

            match self.execute(payload, Some(selected.profile.as_ref()), options).await {
                Ok(generation) => return Ok(generation),
                Err(err) if err.is_rate_limited() => {
                    debug!(
                        profile = %selected.profile.name,
                        next_index = selected.index + 1,
                        "Profile rate limited, trying next in chain"
                    );
                    last_error = Some(Box::new(err));
                    index = selected.index + 1;
                }
                Err(err) => return Err(err),
            }
        }

        warn!(
            attempted = ?attempted,
            skipped = skipped.len(),
            "Fallback chain exhausted"
        );
        Err(DispatchError::Exhausted {
            attempted,
            skipped,
            last_error,
        })
    }
}

fn resolve_api_key(profile: &BackendProfile) -> Result<Option<String>, DispatchError> {
    let Some(var) = profile.api_key_env.as_deref() else {
        return Ok(None);
    };
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(Some(key)),
        _ => Err(DispatchError::Misconfigured {
            profile: profile.name.clone(),
            reason: format!("Set the {var} environment variable to this profile's API key"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::router::RoutingTable;
    use crate::transport::{TransportRequest, TransportResponse};
    use crate::types::{ErrorKind, Message};
    use async_trait::async_trait;
    use npcspawn_config::EndpointKind;
    use npcspawn_utils::types::Tier;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted transport keyed by URL; records every URL it was asked for
    #[derive(Default)]
    struct ScriptedTransport {
        responses: HashMap<String, TransportResponse>,
        delay: Option<Duration>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn respond(mut self, profile: &str, response: TransportResponse) -> Self {
            self.responses.insert(url_for(profile), response);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|u| u.trim_start_matches("http://backend/").to_string())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
            self.calls.lock().unwrap().push(request.url.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.responses
                .get(&request.url)
                .cloned()
                .ok_or_else(|| TransportError::Connect("connection refused".to_string()))
        }
    }

    fn url_for(profile: &str) -> String {
        format!("http://backend/{profile}")
    }

    fn ok(text: &str) -> TransportResponse {
        TransportResponse::new(
            200,
            serde_json::json!({"choices": [{"message": {"content": text}}]}).to_string(),
        )
    }

    fn profile(name: &str) -> BackendProfile {
        BackendProfile::new(name, EndpointKind::OpenAi).with_base_url(url_for(name))
    }

    fn dispatcher(transport: ScriptedTransport, chain: &[&str]) -> (Dispatcher, Arc<ScriptedTransport>) {
        let transport = Arc::new(transport);
        let table = RoutingTable {
            profiles: chain.iter().map(|n| Arc::new(profile(n))).collect(),
            tiers: [(Tier::Major, chain.iter().map(|s| s.to_string()).collect())]
                .into_iter()
                .collect(),
            fuzzy_match: false,
        };
        let router = Arc::new(Router::new(table, Arc::new(RateLimiter::default())));
        let dispatcher = Dispatcher::new(
            transport.clone(),
            router,
            profile("default"),
            RequestDefaults::default(),
        );
        (dispatcher, transport)
    }

    fn payload() -> RequestPayload {
        RequestPayload::new(vec![Message::user("The door bursts open")])
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_success_records_success() {
        let (dispatcher, _) = dispatcher(ScriptedTransport::default().respond("a", ok("Hello")), &["a"]);
        dispatcher.rate_limiter().record_rate_limit("a", Some(0.001));
        tokio::time::advance(Duration::from_millis(5)).await;

        let generation = dispatcher
            .execute(&payload(), Some(&profile("a")), &DispatchOptions::default())
            .await
            .unwrap();

        assert_eq!(generation.text, "Hello");
        assert_eq!(generation.profile, "a");
        assert_eq!(dispatcher.rate_limiter().record("a").unwrap().consecutive_errors, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_uses_default_profile() {
        let (dispatcher, transport) =
            dispatcher(ScriptedTransport::default().respond("default", ok("Hi")), &[]);
        let generation = dispatcher
            .execute(&payload(), None, &DispatchOptions::default())
            .await
            .unwrap();
        assert_eq!(generation.profile, "default");
        assert_eq!(transport.calls(), vec!["default"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_429_records_retry_after() {
        let (dispatcher, _) = dispatcher(
            ScriptedTransport::default()
                .respond("p1", TransportResponse::new(429, "").with_header("Retry-After", "10")),
            &["p1"],
        );

        let err = dispatcher
            .execute(&payload(), Some(&profile("p1")), &DispatchOptions::default())
            .await
            .unwrap_err();

        assert!(err.is_rate_limited());
        assert_eq!(err.kind(), ErrorKind::RateLimitExhausted);
        let status = dispatcher.rate_limiter().check("p1");
        assert!(status.limited);
        assert_eq!(status.retry_in, Some(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_other_status_is_network_error_with_hint() {
        let (dispatcher, _) = dispatcher(
            ScriptedTransport::default().respond(
                "p1",
                TransportResponse::new(401, r#"{"error":{"message":"bad key"}}"#),
            ),
            &["p1"],
        );

        let err = dispatcher
            .execute(&payload(), Some(&profile("p1")), &DispatchOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NetworkError);
        assert!(matches!(&err, DispatchError::Backend { status: 401, message, .. } if message == "bad key"));
        assert!(err.suggestion().unwrap().contains("API key"));
        assert!(!dispatcher.rate_limiter().check("p1").limited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_missing_api_key_env_is_misconfigured() {
        let (dispatcher, transport) = dispatcher(ScriptedTransport::default(), &[]);
        let keyed = profile("keyed").with_api_key_env("NPCSPAWN_TEST_KEY_THAT_IS_NEVER_SET");

        let err = dispatcher
            .execute(&payload(), Some(&keyed), &DispatchOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Misconfigured { .. }));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_cancelled_in_flight() {
        let transport = ScriptedTransport {
            delay: Some(Duration::from_secs(30)),
            ..ScriptedTransport::default()
        }
        .respond("a", ok("late"));
        let (dispatcher, _) = dispatcher(transport, &["a"]);
        let options = DispatchOptions::default();

        let token = options.cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let err = dispatcher
            .execute(&payload(), Some(&profile("a")), &options)
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::Cancelled);
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_chain_skips_limited_primary() {
        let (dispatcher, transport) = dispatcher(
            ScriptedTransport::default()
                .respond("a", ok("from a"))
                .respond("b", ok("from b"))
                .respond("c", ok("from c")),
            &["a", "b", "c"],
        );
        dispatcher.rate_limiter().record_rate_limit("a", None);
        let chain = dispatcher.router().resolve_chain(Tier::Major);

        let generation = dispatcher
            .try_chain(&chain, &payload(), &DispatchOptions::default())
            .await
            .unwrap();

        assert_eq!(generation.text, "from b");
        assert_eq!(transport.calls(), vec!["b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_chain_all_rate_limited_is_exhausted() {
        let limited = || TransportResponse::new(429, "");
        let (dispatcher, transport) = dispatcher(
            ScriptedTransport::default()
                .respond("a", limited())
                .respond("b", limited()),
            &["a", "b"],
        );
        let chain = dispatcher.router().resolve_chain(Tier::Major);

        let err = dispatcher
            .try_chain(&chain, &payload(), &DispatchOptions::default())
            .await
            .unwrap_err();

        match &err {
            DispatchError::Exhausted {
                attempted,
                last_error,
                ..
            } => {
                assert_eq!(attempted, &vec!["a".to_string(), "b".to_string()]);
                assert!(last_error.as_ref().unwrap().is_rate_limited());
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(err.kind(), ErrorKind::RateLimitExhausted);
        assert_eq!(transport.calls(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_chain_hard_error_stops_walk() {
        let (dispatcher, transport) = dispatcher(
            ScriptedTransport::default()
                .respond("a", TransportResponse::new(403, "forbidden"))
                .respond("b", ok("masked")),
            &["a", "b"],
        );
        let chain = dispatcher.router().resolve_chain(Tier::Major);

        let err = dispatcher
            .try_chain(&chain, &payload(), &DispatchOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Backend { status: 403, .. }));
        assert_eq!(transport.calls(), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_chain_everything_backing_off_makes_no_calls() {
        let (dispatcher, transport) = dispatcher(ScriptedTransport::default(), &["a", "b"]);
        dispatcher.rate_limiter().record_rate_limit("a", None);
        dispatcher.rate_limiter().record_rate_limit("b", None);
        let chain = dispatcher.router().resolve_chain(Tier::Major);

        let err = dispatcher
            .try_chain(&chain, &payload(), &DispatchOptions::default())
            .await
            .unwrap_err();

        match err {
            DispatchError::Exhausted {
                attempted, skipped, ..
            } => {
                assert!(attempted.is_empty());
                assert_eq!(skipped.len(), 2);
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert!(transport.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_chain_starts_at_preferred_profile() {
        let (dispatcher, transport) = dispatcher(
            ScriptedTransport::default()
                .respond("a", ok("from a"))
                .respond("b", ok("from b")),
            &["a", "b"],
        );
        let chain = dispatcher.router().resolve_chain(Tier::Major);
        let options = DispatchOptions {
            preferred_profile: Some("b".to_string()),
            ..DispatchOptions::default()
        };

        let generation = dispatcher.try_chain(&chain, &payload(), &options).await.unwrap();
        assert_eq!(generation.profile, "b");
        assert_eq!(transport.calls(), vec!["b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_chain_empty_uses_default_profile() {
        let (dispatcher, _) =
            dispatcher(ScriptedTransport::default().respond("default", ok("fallback")), &[]);
        let generation = dispatcher
            .try_chain(&FallbackChain::default(), &payload(), &DispatchOptions::default())
            .await
            .unwrap();
        assert_eq!(generation.profile, "default");
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_chain_empty_respects_default_backoff() {
        let (dispatcher, transport) = dispatcher(
            ScriptedTransport::default()
                .respond("default", TransportResponse::new(429, "").with_header("Retry-After", "30")),
            &[],
        );

        let first = dispatcher
            .try_chain(&FallbackChain::default(), &payload(), &DispatchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(first.kind(), ErrorKind::RateLimitExhausted);

        for _ in 0..2 {
            let err = dispatcher
                .try_chain(&FallbackChain::default(), &payload(), &DispatchOptions::default())
                .await
                .unwrap_err();
            match err {
                DispatchError::Exhausted { attempted, skipped, .. } => {
                    assert!(attempted.is_empty());
                    assert_eq!(skipped.len(), 1);
                    assert_eq!(skipped[0].name, "default");
                }
                other => panic!("expected Exhausted, got {other:?}"),
            }
        }

        assert_eq!(transport.calls(), vec!["default"]);
        assert_eq!(dispatcher.rate_limiter().record("default").unwrap().consecutive_errors, 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        let _ = dispatcher
            .try_chain(&FallbackChain::default(), &payload(), &DispatchOptions::default())
            .await;
        assert_eq!(transport.calls(), vec!["default", "default"]);
    }
}
