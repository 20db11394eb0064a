//! Backend dispatch for npcspawn: rate limiting, tier routing and
//! fallback-chain execution.
//!
//! The pieces stack leaves-first:
//! - [`RateLimiter`] tracks per-profile backoff and never fails
//! - [`Router`] turns a [`Tier`](npcspawn_utils::types::Tier) into a
//!   [`FallbackChain`] and skips profiles that are backing off
//! - [`Dispatcher`] runs one request or a whole chain over a [`Transport`]

pub mod dispatcher;
pub mod error;
pub mod fuzzy;
pub mod rate_limiter;
pub mod router;
pub mod transport;
pub mod types;
pub mod wire;

pub use dispatcher::{DispatchOptions, Dispatcher, RequestDefaults};
pub use error::{DispatchError, TransportError};
pub use rate_limiter::{
    RateLimitRecord, RateLimitSnapshot, RateLimitStatus, RateLimitUpdate, RateLimiter,
};
pub use router::{Availability, FallbackChain, Router, RoutingTable, SelectedProfile, SkippedProfile};
pub use transport::{HttpTransport, Transport, TransportRequest, TransportResponse};
pub use types::{ErrorKind, Generation, Message, RequestPayload, Role};
pub use wire::SamplingDefaults;
