//! Tracing setup and the structured spans used around a batch.

use tracing::{Level, span};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise verbose mode logs npcspawn at debug and
/// everything else at info; the default keeps npcspawn at info and the rest at
/// warn.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("npcspawn=debug,info")
            } else {
                EnvFilter::try_new("npcspawn=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(false)
        .with_file(false);

    if verbose {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.with_span_events(FmtSpan::CLOSE).compact())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.compact())
            .try_init()?;
    }

    Ok(())
}

/// Span covering one spawn batch from submission to aggregation.
pub fn batch_span(correlation_id: &str, targets: usize) -> tracing::Span {
    span!(
        Level::INFO,
        "spawn_batch",
        batch = %correlation_id,
        targets = targets,
    )
}

/// Span covering one target's unit of work inside a batch.
pub fn target_span(correlation_id: &str, target: &str) -> tracing::Span {
    span!(
        Level::DEBUG,
        "spawn_target",
        batch = %correlation_id,
        character = %target,
    )
}
