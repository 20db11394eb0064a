//! Turning a batch's outcomes into statistics and display text.
//!
//! Cancelled outcomes were stopped on purpose. They stay in
//! `BatchResult::outcomes` but count toward nothing except
//! `stats.cancelled` and never appear in the summary.

use npcspawn_llm::ErrorKind;
use npcspawn_utils::types::SpawnFormat;

use crate::coordinator::BatchState;
use crate::outcome::{BatchResult, BatchStats, Outcome, OutcomeRecord};

/// Build a result from outcomes already in input order.
#[must_use]
pub fn aggregate(outcomes: Vec<OutcomeRecord>, format: SpawnFormat) -> BatchResult {
    let stats = compute_stats(&outcomes);
    let summary = render_summary(&outcomes, format, &stats);
    BatchResult {
        correlation_id: None,
        state: BatchState::Completed,
        outcomes,
        stats,
        summary,
    }
}

#[must_use]
pub fn compute_stats(outcomes: &[OutcomeRecord]) -> BatchStats {
    let mut stats = BatchStats::default();
    let mut latency_sum: u128 = 0;

    for record in outcomes {
        if record.is_cancelled() {
            stats.cancelled += 1;
            continue;
        }
        stats.total += 1;
        latency_sum += u128::from(record.latency_ms);
        if record.is_success() {
            stats.success += 1;
        } else {
            stats.failed += 1;
        }
    }

    if stats.total > 0 {
        let n = stats.total as u128;
        let rounded = (latency_sum + n / 2) / n;
        stats.avg_latency_ms = u64::try_from(rounded).unwrap_or(u64::MAX);
    }
    stats
}

fn render_summary(outcomes: &[OutcomeRecord], format: SpawnFormat, stats: &BatchStats) -> String {
    if stats.total == 0 {
        return String::new();
    }

    let mut blocks: Vec<String> = outcomes
        .iter()
        .filter(|record| !record.is_cancelled())
        .map(|record| render_record(record, format))
        .collect();

    blocks.push(format!(
        "{}/{} succeeded, {} failed, avg {}ms",
        stats.success, stats.total, stats.failed, stats.avg_latency_ms
    ));
    blocks.join("\n\n")
}

fn render_record(record: &OutcomeRecord, format: SpawnFormat) -> String {
    let name = &record.target_name;
    match &record.outcome {
        Outcome::Success { text } => match format {
            SpawnFormat::Narrative => format!("{name}: {text}"),
            SpawnFormat::Dialogue if text.starts_with('"') => format!("{name}: {text}"),
            SpawnFormat::Dialogue => format!("{name}: \"{text}\""),
            SpawnFormat::Action => format!("[{name}] {text}"),
        },
        Outcome::Failure {
            kind: ErrorKind::NotFound,
            ..
        } => format!("{name}: unknown character"),
        Outcome::Failure {
            kind,
            detail,
            hint,
            profiles,
        } => {
            let mut line = format!("{name}: failed ({kind}): {detail}");
            if !profiles.is_empty() {
                line.push_str(&format!(" [profiles: {}]", profiles.join(", ")));
            }
            if let Some(hint) = hint {
                line.push_str(&format!("\n  hint: {hint}"));
            }
            line
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cancelled_excluded_from_counts_and_summary() {
        let outcomes = vec![
            OutcomeRecord::success("Alice", "Alice gasps.").with_latency_ms(100),
            OutcomeRecord::cancelled("Bob").with_latency_ms(5000),
            OutcomeRecord::failure("Carol", ErrorKind::NetworkError, "HTTP 500")
                .with_latency_ms(201)
                .with_failure_context(Some("try later".to_string()), vec!["p1".to_string()]),
        ];

        let result = aggregate(outcomes, SpawnFormat::Narrative);

        assert_eq!(result.outcomes.len(), 3);
        assert_eq!(result.stats.total, 2);
        assert_eq!(result.stats.success, 1);
        assert_eq!(result.stats.failed, 1);
        assert_eq!(result.stats.cancelled, 1);
        // (100 + 201) / 2 = 150.5 rounds to 151
        assert_eq!(result.stats.avg_latency_ms, 151);
        assert!(!result.summary.contains("Bob"));
        assert!(result.summary.contains("Alice: Alice gasps."));
        assert!(result.summary.contains("Carol: failed (network error): HTTP 500 [profiles: p1]"));
        assert!(result.summary.contains("hint: try later"));
        assert!(result.summary.ends_with("1/2 succeeded, 1 failed, avg 151ms"));
    }

    #[test]
    fn test_not_found_is_reported_as_unknown_character() {
        let result = aggregate(
            vec![OutcomeRecord::failure("Ghost", ErrorKind::NotFound, "no such character")],
            SpawnFormat::Narrative,
        );
        assert!(result.summary.starts_with("Ghost: unknown character"));
        assert_eq!(result.stats.failed, 1);
    }

    #[test]
    fn test_summary_follows_input_order() {
        let result = aggregate(
            vec![
                OutcomeRecord::success("Zed", "z"),
                OutcomeRecord::success("Amy", "a"),
            ],
            SpawnFormat::Action,
        );
        let zed = result.summary.find("[Zed]").unwrap();
        let amy = result.summary.find("[Amy]").unwrap();
        assert!(zed < amy);
    }

    #[test]
    fn test_dialogue_quotes_unquoted_text() {
        let result = aggregate(
            vec![
                OutcomeRecord::success("Alice", "Who's there?"),
                OutcomeRecord::success("Bob", "\"Stay back!\""),
            ],
            SpawnFormat::Dialogue,
        );
        assert!(result.summary.contains("Alice: \"Who's there?\""));
        assert!(result.summary.contains("Bob: \"Stay back!\""));
    }

    #[test]
    fn test_all_cancelled_has_empty_summary() {
        let result = aggregate(
            vec![OutcomeRecord::cancelled("A"), OutcomeRecord::cancelled("B")],
            SpawnFormat::Narrative,
        );
        assert_eq!(result.stats.total, 0);
        assert_eq!(result.stats.avg_latency_ms, 0);
        assert!(result.summary.is_empty());
    }

    fn arb_record() -> impl Strategy<Value = OutcomeRecord> {
        ("[a-z]{1,8}", 0u8..4, 0u64..10_000).prop_map(|(name, which, latency)| {
            let record = match which {
                0 => OutcomeRecord::success(name, "ok"),
                1 => OutcomeRecord::cancelled(name),
                2 => OutcomeRecord::failure(name, ErrorKind::NetworkError, "boom"),
                _ => OutcomeRecord::failure(name, ErrorKind::RateLimitExhausted, "busy"),
            };
            record.with_latency_ms(latency)
        })
    }

    proptest! {
        #[test]
        fn prop_counts_partition_outcomes(records in proptest::collection::vec(arb_record(), 0..30)) {
            let n = records.len();
            let cancelled = records.iter().filter(|r| r.is_cancelled()).count();
            let result = aggregate(records, SpawnFormat::Narrative);

            prop_assert_eq!(result.outcomes.len(), n);
            prop_assert_eq!(result.stats.cancelled, cancelled);
            prop_assert_eq!(result.stats.success + result.stats.failed, result.stats.total);
            prop_assert_eq!(result.stats.total + result.stats.cancelled, n);
        }

        #[test]
        fn prop_average_within_bounds(records in proptest::collection::vec(arb_record(), 1..30)) {
            let live: Vec<u64> = records
                .iter()
                .filter(|r| !r.is_cancelled())
                .map(|r| r.latency_ms)
                .collect();
            let stats = compute_stats(&records);
            if let (Some(min), Some(max)) = (live.iter().min(), live.iter().max()) {
                prop_assert!(stats.avg_latency_ms >= *min);
                prop_assert!(stats.avg_latency_ms <= *max);
            } else {
                prop_assert_eq!(stats.avg_latency_ms, 0);
            }
        }
    }
}
