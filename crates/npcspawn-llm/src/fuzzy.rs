//! Approximate profile-name matching for tier chains.
//!
//! Exact lookup happens in the router; this is only consulted when a name in
//! `[tiers]` matches no profile verbatim. Cheap normalized comparisons run
//! first, and a fuzzy hit is only accepted when it is unambiguous.

use std::borrow::Borrow;
use std::collections::HashSet;

use npcspawn_config::BackendProfile;

/// Minimum share of query tokens that must appear in a candidate
pub const MIN_TOKEN_OVERLAP: f64 = 0.5;

/// Find the single candidate `name` most plausibly refers to.
///
/// Tried in order, stopping at the first rule that yields exactly one hit:
/// 1. equality after normalization (case, punctuation, whitespace ignored)
/// 2. containment of one normalized form in the other
/// 3. best token overlap ratio, at least [`MIN_TOKEN_OVERLAP`]
///
/// Any rule producing more than one equally good hit returns `None`.
pub fn fuzzy_match<'a, I>(name: &str, candidates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let needle = normalize(name);
    if needle.is_empty() {
        return None;
    }

    let candidates: Vec<(&'a str, String)> = candidates
        .into_iter()
        .map(|c| (c, normalize(c)))
        .filter(|(_, n)| !n.is_empty())
        .collect();

    let equal: Vec<&str> = candidates
        .iter()
        .filter(|(_, n)| *n == needle)
        .map(|(c, _)| *c)
        .collect();
    if let Some(hit) = unique(&equal) {
        return Some(hit);
    }
    if equal.len() > 1 {
        return None;
    }

    let contained: Vec<&str> = candidates
        .iter()
        .filter(|(_, n)| n.contains(&needle) || needle.contains(n.as_str()))
        .map(|(c, _)| *c)
        .collect();
    if let Some(hit) = unique(&contained) {
        return Some(hit);
    }
    if contained.len() > 1 {
        return None;
    }

    let query_tokens = tokens(name);
    if query_tokens.is_empty() {
        return None;
    }

    let mut best: Option<(&'a str, f64)> = None;
    let mut tied = false;
    for (candidate, _) in &candidates {
        let score = token_overlap(&query_tokens, &tokens(candidate));
        if score < MIN_TOKEN_OVERLAP {
            continue;
        }
        match best {
            Some((_, best_score)) if (score - best_score).abs() < f64::EPSILON => tied = true,
            Some((_, best_score)) if score < best_score => {}
            _ => {
                best = Some((*candidate, score));
                tied = false;
            }
        }
    }

    if tied { None } else { best.map(|(c, _)| c) }
}

fn unique<'a>(hits: &[&'a str]) -> Option<&'a str> {
    match hits {
        [only] => Some(*only),
        _ => None,
    }
}

/// Lowercase and keep only alphanumerics
fn normalize(s: &str) -> String {
    s.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn tokens(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

/// Share of `query` tokens present in `candidate`
fn token_overlap(query: &HashSet<String>, candidate: &HashSet<String>) -> f64 {
    let shared = query.intersection(candidate).count();
    shared as f64 / query.len() as f64
}

/// [`fuzzy_match`] over profile names, returning the matching profile.
pub fn fuzzy_match_profile<'a, P>(name: &str, profiles: &'a [P]) -> Option<&'a P>
where
    P: Borrow<BackendProfile>,
{
    let hit = fuzzy_match(
        name,
        profiles
            .iter()
            .map(|p| Borrow::<BackendProfile>::borrow(p).name.as_str()),
    )?;
    profiles
        .iter()
        .find(|p| Borrow::<BackendProfile>::borrow(*p).name == hit)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILES: &[&str] = &["claude-fast", "claude-smart", "openrouter-mistral", "local"];

    #[test]
    fn test_normalized_equality() {
        assert_eq!(fuzzy_match("Claude_Fast", PROFILES.iter().copied()), Some("claude-fast"));
        assert_eq!(fuzzy_match("LOCAL", PROFILES.iter().copied()), Some("local"));
    }

    #[test]
    fn test_unique_containment() {
        assert_eq!(fuzzy_match("mistral", PROFILES.iter().copied()), Some("openrouter-mistral"));
    }

    #[test]
    fn test_ambiguous_containment_is_none() {
        assert_eq!(fuzzy_match("claude", PROFILES.iter().copied()), None);
    }

    #[test]
    fn test_token_overlap() {
        assert_eq!(
            fuzzy_match("mistral via openrouter", PROFILES.iter().copied()),
            Some("openrouter-mistral")
        );
    }

    #[test]
    fn test_no_plausible_match() {
        assert_eq!(fuzzy_match("gemini", PROFILES.iter().copied()), None);
        assert_eq!(fuzzy_match("", PROFILES.iter().copied()), None);
        assert_eq!(fuzzy_match("---", PROFILES.iter().copied()), None);
    }

    #[test]
    fn test_empty_candidates() {
        assert_eq!(fuzzy_match("local", std::iter::empty()), None);
    }

    #[test]
    fn test_profile_lookup_returns_profile() {
        use npcspawn_config::EndpointKind;
        let profiles = vec![
            BackendProfile::new("claude-fast", EndpointKind::Anthropic),
            BackendProfile::new("openrouter-mistral", EndpointKind::OpenAi),
        ];
        let hit = fuzzy_match_profile("Claude Fast", &profiles).unwrap();
        assert_eq!(hit.kind, EndpointKind::Anthropic);
        assert!(fuzzy_match_profile("gemini", &profiles).is_none());
    }

    #[test]
    fn test_profile_lookup_over_shared_profiles() {
        use npcspawn_config::EndpointKind;
        use std::sync::Arc;
        let profiles = vec![
            Arc::new(BackendProfile::new("local-llama", EndpointKind::OpenAi)),
            Arc::new(BackendProfile::new("claude-fast", EndpointKind::Anthropic)),
        ];
        let hit = fuzzy_match_profile("LOCAL_LLAMA", &profiles).unwrap();
        assert!(Arc::ptr_eq(hit, &profiles[0]));
    }
}
