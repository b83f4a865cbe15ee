//! Recency reweighting: older chunks lose score at a rate chosen from the query's intent.

use tracing::trace;

use crate::{config::DecayConfig, query::word_tokens, search::SearchResult};

const MS_PER_DAY: f64 = 86_400_000.0;

const TEMPORAL_WORDS: &[&str] = &[
    "today", "tonight", "yesterday", "tomorrow", "latest", "recent", "recently", "lately", "current",
    "currently", "now", "status", "update", "updates", "progress", "news", "upcoming", "week",
    "weekend", "morning",
];

const EVERGREEN_WORDS: &[&str] = &[
    "preference", "preferences", "prefer", "favorite", "favourite", "timezone", "birthday", "born",
    "identity", "name", "address", "allergy", "allergic", "always", "usually", "habit", "habits",
    "family", "email", "phone", "language",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    /// Asks about what is happening now; stale facts should fade fast.
    Temporal,
    /// Asks about stable facts; age barely matters.
    Evergreen,
    Mixed,
    Neutral,
}

pub fn classify_intent(query: &str) -> QueryIntent {
    let mut temporal = false;
    let mut evergreen = false;
    for token in word_tokens(query) {
        temporal |= TEMPORAL_WORDS.contains(&token.as_str());
        evergreen |= EVERGREEN_WORDS.contains(&token.as_str());
    }
    match (temporal, evergreen) {
        (true, false) => QueryIntent::Temporal,
        (false, true) => QueryIntent::Evergreen,
        (true, true) => QueryIntent::Mixed,
        (false, false) => QueryIntent::Neutral,
    }
}

pub fn half_life_for(intent: QueryIntent, config: &DecayConfig) -> f64 {
    match intent {
        QueryIntent::Temporal => config.temporal_half_life_days,
        QueryIntent::Evergreen => config.evergreen_half_life_days,
        QueryIntent::Mixed | QueryIntent::Neutral => config.half_life_days,
    }
}

/// `max(min, 2^(-age / half_life))`. Negative ages count as zero; a non-positive
/// half-life disables decay.
pub fn decay_multiplier(age_days: f64, half_life_days: f64, min_multiplier: f64) -> f64 {
    if half_life_days.is_nan() || half_life_days <= 0.0 {
        return 1.0;
    }
    let age = age_days.max(0.0);
    (-std::f64::consts::LN_2 / half_life_days * age)
        .exp()
        .max(min_multiplier)
}

/// Multiply each score by its recency multiplier. Results without a timestamp
/// (`updated_at <= 0`) are left alone.
pub fn apply_decay(results: &mut [SearchResult], query: &str, config: &DecayConfig, now_ms: i64) {
    let intent = classify_intent(query);
    let half_life = half_life_for(intent, config);
    trace!(?intent, half_life, "applying recency decay");

    for result in results.iter_mut().filter(|r| r.updated_at > 0) {
        let age_days = (now_ms - result.updated_at) as f64 / MS_PER_DAY;
        result.score *= decay_multiplier(age_days, half_life, config.min_multiplier);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_MS: i64 = 86_400_000;

    fn result(id: &str, updated_at: i64, score: f64) -> SearchResult {
        SearchResult {
            id: id.into(),
            source: format!("{id}.md"),
            content: String::new(),
            updated_at,
            score,
        }
    }

    #[test]
    fn intent_classification() {
        assert_eq!(classify_intent("today's weather"), QueryIntent::Temporal);
        assert_eq!(classify_intent("What's my timezone?"), QueryIntent::Evergreen);
        assert_eq!(
            classify_intent("latest update on my birthday plans"),
            QueryIntent::Mixed
        );
        assert_eq!(classify_intent("pasta recipe"), QueryIntent::Neutral);
    }

    #[test]
    fn half_life_follows_intent() {
        let cfg = DecayConfig::default();
        assert_eq!(half_life_for(QueryIntent::Temporal, &cfg), cfg.temporal_half_life_days);
        assert_eq!(half_life_for(QueryIntent::Evergreen, &cfg), cfg.evergreen_half_life_days);
        assert_eq!(half_life_for(QueryIntent::Mixed, &cfg), cfg.half_life_days);
        assert_eq!(half_life_for(QueryIntent::Neutral, &cfg), cfg.half_life_days);
    }

    #[test]
    fn multiplier_halves_at_half_life_and_is_floored() {
        assert!((decay_multiplier(0.0, 30.0, 0.0) - 1.0).abs() < 1e-12);
        assert!((decay_multiplier(30.0, 30.0, 0.0) - 0.5).abs() < 1e-12);
        assert_eq!(decay_multiplier(10_000.0, 30.0, 0.2), 0.2);
        assert_eq!(decay_multiplier(-5.0, 30.0, 0.2), 1.0);
        assert_eq!(decay_multiplier(10.0, 0.0, 0.2), 1.0);
    }

    #[test]
    fn multiplier_is_monotone_in_age() {
        let mut prev = f64::INFINITY;
        for age in [0.0, 1.0, 7.0, 30.0, 90.0, 365.0] {
            let m = decay_multiplier(age, 30.0, 0.0);
            assert!(m <= prev);
            prev = m;
        }
    }

    #[test]
    fn temporal_queries_decay_faster_than_evergreen() {
        let cfg = DecayConfig::default();
        let now = 1_000 * DAY_MS;
        let mut latest = vec![result("a", now - 60 * DAY_MS, 1.0)];
        let mut birthday = latest.clone();

        apply_decay(&mut latest, "latest", &cfg, now);
        apply_decay(&mut birthday, "birthday", &cfg, now);
        assert!(latest[0].score < birthday[0].score);
        assert!(latest[0].score >= cfg.min_multiplier);
    }

    #[test]
    fn undated_results_are_untouched() {
        let cfg = DecayConfig::default();
        let mut results = vec![result("a", 0, 0.9), result("b", -1, 0.4)];
        apply_decay(&mut results, "today", &cfg, 100 * DAY_MS);
        assert_eq!(results[0].score, 0.9);
        assert_eq!(results[1].score, 0.4);
    }
}
