//! Maximal marginal relevance: greedy top-K selection trading relevance for diversity.
//!
//! Similarity between candidates is token-set Jaccard overlap, so no embeddings are
//! needed at this stage. Results sharing a source are penalized progressively.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::{config::MmrConfig, query::word_tokens, search::SearchResult};

const EPSILON: f64 = 1e-12;

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn source_penalty(selected_from_source: usize, config: &MmrConfig) -> f64 {
    let n = selected_from_source;
    let w = config.source_penalty_weight;
    let mut penalty = w * n as f64;
    if n >= config.max_per_source_soft {
        penalty += w * (n + 1 - config.max_per_source_soft) as f64;
    }
    penalty
}

/// Min-max normalized scores; a pool where every score is equal maps to all ones.
fn normalized_relevance(candidates: &[SearchResult]) -> Vec<f64> {
    let (min, max) = candidates
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), c| {
            (lo.min(c.score), hi.max(c.score))
        });
    let range = max - min;
    candidates
        .iter()
        .map(|c| {
            if range <= EPSILON {
                1.0
            } else {
                (c.score - min) / range
            }
        })
        .collect()
}

/// Positions of the chosen candidates, in selection order.
fn select(candidates: &[SearchResult], top_k: usize, config: &MmrConfig) -> Vec<usize> {
    let relevance = normalized_relevance(candidates);
    let lambda = config.lambda;
    // Pure relevance ranking ignores overlap entirely, including the threshold.
    let skip_near_duplicates = lambda < 1.0;

    let mut token_sets: HashMap<&str, HashSet<String>> = HashMap::new();
    for c in candidates {
        token_sets
            .entry(c.id.as_str())
            .or_insert_with(|| word_tokens(&c.content).collect());
    }
    let mut max_similarity: HashMap<&str, f64> =
        candidates.iter().map(|c| (c.id.as_str(), 0.0)).collect();
    let mut per_source: HashMap<&str, usize> = HashMap::new();

    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut chosen = Vec::with_capacity(top_k.min(candidates.len()));

    while chosen.len() < top_k && !remaining.is_empty() {
        let sim_of = |i: usize| {
            max_similarity
                .get(candidates[i].id.as_str())
                .copied()
                .unwrap_or(0.0)
        };
        let any_distinct = remaining
            .iter()
            .any(|&i| sim_of(i) <= config.similarity_threshold);

        // (slot in `remaining`, mmr score, raw score)
        let mut best: Option<(usize, f64, f64)> = None;
        for (slot, &i) in remaining.iter().enumerate() {
            let sim = sim_of(i);
            if skip_near_duplicates && any_distinct && sim > config.similarity_threshold {
                continue;
            }
            let candidate = &candidates[i];
            let same_source = per_source
                .get(candidate.source.as_str())
                .copied()
                .unwrap_or(0);
            let mmr = lambda * relevance[i]
                - (1.0 - lambda) * sim
                - source_penalty(same_source, config);

            let better = match best {
                None => true,
                Some((_, best_mmr, best_raw)) => {
                    mmr > best_mmr + EPSILON
                        || ((mmr - best_mmr).abs() <= EPSILON && candidate.score > best_raw)
                },
            };
            if better {
                best = Some((slot, mmr, candidate.score));
            }
        }

        let Some((slot, ..)) = best else {
            break;
        };
        let picked = remaining.remove(slot);
        let picked_id = candidates[picked].id.as_str();
        *per_source
            .entry(candidates[picked].source.as_str())
            .or_default() += 1;

        if let Some(picked_tokens) = token_sets.get(picked_id) {
            for &j in &remaining {
                let id = candidates[j].id.as_str();
                let sim = token_sets
                    .get(id)
                    .map(|t| jaccard(t, picked_tokens))
                    .unwrap_or(0.0);
                if let Some(current) = max_similarity.get_mut(id)
                    && sim > *current
                {
                    *current = sim;
                }
            }
        }
        chosen.push(picked);
    }
    chosen
}

/// Choose up to `top_k` results from `candidates`, balancing relevance against
/// overlap with what has already been chosen.
///
/// `lambda = 1` keeps relevance order (only source penalties still apply);
/// `lambda = 0` picks purely for diversity. Below `lambda = 1`, candidates whose
/// overlap with the selection exceeds `similarity_threshold` are only taken once
/// nothing else is left. Scores are returned unchanged.
pub fn mmr_rerank(
    candidates: Vec<SearchResult>,
    top_k: usize,
    config: &MmrConfig,
) -> Vec<SearchResult> {
    if top_k == 0 || candidates.is_empty() {
        return Vec::new();
    }

    let order = select(&candidates, top_k, config);
    debug!(
        pool = candidates.len(),
        selected = order.len(),
        lambda = config.lambda,
        "mmr rerank"
    );

    let mut slots: Vec<Option<SearchResult>> = candidates.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|i| slots.get_mut(i).and_then(Option::take))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, source: &str, content: &str, score: f64) -> SearchResult {
        SearchResult {
            id: id.into(),
            source: source.into(),
            content: content.into(),
            updated_at: 1,
            score,
        }
    }

    fn ids(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.id.as_str()).collect()
    }

    fn cfg(lambda: f64) -> MmrConfig {
        MmrConfig {
            lambda,
            ..Default::default()
        }
    }

    #[test]
    fn lambda_one_is_relevance_order() {
        let pool = vec![
            result("a", "a.md", "alpha one", 0.9),
            result("b", "b.md", "beta two", 0.7),
            result("c", "c.md", "gamma three", 0.8),
            result("d", "d.md", "delta four", 0.1),
        ];
        let out = mmr_rerank(pool, 4, &cfg(1.0));
        assert_eq!(ids(&out), vec!["a", "c", "b", "d"]);
    }

    #[test]
    fn lambda_one_keeps_identical_content_in_relevance_order() {
        let pool = vec![
            result("a", "a.md", "weather in austin is sunny today", 1.0),
            result("b", "b.md", "weather in austin is sunny today", 0.9),
            result("c", "c.md", "my timezone is est", 0.1),
        ];
        let out = mmr_rerank(pool, 3, &cfg(1.0));
        assert_eq!(ids(&out), vec!["a", "b", "c"]);
    }

    #[test]
    fn lambda_zero_avoids_adjacent_duplicates() {
        let pool = vec![
            result("a", "a.md", "weather in austin is sunny today", 1.0),
            result("b", "b.md", "weather in austin is sunny today", 0.95),
            result("c", "c.md", "my timezone is est", 0.5),
        ];
        let no_threshold = MmrConfig {
            lambda: 0.0,
            similarity_threshold: 1.0,
            ..Default::default()
        };
        let out = mmr_rerank(pool, 3, &no_threshold);
        assert_eq!(ids(&out), vec!["a", "c", "b"]);
    }

    #[test]
    fn near_duplicates_are_skipped_while_alternatives_remain() {
        let pool = vec![
            result("a", "a.md", "weather in austin is sunny today", 1.0),
            result("b", "b.md", "weather in austin is sunny today", 0.99),
            result("c", "c.md", "my timezone is est", 0.1),
        ];
        let out = mmr_rerank(pool.clone(), 2, &cfg(0.7));
        assert_eq!(ids(&out), vec!["a", "c"]);

        // Backfilled once nothing distinct is left.
        let out = mmr_rerank(pool, 3, &cfg(0.7));
        assert_eq!(ids(&out), vec!["a", "c", "b"]);
    }

    #[test]
    fn source_penalty_spreads_sources() {
        let pool = vec![
            result("a", "notes.md", "first entry alpha", 1.0),
            result("b", "notes.md", "second entry beta", 0.9),
            result("c", "other.md", "third entry gamma", 0.8),
        ];
        let config = MmrConfig {
            lambda: 1.0,
            source_penalty_weight: 0.6,
            ..Default::default()
        };
        let out = mmr_rerank(pool, 3, &config);
        assert_eq!(ids(&out), vec!["a", "c", "b"]);
    }

    #[test]
    fn penalty_slope_doubles_after_soft_limit() {
        let config = MmrConfig {
            source_penalty_weight: 0.1,
            max_per_source_soft: 2,
            ..Default::default()
        };
        assert_eq!(source_penalty(0, &config), 0.0);
        assert!((source_penalty(1, &config) - 0.1).abs() < 1e-12);
        assert!((source_penalty(2, &config) - 0.3).abs() < 1e-12);
        assert!((source_penalty(3, &config) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn equal_scores_keep_pool_order() {
        let pool = vec![
            result("x", "x.md", "one", 0.5),
            result("y", "y.md", "two", 0.5),
            result("z", "z.md", "three", 0.5),
        ];
        assert_eq!(normalized_relevance(&pool), vec![1.0, 1.0, 1.0]);
        assert_eq!(ids(&mmr_rerank(pool, 3, &cfg(0.7))), vec!["x", "y", "z"]);
    }

    #[test]
    fn k_bounds() {
        let pool = vec![
            result("a", "a.md", "one", 0.9),
            result("b", "b.md", "two", 0.3),
        ];
        assert!(mmr_rerank(pool.clone(), 0, &cfg(0.7)).is_empty());
        assert_eq!(mmr_rerank(pool, 10, &cfg(0.7)).len(), 2);
        assert!(mmr_rerank(Vec::new(), 3, &cfg(0.7)).is_empty());
    }

    #[test]
    fn jaccard_overlap() {
        let a: HashSet<String> = ["x", "y"].iter().map(|s| s.to_string()).collect();
        let b: HashSet<String> = ["y", "z"].iter().map(|s| s.to_string()).collect();
        assert!((jaccard(&a, &b) - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(jaccard(&HashSet::new(), &HashSet::new()), 0.0);
    }
}
