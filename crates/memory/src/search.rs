/// Hybrid search: vector similarity blended with keyword overlap.
use {serde::Serialize, tracing::debug};

use crate::{
    embeddings::{EmbeddingProvider, dot},
    query::{expanded_keywords, tokenize},
    schema::ChunkRow,
    store::MemoryStore,
};

/// Lower bound on the candidate pool handed to the rerank stages.
const MIN_CANDIDATE_POOL: usize = 20;

/// A scored chunk. `score` is rewritten by each ranking stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub source: String,
    pub content: String,
    pub updated_at: i64,
    pub score: f64,
}

impl SearchResult {
    fn from_row(row: ChunkRow, score: f64) -> Self {
        Self {
            id: row.id,
            source: row.source,
            content: row.content,
            updated_at: row.updated_at,
            score,
        }
    }
}

pub fn candidate_pool_size(top_k: usize) -> usize {
    top_k.saturating_mul(4).max(MIN_CANDIDATE_POOL)
}

/// Fraction of `keywords` present in the token set of `content`.
fn lexical_score(keywords: &[String], content: &str) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let tokens = tokenize(content);
    let hits = keywords.iter().filter(|kw| tokens.contains(kw.as_str())).count();
    hits as f64 / keywords.len() as f64
}

/// Score every stored chunk against `query` and return the best candidates.
///
/// Rows whose embedding is missing or has the wrong dimension only contribute
/// their lexical score. The result holds at most `max(top_k * 4, 20)` entries,
/// sorted by descending score with ties broken by chunk id.
pub async fn hybrid_search(
    store: &dyn MemoryStore,
    embedder: &dyn EmbeddingProvider,
    query: &str,
    top_k: usize,
    vector_weight: f64,
    keyword_weight: f64,
) -> anyhow::Result<Vec<SearchResult>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let rows = store.all_chunks().await?;
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let query_embedding = embedder.embed(query).await?;
    let keywords = expanded_keywords(query);
    debug!(
        query,
        keywords = keywords.len(),
        chunks = rows.len(),
        "hybrid search"
    );

    let mut results: Vec<SearchResult> = rows
        .into_iter()
        .map(|row| {
            let semantic = dot(&query_embedding, &row.embedding);
            let lexical = lexical_score(&keywords, &row.content);
            let score = vector_weight * semantic + keyword_weight * lexical;
            SearchResult::from_row(row, score)
        })
        .collect();

    results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    results.truncate(candidate_pool_size(top_k));
    Ok(results)
}
