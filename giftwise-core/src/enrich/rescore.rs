//! Keyword re-scoring against the product text.

use crate::rag::{cosine_similarity, Embedder, EmbedderError};
use tracing::debug;

/// Ranks `candidates` by cosine similarity to `base_text`.
///
/// One embedding request covers `[base_text] + candidates`. Candidates at or
/// above `min_similarity` are kept, best first, up to `top_k`. When none
/// clears the floor the best `top_k` are returned anyway, so the result is
/// only empty when there were no candidates. `top_k` below 1 counts as 1.
pub async fn rescore(
    embedder: &Embedder,
    base_text: &str,
    candidates: &[String],
    top_k: usize,
    min_similarity: f32,
) -> Result<Vec<String>, EmbedderError> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }
    let top_k = top_k.max(1);

    let mut inputs = Vec::with_capacity(candidates.len() + 1);
    inputs.push(base_text.to_string());
    inputs.extend(candidates.iter().cloned());
    let vectors = embedder.embed_batch(&inputs).await?;
    let (base, rest) = vectors.split_first().ok_or(EmbedderError::CountMismatch {
        expected: inputs.len(),
        got: 0,
    })?;

    let mut ranked: Vec<(&String, f32)> = candidates
        .iter()
        .zip(rest)
        .map(|(c, v)| (c, cosine_similarity(v, base)))
        .collect();
    // sort_by is stable: equal scores keep candidate order
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    let kept: Vec<String> = ranked
        .iter()
        .filter(|(_, sim)| *sim >= min_similarity)
        .take(top_k)
        .map(|(c, _)| (*c).clone())
        .collect();
    if !kept.is_empty() {
        return Ok(kept);
    }

    debug!(
        "No keyword reached similarity {}; keeping the top {} by rank",
        min_similarity, top_k
    );
    Ok(ranked.iter().take(top_k).map(|(c, _)| (*c).clone()).collect())
}
