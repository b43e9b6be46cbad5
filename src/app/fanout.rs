use std::collections::HashSet;

use crate::{
    app::{context::AppContext, errors::AppError},
    eid::Eid,
    items::ReportState,
    semantic::{Partition, SearchResult},
};

/// Queries the text and image partitions of the state opposite to `state`
/// and returns the union of the top-k candidate ids. When a score floor is
/// configured, hits below it are dropped.
pub async fn candidates(
    ctx: &AppContext,
    state: ReportState,
    text_vector: &[f32],
    image_vector: &[f32],
) -> Result<Vec<Eid>, AppError> {
    let target = state.opposite();
    let top_k = ctx.matching.top_k;

    let text_hits = ctx
        .downstream(
            "query descriptions",
            ctx.index.query(Partition::text(target), text_vector, top_k),
        )
        .await?;
    let image_hits = ctx
        .downstream(
            "query images",
            ctx.index.query(Partition::image(target), image_vector, top_k),
        )
        .await?;

    log::debug!(
        "{} text / {} image hits in {} partitions",
        text_hits.len(),
        image_hits.len(),
        target.label()
    );

    Ok(union_by_id(text_hits, image_hits, ctx.matching.min_score))
}

/// An id found by both queries counts once. Text hits come first.
pub fn union_by_id(
    text_hits: Vec<SearchResult>,
    image_hits: Vec<SearchResult>,
    min_score: Option<f32>,
) -> Vec<Eid> {
    let mut seen = HashSet::new();

    text_hits
        .into_iter()
        .chain(image_hits)
        .filter(|hit| min_score.map_or(true, |floor| hit.score >= floor))
        .filter_map(|hit| seen.insert(hit.id.clone()).then_some(hit.id))
        .collect()
}
