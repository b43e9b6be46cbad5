//! Maintains the `matches` adjacency between lost and found reports.
//!
//! The protocol is deliberately one-sided:
//! - a new lost item overwrites its own `matches` with the found candidates
//! - a new found item appends its id to each lost candidate's `matches` and
//!   never records anything on itself
//!
//! The overwrite and the append are separate single-record writes with no
//! coordination. A found item ingested while a lost item is still being
//! matched can append to that lost item just before the overwrite lands, and
//! the append is then lost.

use crate::{
    app::{context::AppContext, errors::AppError, notify::PushMessage},
    eid::Eid,
    items::{Item, ItemQuery},
};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Propagation {
    /// Items whose `matches` gained entries.
    pub updated: Vec<Eid>,
    /// Pushes the push service accepted.
    pub notified: usize,
}

/// Loads candidate records, dropping the item itself, ids that no longer
/// resolve to a record, and records owned by the item's owner.
async fn eligible(ctx: &AppContext, item: &Item, candidates: Vec<Eid>) -> Result<Vec<Item>, AppError> {
    let mut eligible = Vec::with_capacity(candidates.len());

    for id in candidates {
        if id == item.id {
            continue;
        }

        let Some(candidate) = ctx.downstream("load candidate", ctx.items.get(&id)).await? else {
            log::debug!("candidate {id} has no record, skipping");
            continue;
        };

        if candidate.owner_mail == item.owner_mail {
            continue;
        }

        eligible.push(candidate);
    }

    Ok(eligible)
}

pub async fn propagate(ctx: &AppContext, item: &Item, candidates: Vec<Eid>) -> Result<Propagation, AppError> {
    let eligible = eligible(ctx, item, candidates).await?;

    if item.state.is_lost() {
        propagate_lost(ctx, item, eligible).await
    } else {
        propagate_found(ctx, item, eligible).await
    }
}

async fn propagate_lost(ctx: &AppContext, item: &Item, found: Vec<Item>) -> Result<Propagation, AppError> {
    let ids: Vec<Eid> = found.into_iter().map(|f| f.id).collect();
    let count = ids.len();

    ctx.downstream("write matches", ctx.items.set_matches(&item.id, ids))
        .await?;

    let mut outcome = Propagation::default();
    if count == 0 {
        return Ok(outcome);
    }

    outcome.updated.push(item.id.clone());
    let message = PushMessage::new_matches(&item.name, item.id.as_str(), count);
    if ctx.notifier.notify_owner(&item.owner_mail, message).await {
        outcome.notified += 1;
    }

    log::info!("lost item {} matched {count} found item(s)", item.id);
    Ok(outcome)
}

async fn propagate_found(ctx: &AppContext, item: &Item, lost: Vec<Item>) -> Result<Propagation, AppError> {
    let mut outcome = Propagation::default();

    for target in lost {
        let pushed = ctx
            .downstream("append match", ctx.items.push_match(&target.id, &item.id))
            .await?;
        if !pushed {
            log::debug!("lost item {} vanished before append", target.id);
            continue;
        }
        outcome.updated.push(target.id.clone());

        let message = PushMessage::new_matches(&target.name, target.id.as_str(), 1);
        if ctx.notifier.notify_owner(&target.owner_mail, message).await {
            outcome.notified += 1;
        }
    }

    log::info!(
        "found item {} appended to {} lost item(s)",
        item.id,
        outcome.updated.len()
    );
    Ok(outcome)
}

/// Removes one entry from the caller's own item. The peer is not touched.
pub async fn remove_single(
    ctx: &AppContext,
    owner_mail: &str,
    item_id: &Eid,
    matched_id: &Eid,
) -> Result<(), AppError> {
    let item = ctx
        .downstream("load item", ctx.items.get(item_id))
        .await?
        .filter(|item| item.owner_mail == owner_mail)
        .ok_or(AppError::NotFound("item"))?;

    if !item.matches.contains(matched_id) {
        return Err(AppError::NotFound("matched item"));
    }

    ctx.downstream("remove match", ctx.items.pull_match(item_id, matched_id))
        .await?;
    Ok(())
}

/// Drops `removed` from every other item's `matches`.
pub async fn prune_references(ctx: &AppContext, removed: &Eid) -> Result<usize, AppError> {
    ctx.downstream("prune matches", ctx.items.pull_match_everywhere(removed))
        .await
}

/// Resolves an item's `matches` to records, skipping ids that no longer exist.
pub async fn resolve(ctx: &AppContext, item: &Item) -> Result<Vec<Item>, AppError> {
    if item.matches.is_empty() {
        return Ok(vec![]);
    }

    ctx.downstream(
        "load matches",
        ctx.items.search(ItemQuery {
            ids: Some(item.matches.clone()),
            limit: Some(100),
            ..Default::default()
        }),
    )
    .await
}
