use std::sync::Arc;

use serde::Serialize;

use crate::{
    app::{context::AppContext, errors::AppError, fanout, matches, saga},
    eid::Eid,
    images,
    items::{Item, ItemQuery, NewItem, ReportState},
    semantic::Partition,
    users::User,
};

const PAGE_SIZE: usize = 10;
const LIST_LIMIT: usize = 100;

/// Fields of an upload request after the multipart body was read.
#[derive(Debug, Clone)]
pub struct UploadForm {
    pub name: String,
    pub state: ReportState,
    pub description: String,
    pub timestamp: i64,
    pub image: Vec<u8>,
}

/// One of the caller's items paired with one of its matches and the contact
/// details of whoever reported the match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub item_id: Eid,
    pub item_name: String,
    pub item_state: ReportState,
    pub item_image: String,
    pub matched_item_id: Eid,
    pub matched_item_name: String,
    pub matched_item_state: ReportState,
    pub matched_item_description: String,
    pub matched_item_image: String,
    pub matched_item_timestamp: i64,
    pub owner_name: String,
    pub owner_phone: String,
    pub owner_mail: String,
}

const UNKNOWN: &str = "Unknown";

pub struct ItemService {
    ctx: Arc<AppContext>,
}

impl ItemService {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    /// Resolves a raw token to the user it was issued for.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<User, AppError> {
        let token = token.ok_or(AppError::MissingToken)?;
        let claims = self.ctx.signer.verify(token)?;

        self.ctx
            .downstream("load user", self.ctx.users.get(&claims.sub))
            .await?
            .ok_or(AppError::Unauthorized)
    }

    pub async fn upload(&self, caller: &User, form: UploadForm) -> Result<Item, AppError> {
        let new_item = NewItem::new(
            &caller.mail,
            &form.name,
            form.state,
            &form.description,
            form.timestamp,
        )?;
        images::sniff_image(&form.image)?;

        let ingested = saga::ingest(&self.ctx, new_item, form.image).await?;
        let item = ingested.item;

        let matched = async {
            let candidates = fanout::candidates(
                &self.ctx,
                item.state,
                &ingested.text_vector,
                &ingested.image_vector,
            )
            .await?;
            matches::propagate(&self.ctx, &item, candidates).await
        }
        .await;

        match matched {
            Ok(outcome) => {
                log::debug!("{} propagation: {outcome:?}", item.id);
                Ok(item)
            }
            Err(err) => {
                log::error!("matching failed for committed item {}: {err}", item.id);
                Err(AppError::MatchPhase {
                    item_id: item.id,
                    cause: Box::new(err),
                })
            }
        }
    }

    /// Deletes the caller's item. Once the record is gone, the object, the
    /// vectors and references from other items are removed best effort.
    pub async fn delete_item(&self, caller: &User, item_id: &str) -> Result<(), AppError> {
        let id: Eid = item_id.parse().map_err(|_| AppError::NotFound("item"))?;

        let item = self
            .ctx
            .downstream("load item", self.ctx.items.get(&id))
            .await?
            .ok_or(AppError::NotFound("item"))?;

        if item.owner_mail != caller.mail {
            return Err(AppError::Forbidden("you don't have permission to delete this item"));
        }

        let deleted = self
            .ctx
            .downstream("delete record", self.ctx.items.delete(&id))
            .await?;
        if !deleted {
            return Err(AppError::NotFound("item"));
        }

        if let Err(err) = self
            .ctx
            .downstream("destroy object", self.ctx.objects.destroy(id.as_str()))
            .await
        {
            log::warn!("item {id} deleted but its image was not: {err}");
        }

        for partition in [Partition::text(item.state), Partition::image(item.state)] {
            if let Err(err) = self
                .ctx
                .downstream(
                    "delete vector",
                    self.ctx.index.delete(partition, std::slice::from_ref(&id)),
                )
                .await
            {
                log::warn!("item {id} deleted but its {partition} vector was not: {err}");
            }
        }

        match matches::prune_references(&self.ctx, &id).await {
            Ok(count) => log::info!("deleted item {id}, pruned from {count} match list(s)"),
            Err(err) => log::warn!("item {id} deleted but references remain: {err}"),
        }

        Ok(())
    }

    async fn owned_item(&self, caller: &User, item_id: &str) -> Result<Item, AppError> {
        let id: Eid = item_id.parse().map_err(|_| AppError::NotFound("item"))?;

        self.ctx
            .downstream("load item", self.ctx.items.get(&id))
            .await?
            .filter(|item| item.owner_mail == caller.mail)
            .ok_or(AppError::NotFound("item"))
    }

    pub async fn matched_items(&self, caller: &User, item_id: &str) -> Result<Vec<Item>, AppError> {
        let item = self.owned_item(caller, item_id).await?;
        matches::resolve(&self.ctx, &item).await
    }

    pub async fn delete_matched(&self, caller: &User, item_id: &str, matched_item_id: &str) -> Result<(), AppError> {
        let id: Eid = item_id.parse().map_err(|_| AppError::NotFound("item"))?;
        let matched: Eid = matched_item_id
            .parse()
            .map_err(|_| AppError::NotFound("matched item"))?;

        matches::remove_single(&self.ctx, &caller.mail, &id, &matched).await
    }

    pub async fn user_items(&self, caller: &User) -> Result<Vec<Item>, AppError> {
        self.ctx
            .downstream(
                "list items",
                self.ctx.items.search(ItemQuery {
                    owner: Some(caller.mail.clone()),
                    committed_only: true,
                    limit: Some(LIST_LIMIT),
                    ..Default::default()
                }),
            )
            .await
    }

    pub async fn notifications(&self, caller: &User) -> Result<Vec<Notification>, AppError> {
        let mut notifications = vec![];

        for item in self.user_items(caller).await? {
            for matched in matches::resolve(&self.ctx, &item).await? {
                let owner = self
                    .ctx
                    .downstream("load owner", self.ctx.users.find_by_mail(&matched.owner_mail))
                    .await?;

                let (owner_name, owner_phone, owner_mail) = match owner {
                    Some(owner) => (owner.name, owner.phone, owner.mail),
                    None => (UNKNOWN.to_string(), UNKNOWN.to_string(), UNKNOWN.to_string()),
                };

                notifications.push(Notification {
                    item_id: item.id.clone(),
                    item_name: item.name.clone(),
                    item_state: item.state,
                    item_image: item.image_url.clone(),
                    matched_item_id: matched.id,
                    matched_item_name: matched.name,
                    matched_item_state: matched.state,
                    matched_item_description: matched.description,
                    matched_item_image: matched.image_url,
                    matched_item_timestamp: matched.created_at,
                    owner_name,
                    owner_phone,
                    owner_mail,
                });
            }
        }

        Ok(notifications)
    }

    /// Other users' committed items, ten per page. Pages start at 1; anything
    /// lower is treated as 1.
    pub async fn browse(&self, caller: &User, page: i64) -> Result<Vec<Item>, AppError> {
        let page = page.max(1) as usize;

        self.ctx
            .downstream(
                "browse items",
                self.ctx.items.search(ItemQuery {
                    exclude_owner: Some(caller.mail.clone()),
                    committed_only: true,
                    skip: (page - 1).saturating_mul(PAGE_SIZE),
                    limit: Some(PAGE_SIZE),
                    ..Default::default()
                }),
            )
            .await
    }

    pub async fn update_push_token(&self, caller: &User, token: &str) -> Result<(), AppError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::Validation("token is required".to_string()));
        }

        let updated = self
            .ctx
            .downstream("store push token", self.ctx.users.set_push_token(&caller.id, token))
            .await?;

        if !updated {
            return Err(AppError::NotFound("user"));
        }

        log::info!("stored push token for {}", caller.mail);
        Ok(())
    }
}
