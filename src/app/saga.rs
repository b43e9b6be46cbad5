//! Creates one item across the document store, object store and similarity
//! index, or leaves none of them changed.
//!
//! Each step that succeeds records how to undo itself. On the first failure
//! the recorded compensations run newest-first and the original error is
//! returned; a failing compensation is logged and the rest still run.

use crate::{
    app::{context::AppContext, errors::AppError},
    eid::Eid,
    images,
    items::{Item, NewItem},
    semantic::Partition,
};

#[derive(Debug, Clone, PartialEq)]
enum Compensation {
    DeleteRecord(Eid),
    DestroyObject(String),
    DeleteVector(Partition, Eid),
}

#[derive(Debug, Default)]
struct Compensations(Vec<Compensation>);

impl Compensations {
    fn push(&mut self, step: Compensation) {
        self.0.push(step);
    }

    async fn unwind(self, ctx: &AppContext) {
        for step in self.0.into_iter().rev() {
            let result = match &step {
                Compensation::DeleteRecord(id) => ctx
                    .downstream("delete record", ctx.items.delete(id))
                    .await
                    .map(|_| ()),
                Compensation::DestroyObject(key) => {
                    ctx.downstream("destroy object", ctx.objects.destroy(key)).await
                }
                Compensation::DeleteVector(partition, id) => {
                    ctx.downstream(
                        "delete vector",
                        ctx.index.delete(*partition, std::slice::from_ref(id)),
                    )
                    .await
                }
            };

            match result {
                Ok(()) => log::info!("compensated {step:?}"),
                Err(err) => log::error!("compensation {step:?} failed: {err}"),
            }
        }
    }
}

/// A committed item together with the vectors that were indexed for it.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub item: Item,
    pub text_vector: Vec<f32>,
    pub image_vector: Vec<f32>,
}

pub async fn ingest(ctx: &AppContext, new_item: NewItem, image: Vec<u8>) -> Result<Ingested, AppError> {
    let mut undo = Compensations::default();

    match run(ctx, &mut undo, new_item, image).await {
        Ok(ingested) => Ok(ingested),
        Err(err) => {
            log::warn!("ingestion failed, rolling back {} step(s): {err}", undo.0.len());
            undo.unwind(ctx).await;
            Err(err)
        }
    }
}

async fn run(
    ctx: &AppContext,
    undo: &mut Compensations,
    new_item: NewItem,
    image: Vec<u8>,
) -> Result<Ingested, AppError> {
    let description = new_item.description().to_string();
    let state = new_item.state();

    let mut item = ctx.downstream("create record", ctx.items.create(new_item)).await?;
    undo.push(Compensation::DeleteRecord(item.id.clone()));
    log::debug!("created record {}", item.id);

    let key = item.id.to_string();
    let stored = {
        let image = image.clone();
        let opts = ctx.images.clone();
        tokio::task::spawn_blocking(move || images::prepare_for_storage(&image, &opts))
            .await
            .map_err(|err| AppError::downstream("prepare image", err))?
    };

    let url = ctx.downstream("upload image", ctx.objects.upload(&key, stored)).await?;
    undo.push(Compensation::DestroyObject(key));

    let updated = ctx
        .downstream("set image url", ctx.items.set_image_url(&item.id, &url))
        .await?;
    if !updated {
        return Err(AppError::downstream(
            "set image url",
            anyhow::anyhow!("record {} vanished", item.id),
        ));
    }
    item.image_url = url;

    // embeddings always use the original upload, not the re-encoded copy
    let text_vector = ctx
        .embedding("embed description", ctx.embeddings.embed_text(&description))
        .await?;
    let image_vector = ctx
        .embedding("embed image", ctx.embeddings.embed_image(&image))
        .await?;

    // registered before the call so a timed-out upsert is still undone
    let text_partition = Partition::text(state);
    undo.push(Compensation::DeleteVector(text_partition, item.id.clone()));
    ctx.downstream(
        "index description",
        ctx.index.upsert(text_partition, &item.id, text_vector.clone()),
    )
    .await?;

    let image_partition = Partition::image(state);
    undo.push(Compensation::DeleteVector(image_partition, item.id.clone()));
    ctx.downstream(
        "index image",
        ctx.index.upsert(image_partition, &item.id, image_vector.clone()),
    )
    .await?;

    log::info!("ingested {} item {}", state.label(), item.id);

    Ok(Ingested {
        item,
        text_vector,
        image_vector,
    })
}
