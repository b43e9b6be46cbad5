use crate::{
    app::{errors::AppError, notify::NotificationDispatcher},
    auth::TokenSigner,
    config::{ImagesConfig, MatchingConfig, TimeoutsConfig},
    items::DocumentStore,
    semantic::{EmbeddingGateway, SimilarityIndex},
    storage::ObjectStore,
    users::UserDirectory,
};
use anyhow::{Context, Result};
use std::{future::Future, sync::Arc, time::Duration};

/// Every collaborator a request handler may touch, passed explicitly.
pub struct AppContext {
    pub items: Arc<dyn DocumentStore>,
    pub users: Arc<dyn UserDirectory>,
    pub objects: Arc<dyn ObjectStore>,
    pub embeddings: Arc<dyn EmbeddingGateway>,
    pub index: Arc<dyn SimilarityIndex>,
    pub notifier: NotificationDispatcher,
    pub signer: TokenSigner,
    pub matching: MatchingConfig,
    pub timeouts: TimeoutsConfig,
    pub images: ImagesConfig,
}

impl AppContext {
    /// Runs a store, index or push call under the downstream timeout.
    pub async fn downstream<T, E>(
        &self,
        step: &'static str,
        fut: impl Future<Output = std::result::Result<T, E>>,
    ) -> std::result::Result<T, AppError>
    where
        E: Into<anyhow::Error>,
    {
        bounded(step, self.timeouts.downstream(), fut).await
    }

    /// Runs an embedding call under the embedding timeout.
    pub async fn embedding<T, E>(
        &self,
        step: &'static str,
        fut: impl Future<Output = std::result::Result<T, E>>,
    ) -> std::result::Result<T, AppError>
    where
        E: Into<anyhow::Error>,
    {
        bounded(step, self.timeouts.embedding(), fut).await
    }
}

/// Bounds `fut` by `limit`. Both expiry and the call's own error surface as
/// [`AppError::Downstream`] tagged with `step`.
pub async fn bounded<T, E>(
    step: &'static str,
    limit: Duration,
    fut: impl Future<Output = std::result::Result<T, E>>,
) -> std::result::Result<T, AppError>
where
    E: Into<anyhow::Error>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(AppError::downstream(step, err)),
        Err(_) => Err(AppError::downstream(
            step,
            anyhow::anyhow!("timed out after {limit:?}"),
        )),
    }
}

/// Builder for creating application contexts
#[derive(Default)]
pub struct AppContextBuilder {
    items: Option<Arc<dyn DocumentStore>>,
    users: Option<Arc<dyn UserDirectory>>,
    objects: Option<Arc<dyn ObjectStore>>,
    embeddings: Option<Arc<dyn EmbeddingGateway>>,
    index: Option<Arc<dyn SimilarityIndex>>,
    push: Option<Arc<dyn crate::app::notify::PushSender>>,
    signer: Option<TokenSigner>,
    matching: MatchingConfig,
    timeouts: TimeoutsConfig,
    images: ImagesConfig,
}

impl AppContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(mut self, items: Arc<dyn DocumentStore>) -> Self {
        self.items = Some(items);
        self
    }

    pub fn users(mut self, users: Arc<dyn UserDirectory>) -> Self {
        self.users = Some(users);
        self
    }

    pub fn objects(mut self, objects: Arc<dyn ObjectStore>) -> Self {
        self.objects = Some(objects);
        self
    }

    pub fn embeddings(mut self, embeddings: Arc<dyn EmbeddingGateway>) -> Self {
        self.embeddings = Some(embeddings);
        self
    }

    pub fn index(mut self, index: Arc<dyn SimilarityIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn push(mut self, push: Arc<dyn crate::app::notify::PushSender>) -> Self {
        self.push = Some(push);
        self
    }

    pub fn signer(mut self, signer: TokenSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn matching(mut self, matching: MatchingConfig) -> Self {
        self.matching = matching;
        self
    }

    pub fn timeouts(mut self, timeouts: TimeoutsConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn images(mut self, images: ImagesConfig) -> Self {
        self.images = images;
        self
    }

    pub fn build(self) -> Result<AppContext> {
        let users = self.users.context("user directory is required")?;
        let push = self.push.context("push sender is required")?;
        let notifier = NotificationDispatcher::new(users.clone(), push, self.timeouts.downstream());

        Ok(AppContext {
            items: self.items.context("document store is required")?,
            users,
            objects: self.objects.context("object store is required")?,
            embeddings: self.embeddings.context("embedding gateway is required")?,
            index: self.index.context("similarity index is required")?,
            notifier,
            signer: self.signer.context("token signer is required")?,
            matching: self.matching,
            timeouts: self.timeouts,
            images: self.images,
        })
    }
}
