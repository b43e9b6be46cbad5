mod web;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::app::notify::{NotifyError, PushMessage, PushSender};
use crate::app::service::UploadForm;
use crate::app::{AppContext, AppContextBuilder, AppError, ItemService};
use crate::auth::TokenSigner;
use crate::config::{MatchingConfig, TimeoutsConfig};
use crate::eid::Eid;
use crate::items::{BackendCsv, DocumentStore, Item, ItemQuery, ReportState};
use crate::semantic::{
    EmbeddingError, EmbeddingGateway, IndexError, LocalIndex, Partition, SearchResult, SimilarityIndex,
};
use crate::storage::{BackendLocal, ObjectStore, StorageError};
use crate::users::{NewUser, User, UserDirectory, UsersCsv};

pub const RED: [u8; 3] = [255, 0, 0];
pub const GREEN: [u8; 3] = [0, 255, 0];
pub const BLUE: [u8; 3] = [0, 0, 255];

const SECRET: &[u8] = b"test-secret-test-secret-test-secret";

/// Each known word owns one text dimension; everything else is ignored.
/// Images embed as their average colour.
pub struct VocabEmbeddings;

const VOCAB: [&str; 11] = [
    "black", "backpack", "zipper", "silver", "watch", "keys", "blue", "umbrella", "wallet", "leather", "phone",
];

impl VocabEmbeddings {
    pub fn text_vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; crate::semantic::embeddings::TEXT_DIMENSIONS];
        for word in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if let Some(dim) = VOCAB.iter().position(|known| *known == word) {
                vector[dim] += 1.0;
            }
        }

        if vector.iter().all(|v| *v == 0.0) {
            *vector.last_mut().unwrap() = 1.0;
        }
        vector
    }

    pub fn image_vector(image: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
        let rgb = image::load_from_memory(image)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?
            .to_rgb8();

        let pixels = (rgb.width() * rgb.height()).max(1) as f32;
        let mut vector = vec![0.0; crate::semantic::embeddings::IMAGE_DIMENSIONS];
        for pixel in rgb.pixels() {
            for channel in 0..3 {
                vector[channel] += pixel[channel] as f32 / 255.0 / pixels;
            }
        }

        if vector.iter().all(|v| *v == 0.0) {
            *vector.last_mut().unwrap() = 1.0;
        }
        Ok(vector)
    }
}

#[async_trait]
impl EmbeddingGateway for VocabEmbeddings {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(Self::text_vector(text))
    }

    async fn embed_image(&self, image: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
        Self::image_vector(image)
    }
}

/// Local object store that can be told to refuse uploads or deletions.
pub struct FaultyObjects {
    inner: BackendLocal,
    pub fail_upload: AtomicBool,
    pub fail_destroy: AtomicBool,
}

#[async_trait]
impl ObjectStore for FaultyObjects {
    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<String, StorageError> {
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(StorageError::IO(std::io::Error::other("injected upload failure")));
        }
        self.inner.upload(key, data).await
    }

    async fn destroy(&self, key: &str) -> Result<(), StorageError> {
        if self.fail_destroy.load(Ordering::SeqCst) {
            return Err(StorageError::IO(std::io::Error::other("injected destroy failure")));
        }
        self.inner.destroy(key).await
    }

    async fn exists(&self, key: &str) -> bool {
        self.inner.exists(key).await
    }
}

/// In-memory index that can fail upserts into one partition, all queries,
/// or all deletions.
pub struct FaultyIndex {
    inner: LocalIndex,
    pub fail_upsert: Mutex<Option<Partition>>,
    pub fail_query: AtomicBool,
    pub fail_delete: AtomicBool,
}

#[async_trait]
impl SimilarityIndex for FaultyIndex {
    async fn upsert(&self, partition: Partition, id: &Eid, vector: Vec<f32>) -> Result<(), IndexError> {
        if *self.fail_upsert.lock().unwrap() == Some(partition) {
            return Err(IndexError::Poisoned(partition.name()));
        }
        self.inner.upsert(partition, id, vector).await
    }

    async fn query(
        &self,
        partition: Partition,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>, IndexError> {
        if self.fail_query.load(Ordering::SeqCst) {
            return Err(IndexError::Poisoned(partition.name()));
        }
        self.inner.query(partition, vector, top_k).await
    }

    async fn delete(&self, partition: Partition, ids: &[Eid]) -> Result<(), IndexError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(IndexError::Poisoned(partition.name()));
        }
        self.inner.delete(partition, ids).await
    }

    async fn contains(&self, partition: Partition, id: &Eid) -> Result<bool, IndexError> {
        self.inner.contains(partition, id).await
    }
}

/// Records every push instead of sending it. Can be told to reject pushes
/// or to hang until the dispatcher gives up.
#[derive(Default)]
pub struct RecordingPush {
    pub sent: Mutex<Vec<(String, PushMessage)>>,
    pub reject: AtomicBool,
    pub hang: AtomicBool,
}

impl RecordingPush {
    pub fn recipients(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(to, _)| to.clone()).collect()
    }

    pub fn titles(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, message)| message.title.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl PushSender for RecordingPush {
    async fn send(&self, push_token: &str, message: &PushMessage) -> Result<(), NotifyError> {
        if self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if self.reject.load(Ordering::SeqCst) {
            return Err(NotifyError::Rejected("DeviceNotRegistered".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((push_token.to_string(), message.clone()));
        Ok(())
    }
}

pub fn push_token_of(mail: &str) -> String {
    format!("ExponentPushToken[{mail}]")
}

/// A fully wired service over temp-dir stores, the in-memory index and the
/// vocabulary embeddings. Each harness gets its own directory.
pub struct Harness {
    pub service: Arc<ItemService>,
    pub items: Arc<BackendCsv>,
    pub users: Arc<UsersCsv>,
    pub objects: Arc<FaultyObjects>,
    pub index: Arc<FaultyIndex>,
    pub push: Arc<RecordingPush>,
    pub signer: TokenSigner,
    pub uploads: PathBuf,
    _tmp: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(MatchingConfig::default(), TimeoutsConfig::default())
    }

    pub fn with_config(matching: MatchingConfig, timeouts: TimeoutsConfig) -> Self {
        let tmp = tempfile::tempdir().expect("failed to create temp dir");
        let path = |name: &str| tmp.path().join(name).to_str().unwrap().to_string();

        let items = Arc::new(BackendCsv::load(&path("items.csv")).unwrap());
        let users = Arc::new(UsersCsv::load(&path("users.csv")).unwrap());
        let objects = Arc::new(FaultyObjects {
            inner: BackendLocal::new(&path("uploads"), "http://localhost:8080").unwrap(),
            fail_upload: AtomicBool::new(false),
            fail_destroy: AtomicBool::new(false),
        });
        let index = Arc::new(FaultyIndex {
            inner: LocalIndex::in_memory(),
            fail_upsert: Mutex::new(None),
            fail_query: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
        });
        let push = Arc::new(RecordingPush::default());
        let signer = TokenSigner::new(SECRET, None).unwrap();

        let ctx = AppContextBuilder::new()
            .items(items.clone())
            .users(users.clone())
            .objects(objects.clone())
            .embeddings(Arc::new(VocabEmbeddings))
            .index(index.clone())
            .push(push.clone())
            .signer(signer.clone())
            .matching(matching)
            .timeouts(timeouts)
            .build()
            .unwrap();

        Self {
            service: Arc::new(ItemService::new(Arc::new(ctx))),
            items,
            users,
            objects,
            index,
            push,
            signer,
            uploads: tmp.path().join("uploads"),
            _tmp: tmp,
        }
    }

    pub fn ctx(&self) -> &AppContext {
        self.service.context()
    }

    /// Registers a user with a push token derived from the mail.
    pub async fn user(&self, mail: &str) -> User {
        let user = self
            .users
            .create(NewUser {
                name: format!("Owner of {mail}"),
                mail: mail.to_string(),
                phone: "+15550100".to_string(),
            })
            .await
            .unwrap();
        self.users.set_push_token(&user.id, &push_token_of(mail)).await.unwrap();
        self.users.get(&user.id).await.unwrap().unwrap()
    }

    pub fn token(&self, user: &User) -> String {
        self.signer.issue(&user.id)
    }

    pub async fn upload(
        &self,
        owner: &User,
        name: &str,
        state: ReportState,
        description: &str,
        colour: [u8; 3],
    ) -> Result<Item, AppError> {
        let form = UploadForm {
            name: name.to_string(),
            state,
            description: description.to_string(),
            timestamp: 1_700_000_000,
            image: crate::images::solid_png(16, 16, colour),
        };
        self.service.upload(owner, form).await
    }

    pub async fn item(&self, id: &Eid) -> Option<Item> {
        self.items.get(id).await.unwrap()
    }

    pub async fn all_items(&self) -> Vec<Item> {
        self.items.search(ItemQuery::default()).await.unwrap()
    }

    pub fn stored_objects(&self) -> usize {
        std::fs::read_dir(&self.uploads)
            .map(|dir| dir.count())
            .unwrap_or(0)
    }
}
