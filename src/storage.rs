use std::path::PathBuf;

use async_trait::async_trait;

use crate::eid::Eid;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("invalid object key {0:?}")]
    InvalidKey(String),

    #[error("io error: {0}")]
    IO(#[from] std::io::Error),
}

/// Binary blobs keyed by item id.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `data` under `key`, replacing any previous object, and returns
    /// the URL it can be fetched from.
    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<String, StorageError>;
    async fn destroy(&self, key: &str) -> Result<(), StorageError>;
    async fn exists(&self, key: &str) -> bool;
}

/// Stores objects as files in one directory. The web layer serves that
/// directory under `/api/file/`.
#[derive(Clone)]
pub struct BackendLocal {
    pub base_dir: PathBuf,
    public_url: String,
}

impl BackendLocal {
    pub fn new(storage_dir: &str, public_url: &str) -> std::io::Result<Self> {
        let path = PathBuf::from(storage_dir);
        std::fs::create_dir_all(&path)?;
        Ok(BackendLocal {
            base_dir: path,
            public_url: public_url.trim_end_matches('/').to_string(),
        })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.base_dir.join(key))
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/api/file/{key}", self.public_url)
    }
}

#[async_trait]
impl ObjectStore for BackendLocal {
    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<String, StorageError> {
        let path = self.path_for(key)?;
        let temp_path = self.base_dir.join(format!("{}-{key}.tmp", Eid::new()));

        tokio::fs::write(&temp_path, &data).await?;
        if let Err(err) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(err.into());
        }

        Ok(self.url_for(key))
    }

    async fn destroy(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn exists(&self, key: &str) -> bool {
        match self.path_for(key) {
            Ok(path) => tokio::fs::metadata(&path).await.is_ok(),
            Err(_) => false,
        }
    }
}
