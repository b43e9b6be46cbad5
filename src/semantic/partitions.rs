//! The four similarity partitions and the index that holds them.
//!
//! Every item has exactly one vector in `<state>-text` and one in
//! `<state>-image`, keyed by the item id. Matching always queries the
//! partitions of the opposite state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::eid::Eid;
use crate::items::ReportState;
use crate::semantic::embeddings::{IMAGE_DIMENSIONS, TEXT_DIMENSIONS};
use crate::semantic::index::{IndexError, SearchResult, VectorIndex};
use crate::semantic::storage::{VectorStorage, VectorStorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modality {
    Text,
    Image,
}

impl Modality {
    pub fn dimensions(self) -> usize {
        match self {
            Modality::Text => TEXT_DIMENSIONS,
            Modality::Image => IMAGE_DIMENSIONS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Partition {
    pub state: ReportState,
    pub modality: Modality,
}

impl Partition {
    pub const ALL: [Partition; 4] = [
        Partition::text(ReportState::Lost),
        Partition::text(ReportState::Found),
        Partition::image(ReportState::Lost),
        Partition::image(ReportState::Found),
    ];

    pub const fn text(state: ReportState) -> Self {
        Self {
            state,
            modality: Modality::Text,
        }
    }

    pub const fn image(state: ReportState) -> Self {
        Self {
            state,
            modality: Modality::Image,
        }
    }

    pub fn name(self) -> &'static str {
        match (self.state, self.modality) {
            (ReportState::Lost, Modality::Text) => "lost-text",
            (ReportState::Found, Modality::Text) => "found-text",
            (ReportState::Lost, Modality::Image) => "lost-image",
            (ReportState::Found, Modality::Image) => "found-image",
        }
    }

    pub fn dimensions(self) -> usize {
        self.modality.dimensions()
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Inserts or replaces the vector stored under `id`.
    async fn upsert(&self, partition: Partition, id: &Eid, vector: Vec<f32>) -> Result<(), IndexError>;

    /// Up to `top_k` ids ranked by descending cosine similarity.
    async fn query(
        &self,
        partition: Partition,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>, IndexError>;

    /// Removing an id that is not present is not an error.
    async fn delete(&self, partition: Partition, ids: &[Eid]) -> Result<(), IndexError>;

    async fn contains(&self, partition: Partition, id: &Eid) -> Result<bool, IndexError>;
}

struct Persistence {
    dir: PathBuf,
    text_model: [u8; 32],
    image_model: [u8; 32],
}

impl Persistence {
    fn storage(&self, partition: Partition) -> VectorStorage {
        VectorStorage::new(self.dir.join(format!("{}.bin", partition.name())))
    }

    fn model_id(&self, partition: Partition) -> &[u8; 32] {
        match partition.modality {
            Modality::Text => &self.text_model,
            Modality::Image => &self.image_model,
        }
    }

    fn save(&self, partition: Partition, index: &VectorIndex) -> Result<(), IndexError> {
        self.storage(partition).save(index, self.model_id(partition))?;
        Ok(())
    }
}

/// In-process index. Optionally writes every partition to disk after each
/// mutation; a mutation whose write fails is rolled back in memory.
pub struct LocalIndex {
    partitions: HashMap<Partition, RwLock<VectorIndex>>,
    persistence: Option<Persistence>,
}

impl LocalIndex {
    pub fn in_memory() -> Self {
        Self {
            partitions: Partition::ALL
                .into_iter()
                .map(|p| (p, RwLock::new(VectorIndex::new(p.dimensions()))))
                .collect(),
            persistence: None,
        }
    }

    /// Opens partitions persisted under `dir`. Missing files start empty;
    /// files written by a different model are refused.
    pub fn open(dir: PathBuf, text_model: [u8; 32], image_model: [u8; 32]) -> Result<Self, IndexError> {
        std::fs::create_dir_all(&dir).map_err(VectorStorageError::from)?;

        let persistence = Persistence {
            dir,
            text_model,
            image_model,
        };

        let mut partitions = HashMap::new();
        for partition in Partition::ALL {
            let storage = persistence.storage(partition);
            let index = if storage.exists() {
                let index = storage.load(persistence.model_id(partition), partition.dimensions())?;
                log::info!("loaded {} vectors into {partition}", index.len());
                index
            } else {
                VectorIndex::new(partition.dimensions())
            };
            partitions.insert(partition, RwLock::new(index));
        }

        Ok(Self {
            partitions,
            persistence: Some(persistence),
        })
    }

    fn slot(&self, partition: Partition) -> &RwLock<VectorIndex> {
        // every partition is inserted at construction
        &self.partitions[&partition]
    }
}

#[async_trait]
impl SimilarityIndex for LocalIndex {
    async fn upsert(&self, partition: Partition, id: &Eid, vector: Vec<f32>) -> Result<(), IndexError> {
        let mut index = self
            .slot(partition)
            .write()
            .map_err(|_| IndexError::Poisoned(partition.name()))?;

        let previous = index.insert(id.clone(), vector)?;

        if let Some(persistence) = &self.persistence {
            if let Err(err) = persistence.save(partition, &index) {
                match previous {
                    Some(previous) => {
                        let _ = index.insert(id.clone(), previous);
                    }
                    None => {
                        index.remove(id);
                    }
                }
                return Err(err);
            }
        }

        Ok(())
    }

    async fn query(
        &self,
        partition: Partition,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>, IndexError> {
        let index = self
            .slot(partition)
            .read()
            .map_err(|_| IndexError::Poisoned(partition.name()))?;

        index.search(vector, top_k)
    }

    async fn delete(&self, partition: Partition, ids: &[Eid]) -> Result<(), IndexError> {
        let mut index = self
            .slot(partition)
            .write()
            .map_err(|_| IndexError::Poisoned(partition.name()))?;

        let removed: Vec<(Eid, Vec<f32>)> = ids
            .iter()
            .filter_map(|id| index.remove(id).map(|v| (id.clone(), v)))
            .collect();

        if removed.is_empty() {
            return Ok(());
        }

        if let Some(persistence) = &self.persistence {
            if let Err(err) = persistence.save(partition, &index) {
                for (id, vector) in removed {
                    let _ = index.insert(id, vector);
                }
                return Err(err);
            }
        }

        Ok(())
    }

    async fn contains(&self, partition: Partition, id: &Eid) -> Result<bool, IndexError> {
        let index = self
            .slot(partition)
            .read()
            .map_err(|_| IndexError::Poisoned(partition.name()))?;

        Ok(index.contains(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dimensions: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dimensions];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn test_partition_names_are_distinct() {
        let names: std::collections::HashSet<_> = Partition::ALL.iter().map(|p| p.name()).collect();
        assert_eq!(names.len(), 4);
        assert_eq!(Partition::image(ReportState::Found).dimensions(), 768);
        assert_eq!(Partition::text(ReportState::Lost).dimensions(), 384);
    }

    #[tokio::test]
    async fn test_partitions_are_isolated() {
        let index = LocalIndex::in_memory();
        let id = Eid::new();
        let lost = Partition::text(ReportState::Lost);
        let found = Partition::text(ReportState::Found);

        index.upsert(lost, &id, unit(384, 0)).await.unwrap();

        assert!(index.contains(lost, &id).await.unwrap());
        assert!(!index.contains(found, &id).await.unwrap());
        assert!(index.query(found, &unit(384, 0), 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_dimensions_rejected() {
        let index = LocalIndex::in_memory();
        let result = index
            .upsert(Partition::image(ReportState::Lost), &Eid::new(), unit(384, 0))
            .await;
        assert!(matches!(result, Err(IndexError::DimensionMismatch { expected: 768, got: 384 })));
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let index = LocalIndex::in_memory();
        index
            .delete(Partition::text(ReportState::Found), &[Eid::new()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_persisted_partitions_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let (text_model, image_model) = ([1u8; 32], [2u8; 32]);
        let kept = Eid::new();
        let dropped = Eid::new();
        let partition = Partition::text(ReportState::Found);

        {
            let index = LocalIndex::open(tmp.path().to_path_buf(), text_model, image_model).unwrap();
            index.upsert(partition, &kept, unit(384, 1)).await.unwrap();
            index.upsert(partition, &dropped, unit(384, 2)).await.unwrap();
            index.delete(partition, &[dropped.clone()]).await.unwrap();
        }

        let index = LocalIndex::open(tmp.path().to_path_buf(), text_model, image_model).unwrap();
        assert!(index.contains(partition, &kept).await.unwrap());
        assert!(!index.contains(partition, &dropped).await.unwrap());

        let hits = index.query(partition, &unit(384, 1), 5).await.unwrap();
        assert_eq!(hits[0].id, kept);
    }

    #[tokio::test]
    async fn test_other_model_refused() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let index = LocalIndex::open(tmp.path().to_path_buf(), [1u8; 32], [2u8; 32]).unwrap();
            index
                .upsert(Partition::text(ReportState::Lost), &Eid::new(), unit(384, 0))
                .await
                .unwrap();
        }

        assert!(matches!(
            LocalIndex::open(tmp.path().to_path_buf(), [9u8; 32], [2u8; 32]),
            Err(IndexError::Storage(VectorStorageError::ModelMismatch))
        ));
    }
}
