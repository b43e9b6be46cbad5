//! On-disk format for one partition.
//!
//! File layout (`<partition>.bin`):
//!
//! Header (47 bytes):
//! - version: u8 (2)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - id_len: u8
//! - id: [u8; id_len] (utf8 item id)
//! - embedding: [f32; dimensions] (little-endian)

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::eid::Eid;
use crate::semantic::index::VectorIndex;

const FORMAT_VERSION: u8 = 2;

/// version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file was written by a different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Loads a partition, checking it was written by the expected model with
    /// the expected dimensionality.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<VectorIndex, VectorStorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;
        if header.model_id != *expected_model_id {
            return Err(VectorStorageError::ModelMismatch);
        }
        if header.dimensions as usize != expected_dimensions {
            return Err(VectorStorageError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        let mut index = VectorIndex::with_capacity(expected_dimensions, header.entry_count as usize);
        for _ in 0..header.entry_count {
            let (id, embedding) = read_entry(&mut reader, expected_dimensions)?;
            if let Err(err) = index.insert(id.clone(), embedding) {
                log::warn!("skipping stored vector {id} in {:?}: {err}", self.path);
            }
        }

        Ok(index)
    }

    /// Writes the partition to a temp file, syncs it, then renames over the
    /// previous file.
    pub fn save(&self, index: &VectorIndex, model_id: &[u8; 32]) -> Result<(), VectorStorageError> {
        let temp_path = self.path.with_extension("tmp");

        if let Err(err) = write_to_file(&temp_path, index, model_id) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(err);
        }

        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

#[derive(Debug)]
struct Header {
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

fn write_to_file(path: &Path, index: &VectorIndex, model_id: &[u8; 32]) -> Result<(), VectorStorageError> {
    let mut writer = BufWriter::new(File::create(path)?);

    let mut header = [0u8; HEADER_SIZE];
    header[0] = FORMAT_VERSION;
    header[1..33].copy_from_slice(model_id);
    header[33..35].copy_from_slice(&(index.dimensions() as u16).to_le_bytes());
    header[35..43].copy_from_slice(&(index.len() as u64).to_le_bytes());
    let checksum = crc32fast::hash(&header[0..43]);
    header[43..47].copy_from_slice(&checksum.to_le_bytes());
    writer.write_all(&header)?;

    for (id, embedding) in index.iter() {
        let raw = id.as_bytes();
        let len = u8::try_from(raw.len())
            .map_err(|_| VectorStorageError::InvalidFormat(format!("id {id} is too long")))?;

        writer.write_all(&[len])?;
        writer.write_all(raw)?;
        for value in embedding {
            writer.write_all(&value.to_le_bytes())?;
        }
    }

    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    Ok(())
}

fn read_header(reader: &mut impl Read) -> Result<Header, VectorStorageError> {
    let mut raw = [0u8; HEADER_SIZE];
    reader.read_exact(&mut raw)?;

    let version = raw[0];
    if version != FORMAT_VERSION {
        return Err(VectorStorageError::VersionMismatch(version, FORMAT_VERSION));
    }

    let stored_checksum = u32::from_le_bytes([raw[43], raw[44], raw[45], raw[46]]);
    if stored_checksum != crc32fast::hash(&raw[0..43]) {
        return Err(VectorStorageError::ChecksumMismatch);
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&raw[1..33]);

    let mut count = [0u8; 8];
    count.copy_from_slice(&raw[35..43]);

    Ok(Header {
        model_id,
        dimensions: u16::from_le_bytes([raw[33], raw[34]]),
        entry_count: u64::from_le_bytes(count),
    })
}

fn read_entry(reader: &mut impl Read, dimensions: usize) -> Result<(Eid, Vec<f32>), VectorStorageError> {
    let mut len = [0u8; 1];
    reader.read_exact(&mut len)?;

    let mut raw = vec![0u8; len[0] as usize];
    reader.read_exact(&mut raw)?;
    let id = String::from_utf8(raw)
        .ok()
        .and_then(|id| id.parse::<Eid>().ok())
        .ok_or_else(|| VectorStorageError::InvalidFormat("entry id is not a valid item id".to_string()))?;

    let mut embedding = Vec::with_capacity(dimensions);
    let mut buf = [0u8; 4];
    for _ in 0..dimensions {
        reader.read_exact(&mut buf)?;
        embedding.push(f32::from_le_bytes(buf));
    }

    Ok((id, embedding))
}
