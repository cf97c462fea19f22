//! Persisted index artifact: ANN structure, position mapping and metadata
//! in one file.
//!
//! The index and its position mapping are only meaningful together, so they
//! are written as a single bundle and replaced with an atomic rename. A
//! reader therefore sees either the previous bundle or the new one, never a
//! mix of the two.
//!
//! # File Format
//!
//! - Header (64 bytes): magic, format version, section lengths, SHA-256 of
//!   the payload
//! - Metadata section: JSON [`IndexMetadata`]
//! - Index section: bincode [`AnnIndex`]
//! - Mapping section: bincode [`PositionMapping`]
//!
//! All integers are little-endian.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use memmap2::MmapOptions;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::JobId;
use crate::vector::ann::{AnnIndex, IndexKind, VectorIndex};
use crate::vector::types::{Position, VectorError};

/// Current artifact format version.
pub const FORMAT_VERSION: u32 = 1;

/// File name of the artifact inside the index directory.
pub const ARTIFACT_FILE_NAME: &str = "jobs.idx";

/// Magic bytes to identify artifact files.
const MAGIC_BYTES: &[u8; 4] = b"JMIX";

/// Size of the fixed header in bytes.
const HEADER_SIZE: usize = 64;

/// Offset of the checksum inside the header.
const CHECKSUM_OFFSET: usize = 32;

/// Errors specific to artifact persistence.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid artifact format: {0}")]
    InvalidFormat(String),

    #[error("Artifact checksum mismatch")]
    ChecksumMismatch,

    #[error("Unsupported artifact format version: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Artifact is incompatible with the active embedder: {0}")]
    Incompatible(String),

    #[error("Encoding error: {0}")]
    Encode(String),

    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),
}

/// Descriptive metadata stored alongside the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub format_version: u32,
    /// Identifier of the embedding model the vectors came from.
    pub model_id: String,
    pub dimension: usize,
    pub kind: IndexKind,
    /// Coarse clusters; 0 for flat indexes.
    pub number_of_clusters: usize,
    pub training_sample_size: usize,
    pub quantization_bits: u32,
    pub subquantizers: usize,
    pub codebook_size: usize,
    pub ntotal: usize,
    pub default_nprobe: usize,
    /// Whether stored vectors are L2-normalized.
    pub normalized: bool,
    /// RFC 3339 build time.
    pub built_at: String,
}

impl IndexMetadata {
    /// Verifies that queries embedded by `model_id` at `dimension` can be
    /// searched against this artifact.
    pub fn check_compatible(&self, model_id: &str, dimension: usize) -> Result<(), ArtifactError> {
        if self.model_id != model_id {
            return Err(ArtifactError::Incompatible(format!(
                "index was built with model '{}', embedder uses '{model_id}'",
                self.model_id
            )));
        }
        if self.dimension != dimension {
            return Err(ArtifactError::Incompatible(format!(
                "index dimension {} differs from embedder dimension {dimension}",
                self.dimension
            )));
        }
        if !self.normalized {
            return Err(ArtifactError::Incompatible(
                "index vectors are not normalized".to_string(),
            ));
        }
        Ok(())
    }
}

/// Ordered job ids; entry `i` is the job embedded at index position `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionMapping {
    job_ids: Vec<JobId>,
}

impl PositionMapping {
    #[must_use]
    pub fn new(job_ids: Vec<JobId>) -> Self {
        Self { job_ids }
    }

    /// Resolves an index position to its job id.
    #[must_use]
    pub fn resolve(&self, position: Position) -> Option<JobId> {
        self.job_ids.get(position.as_index()).copied()
    }

    pub fn len(&self) -> usize {
        self.job_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.job_ids.is_empty()
    }

    pub fn job_ids(&self) -> &[JobId] {
        &self.job_ids
    }
}

/// An index bundled with its mapping and metadata.
///
/// Immutable once constructed; rebuilds produce a new artifact.
#[derive(Debug)]
pub struct IndexArtifact {
    metadata: IndexMetadata,
    index: AnnIndex,
    mapping: PositionMapping,
}

impl IndexArtifact {
    /// Bundles the parts, checking they describe the same vectors.
    pub fn new(
        metadata: IndexMetadata,
        index: AnnIndex,
        mapping: PositionMapping,
    ) -> Result<Self, ArtifactError> {
        let artifact = Self {
            metadata,
            index,
            mapping,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    pub fn index(&self) -> &AnnIndex {
        &self.index
    }

    pub fn mapping(&self) -> &PositionMapping {
        &self.mapping
    }

    /// Path of the artifact file inside `dir`.
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(ARTIFACT_FILE_NAME)
    }

    fn validate(&self) -> Result<(), ArtifactError> {
        self.index.validate()?;

        let ntotal = self.index.ntotal();
        if ntotal != self.mapping.len() || ntotal != self.metadata.ntotal {
            return Err(ArtifactError::InvalidFormat(format!(
                "index holds {ntotal} vectors, mapping {} entries, metadata {}",
                self.mapping.len(),
                self.metadata.ntotal
            )));
        }
        if self.index.dimension().get() != self.metadata.dimension {
            return Err(ArtifactError::InvalidFormat(format!(
                "index dimension {} differs from metadata dimension {}",
                self.index.dimension(),
                self.metadata.dimension
            )));
        }
        if self.index.kind() != self.metadata.kind {
            return Err(ArtifactError::InvalidFormat(format!(
                "index kind {} differs from metadata kind {}",
                self.index.kind(),
                self.metadata.kind
            )));
        }
        Ok(())
    }

    /// Writes the artifact into `dir`, atomically replacing any previous one.
    ///
    /// The bundle goes to a temp file in the same directory, is fsynced, then
    /// renamed over `jobs.idx`.
    pub fn persist(&self, dir: &Path) -> Result<PathBuf, ArtifactError> {
        std::fs::create_dir_all(dir)?;
        let bytes = self.encode()?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(&bytes)?;
        temp.flush()?;
        temp.as_file().sync_all()?;

        let path = Self::path_in(dir);
        temp.persist(&path).map_err(|e| ArtifactError::Io(e.error))?;

        sync_dir(dir);

        tracing::debug!(
            target: "artifact",
            "wrote {} bytes to {}",
            bytes.len(),
            path.display()
        );
        Ok(path)
    }

    /// Loads the artifact from `dir`.
    ///
    /// Returns `Ok(None)` when no artifact has been written yet.
    pub fn load(dir: &Path) -> Result<Option<Self>, ArtifactError> {
        let Some(sections) = Sections::map(&Self::path_in(dir))? else {
            return Ok(None);
        };
        let (metadata, ann_bytes, mapping_bytes) = sections.split()?;

        let (index, _): (AnnIndex, usize) =
            bincode::serde::decode_from_slice(ann_bytes, bincode::config::standard())
                .map_err(|e| ArtifactError::InvalidFormat(format!("index section: {e}")))?;
        let (mapping, _): (PositionMapping, usize) =
            bincode::serde::decode_from_slice(mapping_bytes, bincode::config::standard())
                .map_err(|e| ArtifactError::InvalidFormat(format!("mapping section: {e}")))?;

        Self::new(metadata, index, mapping).map(Some)
    }

    /// Reads only the metadata section, verifying header and checksum.
    pub fn read_metadata(dir: &Path) -> Result<Option<IndexMetadata>, ArtifactError> {
        let Some(sections) = Sections::map(&Self::path_in(dir))? else {
            return Ok(None);
        };
        let (metadata, _, _) = sections.split()?;
        Ok(Some(metadata))
    }

    fn encode(&self) -> Result<Vec<u8>, ArtifactError> {
        let metadata = serde_json::to_vec(&self.metadata)
            .map_err(|e| ArtifactError::Encode(e.to_string()))?;
        let ann = bincode::serde::encode_to_vec(&self.index, bincode::config::standard())
            .map_err(|e| ArtifactError::Encode(e.to_string()))?;
        let mapping = bincode::serde::encode_to_vec(&self.mapping, bincode::config::standard())
            .map_err(|e| ArtifactError::Encode(e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(&metadata);
        hasher.update(&ann);
        hasher.update(&mapping);
        let checksum = hasher.finalize();

        let mut bytes =
            Vec::with_capacity(HEADER_SIZE + metadata.len() + ann.len() + mapping.len());
        bytes.extend_from_slice(MAGIC_BYTES);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(metadata.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&(ann.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&(mapping.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&checksum);
        debug_assert_eq!(bytes.len(), HEADER_SIZE);

        bytes.extend_from_slice(&metadata);
        bytes.extend_from_slice(&ann);
        bytes.extend_from_slice(&mapping);
        Ok(bytes)
    }
}

/// A mapped artifact file with its header parsed.
struct Sections {
    mmap: memmap2::Mmap,
    metadata_len: usize,
    ann_len: usize,
    mapping_len: usize,
}

impl Sections {
    fn map(path: &Path) -> Result<Option<Self>, ArtifactError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        // SAFETY: the file is only ever replaced by rename, never written in place
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        if mmap.len() < HEADER_SIZE {
            return Err(ArtifactError::InvalidFormat(
                "File too small to contain header".to_string(),
            ));
        }
        if &mmap[0..4] != MAGIC_BYTES {
            return Err(ArtifactError::InvalidFormat(
                "Invalid magic bytes".to_string(),
            ));
        }

        let version = u32::from_le_bytes([mmap[4], mmap[5], mmap[6], mmap[7]]);
        if version != FORMAT_VERSION {
            return Err(ArtifactError::VersionMismatch {
                expected: FORMAT_VERSION,
                actual: version,
            });
        }

        let metadata_len = read_len(&mmap, 8)?;
        let ann_len = read_len(&mmap, 16)?;
        let mapping_len = read_len(&mmap, 24)?;

        let expected = metadata_len
            .checked_add(ann_len)
            .and_then(|n| n.checked_add(mapping_len))
            .and_then(|n| n.checked_add(HEADER_SIZE));
        if expected != Some(mmap.len()) {
            return Err(ArtifactError::InvalidFormat(format!(
                "section lengths do not match file size {}",
                mmap.len()
            )));
        }

        let digest = Sha256::digest(&mmap[HEADER_SIZE..]);
        if digest.as_slice() != &mmap[CHECKSUM_OFFSET..HEADER_SIZE] {
            return Err(ArtifactError::ChecksumMismatch);
        }

        Ok(Some(Self {
            mmap,
            metadata_len,
            ann_len,
            mapping_len,
        }))
    }

    fn split(&self) -> Result<(IndexMetadata, &[u8], &[u8]), ArtifactError> {
        let metadata_end = HEADER_SIZE + self.metadata_len;
        let ann_end = metadata_end + self.ann_len;
        let mapping_end = ann_end + self.mapping_len;

        let metadata: IndexMetadata = serde_json::from_slice(&self.mmap[HEADER_SIZE..metadata_end])
            .map_err(|e| ArtifactError::InvalidFormat(format!("metadata section: {e}")))?;
        if metadata.format_version != FORMAT_VERSION {
            return Err(ArtifactError::VersionMismatch {
                expected: FORMAT_VERSION,
                actual: metadata.format_version,
            });
        }

        Ok((
            metadata,
            &self.mmap[metadata_end..ann_end],
            &self.mmap[ann_end..mapping_end],
        ))
    }
}

fn read_len(bytes: &[u8], offset: usize) -> Result<usize, ArtifactError> {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    usize::try_from(u64::from_le_bytes(raw))
        .map_err(|_| ArtifactError::InvalidFormat("section length overflows".to_string()))
}

/// Flushes a rename in `dir` to disk. Some platforms cannot sync
/// directories; the failure is logged and the write stands.
fn sync_dir(dir: &Path) -> bool {
    let result = File::open(dir).and_then(|handle| handle.sync_all());
    if let Err(e) = &result {
        tracing::debug!(
            target: "artifact",
            "could not sync directory {}: {e}",
            dir.display()
        );
    }
    result.is_ok()
}
