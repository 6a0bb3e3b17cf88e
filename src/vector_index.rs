use std::{
    io::Write,
    path::{Path, PathBuf},
};

use rayon::prelude::*;
use tracing::debug;

use crate::{
    embedding::dot,
    error::{Error, Result},
};

const MAGIC: &[u8; 4] = b"PPVX";
const FORMAT_VERSION: u32 = 1;

/// Header size: 4 bytes magic + 4 bytes version + 4 bytes dimension +
/// 8 bytes vector count.
const HEADER_SIZE: usize = 20;

/// Flat inner-product index over L2-normalized vectors.
///
/// Vectors are identified only by their insertion position. The index is
/// held in memory and written to disk as a single blob:
/// - 4 bytes: magic `PPVX`
/// - 4 bytes: format version (u32 LE)
/// - 4 bytes: dimension D (u32 LE)
/// - 8 bytes: vector count N (u64 LE)
/// - N * D * 4 bytes: f32 LE values in row-major order
pub struct VectorIndex {
    path: PathBuf,
    dimension: usize,
    data: Vec<f32>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("path", &self.path)
            .field("dimension", &self.dimension)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl VectorIndex {
    /// Load the index stored at `path`, or start an empty one.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use preppal::VectorIndex;
    ///
    /// let index = VectorIndex::open_or_create(&tmp.path().join("v.idx"), 4).unwrap();
    /// assert!(index.is_empty());
    /// assert_eq!(index.dimension(), 4);
    /// ```
    pub fn open_or_create(path: &Path, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::Config(
                "vector dimension must be at least 1".into(),
            ));
        }

        let data = if path.exists() {
            let bytes = std::fs::read(path)?;
            decode(&bytes, dimension)?
        } else {
            Vec::new()
        };

        let index = Self {
            path: path.to_path_buf(),
            dimension,
            data,
        };
        debug!(
            path = %path.display(),
            vectors = index.len(),
            dimension,
            "opened vector index"
        );
        Ok(index)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append vectors in order. Nothing is appended unless every vector
    /// has the index dimension.
    pub fn append(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }

        self.data.reserve(vectors.len() * self.dimension);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(())
    }

    /// Drop every vector at position `len` or later.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len * self.dimension);
    }

    /// Return up to `k` `(position, score)` pairs ranked by inner product,
    /// highest first. Equal scores keep the earlier position first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .data
            .par_chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, row)| (position, dot(row, query)))
            .collect();

        let by_rank = |a: &(usize, f32), b: &(usize, f32)| {
            b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
        };

        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_rank);
            scored.truncate(k);
        }
        scored.sort_unstable_by(by_rank);
        Ok(scored)
    }

    /// Write the index to disk, replacing the previous blob atomically.
    pub fn persist(&self) -> Result<()> {
        let tmp_path = self.path.with_extension("idx.tmp");

        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(MAGIC)?;
        file.write_all(&FORMAT_VERSION.to_le_bytes())?;
        file.write_all(&(self.dimension as u32).to_le_bytes())?;
        file.write_all(&(self.len() as u64).to_le_bytes())?;
        file.write_all(bytemuck::cast_slice(&self.data))?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&tmp_path, &self.path)?;
        debug!(vectors = self.len(), "persisted vector index");
        Ok(())
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn decode(bytes: &[u8], dimension: usize) -> Result<Vec<f32>> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::CorruptIndex(format!(
            "blob is {} bytes, shorter than the header",
            bytes.len()
        )));
    }
    if &bytes[0..4] != MAGIC {
        return Err(Error::CorruptIndex("bad magic".into()));
    }

    let version = read_u32(bytes, 4);
    if version != FORMAT_VERSION {
        return Err(Error::CorruptIndex(format!(
            "unsupported format version {version}"
        )));
    }

    let stored_dim = read_u32(bytes, 8) as usize;
    if stored_dim != dimension {
        return Err(Error::DimensionMismatch {
            expected: dimension,
            actual: stored_dim,
        });
    }

    let mut count_buf = [0u8; 8];
    count_buf.copy_from_slice(&bytes[12..HEADER_SIZE]);
    let count = u64::from_le_bytes(count_buf) as usize;

    let expected_len = count
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(4))
        .and_then(|n| n.checked_add(HEADER_SIZE));
    if expected_len != Some(bytes.len()) {
        return Err(Error::CorruptIndex(format!(
            "header declares {count} vectors but blob is {} bytes",
            bytes.len()
        )));
    }

    // The payload offset is not guaranteed to be f32-aligned in the read
    // buffer, so decode element-wise rather than casting.
    Ok(bytes[HEADER_SIZE..]
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
