use crate::error::{Error, Result};

/// Maps text to fixed-dimension, L2-normalized dense vectors.
///
/// Implementations are loaded once per process and shared, so they must be
/// usable from several threads at once.
pub trait Embedder: Send + Sync {
    /// Identifier of the underlying model, recorded for diagnostics.
    fn model_id(&self) -> &str;

    /// Output dimension D shared by every vector this embedder returns.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, one unit vector per input, in input order.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text (typically a query).
    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("no embedding returned".into()))
    }
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed(texts)
    }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        (**self).embed_one(text)
    }
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Inner product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub const HASHING_MODEL_ID: &str = "hashing";

/// Model-free embedder based on feature hashing.
///
/// Every lower-cased character trigram of the text (padded with a boundary
/// marker) is hashed with BLAKE3 into one of `dimension` buckets with a
/// signed contribution. Identical texts always embed identically and texts
/// sharing many trigrams land close together, which is enough for offline
/// use and for exercising the retrieval pipeline without model weights.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        let padded: Vec<char> = std::iter::once('\u{2}')
            .chain(text.to_lowercase().chars())
            .chain(std::iter::once('\u{3}'))
            .collect();

        // Empty text has no trigram; its boundary pair stands in so the
        // result is still a unit vector.
        let grams: Vec<&[char]> = if padded.len() < 3 {
            vec![padded.as_slice()]
        } else {
            padded.windows(3).collect()
        };

        let mut buf = [0u8; 12];
        for gram in grams {
            let mut len = 0;
            for c in gram {
                len += c.encode_utf8(&mut buf[len..]).len();
            }
            let hash = blake3::hash(&buf[..len]);
            let bytes = hash.as_bytes();
            let mut head = [0u8; 8];
            head.copy_from_slice(&bytes[..8]);
            let h = u64::from_le_bytes(head);

            let bucket = (h % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        l2_normalize(&mut vector);
        vector
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        HASHING_MODEL_ID
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}
