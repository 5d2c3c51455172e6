use log::{debug, trace, warn};
use ndarray::{s, Array1, ArrayView1, ArrayView3, Axis};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::bbox::{BBox, Ltrb};
use crate::circular_queue::CircularQueue;
use crate::config::EngineConfig;
use crate::error::Error;
use crate::math;

/// Appearance-derived identifier, monotonic and 1-based.
pub type PersistentId = i64;

pub type Embedding = Array1<f32>;

/// Maps an image crop `(height, width, channels)` to an appearance vector.
pub trait EmbeddingExtractor: Send + Sync {
    fn extract(&self, crop: ArrayView3<'_, u8>) -> Result<Embedding, Error>;
}

/// Per-channel colour histogram, `bins` buckets per channel, each channel
/// normalised to sum to one.
#[derive(Debug, Clone, Copy)]
pub struct HistogramExtractor {
    pub bins: usize,
}

impl Default for HistogramExtractor {
    fn default() -> Self {
        Self { bins: 16 }
    }
}

impl EmbeddingExtractor for HistogramExtractor {
    fn extract(&self, crop: ArrayView3<'_, u8>) -> Result<Embedding, Error> {
        let (h, w, channels) = crop.dim();

        if h == 0 || w == 0 || channels == 0 || self.bins == 0 {
            return Err(Error::Extraction(format!(
                "empty crop {}x{}x{} or zero bins",
                h, w, channels
            )));
        }

        let mut hist = Array1::<f32>::zeros(self.bins * channels);
        for (c, plane) in crop.axis_iter(Axis(2)).enumerate() {
            for &v in plane.iter() {
                let bin = v as usize * self.bins / 256;
                hist[c * self.bins + bin] += 1.0;
            }
        }

        Ok(hist / (h * w) as f32)
    }
}

#[derive(Debug, Clone)]
pub struct Identity {
    pub id: PersistentId,
    pub last_seen_frame: u64,
    bank: CircularQueue<Embedding>,
}

impl Identity {
    fn new(id: PersistentId, capacity: usize, frame: u64) -> Self {
        Self {
            id,
            last_seen_frame: frame,
            bank: CircularQueue::with_capacity(capacity),
        }
    }

    /// Best similarity over the bank; a strong single match beats averaged drift.
    pub fn score(&self, query: ArrayView1<'_, f32>) -> Option<f32> {
        self.bank
            .iter()
            .filter_map(|e| math::cosine_similarity(query, e.view()))
            .fold(None, |best, s| match best {
                Some(b) if b >= s => Some(b),
                _ => Some(s),
            })
    }

    #[inline]
    pub fn bank(&self) -> impl Iterator<Item = &Embedding> {
        self.bank.iter()
    }

    #[inline]
    pub fn bank_len(&self) -> usize {
        self.bank.len()
    }
}

/// Bank of appearance embeddings per persistent identity.
///
/// Identities are kept in ascending ID order so that matching, including the
/// first-wins tie-break, is reproducible.
pub struct IdentityMatcher {
    extractor: Arc<dyn EmbeddingExtractor>,
    identities: BTreeMap<PersistentId, Identity>,
    next_id: PersistentId,
    similarity_threshold: f32,
    bank_capacity: usize,
    min_crop_size: usize,
    retention: Option<u64>,
    dimension: Option<usize>,
}

impl IdentityMatcher {
    pub fn new(config: &EngineConfig, extractor: Arc<dyn EmbeddingExtractor>) -> Self {
        Self {
            extractor,
            identities: BTreeMap::new(),
            next_id: 1,
            similarity_threshold: config.similarity_threshold,
            bank_capacity: config.bank_capacity,
            min_crop_size: config.min_crop_size,
            retention: config.identity_retention(),
            dimension: None,
        }
    }

    /// Embeds the `bbox` crop of `image` (`(height, width, channels)`).
    ///
    /// Returns `None` when the clipped crop is smaller than the minimum size
    /// on either side or the extractor yields nothing usable; the caller just
    /// skips this sample.
    pub fn extract_features(
        &self,
        image: ArrayView3<'_, u8>,
        bbox: &BBox<Ltrb>,
    ) -> Option<Embedding> {
        let (h, w, _) = image.dim();
        let roi = bbox.clip(w, h).as_ltwh();

        let (x, y) = (roi.left() as usize, roi.top() as usize);
        let (cw, ch) = (roi.width() as usize, roi.height() as usize);

        if cw < self.min_crop_size || ch < self.min_crop_size {
            trace!("crop {}x{} below minimum size", cw, ch);
            return None;
        }

        let crop = image.slice(s![y..y + ch, x..x + cw, ..]);
        let embedding = match self.extractor.extract(crop) {
            Ok(e) => e,
            Err(err) => {
                warn!("{}", err);
                return None;
            }
        };

        let embedding = math::l2_normalize(embedding)?;

        match self.dimension {
            Some(d) if d != embedding.len() => {
                warn!(
                    "embedding dimension {} does not match bank dimension {}",
                    embedding.len(),
                    d
                );
                None
            }
            _ => Some(embedding),
        }
    }

    /// Best identity whose score exceeds the threshold, along with the best
    /// score seen (`-1.0` when nothing was compared).
    pub fn find_match(&self, embedding: ArrayView1<'_, f32>) -> (Option<PersistentId>, f32) {
        let mut best_score = -1.0f32;
        let mut best_id = None;

        for (&id, identity) in &self.identities {
            if let Some(score) = identity.score(embedding) {
                if score > best_score {
                    best_score = score;
                    best_id = Some(id);
                }
            }
        }

        trace!("best match {:?} with score {:.3}", best_id, best_score);

        if best_score > self.similarity_threshold {
            (best_id, best_score)
        } else {
            (None, best_score)
        }
    }

    pub fn update_identity(&mut self, id: PersistentId, embedding: Embedding, frame: u64) {
        if self.dimension.is_none() {
            self.dimension = Some(embedding.len());
        }

        if id >= self.next_id {
            self.next_id = id.saturating_add(1);
        }

        let capacity = self.bank_capacity;
        let identity = self
            .identities
            .entry(id)
            .or_insert_with(|| Identity::new(id, capacity, frame));

        identity.bank.push(embedding);
        identity.last_seen_frame = frame;
    }

    pub fn register_new_identity(&mut self, embedding: Embedding, frame: u64) -> PersistentId {
        let id = self.next_id;
        self.update_identity(id, embedding, frame);

        debug!("frame {}: registered identity {}", frame, id);

        id
    }

    /// Drops identities unseen for longer than the retention window. IDs are never reused.
    pub fn evict_stale(&mut self, frame: u64) -> usize {
        let retention = match self.retention {
            Some(r) => r,
            None => return 0,
        };

        let before = self.identities.len();
        self.identities
            .retain(|_, i| frame.saturating_sub(i.last_seen_frame) <= retention);

        let evicted = before - self.identities.len();
        if evicted > 0 {
            debug!("frame {}: evicted {} identities", frame, evicted);
        }

        evicted
    }

    #[inline]
    pub fn get(&self, id: PersistentId) -> Option<&Identity> {
        self.identities.get(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}
