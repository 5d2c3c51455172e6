use serde_derive::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Error;

/// Fixed policy constants of one engine instance. Frame counts are in frames,
/// distances in pixels of the processed image.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Cosine similarity a bank must exceed to count as the same identity, in (0, 1)
    pub similarity_threshold: f32,

    /// Embeddings kept per persistent identity
    pub bank_capacity: usize,

    /// Per-track history window (bbox and centroid buffers)
    pub sustained_window_frames: usize,

    /// Extra history kept on top of the history window
    pub history_margin_frames: usize,

    /// Frames an unseen track stays live for display and ownership
    pub ghost_window_frames: u64,

    /// Unseen tracks are dropped after `ghost_window_frames * eviction_factor`; 0 keeps them forever
    pub eviction_factor: u64,

    /// Unseen identities are dropped after this many frames; 0 keeps them forever
    pub identity_retention_frames: u64,

    /// Max owner to luggage centroid distance
    pub luggage_proximity_px: f32,

    /// Unattended frames after which owned luggage counts as abandoned
    pub abandoned_duration_frames: u32,

    /// Observation count at which a track is first sampled for ReID
    pub reid_first_sample: u64,

    /// Frames between subsequent ReID samples of the same track
    pub reid_interval: u64,

    /// Smallest crop side (after clipping) worth embedding
    pub min_crop_size: usize,

    /// Used only to render countdowns in seconds
    pub frame_rate: f32,

    pub person_class: String,
    pub ownable_classes: Vec<String>,
    pub weapon_classes: Vec<String>,
    pub reid_classes: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.5,
            bank_capacity: 5,
            sustained_window_frames: 60,
            history_margin_frames: 10,
            ghost_window_frames: 10,
            eviction_factor: 10,
            identity_retention_frames: 9000,
            luggage_proximity_px: 200.0,
            abandoned_duration_frames: 150,
            reid_first_sample: 5,
            reid_interval: 30,
            min_crop_size: 10,
            frame_rate: 30.0,
            person_class: "person".to_string(),
            ownable_classes: vec![
                "backpack".to_string(),
                "handbag".to_string(),
                "suitcase".to_string(),
            ],
            weapon_classes: vec!["gun".to_string(), "knife".to_string()],
            reid_classes: vec!["person".to_string()],
        }
    }
}

impl EngineConfig {
    /// Missing fields take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let data = std::fs::read_to_string(path)?;

        Self::from_json_str(&data)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold < 1.0) {
            return Err(Error::Config(format!(
                "similarity_threshold must be in (0, 1), got {}",
                self.similarity_threshold
            )));
        }

        if self.bank_capacity == 0 {
            return Err(Error::Config("bank_capacity must be positive".into()));
        }

        if self.history_len() == 0 {
            return Err(Error::Config("track history length must be positive".into()));
        }

        if !(self.luggage_proximity_px.is_finite() && self.luggage_proximity_px > 0.0) {
            return Err(Error::Config(
                "luggage_proximity_px must be a positive number".into(),
            ));
        }

        if self.reid_first_sample == 0 || self.reid_interval == 0 {
            return Err(Error::Config(
                "reid_first_sample and reid_interval must be positive".into(),
            ));
        }

        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return Err(Error::Config("frame_rate must be positive".into()));
        }

        if self.person_class.is_empty() {
            return Err(Error::Config("person_class must not be empty".into()));
        }

        Ok(())
    }

    #[inline]
    pub fn history_len(&self) -> usize {
        self.sustained_window_frames + self.history_margin_frames
    }

    /// Frames unseen after which a track is physically removed.
    #[inline]
    pub fn eviction_horizon(&self) -> Option<u64> {
        match self.eviction_factor {
            0 => None,
            f => Some(self.ghost_window_frames.saturating_mul(f)),
        }
    }

    #[inline]
    pub fn identity_retention(&self) -> Option<u64> {
        match self.identity_retention_frames {
            0 => None,
            n => Some(n),
        }
    }

    #[inline]
    pub fn is_person(&self, class: &str) -> bool {
        self.person_class == class
    }

    #[inline]
    pub fn is_ownable(&self, class: &str) -> bool {
        self.ownable_classes.iter().any(|c| c == class)
    }

    #[inline]
    pub fn is_weapon(&self, class: &str) -> bool {
        self.weapon_classes.iter().any(|c| c == class)
    }

    #[inline]
    pub fn is_reid_class(&self, class: &str) -> bool {
        self.reid_classes.iter().any(|c| c == class)
    }
}
