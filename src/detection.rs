use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};
use crate::error::Error;

/// Ephemeral track identifier assigned by the upstream detector/tracker.
pub type EphemeralId = i64;

/// One detector output for one visible object in one frame.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(from = "RawDetection", into = "RawDetection")]
pub struct Detection {
    pub ephemeral_id: EphemeralId,
    pub class: String,
    pub bbox: BBox<Ltrb>,
    pub centroid: na::Point2<f32>,
    pub confidence: f32,
}

/// Wire shape: `{"track_id", "class", "bbox": [x1,y1,x2,y2], "centroid"?: [x,y], "confidence"?}`
#[derive(Serialize, Deserialize)]
struct RawDetection {
    track_id: EphemeralId,
    class: String,
    bbox: BBox<Ltrb>,
    #[serde(default)]
    centroid: Option<[f32; 2]>,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

impl From<RawDetection> for Detection {
    fn from(raw: RawDetection) -> Self {
        let centroid = match raw.centroid {
            Some([x, y]) => na::Point2::new(x, y),
            None => raw.bbox.center(),
        };

        Self {
            ephemeral_id: raw.track_id,
            class: raw.class,
            bbox: raw.bbox,
            centroid,
            confidence: raw.confidence,
        }
    }
}

impl From<Detection> for RawDetection {
    fn from(det: Detection) -> Self {
        Self {
            track_id: det.ephemeral_id,
            class: det.class,
            bbox: det.bbox,
            centroid: Some([det.centroid.x, det.centroid.y]),
            confidence: det.confidence,
        }
    }
}

impl Detection {
    /// Builds a detection whose centroid is the bbox midpoint.
    pub fn new<S: Into<String>>(
        ephemeral_id: EphemeralId,
        class: S,
        bbox: BBox<Ltrb>,
        confidence: f32,
    ) -> Self {
        Self {
            ephemeral_id,
            class: class.into(),
            centroid: bbox.center(),
            bbox,
            confidence,
        }
    }

    /// Rejects records that would corrupt track history if folded in.
    pub fn validate(&self) -> Result<(), Error> {
        let reject = |reason: &str| {
            Err(Error::InvalidDetection {
                ephemeral_id: self.ephemeral_id,
                reason: reason.to_string(),
            })
        };

        if self.ephemeral_id < 0 {
            return reject("negative track id (untracked detection)");
        }

        if self.class.is_empty() {
            return reject("empty class label");
        }

        if !self.bbox.is_finite() {
            return reject("non-finite bbox");
        }

        if self.bbox.left() >= self.bbox.right() || self.bbox.top() >= self.bbox.bottom() {
            return reject("degenerate bbox, expected x1 < x2 and y1 < y2");
        }

        if !(self.centroid.x.is_finite() && self.centroid.y.is_finite()) {
            return reject("non-finite centroid");
        }

        if !(0.0..=1.0).contains(&self.confidence) {
            return reject("confidence outside [0, 1]");
        }

        Ok(())
    }
}
