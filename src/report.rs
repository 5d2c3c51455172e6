use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};
use crate::detection::EphemeralId;
use crate::identity::PersistentId;
use crate::ownership::AbandonmentEvent;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Normal,
    Warning,
    Critical,
}

/// Display/event-ready view of one active track.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResolvedTrack {
    /// Persistent ID when resolved, else the ephemeral ID
    pub id: PersistentId,
    pub ephemeral_id: EphemeralId,
    pub category: String,
    pub bbox: BBox<Ltrb>,
    pub owner: Option<PersistentId>,
    pub status: Status,
    pub details: String,
    pub ghost: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum SafetyEvent {
    WeaponDetected {
        track_id: PersistentId,
        ephemeral_id: EphemeralId,
        class: String,
        bbox: BBox<Ltrb>,
        frame: u64,
    },
    LuggageAbandoned(AbandonmentEvent),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub frame: u64,
    pub tracks: Vec<ResolvedTrack>,
    pub events: Vec<SafetyEvent>,
}
