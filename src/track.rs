use nalgebra as na;

use crate::bbox::{BBox, Ltrb};
use crate::circular_queue::CircularQueue;
use crate::detection::{Detection, EphemeralId};
use crate::identity::PersistentId;
use crate::scheduler::SampleSchedule;

/// A person as seen by ownership: either a resolved identity or, before
/// appearance matching has run, the raw tracker ID. The two ID spaces overlap
/// numerically and are never compared with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PersonRef {
    Ephemeral(EphemeralId),
    Persistent(PersistentId),
}

impl PersonRef {
    /// Display form, the bare number.
    #[inline]
    pub fn id(&self) -> i64 {
        match *self {
            PersonRef::Ephemeral(id) | PersonRef::Persistent(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Unowned,
    Owned(PersonRef),
}

/// Per-ephemeral-ID state. Every field exists from construction.
#[derive(Debug, Clone)]
pub struct Track {
    pub ephemeral_id: EphemeralId,
    pub class: String,
    pub bbox_history: CircularQueue<BBox<Ltrb>>,
    pub centroid_history: CircularQueue<na::Point2<f32>>,
    pub first_seen_frame: u64,
    pub last_seen_frame: u64,
    pub observations: u64,
    pub ownership: Ownership,
    pub abandoned_timer: u32,
    pub abandonment_event_fired: bool,
    pub sample: SampleSchedule,
    pub weapon_reported: bool,
}

impl Track {
    pub fn new(det: &Detection, frame: u64, history_len: usize, first_sample: u64) -> Self {
        let mut track = Self {
            ephemeral_id: det.ephemeral_id,
            class: det.class.clone(),
            bbox_history: CircularQueue::with_capacity(history_len),
            centroid_history: CircularQueue::with_capacity(history_len),
            first_seen_frame: frame,
            last_seen_frame: frame,
            observations: 0,
            ownership: Ownership::Unowned,
            abandoned_timer: 0,
            abandonment_event_fired: false,
            sample: SampleSchedule::new(first_sample),
            weapon_reported: false,
        };

        track.push(det, frame);
        track
    }

    pub fn push(&mut self, det: &Detection, frame: u64) {
        self.bbox_history.push(det.bbox);
        self.centroid_history.push(det.centroid);
        self.last_seen_frame = frame;
        self.observations += 1;
    }

    #[inline]
    pub fn centroid(&self) -> Option<&na::Point2<f32>> {
        self.centroid_history.latest()
    }

    #[inline]
    pub fn bbox(&self) -> Option<&BBox<Ltrb>> {
        self.bbox_history.latest()
    }

    #[inline]
    pub fn owner(&self) -> Option<PersonRef> {
        match self.ownership {
            Ownership::Unowned => None,
            Ownership::Owned(person) => Some(person),
        }
    }

    /// Owner in display form.
    #[inline]
    pub fn owner_id(&self) -> Option<PersistentId> {
        self.owner().map(|p| p.id())
    }

    #[inline]
    pub fn frames_since_seen(&self, frame: u64) -> u64 {
        frame.saturating_sub(self.last_seen_frame)
    }

    /// Owned and left unattended for at least `duration` frames.
    #[inline]
    pub fn is_abandoned(&self, duration: u32) -> bool {
        self.owner_id().is_some() && self.abandoned_timer >= duration
    }
}
