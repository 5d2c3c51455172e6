use log::{debug, trace};
use std::collections::{BTreeMap, HashMap};

use crate::config::EngineConfig;
use crate::detection::{Detection, EphemeralId};
use crate::identity::PersistentId;
use crate::track::{Ownership, PersonRef, Track};

/// Per-ephemeral-ID history plus the ephemeral -> persistent remap table.
///
/// A track that missed the current frame is a *ghost*; it stays *active*
/// (visible to ownership and reporting) for `ghost_window` frames and is
/// physically evicted after `eviction_horizon` frames.
#[derive(Debug, Clone)]
pub struct TrackStore {
    tracks: BTreeMap<EphemeralId, Track>,
    mapping: HashMap<EphemeralId, PersistentId>,
    current_frame: u64,
    history_len: usize,
    ghost_window: u64,
    eviction_horizon: Option<u64>,
    first_sample: u64,
}

impl TrackStore {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            tracks: BTreeMap::new(),
            mapping: HashMap::new(),
            current_frame: 0,
            history_len: config.history_len(),
            ghost_window: config.ghost_window_frames,
            eviction_horizon: config.eviction_horizon(),
            first_sample: config.reid_first_sample,
        }
    }

    pub fn update(&mut self, detections: &[Detection], frame_number: u64) {
        self.current_frame = frame_number;

        for det in detections {
            match self.tracks.get_mut(&det.ephemeral_id) {
                Some(track) => {
                    if track.class != det.class {
                        trace!(
                            "track {} reported as {} but is fixed to {}",
                            det.ephemeral_id,
                            det.class,
                            track.class
                        );
                    }

                    track.push(det, frame_number);
                }
                None => {
                    debug!(
                        "frame {}: new track {} ({})",
                        frame_number, det.ephemeral_id, det.class
                    );

                    self.tracks.insert(
                        det.ephemeral_id,
                        Track::new(det, frame_number, self.history_len, self.first_sample),
                    );
                }
            }
        }
    }

    #[inline]
    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    #[inline]
    pub fn get_all_tracks(&self) -> &BTreeMap<EphemeralId, Track> {
        &self.tracks
    }

    #[inline]
    pub fn get_all_tracks_mut(&mut self) -> &mut BTreeMap<EphemeralId, Track> {
        &mut self.tracks
    }

    #[inline]
    pub fn get_track(&self, ephemeral_id: EphemeralId) -> Option<&Track> {
        self.tracks.get(&ephemeral_id)
    }

    #[inline]
    pub fn get_track_mut(&mut self, ephemeral_id: EphemeralId) -> Option<&mut Track> {
        self.tracks.get_mut(&ephemeral_id)
    }

    /// Persistent ID when resolved, otherwise the ephemeral ID itself.
    #[inline]
    pub fn get_mapped_id(&self, ephemeral_id: EphemeralId) -> PersistentId {
        self.persistent_id(ephemeral_id).unwrap_or(ephemeral_id)
    }

    #[inline]
    pub fn persistent_id(&self, ephemeral_id: EphemeralId) -> Option<PersistentId> {
        self.mapping.get(&ephemeral_id).copied()
    }

    #[inline]
    pub fn person_ref(&self, ephemeral_id: EphemeralId) -> PersonRef {
        match self.persistent_id(ephemeral_id) {
            Some(pid) => PersonRef::Persistent(pid),
            None => PersonRef::Ephemeral(ephemeral_id),
        }
    }

    pub fn set_mapping(&mut self, ephemeral_id: EphemeralId, persistent_id: PersistentId) {
        if let Some(prev) = self.mapping.insert(ephemeral_id, persistent_id) {
            if prev != persistent_id {
                debug!(
                    "remap {}: {} -> {}",
                    ephemeral_id, prev, persistent_id
                );
            }
        }
    }

    /// Points ownership taken while `ephemeral_id` was unresolved at its new
    /// identity; returns how many tracks changed.
    pub fn retarget_owner(&mut self, ephemeral_id: EphemeralId, pid: PersistentId) -> usize {
        let from = Ownership::Owned(PersonRef::Ephemeral(ephemeral_id));

        let mut changed = 0;
        for track in self.tracks.values_mut() {
            if track.ownership == from {
                track.ownership = Ownership::Owned(PersonRef::Persistent(pid));
                changed += 1;
            }
        }

        changed
    }

    #[inline]
    pub fn frames_since_seen(&self, track: &Track) -> u64 {
        track.frames_since_seen(self.current_frame)
    }

    /// Not refreshed this frame.
    #[inline]
    pub fn is_ghost(&self, track: &Track) -> bool {
        self.frames_since_seen(track) > 0
    }

    /// Within the ghost window.
    #[inline]
    pub fn is_active(&self, track: &Track) -> bool {
        self.frames_since_seen(track) <= self.ghost_window
    }

    pub fn active_tracks(&self) -> impl Iterator<Item = &Track> + '_ {
        self.tracks.values().filter(move |t| self.is_active(t))
    }

    /// Drops tracks unseen beyond the eviction horizon along with their remap entries.
    pub fn evict_stale(&mut self) -> usize {
        let horizon = match self.eviction_horizon {
            Some(h) => h,
            None => return 0,
        };

        let frame = self.current_frame;
        let stale: Vec<EphemeralId> = self
            .tracks
            .values()
            .filter(|t| t.frames_since_seen(frame) > horizon)
            .map(|t| t.ephemeral_id)
            .collect();

        for id in &stale {
            self.tracks.remove(id);
            self.mapping.remove(id);
            debug!("frame {}: evicted track {}", frame, id);
        }

        stale.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BBox;
    use approx::assert_relative_eq;

    fn det(id: EphemeralId, class: &str, x: f32, y: f32) -> Detection {
        Detection::new(id, class, BBox::ltrb(x - 5.0, y - 5.0, x + 5.0, y + 5.0), 0.9)
    }

    #[test]
    fn creates_then_appends() {
        let mut store = TrackStore::new(&EngineConfig::default());

        store.update(&[det(1, "person", 10.0, 10.0)], 1);
        store.update(&[det(1, "person", 20.0, 10.0)], 2);

        let track = store.get_track(1).unwrap();
        assert_eq!(track.class, "person");
        assert_eq!(track.first_seen_frame, 1);
        assert_eq!(track.last_seen_frame, 2);
        assert_eq!(track.observations, 2);
        assert_eq!(track.centroid_history.len(), 2);
        assert_relative_eq!(track.centroid().unwrap().x, 20.0);
        assert_eq!(track.owner_id(), None);
        assert_eq!(track.abandoned_timer, 0);
        assert!(!track.abandonment_event_fired);
    }

    #[test]
    fn class_fixed_at_creation() {
        let mut store = TrackStore::new(&EngineConfig::default());

        store.update(&[det(4, "backpack", 0.0, 0.0)], 1);
        store.update(&[det(4, "handbag", 0.0, 0.0)], 2);

        assert_eq!(store.get_track(4).unwrap().class, "backpack");
    }

    #[test]
    fn history_is_bounded() {
        let config = EngineConfig {
            sustained_window_frames: 3,
            history_margin_frames: 1,
            ..Default::default()
        };
        let mut store = TrackStore::new(&config);

        for frame in 1..=10 {
            store.update(&[det(1, "person", frame as f32 * 10.0, 0.0)], frame);
        }

        let track = store.get_track(1).unwrap();
        assert_eq!(track.bbox_history.len(), 4);
        assert_eq!(track.centroid_history.len(), 4);
        assert_relative_eq!(track.centroid_history.oldest().unwrap().x, 70.0);
        assert_relative_eq!(track.centroid().unwrap().x, 100.0);
        assert_eq!(track.observations, 10);
    }

    #[test]
    fn remap_falls_back_and_overwrites() {
        let mut store = TrackStore::new(&EngineConfig::default());

        assert_eq!(store.get_mapped_id(42), 42);
        assert_eq!(store.persistent_id(42), None);

        store.set_mapping(42, 1);
        assert_eq!(store.get_mapped_id(42), 1);

        store.set_mapping(42, 1);
        assert_eq!(store.get_mapped_id(42), 1);

        store.set_mapping(42, 2);
        assert_eq!(store.get_mapped_id(42), 2);
    }

    #[test]
    fn ghost_and_active_windows() {
        let config = EngineConfig {
            ghost_window_frames: 3,
            ..Default::default()
        };
        let mut store = TrackStore::new(&config);

        store.update(&[det(1, "person", 0.0, 0.0), det(2, "person", 9.0, 9.0)], 1);
        store.update(&[det(2, "person", 9.0, 9.0)], 2);

        let t1 = store.get_track(1).unwrap();
        let t2 = store.get_track(2).unwrap();
        assert!(store.is_ghost(t1));
        assert!(store.is_active(t1));
        assert!(!store.is_ghost(t2));

        store.update(&[det(2, "person", 9.0, 9.0)], 4);
        assert!(store.is_active(store.get_track(1).unwrap()));

        store.update(&[det(2, "person", 9.0, 9.0)], 5);
        let t1 = store.get_track(1).unwrap();
        assert!(!store.is_active(t1));
        assert_eq!(t1.centroid_history.len(), 1);
        assert_eq!(store.active_tracks().count(), 1);
    }

    #[test]
    fn empty_frame_ages_tracks() {
        let config = EngineConfig {
            ghost_window_frames: 2,
            ..Default::default()
        };
        let mut store = TrackStore::new(&config);

        store.update(&[det(1, "person", 0.0, 0.0)], 1);
        store.update(&[], 4);

        assert_eq!(store.current_frame(), 4);
        assert_eq!(store.active_tracks().count(), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn evicts_stale_tracks_and_their_mapping() {
        let config = EngineConfig {
            ghost_window_frames: 2,
            eviction_factor: 3,
            ..Default::default()
        };
        let mut store = TrackStore::new(&config);

        store.update(&[det(1, "person", 0.0, 0.0), det(2, "person", 9.0, 9.0)], 1);
        store.set_mapping(1, 100);

        store.update(&[det(2, "person", 9.0, 9.0)], 7);
        assert_eq!(store.evict_stale(), 0);

        store.update(&[det(2, "person", 9.0, 9.0)], 8);
        assert_eq!(store.evict_stale(), 1);
        assert!(store.get_track(1).is_none());
        assert_eq!(store.get_mapped_id(1), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn eviction_disabled() {
        let config = EngineConfig {
            eviction_factor: 0,
            ..Default::default()
        };
        let mut store = TrackStore::new(&config);

        store.update(&[det(1, "person", 0.0, 0.0)], 1);
        store.update(&[], 1_000_000);

        assert_eq!(store.evict_stale(), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn retarget_owner_moves_references() {
        let mut store = TrackStore::new(&EngineConfig::default());

        store.update(&[det(5, "suitcase", 0.0, 0.0), det(6, "backpack", 0.0, 0.0)], 1);
        store.get_track_mut(5).unwrap().ownership = Ownership::Owned(PersonRef::Ephemeral(11));
        store.get_track_mut(6).unwrap().ownership = Ownership::Owned(PersonRef::Ephemeral(12));

        assert_eq!(store.retarget_owner(11, 1), 1);
        assert_eq!(store.get_track(5).unwrap().owner(), Some(PersonRef::Persistent(1)));
        assert_eq!(store.get_track(6).unwrap().owner(), Some(PersonRef::Ephemeral(12)));
        assert_eq!(store.retarget_owner(3, 3), 0);
    }

    #[test]
    fn retarget_leaves_identity_with_same_number_alone() {
        let mut store = TrackStore::new(&EngineConfig::default());

        store.update(&[det(5, "suitcase", 0.0, 0.0), det(6, "backpack", 0.0, 0.0)], 1);
        store.get_track_mut(5).unwrap().ownership = Ownership::Owned(PersonRef::Persistent(3));
        store.get_track_mut(6).unwrap().ownership = Ownership::Owned(PersonRef::Ephemeral(3));

        assert_eq!(store.retarget_owner(3, 4), 1);
        assert_eq!(store.get_track(5).unwrap().owner(), Some(PersonRef::Persistent(3)));
        assert_eq!(store.get_track(6).unwrap().owner(), Some(PersonRef::Persistent(4)));
    }

    #[test]
    fn person_ref_follows_mapping() {
        let mut store = TrackStore::new(&EngineConfig::default());

        assert_eq!(store.person_ref(3), PersonRef::Ephemeral(3));
        store.set_mapping(3, 3);
        assert_eq!(store.person_ref(3), PersonRef::Persistent(3));
    }
}
