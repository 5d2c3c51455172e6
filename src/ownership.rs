use log::debug;
use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::EngineConfig;
use crate::detection::EphemeralId;
use crate::identity::PersistentId;
use crate::math;
use crate::store::TrackStore;
use crate::track::{Ownership, PersonRef};

/// Emitted once per abandonment episode.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AbandonmentEvent {
    pub track_id: PersistentId,
    pub ephemeral_id: EphemeralId,
    pub class: String,
    pub owner_id: PersistentId,
    pub frame: u64,
}

#[derive(Debug, Clone, Copy)]
struct ActivePerson {
    last_seen: u64,
    centroid: na::Point2<f32>,
}

/// Sticky-owner and abandonment-timer state machine over ownable tracks.
///
/// An unowned object takes the nearest person within range as its owner.
/// From then on only that owner is checked: while they are away the timer
/// counts up no matter who else stands close, and it resets to zero the
/// frame they come back.
#[derive(Debug, Clone)]
pub struct OwnershipResolver {
    person_class: String,
    ownable_classes: Vec<String>,
    proximity_px: f32,
    abandoned_duration: u32,
}

impl OwnershipResolver {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            person_class: config.person_class.clone(),
            ownable_classes: config.ownable_classes.clone(),
            proximity_px: config.luggage_proximity_px,
            abandoned_duration: config.abandoned_duration_frames,
        }
    }

    #[inline]
    fn is_ownable(&self, class: &str) -> bool {
        self.ownable_classes.iter().any(|c| c == class)
    }

    /// Active persons keyed by identity, or by tracker ID while unresolved; the
    /// most recently seen track wins when several share one identity.
    fn active_persons(&self, store: &TrackStore) -> BTreeMap<PersonRef, ActivePerson> {
        let mut persons: BTreeMap<PersonRef, ActivePerson> = BTreeMap::new();

        for track in store.active_tracks() {
            if track.class != self.person_class {
                continue;
            }

            let centroid = match track.centroid() {
                Some(c) => *c,
                None => continue,
            };

            let id = store.person_ref(track.ephemeral_id);
            let candidate = ActivePerson {
                last_seen: track.last_seen_frame,
                centroid,
            };

            persons
                .entry(id)
                .and_modify(|p| {
                    if candidate.last_seen >= p.last_seen {
                        *p = candidate;
                    }
                })
                .or_insert(candidate);
        }

        persons
    }

    pub fn resolve(&self, store: &mut TrackStore) -> Vec<AbandonmentEvent> {
        let persons = self.active_persons(store);
        let frame = store.current_frame();

        let ownable: Vec<(EphemeralId, PersistentId)> = store
            .active_tracks()
            .filter(|t| self.is_ownable(&t.class))
            .map(|t| (t.ephemeral_id, store.get_mapped_id(t.ephemeral_id)))
            .collect();

        let mut events = Vec::new();

        for (ephemeral_id, track_id) in ownable {
            let track = match store.get_track_mut(ephemeral_id) {
                Some(t) => t,
                None => continue,
            };

            let centroid = match track.centroid() {
                Some(c) => *c,
                None => continue,
            };

            match track.ownership {
                Ownership::Unowned => {
                    let mut nearest: Option<(PersonRef, f32)> = None;

                    for (&person, p) in &persons {
                        let dist = math::distance(&centroid, &p.centroid);

                        if nearest.map_or(true, |(_, d)| dist < d) {
                            nearest = Some((person, dist));
                        }
                    }

                    if let Some((person, dist)) = nearest {
                        if dist < self.proximity_px {
                            debug!(
                                "frame {}: {} {} owned by {:?} ({:.1}px)",
                                frame, track.class, track_id, person, dist
                            );

                            track.ownership = Ownership::Owned(person);
                            track.abandoned_timer = 0;
                        }
                    }
                }

                Ownership::Owned(owner) => {
                    let attended = persons
                        .get(&owner)
                        .map(|p| math::distance(&centroid, &p.centroid) < self.proximity_px)
                        .unwrap_or(false);

                    if attended {
                        if track.abandoned_timer > 0 {
                            debug!(
                                "frame {}: owner {:?} back at {} {} after {} frames",
                                frame, owner, track.class, track_id, track.abandoned_timer
                            );
                        }

                        track.abandoned_timer = 0;
                    } else {
                        track.abandoned_timer = track.abandoned_timer.saturating_add(1);
                    }
                }
            }

            if !track.abandonment_event_fired && track.is_abandoned(self.abandoned_duration) {
                track.abandonment_event_fired = true;

                if let Some(owner_id) = track.owner_id() {
                    events.push(AbandonmentEvent {
                        track_id,
                        ephemeral_id,
                        class: track.class.clone(),
                        owner_id,
                        frame,
                    });
                }
            }
        }

        events
    }
}
