use log::{debug, info, trace, warn};
use ndarray::ArrayView3;
use std::sync::Arc;

use crate::bbox::{BBox, Ltrb};
use crate::config::EngineConfig;
use crate::detection::EphemeralId;
use crate::error::Error;
use crate::frame::Frame;
use crate::identity::{Embedding, EmbeddingExtractor, IdentityMatcher, PersistentId};
use crate::ownership::OwnershipResolver;
use crate::report::{FrameReport, ResolvedTrack, SafetyEvent, Status};
use crate::store::TrackStore;
use crate::track::{Ownership, Track};

/// Per-stream resolution engine.
///
/// Each call to [`Scene::process`] folds one frame through the track store,
/// the sampled identity resolution and the ownership resolver, in that order.
pub struct Scene {
    config: EngineConfig,
    store: TrackStore,
    matcher: IdentityMatcher,
    resolver: OwnershipResolver,
    last_events: Vec<SafetyEvent>,
}

impl Scene {
    pub fn new(config: EngineConfig, extractor: Arc<dyn EmbeddingExtractor>) -> Result<Self, Error> {
        config.validate()?;

        Ok(Self {
            store: TrackStore::new(&config),
            matcher: IdentityMatcher::new(&config, extractor),
            resolver: OwnershipResolver::new(&config),
            last_events: Vec::new(),
            config,
        })
    }

    /// `image` is the frame the detections were taken from, `(height, width,
    /// channels)`. Without it no appearance samples are taken this frame.
    ///
    /// A frame holding any malformed detection is rejected before anything is
    /// mutated.
    pub fn process(
        &mut self,
        frame: &Frame,
        image: Option<ArrayView3<'_, u8>>,
    ) -> Result<FrameReport, Error> {
        frame.validate()?;

        if frame.number < self.store.current_frame() {
            warn!(
                "frame {} arrived after frame {}",
                frame.number,
                self.store.current_frame()
            );
        }

        self.store.update(&frame.detections, frame.number);

        if let Some(image) = image {
            self.resolve_identities(frame, image);
        }

        let mut events = self.weapon_events(frame);

        for event in self.resolver.resolve(&mut self.store) {
            warn!(
                "frame {}: {} {} abandoned by person {}",
                event.frame, event.class, event.track_id, event.owner_id
            );

            events.push(SafetyEvent::LuggageAbandoned(event));
        }

        let evicted = self.store.evict_stale() + self.matcher.evict_stale(frame.number);
        if evicted > 0 {
            trace!("frame {}: {} stale entries dropped", frame.number, evicted);
        }

        self.last_events = events.clone();

        Ok(FrameReport {
            frame: frame.number,
            tracks: self.resolved_tracks(),
            events,
        })
    }

    fn resolve_identities(&mut self, frame: &Frame, image: ArrayView3<'_, u8>) {
        let interval = self.config.reid_interval;
        let mut due: Vec<(EphemeralId, BBox<Ltrb>)> = Vec::new();

        for det in frame.iter() {
            if !self.config.is_reid_class(&det.class) {
                continue;
            }

            if let Some(track) = self.store.get_track_mut(det.ephemeral_id) {
                if track.sample.is_due(track.observations, frame.number) {
                    track.sample.advance(frame.number, interval);
                    due.push((det.ephemeral_id, det.bbox));
                }
            }
        }

        for (ephemeral_id, bbox) in due {
            match self.matcher.extract_features(image, &bbox) {
                Some(embedding) => self.resolve_identity(ephemeral_id, embedding, frame.number),
                None => trace!(
                    "frame {}: no usable crop for track {}",
                    frame.number,
                    ephemeral_id
                ),
            }
        }
    }

    fn resolve_identity(&mut self, ephemeral_id: EphemeralId, embedding: Embedding, frame: u64) {
        let current = self.store.persistent_id(ephemeral_id);

        match self.matcher.find_match(embedding.view()) {
            (Some(pid), score) => {
                if current != Some(pid) {
                    info!(
                        "frame {}: track {} resolved to identity {} (similarity {:.3})",
                        frame, ephemeral_id, pid, score
                    );

                    self.remap(ephemeral_id, pid);
                }

                self.matcher.update_identity(pid, embedding, frame);
            }

            (None, score) => match current {
                Some(pid) => {
                    debug!(
                        "frame {}: track {} keeps identity {} (best similarity {:.3})",
                        frame, ephemeral_id, pid, score
                    );

                    self.matcher.update_identity(pid, embedding, frame);
                }
                None => {
                    let pid = self.matcher.register_new_identity(embedding, frame);
                    info!(
                        "frame {}: track {} registered as identity {}",
                        frame, ephemeral_id, pid
                    );

                    self.remap(ephemeral_id, pid);
                }
            },
        }
    }

    /// Objects claimed by this track before it was resolved follow it to its
    /// identity. Ownership held by other identities is never touched.
    fn remap(&mut self, ephemeral_id: EphemeralId, pid: PersistentId) {
        self.store.set_mapping(ephemeral_id, pid);

        let moved = self.store.retarget_owner(ephemeral_id, pid);
        if moved > 0 {
            debug!(
                "ownership of {} object(s) moved from track {} to identity {}",
                moved, ephemeral_id, pid
            );
        }
    }

    fn weapon_events(&mut self, frame: &Frame) -> Vec<SafetyEvent> {
        let mut events = Vec::new();

        for det in frame.iter() {
            if !self.config.is_weapon(&det.class) {
                continue;
            }

            let track_id = self.store.get_mapped_id(det.ephemeral_id);
            let track = match self.store.get_track_mut(det.ephemeral_id) {
                Some(t) if !t.weapon_reported => t,
                _ => continue,
            };

            track.weapon_reported = true;
            warn!(
                "frame {}: weapon detected: {} {} at {:?}",
                frame.number,
                det.class,
                track_id,
                det.bbox.as_slice()
            );

            events.push(SafetyEvent::WeaponDetected {
                track_id,
                ephemeral_id: det.ephemeral_id,
                class: det.class.clone(),
                bbox: det.bbox,
                frame: frame.number,
            });
        }

        events
    }

    /// Active tracks in ascending ephemeral ID order.
    pub fn resolved_tracks(&self) -> Vec<ResolvedTrack> {
        self.store
            .active_tracks()
            .filter_map(|t| self.resolve_track(t))
            .collect()
    }

    fn resolve_track(&self, track: &Track) -> Option<ResolvedTrack> {
        let (status, details) = self.describe(track);

        Some(ResolvedTrack {
            id: self.store.get_mapped_id(track.ephemeral_id),
            ephemeral_id: track.ephemeral_id,
            category: track.class.clone(),
            bbox: *track.bbox()?,
            owner: track.owner_id(),
            status,
            details,
            ghost: self.store.is_ghost(track),
        })
    }

    fn describe(&self, track: &Track) -> (Status, String) {
        let config = &self.config;

        if config.is_weapon(&track.class) {
            return (
                Status::Critical,
                format!("WEAPON DETECTED ({})", track.class.to_uppercase()),
            );
        }

        if !config.is_ownable(&track.class) {
            return (Status::Normal, "Tracked".to_string());
        }

        match track.ownership {
            Ownership::Unowned => (Status::Normal, "Unclaimed".to_string()),
            Ownership::Owned(person) => {
                let owner = person.id();
                let duration = config.abandoned_duration_frames;

                if track.is_abandoned(duration) {
                    (Status::Critical, format!("ABANDONED (owner: Person {})", owner))
                } else if track.abandoned_timer > 0 {
                    let frames_left = duration - track.abandoned_timer;

                    (
                        Status::Warning,
                        format!(
                            "Owner: Person {}, unattended, {:.1}s left",
                            owner,
                            frames_left as f32 / config.frame_rate
                        ),
                    )
                } else {
                    (Status::Normal, format!("Owner: Person {}", owner))
                }
            }
        }
    }

    /// Events raised by the most recent [`Scene::process`] call.
    #[inline]
    pub fn last_events(&self) -> &[SafetyEvent] {
        &self.last_events
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn store(&self) -> &TrackStore {
        &self.store
    }

    #[inline]
    pub fn matcher(&self) -> &IdentityMatcher {
        &self.matcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Detection;
    use crate::identity::HistogramExtractor;
    use ndarray::{s, Array3};

    fn scene(config: EngineConfig) -> Scene {
        Scene::new(config, Arc::new(HistogramExtractor::default())).unwrap()
    }

    fn det(id: EphemeralId, class: &str, x: f32, y: f32) -> Detection {
        Detection::new(id, class, BBox::ltrb(x - 20.0, y - 40.0, x + 20.0, y + 40.0), 0.9)
    }

    fn frame(number: u64, dets: Vec<Detection>) -> Frame {
        Frame::new(number, dets)
    }

    #[test]
    fn invalid_detection_rejects_whole_frame() {
        let mut scene = scene(EngineConfig::default());

        let mut bad = det(2, "person", 50.0, 50.0);
        bad.confidence = 2.0;

        let res = scene.process(&frame(1, vec![det(1, "person", 10.0, 10.0), bad]), None);
        assert!(matches!(res, Err(Error::InvalidDetection { ephemeral_id: 2, .. })));
        assert!(scene.store().is_empty());
        assert_eq!(scene.store().current_frame(), 0);
    }

    #[test]
    fn weapon_reported_once_per_track() {
        let mut scene = scene(EngineConfig::default());

        let report = scene
            .process(&frame(1, vec![det(9, "gun", 100.0, 100.0)]), None)
            .unwrap();
        assert_eq!(report.events.len(), 1);
        assert!(matches!(
            &report.events[0],
            SafetyEvent::WeaponDetected { track_id: 9, frame: 1, .. }
        ));
        assert_eq!(report.tracks[0].status, Status::Critical);
        assert_eq!(report.tracks[0].details, "WEAPON DETECTED (GUN)");

        let report = scene
            .process(&frame(2, vec![det(9, "gun", 101.0, 100.0)]), None)
            .unwrap();
        assert!(report.events.is_empty());
        assert_eq!(report.tracks[0].status, Status::Critical);
    }

    #[test]
    fn luggage_status_progression() {
        let config = EngineConfig {
            abandoned_duration_frames: 60,
            ..Default::default()
        };
        let mut scene = scene(config);

        let report = scene
            .process(&frame(1, vec![det(1, "person", 100.0, 100.0), det(2, "suitcase", 600.0, 600.0)]), None)
            .unwrap();
        let bag = &report.tracks[1];
        assert_eq!((bag.status, bag.details.as_str(), bag.owner), (Status::Normal, "Unclaimed", None));

        let report = scene
            .process(&frame(2, vec![det(1, "person", 590.0, 600.0), det(2, "suitcase", 600.0, 600.0)]), None)
            .unwrap();
        let bag = &report.tracks[1];
        assert_eq!((bag.status, bag.details.as_str(), bag.owner), (Status::Normal, "Owner: Person 1", Some(1)));

        let report = scene
            .process(&frame(3, vec![det(1, "person", 100.0, 100.0), det(2, "suitcase", 600.0, 600.0)]), None)
            .unwrap();
        let bag = &report.tracks[1];
        assert_eq!(bag.status, Status::Warning);
        assert_eq!(bag.details, "Owner: Person 1, unattended, 2.0s left");

        let mut abandoned_at = None;
        for n in 4..=70 {
            let report = scene
                .process(&frame(n, vec![det(1, "person", 100.0, 100.0), det(2, "suitcase", 600.0, 600.0)]), None)
                .unwrap();

            if !report.events.is_empty() {
                assert!(abandoned_at.is_none());
                abandoned_at = Some(n);
                assert_eq!(report.tracks[1].status, Status::Critical);
                assert_eq!(report.tracks[1].details, "ABANDONED (owner: Person 1)");
            }
        }

        assert_eq!(abandoned_at, Some(62));
    }

    #[test]
    fn ghost_flag_and_exclusion() {
        let config = EngineConfig {
            ghost_window_frames: 2,
            ..Default::default()
        };
        let mut scene = scene(config);

        scene.process(&frame(1, vec![det(1, "person", 100.0, 100.0)]), None).unwrap();

        let report = scene.process(&frame(2, vec![]), None).unwrap();
        assert_eq!(report.tracks.len(), 1);
        assert!(report.tracks[0].ghost);

        scene.process(&frame(3, vec![]), None).unwrap();
        let report = scene.process(&frame(4, vec![]), None).unwrap();
        assert!(report.tracks.is_empty());
        assert_eq!(scene.store().len(), 1);
    }

    #[test]
    fn no_image_means_no_identity_resolution() {
        let mut scene = scene(EngineConfig::default());

        for n in 1..=10 {
            scene.process(&frame(n, vec![det(4, "person", 100.0, 100.0)]), None).unwrap();
        }

        assert!(scene.matcher().is_empty());
        assert_eq!(scene.store().get_mapped_id(4), 4);
    }

    #[test]
    fn registers_on_fifth_observation() {
        let mut scene = scene(EngineConfig::default());
        let mut image = Array3::<u8>::zeros((480, 640, 3));
        image.slice_mut(s![.., ..320, 1]).fill(200);

        for n in 1..=4 {
            scene
                .process(&frame(n, vec![det(21, "person", 100.0, 100.0)]), Some(image.view()))
                .unwrap();
            assert!(scene.matcher().is_empty());
        }

        let report = scene
            .process(&frame(5, vec![det(21, "person", 100.0, 100.0)]), Some(image.view()))
            .unwrap();
        assert_eq!(scene.matcher().len(), 1);
        assert_eq!(scene.store().get_mapped_id(21), 1);
        assert_eq!(report.tracks[0].id, 1);
        assert_eq!(report.tracks[0].ephemeral_id, 21);

        for n in 6..=35 {
            scene
                .process(&frame(n, vec![det(21, "person", 100.0, 100.0)]), Some(image.view()))
                .unwrap();
        }

        let identity = scene.matcher().get(1).unwrap();
        assert_eq!(identity.bank_len(), 2);
        assert_eq!(identity.last_seen_frame, 35);
        assert_eq!(scene.matcher().len(), 1);
    }

    #[test]
    fn non_reid_classes_are_never_sampled() {
        let mut scene = scene(EngineConfig::default());
        let image = Array3::<u8>::zeros((480, 640, 3));

        for n in 1..=10 {
            scene
                .process(&frame(n, vec![det(3, "suitcase", 100.0, 100.0)]), Some(image.view()))
                .unwrap();
        }

        assert!(scene.matcher().is_empty());
    }
}
