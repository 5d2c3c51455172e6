pub mod bbox;
pub mod circular_queue;
pub mod config;
pub mod detection;
pub mod error;
pub mod frame;
pub mod identity;
pub mod math;
pub mod ownership;
pub mod report;
pub mod scene;
pub mod scheduler;
pub mod store;
pub mod track;

pub use config::EngineConfig;
pub use detection::{Detection, EphemeralId};
pub use frame::Frame;
pub use identity::{EmbeddingExtractor, HistogramExtractor, PersistentId};
pub use report::{FrameReport, ResolvedTrack, SafetyEvent, Status};
pub use track::{Ownership, PersonRef, Track};

use error::Error;
use ndarray::ArrayView3;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

pub trait Resolving {
    fn update(
        &mut self,
        frame: &Frame,
        image: Option<ArrayView3<'_, u8>>,
        src: &str,
    ) -> Result<FrameReport, Error>;
    fn tracks(&self, src: &str) -> Rc<[ResolvedTrack]>;
    fn events(&self, src: &str) -> Rc<[SafetyEvent]>;
}

/// One independent [`scene::Scene`] per stream, sharing only the extractor.
pub struct SafetyTracker {
    scenes: HashMap<String, scene::Scene>,
    config: EngineConfig,
    extractor: Arc<dyn EmbeddingExtractor>,
}

impl SafetyTracker {
    pub fn new(config: EngineConfig, extractor: Arc<dyn EmbeddingExtractor>) -> Result<Self, Error> {
        config.validate()?;

        Ok(Self {
            scenes: HashMap::new(),
            config,
            extractor,
        })
    }

    #[inline]
    pub fn scene(&self, src: &str) -> Option<&scene::Scene> {
        self.scenes.get(src)
    }

    pub fn remove_stream(&mut self, src: &str) -> Option<scene::Scene> {
        self.scenes.remove(src)
    }
}

impl Default for SafetyTracker {
    fn default() -> Self {
        Self {
            scenes: HashMap::new(),
            config: EngineConfig::default(),
            extractor: Arc::new(HistogramExtractor::default()),
        }
    }
}

impl crate::Resolving for SafetyTracker {
    fn update(
        &mut self,
        frame: &Frame,
        image: Option<ArrayView3<'_, u8>>,
        src: &str,
    ) -> Result<FrameReport, Error> {
        let scene = match self.scenes.get_mut(src) {
            Some(scene) => scene,
            None => {
                let scene = scene::Scene::new(self.config.clone(), self.extractor.clone())?;

                self.scenes.entry(src.to_string()).or_insert(scene)
            }
        };

        scene.process(frame, image)
    }

    #[inline]
    fn tracks(&self, src: &str) -> Rc<[ResolvedTrack]> {
        if let Some(scene) = self.scenes.get(src) {
            return scene.resolved_tracks().into_boxed_slice().into();
        }

        Rc::new([])
    }

    #[inline]
    fn events(&self, src: &str) -> Rc<[SafetyEvent]> {
        if let Some(scene) = self.scenes.get(src) {
            return scene.last_events().into();
        }

        Rc::new([])
    }
}
