/// When a track is next due for an appearance sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleSchedule {
    /// Waiting for the track's n-th observation.
    AtObservation(u64),
    /// Due on the first observation at or after this frame.
    AtFrame(u64),
}

impl SampleSchedule {
    #[inline]
    pub fn new(first_sample: u64) -> Self {
        SampleSchedule::AtObservation(first_sample)
    }

    #[inline]
    pub fn is_due(&self, observations: u64, frame: u64) -> bool {
        match *self {
            SampleSchedule::AtObservation(n) => observations >= n,
            SampleSchedule::AtFrame(f) => frame >= f,
        }
    }

    /// Consumes the slot whether or not the sample produced an embedding.
    #[inline]
    pub fn advance(&mut self, frame: u64, interval: u64) {
        *self = SampleSchedule::AtFrame(frame.saturating_add(interval));
    }

    #[inline]
    pub fn next_frame(&self) -> Option<u64> {
        match *self {
            SampleSchedule::AtObservation(_) => None,
            SampleSchedule::AtFrame(f) => Some(f),
        }
    }
}
