use serde_derive::{Deserialize, Serialize};

use crate::detection::Detection;
use crate::error::Error;

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Frame {
    pub number: u64,
    pub detections: Vec<Detection>,
}

impl Frame {
    pub fn new(number: u64, detections: Vec<Detection>) -> Self {
        Self { number, detections }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Fails on the first malformed detection.
    pub fn validate(&self) -> Result<(), Error> {
        self.iter().try_for_each(Detection::validate)
    }

    /// Parses one replay line, `<frame_number>:<json array of detections>`.
    ///
    /// A bare JSON array is accepted too and gets `fallback_number`.
    /// Detections are only deserialized here, [`Frame::validate`] still applies.
    pub fn from_dets_line(line: &str, fallback_number: u64) -> Result<Frame, Error> {
        let line = line.trim();

        let (number, json) = if line.starts_with('[') {
            (fallback_number, line)
        } else {
            let (head, tail) = line
                .split_once(':')
                .ok_or_else(|| Error::Parse(format!("missing frame number in {:?}", line)))?;

            let number = head
                .trim()
                .parse::<u64>()
                .map_err(|e| Error::Parse(format!("bad frame number {:?}: {}", head, e)))?;

            (number, tail)
        };

        let detections: Vec<Detection> = serde_json::from_str(json)?;

        Ok(Frame::new(number, detections))
    }
}
