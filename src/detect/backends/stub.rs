use std::collections::VecDeque;

use anyhow::Result;
use image::GrayImage;

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::DetectionBox;

/// Stub backend for testing. Replays scripted detections, one list per frame,
/// and reports nothing once the script is exhausted.
#[derive(Default)]
pub struct StubBackend {
    script: VecDeque<Vec<DetectionBox>>,
    frames_seen: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that returns `frames` in order.
    pub fn scripted(frames: impl IntoIterator<Item = Vec<DetectionBox>>) -> Self {
        Self {
            script: frames.into_iter().collect(),
            frames_seen: 0,
        }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::PersonDetection)
    }

    fn detect(&mut self, _image: &GrayImage) -> Result<Vec<DetectionBox>> {
        self.frames_seen += 1;
        Ok(self.script.pop_front().unwrap_or_default())
    }
}
