use anyhow::Result;
use image::GrayImage;

use crate::detect::result::DetectionBox;

/// Detection capabilities supported by backends.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionCapability {
    /// Upright people, one box per person.
    PersonDetection,
}

/// Detector backend trait.
///
/// Backends receive the equalized grayscale frame and return zero or more
/// boxes, most confident first. Zero boxes is a normal outcome, not an error.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: DetectionCapability) -> bool;

    /// Run detection on a frame.
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<DetectionBox>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
