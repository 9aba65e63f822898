use anyhow::Result;
use image::GrayImage;

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::DetectionBox;

pub const DEFAULT_THRESHOLD: u8 = 250;
pub const DEFAULT_MIN_AREA: u32 = 400;
const MIN_FILL_RATIO: f32 = 0.6;

/// CPU silhouette backend.
///
/// Boxes the bright foreground of an equalized frame and accepts it as a
/// person when it is large enough, mostly solid, and taller than it is wide.
/// Reports at most one box per frame.
pub struct CpuBackend {
    threshold: u8,
    min_area: u32,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_min_area(mut self, min_area: u32) -> Self {
        self.min_area = min_area;
        self
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            min_area: DEFAULT_MIN_AREA,
        }
    }
}

impl DetectorBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::PersonDetection)
    }

    fn detect(&mut self, image: &GrayImage) -> Result<Vec<DetectionBox>> {
        let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
        let (mut max_x, mut max_y) = (0u32, 0u32);
        let mut count = 0u32;

        for (x, y, pixel) in image.enumerate_pixels() {
            if pixel.0[0] >= self.threshold {
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
                count += 1;
            }
        }

        if count == 0 || count < self.min_area {
            return Ok(Vec::new());
        }

        let width = max_x - min_x + 1;
        let height = max_y - min_y + 1;
        let fill = count as f32 / (width as f32 * height as f32);
        if fill < MIN_FILL_RATIO || height < width {
            log::trace!(
                "cpu backend rejected blob {}x{} fill={:.2}",
                width,
                height,
                fill
            );
            return Ok(Vec::new());
        }

        Ok(vec![DetectionBox::new(
            min_x as i32,
            min_y as i32,
            width as i32,
            height as i32,
        )
        .with_confidence(fill)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn scene(rect: (u32, u32, u32, u32)) -> GrayImage {
        let (rx, ry, rw, rh) = rect;
        GrayImage::from_fn(40, 30, |x, y| {
            if x >= rx && x < rx + rw && y >= ry && y < ry + rh {
                Luma([255])
            } else {
                Luma([((x * 7 + y * 13) % 60) as u8])
            }
        })
    }

    #[test]
    fn cpu_backend_boxes_upright_silhouette() {
        let mut backend = CpuBackend::new().with_min_area(20);
        let boxes = backend.detect(&scene((10, 5, 6, 12))).unwrap();
        assert_eq!(boxes.len(), 1);
        let b = boxes[0];
        assert_eq!((b.x, b.y, b.width, b.height), (10, 5, 6, 12));
        assert_eq!(b.confidence, 1.0);
    }

    #[test]
    fn cpu_backend_ignores_small_or_wide_blobs() {
        let mut backend = CpuBackend::new().with_min_area(20);
        assert!(backend.detect(&scene((10, 5, 3, 4))).unwrap().is_empty());
        assert!(backend.detect(&scene((2, 5, 20, 6))).unwrap().is_empty());
        assert!(backend.detect(&scene((0, 0, 0, 0))).unwrap().is_empty());
    }
}
