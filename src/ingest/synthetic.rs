//! Synthetic walker scene for `stub://` URLs.
//!
//! A bright upright rectangle walks left to right over a dark, noisy
//! background, wrapping at the edge. Each tick yields a `bgr8` image and the
//! matching organized cloud with the same stamp. Cloud points come from a
//! pinhole model: the walker stands at `person_depth`, everything else on a
//! wall at `wall_depth`.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{SensorMessage, SourceConfig, SourceStats};
use crate::cloud::{PointCloudBuilder, PointCloudFrame};
use crate::frame::{Encoding, ImageFrame};
use crate::wire::Header;

const CAMERA_FRAME: &str = "camera_link";
const BACKGROUND_MAX: u8 = 60;
const PERSON_LEVEL: u8 = 255;

/// Layout of the synthetic scene, in pixels and meters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneGeometry {
    pub width: u32,
    pub height: u32,
    pub person_width: u32,
    pub person_height: u32,
    /// Top row of the walker.
    pub person_top: u32,
    /// Horizontal pixels moved per frame.
    pub step_px: u32,
    pub person_depth: f32,
    pub wall_depth: f32,
    pub focal_px: f32,
}

impl Default for SceneGeometry {
    fn default() -> Self {
        Self {
            width: 160,
            height: 120,
            person_width: 20,
            person_height: 48,
            person_top: 40,
            step_px: 2,
            person_depth: 3.0,
            wall_depth: 6.0,
            focal_px: 100.0,
        }
    }
}

impl SceneGeometry {
    /// Left edge of the walker at frame `index` (0-based).
    pub fn person_left(&self, index: u64) -> u32 {
        let travel = u64::from(self.width.saturating_sub(self.person_width + 20).max(1));
        10 + ((index * u64::from(self.step_px)) % travel) as u32
    }

    fn contains_person(&self, left: u32, u: u32, v: u32) -> bool {
        u >= left
            && u < left + self.person_width
            && v >= self.person_top
            && v < self.person_top + self.person_height
    }

    /// Back-project pixel (u, v) at `depth` through the pinhole model.
    pub fn project(&self, u: u32, v: u32, depth: f32) -> [f32; 3] {
        let cx = self.width as f32 / 2.0;
        let cy = self.height as f32 / 2.0;
        [
            (u as f32 - cx) * depth / self.focal_px,
            (v as f32 - cy) * depth / self.focal_px,
            depth,
        ]
    }
}

pub struct SyntheticSource {
    config: SourceConfig,
    geometry: SceneGeometry,
    rng: StdRng,
    start_stamp: Option<f64>,
    frame_index: u64,
    pending_cloud: Option<PointCloudFrame>,
    stats: SourceStats,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Self {
        Self::with_geometry(config, SceneGeometry::default())
    }

    pub fn with_geometry(config: SourceConfig, geometry: SceneGeometry) -> Self {
        let stats = SourceStats {
            url: config.url.clone(),
            ..SourceStats::default()
        };
        Self {
            config,
            geometry,
            rng: StdRng::seed_from_u64(0x5eed),
            start_stamp: None,
            frame_index: 0,
            pending_cloud: None,
            stats,
        }
    }

    /// Fix the stamp of the first frame instead of using wall-clock time.
    pub fn with_start_stamp(mut self, stamp: f64) -> Self {
        self.start_stamp = Some(stamp);
        self
    }

    pub fn geometry(&self) -> &SceneGeometry {
        &self.geometry
    }

    /// Synthetic sources are always "connected".
    pub fn connect(&mut self) -> Result<()> {
        if self.start_stamp.is_none() {
            self.start_stamp = Some(
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|elapsed| elapsed.as_secs_f64())
                    .unwrap_or_default(),
            );
        }
        log::info!(
            "SensorSource: connected to {} (synthetic {}x{})",
            self.config.url,
            self.geometry.width,
            self.geometry.height
        );
        Ok(())
    }

    pub fn next_message(&mut self) -> Result<SensorMessage> {
        let message = match self.pending_cloud.take() {
            Some(cloud) => SensorMessage::Cloud(cloud),
            None => {
                let stamp = self.start_stamp.unwrap_or_default()
                    + self.frame_index as f64 / f64::from(self.config.target_fps.max(1));
                let left = self.geometry.person_left(self.frame_index);
                self.pending_cloud = Some(self.render_cloud(left, stamp));
                let image = self.render_image(left, stamp);
                self.frame_index += 1;
                SensorMessage::Image(image)
            }
        };
        self.stats.record(&message);
        Ok(message)
    }

    fn render_image(&mut self, left: u32, stamp: f64) -> ImageFrame {
        let g = self.geometry;
        let mut data = Vec::with_capacity((g.width * g.height * 3) as usize);
        for v in 0..g.height {
            for u in 0..g.width {
                let level = if g.contains_person(left, u, v) {
                    PERSON_LEVEL
                } else {
                    self.rng.gen_range(0..BACKGROUND_MAX)
                };
                data.extend_from_slice(&[level, level, level]);
            }
        }
        ImageFrame::packed(
            Header::new(stamp, CAMERA_FRAME),
            g.width,
            g.height,
            Encoding::Bgr8,
            data,
        )
    }

    fn render_cloud(&self, left: u32, stamp: f64) -> PointCloudFrame {
        let g = self.geometry;
        PointCloudBuilder::new(g.width, g.height)
            .header(Header::new(stamp, CAMERA_FRAME))
            .fill(|u, v| {
                let depth = if g.contains_person(left, u, v) {
                    g.person_depth
                } else {
                    g.wall_depth
                };
                g.project(u, v, depth)
            })
            .build()
    }

    pub fn is_healthy(&self) -> bool {
        true
    }

    pub fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}
