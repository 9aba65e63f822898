//! The per-pair tracking pipeline.
//!
//! `Tracker::process` runs once per synchronized (image, cloud) pair:
//! normalize the image, detect, read the first box's position from the cloud,
//! push it into the rolling history and publish when a velocity is available.
//! Nothing in here is fatal. Failures are logged and reported as a
//! `FrameOutcome`; the history is only touched once a valid sample exists.

use std::sync::{Arc, Mutex};

use crate::cloud::{extract_position, PointCloudFrame};
use crate::config::TrackerConfig;
use crate::detect::DetectorBackend;
use crate::error::TrackError;
use crate::frame::{prepare_for_detection, ImageFrame};
use crate::motion::{PositionHistory, PositionSample, VelocityMode};
use crate::publish::{PublishOutcome, ResultPublisher};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackerSettings {
    pub velocity_mode: VelocityMode,
    /// Drop samples with NaN/inf coordinates before they reach the history.
    pub skip_non_finite: bool,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            velocity_mode: VelocityMode::default(),
            skip_non_finite: true,
        }
    }
}

impl From<&TrackerConfig> for TrackerSettings {
    fn from(cfg: &TrackerConfig) -> Self {
        Self {
            velocity_mode: cfg.velocity_mode,
            skip_non_finite: cfg.skip_non_finite,
        }
    }
}

/// Why a frame with a detection produced no sample.
#[derive(Clone, Debug, PartialEq)]
pub enum DropReason {
    Detector(String),
    Extraction(TrackError),
    NonFinite(PositionSample),
    /// The sample entered the history but sending the results failed.
    Publish(String),
}

/// Result of processing one frame pair.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameOutcome {
    /// The image could not be converted for the detector.
    Skipped(TrackError),
    NoDetection,
    Dropped(DropReason),
    /// First sample of a pair; waiting for the next one.
    Pending(PositionSample),
    Published {
        sample: PositionSample,
        velocity: f64,
    },
    /// Shutdown interrupted the marker wait; transform and pose went out.
    Cancelled {
        sample: PositionSample,
        velocity: f64,
    },
}

/// Counters for periodic health logging.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub frames: u64,
    pub detections: u64,
    pub published: u64,
    pub skipped: u64,
    pub dropped: u64,
}

pub struct Tracker {
    detector: Arc<Mutex<dyn DetectorBackend>>,
    publisher: ResultPublisher,
    history: PositionHistory,
    settings: TrackerSettings,
    stats: TrackerStats,
}

impl Tracker {
    pub fn new(
        detector: Arc<Mutex<dyn DetectorBackend>>,
        publisher: ResultPublisher,
        settings: TrackerSettings,
    ) -> Self {
        Self {
            detector,
            publisher,
            history: PositionHistory::new(),
            settings,
            stats: TrackerStats::default(),
        }
    }

    pub fn stats(&self) -> &TrackerStats {
        &self.stats
    }

    pub fn history(&self) -> &PositionHistory {
        &self.history
    }

    pub fn process(&mut self, image: &ImageFrame, cloud: &PointCloudFrame) -> FrameOutcome {
        self.stats.frames += 1;
        let outcome = self.run(image, cloud);
        match &outcome {
            FrameOutcome::Skipped(_) => self.stats.skipped += 1,
            FrameOutcome::Dropped(_) => self.stats.dropped += 1,
            FrameOutcome::Published { .. } => self.stats.published += 1,
            _ => {}
        }
        outcome
    }

    fn run(&mut self, image: &ImageFrame, cloud: &PointCloudFrame) -> FrameOutcome {
        let gray = match prepare_for_detection(image) {
            Ok(gray) => gray,
            Err(e) => {
                log::warn!("skipping frame at {:.3}: {}", image.header.stamp, e);
                return FrameOutcome::Skipped(e);
            }
        };

        let boxes = {
            let mut detector = match self.detector.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match detector.detect(&gray) {
                Ok(boxes) => boxes,
                Err(e) => {
                    log::warn!("{} detector failed: {:#}", detector.name(), e);
                    return FrameOutcome::Dropped(DropReason::Detector(format!("{:#}", e)));
                }
            }
        };

        let Some(first) = boxes.first() else {
            return FrameOutcome::NoDetection;
        };
        self.stats.detections += 1;
        if boxes.len() > 1 {
            log::debug!("{} detections, using the first", boxes.len());
        }

        let stamp = image.header.stamp;
        let sample = match extract_position(cloud, first, stamp) {
            Ok(sample) => sample,
            Err(e) => {
                log::warn!("dropping detection {:?}: {} ({})", first, e, e.code());
                return FrameOutcome::Dropped(DropReason::Extraction(e));
            }
        };
        if self.settings.skip_non_finite && !sample.is_finite() {
            log::warn!("dropping non-finite sample at {:.3}", stamp);
            return FrameOutcome::Dropped(DropReason::NonFinite(sample));
        }
        log::debug!(
            "position ({:.3}, {:.3}, {:.3}) at {:.3}",
            sample.x,
            sample.y,
            sample.z,
            stamp
        );

        let Some(pair) = self.history.push(sample) else {
            return FrameOutcome::Pending(sample);
        };
        let velocity = pair.velocity(self.settings.velocity_mode);
        log::info!("velocity {:.3} m/s", velocity);

        match self.publisher.publish_detection(&pair.current, velocity, stamp) {
            Ok(PublishOutcome::Sent) => FrameOutcome::Published { sample, velocity },
            Ok(PublishOutcome::MarkerCancelled) => FrameOutcome::Cancelled { sample, velocity },
            Err(e) => {
                log::warn!("publish failed: {:#}", e);
                FrameOutcome::Dropped(DropReason::Publish(format!("{:#}", e)))
            }
        }
    }
}
