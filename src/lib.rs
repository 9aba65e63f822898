//! Human tracker
//!
//! Estimates a walking person's 3D position and speed from synchronized
//! camera images and organized depth point clouds, and publishes the result
//! as a camera-to-person transform, a pose and a ground marker.
//!
//! # Pipeline
//!
//! 1. `sync` pairs images with clouds by stamp.
//! 2. `frame` converts the image to equalized 8-bit luma.
//! 3. `detect` finds people; only the first box is used.
//! 4. `cloud` reads (X, Y, Z) at the box center.
//! 5. `motion` keeps the two most recent samples and derives a speed.
//! 6. `publish` sends transform, pose and marker once a speed exists.
//!
//! `pipeline::Tracker` ties steps 2-6 together for one pair at a time.
//!
//! # Module Structure
//!
//! - `ingest`: sensor sources (synthetic scene, JSON-lines recordings)
//! - `config`: file + environment configuration
//! - `shutdown`: cancellable shutdown signal

pub mod cloud;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod motion;
pub mod pipeline;
pub mod publish;
pub mod shutdown;
pub mod sync;
pub mod wire;

pub use cloud::{extract_position, PointCloudBuilder, PointCloudFrame, PointField};
pub use config::TrackerConfig;
pub use detect::{BackendRegistry, DetectionBox, DetectionCapability, DetectorBackend};
pub use error::{TrackError, TrackResult};
pub use frame::{Encoding, ImageFrame};
pub use ingest::{SensorMessage, SensorSource, SourceConfig};
pub use motion::{estimate_velocity, PositionHistory, PositionSample, VelocityMode};
pub use pipeline::{FrameOutcome, Tracker, TrackerSettings};
pub use publish::{MemoryPublisher, MqttPublisher, Publisher, ResultPublisher};
pub use shutdown::ShutdownSignal;
pub use sync::{ApproximateTimeSync, FramePair};
pub use wire::Header;
