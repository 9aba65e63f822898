//! Output messages and the publishing collaborator.
//!
//! Each velocity trigger produces, in order:
//! - a transform from the fixed camera frame to the detected-human frame,
//! - a pose positioned at the detection,
//! - a cylinder marker on the ground plane under the detection.
//!
//! The transport sits behind `Publisher`. `ResultPublisher` fills the
//! messages, and holds back the very first marker until a consumer is
//! listening on the marker topic.

mod memory;
mod messages;
mod mqtt;

use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::{FrameSettings, PublishSettings, TopicSettings};
use crate::motion::PositionSample;
use crate::shutdown::ShutdownSignal;
use crate::wire::Header;

pub use memory::MemoryPublisher;
pub use messages::{
    human_frame_rotation, ColorRgba, Marker, OutputMessage, Pose, PoseStamped, Quaternion,
    TransformStamped, Vector3, VelocityStamped, MARKER_ACTION_ADD, MARKER_TYPE_CYLINDER,
};
pub use mqtt::{MqttPublisher, PRESENCE_OFFLINE, PRESENCE_ONLINE};

/// Transport for output messages.
pub trait Publisher: Send {
    /// Send one message on a topic.
    fn publish(&mut self, topic: &str, message: &OutputMessage) -> Result<()>;

    /// Number of consumers currently known to listen on `topic`.
    fn subscriber_count(&self, topic: &str) -> usize;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    Cancelled,
}

/// Poll interval policy while waiting for a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            initial,
            max: max.max(initial),
        }
    }

    fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

/// Block until `topic` has at least one subscriber or shutdown is requested.
///
/// Re-checks with exponential backoff; the sleep itself wakes immediately
/// when `shutdown` fires.
pub fn wait_for_subscribers<P: Publisher + ?Sized>(
    publisher: &P,
    topic: &str,
    backoff: Backoff,
    shutdown: &ShutdownSignal,
) -> WaitOutcome {
    let mut interval = backoff.initial;
    let mut logged = false;
    loop {
        if shutdown.is_triggered() {
            return WaitOutcome::Cancelled;
        }
        if publisher.subscriber_count(topic) > 0 {
            return WaitOutcome::Ready;
        }
        if !logged {
            log::info!("waiting for a subscriber on {}", topic);
            logged = true;
        }
        if shutdown.wait_timeout(interval) {
            return WaitOutcome::Cancelled;
        }
        interval = backoff.next(interval);
    }
}

/// What happened to one publish request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Transform, pose and marker were all sent.
    Sent,
    /// Transform and pose were sent; shutdown interrupted the marker wait.
    MarkerCancelled,
}

/// Fills and sends the transform, pose and marker for a detection.
pub struct ResultPublisher {
    sink: Box<dyn Publisher>,
    frames: FrameSettings,
    topics: TopicSettings,
    backoff: Backoff,
    publish_velocity: bool,
    shutdown: ShutdownSignal,
    marker_listener_seen: bool,
}

impl ResultPublisher {
    pub fn new(
        sink: Box<dyn Publisher>,
        frames: FrameSettings,
        topics: TopicSettings,
        settings: &PublishSettings,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            sink,
            frames,
            topics,
            backoff: Backoff::new(settings.poll_initial, settings.poll_max),
            publish_velocity: settings.publish_velocity,
            shutdown,
            marker_listener_seen: false,
        }
    }

    pub fn transform_for(&self, sample: &PositionSample, stamp: f64) -> TransformStamped {
        TransformStamped {
            header: Header::new(stamp, self.frames.fixed_frame.as_str()),
            child_frame_id: self.frames.human_frame.clone(),
            translation: Vector3::from_sample(sample),
            rotation: human_frame_rotation(),
        }
    }

    pub fn pose_for(&self, sample: &PositionSample, stamp: f64) -> PoseStamped {
        PoseStamped {
            header: Header::new(stamp, self.frames.human_frame.as_str()),
            pose: Pose {
                position: Vector3::from_sample(sample),
                orientation: Quaternion::identity(),
            },
        }
    }

    pub fn marker_for(&self, sample: &PositionSample, stamp: f64) -> Marker {
        Marker::ground_cylinder(
            Header::new(stamp, self.frames.human_frame.as_str()),
            f64::from(sample.x),
            f64::from(sample.y),
        )
    }

    /// Send transform, pose and marker for `sample`. The velocity goes out on
    /// its own topic only when enabled.
    pub fn publish_detection(
        &mut self,
        sample: &PositionSample,
        velocity: f64,
        stamp: f64,
    ) -> Result<PublishOutcome> {
        let transform = OutputMessage::Transform(self.transform_for(sample, stamp));
        self.sink
            .publish(&self.topics.transform, &transform)
            .context("failed to publish transform")?;

        let pose = OutputMessage::Pose(self.pose_for(sample, stamp));
        self.sink
            .publish(&self.topics.pose, &pose)
            .context("failed to publish pose")?;

        if self.publish_velocity {
            let speed = OutputMessage::Velocity(VelocityStamped {
                header: Header::new(stamp, self.frames.human_frame.as_str()),
                speed: velocity,
            });
            self.sink
                .publish(&self.topics.velocity, &speed)
                .context("failed to publish velocity")?;
        }

        if !self.marker_listener_seen {
            match wait_for_subscribers(
                self.sink.as_ref(),
                &self.topics.marker,
                self.backoff,
                &self.shutdown,
            ) {
                WaitOutcome::Ready => self.marker_listener_seen = true,
                WaitOutcome::Cancelled => return Ok(PublishOutcome::MarkerCancelled),
            }
        }

        let marker = OutputMessage::Marker(self.marker_for(sample, stamp));
        self.sink
            .publish(&self.topics.marker, &marker)
            .context("failed to publish marker")?;
        Ok(PublishOutcome::Sent)
    }
}
