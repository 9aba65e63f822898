use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{DEFAULT_MIN_AREA, DEFAULT_THRESHOLD};
use crate::motion::VelocityMode;
use crate::sync::DEFAULT_QUEUE_SIZE;

const DEFAULT_SOURCE_URL: &str = "stub://walker";
const DEFAULT_TARGET_FPS: u32 = 10;
const DEFAULT_SYNC_SLOP_MS: u64 = 50;
const DEFAULT_DETECTOR: &str = "cpu";
const DEFAULT_MODEL_WIDTH: u32 = 320;
const DEFAULT_MODEL_HEIGHT: u32 = 240;
const DEFAULT_MODEL_CHANNELS: usize = 1;
const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
const DEFAULT_FIXED_FRAME: &str = "camera_link";
const DEFAULT_HUMAN_FRAME: &str = "human_detected";
const DEFAULT_MARKER_TOPIC: &str = "human/marker";
const DEFAULT_POSE_TOPIC: &str = "human/position";
const DEFAULT_TRANSFORM_TOPIC: &str = "tf/human_detected";
const DEFAULT_VELOCITY_TOPIC: &str = "human/velocity";
const DEFAULT_MQTT_BROKER: &str = "127.0.0.1:1883";
const DEFAULT_MQTT_CLIENT_ID: &str = "human-tracker";
const DEFAULT_MQTT_STATUS_TOPIC: &str = "human/tracker/status";
const DEFAULT_MQTT_KEEP_ALIVE_SECS: u64 = 60;
const DEFAULT_POLL_INITIAL_MS: u64 = 1000;
const DEFAULT_POLL_MAX_MS: u64 = 8000;

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    source: Option<SourceConfigFile>,
    sync: Option<SyncConfigFile>,
    detector: Option<DetectorConfigFile>,
    frames: Option<FramesConfigFile>,
    topics: Option<TopicsConfigFile>,
    mqtt: Option<MqttConfigFile>,
    publish: Option<PublishConfigFile>,
    velocity: Option<VelocityConfigFile>,
    skip_non_finite: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct SyncConfigFile {
    queue_size: Option<usize>,
    max_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    threshold: Option<u8>,
    min_area: Option<u32>,
    model_path: Option<PathBuf>,
    model_width: Option<u32>,
    model_height: Option<u32>,
    model_channels: Option<usize>,
    score_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct FramesConfigFile {
    fixed_frame: Option<String>,
    human_frame: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TopicsConfigFile {
    marker: Option<String>,
    pose: Option<String>,
    transform: Option<String>,
    velocity: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker_addr: Option<String>,
    client_id: Option<String>,
    status_topic: Option<String>,
    keep_alive_secs: Option<u64>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PublishConfigFile {
    poll_initial_ms: Option<u64>,
    poll_max_ms: Option<u64>,
    publish_velocity: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct VelocityConfigFile {
    mode: Option<VelocityMode>,
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub source: SourceSettings,
    pub sync: SyncSettings,
    pub detector: DetectorSettings,
    pub frames: FrameSettings,
    pub topics: TopicSettings,
    pub mqtt: MqttSettings,
    pub publish: PublishSettings,
    pub velocity_mode: VelocityMode,
    pub skip_non_finite: bool,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub target_fps: u32,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub queue_size: usize,
    pub max_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    /// Luma cutoff for the `cpu` silhouette detector.
    pub threshold: u8,
    pub min_area: u32,
    /// ONNX model for the `tract` backend.
    pub model_path: Option<PathBuf>,
    pub model_width: u32,
    pub model_height: u32,
    pub model_channels: usize,
    pub score_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct FrameSettings {
    pub fixed_frame: String,
    pub human_frame: String,
}

#[derive(Debug, Clone)]
pub struct TopicSettings {
    pub marker: String,
    pub pose: String,
    pub transform: String,
    pub velocity: String,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub broker_addr: String,
    pub client_id: String,
    /// Retained online/offline status of this node, also its last will.
    pub status_topic: String,
    pub keep_alive_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub poll_initial: Duration,
    pub poll_max: Duration,
    pub publish_velocity: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        // An empty file section never fails to resolve.
        Self::from_file(TrackerConfigFile::default())
    }
}

impl TrackerConfig {
    /// Load from `TRACKER_CONFIG` (if set), then environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TRACKER_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file path, then environment overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TrackerConfigFile) -> Self {
        let source = file.source.unwrap_or_default();
        let sync = file.sync.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let frames = file.frames.unwrap_or_default();
        let topics = file.topics.unwrap_or_default();
        let mqtt = file.mqtt.unwrap_or_default();
        let publish = file.publish.unwrap_or_default();

        Self {
            source: SourceSettings {
                url: source.url.unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                target_fps: source.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            },
            sync: SyncSettings {
                queue_size: sync.queue_size.unwrap_or(DEFAULT_QUEUE_SIZE),
                max_interval: Duration::from_millis(
                    sync.max_interval_ms.unwrap_or(DEFAULT_SYNC_SLOP_MS),
                ),
            },
            detector: DetectorSettings {
                backend: detector
                    .backend
                    .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
                threshold: detector.threshold.unwrap_or(DEFAULT_THRESHOLD),
                min_area: detector.min_area.unwrap_or(DEFAULT_MIN_AREA),
                model_path: detector.model_path,
                model_width: detector.model_width.unwrap_or(DEFAULT_MODEL_WIDTH),
                model_height: detector.model_height.unwrap_or(DEFAULT_MODEL_HEIGHT),
                model_channels: detector.model_channels.unwrap_or(DEFAULT_MODEL_CHANNELS),
                score_threshold: detector.score_threshold.unwrap_or(DEFAULT_SCORE_THRESHOLD),
            },
            frames: FrameSettings {
                fixed_frame: frames
                    .fixed_frame
                    .unwrap_or_else(|| DEFAULT_FIXED_FRAME.to_string()),
                human_frame: frames
                    .human_frame
                    .unwrap_or_else(|| DEFAULT_HUMAN_FRAME.to_string()),
            },
            topics: TopicSettings {
                marker: topics
                    .marker
                    .unwrap_or_else(|| DEFAULT_MARKER_TOPIC.to_string()),
                pose: topics.pose.unwrap_or_else(|| DEFAULT_POSE_TOPIC.to_string()),
                transform: topics
                    .transform
                    .unwrap_or_else(|| DEFAULT_TRANSFORM_TOPIC.to_string()),
                velocity: topics
                    .velocity
                    .unwrap_or_else(|| DEFAULT_VELOCITY_TOPIC.to_string()),
            },
            mqtt: MqttSettings {
                broker_addr: mqtt
                    .broker_addr
                    .unwrap_or_else(|| DEFAULT_MQTT_BROKER.to_string()),
                client_id: mqtt
                    .client_id
                    .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
                status_topic: mqtt
                    .status_topic
                    .unwrap_or_else(|| DEFAULT_MQTT_STATUS_TOPIC.to_string()),
                keep_alive_secs: mqtt.keep_alive_secs.unwrap_or(DEFAULT_MQTT_KEEP_ALIVE_SECS),
                username: mqtt.username,
                password: mqtt.password,
            },
            publish: PublishSettings {
                poll_initial: Duration::from_millis(
                    publish.poll_initial_ms.unwrap_or(DEFAULT_POLL_INITIAL_MS),
                ),
                poll_max: Duration::from_millis(publish.poll_max_ms.unwrap_or(DEFAULT_POLL_MAX_MS)),
                publish_velocity: publish.publish_velocity.unwrap_or(false),
            },
            velocity_mode: file
                .velocity
                .and_then(|velocity| velocity.mode)
                .unwrap_or_default(),
            skip_non_finite: file.skip_non_finite.unwrap_or(true),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("TRACKER_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(backend) = std::env::var("TRACKER_DETECTOR") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_string();
            }
        }
        if let Ok(broker) = std::env::var("TRACKER_MQTT_BROKER") {
            if !broker.trim().is_empty() {
                self.mqtt.broker_addr = broker;
            }
        }
        if let Ok(mode) = std::env::var("TRACKER_VELOCITY_MODE") {
            if !mode.trim().is_empty() {
                self.velocity_mode = mode.parse()?;
            }
        }
        if let Ok(flag) = std::env::var("TRACKER_PUBLISH_VELOCITY") {
            self.publish.publish_velocity = parse_bool(&flag).ok_or_else(|| {
                anyhow!("TRACKER_PUBLISH_VELOCITY must be true/false, got '{}'", flag)
            })?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.source.url.trim().is_empty() {
            return Err(anyhow!("source url must not be empty"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("source target_fps must be greater than zero"));
        }
        if self.sync.queue_size == 0 {
            return Err(anyhow!("sync queue_size must be greater than zero"));
        }
        self.detector.backend = self.detector.backend.to_lowercase();
        if self.detector.backend == "tract" && self.detector.model_path.is_none() {
            return Err(anyhow!("detector backend 'tract' requires model_path"));
        }
        if !matches!(self.detector.model_channels, 1 | 3) {
            return Err(anyhow!("detector model_channels must be 1 or 3"));
        }
        if !(0.0..=1.0).contains(&self.detector.score_threshold) {
            return Err(anyhow!("detector score_threshold must be within 0..=1"));
        }
        for (name, frame) in [
            ("fixed_frame", &self.frames.fixed_frame),
            ("human_frame", &self.frames.human_frame),
        ] {
            if frame.trim().is_empty() {
                return Err(anyhow!("frames.{} must not be empty", name));
            }
        }
        for (name, topic) in [
            ("marker", &self.topics.marker),
            ("pose", &self.topics.pose),
            ("transform", &self.topics.transform),
            ("velocity", &self.topics.velocity),
        ] {
            validate_topic(name, topic)?;
        }
        validate_topic("mqtt.status_topic", &self.mqtt.status_topic)?;
        if self.publish.poll_initial.is_zero() {
            return Err(anyhow!("publish poll_initial_ms must be greater than zero"));
        }
        if self.publish.poll_max < self.publish.poll_initial {
            return Err(anyhow!("publish poll_max_ms must be >= poll_initial_ms"));
        }
        Ok(())
    }
}

fn validate_topic(name: &str, topic: &str) -> Result<()> {
    if topic.trim().is_empty() {
        return Err(anyhow!("topic {} must not be empty", name));
    }
    if topic.contains(['+', '#']) {
        return Err(anyhow!("topic {} must not contain wildcards: {}", name, topic));
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<TrackerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
