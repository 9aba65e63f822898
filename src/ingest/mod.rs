//! Sensor ingestion sources.
//!
//! A source produces a single interleaved stream of camera images and
//! organized point clouds. Pairing them by stamp is the synchronizer's job.
//!
//! - `stub://<name>`: synthetic walker scene (tests, demos)
//! - `file://<path>` or a plain path: JSON-lines recording replay
//!
//! Sources never block on pacing; the caller decides how fast to pull.

mod recording;
mod synthetic;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::cloud::PointCloudFrame;
use crate::frame::ImageFrame;

pub use recording::{RecordingSource, RecordingWriter};
pub use synthetic::{SceneGeometry, SyntheticSource};

/// One message from either sensor stream.
///
/// On the wire (recordings) the variant is carried in a `kind` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorMessage {
    Image(ImageFrame),
    Cloud(PointCloudFrame),
}

impl SensorMessage {
    pub fn stamp(&self) -> f64 {
        match self {
            Self::Image(image) => image.header.stamp,
            Self::Cloud(cloud) => cloud.header.stamp,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Image(_) => "image",
            Self::Cloud(_) => "cloud",
        }
    }
}

/// Configuration for a sensor source.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    pub url: String,
    /// Frame rate of the synthetic scene; also its stamp spacing.
    pub target_fps: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "stub://walker".to_string(),
            target_fps: 10,
        }
    }
}

impl From<&crate::config::SourceSettings> for SourceConfig {
    fn from(settings: &crate::config::SourceSettings) -> Self {
        Self {
            url: settings.url.clone(),
            target_fps: settings.target_fps,
        }
    }
}

/// Statistics for a sensor source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub images: u64,
    pub clouds: u64,
    pub url: String,
}

impl SourceStats {
    pub(crate) fn record(&mut self, message: &SensorMessage) {
        match message {
            SensorMessage::Image(_) => self.images += 1,
            SensorMessage::Cloud(_) => self.clouds += 1,
        }
    }
}

/// Sensor source selected by URL scheme.
pub struct SensorSource {
    backend: SourceBackend,
}

enum SourceBackend {
    Synthetic(SyntheticSource),
    Recording(RecordingSource),
}

impl SensorSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let url = config.url.trim();
        if url.is_empty() {
            return Err(anyhow!("source url must not be empty"));
        }
        let backend = if url.starts_with("stub://") {
            SourceBackend::Synthetic(SyntheticSource::new(config))
        } else if let Some(path) = url.strip_prefix("file://") {
            SourceBackend::Recording(RecordingSource::new(path, &config.url))
        } else if !url.contains("://") {
            SourceBackend::Recording(RecordingSource::new(url, &config.url))
        } else {
            return Err(anyhow!(
                "unsupported source url '{}' (expected stub://, file:// or a path)",
                url
            ));
        };
        Ok(Self { backend })
    }

    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.connect(),
            SourceBackend::Recording(source) => source.connect(),
        }
    }

    /// Next image or cloud. `None` means the stream has ended.
    pub fn next_message(&mut self) -> Result<Option<SensorMessage>> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.next_message().map(Some),
            SourceBackend::Recording(source) => source.next_message(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.is_healthy(),
            SourceBackend::Recording(source) => source.is_healthy(),
        }
    }

    pub fn stats(&self) -> SourceStats {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.stats(),
            SourceBackend::Recording(source) => source.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_scheme_selects_backend() {
        for url in ["stub://walker", "file:///tmp/run.jsonl", "run.jsonl"] {
            let config = SourceConfig {
                url: url.to_string(),
                ..SourceConfig::default()
            };
            assert!(SensorSource::new(config).is_ok(), "{}", url);
        }
        for url in ["", "rtsp://camera/stream"] {
            let config = SourceConfig {
                url: url.to_string(),
                ..SourceConfig::default()
            };
            assert!(SensorSource::new(config).is_err(), "{}", url);
        }
    }

    #[test]
    fn stub_source_interleaves_image_and_cloud() -> Result<()> {
        let mut source = SensorSource::new(SourceConfig::default())?;
        source.connect()?;
        let image = source.next_message()?.ok_or_else(|| anyhow!("ended"))?;
        let cloud = source.next_message()?.ok_or_else(|| anyhow!("ended"))?;
        assert_eq!(image.kind(), "image");
        assert_eq!(cloud.kind(), "cloud");
        assert_eq!(image.stamp(), cloud.stamp());

        let stats = source.stats();
        assert_eq!((stats.images, stats.clouds), (1, 1));
        assert!(source.is_healthy());
        Ok(())
    }

    #[test]
    fn message_kind_tag_round_trips() {
        let cloud = crate::cloud::PointCloudBuilder::new(1, 1)
            .header(crate::wire::Header::new(2.0, "camera_link"))
            .build();
        let json = serde_json::to_string(&SensorMessage::Cloud(cloud.clone())).unwrap();
        assert!(json.starts_with(r#"{"kind":"cloud""#));
        let parsed: SensorMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, SensorMessage::Cloud(cloud));
    }
}
