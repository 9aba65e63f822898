//! JSON-lines recordings of sensor messages.
//!
//! One `SensorMessage` per line, tagged by `kind`, binary payloads hex
//! encoded. Blank lines and `#` comments are skipped.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::{SensorMessage, SourceStats};

pub struct RecordingSource {
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
    line_no: usize,
    finished: bool,
    failed: bool,
    stats: SourceStats,
}

impl RecordingSource {
    pub fn new(path: impl AsRef<Path>, url: &str) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lines: None,
            line_no: 0,
            finished: false,
            failed: false,
            stats: SourceStats {
                url: url.to_string(),
                ..SourceStats::default()
            },
        }
    }

    pub fn connect(&mut self) -> Result<()> {
        let file = File::open(&self.path)
            .with_context(|| format!("failed to open recording {}", self.path.display()))?;
        self.lines = Some(BufReader::new(file).lines());
        self.line_no = 0;
        self.finished = false;
        self.failed = false;
        log::info!("SensorSource: replaying {}", self.path.display());
        Ok(())
    }

    pub fn next_message(&mut self) -> Result<Option<SensorMessage>> {
        let lines = self
            .lines
            .as_mut()
            .ok_or_else(|| anyhow!("recording {} is not connected", self.path.display()))?;
        loop {
            let Some(line) = lines.next() else {
                if !self.finished {
                    log::info!(
                        "recording {} finished after {} lines",
                        self.path.display(),
                        self.line_no
                    );
                }
                self.finished = true;
                return Ok(None);
            };
            self.line_no += 1;
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    self.failed = true;
                    return Err(anyhow!(
                        "failed to read {} line {}: {}",
                        self.path.display(),
                        self.line_no,
                        e
                    ));
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let message: SensorMessage = serde_json::from_str(trimmed).map_err(|e| {
                self.failed = true;
                anyhow!(
                    "invalid message at {} line {}: {}",
                    self.path.display(),
                    self.line_no,
                    e
                )
            })?;
            if let SensorMessage::Cloud(cloud) = &message {
                // Kept anyway; lookups on it fail per pixel with OutOfBounds.
                if let Err(e) = cloud.validate() {
                    log::warn!("{} line {}: {}", self.path.display(), self.line_no, e);
                }
            }
            self.stats.record(&message);
            return Ok(Some(message));
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.lines.is_some() && !self.failed
    }

    pub fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}

/// Writes messages in the format `RecordingSource` replays.
pub struct RecordingWriter {
    out: BufWriter<File>,
    written: u64,
}

impl RecordingWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("failed to create recording {}", path.display()))?;
        Ok(Self {
            out: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn write(&mut self, message: &SensorMessage) -> Result<()> {
        serde_json::to_writer(&mut self.out, message)?;
        self.out.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn finish(mut self) -> Result<()> {
        self.out.flush().context("failed to flush recording")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::PointCloudBuilder;
    use crate::frame::{Encoding, ImageFrame};
    use crate::wire::Header;

    #[test]
    fn replays_written_messages_in_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("run.jsonl");

        let image = ImageFrame::packed(Header::new(1.0, "cam"), 2, 1, Encoding::Mono8, vec![7, 9]);
        let cloud = PointCloudBuilder::new(2, 1)
            .header(Header::new(1.0, "cam"))
            .fill(|u, _| [u as f32, 0.0, 1.0])
            .build();

        let mut writer = RecordingWriter::create(&path)?;
        writer.write(&SensorMessage::Image(image.clone()))?;
        writer.write(&SensorMessage::Cloud(cloud.clone()))?;
        assert_eq!(writer.written(), 2);
        writer.finish()?;

        let mut source = RecordingSource::new(&path, "file://run.jsonl");
        source.connect()?;
        assert_eq!(source.next_message()?, Some(SensorMessage::Image(image)));
        assert_eq!(source.next_message()?, Some(SensorMessage::Cloud(cloud)));
        assert_eq!(source.next_message()?, None);
        assert!(source.is_healthy());
        assert_eq!((source.stats().images, source.stats().clouds), (1, 1));
        Ok(())
    }

    #[test]
    fn skips_comments_and_reports_bad_lines() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bad.jsonl");
        std::fs::write(
            &path,
            "# header\n\n{\"kind\":\"image\",\"header\":{\"stamp\":1.0},\"height\":1,\"width\":1,\"encoding\":\"mono8\",\"step\":1,\"data\":\"ff\"}\n{\"kind\":\"lidar\"}\n",
        )?;

        let mut source = RecordingSource::new(&path, path.to_string_lossy().as_ref());
        source.connect()?;
        let first = source.next_message()?.expect("image line");
        assert_eq!(first.kind(), "image");
        let err = source.next_message().unwrap_err();
        assert!(err.to_string().contains("line 4"), "{}", err);
        assert!(!source.is_healthy());
        Ok(())
    }

    #[test]
    fn missing_file_fails_to_connect() {
        let mut source = RecordingSource::new("/nonexistent/run.jsonl", "run.jsonl");
        assert!(source.connect().is_err());
        assert!(!source.is_healthy());
        assert!(source.next_message().is_err());
    }
}
