//! trackerd - human position and speed tracker daemon
//!
//! This daemon:
//! 1. Reads images and point clouds from the configured source
//! 2. Pairs them by stamp
//! 3. Detects a person, reads its position from the cloud, derives speed
//! 4. Publishes transform, pose and marker over MQTT (or in memory with --dry-run)

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use human_tracker::ingest::RecordingWriter;
use human_tracker::pipeline::TrackerStats;
use human_tracker::publish::Publisher;
use human_tracker::{
    ApproximateTimeSync, BackendRegistry, DetectionCapability, FrameOutcome, MemoryPublisher,
    MqttPublisher, ResultPublisher, SensorMessage, SensorSource, ShutdownSignal, SourceConfig,
    Tracker, TrackerConfig, TrackerSettings,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
/// Messages a dry run keeps in memory; older ones are only counted.
const DRY_RUN_RETAINED: usize = 64;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Track a walking person from camera images and depth clouds"
)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "TRACKER_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Sensor source: stub://<name>, file://<path> or a recording path.
    #[arg(long)]
    source: Option<String>,

    /// Detector backend (cpu, stub, tract).
    #[arg(long)]
    detector: Option<String>,

    /// Publish into memory instead of MQTT and log what would be sent.
    #[arg(long)]
    dry_run: bool,

    /// Stop after this many synchronized pairs.
    #[arg(long, value_name = "N")]
    max_frames: Option<u64>,

    /// Also write every sensor message to a JSON-lines recording.
    #[arg(long, value_name = "PATH")]
    record: Option<PathBuf>,

    /// Pull from the source as fast as possible instead of at target_fps.
    #[arg(long)]
    no_pace: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = TrackerConfig::load_from(args.config.as_deref())?;
    if let Some(source) = &args.source {
        cfg.source.url = source.clone();
    }
    if let Some(detector) = &args.detector {
        cfg.detector.backend = detector.to_lowercase();
    }

    let shutdown = ShutdownSignal::new();
    let handler_signal = shutdown.clone();
    ctrlc::set_handler(move || handler_signal.trigger())
        .context("error setting Ctrl-C handler")?;

    let registry = BackendRegistry::from_settings(&cfg.detector)?;
    let detector = registry.backend_for_capability(DetectionCapability::PersonDetection)?;
    log::info!("detector backends: {}", registry.list().join(", "));

    let dry_run = args.dry_run.then(|| MemoryPublisher::bounded(DRY_RUN_RETAINED));
    let sink: Box<dyn Publisher> = if let Some(memory) = &dry_run {
        memory.set_subscribers(&cfg.topics.marker, 1);
        log::info!("dry run: keeping the last {} results in memory", DRY_RUN_RETAINED);
        Box::new(memory.clone())
    } else {
        Box::new(MqttPublisher::connect(&cfg.mqtt, &[cfg.topics.marker.as_str()])?)
    };
    let publisher = ResultPublisher::new(
        sink,
        cfg.frames.clone(),
        cfg.topics.clone(),
        &cfg.publish,
        shutdown.clone(),
    );
    let mut tracker = Tracker::new(detector, publisher, TrackerSettings::from(&cfg));

    let mut source = SensorSource::new(SourceConfig::from(&cfg.source))?;
    source.connect()?;
    let mut sync = ApproximateTimeSync::new(cfg.sync.queue_size, cfg.sync.max_interval);
    let mut recorder = match &args.record {
        Some(path) => Some(RecordingWriter::create(path)?),
        None => None,
    };

    let frame_interval = Duration::from_secs_f64(1.0 / f64::from(cfg.source.target_fps));
    let mut last_health_log = Instant::now();
    let mut pairs_processed = 0u64;

    log::info!(
        "trackerd running. source={} detector={} velocity_mode={:?}",
        cfg.source.url,
        cfg.detector.backend,
        cfg.velocity_mode
    );

    'frames: while !shutdown.is_triggered() {
        let message = match source.next_message() {
            Ok(Some(message)) => message,
            Ok(None) => {
                log::info!("source {} ended", cfg.source.url);
                break;
            }
            Err(e) => {
                log::warn!("source read failed: {:#}", e);
                if shutdown.wait_timeout(frame_interval) {
                    break;
                }
                continue;
            }
        };
        if let Some(recorder) = recorder.as_mut() {
            recorder.write(&message)?;
        }

        let is_image = matches!(message, SensorMessage::Image(_));
        let pairs = match message {
            SensorMessage::Image(image) => sync.push_image(image),
            SensorMessage::Cloud(cloud) => sync.push_cloud(cloud),
        };
        for pair in pairs {
            let outcome = tracker.process(&pair.image, &pair.cloud);
            log_outcome(&outcome);
            pairs_processed += 1;
            if matches!(outcome, FrameOutcome::Cancelled { .. }) {
                break 'frames;
            }
            if args.max_frames.is_some_and(|max| pairs_processed >= max) {
                log::info!("processed {} pairs, stopping", pairs_processed);
                break 'frames;
            }
        }

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            log_health(&source, &sync, tracker.stats());
            last_health_log = Instant::now();
        }

        if is_image && !args.no_pace && shutdown.wait_timeout(frame_interval) {
            break;
        }
    }

    if shutdown.is_triggered() {
        log::info!("shutdown signal received, stopping trackerd...");
    }
    log_health(&source, &sync, tracker.stats());
    if let Some(recorder) = recorder {
        let written = recorder.written();
        recorder.finish()?;
        log::info!("recorded {} messages", written);
    }
    if let Some(memory) = dry_run {
        log::info!("dry run: {} messages would have been published", memory.published());
    }
    drop(tracker);
    Ok(())
}

fn log_outcome(outcome: &FrameOutcome) {
    match outcome {
        FrameOutcome::Published { sample, velocity } => log::info!(
            "published ({:.3}, {:.3}, {:.3}) at {:.3} speed={:.3} m/s",
            sample.x,
            sample.y,
            sample.z,
            sample.timestamp,
            velocity
        ),
        FrameOutcome::Pending(sample) => {
            log::debug!("first sample at {:.3}, waiting for the next", sample.timestamp)
        }
        FrameOutcome::Cancelled { .. } => log::info!("marker wait cancelled"),
        FrameOutcome::NoDetection => log::trace!("no detection"),
        FrameOutcome::Skipped(_) | FrameOutcome::Dropped(_) => {}
    }
}

fn log_health(source: &SensorSource, sync: &ApproximateTimeSync, stats: &TrackerStats) {
    let source_stats = source.stats();
    let sync_stats = sync.stats();
    log::info!(
        "source health={} images={} clouds={} url={}",
        source.is_healthy(),
        source_stats.images,
        source_stats.clouds,
        source_stats.url
    );
    log::info!(
        "sync pairs={} dropped_images={} dropped_clouds={} | tracker frames={} detections={} published={} skipped={} dropped={}",
        sync_stats.pairs,
        sync_stats.dropped_images,
        sync_stats.dropped_clouds,
        stats.frames,
        stats.detections,
        stats.published,
        stats.skipped,
        stats.dropped
    );
}
