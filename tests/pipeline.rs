use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;

use human_tracker::config::TrackerConfig;
use human_tracker::detect::{CpuBackend, StubBackend};
use human_tracker::ingest::{RecordingWriter, SyntheticSource};
use human_tracker::publish::OutputMessage;
use human_tracker::{
    ApproximateTimeSync, DetectionBox, DetectorBackend, FrameOutcome, MemoryPublisher,
    PointCloudBuilder, ResultPublisher, SensorMessage, SensorSource, ShutdownSignal,
    SourceConfig, Tracker, TrackerSettings, VelocityMode,
};

fn tracker_with(
    detector: impl DetectorBackend + 'static,
    settings: TrackerSettings,
) -> (Tracker, MemoryPublisher) {
    let memory = MemoryPublisher::new();
    let cfg = TrackerConfig::default();
    memory.set_subscribers(&cfg.topics.marker, 1);
    let publisher = ResultPublisher::new(
        Box::new(memory.clone()),
        cfg.frames.clone(),
        cfg.topics.clone(),
        &cfg.publish,
        ShutdownSignal::new(),
    );
    let detector: Arc<Mutex<dyn DetectorBackend>> = Arc::new(Mutex::new(detector));
    (Tracker::new(detector, publisher, settings), memory)
}

fn run(
    source: &mut dyn FnMut() -> Result<Option<SensorMessage>>,
    tracker: &mut Tracker,
) -> Result<Vec<FrameOutcome>> {
    let mut sync = ApproximateTimeSync::new(30, Duration::from_millis(50));
    let mut outcomes = Vec::new();
    while let Some(message) = source()? {
        let pairs = match message {
            SensorMessage::Image(image) => sync.push_image(image),
            SensorMessage::Cloud(cloud) => sync.push_cloud(cloud),
        };
        for pair in pairs {
            outcomes.push(tracker.process(&pair.image, &pair.cloud));
        }
    }
    Ok(outcomes)
}

#[test]
fn synthetic_walker_is_detected_and_published() -> Result<()> {
    let mut synthetic = SyntheticSource::new(SourceConfig::default()).with_start_stamp(1.0);
    synthetic.connect()?;
    let geometry = *synthetic.geometry();

    let settings = TrackerSettings {
        velocity_mode: VelocityMode::Elapsed,
        ..TrackerSettings::default()
    };
    let (mut tracker, memory) = tracker_with(CpuBackend::new(), settings);

    let mut remaining = 8;
    let mut next = || -> Result<Option<SensorMessage>> {
        if remaining == 0 {
            return Ok(None);
        }
        remaining -= 1;
        synthetic.next_message().map(Some)
    };
    let outcomes = run(&mut next, &mut tracker)?;

    assert_eq!(outcomes.len(), 4);
    assert!(matches!(outcomes[0], FrameOutcome::Pending(_)));

    // Center of the walker at frame 0, back-projected at the walker's depth.
    let FrameOutcome::Pending(first) = outcomes[0] else {
        unreachable!()
    };
    let [x, y, z] = geometry.project(
        geometry.person_left(0) + geometry.person_width / 2,
        geometry.person_top + geometry.person_height / 2,
        geometry.person_depth,
    );
    assert_eq!((first.x, first.y, first.z), (x, y, z));

    // Two pixels per frame at 3 m with f=100 px is 6 cm per 0.1 s.
    for outcome in &outcomes[1..] {
        let FrameOutcome::Published { velocity, .. } = outcome else {
            panic!("expected publish, got {:?}", outcome);
        };
        assert!((velocity - 0.6).abs() < 1e-4, "velocity {}", velocity);
    }

    assert_eq!(tracker.stats().published, 3);
    assert_eq!(tracker.history().len(), 1);
    assert_eq!(memory.messages_on("human/marker").len(), 3);
    assert_eq!(memory.messages_on("tf/human_detected").len(), 3);
    Ok(())
}

#[test]
fn long_dry_run_keeps_a_fixed_size_record() -> Result<()> {
    let mut synthetic = SyntheticSource::new(SourceConfig::default()).with_start_stamp(1.0);
    synthetic.connect()?;

    let cfg = TrackerConfig::default();
    let memory = MemoryPublisher::bounded(16);
    memory.set_subscribers(&cfg.topics.marker, 1);
    let publisher = ResultPublisher::new(
        Box::new(memory.clone()),
        cfg.frames.clone(),
        cfg.topics.clone(),
        &cfg.publish,
        ShutdownSignal::new(),
    );
    let detector: Arc<Mutex<dyn DetectorBackend>> = Arc::new(Mutex::new(CpuBackend::new()));
    let mut tracker = Tracker::new(detector, publisher, TrackerSettings::default());

    let mut remaining = 400;
    let mut next = || -> Result<Option<SensorMessage>> {
        if remaining == 0 {
            return Ok(None);
        }
        remaining -= 1;
        synthetic.next_message().map(Some)
    };
    run(&mut next, &mut tracker)?;

    // 200 pairs, the first only fills the history: 199 x (transform, pose, marker).
    assert_eq!(tracker.stats().published, 199);
    assert_eq!(memory.published(), 597);
    assert_eq!(memory.messages().len(), 16);
    Ok(())
}

#[test]
fn recorded_session_replays_through_the_pipeline() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.jsonl");

    let mut writer = RecordingWriter::create(&path)?;
    let mut synthetic = SyntheticSource::new(SourceConfig::default()).with_start_stamp(50.0);
    synthetic.connect()?;
    for _ in 0..6 {
        writer.write(&synthetic.next_message()?)?;
    }
    writer.finish()?;

    let mut source = SensorSource::new(SourceConfig {
        url: format!("file://{}", path.display()),
        ..SourceConfig::default()
    })?;
    source.connect()?;

    let (mut tracker, memory) = tracker_with(CpuBackend::new(), TrackerSettings::default());
    let mut next = || source.next_message();
    let outcomes = run(&mut next, &mut tracker)?;

    assert_eq!(outcomes.len(), 3);
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, FrameOutcome::Published { .. }))
            .count(),
        2
    );
    let markers = memory.messages_on("human/marker");
    let OutputMessage::Marker(marker) = &markers[1] else {
        panic!("expected marker");
    };
    assert_eq!(marker.pose.position.z, 0.0);
    assert_eq!(marker.header.frame_id, "human_detected");
    Ok(())
}

#[test]
fn scripted_detections_follow_history_rules() -> Result<()> {
    let person = DetectionBox::new(100, 50, 40, 80);
    let script = vec![vec![person], vec![], vec![], vec![person], vec![person]];
    let (mut tracker, memory) = tracker_with(StubBackend::scripted(script), TrackerSettings::default());

    let points = [
        [0.0, 0.0, 0.0],
        [5.0, 5.0, 5.0],
        [5.0, 5.0, 5.0],
        [3.0, 4.0, 0.0],
        [3.0, 4.0, 12.0],
    ];
    let mut outcomes = Vec::new();
    for (i, point) in points.iter().enumerate() {
        let stamp = (i + 1) as f64;
        let image = human_tracker::ImageFrame::packed(
            human_tracker::Header::new(stamp, "camera_link"),
            200,
            150,
            human_tracker::Encoding::Mono8,
            vec![0; 200 * 150],
        );
        let mut cloud = PointCloudBuilder::new(200, 150)
            .header(human_tracker::Header::new(stamp, "camera_link"));
        cloud.set(120, 90, *point);
        outcomes.push(tracker.process(&image, &cloud.build()));
    }

    assert!(matches!(outcomes[0], FrameOutcome::Pending(_)));
    assert_eq!(outcomes[1], FrameOutcome::NoDetection);
    assert_eq!(outcomes[2], FrameOutcome::NoDetection);
    // Sample 1 at t=1 pairs with sample 4 at t=4: 5 m / 4 s.
    assert!(matches!(outcomes[3], FrameOutcome::Published { velocity, .. } if velocity == 1.25));
    // Sample 4 pairs with sample 5 at t=5: 12 m / 5 s.
    assert!(matches!(outcomes[4], FrameOutcome::Published { velocity, .. } if velocity == 2.4));
    assert_eq!(memory.messages_on("human/position").len(), 2);
    Ok(())
}
