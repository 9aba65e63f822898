use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use human_tracker::config::TrackerConfig;
use human_tracker::VelocityMode;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "TRACKER_CONFIG",
        "TRACKER_SOURCE_URL",
        "TRACKER_DETECTOR",
        "TRACKER_MQTT_BROKER",
        "TRACKER_VELOCITY_MODE",
        "TRACKER_PUBLISH_VELOCITY",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": { "url": "file:///data/walk.jsonl", "target_fps": 15 },
        "sync": { "queue_size": 12, "max_interval_ms": 20 },
        "detector": { "backend": "Stub", "threshold": 240, "min_area": 100 },
        "frames": { "fixed_frame": "base_link", "human_frame": "person" },
        "topics": { "marker": "viz/person", "pose": "person/pose" },
        "mqtt": { "broker_addr": "broker.local:1883", "client_id": "tracker-2" },
        "publish": { "poll_initial_ms": 250, "poll_max_ms": 2000 },
        "velocity": { "mode": "elapsed" },
        "skip_non_finite": false
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("TRACKER_CONFIG", file.path());
    std::env::set_var("TRACKER_MQTT_BROKER", "10.0.0.5:1883");
    std::env::set_var("TRACKER_PUBLISH_VELOCITY", "true");

    let cfg = TrackerConfig::load().expect("load config");

    assert_eq!(cfg.source.url, "file:///data/walk.jsonl");
    assert_eq!(cfg.source.target_fps, 15);
    assert_eq!(cfg.sync.queue_size, 12);
    assert_eq!(cfg.sync.max_interval, Duration::from_millis(20));
    assert_eq!(cfg.detector.backend, "stub");
    assert_eq!(cfg.detector.threshold, 240);
    assert_eq!(cfg.detector.min_area, 100);
    assert_eq!(cfg.frames.fixed_frame, "base_link");
    assert_eq!(cfg.frames.human_frame, "person");
    assert_eq!(cfg.topics.marker, "viz/person");
    assert_eq!(cfg.topics.pose, "person/pose");
    assert_eq!(cfg.topics.transform, "tf/human_detected");
    assert_eq!(cfg.mqtt.broker_addr, "10.0.0.5:1883");
    assert_eq!(cfg.mqtt.client_id, "tracker-2");
    assert_eq!(cfg.publish.poll_initial, Duration::from_millis(250));
    assert_eq!(cfg.publish.poll_max, Duration::from_secs(2));
    assert!(cfg.publish.publish_velocity);
    assert_eq!(cfg.velocity_mode, VelocityMode::Elapsed);
    assert!(!cfg.skip_non_finite);

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
skip_non_finite = true

[source]
url = "stub://hallway"

[velocity]
mode = "capture_time"

[topics]
velocity = "person/speed"
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    std::env::set_var("TRACKER_DETECTOR", "stub");
    let cfg = TrackerConfig::load_from(Some(file.path())).expect("load toml");

    assert_eq!(cfg.source.url, "stub://hallway");
    assert_eq!(cfg.source.target_fps, 10);
    assert_eq!(cfg.detector.backend, "stub");
    assert_eq!(cfg.topics.velocity, "person/speed");
    assert_eq!(cfg.velocity_mode, VelocityMode::CaptureTime);

    clear_env();
}

#[test]
fn invalid_env_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("TRACKER_VELOCITY_MODE", "instant");
    assert!(TrackerConfig::load().is_err());
    clear_env();

    std::env::set_var("TRACKER_PUBLISH_VELOCITY", "sometimes");
    assert!(TrackerConfig::load().is_err());
    clear_env();
}

#[test]
fn malformed_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "sync": { "queue_size": "thirty" } }"#)
        .expect("write config");
    let err = TrackerConfig::load_from(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("invalid config file"), "{}", err);

    clear_env();
}
