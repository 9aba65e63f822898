//! Position samples, the two-slot rolling history, and speed estimation.

use serde::{Deserialize, Serialize};

/// One 3D position with the capture time it was observed at.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Seconds.
    pub timestamp: f64,
}

impl PositionSample {
    pub fn new(x: f32, y: f32, z: f32, timestamp: f64) -> Self {
        Self { x, y, z, timestamp }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Euclidean distance to another sample, in the cloud's units.
    pub fn distance_to(&self, other: &PositionSample) -> f64 {
        let dx = f64::from(other.x) - f64::from(self.x);
        let dy = f64::from(other.y) - f64::from(self.y);
        let dz = f64::from(other.z) - f64::from(self.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Which time value divides the displacement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VelocityMode {
    /// Divide by the newer sample's own capture timestamp.
    #[default]
    CaptureTime,
    /// Divide by the time elapsed between the two samples.
    Elapsed,
}

impl std::str::FromStr for VelocityMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "capture_time" | "capture-time" => Ok(Self::CaptureTime),
            "elapsed" => Ok(Self::Elapsed),
            other => Err(anyhow::anyhow!(
                "unknown velocity mode '{}' (expected capture_time or elapsed)",
                other
            )),
        }
    }
}

/// Speed in m/s between two samples.
///
/// `CaptureTime` reproduces `|p2 - p1| / t2`. `Elapsed` computes
/// `|p2 - p1| / (t2 - t1)` and returns 0.0 when no time has passed.
pub fn estimate_velocity(
    previous: &PositionSample,
    current: &PositionSample,
    mode: VelocityMode,
) -> f64 {
    let displacement = previous.distance_to(current);
    match mode {
        VelocityMode::CaptureTime => displacement / current.timestamp,
        VelocityMode::Elapsed => {
            let dt = current.timestamp - previous.timestamp;
            if dt > 0.0 {
                displacement / dt
            } else {
                0.0
            }
        }
    }
}

/// The two samples a velocity is computed from, oldest first.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplePair {
    pub previous: PositionSample,
    pub current: PositionSample,
}

impl SamplePair {
    pub fn velocity(&self, mode: VelocityMode) -> f64 {
        estimate_velocity(&self.previous, &self.current, mode)
    }
}

/// Rolling history of at most two samples.
///
/// Pushing into an empty history stores the sample. Pushing into a history
/// that already holds one yields the (previous, current) pair and evicts the
/// previous sample, so the history always settles back to one entry.
#[derive(Clone, Debug, Default)]
pub struct PositionHistory {
    previous: Option<PositionSample>,
    current: Option<PositionSample>,
}

impl PositionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        usize::from(self.previous.is_some()) + usize::from(self.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Latest retained sample.
    pub fn latest(&self) -> Option<&PositionSample> {
        self.current.as_ref()
    }

    /// Push a sample; returns the pair to compute a velocity from once two
    /// samples are available.
    pub fn push(&mut self, sample: PositionSample) -> Option<SamplePair> {
        self.previous = self.current.replace(sample);
        // Both slots full: hand the pair out and evict the older sample.
        self.previous.take().map(|previous| SamplePair {
            previous,
            current: sample,
        })
    }

    pub fn clear(&mut self) {
        self.previous = None;
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_formula_divides_by_newer_timestamp() {
        let a = PositionSample::new(0.0, 0.0, 0.0, 1.0);
        let b = PositionSample::new(3.0, 4.0, 0.0, 2.0);
        assert_eq!(estimate_velocity(&a, &b, VelocityMode::CaptureTime), 2.5);
    }

    #[test]
    fn elapsed_formula_divides_by_delta() {
        let a = PositionSample::new(0.0, 0.0, 0.0, 1.0);
        let b = PositionSample::new(3.0, 4.0, 0.0, 2.0);
        assert_eq!(estimate_velocity(&a, &b, VelocityMode::Elapsed), 5.0);

        let same_time = PositionSample::new(3.0, 4.0, 0.0, 1.0);
        assert_eq!(estimate_velocity(&a, &same_time, VelocityMode::Elapsed), 0.0);
    }

    #[test]
    fn history_triggers_once_per_new_sample_after_first() {
        let mut history = PositionHistory::new();
        assert!(history.is_empty());

        let s1 = PositionSample::new(0.0, 0.0, 0.0, 1.0);
        let s2 = PositionSample::new(1.0, 0.0, 0.0, 2.0);
        let s3 = PositionSample::new(3.0, 2.0, 1.0, 4.0);

        assert_eq!(history.push(s1), None);
        assert_eq!(history.len(), 1);

        let pair = history.push(s2).expect("second sample triggers");
        assert_eq!(pair.previous, s1);
        assert_eq!(pair.current, s2);
        assert_eq!(history.len(), 1);
        assert_eq!(history.latest(), Some(&s2));

        let pair = history.push(s3).expect("third sample triggers");
        assert_eq!(pair.previous, s2);
        assert_eq!(pair.current, s3);
        assert_eq!(pair.velocity(VelocityMode::CaptureTime), 3.0 / 4.0);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn clear_empties_both_slots() {
        let mut history = PositionHistory::new();
        history.push(PositionSample::new(1.0, 1.0, 1.0, 1.0));
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.latest(), None);
        assert_eq!(history.push(PositionSample::new(2.0, 2.0, 2.0, 2.0)), None);
    }

    #[test]
    fn velocity_mode_parses_config_values() {
        assert_eq!(
            "capture_time".parse::<VelocityMode>().unwrap(),
            VelocityMode::CaptureTime
        );
        assert_eq!(" Elapsed ".parse::<VelocityMode>().unwrap(), VelocityMode::Elapsed);
        assert!("delta".parse::<VelocityMode>().is_err());
    }
}
