//! Approximate-time pairing of image and point-cloud streams.
//!
//! Images drive the matching: the oldest pending image is paired with the
//! cloud whose stamp is closest, provided the gap is within `max_interval`.
//! Every message is used at most once and pairs come out in stamp order.

use std::collections::VecDeque;
use std::time::Duration;

use crate::cloud::PointCloudFrame;
use crate::frame::ImageFrame;

/// Queue depth used by the camera node this pipeline was built around.
pub const DEFAULT_QUEUE_SIZE: usize = 30;

/// One synchronized (image, cloud) pair.
#[derive(Clone, Debug)]
pub struct FramePair {
    pub image: ImageFrame,
    pub cloud: PointCloudFrame,
}

impl FramePair {
    /// Absolute stamp difference between the two halves, in seconds.
    pub fn skew(&self) -> f64 {
        (self.image.header.stamp - self.cloud.header.stamp).abs()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub pairs: u64,
    pub dropped_images: u64,
    pub dropped_clouds: u64,
}

pub struct ApproximateTimeSync {
    queue_size: usize,
    max_interval: f64,
    images: VecDeque<ImageFrame>,
    clouds: VecDeque<PointCloudFrame>,
    stats: SyncStats,
}

impl ApproximateTimeSync {
    pub fn new(queue_size: usize, max_interval: Duration) -> Self {
        let queue_size = queue_size.max(1);
        Self {
            queue_size,
            max_interval: max_interval.as_secs_f64(),
            images: VecDeque::with_capacity(queue_size),
            clouds: VecDeque::with_capacity(queue_size),
            stats: SyncStats::default(),
        }
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn pending(&self) -> (usize, usize) {
        (self.images.len(), self.clouds.len())
    }

    pub fn push_image(&mut self, image: ImageFrame) -> Vec<FramePair> {
        let stamp = image.header.stamp;
        if self.images.back().is_some_and(|last| stamp < last.header.stamp) {
            log::debug!("sync: dropping out-of-order image stamp={:.3}", stamp);
            self.stats.dropped_images += 1;
            return Vec::new();
        }
        if self.images.len() >= self.queue_size {
            self.images.pop_front();
            self.stats.dropped_images += 1;
        }
        self.images.push_back(image);
        self.drain_matches()
    }

    pub fn push_cloud(&mut self, cloud: PointCloudFrame) -> Vec<FramePair> {
        let stamp = cloud.header.stamp;
        if self.clouds.back().is_some_and(|last| stamp < last.header.stamp) {
            log::debug!("sync: dropping out-of-order cloud stamp={:.3}", stamp);
            self.stats.dropped_clouds += 1;
            return Vec::new();
        }
        if self.clouds.len() >= self.queue_size {
            self.clouds.pop_front();
            self.stats.dropped_clouds += 1;
        }
        self.clouds.push_back(cloud);
        self.drain_matches()
    }

    fn drain_matches(&mut self) -> Vec<FramePair> {
        let mut pairs = Vec::new();

        loop {
            let Some(image_stamp) = self.images.front().map(|image| image.header.stamp) else {
                break;
            };

            // Clouds too old for this image are too old for every later image.
            while self
                .clouds
                .front()
                .is_some_and(|cloud| cloud.header.stamp < image_stamp - self.max_interval)
            {
                self.clouds.pop_front();
                self.stats.dropped_clouds += 1;
            }

            let Some((best, gap)) = self.closest_cloud(image_stamp) else {
                break;
            };

            if gap > self.max_interval {
                // Every remaining cloud is newer than this image can accept.
                self.images.pop_front();
                self.stats.dropped_images += 1;
                continue;
            }

            let cloud_stamp = self.clouds[best].header.stamp;
            if cloud_stamp < image_stamp && best + 1 == self.clouds.len() {
                // A later cloud may still land closer to this image.
                break;
            }

            if self
                .images
                .get(1)
                .is_some_and(|next| (next.header.stamp - cloud_stamp).abs() < gap)
            {
                // The next image is a better partner for this cloud.
                self.images.pop_front();
                self.stats.dropped_images += 1;
                continue;
            }

            let Some(image) = self.images.pop_front() else {
                break;
            };
            self.stats.dropped_clouds += best as u64;
            let Some(cloud) = self.clouds.drain(..=best).last() else {
                break;
            };

            self.stats.pairs += 1;
            pairs.push(FramePair { image, cloud });
        }

        pairs
    }

    fn closest_cloud(&self, stamp: f64) -> Option<(usize, f64)> {
        self.clouds
            .iter()
            .enumerate()
            .map(|(index, cloud)| (index, (cloud.header.stamp - stamp).abs()))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::PointCloudBuilder;
    use crate::frame::Encoding;
    use crate::wire::Header;

    fn image(stamp: f64) -> ImageFrame {
        ImageFrame::packed(Header::new(stamp, "rgb"), 1, 1, Encoding::Mono8, vec![0])
    }

    fn cloud(stamp: f64) -> PointCloudFrame {
        PointCloudBuilder::new(1, 1)
            .header(Header::new(stamp, "depth"))
            .build()
    }

    fn sync() -> ApproximateTimeSync {
        ApproximateTimeSync::new(DEFAULT_QUEUE_SIZE, Duration::from_millis(50))
    }

    #[test]
    fn pairs_identical_stamps_immediately() {
        let mut sync = sync();
        assert!(sync.push_image(image(1.0)).is_empty());
        let pairs = sync.push_cloud(cloud(1.0));
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].skew(), 0.0);
        assert_eq!(sync.pending(), (0, 0));
    }

    #[test]
    fn waits_for_a_possibly_closer_cloud() {
        let mut sync = sync();
        sync.push_cloud(cloud(0.96875));
        assert!(sync.push_image(image(1.0)).is_empty());
        // The next cloud is further away, so the earlier one wins.
        let pairs = sync.push_cloud(cloud(1.125));
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].cloud.header.stamp, 0.96875);
        assert_eq!(sync.pending(), (0, 1));
    }

    #[test]
    fn drops_images_without_partner_in_window() {
        let mut sync = sync();
        sync.push_image(image(1.0));
        sync.push_image(image(2.0));
        let pairs = sync.push_cloud(cloud(2.0));
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].image.header.stamp, 2.0);
        assert_eq!(sync.stats().dropped_images, 1);
        assert_eq!(sync.stats().pairs, 1);
    }

    #[test]
    fn each_cloud_is_used_once() {
        let mut sync = sync();
        sync.push_cloud(cloud(1.0));
        let first = sync.push_image(image(1.0));
        assert_eq!(first.len(), 1);
        assert!(sync.push_image(image(1.015625)).is_empty());
        assert_eq!(sync.pending(), (1, 0));
    }

    #[test]
    fn queue_is_bounded() {
        let mut sync = ApproximateTimeSync::new(3, Duration::from_millis(50));
        for i in 0..5 {
            sync.push_image(image(i as f64));
        }
        assert_eq!(sync.pending(), (3, 0));
        assert_eq!(sync.stats().dropped_images, 2);
        assert!(sync.push_image(image(0.5)).is_empty());
    }
}
