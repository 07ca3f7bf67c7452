//! Burst accumulation while the capture flag is held.

use super::selector::{select_best, BestFrame};
use image::RgbImage;
use std::sync::{Mutex, MutexGuard};

/// Number of samples that completes a burst.
pub const BURST_SIZE: usize = 15;

/// One captured frame and its burst metric.
///
/// `image` is an owned snapshot; it stays valid after the camera
/// reuses the buffer the frame was captured into.
#[derive(Debug, Clone)]
pub struct FrameSample {
    /// Score compared across the burst; larger is better.
    pub metric: f64,
    /// Frozen copy of the full camera frame.
    pub image: RgbImage,
    /// Sequence number of the source frame.
    pub sequence: u64,
}

impl FrameSample {
    /// Sample owning `image`, scored by `metric`.
    pub fn new(metric: f64, image: RgbImage, sequence: u64) -> Self {
        Self {
            metric,
            image,
            sequence,
        }
    }
}

/// Ordered buffer of [`FrameSample`]s guarded by a single lock.
///
/// Appends, clears, the drain and the best-frame scan all happen
/// under the same lock. Exporting the winner happens after the lock
/// is released.
pub struct BurstBuffer {
    samples: Mutex<Vec<FrameSample>>,
    threshold: usize,
}

impl BurstBuffer {
    /// Creates a buffer that drains once it holds `threshold` samples.
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            samples: Mutex::new(Vec::with_capacity(threshold + 1)),
            threshold,
        }
    }

    /// Offers one processed frame.
    ///
    /// Without `capture_requested` the buffer is cleared and the sample
    /// discarded. Otherwise the sample is appended, and if the buffer
    /// has reached the threshold its whole contents are taken, the best
    /// sample is selected and returned, and the buffer is left empty.
    pub fn offer(&self, sample: FrameSample, capture_requested: bool) -> Option<BestFrame> {
        let mut samples = self.lock();

        if !capture_requested {
            if !samples.is_empty() {
                tracing::debug!(discarded = samples.len(), "Capture released, burst discarded");
            }
            samples.clear();
            return None;
        }

        samples.push(sample);
        tracing::trace!(buffered = samples.len(), "Sample buffered");

        if samples.len() < self.threshold {
            return None;
        }

        let burst = std::mem::replace(&mut *samples, Vec::with_capacity(self.threshold + 1));
        let best = select_best(burst);

        if let Some(ref best) = best {
            tracing::debug!(
                burst_len = best.burst_len,
                winner = best.index,
                metric = best.sample.metric,
                "Burst drained"
            );
        }
        best
    }

    /// Number of buffered samples.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if no samples are held.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drain threshold.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Discards any partial burst.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<FrameSample>> {
        // A panic while holding the lock cannot leave the Vec half-updated
        self.samples.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for BurstBuffer {
    fn default() -> Self {
        Self::new(BURST_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sample(metric: f64, sequence: u64) -> FrameSample {
        FrameSample::new(metric, RgbImage::new(2, 2), sequence)
    }

    #[test]
    fn test_release_clears_buffer() {
        let buffer = BurstBuffer::default();
        for i in 0..5 {
            assert!(buffer.offer(sample(i as f64, i), true).is_none());
        }
        assert_eq!(buffer.len(), 5);

        assert!(buffer.offer(sample(99.0, 5), false).is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_release_on_empty_buffer() {
        let buffer = BurstBuffer::default();
        assert!(buffer.offer(sample(1.0, 0), false).is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_accumulates_below_threshold() {
        let buffer = BurstBuffer::default();
        for i in 0..(BURST_SIZE - 1) {
            assert!(buffer.offer(sample(i as f64, i as u64), true).is_none());
        }
        assert_eq!(buffer.len(), BURST_SIZE - 1);
    }

    #[test]
    fn test_drain_at_threshold() {
        let buffer = BurstBuffer::default();
        let metrics = [3.0, 5.0, 5.0, 2.0];
        let mut drained = None;
        for i in 0..BURST_SIZE {
            let metric = metrics.get(i).copied().unwrap_or(1.0);
            drained = buffer.offer(sample(metric, i as u64), true);
            if i + 1 < BURST_SIZE {
                assert!(drained.is_none());
            }
        }

        let best = drained.expect("burst should drain at threshold");
        assert_eq!(best.sample.sequence, 1);
        assert_eq!(best.burst_len, BURST_SIZE);
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn test_concurrent_offers_never_lose_alignment() {
        let buffer = Arc::new(BurstBuffer::new(4));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    let mut drained = 0;
                    for i in 0..100u64 {
                        if let Some(best) = buffer.offer(sample(i as f64, t * 1000 + i), true) {
                            assert_eq!(best.burst_len, 4);
                            drained += 1;
                        }
                    }
                    drained
                })
            })
            .collect();

        let drained: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(drained, 100);
        assert!(buffer.is_empty());
    }
}
