//! Best-frame selection over a drained burst.

use super::FrameSample;

/// The sample chosen from a burst.
#[derive(Debug)]
pub struct BestFrame {
    /// Winning sample.
    pub sample: FrameSample,
    /// Position of the winner within the burst.
    pub index: usize,
    /// Number of samples the burst held.
    pub burst_len: usize,
}

/// Picks the sample with the largest metric.
///
/// A single left-to-right scan where only a strictly greater metric
/// replaces the current best, so the first occurrence of the maximum
/// wins. NaN metrics never replace a best; a NaN in first position is
/// replaced by the first comparable value. Non-winning samples are
/// dropped. Returns `None` for an empty burst.
pub fn select_best(samples: Vec<FrameSample>) -> Option<BestFrame> {
    let burst_len = samples.len();
    let mut best: Option<(usize, FrameSample)> = None;

    for (index, sample) in samples.into_iter().enumerate() {
        let replace = match &best {
            None => true,
            Some((_, current)) => {
                sample.metric > current.metric || (current.metric.is_nan() && !sample.metric.is_nan())
            }
        };
        tracing::trace!(index, metric = sample.metric, replace, "Burst sample scanned");
        if replace {
            best = Some((index, sample));
        }
    }

    best.map(|(index, sample)| BestFrame {
        sample,
        index,
        burst_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use proptest::prelude::*;

    fn samples(metrics: &[f64]) -> Vec<FrameSample> {
        metrics
            .iter()
            .enumerate()
            .map(|(i, &metric)| FrameSample::new(metric, RgbImage::new(1, 1), i as u64))
            .collect()
    }

    #[test]
    fn test_first_maximum_wins() {
        let mut metrics = vec![3.0, 5.0, 5.0, 2.0];
        metrics.resize(15, 1.0);

        let best = select_best(samples(&metrics)).unwrap();
        assert_eq!(best.index, 1);
        assert_eq!(best.sample.sequence, 1);
        assert_eq!(best.burst_len, 15);
    }

    #[test]
    fn test_empty_burst() {
        assert!(select_best(Vec::new()).is_none());
    }

    #[test]
    fn test_nan_never_wins_over_number() {
        let best = select_best(samples(&[f64::NAN, 1.0, f64::NAN, 0.5])).unwrap();
        assert_eq!(best.index, 1);
    }

    #[test]
    fn test_all_equal_picks_first() {
        let best = select_best(samples(&[0.0; 15])).unwrap();
        assert_eq!(best.index, 0);
    }

    proptest! {
        #[test]
        fn prop_selects_first_maximum(metrics in prop::collection::vec(-1000i32..1000, 1..40)) {
            let as_f64: Vec<f64> = metrics.iter().map(|&m| m as f64).collect();
            let max = as_f64.iter().cloned().fold(f64::MIN, f64::max);
            let expected = as_f64.iter().position(|&m| m == max).unwrap();

            let best = select_best(samples(&as_f64)).unwrap();
            prop_assert_eq!(best.index, expected);
            prop_assert_eq!(best.sample.metric, max);
        }
    }
}
