//! Per-frame result filtering and the burst metric.

use super::Detection;

/// Detections below this confidence are discarded.
pub const MIN_CONFIDENCE: f32 = 0.5;

/// The only class the pipeline forwards.
pub const TARGET_CLASS: u32 = 0;

/// Keeps detections of one class at or above a confidence floor.
#[derive(Debug, Clone, Copy)]
pub struct DetectionFilter {
    target_class: u32,
    min_confidence: f32,
}

impl Default for DetectionFilter {
    fn default() -> Self {
        Self {
            target_class: TARGET_CLASS,
            min_confidence: MIN_CONFIDENCE,
        }
    }
}

impl DetectionFilter {
    /// Returns true if the detection survives filtering.
    ///
    /// NaN confidences and non-finite boxes never pass.
    pub fn accepts(&self, detection: &Detection) -> bool {
        detection.class_id == self.target_class
            && detection.confidence >= self.min_confidence
            && detection.bbox.is_finite()
    }

    /// Drops every detection that does not pass, preserving order.
    pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections.into_iter().filter(|d| self.accepts(d)).collect()
    }
}

/// Computes the burst metric for one frame's surviving detections.
///
/// The metric is the vertical center of the highest-confidence
/// detection; on equal confidence the earliest detection wins. A frame
/// with no survivors scores `0.0`.
pub fn burst_metric(detections: &[Detection]) -> f64 {
    let mut best: Option<&Detection> = None;
    for detection in detections {
        let replace = match best {
            None => true,
            Some(current) => detection.confidence > current.confidence,
        };
        if replace {
            best = Some(detection);
        }
    }
    best.map(|d| d.bbox.center_y() as f64).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoundingBox;

    fn det(class_id: u32, confidence: f32, top: f32) -> Detection {
        Detection::new(
            class_id,
            confidence,
            BoundingBox::new(0.0, top, 10.0, top + 10.0),
        )
    }

    #[test]
    fn test_filter_drops_low_confidence_and_other_classes() {
        let filter = DetectionFilter::default();
        let kept = filter.apply(vec![
            det(0, 0.9, 0.0),
            det(0, 0.49, 10.0),
            det(2, 0.99, 20.0),
            det(0, 0.5, 30.0),
            det(0, f32::NAN, 40.0),
        ]);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].bbox.top, 0.0);
        assert_eq!(kept[1].bbox.top, 30.0);
    }

    #[test]
    fn test_metric_uses_highest_confidence() {
        let metric = burst_metric(&[det(0, 0.6, 0.0), det(0, 0.9, 100.0), det(0, 0.7, 50.0)]);
        assert_eq!(metric, 105.0);
    }

    #[test]
    fn test_metric_tie_keeps_first() {
        let metric = burst_metric(&[det(0, 0.8, 20.0), det(0, 0.8, 200.0)]);
        assert_eq!(metric, 25.0);
    }

    #[test]
    fn test_metric_empty_is_zero() {
        assert_eq!(burst_metric(&[]), 0.0);
    }
}
