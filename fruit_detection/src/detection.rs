/// One detected object, in absolute pixel coordinates of the source image.
///
/// Corners are always ordered (`x1 <= x2`, `y1 <= y2`) and `confidence`
/// is already rounded to four decimals.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub class_id: usize,
    pub class_label: String,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// Box proposed by the detector before suppression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub class_id: usize,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Candidate {
    /// Builds a candidate from a centre-format box, reordering corners if
    /// the width or height came out negative.
    pub fn from_center(
        class_id: usize,
        confidence: f32,
        xc: f32,
        yc: f32,
        w: f32,
        h: f32,
    ) -> Self {
        let (ax, bx) = (xc - w / 2., xc + w / 2.);
        let (ay, by) = (yc - h / 2., yc + h / 2.);
        Self {
            class_id,
            confidence,
            x1: ax.min(bx),
            y1: ay.min(by),
            x2: ax.max(bx),
            y2: ay.max(by),
        }
    }

    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.) * (self.y2 - self.y1).max(0.)
    }
}

fn intersection(box1: &Candidate, box2: &Candidate) -> f32 {
    let w = box1.x2.min(box2.x2) - box1.x1.max(box2.x1);
    let h = box1.y2.min(box2.y2) - box1.y1.max(box2.y1);
    w.max(0.) * h.max(0.)
}

pub fn iou(box1: &Candidate, box2: &Candidate) -> f32 {
    let inter = intersection(box1, box2);
    let union = box1.area() + box2.area() - inter;
    if union <= 0. {
        0.
    } else {
        inter / union
    }
}

/// Greedy per-class non-max suppression.
///
/// Candidates are visited by descending confidence (ties keep input order);
/// a candidate is dropped when it overlaps an already kept box of the same
/// class with IoU at or above `iou_threshold`. At most `max_detections`
/// boxes are returned, in visiting order.
pub fn non_max_suppression(
    mut candidates: Vec<Candidate>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Candidate> {
    candidates.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept.iter().any(|winner| {
            winner.class_id == candidate.class_id && iou(winner, &candidate) >= iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }

    kept
}

pub fn round_confidence(confidence: f32) -> f32 {
    ((confidence.clamp(0., 1.) as f64 * 10_000.).round() / 10_000.) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(
        class_id: usize,
        confidence: f32,
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
    ) -> Candidate {
        Candidate {
            class_id,
            confidence,
            x1,
            y1,
            x2,
            y2,
        }
    }

    #[test]
    fn test_iou() {
        let a = candidate(0, 0.9, 0., 0., 10., 10.);
        let b = candidate(0, 0.8, 5., 0., 15., 10.);
        let c = candidate(0, 0.7, 20., 20., 30., 30.);

        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert!((iou(&a, &b) - 50. / 150.).abs() < 1e-6);
        assert_eq!(iou(&a, &c), 0.);
    }

    #[test]
    fn test_iou_degenerate_boxes() {
        let point = candidate(0, 0.9, 5., 5., 5., 5.);
        assert_eq!(iou(&point, &point), 0.);
    }

    #[test]
    fn test_from_center_orders_corners() {
        let c = Candidate::from_center(1, 0.5, 50., 40., -20., 10.);
        assert_eq!((c.x1, c.y1, c.x2, c.y2), (40., 35., 60., 45.));
    }

    #[test]
    fn test_nms_suppresses_same_class_overlap() {
        let boxes = vec![
            candidate(0, 0.6, 1., 1., 11., 11.),
            candidate(0, 0.9, 0., 0., 10., 10.),
            candidate(0, 0.5, 50., 50., 60., 60.),
        ];

        let kept = non_max_suppression(boxes, 0.3, 300);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.5);
    }

    #[test]
    fn test_nms_keeps_other_classes() {
        let boxes = vec![
            candidate(0, 0.9, 0., 0., 10., 10.),
            candidate(1, 0.8, 0., 0., 10., 10.),
        ];

        let kept = non_max_suppression(boxes, 0.3, 300);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].class_id, 1);
    }

    #[test]
    fn test_nms_threshold_is_inclusive() {
        // IoU of exactly 1/3 against a threshold of 1/3.
        let boxes = vec![
            candidate(0, 0.9, 0., 0., 10., 10.),
            candidate(0, 0.8, 5., 0., 15., 10.),
        ];
        let kept = non_max_suppression(boxes.clone(), iou(&boxes[0], &boxes[1]), 300);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_nms_is_deterministic_on_ties() {
        let boxes = vec![
            candidate(0, 0.7, 0., 0., 10., 10.),
            candidate(1, 0.7, 100., 100., 110., 110.),
            candidate(2, 0.7, 200., 200., 210., 210.),
        ];

        let first = non_max_suppression(boxes.clone(), 0.3, 300);
        let second = non_max_suppression(boxes, 0.3, 300);
        assert_eq!(first, second);
        let classes: Vec<usize> = first.iter().map(|c| c.class_id).collect();
        assert_eq!(classes, vec![0, 1, 2]);
    }

    #[test]
    fn test_nms_caps_detections() {
        let boxes = (0..10)
            .map(|i| {
                let offset = i as f32 * 100.;
                candidate(0, 0.5, offset, 0., offset + 10., 10.)
            })
            .collect();
        assert_eq!(non_max_suppression(boxes, 0.3, 4).len(), 4);
    }

    #[test]
    fn test_round_confidence() {
        assert_eq!(round_confidence(0.87321), 0.8732);
        assert_eq!(round_confidence(0.87326), 0.8733);
        assert_eq!(round_confidence(1.2), 1.0);
        assert_eq!(round_confidence(-0.1), 0.0);
    }
}
