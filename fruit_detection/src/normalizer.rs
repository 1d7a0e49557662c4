use crate::detection::RawDetection;
use chrono::{DateTime, SecondsFormat, Utc};
use fruit_schema::{BoundingBox, DetectionResponse, FruitInfo};
use std::sync::atomic::{AtomicI64, Ordering};

/// Maps detections onto the public response, stamping each response with a
/// wall-clock time that never goes backwards within the process.
#[derive(Debug, Default)]
pub struct Normalizer {
    last_timestamp_micros: AtomicI64,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn normalize(&self, detections: Vec<RawDetection>) -> DetectionResponse {
        let fruits: Vec<FruitInfo> = detections.into_iter().map(to_fruit_info).collect();

        DetectionResponse {
            total_fruits: fruits.len(),
            fruits,
            timestamp: self.timestamp(Utc::now()),
        }
    }

    fn timestamp(&self, now: DateTime<Utc>) -> String {
        let now_micros = now.timestamp_micros();
        let previous = self
            .last_timestamp_micros
            .fetch_max(now_micros, Ordering::SeqCst);
        let micros = previous.max(now_micros);

        DateTime::<Utc>::from_timestamp_micros(micros)
            .unwrap_or(now)
            .to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

fn to_fruit_info(detection: RawDetection) -> FruitInfo {
    FruitInfo {
        fruit_type: detection.class_label,
        bounding_box: BoundingBox {
            xmin: detection.x1,
            ymin: detection.y1,
            xmax: detection.x2,
            ymax: detection.y2,
        },
        confidence: detection.confidence,
    }
}
