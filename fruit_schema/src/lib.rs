//! JSON contract of the fruit detection endpoint, shared by the service and
//! its command-line client.

use serde::{Deserialize, Serialize};

/// Axis-aligned box in absolute pixel coordinates of the submitted image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FruitInfo {
    pub fruit_type: String,
    pub bounding_box: BoundingBox,
    pub confidence: f32,
}

/// Successful body of `POST /api/v1/fruit/detect`.
///
/// `timestamp` is an RFC 3339 UTC string taken when the response was built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResponse {
    pub fruits: Vec<FruitInfo>,
    pub total_fruits: usize,
    pub timestamp: String,
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub model_loaded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectUrlRequest {
    pub url: String,
}
