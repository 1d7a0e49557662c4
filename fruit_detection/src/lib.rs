mod decoder;
mod detection;
mod error;
mod inference_service;
mod labels;
mod model_service;
mod normalizer;
mod ort_service;
mod routes;
mod server;
mod state;
mod telemetry;

pub mod config;

pub use decoder::decode_image;
pub use detection::RawDetection;
pub use error::{DetectionError, StartupError};
pub use inference_service::InferenceService;
pub use model_service::ModelService;
pub use ort_service::{CONFIDENCE_THRESHOLD, INPUT_SIZE, IOU_THRESHOLD};
pub use routes::{DETECT_ROUTE, DETECT_URL_ROUTE};
pub use server::{build_router, start_server, SharedState};
pub use state::{Phase, ServiceLifecycle};
pub use telemetry::Metrics;
