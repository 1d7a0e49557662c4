mod detect;
mod health;
mod metrics;

use crate::{model_service::ModelService, server::SharedState};
use axum::{
    routing::{get, post},
    Router,
};

pub use detect::{DETECT_ROUTE, DETECT_URL_ROUTE};

pub fn api_routes<M: ModelService>() -> Router<SharedState<M>> {
    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::healthcheck::<M>))
        .route("/metrics", get(metrics::metrics_handler::<M>))
        .route(DETECT_ROUTE, post(detect::detect_fruits::<M>))
        .route(DETECT_URL_ROUTE, post(detect::detect_fruits_from_url::<M>))
}
