use crate::{model_service::ModelService, server::SharedState};
use axum::{extract::State, response::Json};
use fruit_schema::HealthStatus;
use serde::Serialize;

#[derive(Serialize)]
pub struct Message {
    message: String,
}

pub async fn root() -> Json<Message> {
    Json(Message {
        message: "Fruit Recognition Service API".into(),
    })
}

pub async fn healthcheck<M: ModelService>(
    State(state): State<SharedState<M>>,
) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy".into(),
        model_loaded: state.inference.lifecycle().is_ready(),
    })
}
