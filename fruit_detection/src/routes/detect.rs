use crate::{
    error::{body_rejection, DetectionError},
    model_service::ModelService,
    server::SharedState,
};
use axum::{
    extract::{multipart::MultipartRejection, rejection::JsonRejection, Multipart, State},
    response::Json,
};
use bytes::Bytes;
use fruit_schema::{DetectUrlRequest, DetectionResponse};
use std::time::Instant;
use tracing::instrument;

pub const DETECT_ROUTE: &str = "/api/v1/fruit/detect";
pub const DETECT_URL_ROUTE: &str = "/api/v1/fruit/detect-url";

const FILE_FIELD: &str = "file";

/// Takes the first multipart field named `file`, with its declared media type.
async fn read_file_field(
    multipart: &mut Multipart,
) -> Result<(Option<String>, Bytes), DetectionError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| body_rejection(e.status(), e.body_text()))?
    {
        if field.name() == Some(FILE_FIELD) {
            let content_type = field.content_type().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| body_rejection(e.status(), e.body_text()))?;
            return Ok((content_type, data));
        }
    }

    Err(DetectionError::MissingFile(format!(
        "multipart field `{}` is required",
        FILE_FIELD
    )))
}

#[instrument(skip(state, multipart))]
pub async fn detect_fruits<M: ModelService>(
    State(state): State<SharedState<M>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DetectionResponse>, DetectionError> {
    let started = Instant::now();
    let result: Result<DetectionResponse, DetectionError> = async {
        let mut multipart = multipart.map_err(|e| body_rejection(e.status(), e.body_text()))?;
        let (content_type, image_data) = read_file_field(&mut multipart).await?;
        tracing::debug!(
            content_type = content_type.as_deref().unwrap_or("none"),
            size = image_data.len(),
            "Received upload"
        );
        state
            .inference
            .detect_upload(content_type.as_deref(), image_data)
            .await
    }
    .await;

    state.record(DETECT_ROUTE, started, &result);
    result.map(Json)
}

#[instrument(skip(state, payload))]
pub async fn detect_fruits_from_url<M: ModelService>(
    State(state): State<SharedState<M>>,
    payload: Result<Json<DetectUrlRequest>, JsonRejection>,
) -> Result<Json<DetectionResponse>, DetectionError> {
    let started = Instant::now();
    let result: Result<DetectionResponse, DetectionError> = async {
        let Json(request) = payload.map_err(|e| body_rejection(e.status(), e.body_text()))?;
        tracing::debug!(url = %request.url, "Fetching image");
        state.inference.detect_url(&request.url).await
    }
    .await;

    state.record(DETECT_URL_ROUTE, started, &result);
    result.map(Json)
}
