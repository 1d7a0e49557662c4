use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fruit_schema::ErrorBody;
use thiserror::Error;

/// Per-request failures. Status codes are only chosen in [`DetectionError::status_code`].
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Please upload an image file (got content type `{0}`)")]
    UnsupportedMediaType(String),
    #[error("Missing upload: {0}")]
    MissingFile(String),
    #[error("Upload too large: {0}")]
    PayloadTooLarge(String),
    #[error("Could not decode image: {0}")]
    InvalidImage(String),
    #[error("Could not fetch image: {0}")]
    ImageFetch(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Model is not loaded")]
    NotReady,
}

impl DetectionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DetectionError::UnsupportedMediaType(_) => StatusCode::BAD_REQUEST,
            DetectionError::MissingFile(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DetectionError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            // Undecodable uploads are reported as server errors to keep the
            // existing contract, even though the client is at fault.
            DetectionError::InvalidImage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DetectionError::ImageFetch(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DetectionError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DetectionError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DetectionError::UnsupportedMediaType(_) => "unsupported_media_type",
            DetectionError::MissingFile(_) => "missing_file",
            DetectionError::PayloadTooLarge(_) => "payload_too_large",
            DetectionError::InvalidImage(_) => "invalid_image",
            DetectionError::ImageFetch(_) => "image_fetch",
            DetectionError::Inference(_) => "inference_error",
            DetectionError::NotReady => "not_ready",
        }
    }

    fn detail(&self) -> String {
        if self.status_code().is_server_error() && !matches!(self, DetectionError::NotReady) {
            format!("Processing failed: {}", self)
        } else {
            self.to_string()
        }
    }
}

/// Maps an extractor failure to an error, keeping size-limit rejections apart
/// from malformed bodies.
pub(crate) fn body_rejection(status: StatusCode, body_text: String) -> DetectionError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        DetectionError::PayloadTooLarge(body_text)
    } else {
        DetectionError::MissingFile(body_text)
    }
}

impl IntoResponse for DetectionError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "Request failed: {}", self);
        } else {
            tracing::warn!(kind = self.kind(), "Request rejected: {}", self);
        }
        (
            status,
            Json(ErrorBody {
                detail: self.detail(),
            }),
        )
            .into_response()
    }
}

/// Failures that abort process start.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Failed to load labels: {0}")]
    Labels(#[from] std::io::Error),
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("Failed to initialise metrics: {0}")]
    Telemetry(String),
    #[error("Model already loaded")]
    AlreadyLoaded,
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("Server error: {0}")]
    Serve(std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            DetectionError::UnsupportedMediaType("text/plain".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            DetectionError::MissingFile("no field".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            DetectionError::PayloadTooLarge("limit".into()).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            DetectionError::InvalidImage("empty".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            DetectionError::Inference("shape".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            DetectionError::NotReady.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_body_rejection_keeps_size_limit() {
        let err = body_rejection(StatusCode::PAYLOAD_TOO_LARGE, "too big".into());
        assert!(matches!(err, DetectionError::PayloadTooLarge(_)));

        let err = body_rejection(StatusCode::BAD_REQUEST, "no boundary".into());
        assert!(matches!(err, DetectionError::MissingFile(_)));
    }

    #[test]
    fn test_server_errors_are_prefixed() {
        let err = DetectionError::InvalidImage("zero-length buffer".into());
        assert_eq!(
            err.detail(),
            "Processing failed: Could not decode image: zero-length buffer"
        );

        let err = DetectionError::UnsupportedMediaType("text/plain".into());
        assert!(err.detail().starts_with("Please upload an image file"));
    }
}
