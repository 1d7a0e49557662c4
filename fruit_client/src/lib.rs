use fruit_schema::{DetectionResponse, ErrorBody};
use reqwest::{multipart, StatusCode};
use std::{fmt::Write, path::Path, time::Duration};
use thiserror::Error;

pub const DEFAULT_URL: &str = "http://127.0.0.1:8000/api/v1/fruit/detect";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Image file '{path}' could not be read: {source}")]
    ReadImage {
        path: String,
        source: std::io::Error,
    },
    #[error("Connection failed: {0}")]
    Connection(reqwest::Error),
    #[error("Request timed out: the service took too long to respond")]
    Timeout,
    #[error("Request failed: {status}\nError body: {detail}")]
    Rejected { status: StatusCode, detail: String },
    #[error("Unexpected response: {0}")]
    Response(reqwest::Error),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_connect() {
            ClientError::Connection(err)
        } else {
            ClientError::Response(err)
        }
    }
}

/// Media type sent with the upload, picked from the file extension.
pub fn guess_mime(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("tif") | Some("tiff") => "image/tiff",
        _ => "application/octet-stream",
    }
}

pub struct DetectClient {
    http: reqwest::Client,
    url: String,
}

impl DetectClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::Response)?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub async fn detect(
        &self,
        image_path: &Path,
        mime: Option<&str>,
    ) -> Result<DetectionResponse, ClientError> {
        let image_data = tokio::fs::read(image_path)
            .await
            .map_err(|source| ClientError::ReadImage {
                path: image_path.display().to_string(),
                source,
            })?;
        let file_name = image_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        let mime = mime.unwrap_or_else(|| guess_mime(image_path));
        tracing::debug!(file_name, mime, size = image_data.len(), "Uploading image");

        let part = multipart::Part::bytes(image_data)
            .file_name(file_name)
            .mime_str(mime)
            .map_err(ClientError::Response)?;
        let form = multipart::Form::new().part("file", part);

        let response = self.http.post(&self.url).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Rejected {
                status,
                detail: error_detail(&body),
            });
        }

        Ok(response.json::<DetectionResponse>().await?)
    }
}

/// Pulls `detail` out of a JSON error body, falling back to the raw text.
pub fn error_detail(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|e| e.detail)
        .unwrap_or_else(|_| body.to_string())
}

/// One line per failure; connection problems and timeouts name the target.
pub fn failure_message(err: &ClientError, url: &str, timeout_secs: u64) -> String {
    match err {
        ClientError::Connection(e) => format!(
            "Connection failed: could not reach {}, make sure the service is running ({})",
            url, e
        ),
        ClientError::Timeout => format!("Request timed out after {}s", timeout_secs),
        other => format!("Error: {}", other),
    }
}

pub fn format_report(response: &DetectionResponse) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Detection succeeded!");
    let _ = writeln!(out, "Detected {} fruits:", response.total_fruits);
    for (i, fruit) in response.fruits.iter().enumerate() {
        let bbox = &fruit.bounding_box;
        let _ = writeln!(
            out,
            "  {}. {} - confidence: {:.2}",
            i + 1,
            fruit.fruit_type,
            fruit.confidence
        );
        let _ = writeln!(
            out,
            "     position: ({:.1}, {:.1}, {:.1}, {:.1})",
            bbox.xmin, bbox.ymin, bbox.xmax, bbox.ymax
        );
    }
    out
}
